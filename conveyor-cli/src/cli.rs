//! CLI argument parsing definitions

use clap::{Args, Parser, Subcommand};
use humantime_serde::re::humantime;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Set the log level (trace, debug, info, warn, error)
    #[arg(long, value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Run as worker process (internal use)
    #[arg(long, hide = true)]
    pub worker: bool,

    /// Worker ID (used with --worker)
    #[arg(long, value_name = "ID", hide = true)]
    pub worker_id: Option<usize>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Which manager(s) a command talks to
#[derive(Args, Debug, Clone, Copy, Default)]
#[group(multiple = false)]
pub struct Managers {
    /// Only the job queue manager
    #[arg(long)]
    pub jobs: bool,

    /// Only the result store manager
    #[arg(long)]
    pub results: bool,

    /// Both managers (the default)
    #[arg(long)]
    pub both: bool,
}

impl Managers {
    pub fn includes_jobs(&self) -> bool {
        !self.results || self.both
    }

    pub fn includes_results(&self) -> bool {
        !self.jobs || self.both
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Host the job queue and/or result store managers
    Serve {
        #[command(flatten)]
        managers: Managers,
    },

    /// Run the watchdog over a pool of worker processes
    Pool,

    /// Run a single worker in this process
    Worker {
        /// Identifier used in logs and reports
        #[arg(long, value_name = "ID", default_value_t = 0)]
        id: usize,
    },

    /// Push a task onto the job queue and print its id
    Submit {
        /// Registered function name
        function: String,

        /// JSON arguments: an array, an object, or a single value
        #[arg(long, value_name = "JSON")]
        args: Option<String>,

        /// Task id (defaults to a random UUID)
        #[arg(long, value_name = "ID")]
        id: Option<String>,

        /// Queue priority, lower runs first
        #[arg(long, value_name = "P", default_value_t = 0, allow_hyphen_values = true)]
        priority: i64,
    },

    /// Look up the outcome of a task
    Result {
        /// Task id
        id: String,

        /// Wait up to this long for the outcome (e.g. "5s", "500ms")
        #[arg(long, value_name = "DURATION", value_parser = humantime::parse_duration)]
        timeout: Option<Duration>,
    },

    /// Print what the managers expose
    Info {
        #[command(flatten)]
        managers: Managers,
    },

    /// Ask the managers to stop
    Shutdown {
        #[command(flatten)]
        managers: Managers,
    },

    /// Configuration management commands
    Config {
        #[command(subcommand)]
        config_cmd: ConfigCommands,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Validate a configuration file
    Validate {
        /// Configuration file to validate
        #[arg(value_name = "PATH")]
        config_file: PathBuf,
    },

    /// Generate a sample configuration file
    Generate {
        /// Output file (stdout when omitted)
        #[arg(long, short, value_name = "PATH")]
        output: Option<PathBuf>,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Show the effective configuration
    Show {
        /// Output format: yaml or json
        #[arg(long, value_name = "FORMAT", default_value = "yaml")]
        format: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_flags_parse_without_subcommand() {
        let cli = Cli::parse_from(["conveyor", "--worker", "--worker-id", "3"]);
        assert!(cli.worker);
        assert_eq!(cli.worker_id, Some(3));
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_submit_arguments() {
        let cli = Cli::parse_from([
            "conveyor",
            "submit",
            "fact",
            "--args",
            "[5]",
            "--priority",
            "-2",
        ]);
        match cli.command {
            Some(Commands::Submit {
                function,
                args,
                id,
                priority,
            }) => {
                assert_eq!(function, "fact");
                assert_eq!(args.as_deref(), Some("[5]"));
                assert_eq!(id, None);
                assert_eq!(priority, -2);
            }
            _ => panic!("expected submit"),
        }
    }

    #[test]
    fn test_result_timeout_is_humantime() {
        let cli = Cli::parse_from(["conveyor", "result", "t1", "--timeout", "1500ms"]);
        match cli.command {
            Some(Commands::Result { id, timeout }) => {
                assert_eq!(id, "t1");
                assert_eq!(timeout, Some(Duration::from_millis(1500)));
            }
            _ => panic!("expected result"),
        }
    }

    #[test]
    fn test_manager_selection() {
        let default = Managers::default();
        assert!(default.includes_jobs() && default.includes_results());

        let cli = Cli::parse_from(["conveyor", "serve", "--jobs"]);
        match cli.command {
            Some(Commands::Serve { managers }) => {
                assert!(managers.includes_jobs());
                assert!(!managers.includes_results());
            }
            _ => panic!("expected serve"),
        }

        assert!(Cli::try_parse_from(["conveyor", "serve", "--jobs", "--results"]).is_err());
    }

    #[test]
    fn test_global_options_after_subcommand() {
        let cli = Cli::parse_from(["conveyor", "pool", "--config", "c.yaml", "--log-level", "debug"]);
        assert_eq!(cli.config, Some(PathBuf::from("c.yaml")));
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
    }
}
