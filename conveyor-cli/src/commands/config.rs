//! `conveyor config ...`

use anyhow::{Context, Result};
use conveyor_config::ConveyorConfig;
use std::fs;
use std::path::PathBuf;
use tracing::{error, info};

use super::load_config;

/// Handle configuration validation
pub fn handle_config_validate(config_file: &PathBuf) -> Result<()> {
    info!("Validating configuration file: {:?}", config_file);

    if !config_file.exists() {
        return Err(anyhow::anyhow!(
            "Configuration file not found: {:?}",
            config_file
        ));
    }

    match load_config(Some(config_file)) {
        Ok(_) => {
            println!("Configuration file is valid");
            Ok(())
        }
        Err(e) => {
            println!("Configuration validation failed: {:#}", e);
            error!("Configuration validation failed: {:#}", e);
            Err(e)
        }
    }
}

/// Handle configuration generation
pub fn handle_config_generate(output: Option<&PathBuf>, force: bool) -> Result<()> {
    let sample = ConveyorConfig::generate_sample();

    let Some(output) = output else {
        print!("{}", sample);
        return Ok(());
    };

    if output.exists() && !force {
        return Err(anyhow::anyhow!(
            "Output file already exists: {:?}. Use --force to overwrite.",
            output
        ));
    }

    if let Some(parent) = output.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).context("Failed to create output directory")?;
        }
    }

    fs::write(output, sample)
        .with_context(|| format!("Failed to write configuration to {:?}", output))?;
    println!("Configuration written to {:?}", output);
    Ok(())
}

/// Handle configuration display
pub fn handle_config_show(config: &ConveyorConfig, format: &str) -> Result<()> {
    let rendered = match format.to_lowercase().as_str() {
        "yaml" | "yml" => serde_yaml::to_string(config).context("Failed to serialize to YAML")?,
        "json" => serde_json::to_string_pretty(config).context("Failed to serialize to JSON")?,
        other => return Err(anyhow::anyhow!("Unsupported format: {}", other)),
    };
    println!("{}", rendered);
    Ok(())
}
