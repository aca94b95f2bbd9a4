//! Tracing setup shared by the Conveyor binary and its worker processes

pub mod init;

pub use init::{init_logging_from_config, init_simple_tracing, init_worker_tracing};
