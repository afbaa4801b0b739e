//! otpgate command line: configuration, logging and the HTTP API.

pub mod api;
pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod logging;
