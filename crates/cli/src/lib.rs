//! Command line front end for the `gsm` session manager.

pub mod cli;
pub mod commands;
pub mod config;
pub mod logging;
