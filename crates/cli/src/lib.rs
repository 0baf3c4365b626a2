//! `sbx`: list sandboxes and hold session-resilient connections to them.

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod logging;
pub mod styles;
pub mod visibility;
