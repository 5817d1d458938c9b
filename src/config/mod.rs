//! Configuration Module
//!
//! Provides the deployment configuration loaded from a TOML file. Every
//! section falls back to the values in [`defaults`], so an empty file (or no
//! file at all) reproduces the field deployment.
//!
//! ## Loading Order
//!
//! 1. `ROTORWATCH_CONFIG` environment variable (path to TOML file)
//! 2. `rotorwatch.toml` in the current working directory
//! 3. Built-in defaults
//!
//! The loaded [`AppConfig`] is passed explicitly to the trainer, the
//! inference engine and the HTTP layer; there is no process-wide singleton.

mod app_config;
pub mod defaults;

pub use app_config::*;
