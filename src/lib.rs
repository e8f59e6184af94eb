//! Orchestrates the Kalico/Klipper firmware build-and-flash workflow for
//! USB-attached printer MCUs.

pub mod build;
pub mod commands;
pub mod config_cache;
pub mod discovery;
pub mod error;
pub mod flasher;
pub mod moonraker;
pub mod orchestrator;
pub mod output;
pub mod registry;
pub mod service;
pub mod types;
