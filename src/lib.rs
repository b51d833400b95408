//! Onboard install wizard
//!
//! Exposes modules for integration testing

pub mod cli;
pub mod config;
pub mod install;
pub mod server;

pub use config::Config;
pub use install::{InstallSession, Installer, InstallerError, SimulatedInstaller};
