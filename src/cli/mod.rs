pub mod app;
pub mod commands;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod env;
pub mod info;
pub mod run;
pub mod runtime;
pub mod serve;

pub use app::run;
pub use config::{cmd_config, ConfigArgs};
pub use run::{cmd_run, RunArgs};
pub use serve::{cmd_serve, ServeArgs};
