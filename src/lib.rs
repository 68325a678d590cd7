pub mod audit;
pub mod config;
pub mod errors;
pub mod finalizer;
pub mod gates;
pub mod init;
pub mod logging;
pub mod onboard_config;
pub mod orchestrator;
pub mod shell;
pub mod source;
pub mod state;
pub mod ui;
pub mod util;
pub mod workflow;
