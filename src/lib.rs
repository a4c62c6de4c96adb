pub mod config;
pub mod errors;
pub mod executor;
pub mod init;
pub mod logging;
pub mod nlu;
pub mod orchestrator;
pub mod poller;
pub mod server;
pub mod store;
pub mod ui;
