//! sparkdeploy library
//!
//! Deployment, rollback and health-check pipelines for SparkNode hosts, plus
//! the relay server that exposes attempts over HTTP and WebSocket.

pub mod app;
pub mod checks;
pub mod client;
pub mod deploy;
pub mod errors;
pub mod filesys;
pub mod logs;
pub mod models;
pub mod provision;
pub mod remote;
pub mod server;
pub mod storage;
pub mod terminal;
pub mod utils;
