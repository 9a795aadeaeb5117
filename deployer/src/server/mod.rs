//! HTTP and WebSocket relay for deployment attempts

pub mod handlers;
pub mod launcher;
pub mod registry;
pub mod serve;
pub mod state;
pub mod ws;
