//! Relay API models

pub mod api;
pub mod frames;
pub mod pipeline;
