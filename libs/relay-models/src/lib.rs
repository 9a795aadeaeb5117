//! Wire models for the sparkdeploy event relay
//!
//! Shared between the relay server (`sparkdeploy serve`) and anything that
//! consumes its HTTP and WebSocket surface.

pub mod models;

pub use models::api::*;
pub use models::frames::RelayFrame;
pub use models::pipeline::{AttemptKind, Outcome, Provider, Step, StepStatus};
