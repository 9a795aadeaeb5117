//! Deploy and rollback pipelines

pub mod backup;
pub mod compose;
pub mod context;
pub mod docker;
pub mod events;
pub mod fsm;
pub mod health;
pub mod lock;
pub mod pipeline;
pub mod policy;
pub mod rollback;
pub mod steps;
pub mod tracker;
