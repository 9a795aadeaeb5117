//! Settings and remote storage layout

pub mod layout;
pub mod settings;
