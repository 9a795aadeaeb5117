//! Command-line application: option resolution and command entry points

pub mod options;
pub mod run;
