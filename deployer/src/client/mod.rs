//! Clients of a running relay server

pub mod watch;
