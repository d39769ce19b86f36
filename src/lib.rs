//! homelab library exports.
//!
//! The binary is a thin clap layer over these modules; integration tests in
//! `tests/` use them directly.

pub mod backup;
pub mod commands;
pub mod common;
pub mod config;
pub mod dns;
pub mod host;
pub mod iso;
pub mod preflight;
pub mod process;
pub mod scan;
pub mod stack;
pub mod term;
pub mod timing;
pub mod traffic;
