//! Finding reconciliation and posture scoring engine.
//!
//! Scanners push complete snapshots of what they found; the engine diffs
//! each batch against the stored findings for the scope, walks every
//! finding through its lifecycle, and keeps a posture score that reflects
//! severity, exposure time, scan coverage, and trend.

pub mod api;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod lifecycle;
pub mod models;
pub mod scoring;
pub mod state;
pub mod suppression;
pub mod sync;

pub use config::Config;
pub use error::{AppError, Result};
