//! Shared building blocks for the docker-trace workspace: the error
//! taxonomy, environment-driven configuration, lexical path utilities, and
//! the cancellation/retry helpers used by every long-running command.

pub mod cancel;
pub mod config;
pub mod error;
pub mod pathutil;
pub mod retry;

pub use error::{Result, TraceError};
