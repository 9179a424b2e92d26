//! docker-trace CLI - container tracing and image minification.

pub mod commands;
