//! Library for the sage CLI: commands, terminal output and the web form.

pub mod commands;
pub mod output;
pub mod web;

pub use output::OutputFormat;
pub use web::{ApiError, ApiMetadata, ApiResponse, ApiResult, AppState};
