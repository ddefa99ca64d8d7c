//! API request handlers.
//!
//! This module contains all HTTP request handlers organized by functionality.

/// Agent listing and health handlers.
pub mod agents;
/// Identify-and-answer handler with multipart parsing and upload validation.
pub mod identify;
/// Read-side metrics handlers.
pub mod metrics;
