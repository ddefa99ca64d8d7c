//! HTTP API Handlers and Routes
//!
//! This module provides the REST API layer for Veriface, built on the Axum web framework.
//!
//! # Module Structure
//!
//! - [`api::handlers`](crate::api::handlers) - Request handlers for each endpoint
//! - [`api::routes`](crate::api::routes) - Route definitions and router configuration
//! - [`api::docs`](crate::api::docs) - OpenAPI document
//!
//! # API Endpoints
//!
//! ## Identification
//! - `POST /identify-and-answer` - Multipart `image` (+ optional `question`),
//!   headers `x-user-id` / `x-user-type`
//!
//! ## Metrics (`/metrics`, all accept `?days=N`, default 7)
//! - `GET /metrics/summary` - Volume, latency, timeouts, per-route p50/p95
//! - `GET /metrics/by-user-type` - Traffic per user type
//! - `GET /metrics/decisions` - Decision distribution
//! - `GET /metrics/services` - Verification agent reliability
//!
//! ## Agents
//! - `GET /agents` - Active agent snapshot
//!
//! ## Public
//! - `GET /health` - Health check endpoint
//! - `GET /api-docs/openapi.json` - OpenAPI document
//!
//! # Authentication
//!
//! All non-public endpoints require the configured API token:
//! ```text
//! Authorization: Bearer <token>
//! ```

/// OpenAPI document.
pub mod docs;
/// Request and response handlers for all API endpoints.
pub mod handlers;
/// Router configuration and route definitions.
pub mod routes;
