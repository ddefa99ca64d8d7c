//! Verification agents
//!
//! Each enrolled person is represented by one remote agent exposing a
//! `POST /verify` endpoint that scores an image against that person.

pub mod registry;

pub use registry::{AgentRegistry, ConfigAgentRegistry, StaticAgentRegistry};
