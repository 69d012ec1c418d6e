//! Tandem runner
//!
//! Implementations of the four pipeline action kinds and the external
//! collaborators they talk to:
//! - `build`: per-architecture image build through a build runner
//! - `manifest`: multi-architecture manifest list merge
//! - `release`: deployment descriptor derivation
//! - `deploy`: health-gated rollout onto a deployable service
//!
//! The `service` layer dispatches an action definition to the right
//! implementation and is what the orchestrator's controller calls.

pub mod build;
pub mod config;
pub mod context;
pub mod deploy;
pub mod manifest;
pub mod podman;
pub mod registry;
pub mod release;
pub mod service;
