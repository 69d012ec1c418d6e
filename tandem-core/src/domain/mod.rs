//! Core domain types
//!
//! This module contains the core domain structures used across Tandem services.
//! These types are shared between the orchestrator (which sequences and persists
//! runs) and the runner (which executes individual actions).

pub mod artifact;
pub mod descriptor;
pub mod event;
pub mod health;
pub mod image;
pub mod log;
pub mod pipeline;
pub mod run;
