//! Tandem Core
//!
//! Core types and abstractions for the Tandem multi-architecture image pipeline.
//!
//! This crate contains:
//! - Domain types: pipeline definitions, runs, images, artifacts, descriptors
//! - Errors: the action failure taxonomy and definition validation errors
//! - DTOs: Data transfer objects for the orchestrator API

pub mod domain;
pub mod dto;
pub mod error;
