//! Tandem Orchestrator
//!
//! Pipeline controller, trigger dispatch, run storage and the HTTP API.

pub mod api;
pub mod config;
pub mod controller;
pub mod db;
pub mod dispatcher;
pub mod pipelines;
pub mod repository;

#[cfg(test)]
mod testing;
