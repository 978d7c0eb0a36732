//! Berth Core
//!
//! Core types and abstractions for the Berth dev-container orchestrator.
//!
//! This crate contains:
//! - Domain types: Core business entities (RunConfig, PortBinding, RunEvent, etc.)
//! - DTOs: Request/response payloads for the run registry surface

pub mod domain;
pub mod dto;
