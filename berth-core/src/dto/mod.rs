//! Data Transfer Objects for the registry surface
//!
//! This module contains the request/response payloads exchanged between the
//! run registry and its callers (CLI, desktop shell, tests). DTOs are
//! lightweight representations optimized for serialization.

pub mod config;
pub mod run;
