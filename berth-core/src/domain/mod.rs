//! Core domain types
//!
//! This module contains the core domain structures shared between the
//! orchestrating runner (which executes runs) and front-ends (which render
//! run state). These types carry no execution logic.

pub mod config;
pub mod event;
pub mod ports;
pub mod run;
