//! Ratewarden - Per-Identifier Request Admission Control
//!
//! This crate decides whether a request from a given identifier (client IP or
//! API key) may proceed. Each identifier gets a fixed one-second counting
//! window and, once its quota is exceeded, a cooldown during which every
//! request is denied. Counting state lives behind a pluggable store so the
//! decision stays consistent across requests and processes.

pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;
pub mod store;
