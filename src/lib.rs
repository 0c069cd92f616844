//! Tiergate - Tiered Admission Control
//!
//! This crate decides, per inbound request, whether to admit it based on a
//! sliding window of the caller's recent traffic. Limits depend on the
//! caller's service tier and the requested endpoint. The engine can be
//! embedded as axum middleware or run as a standalone HTTP service.

pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;
