//! Warden - Admission Control
//!
//! This crate decides, per inbound unit of work, whether it may proceed or
//! must be rejected. Policies are a sliding-window rate limit and a cap on
//! units in flight, either local to one process or shared across a fleet
//! through a counter store such as Redis. The [`middleware`] module turns any
//! policy into a request interceptor.

pub mod config;
pub mod error;
pub mod logging;
pub mod middleware;
pub mod ratelimit;
pub mod store;
