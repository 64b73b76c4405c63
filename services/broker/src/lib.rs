//! Broker service library crate.
//!
//! # Purpose
//! Exposes broker subsystems (config, observability, notification
//! dispatch, TCP transport) for use by the broker binary and
//! integration tests.

pub mod config;
pub mod notify;
pub mod observability;
pub mod tcp;
