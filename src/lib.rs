//! Rust Edge Router - geo-aware HTTP request dispatch with origin failover
//!
//! Orders candidate origins by geographic match, then dispatches each
//! request through one of three availability strategies (sequential
//! failover, health-gated failover, parallel health race), buffering the
//! request body once for every attempt.

pub mod annotate;
pub mod body;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod forward;
pub mod geo;
pub mod health;
pub mod listener;
pub mod origin;
pub mod recovery;
pub mod service;
pub mod strategy;
#[cfg(test)]
mod testing;
