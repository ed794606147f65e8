//! # Controller
//!
//! Reconciliation logic and its supporting pieces.
//!
//! - `reconciler` - the sync pass over a Klusterlet and its building blocks
//! - `retry` - bounded conflict retry shared by status, finalizer and workload writes
//! - `backoff` - per-resource Fibonacci requeue backoff
//! - `server` - metrics and health endpoints

pub mod backoff;
pub mod reconciler;
pub mod retry;
pub mod server;
