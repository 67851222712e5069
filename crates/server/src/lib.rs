//! Shared library surface for the ingest/classification backend, exposed
//! so scenario-level tests in `tests/` can drive the same modules the
//! `vncrcc-server` binary runs, without going through the network.

pub mod admin;
pub mod backoff;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod http;
pub mod persistence;
pub mod pipeline;
pub mod read_cache;
