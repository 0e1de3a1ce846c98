//! appforge HTTP server.
//!
//! Exposes the persistence collaborator as a JSON API under `/v1/*`, the
//! sandboxed preview endpoints and the public hosted-app pages under
//! `/apps/{slug}`.

pub mod config;
pub mod error;
pub mod middleware;
pub mod routes;
pub mod seed;
pub mod state;
