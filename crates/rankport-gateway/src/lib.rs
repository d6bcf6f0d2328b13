//! # Rankport Gateway
//!
//! HTTP API over the scoring engine. Tenants are addressed by subdomain,
//! admins by a reserved host; every response uses the `{status, data, message}`
//! envelope.

pub mod caller;
pub mod response;
pub mod routes;
pub mod server;

pub use server::{AppState, build_router, start};
