//! HTTP API: session middleware, license-gated routes, and process wiring.

pub mod app;
pub mod config;
pub mod context;
pub mod cookies;
pub mod middleware;
