//! service-core: error type, configuration, tracing setup and HTTP middleware
//! shared by the workspace services.
pub mod config;
pub mod error;
pub mod middleware;
pub mod observability;
