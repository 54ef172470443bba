//! HTTP middleware shared by the workspace services.

pub mod tracing;

pub use self::tracing::{REQUEST_ID_HEADER, request_id_middleware};
