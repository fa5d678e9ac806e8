//! Helpers shared by every route.

pub mod tracing;
