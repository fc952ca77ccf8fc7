//! Embedded static HTML served by the control server.
//!
//! The page is kept as a `&'static str` so it ships inside the binary without
//! filesystem lookups.

pub mod index;
