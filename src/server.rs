//! The HTTP surface.
//!
//! A stateless translation layer over the controller: handlers decode
//! requests, call one controller operation, and map the result (or its
//! error kind) onto a JSON response.

pub mod api;
pub mod router;

pub use router::create_router;
pub use router::serve;
