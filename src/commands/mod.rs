//! Command handlers.
//!
//! Every caller-facing operation takes the shared [`AppState`](crate::state::AppState)
//! explicitly; batch commands also take the remote service to talk to.

pub mod batch;
pub mod operations;

pub use batch::*;
pub use operations::*;
