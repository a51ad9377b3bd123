//! Core types for queuestack
//!
//! This crate provides the pieces shared by the broker and its front ends:
//! wire error codes, request ids, a pluggable clock and XML escaping.

pub mod clock;
pub mod error;
pub mod request_id;
pub mod xml;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{ApiError, ErrorCode};
pub use request_id::RequestId;
