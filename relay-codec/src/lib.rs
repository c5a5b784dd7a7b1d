//! Record-to-request encoding.
//!
//! Two halves: [`body`] renders a record value into the UTF-8 JSON
//! request body, [`headers`] filters and sanitises record headers into
//! HTTP headers. Both are pure; the pipeline composes them per record.

pub mod body;
pub mod headers;

pub use body::{encode_body, JSON_CONTENT_TYPE};
pub use headers::HeaderForwarder;
