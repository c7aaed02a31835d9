//! 通用工具

pub mod body;
pub mod event_stream;

pub use body::{content_type_is_json, decompress_for_capture};
