//! # 组合根

pub mod context;

pub use context::InterceptSession;
