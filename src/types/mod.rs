//! 类型模块：请求描述符与响应类型。
//!
//! # Types Module
//!
//! Core value types shared by the cache, the retry policy and the executor.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`RequestDescriptor`] | Immutable semantic input of a call (payload + parameters) |
//! | [`Response`] | Cached result of a successful call |
//! | [`TokenUsage`] | Token accounting reported by the provider |
//!
//! ## Example
//!
//! ```rust
//! use ai_response_cache::types::RequestDescriptor;
//!
//! let descriptor = RequestDescriptor::new("Explain quantum computing")
//!     .with_param("model", "gpt-4o-mini")
//!     .with_param("temperature", 0);
//! assert_eq!(descriptor.model(), Some("gpt-4o-mini"));
//! ```

pub mod descriptor;
pub mod response;

pub use descriptor::RequestDescriptor;
pub use response::{Response, TokenUsage};
