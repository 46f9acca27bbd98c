//! Client Module
//!
//! Upstream HTTP client and the request dispatcher built on it.

pub mod dispatcher;
pub mod http;

pub use dispatcher::RequestDispatcher;
pub use http::GeminiClient;
