pub mod client;
pub mod json;

pub use client::LlmClient;
pub use json::extract_json;
