pub mod client;
pub mod properties;

pub use client::{NotionClient, NotionClientConfig, NotionClientError};
