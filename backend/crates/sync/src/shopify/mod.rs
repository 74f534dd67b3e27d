pub mod client;
pub mod models;
pub mod query;

pub use client::{ShopifyClient, ShopifyClientConfig, ShopifyClientError};
