//! Remote image retrieval
//!
//! Downloads the bytes behind a foreign image URL so the localizer can
//! re-host it.

pub mod client;
pub mod mock;

pub use client::HttpFetcher;
pub use mock::MockFetcher;

use crate::Result;
use async_trait::async_trait;

#[async_trait]
pub trait ImageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}
