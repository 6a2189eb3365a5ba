//! Image recompression for a media library
//!
//! Re-encodes JPEG and PNG uploads in place with a fixed quality policy,
//! recompresses the whole library on demand, and re-hosts externally linked
//! images found in saved content.

pub mod app;
pub mod batch;
pub mod error;
pub mod fetch;
pub mod hooks;
pub mod image;
pub mod library;
pub mod localizer;
pub mod models;
pub mod nonce;

pub use error::{Error, Result};
