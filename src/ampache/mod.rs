//! Ampache server access: XML API client and response parsers

pub mod api;
pub mod auth;
pub mod client;
pub mod error;
#[cfg(test)]
pub mod fake;
pub mod parser;

pub use api::{AmpacheApi, ByteStream, DownloadRequest, FavoriteTarget};
pub use client::AmpacheClient;
pub use error::ApiError;
