//! Server operations the sync engine depends on

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;

use super::error::{ApiError, Result};
use super::parser::HandshakeInfo;

/// Body of a download, chunk by chunk
pub type ByteStream = BoxStream<'static, std::result::Result<Bytes, ApiError>>;

/// Kind of object a favorite flag is set on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FavoriteTarget {
    Song,
    Album,
    PodcastEpisode,
}

impl FavoriteTarget {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Song => "song",
            Self::Album => "album",
            Self::PodcastEpisode => "podcast_episode",
        }
    }
}

/// What to download for one playable
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    pub id: String,
    pub is_podcast_episode: bool,
}

impl DownloadRequest {
    pub fn object_type(&self) -> &'static str {
        if self.is_podcast_episode {
            "podcast_episode"
        } else {
            "song"
        }
    }
}

/// Ampache XML API as seen by the sync engine.
///
/// Document calls return the raw response body after it has been checked for
/// an error document; parsing is left to the caller.
#[async_trait]
pub trait AmpacheApi: Send + Sync {
    async fn handshake(&self) -> Result<HandshakeInfo>;

    async fn playlists(&self) -> Result<Bytes>;

    async fn album_songs(&self, album_id: &str) -> Result<Bytes>;

    async fn update_playlist_name(&self, playlist_id: &str, name: &str) -> Result<()>;

    async fn set_favorite(&self, target: FavoriteTarget, id: &str, favorite: bool) -> Result<()>;

    async fn download(&self, request: &DownloadRequest) -> Result<ByteStream>;
}
