//! In-memory `AmpacheApi` used by tests

use async_trait::async_trait;
use bytes::Bytes;
use futures::{StreamExt, stream};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use super::api::{AmpacheApi, ByteStream, DownloadRequest, FavoriteTarget};
use super::error::{ApiError, Result};
use super::parser::HandshakeInfo;

#[derive(Debug, Clone)]
pub enum FakeDownload {
    Data(Vec<u8>),
    /// Send the bytes, then fail the stream
    FailAfter(Vec<u8>),
    /// Send the bytes, then never finish
    Hang(Vec<u8>),
}

#[derive(Default)]
pub struct FakeApi {
    pub playlists_document: Mutex<String>,
    pub album_documents: Mutex<HashMap<String, String>>,
    pub downloads: Mutex<HashMap<String, FakeDownload>>,
    pub download_calls: AtomicUsize,
    pub fail_uploads: AtomicBool,
    pub upload_delay: Mutex<Option<Duration>>,
    pub renamed: Mutex<Vec<(String, String)>>,
    pub favorites: Mutex<Vec<(FavoriteTarget, String, bool)>>,
}

impl FakeApi {
    pub fn with_download(self, id: &str, download: FakeDownload) -> Self {
        self.downloads.lock().insert(id.to_string(), download);
        self
    }

    async fn upload(&self) -> Result<()> {
        let delay = *self.upload_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_uploads.load(Ordering::SeqCst) {
            return Err(ApiError::Server {
                code: 4700,
                message: "Access Denied".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl AmpacheApi for FakeApi {
    async fn handshake(&self) -> Result<HandshakeInfo> {
        Ok(HandshakeInfo {
            auth: "fake-token".to_string(),
            api: "6.0.0".to_string(),
            ..Default::default()
        })
    }

    async fn playlists(&self) -> Result<Bytes> {
        Ok(Bytes::from(self.playlists_document.lock().clone()))
    }

    async fn album_songs(&self, album_id: &str) -> Result<Bytes> {
        self.album_documents
            .lock()
            .get(album_id)
            .cloned()
            .map(Bytes::from)
            .ok_or_else(|| ApiError::Server {
                code: 4704,
                message: format!("Album {} not found", album_id),
            })
    }

    async fn update_playlist_name(&self, playlist_id: &str, name: &str) -> Result<()> {
        self.upload().await?;
        self.renamed
            .lock()
            .push((playlist_id.to_string(), name.to_string()));
        Ok(())
    }

    async fn set_favorite(&self, target: FavoriteTarget, id: &str, favorite: bool) -> Result<()> {
        self.upload().await?;
        self.favorites
            .lock()
            .push((target, id.to_string(), favorite));
        Ok(())
    }

    async fn download(&self, request: &DownloadRequest) -> Result<ByteStream> {
        self.download_calls.fetch_add(1, Ordering::SeqCst);
        let download = self
            .downloads
            .lock()
            .get(&request.id)
            .cloned()
            .unwrap_or_else(|| FakeDownload::Data(b"fake audio".to_vec()));

        let stream: ByteStream = match download {
            FakeDownload::Data(data) => stream::iter(vec![Ok(Bytes::from(data))]).boxed(),
            FakeDownload::FailAfter(data) => stream::iter(vec![
                Ok(Bytes::from(data)),
                Err(ApiError::UnexpectedResponse("connection reset".to_string())),
            ])
            .boxed(),
            FakeDownload::Hang(data) => stream::once(async move { Ok(Bytes::from(data)) })
                .chain(stream::pending())
                .boxed(),
        };
        Ok(stream)
    }
}
