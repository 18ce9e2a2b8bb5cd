//! Sync orchestration between the server and the local library
//!
//! Every operation works in its own store context. Documents are fetched on
//! the async runtime and parsed on the blocking pool. Upload-direction changes
//! are applied locally first and pushed to the server in background tasks
//! whose failures go to the [`EventReporter`].

use bytes::Bytes;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, info, warn};

use crate::ampache::parser::{
    ParseIssue, ParsedObjectNotifiable, PlaylistParser, SongParser, XmlHandler,
    parse_document,
};
use crate::ampache::{AmpacheApi, ApiError, FavoriteTarget};
use crate::library::{
    AlbumId, Entity, Library, LibraryStore, PlayableId, PlaylistId, StoreError, assign,
};
use crate::report::EventReporter;

pub const TOPIC_PLAYLIST_UPDATE_NAME: &str = "Playlist Update Name";
pub const TOPIC_FAVORITE_UPDATE: &str = "Favorite Update";

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Background task failed: {0}")]
    Join(#[from] JoinError),

    #[error("{0} is not known to the library")]
    NotFound(&'static str),

    #[error("{0} has no server id yet")]
    NotSynced(&'static str),
}

pub type Result<T> = std::result::Result<T, SyncError>;

/// Outcome of one parser pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncResult {
    /// Entities closed by the parser
    pub parsed: usize,
    /// Entities skipped because they were malformed
    pub issues: Vec<ParseIssue>,
}

pub struct LibrarySyncer {
    api: Arc<dyn AmpacheApi>,
    store: LibraryStore,
    reporter: Arc<dyn EventReporter>,
    notifier: Option<Arc<dyn ParsedObjectNotifiable>>,
}

/// Feed `body` into `handler`, keeping what was parsed before a syntax error
fn parse_lenient<H: XmlHandler>(body: &Bytes, handler: &mut H) -> Option<ParseIssue> {
    match parse_document(&body[..], handler) {
        Ok(()) => None,
        Err(error) => {
            warn!("Response document is malformed, keeping parsed entries: {}", error);
            Some(ParseIssue {
                element: "document".to_string(),
                message: error.to_string(),
            })
        }
    }
}

impl LibrarySyncer {
    pub fn new(
        api: Arc<dyn AmpacheApi>,
        store: LibraryStore,
        reporter: Arc<dyn EventReporter>,
    ) -> Self {
        Self {
            api,
            store,
            reporter,
            notifier: None,
        }
    }

    /// Receive a notification for every entity parsed by this syncer
    pub fn with_notifier(mut self, notifier: Arc<dyn ParsedObjectNotifiable>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn store(&self) -> &LibraryStore {
        &self.store
    }

    /// Fetch every playlist and merge it into the library
    pub async fn sync_playlists(&self) -> Result<SyncResult> {
        info!("Syncing playlists");
        let body = self.api.playlists().await?;
        let store = self.store.clone();
        let notifier = self.notifier.clone();

        let result = tokio::task::spawn_blocking(move || -> Result<SyncResult> {
            let mut library = store.context();
            let mut parser = PlaylistParser::new(&mut library, notifier);
            let fatal = parse_lenient(&body, &mut parser);
            let mut result = SyncResult {
                parsed: parser.parsed_count(),
                issues: parser.issues().to_vec(),
            };
            result.issues.extend(fatal);
            library.save_context()?;
            Ok(result)
        })
        .await??;

        info!(
            "Synced {} playlists ({} skipped)",
            result.parsed,
            result.issues.len()
        );
        Ok(result)
    }

    /// Album with server id `id`, created when the library does not know it yet
    pub fn album_for_id(&self, id: &str) -> Result<AlbumId> {
        let mut library = self.store.context();
        if let Some(album) = library.get_album(id) {
            return Ok(album);
        }
        let album = library.create_album();
        if let Some(record) = library.record_mut(album) {
            record.set_server_id(id);
        }
        library.save_context()?;
        Ok(album)
    }

    /// Fetch the songs of `album` and merge them into the library.
    ///
    /// Repeated calls with the same server data converge to the same state:
    /// songs are matched by id and stamped with the latest sync wave.
    pub async fn sync_album(&self, album: AlbumId) -> Result<SyncResult> {
        let album_id = {
            let library = self.store.context();
            let record = library.record(album).ok_or(SyncError::NotFound("Album"))?;
            if record.id.is_empty() {
                return Err(SyncError::NotSynced("Album"));
            }
            record.id.clone()
        };

        debug!("Syncing songs of album {}", album_id);
        let body = self.api.album_songs(&album_id).await?;
        let store = self.store.clone();
        let notifier = self.notifier.clone();

        let result = tokio::task::spawn_blocking(move || -> Result<SyncResult> {
            let mut library = store.context();
            let wave = match library.latest_sync_wave() {
                Some(wave) => wave,
                None => library.create_sync_wave(),
            };

            let mut parser = SongParser::new(&mut library, notifier)
                .with_sync_wave(wave)
                .with_album(album);
            let fatal = parse_lenient(&body, &mut parser);
            let mut result = SyncResult {
                parsed: parser.parsed_count(),
                issues: parser.issues().to_vec(),
            };
            result.issues.extend(fatal);

            if let Some(record) = library.record_mut(album) {
                assign(&mut record.is_songs_meta_data_synced, true);
                if record.sync_wave.is_none() {
                    record.sync_wave = Some(wave);
                }
            }
            if let Some(record) = library.record_mut(wave) {
                assign(&mut record.is_done, true);
            }
            library.save_context()?;
            Ok(result)
        })
        .await??;

        info!("Synced {} songs of album {}", result.parsed, album_id);
        Ok(result)
    }

    /// Push the local name of `playlist` to the server in the background.
    ///
    /// A failure is reported and the local name is kept.
    pub fn sync_upload_playlist_name(&self, playlist: PlaylistId) -> JoinHandle<()> {
        let target = {
            let library = self.store.context();
            library
                .record(playlist)
                .map(|record| (record.id.clone(), record.name.clone()))
        };
        let api = self.api.clone();
        let reporter = self.reporter.clone();

        tokio::spawn(async move {
            let Some((id, name)) = target else {
                warn!("Playlist to upload no longer exists");
                return;
            };
            if id.is_empty() {
                debug!("Playlist {} has no server id yet, nothing to upload", name);
                return;
            }
            match api.update_playlist_name(&id, &name).await {
                Ok(()) => debug!("Uploaded name of playlist {}", id),
                Err(error) => reporter.report(TOPIC_PLAYLIST_UPDATE_NAME, &error),
            }
        })
    }

    /// Rename `playlist` locally, then upload the new name
    pub fn rename_playlist(&self, playlist: PlaylistId, name: &str) -> Result<JoinHandle<()>> {
        let mut library = self.store.context();
        let record = library
            .record_mut(playlist)
            .ok_or(SyncError::NotFound("Playlist"))?;
        assign(&mut record.name, name.to_string());
        library.save_context()?;
        Ok(self.sync_upload_playlist_name(playlist))
    }

    /// Flip the favorite flag of `album` and notify the server in the background.
    ///
    /// Returns the new local value, which is saved before the server is asked.
    pub fn toggle_favorite_album(&self, album: AlbumId) -> Result<(bool, JoinHandle<()>)> {
        let mut library = self.store.context();
        let record = library
            .record_mut(album)
            .ok_or(SyncError::NotFound("Album"))?;
        record.is_favorite = !record.is_favorite;
        let (favorite, id) = (record.is_favorite, record.id.clone());
        library.save_context()?;

        Ok((favorite, self.upload_favorite(FavoriteTarget::Album, id, favorite)))
    }

    /// Flip the favorite flag of a song or podcast episode
    pub fn toggle_favorite_playable(
        &self,
        playable: PlayableId,
    ) -> Result<(bool, JoinHandle<()>)> {
        let mut library = self.store.context();
        let record = library
            .record_mut(playable)
            .ok_or(SyncError::NotFound("Playable"))?;
        record.is_favorite = !record.is_favorite;
        let target = if record.is_song() {
            FavoriteTarget::Song
        } else {
            FavoriteTarget::PodcastEpisode
        };
        let (favorite, id) = (record.is_favorite, record.id.clone());
        library.save_context()?;

        Ok((favorite, self.upload_favorite(target, id, favorite)))
    }

    fn upload_favorite(&self, target: FavoriteTarget, id: String, favorite: bool) -> JoinHandle<()> {
        let api = self.api.clone();
        let reporter = self.reporter.clone();
        tokio::spawn(async move {
            if id.is_empty() {
                debug!("Skipping favorite upload of unsynced {}", target.as_str());
                return;
            }
            if let Err(error) = api.set_favorite(target, &id, favorite).await {
                reporter.report(TOPIC_FAVORITE_UPDATE, &error);
            }
        })
    }
}

/// Library-wide counters used for reporting
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LibraryStats {
    pub playlists: usize,
    pub artists: usize,
    pub albums: usize,
    pub albums_with_synced_songs: usize,
    pub genres: usize,
    pub songs: usize,
    pub podcasts: usize,
    pub podcast_episodes: usize,
    pub cached_songs: usize,
    pub cached_podcast_episodes: usize,
    pub cached_bytes: u64,
}

impl LibraryStats {
    pub fn collect(library: &Library) -> Self {
        Self {
            playlists: library.playlist_count(),
            artists: library.artist_count(),
            albums: library.album_count(),
            albums_with_synced_songs: library.album_with_synced_songs_count(),
            genres: library.genre_count(),
            songs: library.song_count(),
            podcasts: library.podcast_count(),
            podcast_episodes: library.podcast_episode_count(),
            cached_songs: library.cached_song_count(),
            cached_podcast_episodes: library.cached_podcast_episode_count(),
            cached_bytes: library.cached_playable_size_in_bytes(),
        }
    }
}
