//! Download and cache manager
//!
//! At most one download per playable is in flight. Downloads run on a task
//! tracker with bounded parallelism, stream into a `.part` file and are renamed
//! into the cache directory before the library records the cached file.

use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Notify, Semaphore, mpsc};
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use super::cache::{CacheDir, remove_if_exists};
use crate::ampache::{AmpacheApi, ApiError, DownloadRequest};
use crate::library::{CachedFile, LibraryStore, PlayableId, StoreError, assign};
use crate::report::EventReporter;
use crate::utils::audio::measure_duration;

pub const TOPIC_DOWNLOAD: &str = "Download";

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("Cache I/O failed for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Server sent an empty file")]
    Empty,

    #[error("Download was cancelled")]
    Cancelled,

    #[error("Playable was removed from the library")]
    Removed,

    #[error("Download task failed: {0}")]
    Join(#[from] JoinError),
}

pub type Result<T> = std::result::Result<T, DownloadError>;

/// How a download ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    Cached(CachedFile),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadStatus {
    Idle,
    Active,
    Finished(DownloadOutcome),
}

/// Published for every download that leaves the active set
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadEvent {
    Finished {
        playable: PlayableId,
        file: CachedFile,
    },
    Failed {
        playable: PlayableId,
        message: String,
    },
    Cancelled {
        playable: PlayableId,
    },
}

struct State {
    accepting: bool,
    shutdown: CancellationToken,
    active: HashMap<PlayableId, CancellationToken>,
    finished: HashMap<PlayableId, DownloadOutcome>,
}

struct Inner {
    api: Arc<dyn AmpacheApi>,
    store: LibraryStore,
    cache: CacheDir,
    reporter: Arc<dyn EventReporter>,
    permits: Semaphore,
    state: Mutex<State>,
    tracker: TaskTracker,
    /// Signalled whenever a download leaves the active set
    settled: Notify,
    events: Mutex<Option<mpsc::UnboundedSender<DownloadEvent>>>,
}

/// Shared handle to the download queue
#[derive(Clone)]
pub struct DownloadManager {
    inner: Arc<Inner>,
}

impl DownloadManager {
    /// Create a manager running at most `parallel` downloads at once
    pub fn new(
        api: Arc<dyn AmpacheApi>,
        store: LibraryStore,
        cache: CacheDir,
        reporter: Arc<dyn EventReporter>,
        parallel: usize,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                api,
                store,
                cache,
                reporter,
                permits: Semaphore::new(parallel.max(1)),
                state: Mutex::new(State {
                    accepting: true,
                    shutdown: CancellationToken::new(),
                    active: HashMap::new(),
                    finished: HashMap::new(),
                }),
                tracker: TaskTracker::new(),
                settled: Notify::new(),
                events: Mutex::new(None),
            }),
        }
    }

    pub fn cache(&self) -> &CacheDir {
        &self.inner.cache
    }

    /// Receive download events from now on. Replaces any earlier subscriber.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<DownloadEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.inner.events.lock() = Some(tx);
        rx
    }

    /// Enqueue every playable that is neither cached nor in flight. A failed
    /// download is started again. Returns how many downloads were started.
    pub fn download(&self, playables: &[PlayableId]) -> usize {
        let library = self.inner.store.context();
        let mut state = self.inner.state.lock();
        if !state.accepting {
            debug!("Download queue is stopped, ignoring {} requests", playables.len());
            return 0;
        }

        let mut enqueued = 0;
        for &requested in playables {
            let Some(playable) = library.playable(requested) else {
                warn!("Cannot download {:?}, it is not in the library", requested);
                continue;
            };
            let handle = playable.handle();
            if playable.is_cached() || state.active.contains_key(&handle) {
                continue;
            }
            if playable.id().is_empty() {
                warn!("Cannot download {}, it has no server id", playable.display_string());
                continue;
            }

            let request = DownloadRequest {
                id: playable.id().to_string(),
                is_podcast_episode: playable.is_podcast_episode(),
            };
            let file_name = self
                .inner
                .cache
                .file_name(handle, playable.record().content_type.as_deref());
            if let Some(DownloadOutcome::Failed(message)) = state.finished.remove(&handle) {
                debug!("Retrying {} after failure: {}", playable.display_string(), message);
            }
            let cancel = state.shutdown.child_token();
            state.active.insert(handle, cancel.clone());

            debug!("Queued download of {}", playable.display_string());
            self.inner.tracker.spawn(run_download(
                self.inner.clone(),
                handle,
                request,
                file_name,
                cancel,
            ));
            enqueued += 1;
        }
        enqueued
    }

    pub fn status(&self, playable: PlayableId) -> DownloadStatus {
        let playable = self.inner.store.context().resolve(playable);
        let state = self.inner.state.lock();
        if state.active.contains_key(&playable) {
            DownloadStatus::Active
        } else if let Some(outcome) = state.finished.get(&playable) {
            DownloadStatus::Finished(outcome.clone())
        } else {
            DownloadStatus::Idle
        }
    }

    pub fn active_count(&self) -> usize {
        self.inner.state.lock().active.len()
    }

    /// Forget the outcome recorded for `playable`
    pub fn remove_finished_download(&self, playable: PlayableId) -> Option<DownloadOutcome> {
        let playable = self.inner.store.context().resolve(playable);
        self.inner.state.lock().finished.remove(&playable)
    }

    /// Wait until no download is in flight
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.settled.notified();
            if self.inner.state.lock().active.is_empty() {
                return;
            }
            notified.await;
        }
    }

    /// Remove the cached blobs of `playables` and clear their cached-file
    /// references. Downloads of other playables are not touched.
    pub async fn delete_cache(&self, playables: &[PlayableId]) -> Result<usize> {
        let playables: Vec<PlayableId> = {
            let library = self.inner.store.context();
            playables.iter().map(|p| library.resolve(*p)).collect()
        };
        {
            let state = self.inner.state.lock();
            for playable in &playables {
                if let Some(cancel) = state.active.get(playable) {
                    cancel.cancel();
                }
            }
        }

        // References are cleared only after cancelled downloads left the active set.
        loop {
            let notified = self.inner.settled.notified();
            {
                let state = self.inner.state.lock();
                if !playables.iter().any(|p| state.active.contains_key(p)) {
                    break;
                }
            }
            notified.await;
        }
        {
            let mut state = self.inner.state.lock();
            for playable in &playables {
                state.finished.remove(playable);
            }
        }

        let store = self.inner.store.clone();
        let removed = tokio::task::spawn_blocking(move || -> Result<Vec<CachedFile>> {
            let mut library = store.context();
            let removed = library.delete_cache(&playables);
            library.save_context()?;
            Ok(removed)
        })
        .await??;

        for file in &removed {
            self.inner
                .cache
                .remove(&file.file_name)
                .await
                .map_err(|source| DownloadError::Io {
                    path: self.inner.cache.blob_path(&file.file_name),
                    source,
                })?;
        }
        debug!("Deleted {} cached files", removed.len());
        Ok(removed.len())
    }

    /// Stop all downloads, drop every cached file and start accepting again.
    /// Returns how many cached-file references were cleared.
    pub async fn clear_cache(&self) -> Result<usize> {
        self.stop_and_wait().await;
        let result = self.clear_stopped_cache().await;
        self.inner.state.lock().finished.clear();
        self.start();
        result
    }

    async fn clear_stopped_cache(&self) -> Result<usize> {
        let store = self.inner.store.clone();
        let removed = tokio::task::spawn_blocking(move || -> Result<usize> {
            let mut library = store.context();
            let removed = library.delete_complete_song_cache();
            library.save_context()?;
            Ok(removed.len())
        })
        .await??;

        let files = self
            .inner
            .cache
            .clear()
            .await
            .map_err(|source| DownloadError::Io {
                path: self.inner.cache.root().to_path_buf(),
                source,
            })?;
        info!("Cleared cache: {} references, {} files", removed, files);
        Ok(removed)
    }

    /// Cancel every download in flight and wait until none is left running
    /// and no partial file remains. New requests are ignored until [`start`].
    ///
    /// [`start`]: Self::start
    pub async fn stop_and_wait(&self) {
        {
            let mut state = self.inner.state.lock();
            state.accepting = false;
            state.shutdown.cancel();
        }
        self.inner.tracker.close();
        self.inner.tracker.wait().await;

        match self.inner.cache.remove_partials().await {
            Ok(0) => {}
            Ok(count) => debug!("Removed {} leftover partial downloads", count),
            Err(e) => warn!("Failed to remove partial downloads: {}", e),
        }
        info!("Downloads stopped");
    }

    /// Accept download requests again
    pub fn start(&self) {
        let mut state = self.inner.state.lock();
        if state.shutdown.is_cancelled() {
            state.shutdown = CancellationToken::new();
        }
        state.accepting = true;
        self.inner.tracker.reopen();
    }
}

async fn run_download(
    inner: Arc<Inner>,
    playable: PlayableId,
    request: DownloadRequest,
    file_name: String,
    cancel: CancellationToken,
) {
    let fetched = tokio::select! {
        _ = cancel.cancelled() => Err(DownloadError::Cancelled),
        fetched = fetch(&inner, playable, &request, &file_name) => fetched,
    };
    let result = match fetched {
        Ok(size) => commit(&inner, playable, file_name.clone(), size, &cancel).await,
        Err(e) => Err(e),
    };

    let event = match result {
        Ok(file) => {
            debug!("Cached {} as {}", request.id, file.file_name);
            DownloadEvent::Finished { playable, file }
        }
        Err(error) => {
            // Nothing of a failed download may stay behind.
            for path in [inner.cache.part_path(playable), inner.cache.blob_path(&file_name)] {
                if let Err(e) = remove_if_exists(&path).await {
                    warn!("Failed to remove {}: {}", path.display(), e);
                }
            }
            match error {
                DownloadError::Cancelled => {
                    debug!("Download of {} cancelled", request.id);
                    DownloadEvent::Cancelled { playable }
                }
                error => {
                    inner.reporter.report(TOPIC_DOWNLOAD, &error);
                    DownloadEvent::Failed {
                        playable,
                        message: error.to_string(),
                    }
                }
            }
        }
    };

    {
        let mut state = inner.state.lock();
        state.active.remove(&playable);
        match &event {
            DownloadEvent::Finished { file, .. } => {
                state
                    .finished
                    .insert(playable, DownloadOutcome::Cached(file.clone()));
            }
            DownloadEvent::Failed { message, .. } => {
                state
                    .finished
                    .insert(playable, DownloadOutcome::Failed(message.clone()));
            }
            DownloadEvent::Cancelled { .. } => {}
        }
    }
    inner.settled.notify_waiters();

    if let Some(events) = inner.events.lock().as_ref() {
        let _ = events.send(event);
    }
}

/// Stream the download into its part file and move it into place.
/// Returns the number of bytes written.
async fn fetch(
    inner: &Inner,
    playable: PlayableId,
    request: &DownloadRequest,
    file_name: &str,
) -> Result<u64> {
    let _permit = inner
        .permits
        .acquire()
        .await
        .map_err(|_| DownloadError::Cancelled)?;

    debug!("Downloading {} {}", request.object_type(), request.id);
    let mut stream = inner.api.download(request).await?;

    let part = inner.cache.part_path(playable);
    let io_error = |source| DownloadError::Io {
        path: part.clone(),
        source,
    };
    let mut file = fs::File::create(&part).await.map_err(io_error)?;
    let mut size = 0u64;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await.map_err(io_error)?;
        size += chunk.len() as u64;
    }
    file.flush().await.map_err(io_error)?;
    drop(file);

    if size == 0 {
        return Err(DownloadError::Empty);
    }

    let blob = inner.cache.blob_path(file_name);
    fs::rename(&part, &blob)
        .await
        .map_err(|source| DownloadError::Io { path: blob, source })?;
    Ok(size)
}

/// Record the finished blob in the library, measuring its duration on the way
async fn commit(
    inner: &Inner,
    playable: PlayableId,
    file_name: String,
    size: u64,
    cancel: &CancellationToken,
) -> Result<CachedFile> {
    let store = inner.store.clone();
    let path = inner.cache.blob_path(&file_name);
    let cancel = cancel.clone();

    tokio::task::spawn_blocking(move || -> Result<CachedFile> {
        let duration = measure_duration(&path);
        if cancel.is_cancelled() {
            return Err(DownloadError::Cancelled);
        }

        let mut library = store.context();
        let record = library
            .record_mut(playable)
            .ok_or(DownloadError::Removed)?;
        let file = CachedFile {
            file_name,
            size,
            content_type: record.content_type.clone(),
        };
        record.cached_file = Some(file.clone());
        if let Some(duration) = duration {
            assign(&mut record.play_duration, duration);
        }
        library.save_context()?;
        Ok(file)
    })
    .await?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ampache::fake::{FakeApi, FakeDownload};
    use crate::library::Entity;
    use crate::report::testing::RecordingReporter;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    struct Fixture {
        _dir: tempfile::TempDir,
        api: Arc<FakeApi>,
        reporter: Arc<RecordingReporter>,
        store: LibraryStore,
        manager: DownloadManager,
    }

    fn fixture(api: FakeApi, songs: &[&str]) -> (Fixture, Vec<PlayableId>) {
        let dir = tempfile::tempdir().unwrap();
        let api = Arc::new(api);
        let reporter = Arc::new(RecordingReporter::default());
        let store = LibraryStore::in_memory();

        let mut library = store.context();
        let handles = songs
            .iter()
            .map(|id| {
                let song = library.create_song();
                let record = library.record_mut(song).unwrap();
                record.set_server_id(id);
                record.content_type = Some("audio/mpeg".to_string());
                song
            })
            .collect();
        library.save_context().unwrap();

        let manager = DownloadManager::new(
            api.clone(),
            store.clone(),
            CacheDir::new(dir.path().join("cache")),
            reporter.clone(),
            2,
        );
        let fixture = Fixture {
            _dir: dir,
            api,
            reporter,
            store,
            manager,
        };
        (fixture, handles)
    }

    async fn init_cache(fixture: &Fixture) {
        fixture.manager.cache().init().await.unwrap();
    }

    async fn wait_for_partials(cache: &CacheDir, count: usize) {
        for _ in 0..500 {
            if cache.partial_count().await.unwrap() == count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("expected {} partial downloads", count);
    }

    #[tokio::test]
    async fn test_duplicate_requests_download_once() {
        let (fixture, songs) = fixture(FakeApi::default(), &["1"]);
        init_cache(&fixture).await;
        let song = songs[0];

        assert_eq!(fixture.manager.download(&[song, song]), 1);
        assert_eq!(fixture.manager.download(&[song]), 0);
        fixture.manager.wait_idle().await;

        assert_eq!(fixture.api.download_calls.load(Ordering::SeqCst), 1);
        let library = fixture.store.context();
        let record = library.record(song).unwrap();
        let cached = record.cached_file.clone().unwrap();
        assert_eq!(cached.file_name, format!("{}.mp3", song.raw()));
        assert_eq!(cached.size, b"fake audio".len() as u64);
        assert!(fixture.manager.cache().blob_path(&cached.file_name).exists());
        assert_eq!(
            fixture.manager.status(song),
            DownloadStatus::Finished(DownloadOutcome::Cached(cached))
        );

        // Already cached, even once the finished entry is forgotten.
        fixture.manager.remove_finished_download(song);
        assert_eq!(fixture.manager.download(&[song]), 0);
    }

    #[tokio::test]
    async fn test_stop_and_wait_leaves_no_partial_files() {
        let api = FakeApi::default()
            .with_download("1", FakeDownload::Hang(b"first half".to_vec()))
            .with_download("2", FakeDownload::Hang(b"other half".to_vec()));
        let (fixture, songs) = fixture(api, &["1", "2"]);
        init_cache(&fixture).await;
        let cache = fixture.manager.cache().clone();

        assert_eq!(fixture.manager.download(&songs), 2);
        wait_for_partials(&cache, 2).await;

        fixture.manager.stop_and_wait().await;
        assert_eq!(cache.partial_count().await.unwrap(), 0);
        assert_eq!(fixture.manager.active_count(), 0);
        assert_eq!(fixture.store.context().cached_song_count(), 0);
        assert!(fixture.reporter.topics().is_empty());

        // Stopped queues ignore requests until started again.
        assert_eq!(fixture.manager.download(&songs[..1]), 0);
        fixture.manager.start();
        assert_eq!(fixture.manager.download(&songs[..1]), 1);
        fixture.manager.stop_and_wait().await;
    }

    #[tokio::test]
    async fn test_failed_download_leaves_nothing_cached() {
        let api = FakeApi::default().with_download("1", FakeDownload::FailAfter(b"abc".to_vec()));
        let (fixture, songs) = fixture(api, &["1"]);
        init_cache(&fixture).await;
        let song = songs[0];

        assert_eq!(fixture.manager.download(&[song]), 1);
        fixture.manager.wait_idle().await;

        assert!(!fixture.store.context().record(song).unwrap().is_cached());
        assert_eq!(fixture.manager.cache().clear().await.unwrap(), 0);
        assert_eq!(fixture.reporter.topics(), vec![TOPIC_DOWNLOAD]);
        assert!(matches!(
            fixture.manager.status(song),
            DownloadStatus::Finished(DownloadOutcome::Failed(_))
        ));

        // Nothing retries on its own; enqueueing again does.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(fixture.api.download_calls.load(Ordering::SeqCst), 1);
        assert_eq!(fixture.manager.download(&[song]), 1);
        fixture.manager.wait_idle().await;
        assert_eq!(fixture.api.download_calls.load(Ordering::SeqCst), 2);

        assert!(fixture.manager.remove_finished_download(song).is_some());
        assert_eq!(fixture.manager.status(song), DownloadStatus::Idle);
    }

    #[tokio::test]
    async fn test_empty_download_fails() {
        let api = FakeApi::default().with_download("1", FakeDownload::Data(Vec::new()));
        let (fixture, songs) = fixture(api, &["1"]);
        init_cache(&fixture).await;

        fixture.manager.download(&songs);
        fixture.manager.wait_idle().await;
        assert_eq!(fixture.store.context().cached_song_count(), 0);
        assert_eq!(fixture.manager.cache().partial_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_delete_cache_keeps_other_playables() {
        let (fixture, songs) = fixture(FakeApi::default(), &["1", "2"]);
        init_cache(&fixture).await;

        fixture.manager.download(&songs);
        fixture.manager.wait_idle().await;
        assert_eq!(fixture.store.context().cached_song_count(), 2);

        let kept_file = fixture
            .store
            .context()
            .record(songs[1])
            .unwrap()
            .cached_file
            .clone()
            .unwrap();

        assert_eq!(fixture.manager.delete_cache(&songs[..1]).await.unwrap(), 1);
        let library = fixture.store.context();
        assert!(!library.record(songs[0]).unwrap().is_cached());
        assert!(library.record(songs[1]).unwrap().is_cached());
        assert_eq!(fixture.manager.status(songs[0]), DownloadStatus::Idle);
        assert!(fixture.manager.cache().blob_path(&kept_file.file_name).exists());
        assert!(
            !fixture
                .manager
                .cache()
                .blob_path(&format!("{}.mp3", songs[0].raw()))
                .exists()
        );
    }

    #[tokio::test]
    async fn test_delete_cache_settles_in_flight_download() {
        let api = FakeApi::default().with_download("1", FakeDownload::Hang(b"partial".to_vec()));
        let (fixture, songs) = fixture(api, &["1", "2"]);
        init_cache(&fixture).await;
        let cache = fixture.manager.cache().clone();

        assert_eq!(fixture.manager.download(&songs[..1]), 1);
        wait_for_partials(&cache, 1).await;

        assert_eq!(fixture.manager.delete_cache(&songs[..1]).await.unwrap(), 0);
        assert_eq!(fixture.manager.active_count(), 0);
        assert_eq!(cache.partial_count().await.unwrap(), 0);
        assert_eq!(fixture.manager.status(songs[0]), DownloadStatus::Idle);
        assert!(!fixture.store.context().record(songs[0]).unwrap().is_cached());
        assert!(fixture.reporter.topics().is_empty());

        // The cancelled playable can be queued again.
        fixture.api.downloads.lock().remove("1");
        assert_eq!(fixture.manager.download(&songs[..1]), 1);
        fixture.manager.wait_idle().await;
        assert!(fixture.store.context().record(songs[0]).unwrap().is_cached());
    }

    #[tokio::test]
    async fn test_clear_cache_removes_everything_and_restarts() {
        let (fixture, songs) = fixture(FakeApi::default(), &["1", "2"]);
        init_cache(&fixture).await;

        fixture.manager.download(&songs);
        fixture.manager.wait_idle().await;

        assert_eq!(fixture.manager.clear_cache().await.unwrap(), 2);
        let library = fixture.store.context();
        assert_eq!(library.cached_song_count(), 0);
        assert_eq!(library.cached_playable_size_in_bytes(), 0);
        assert_eq!(fixture.manager.cache().clear().await.unwrap(), 0);

        assert_eq!(fixture.manager.download(&songs), 2);
        fixture.manager.wait_idle().await;
    }

    #[tokio::test]
    async fn test_events_are_published() {
        let (fixture, songs) = fixture(FakeApi::default(), &["1"]);
        init_cache(&fixture).await;
        let mut events = fixture.manager.subscribe();

        fixture.manager.download(&songs);
        match events.recv().await.unwrap() {
            DownloadEvent::Finished { playable, file } => {
                assert_eq!(playable, songs[0]);
                assert_eq!(file.content_type.as_deref(), Some("audio/mpeg"));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }
}
