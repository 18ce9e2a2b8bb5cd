//! Persistent entity store with isolated transactional contexts
//!
//! The store keeps the committed library as an immutable snapshot. Every unit
//! of work opens a [`Library`] context that reads from the snapshot taken when
//! it was opened and stages its own edits. `save_context` merges the staged
//! edits back field by field, so two contexts that touched different fields of
//! the same record do not overwrite each other.

use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tracing::{debug, warn};

use super::entities::*;

const LIBRARY_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Failed to access library file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Library file is corrupt: {0}")]
    Corrupt(#[source] serde_json::Error),

    #[error("Failed to serialize library: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("Failed to merge {kind:?} record: {source}")]
    Merge {
        kind: EntityKind,
        #[source]
        source: serde_json::Error,
    },

    #[error("Unsupported library format version {0}")]
    UnsupportedVersion(u32),
}

pub type Result<T> = std::result::Result<T, StoreError>;

type IndexKey = (EntityKind, String);

fn index_key<R: Entity>(record: &R) -> Option<IndexKey> {
    let id = record.server_id();
    if id.is_empty() {
        None
    } else {
        Some((record.kind(), id.to_string()))
    }
}

/// Committed records of one type
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound = "R: Entity")]
pub(crate) struct Table<R> {
    records: BTreeMap<u64, R>,
    /// Handles of records that were folded into another record on merge
    #[serde(default)]
    aliases: BTreeMap<u64, u64>,
    #[serde(skip)]
    index: HashMap<IndexKey, u64>,
}

impl<R> Default for Table<R> {
    fn default() -> Self {
        Self {
            records: BTreeMap::new(),
            aliases: BTreeMap::new(),
            index: HashMap::new(),
        }
    }
}

impl<R: Entity> Table<R> {
    fn resolve(&self, mut raw: u64) -> u64 {
        while let Some(target) = self.aliases.get(&raw) {
            raw = *target;
        }
        raw
    }

    fn rebuild_index(&mut self) {
        self.index = self
            .records
            .iter()
            .filter_map(|(raw, record)| index_key(record).map(|key| (key, *raw)))
            .collect();
    }

    fn max_raw(&self) -> u64 {
        let records = self.records.keys().next_back().copied().unwrap_or(0);
        let aliases = self.aliases.keys().next_back().copied().unwrap_or(0);
        records.max(aliases)
    }

    fn insert_created(&mut self, raw: u64, created: &R) -> Result<()> {
        if let Some(key) = index_key(created) {
            if let Some(&existing) = self.index.get(&key) {
                debug!(
                    "Folding concurrently created {:?} {} into existing record",
                    key.0, key.1
                );
                self.aliases.insert(raw, existing);
                return self.apply(existing, &R::default(), created);
            }
            self.index.insert(key, raw);
        }
        self.records.insert(raw, created.clone());
        Ok(())
    }

    fn apply(&mut self, raw: u64, base: &R, current: &R) -> Result<()> {
        let Some(target) = self.records.get(&raw) else {
            debug!("Skipping edit of record {} removed by another context", raw);
            return Ok(());
        };
        let kind = current.kind();
        let to_value = |record: &R| {
            serde_json::to_value(record).map_err(|source| StoreError::Merge { kind, source })
        };

        let mut merged = to_value(target)?;
        merge_fields(&mut merged, &to_value(base)?, &to_value(current)?);
        let merged: R =
            serde_json::from_value(merged).map_err(|source| StoreError::Merge { kind, source })?;

        let old_key = index_key(target);
        let new_key = index_key(&merged);
        if old_key != new_key {
            if let Some(key) = old_key {
                if self.index.get(&key) == Some(&raw) {
                    self.index.remove(&key);
                }
            }
            if let Some(key) = new_key {
                if let Some(holder) = self.index.insert(key.clone(), raw) {
                    if holder != raw {
                        warn!(
                            "{:?} id {} moved to another record, resetting previous holder",
                            key.0, key.1
                        );
                        if let Some(previous) = self.records.get_mut(&holder) {
                            previous.set_server_id("");
                        }
                    }
                }
            }
        }

        self.records.insert(raw, merged);
        Ok(())
    }
}

/// Write every field that differs between `base` and `current` into `target`.
/// Objects are merged key by key; anything else is replaced as a whole.
fn merge_fields(target: &mut Value, base: &Value, current: &Value) {
    if let (Value::Object(target), Value::Object(base), Value::Object(current)) =
        (&mut *target, base, current)
    {
        for (key, value) in current {
            let Some(old) = base.get(key) else {
                target.insert(key.clone(), value.clone());
                continue;
            };
            if old == value {
                continue;
            }
            match target.get_mut(key) {
                Some(slot) => merge_fields(slot, old, value),
                None => {
                    target.insert(key.clone(), value.clone());
                }
            }
        }
        for key in base.keys() {
            if !current.contains_key(key) {
                target.remove(key);
            }
        }
        return;
    }
    *target = current.clone();
}

/// Complete committed library
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct LibraryData {
    version: u32,
    #[serde(default)]
    playables: Table<PlayableRecord>,
    #[serde(default)]
    albums: Table<AlbumRecord>,
    #[serde(default)]
    artists: Table<ArtistRecord>,
    #[serde(default)]
    genres: Table<GenreRecord>,
    #[serde(default)]
    podcasts: Table<PodcastRecord>,
    #[serde(default)]
    playlists: Table<PlaylistRecord>,
    #[serde(default)]
    sync_waves: Table<SyncWaveRecord>,
}

impl Default for LibraryData {
    fn default() -> Self {
        Self {
            version: LIBRARY_FORMAT_VERSION,
            playables: Table::default(),
            albums: Table::default(),
            artists: Table::default(),
            genres: Table::default(),
            podcasts: Table::default(),
            playlists: Table::default(),
            sync_waves: Table::default(),
        }
    }
}

impl LibraryData {
    fn rebuild_indexes(&mut self) {
        self.playables.rebuild_index();
        self.albums.rebuild_index();
        self.artists.rebuild_index();
        self.genres.rebuild_index();
        self.podcasts.rebuild_index();
        self.playlists.rebuild_index();
        self.sync_waves.rebuild_index();
    }

    fn max_raw(&self) -> u64 {
        [
            self.playables.max_raw(),
            self.albums.max_raw(),
            self.artists.max_raw(),
            self.genres.max_raw(),
            self.podcasts.max_raw(),
            self.playlists.max_raw(),
            self.sync_waves.max_raw(),
        ]
        .into_iter()
        .max()
        .unwrap_or(0)
    }

    fn merge(&mut self, changes: &Changes) -> Result<()> {
        merge_overlay(&mut self.playables, &changes.playables)?;
        merge_overlay(&mut self.albums, &changes.albums)?;
        merge_overlay(&mut self.artists, &changes.artists)?;
        merge_overlay(&mut self.genres, &changes.genres)?;
        merge_overlay(&mut self.podcasts, &changes.podcasts)?;
        merge_overlay(&mut self.playlists, &changes.playlists)?;
        merge_overlay(&mut self.sync_waves, &changes.sync_waves)?;
        Ok(())
    }
}

fn merge_overlay<R: Entity>(table: &mut Table<R>, overlay: &Overlay<R>) -> Result<()> {
    for (raw, staged) in &overlay.entries {
        match &staged.base {
            None => table.insert_created(*raw, &staged.current)?,
            Some(base) if *base == staged.current => {}
            Some(base) => table.apply(*raw, base, &staged.current)?,
        }
    }
    Ok(())
}

/// A record as seen by one context: its committed state and the staged edit
#[derive(Debug, Clone)]
struct Staged<R> {
    /// `None` when the record was created in this context
    base: Option<R>,
    current: R,
}

#[derive(Debug, Clone)]
pub(crate) struct Overlay<R> {
    entries: BTreeMap<u64, Staged<R>>,
}

impl<R> Default for Overlay<R> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub(crate) struct Changes {
    playables: Overlay<PlayableRecord>,
    albums: Overlay<AlbumRecord>,
    artists: Overlay<ArtistRecord>,
    genres: Overlay<GenreRecord>,
    podcasts: Overlay<PodcastRecord>,
    playlists: Overlay<PlaylistRecord>,
    sync_waves: Overlay<SyncWaveRecord>,
}

impl Changes {
    fn is_empty(&self) -> bool {
        fn pending<R: PartialEq>(overlay: &Overlay<R>) -> bool {
            overlay
                .entries
                .values()
                .any(|staged| staged.base.as_ref() != Some(&staged.current))
        }
        !(pending(&self.playables)
            || pending(&self.albums)
            || pending(&self.artists)
            || pending(&self.genres)
            || pending(&self.podcasts)
            || pending(&self.playlists)
            || pending(&self.sync_waves))
    }
}

/// Records the store can hold, with access to their table and overlay
pub(crate) trait Stored: Entity {
    fn table(data: &LibraryData) -> &Table<Self>;
    fn overlay(changes: &Changes) -> &Overlay<Self>;
    fn overlay_mut(changes: &mut Changes) -> &mut Overlay<Self>;
}

macro_rules! stored {
    ($record:ty, $field:ident) => {
        impl Stored for $record {
            fn table(data: &LibraryData) -> &Table<Self> {
                &data.$field
            }

            fn overlay(changes: &Changes) -> &Overlay<Self> {
                &changes.$field
            }

            fn overlay_mut(changes: &mut Changes) -> &mut Overlay<Self> {
                &mut changes.$field
            }
        }
    };
}

stored!(PlayableRecord, playables);
stored!(AlbumRecord, albums);
stored!(ArtistRecord, artists);
stored!(GenreRecord, genres);
stored!(PodcastRecord, podcasts);
stored!(PlaylistRecord, playlists);
stored!(SyncWaveRecord, sync_waves);

struct StoreInner {
    path: Option<PathBuf>,
    data: RwLock<Arc<LibraryData>>,
    next_raw: AtomicU64,
}

/// Shared handle to the persistent library
#[derive(Clone)]
pub struct LibraryStore {
    inner: Arc<StoreInner>,
}

impl LibraryStore {
    /// Open the library stored at `path`, starting empty when the file does not exist
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let data = if path.exists() {
            let content = std::fs::read(&path).map_err(|source| StoreError::Io {
                path: path.clone(),
                source,
            })?;
            let mut data: LibraryData =
                serde_json::from_slice(&content).map_err(StoreError::Corrupt)?;
            if data.version > LIBRARY_FORMAT_VERSION {
                return Err(StoreError::UnsupportedVersion(data.version));
            }
            data.rebuild_indexes();
            debug!(
                "Loaded library from {}: {} playables, {} albums, {} playlists",
                path.display(),
                data.playables.records.len(),
                data.albums.records.len(),
                data.playlists.records.len()
            );
            data
        } else {
            debug!("No library found at {}, starting empty", path.display());
            LibraryData::default()
        };

        Ok(Self::with_data(Some(path), data))
    }

    /// Library that lives only in memory
    pub fn in_memory() -> Self {
        Self::with_data(None, LibraryData::default())
    }

    fn with_data(path: Option<PathBuf>, data: LibraryData) -> Self {
        let next_raw = data.max_raw() + 1;
        Self {
            inner: Arc::new(StoreInner {
                path,
                data: RwLock::new(Arc::new(data)),
                next_raw: AtomicU64::new(next_raw),
            }),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.inner.path.as_deref()
    }

    /// Open a new transactional context over the current committed state
    pub fn context(&self) -> Library {
        Library {
            store: self.clone(),
            snapshot: self.inner.data.read().clone(),
            changes: Changes::default(),
        }
    }

    fn allocate(&self) -> u64 {
        self.inner.next_raw.fetch_add(1, Ordering::Relaxed)
    }

    fn commit(&self, changes: &Changes) -> Result<Arc<LibraryData>> {
        let mut guard = self.inner.data.write();
        let mut data = LibraryData::clone(&guard);
        data.merge(changes)?;

        if let Some(path) = &self.inner.path {
            persist(path, &data)?;
        }

        let data = Arc::new(data);
        *guard = data.clone();
        Ok(data)
    }
}

fn persist(path: &Path, data: &LibraryData) -> Result<()> {
    let io_error = |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(io_error)?;
    }

    let content = serde_json::to_vec(data).map_err(StoreError::Serialize)?;
    let temp_path = path.with_extension("json.tmp");
    std::fs::write(&temp_path, content).map_err(io_error)?;
    std::fs::rename(&temp_path, path).map_err(io_error)?;

    debug!("Saved library to {}", path.display());
    Ok(())
}

/// Transactional view of the library used by one unit of work
pub struct Library {
    store: LibraryStore,
    snapshot: Arc<LibraryData>,
    changes: Changes,
}

impl Library {
    /// Resolve a handle that may have been folded into another record
    pub(crate) fn resolve<R: Stored>(&self, handle: Handle<R>) -> Handle<R> {
        Handle::from_raw(R::table(&self.snapshot).resolve(handle.raw()))
    }

    pub(crate) fn record<R: Stored>(&self, handle: Handle<R>) -> Option<&R> {
        let raw = self.resolve(handle).raw();
        match R::overlay(&self.changes).entries.get(&raw) {
            Some(staged) => Some(&staged.current),
            None => R::table(&self.snapshot).records.get(&raw),
        }
    }

    /// Stage a record for editing. Unchanged fields are not written back on save.
    pub(crate) fn record_mut<R: Stored>(&mut self, handle: Handle<R>) -> Option<&mut R> {
        let raw = self.resolve(handle).raw();
        let committed = R::table(&self.snapshot).records.get(&raw);
        let entries = &mut R::overlay_mut(&mut self.changes).entries;
        if !entries.contains_key(&raw) {
            let record = committed?.clone();
            entries.insert(
                raw,
                Staged {
                    base: Some(record.clone()),
                    current: record,
                },
            );
        }
        entries.get_mut(&raw).map(|staged| &mut staged.current)
    }

    pub(crate) fn create<R: Stored>(&mut self) -> Handle<R> {
        let raw = self.store.allocate();
        R::overlay_mut(&mut self.changes).entries.insert(
            raw,
            Staged {
                base: None,
                current: R::default(),
            },
        );
        Handle::from_raw(raw)
    }

    /// Look up a record by kind and server id. Empty ids never match.
    pub(crate) fn find<R: Stored>(&self, kind: EntityKind, id: &str) -> Option<Handle<R>> {
        if id.is_empty() {
            return None;
        }
        let overlay = R::overlay(&self.changes);
        let staged = overlay.entries.iter().find_map(|(raw, staged)| {
            let record = &staged.current;
            (record.kind() == kind && record.server_id() == id).then_some(*raw)
        });
        let raw = staged.or_else(|| {
            R::table(&self.snapshot)
                .index
                .get(&(kind, id.to_string()))
                .copied()
                .filter(|raw| !overlay.entries.contains_key(raw))
        })?;
        Some(Handle::from_raw(raw))
    }

    /// Every live record of one type, committed ones first
    pub(crate) fn iter<R: Stored>(&self) -> impl Iterator<Item = (Handle<R>, &R)> + '_ {
        let overlay = R::overlay(&self.changes);
        let committed = R::table(&self.snapshot)
            .records
            .iter()
            .filter(move |(raw, _)| !overlay.entries.contains_key(*raw))
            .map(|(raw, record)| (Handle::from_raw(*raw), record));
        let staged = overlay
            .entries
            .iter()
            .map(|(raw, staged)| (Handle::from_raw(*raw), &staged.current));
        committed.chain(staged)
    }

    pub fn has_changes(&self) -> bool {
        !self.changes.is_empty()
    }

    /// Commit staged edits. Once this returns they survive a restart.
    pub fn save_context(&mut self) -> Result<()> {
        if !self.has_changes() {
            // Pick up whatever other contexts committed in the meantime.
            self.rollback();
            return Ok(());
        }
        self.snapshot = self.store.commit(&self.changes)?;
        self.changes = Changes::default();
        Ok(())
    }

    /// Drop staged edits and refresh the snapshot
    pub fn rollback(&mut self) {
        self.changes = Changes::default();
        self.snapshot = self.store.inner.data.read().clone();
    }

    pub fn get_playlist(&self, id: &str) -> Option<PlaylistId> {
        self.find(EntityKind::Playlist, id)
    }

    pub fn create_playlist(&mut self) -> PlaylistId {
        self.create()
    }

    pub fn get_album(&self, id: &str) -> Option<AlbumId> {
        self.find(EntityKind::Album, id)
    }

    pub fn create_album(&mut self) -> AlbumId {
        self.create()
    }

    pub fn get_artist(&self, id: &str) -> Option<ArtistId> {
        self.find(EntityKind::Artist, id)
    }

    pub fn create_artist(&mut self) -> ArtistId {
        self.create()
    }

    pub fn get_genre(&self, id: &str) -> Option<GenreId> {
        self.find(EntityKind::Genre, id)
    }

    pub fn create_genre(&mut self) -> GenreId {
        self.create()
    }

    pub fn get_podcast(&self, id: &str) -> Option<PodcastId> {
        self.find(EntityKind::Podcast, id)
    }

    pub fn create_podcast(&mut self) -> PodcastId {
        self.create()
    }

    pub fn get_song(&self, id: &str) -> Option<PlayableId> {
        self.find(EntityKind::Song, id)
    }

    pub fn create_song(&mut self) -> PlayableId {
        self.create()
    }

    pub fn get_podcast_episode(&self, id: &str) -> Option<PlayableId> {
        self.find(EntityKind::PodcastEpisode, id)
    }

    pub fn create_podcast_episode(&mut self) -> PlayableId {
        let handle = self.create::<PlayableRecord>();
        if let Some(record) = self.record_mut(handle) {
            record.variant = PlayableVariant::PodcastEpisode {
                podcast: None,
                description: None,
            };
        }
        handle
    }

    pub fn create_sync_wave(&mut self) -> SyncWaveId {
        let wave = self
            .iter::<SyncWaveRecord>()
            .map(|(_, record)| record.wave)
            .max()
            .unwrap_or(0)
            + 1;
        let handle = self.create::<SyncWaveRecord>();
        if let Some(record) = self.record_mut(handle) {
            record.wave = wave;
            record.started_at = Some(Utc::now());
        }
        handle
    }

    pub fn latest_sync_wave(&self) -> Option<SyncWaveId> {
        self.iter::<SyncWaveRecord>()
            .max_by_key(|(_, record)| record.wave)
            .map(|(handle, _)| handle)
    }

    pub fn playlist_count(&self) -> usize {
        self.iter::<PlaylistRecord>().count()
    }

    pub fn artist_count(&self) -> usize {
        self.iter::<ArtistRecord>().count()
    }

    pub fn album_count(&self) -> usize {
        self.iter::<AlbumRecord>().count()
    }

    pub fn genre_count(&self) -> usize {
        self.iter::<GenreRecord>().count()
    }

    pub fn podcast_count(&self) -> usize {
        self.iter::<PodcastRecord>().count()
    }

    pub fn song_count(&self) -> usize {
        self.playables().filter(|p| p.is_song()).count()
    }

    pub fn podcast_episode_count(&self) -> usize {
        self.playables().filter(|p| p.is_podcast_episode()).count()
    }

    pub fn album_with_synced_songs_count(&self) -> usize {
        self.iter::<AlbumRecord>()
            .filter(|(_, album)| album.is_songs_meta_data_synced)
            .count()
    }

    pub fn cached_song_count(&self) -> usize {
        self.playables()
            .filter(|p| p.is_song() && p.is_cached())
            .count()
    }

    pub fn cached_podcast_episode_count(&self) -> usize {
        self.playables()
            .filter(|p| p.is_podcast_episode() && p.is_cached())
            .count()
    }

    pub fn cached_playable_size_in_bytes(&self) -> u64 {
        self.playables()
            .filter_map(|p| p.cached_file.as_ref())
            .map(|file| file.size)
            .sum()
    }

    fn playables(&self) -> impl Iterator<Item = &PlayableRecord> + '_ {
        self.iter::<PlayableRecord>().map(|(_, record)| record)
    }

    /// Songs that are not cached yet
    pub fn songs_for_complete_library_download(&self) -> Vec<PlayableId> {
        self.iter::<PlayableRecord>()
            .filter(|(_, p)| p.is_song() && !p.is_cached())
            .map(|(handle, _)| handle)
            .collect()
    }

    /// Clear the cached-file reference of the given playables.
    /// Returns the references that were cleared so the blobs can be removed.
    pub fn delete_cache(&mut self, playables: &[PlayableId]) -> Vec<CachedFile> {
        playables
            .iter()
            .filter_map(|handle| self.record_mut(*handle)?.cached_file.take())
            .collect()
    }

    /// Clear the cached-file reference of every playable
    pub fn delete_complete_song_cache(&mut self) -> Vec<CachedFile> {
        let cached: Vec<PlayableId> = self
            .iter::<PlayableRecord>()
            .filter(|(_, p)| p.is_cached())
            .map(|(handle, _)| handle)
            .collect();
        self.delete_cache(&cached)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_and_lookup_by_id() {
        let store = LibraryStore::in_memory();
        let mut library = store.context();

        let playlist = library.create_playlist();
        assert!(library.get_playlist("").is_none());

        library.record_mut(playlist).unwrap().set_server_id("17");
        assert_eq!(library.get_playlist("17"), Some(playlist));
        assert!(library.get_album("17").is_none());
    }

    #[test]
    fn test_unsaved_records_are_invisible_to_other_contexts() {
        let store = LibraryStore::in_memory();
        let mut writer = store.context();
        let playlist = writer.create_playlist();
        writer.record_mut(playlist).unwrap().set_server_id("1");

        assert!(store.context().get_playlist("1").is_none());

        writer.save_context().unwrap();
        assert_eq!(store.context().get_playlist("1"), Some(playlist));
    }

    #[test]
    fn test_concurrent_contexts_merge_disjoint_fields() {
        let store = LibraryStore::in_memory();
        let mut setup = store.context();
        let album = setup.create_album();
        {
            let record = setup.record_mut(album).unwrap();
            record.set_server_id("a1");
            record.name = Some("Blue".to_string());
        }
        setup.save_context().unwrap();

        let mut first = store.context();
        let mut second = store.context();
        first.record_mut(album).unwrap().is_favorite = true;
        second.record_mut(album).unwrap().song_count = 9;

        first.save_context().unwrap();
        second.save_context().unwrap();

        let library = store.context();
        let record = library.record(album).unwrap();
        assert!(record.is_favorite);
        assert_eq!(record.song_count, 9);
        assert_eq!(record.name.as_deref(), Some("Blue"));
    }

    #[test]
    fn test_concurrent_creation_of_same_id_is_folded() {
        let store = LibraryStore::in_memory();
        let mut first = store.context();
        let mut second = store.context();

        let a = first.create_album();
        first.record_mut(a).unwrap().set_server_id("7");
        let b = second.create_album();
        {
            let record = second.record_mut(b).unwrap();
            record.set_server_id("7");
            record.year = 1999;
        }

        first.save_context().unwrap();
        second.save_context().unwrap();

        let library = store.context();
        assert_eq!(library.album_count(), 1);
        assert_eq!(library.get_album("7"), Some(a));
        // The folded handle still resolves to the surviving record.
        assert_eq!(library.record(b).unwrap().year, 1999);
        assert_eq!(library.resolve(b), a);
    }

    #[test]
    fn test_reassigned_id_resets_previous_holder() {
        let store = LibraryStore::in_memory();
        let mut library = store.context();
        let first = library.create_playlist();
        let second = library.create_playlist();
        library.record_mut(first).unwrap().set_server_id("1");
        library.record_mut(second).unwrap().set_server_id("2");
        library.save_context().unwrap();

        library.record_mut(second).unwrap().set_server_id("1");
        library.save_context().unwrap();

        let library = store.context();
        assert_eq!(library.get_playlist("1"), Some(second));
        assert_eq!(library.record(first).unwrap().id, "");
    }

    #[test]
    fn test_counters() {
        let store = LibraryStore::in_memory();
        let mut library = store.context();
        let song = library.create_song();
        let episode = library.create_podcast_episode();
        library.record_mut(song).unwrap().cached_file = Some(CachedFile {
            file_name: "1.mp3".to_string(),
            size: 1000,
            content_type: None,
        });
        library.record_mut(episode).unwrap().cached_file = Some(CachedFile {
            file_name: "2.mp3".to_string(),
            size: 500,
            content_type: None,
        });

        assert_eq!(library.song_count(), 1);
        assert_eq!(library.podcast_episode_count(), 1);
        assert_eq!(library.cached_song_count(), 1);
        assert_eq!(library.cached_podcast_episode_count(), 1);
        assert_eq!(library.cached_playable_size_in_bytes(), 1500);

        library.save_context().unwrap();
        let other = store.context();
        assert_eq!(other.podcast_episode_count(), 1);
        assert_eq!(other.cached_playable_size_in_bytes(), 1500);
    }

    #[test]
    fn test_delete_complete_song_cache() {
        let store = LibraryStore::in_memory();
        let mut library = store.context();
        let cached = library.create_song();
        let uncached = library.create_song();
        library.record_mut(cached).unwrap().cached_file = Some(CachedFile {
            file_name: "3.flac".to_string(),
            size: 10,
            content_type: Some("audio/flac".to_string()),
        });

        assert_eq!(library.songs_for_complete_library_download(), vec![uncached]);

        let removed = library.delete_complete_song_cache();
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].file_name, "3.flac");
        assert_eq!(library.cached_song_count(), 0);
    }

    #[test]
    fn test_persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("library.json");

        let playlist = {
            let store = LibraryStore::open(&path).unwrap();
            let mut library = store.context();
            let playlist = library.create_playlist();
            let record = library.record_mut(playlist).unwrap();
            record.set_server_id("42");
            record.name = "Road Trip".to_string();
            library.save_context().unwrap();
            playlist
        };

        let store = LibraryStore::open(&path).unwrap();
        let mut library = store.context();
        assert_eq!(library.get_playlist("42"), Some(playlist));
        assert_eq!(library.record(playlist).unwrap().name, "Road Trip");

        // New handles never collide with persisted ones.
        let other = library.create_playlist();
        assert_ne!(other, playlist);
    }

    #[test]
    fn test_sync_waves_are_numbered() {
        let store = LibraryStore::in_memory();
        let mut library = store.context();
        assert!(library.latest_sync_wave().is_none());

        library.create_sync_wave();
        let second = library.create_sync_wave();
        assert_eq!(library.latest_sync_wave(), Some(second));
        assert_eq!(library.record(second).unwrap().wave, 2);
    }

    #[test]
    fn test_merge_fields_replaces_changed_variant() {
        let mut target = serde_json::json!({"a": 1, "v": {"Song": {"x": 1}}});
        let base = serde_json::json!({"a": 1, "v": {"Song": {"x": 1}}});
        let current = serde_json::json!({"a": 1, "v": {"Episode": {"y": 2}}});
        merge_fields(&mut target, &base, &current);
        assert_eq!(target, current);
    }
}
