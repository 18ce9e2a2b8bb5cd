//! Library records owned by the entity store
//!
//! Records are plain data. Relationships between records are expressed with
//! [`Handle`]s, which are arena indices into the store rather than pointers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

/// Opaque reference to a record of type `T` inside the store
pub struct Handle<T> {
    raw: u64,
    _kind: PhantomData<fn() -> T>,
}

impl<T> Handle<T> {
    pub(crate) fn from_raw(raw: u64) -> Self {
        Self {
            raw,
            _kind: PhantomData,
        }
    }

    /// Arena index of the record
    pub fn raw(&self) -> u64 {
        self.raw
    }
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Handle<T> {}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl<T> Eq for Handle<T> {}

impl<T> Hash for Handle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.raw.hash(state);
    }
}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({})", self.raw)
    }
}

impl<T> Serialize for Handle<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(self.raw)
    }
}

impl<'de, T> Deserialize<'de> for Handle<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        u64::deserialize(deserializer).map(Self::from_raw)
    }
}

pub type PlayableId = Handle<PlayableRecord>;
pub type AlbumId = Handle<AlbumRecord>;
pub type ArtistId = Handle<ArtistRecord>;
pub type GenreId = Handle<GenreRecord>;
pub type PodcastId = Handle<PodcastRecord>;
pub type PlaylistId = Handle<PlaylistRecord>;
pub type SyncWaveId = Handle<SyncWaveRecord>;

/// Kind of a library entity, used to scope server ids
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    Song,
    PodcastEpisode,
    Album,
    Artist,
    Genre,
    Podcast,
    Playlist,
    SyncWave,
}

/// Common behaviour of every record kept by the store
pub trait Entity:
    Clone + Default + PartialEq + Serialize + for<'de> Deserialize<'de> + 'static
{
    fn kind(&self) -> EntityKind;

    /// Server assigned id, empty until the record has been synced
    fn server_id(&self) -> &str;

    fn set_server_id(&mut self, id: &str) -> bool;
}

/// Assign `value` to `slot` only when it differs. Returns whether anything changed.
pub fn assign<T: PartialEq>(slot: &mut T, value: T) -> bool {
    if *slot == value {
        false
    } else {
        *slot = value;
        true
    }
}

/// Reference to a blob in the cache directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedFile {
    /// File name relative to the cache directory
    pub file_name: String,
    pub size: u64,
    pub content_type: Option<String>,
}

/// Song or podcast episode specific data. The two are mutually exclusive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PlayableVariant {
    Song {
        album: Option<AlbumId>,
        artist: Option<ArtistId>,
        genre: Option<GenreId>,
    },
    PodcastEpisode {
        podcast: Option<PodcastId>,
        description: Option<String>,
    },
}

impl Default for PlayableVariant {
    fn default() -> Self {
        Self::Song {
            album: None,
            artist: None,
            genre: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayableRecord {
    pub id: String,
    pub title: Option<String>,
    pub is_favorite: bool,
    pub rating: u8,
    pub track: u32,
    pub year: u32,
    pub disk: Option<String>,
    /// Duration in seconds as reported by the server
    pub remote_duration: u32,
    /// Duration in seconds measured from the downloaded or streamed file
    pub play_duration: u32,
    pub play_progress: u32,
    pub size: u64,
    pub bitrate: u32,
    pub content_type: Option<String>,
    pub url: Option<String>,
    pub is_recently_added: bool,
    pub cached_file: Option<CachedFile>,
    pub sync_wave: Option<SyncWaveId>,
    pub variant: PlayableVariant,
}

impl PlayableRecord {
    pub fn duration(&self) -> u32 {
        if self.play_duration > 0 {
            self.play_duration
        } else {
            self.remote_duration
        }
    }

    pub fn is_cached(&self) -> bool {
        self.cached_file.is_some()
    }

    pub fn is_song(&self) -> bool {
        matches!(self.variant, PlayableVariant::Song { .. })
    }

    pub fn is_podcast_episode(&self) -> bool {
        matches!(self.variant, PlayableVariant::PodcastEpisode { .. })
    }

    pub fn album(&self) -> Option<AlbumId> {
        match self.variant {
            PlayableVariant::Song { album, .. } => album,
            PlayableVariant::PodcastEpisode { .. } => None,
        }
    }
}

impl Entity for PlayableRecord {
    fn kind(&self) -> EntityKind {
        match self.variant {
            PlayableVariant::Song { .. } => EntityKind::Song,
            PlayableVariant::PodcastEpisode { .. } => EntityKind::PodcastEpisode,
        }
    }

    fn server_id(&self) -> &str {
        &self.id
    }

    fn set_server_id(&mut self, id: &str) -> bool {
        assign(&mut self.id, id.to_string())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlbumRecord {
    pub id: String,
    pub name: Option<String>,
    pub is_favorite: bool,
    pub rating: u8,
    pub year: u32,
    /// Counter reported by the server; zero when unknown
    pub song_count: u32,
    pub artist: Option<ArtistId>,
    pub genre: Option<GenreId>,
    pub sync_wave: Option<SyncWaveId>,
    pub is_songs_meta_data_synced: bool,
}

impl Entity for AlbumRecord {
    fn kind(&self) -> EntityKind {
        EntityKind::Album
    }

    fn server_id(&self) -> &str {
        &self.id
    }

    fn set_server_id(&mut self, id: &str) -> bool {
        assign(&mut self.id, id.to_string())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtistRecord {
    pub id: String,
    pub name: Option<String>,
    pub is_favorite: bool,
    pub rating: u8,
    pub album_count: u32,
}

impl Entity for ArtistRecord {
    fn kind(&self) -> EntityKind {
        EntityKind::Artist
    }

    fn server_id(&self) -> &str {
        &self.id
    }

    fn set_server_id(&mut self, id: &str) -> bool {
        assign(&mut self.id, id.to_string())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenreRecord {
    pub id: String,
    pub name: Option<String>,
}

impl Entity for GenreRecord {
    fn kind(&self) -> EntityKind {
        EntityKind::Genre
    }

    fn server_id(&self) -> &str {
        &self.id
    }

    fn set_server_id(&mut self, id: &str) -> bool {
        assign(&mut self.id, id.to_string())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PodcastRecord {
    pub id: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub is_favorite: bool,
    pub rating: u8,
}

impl Entity for PodcastRecord {
    fn kind(&self) -> EntityKind {
        EntityKind::Podcast
    }

    fn server_id(&self) -> &str {
        &self.id
    }

    fn set_server_id(&mut self, id: &str) -> bool {
        assign(&mut self.id, id.to_string())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaylistRecord {
    pub id: String,
    pub name: String,
    pub is_favorite: bool,
    pub rating: u8,
    /// Item count from server metadata, not necessarily `items.len()`
    pub song_count: u32,
    pub items: Vec<PlayableId>,
}

impl Entity for PlaylistRecord {
    fn kind(&self) -> EntityKind {
        EntityKind::Playlist
    }

    fn server_id(&self) -> &str {
        &self.id
    }

    fn set_server_id(&mut self, id: &str) -> bool {
        assign(&mut self.id, id.to_string())
    }
}

/// Marks which synchronization pass populated a record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncWaveRecord {
    pub wave: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub is_done: bool,
}

impl Entity for SyncWaveRecord {
    fn kind(&self) -> EntityKind {
        EntityKind::SyncWave
    }

    // Waves are local bookkeeping and never carry a server id.
    fn server_id(&self) -> &str {
        ""
    }

    fn set_server_id(&mut self, _id: &str) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duration_prefers_local_measurement() {
        let mut song = PlayableRecord {
            remote_duration: 200,
            ..Default::default()
        };
        assert_eq!(song.duration(), 200);

        song.play_duration = 203;
        assert_eq!(song.duration(), 203);
    }

    #[test]
    fn test_assign_is_noop_for_equal_value() {
        let mut name = String::from("Mix");
        assert!(!assign(&mut name, "Mix".to_string()));
        assert!(assign(&mut name, "Road Trip".to_string()));
        assert_eq!(name, "Road Trip");
    }

    #[test]
    fn test_playable_kind_follows_variant() {
        let mut playable = PlayableRecord::default();
        assert_eq!(playable.kind(), EntityKind::Song);
        assert!(playable.is_song());

        playable.variant = PlayableVariant::PodcastEpisode {
            podcast: None,
            description: None,
        };
        assert_eq!(playable.kind(), EntityKind::PodcastEpisode);
        assert!(!playable.is_song());
        assert!(playable.album().is_none());
    }

    #[test]
    fn test_handle_serializes_as_integer() {
        let handle: AlbumId = Handle::from_raw(42);
        assert_eq!(serde_json::to_string(&handle).unwrap(), "42");
        let back: AlbumId = serde_json::from_str("42").unwrap();
        assert_eq!(back, handle);
    }
}
