//! Read-only projections over store records
//!
//! Views are built on demand from a [`Library`] context and never own the
//! record they show. Two views are equal when they point at the same record.

use std::hash::{Hash, Hasher};

use super::entities::*;
use super::store::Library;
use crate::utils::format_duration;

/// Identifier used by the server for albums whose artist could not be resolved
pub const ORPHANED_ALBUM_NAME: &str = "Unknown (Orphaned)";

const UNKNOWN_ALBUM: &str = "Unknown Album";
const UNKNOWN_TITLE: &str = "Unknown Title";
const UNKNOWN_CREATOR: &str = "Unknown";

/// How much detail `info_details` should produce
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetailType {
    Short,
    Long,
}

macro_rules! view_identity {
    ($view:ident) => {
        impl PartialEq for $view<'_> {
            fn eq(&self, other: &Self) -> bool {
                self.handle == other.handle
            }
        }

        impl Eq for $view<'_> {}

        impl Hash for $view<'_> {
            fn hash<H: Hasher>(&self, state: &mut H) {
                self.handle.hash(state);
            }
        }
    };
}

pub struct Album<'a> {
    library: &'a Library,
    handle: AlbumId,
    record: &'a AlbumRecord,
}

view_identity!(Album);

impl<'a> Album<'a> {
    pub fn handle(&self) -> AlbumId {
        self.handle
    }

    pub fn id(&self) -> &'a str {
        &self.record.id
    }

    pub fn name(&self) -> &'a str {
        self.record.name.as_deref().unwrap_or(UNKNOWN_ALBUM)
    }

    /// Human visible identifier of the album
    pub fn identifier(&self) -> &'a str {
        self.name()
    }

    pub fn year(&self) -> u32 {
        self.record.year
    }

    pub fn is_favorite(&self) -> bool {
        self.record.is_favorite
    }

    pub fn rating(&self) -> u8 {
        self.record.rating
    }

    pub fn artist(&self) -> Option<&'a ArtistRecord> {
        self.library.record(self.record.artist?)
    }

    pub fn genre(&self) -> Option<&'a GenreRecord> {
        self.library.record(self.record.genre?)
    }

    pub fn sync_wave(&self) -> Option<&'a SyncWaveRecord> {
        self.library.record(self.record.sync_wave?)
    }

    pub fn is_songs_meta_data_synced(&self) -> bool {
        self.record.is_songs_meta_data_synced
    }

    pub fn is_orphaned(&self) -> bool {
        self.identifier() == ORPHANED_ALBUM_NAME
    }

    /// Server counter when known, otherwise the number of songs stored locally
    pub fn song_count(&self) -> usize {
        if self.record.song_count != 0 {
            self.record.song_count as usize
        } else {
            self.songs().len()
        }
    }

    /// Songs of this album ordered by track number
    pub fn songs(&self) -> Vec<Playable<'a>> {
        let library = self.library;
        let mut songs: Vec<Playable<'a>> = library
            .iter::<PlayableRecord>()
            .filter(|(_, record)| {
                record
                    .album()
                    .is_some_and(|album| library.resolve(album) == self.handle)
            })
            .map(|(handle, record)| Playable {
                library,
                handle,
                record,
            })
            .collect();
        songs.sort_by_key(|song| song.track());
        songs
    }

    pub fn duration(&self) -> u32 {
        self.songs().iter().map(|song| song.duration()).sum()
    }

    pub fn has_cached_songs(&self) -> bool {
        self.songs().iter().any(|song| song.is_cached())
    }

    /// Summary lines describing the album
    pub fn info_details(&self, detail: DetailType) -> Vec<String> {
        let mut details = Vec::new();
        let local_songs = self.songs().len();
        let count = if local_songs > 0 {
            local_songs
        } else {
            self.song_count()
        };
        match count {
            0 => {}
            1 => details.push("1 Song".to_string()),
            n => details.push(format!("{} Songs", n)),
        }

        if detail == DetailType::Long {
            if self.year() > 0 {
                details.push(format!("Year {}", self.year()));
            }
            if let Some(genre) = self.genre().and_then(|g| g.name.as_deref()) {
                details.push(format!("Genre: {}", genre));
            }
            let duration = self.duration();
            if duration > 0 {
                details.push(format_duration(duration));
            }
        }
        details
    }
}

pub struct Playable<'a> {
    library: &'a Library,
    handle: PlayableId,
    record: &'a PlayableRecord,
}

view_identity!(Playable);

impl<'a> Playable<'a> {
    pub fn handle(&self) -> PlayableId {
        self.handle
    }

    pub fn record(&self) -> &'a PlayableRecord {
        self.record
    }

    pub fn id(&self) -> &'a str {
        &self.record.id
    }

    pub fn title(&self) -> &'a str {
        self.record.title.as_deref().unwrap_or(UNKNOWN_TITLE)
    }

    pub fn track(&self) -> u32 {
        self.record.track
    }

    pub fn duration(&self) -> u32 {
        self.record.duration()
    }

    pub fn is_cached(&self) -> bool {
        self.record.is_cached()
    }

    pub fn is_song(&self) -> bool {
        self.record.is_song()
    }

    pub fn is_podcast_episode(&self) -> bool {
        self.record.is_podcast_episode()
    }

    pub fn album(&self) -> Option<Album<'a>> {
        self.library.album(self.record.album()?)
    }

    /// Artist for songs, podcast title for episodes
    pub fn creator_name(&self) -> &'a str {
        let name = match &self.record.variant {
            PlayableVariant::Song { artist, .. } => artist
                .and_then(|artist| self.library.record(artist))
                .and_then(|artist| artist.name.as_deref()),
            PlayableVariant::PodcastEpisode { podcast, .. } => podcast
                .and_then(|podcast| self.library.record(podcast))
                .and_then(|podcast| podcast.title.as_deref()),
        };
        name.unwrap_or(UNKNOWN_CREATOR)
    }

    pub fn display_string(&self) -> String {
        format!("{} - {}", self.creator_name(), self.title())
    }

    pub fn is_playable(&self) -> bool {
        self.record.content_type.as_deref() != Some("audio/x-ms-wma")
    }

    /// Content type with non-standard aliases normalised
    pub fn compatible_content_type(&self) -> Option<&'a str> {
        if !self.is_playable() {
            return None;
        }
        match self.record.content_type.as_deref()? {
            "audio/x-flac" => Some("audio/flac"),
            other => Some(other),
        }
    }
}

pub struct Playlist<'a> {
    library: &'a Library,
    handle: PlaylistId,
    record: &'a PlaylistRecord,
}

view_identity!(Playlist);

impl<'a> Playlist<'a> {
    pub fn handle(&self) -> PlaylistId {
        self.handle
    }

    pub fn id(&self) -> &'a str {
        &self.record.id
    }

    pub fn name(&self) -> &'a str {
        &self.record.name
    }

    pub fn song_count(&self) -> u32 {
        self.record.song_count
    }

    pub fn items(&self) -> Vec<Playable<'a>> {
        self.record
            .items
            .iter()
            .filter_map(|handle| self.library.playable(*handle))
            .collect()
    }
}

impl Library {
    pub fn album(&self, handle: AlbumId) -> Option<Album<'_>> {
        let handle = self.resolve(handle);
        Some(Album {
            library: self,
            handle,
            record: self.record(handle)?,
        })
    }

    pub fn playable(&self, handle: PlayableId) -> Option<Playable<'_>> {
        let handle = self.resolve(handle);
        Some(Playable {
            library: self,
            handle,
            record: self.record(handle)?,
        })
    }

    pub fn playlist(&self, handle: PlaylistId) -> Option<Playlist<'_>> {
        let handle = self.resolve(handle);
        Some(Playlist {
            library: self,
            handle,
            record: self.record(handle)?,
        })
    }

    /// Every playlist, ordered by name
    pub fn playlists(&self) -> Vec<Playlist<'_>> {
        let mut playlists: Vec<Playlist<'_>> = self
            .iter::<PlaylistRecord>()
            .map(|(handle, record)| Playlist {
                library: self,
                handle,
                record,
            })
            .collect();
        playlists.sort_by(|a, b| a.name().cmp(b.name()));
        playlists
    }
}
