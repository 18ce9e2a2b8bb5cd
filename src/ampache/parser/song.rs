use std::sync::Arc;

use super::{
    Attributes, NotifiableParser, ParseIssue, ParsedObjectNotifiable, ParsedObjectType,
    XmlHandler,
};
use crate::library::store::Stored;
use crate::library::{
    AlbumId, ArtistId, EntityKind, GenreId, Handle, Library, PlayableId, PlayableRecord,
    PlayableVariant, SyncWaveId, assign,
};

/// Reference element nested inside a song whose text is the referenced name
#[derive(Debug, Clone, Copy)]
enum Nested {
    Album(AlbumId),
    Artist(ArtistId),
    AlbumArtist(ArtistId),
    Genre(GenreId),
}

/// Parses `<song id="…">` documents such as the `album_songs` response
pub struct SongParser<'a> {
    base: NotifiableParser,
    library: &'a mut Library,
    sync_wave: Option<SyncWaveId>,
    album: Option<AlbumId>,
    song: Option<PlayableId>,
    nested: Option<Nested>,
    album_artist: Option<ArtistId>,
    parsed_songs: Vec<PlayableId>,
}

fn fetch_or_create<R: Stored>(library: &mut Library, kind: EntityKind, id: &str) -> Handle<R> {
    if let Some(existing) = library.find(kind, id) {
        return existing;
    }
    let created = library.create::<R>();
    if let Some(record) = library.record_mut(created) {
        record.set_server_id(id);
    }
    created
}

impl<'a> SongParser<'a> {
    pub fn new(
        library: &'a mut Library,
        notifier: Option<Arc<dyn ParsedObjectNotifiable>>,
    ) -> Self {
        Self {
            base: NotifiableParser::new(notifier),
            library,
            sync_wave: None,
            album: None,
            song: None,
            nested: None,
            album_artist: None,
            parsed_songs: Vec::new(),
        }
    }

    /// Stamp every parsed song with `wave`
    pub fn with_sync_wave(mut self, wave: SyncWaveId) -> Self {
        self.sync_wave = Some(wave);
        self
    }

    /// Album the songs belong to when the document does not say
    pub fn with_album(mut self, album: AlbumId) -> Self {
        self.album = Some(album);
        self
    }

    pub fn issues(&self) -> &[ParseIssue] {
        self.base.issues()
    }

    pub fn parsed_count(&self) -> usize {
        self.base.parsed_count()
    }

    /// Songs closed so far, in document order
    pub fn parsed_songs(&self) -> &[PlayableId] {
        &self.parsed_songs
    }

    fn start_song(&mut self, attributes: &Attributes) {
        let id = attributes.get("id").map(String::as_str).unwrap_or_default();
        if id.is_empty() {
            self.base
                .report("song", "Song could not be parsed, id is missing or empty");
            self.song = None;
            return;
        }

        let song = fetch_or_create::<PlayableRecord>(self.library, EntityKind::Song, id);
        if let Some(record) = self.library.record_mut(song) {
            if let Some(wave) = self.sync_wave {
                assign(&mut record.sync_wave, Some(wave));
            }
            if let (Some(album), PlayableVariant::Song { album: slot, .. }) =
                (self.album, &mut record.variant)
            {
                if slot.is_none() {
                    *slot = Some(album);
                }
            }
        }
        self.song = Some(song);
        self.album_artist = None;
    }

    fn start_reference(&mut self, name: &str, attributes: &Attributes) {
        let Some(song) = self.song else {
            return;
        };
        let Some(id) = attributes.get("id").filter(|id| !id.is_empty()) else {
            return;
        };

        let nested = match name {
            "album" => Nested::Album(fetch_or_create(self.library, EntityKind::Album, id)),
            "artist" => Nested::Artist(fetch_or_create(self.library, EntityKind::Artist, id)),
            "albumartist" => {
                Nested::AlbumArtist(fetch_or_create(self.library, EntityKind::Artist, id))
            }
            "genre" => Nested::Genre(fetch_or_create(self.library, EntityKind::Genre, id)),
            _ => return,
        };

        let Some(record) = self.library.record_mut(song) else {
            return;
        };
        if let PlayableVariant::Song {
            album,
            artist,
            genre,
        } = &mut record.variant
        {
            match nested {
                Nested::Album(handle) => {
                    assign(album, Some(handle));
                }
                Nested::Artist(handle) => {
                    assign(artist, Some(handle));
                }
                Nested::Genre(handle) => {
                    assign(genre, Some(handle));
                }
                Nested::AlbumArtist(handle) => self.album_artist = Some(handle),
            }
        }
        self.nested = Some(nested);
    }

    fn end_reference(&mut self) {
        let Some(nested) = self.nested.take() else {
            return;
        };
        let name = self.base.buffer().trim();
        if name.is_empty() {
            return;
        }
        let name = Some(name.to_string());
        match nested {
            Nested::Album(handle) => {
                if let Some(record) = self.library.record_mut(handle) {
                    assign(&mut record.name, name);
                }
            }
            Nested::Artist(handle) | Nested::AlbumArtist(handle) => {
                if let Some(record) = self.library.record_mut(handle) {
                    assign(&mut record.name, name);
                }
            }
            Nested::Genre(handle) => {
                if let Some(record) = self.library.record_mut(handle) {
                    assign(&mut record.name, name);
                }
            }
        }
    }

    fn end_field(&mut self, song: PlayableId, name: &str) {
        let text = self.base.buffer().trim().to_string();
        let number: u32 = self.base.buffer_as();
        let Some(record) = self.library.record_mut(song) else {
            return;
        };
        let non_empty = || (!text.is_empty()).then(|| text.clone());

        match name {
            "title" => {
                assign(&mut record.title, non_empty());
            }
            "name" if record.title.is_none() => {
                assign(&mut record.title, non_empty());
            }
            "track" => {
                assign(&mut record.track, number);
            }
            "disk" => {
                assign(&mut record.disk, non_empty());
            }
            "year" => {
                assign(&mut record.year, number);
            }
            "time" => {
                assign(&mut record.remote_duration, number);
            }
            "size" => {
                assign(&mut record.size, self.base.buffer_as::<u64>());
            }
            "bitrate" => {
                assign(&mut record.bitrate, number);
            }
            "mime" => {
                assign(&mut record.content_type, non_empty());
            }
            "url" => {
                assign(&mut record.url, non_empty());
            }
            "rating" => {
                assign(&mut record.rating, number.min(5) as u8);
            }
            "flag" => {
                assign(&mut record.is_favorite, number != 0);
            }
            _ => {}
        }
    }

    fn end_song(&mut self) {
        let Some(song) = self.song.take() else {
            return;
        };

        // Albums without an artist adopt the album artist, else the song artist.
        let linked = self.library.record(song).and_then(|record| match record.variant {
            PlayableVariant::Song { album, artist, .. } => {
                Some((album?, self.album_artist.or(artist)?))
            }
            PlayableVariant::PodcastEpisode { .. } => None,
        });
        if let Some((album, artist)) = linked {
            if let Some(record) = self.library.record_mut(album) {
                if record.artist.is_none() {
                    record.artist = Some(artist);
                }
            }
        }

        self.album_artist = None;
        self.parsed_songs.push(song);
        self.base.notify(ParsedObjectType::Song);
    }
}

impl XmlHandler for SongParser<'_> {
    fn start_element(&mut self, name: &str, attributes: &Attributes) {
        self.base.reset_buffer();
        match name {
            "song" => self.start_song(attributes),
            "album" | "artist" | "albumartist" | "genre" => {
                self.start_reference(name, attributes)
            }
            _ => {}
        }
    }

    fn end_element(&mut self, name: &str) {
        match name {
            "song" => self.end_song(),
            "album" | "artist" | "albumartist" | "genre" => self.end_reference(),
            // Genres may carry their name in a child element.
            "name" if matches!(self.nested, Some(Nested::Genre(_))) => {
                let genre = self.nested;
                self.end_reference();
                self.nested = genre;
            }
            _ => {
                if let (Some(song), None) = (self.song, self.nested) {
                    self.end_field(song, name);
                }
            }
        }
        self.base.reset_buffer();
    }

    fn characters(&mut self, text: &str) {
        self.base.push(text);
    }
}
