use std::sync::Arc;
use tracing::error;

use super::{
    Attributes, NotifiableParser, ParseIssue, ParsedObjectNotifiable, ParsedObjectType,
    XmlHandler,
};
use crate::library::{Entity, Library, PlaylistId, assign};

/// Parses `<playlist id="…"><name/><items/></playlist>` documents
pub struct PlaylistParser<'a> {
    base: NotifiableParser,
    library: &'a mut Library,
    playlist: Option<PlaylistId>,
}

impl<'a> PlaylistParser<'a> {
    pub fn new(
        library: &'a mut Library,
        notifier: Option<Arc<dyn ParsedObjectNotifiable>>,
    ) -> Self {
        Self {
            base: NotifiableParser::new(notifier),
            library,
            playlist: None,
        }
    }

    pub fn issues(&self) -> &[ParseIssue] {
        self.base.issues()
    }

    pub fn parsed_count(&self) -> usize {
        self.base.parsed_count()
    }

    /// Playlist currently being filled, if any
    pub fn current(&self) -> Option<PlaylistId> {
        self.playlist
    }

    fn reset_playlist_in_case_of_error(&mut self) {
        if let Some(playlist) = self.playlist.take() {
            error!("Playlist has been removed on server, resetting local id");
            if let Some(record) = self.library.record_mut(playlist) {
                record.set_server_id("");
            }
        }
    }
}

impl XmlHandler for PlaylistParser<'_> {
    fn start_element(&mut self, name: &str, attributes: &Attributes) {
        self.base.reset_buffer();
        if name != "playlist" {
            return;
        }

        let Some(playlist_id) = attributes.get("id") else {
            self.base
                .report("playlist", "Playlist could not be parsed, id is not given");
            self.reset_playlist_in_case_of_error();
            return;
        };

        if let Some(open) = self.playlist {
            // Nested start tag from malformed output: the open playlist takes
            // the new id instead of opening a second one.
            if let Some(record) = self.library.record_mut(open) {
                record.set_server_id(playlist_id);
            }
        } else if !playlist_id.is_empty() {
            let playlist = match self.library.get_playlist(playlist_id) {
                Some(existing) => existing,
                None => {
                    let created = self.library.create_playlist();
                    if let Some(record) = self.library.record_mut(created) {
                        record.set_server_id(playlist_id);
                    }
                    created
                }
            };
            self.playlist = Some(playlist);
        } else {
            self.base
                .report("playlist", "Playlist could not be parsed, id is empty");
        }
    }

    fn end_element(&mut self, name: &str) {
        match name {
            "name" => {
                if let Some(record) = self.playlist.and_then(|p| self.library.record_mut(p)) {
                    assign(&mut record.name, self.base.buffer().to_string());
                }
            }
            "items" => {
                let count: u32 = self.base.buffer_as();
                if let Some(record) = self.playlist.and_then(|p| self.library.record_mut(p)) {
                    assign(&mut record.song_count, count);
                }
            }
            "playlist" => {
                self.playlist = None;
                self.base.notify(ParsedObjectType::Playlist);
            }
            _ => {}
        }
        self.base.reset_buffer();
    }

    fn characters(&mut self, text: &str) {
        self.base.push(text);
    }
}
