use chrono::{DateTime, Utc};

use super::{Attributes, NotifiableParser, XmlHandler};

/// Session data and library counters returned by the handshake action
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HandshakeInfo {
    pub auth: String,
    pub api: String,
    pub session_expire: Option<DateTime<Utc>>,
    pub songs: u32,
    pub albums: u32,
    pub artists: u32,
    pub genres: u32,
    pub playlists: u32,
    pub podcasts: u32,
    pub podcast_episodes: u32,
}

pub struct HandshakeParser {
    base: NotifiableParser,
    info: HandshakeInfo,
}

impl Default for HandshakeParser {
    fn default() -> Self {
        Self::new()
    }
}

impl HandshakeParser {
    pub fn new() -> Self {
        Self {
            base: NotifiableParser::new(None),
            info: HandshakeInfo::default(),
        }
    }

    /// Parsed handshake, `None` when the document carried no auth token
    pub fn into_info(self) -> Option<HandshakeInfo> {
        (!self.info.auth.is_empty()).then_some(self.info)
    }
}

impl XmlHandler for HandshakeParser {
    fn start_element(&mut self, _name: &str, _attributes: &Attributes) {
        self.base.reset_buffer();
    }

    fn end_element(&mut self, name: &str) {
        let base = &mut self.base;
        let info = &mut self.info;
        match name {
            "auth" => info.auth = base.buffer().trim().to_string(),
            "api" => info.api = base.buffer().trim().to_string(),
            "session_expire" => {
                info.session_expire = DateTime::parse_from_rfc3339(base.buffer().trim())
                    .ok()
                    .map(|expire| expire.with_timezone(&Utc));
            }
            "songs" => info.songs = base.buffer_as(),
            "albums" => info.albums = base.buffer_as(),
            "artists" => info.artists = base.buffer_as(),
            "genres" => info.genres = base.buffer_as(),
            "playlists" => info.playlists = base.buffer_as(),
            "podcasts" => info.podcasts = base.buffer_as(),
            "podcast_episodes" => info.podcast_episodes = base.buffer_as(),
            _ => {}
        }
        base.reset_buffer();
    }

    fn characters(&mut self, text: &str) {
        self.base.push(text);
    }
}
