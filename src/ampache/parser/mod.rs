//! Streaming XML parsers for Ampache responses
//!
//! A document is fed event by event into an [`XmlHandler`]. Entity parsers
//! follow one pattern: open an entity on its start tag (reusing the stored
//! record with the same server id or creating one), fill fields on nested end
//! tags, then close it and notify on the closing tag. Malformed entities are
//! reported and skipped; the rest of the document is still parsed.

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use std::borrow::Cow;
use std::collections::HashMap;
use std::io::BufRead;
use std::sync::Arc;
use thiserror::Error;
use tracing::error;

mod handshake;
mod playlist;
mod response;
mod song;

pub use handshake::{HandshakeInfo, HandshakeParser};
pub use playlist::PlaylistParser;
pub use response::{ErrorParser, ServerFault};
pub use song::SongParser;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Malformed XML at byte {position}: {source}")]
    Xml {
        position: u64,
        #[source]
        source: quick_xml::Error,
    },

    #[error("Malformed XML attribute: {0}")]
    Attribute(#[from] quick_xml::events::attributes::AttrError),

    #[error("Invalid escape sequence: {0}")]
    Escape(#[source] quick_xml::Error),
}

/// Kind of object a parser finished
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParsedObjectType {
    Song,
    PodcastEpisode,
    Album,
    Artist,
    Genre,
    Podcast,
    Playlist,
}

/// Receives one notification per closed top-level entity
pub trait ParsedObjectNotifiable: Send + Sync {
    fn notify_parsed_object(&self, object_type: ParsedObjectType);
}

pub type Attributes = HashMap<String, String>;

/// Event sink for [`parse_document`]
pub trait XmlHandler {
    fn start_element(&mut self, name: &str, attributes: &Attributes);
    fn end_element(&mut self, name: &str);
    fn characters(&mut self, text: &str);
}

/// Recoverable problem met while parsing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseIssue {
    pub element: String,
    pub message: String,
}

/// Character buffer, notification sink and issue log shared by all parsers
pub struct NotifiableParser {
    buffer: String,
    notifier: Option<Arc<dyn ParsedObjectNotifiable>>,
    issues: Vec<ParseIssue>,
    parsed: usize,
}

impl NotifiableParser {
    pub fn new(notifier: Option<Arc<dyn ParsedObjectNotifiable>>) -> Self {
        Self {
            buffer: String::new(),
            notifier,
            issues: Vec::new(),
            parsed: 0,
        }
    }

    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    pub fn push(&mut self, text: &str) {
        self.buffer.push_str(text);
    }

    pub fn reset_buffer(&mut self) {
        self.buffer.clear();
    }

    /// Buffer parsed as an integer; anything unparsable counts as zero
    pub fn buffer_as<T: std::str::FromStr + Default>(&self) -> T {
        self.buffer.trim().parse().unwrap_or_default()
    }

    pub fn notify(&mut self, object_type: ParsedObjectType) {
        self.parsed += 1;
        if let Some(notifier) = &self.notifier {
            notifier.notify_parsed_object(object_type);
        }
    }

    pub fn report(&mut self, element: &str, message: &str) {
        error!(element, "{}", message);
        self.issues.push(ParseIssue {
            element: element.to_string(),
            message: message.to_string(),
        });
    }

    pub fn issues(&self) -> &[ParseIssue] {
        &self.issues
    }

    /// Number of notifications emitted so far
    pub fn parsed_count(&self) -> usize {
        self.parsed
    }
}

/// Feed every event of the document into `handler`
pub fn parse_document<R, H>(source: R, handler: &mut H) -> Result<(), ParseError>
where
    R: BufRead,
    H: XmlHandler + ?Sized,
{
    let mut reader = Reader::from_reader(source);
    let mut buf = Vec::new();

    loop {
        let position = reader.buffer_position() as u64;
        let event = reader
            .read_event_into(&mut buf)
            .map_err(|source| ParseError::Xml { position, source })?;

        match event {
            Event::Start(element) => {
                let local_name = element.local_name();
                let name = element_name(local_name.as_ref());
                let attributes = collect_attributes(&element)?;
                handler.start_element(&name, &attributes);
            }
            Event::Empty(element) => {
                let local_name = element.local_name();
                let name = element_name(local_name.as_ref());
                let attributes = collect_attributes(&element)?;
                handler.start_element(&name, &attributes);
                handler.end_element(&name);
            }
            Event::End(element) => {
                handler.end_element(&element_name(element.local_name().as_ref()));
            }
            Event::Text(text) => {
                let text = text.unescape().map_err(ParseError::Escape)?;
                handler.characters(&text);
            }
            Event::CData(data) => {
                handler.characters(&String::from_utf8_lossy(&data));
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(())
}

fn element_name(raw: &[u8]) -> Cow<'_, str> {
    String::from_utf8_lossy(raw)
}

fn collect_attributes(element: &BytesStart<'_>) -> Result<Attributes, ParseError> {
    let mut attributes = Attributes::new();
    for attribute in element.attributes() {
        let attribute = attribute?;
        let local_name = attribute.key.local_name();
        let key = element_name(local_name.as_ref()).into_owned();
        let value = attribute.unescape_value().map_err(ParseError::Escape)?;
        attributes.insert(key, value.into_owned());
    }
    Ok(attributes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        events: Vec<String>,
    }

    impl XmlHandler for Recorder {
        fn start_element(&mut self, name: &str, attributes: &Attributes) {
            let mut keys: Vec<_> = attributes.iter().collect();
            keys.sort();
            self.events.push(format!("start {} {:?}", name, keys));
        }

        fn end_element(&mut self, name: &str) {
            self.events.push(format!("end {}", name));
        }

        fn characters(&mut self, text: &str) {
            if !text.trim().is_empty() {
                self.events.push(format!("text {}", text));
            }
        }
    }

    #[test]
    fn test_parse_document_events() {
        let xml = r#"<root><a id="1&amp;2"><![CDATA[x < y]]></a><b/>Tom &amp; Jerry</root>"#;
        let mut recorder = Recorder::default();
        parse_document(xml.as_bytes(), &mut recorder).unwrap();

        assert_eq!(
            recorder.events,
            vec![
                "start root []",
                r#"start a [("id", "1&2")]"#,
                "text x < y",
                "end a",
                "start b []",
                "end b",
                "text Tom & Jerry",
                "end root",
            ]
        );
    }

    #[test]
    fn test_malformed_document_is_an_error() {
        let mut recorder = Recorder::default();
        let result = parse_document("<root><a></b></root>".as_bytes(), &mut recorder);
        assert!(result.is_err());
    }

    #[test]
    fn test_buffer_as_defaults_to_zero() {
        let mut base = NotifiableParser::new(None);
        base.push(" 7 ");
        assert_eq!(base.buffer_as::<u32>(), 7);
        base.reset_buffer();
        base.push("abc");
        assert_eq!(base.buffer_as::<u32>(), 0);
    }
}
