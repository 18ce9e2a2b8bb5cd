//! Audio file helpers backed by lofty

use lofty::prelude::*;
use lofty::probe::Probe;
use std::path::Path;
use tracing::debug;

/// File extension for a content type, `bin` when unknown
pub fn extension_for(content_type: Option<&str>) -> &'static str {
    let Some(content_type) = content_type else {
        return "bin";
    };
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    match essence.as_str() {
        "audio/mpeg" | "audio/mp3" | "audio/mpeg3" => "mp3",
        "audio/flac" | "audio/x-flac" => "flac",
        "audio/ogg" | "application/ogg" | "audio/vorbis" => "ogg",
        "audio/opus" => "opus",
        "audio/mp4" | "audio/m4a" | "audio/x-m4a" | "audio/aac" => "m4a",
        "audio/wav" | "audio/x-wav" | "audio/wave" => "wav",
        "audio/x-ms-wma" => "wma",
        _ => "bin",
    }
}

/// Playback length of the file at `path` in whole seconds.
///
/// Returns `None` when the file cannot be probed or reports no duration.
/// Blocking; call it from the blocking pool.
pub fn measure_duration(path: &Path) -> Option<u32> {
    let tagged = match Probe::open(path).and_then(|probe| probe.guess_file_type()?.read()) {
        Ok(tagged) => tagged,
        Err(e) => {
            debug!("Could not read audio properties of {}: {}", path.display(), e);
            return None;
        }
    };
    let seconds = tagged.properties().duration().as_secs();
    (seconds > 0).then(|| u32::try_from(seconds).unwrap_or(u32::MAX))
}
