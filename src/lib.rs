//! ampsync - keep a local copy of an Ampache library and its audio files

pub mod ampache;
pub mod config;
pub mod library;
pub mod report;
pub mod sync;
pub mod utils;
