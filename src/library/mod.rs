//! Local library: records, persistence and views

pub mod entities;
pub mod store;
pub mod views;

pub use entities::*;
pub use store::{Library, LibraryStore, StoreError};
pub use views::{Album, DetailType, Playable, Playlist};
