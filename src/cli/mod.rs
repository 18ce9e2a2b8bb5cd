//! CLI module for ampsync

use clap::{Parser, Subcommand};

pub mod auth;
pub mod commands;

pub use auth::AuthManager;

#[derive(Parser, Debug)]
#[command(name = "ampsync", about = "Sync an Ampache library into a local store and offline cache")]
#[command(version, author)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Configure Ampache server credentials
    Auth {
        /// Ampache server URL
        #[arg(long, env = "AMPACHE_URL")]
        url: Option<String>,

        /// Username
        #[arg(short, long, env = "AMPACHE_USER")]
        username: Option<String>,

        /// Password
        #[arg(short, long, env = "AMPACHE_PASS")]
        password: Option<String>,

        /// Force re-authentication (ignore stored credentials)
        #[arg(long)]
        force: bool,
    },

    /// Pull library data from the server
    Sync {
        #[command(subcommand)]
        target: SyncTarget,
    },

    /// Show library and cache counters
    Stats,

    /// Download playables into the offline cache
    Download {
        /// Download every song of every album whose songs are synced
        #[arg(long, conflicts_with = "album")]
        all: bool,

        /// Server ids of albums to download
        #[arg(value_name = "ALBUM_ID")]
        album: Vec<String>,

        /// Number of parallel downloads (defaults to the configured value)
        #[arg(short, long)]
        parallel: Option<usize>,
    },

    /// Remove every cached file
    ClearCache,

    /// List playlists stored in the library
    Playlists,

    /// Rename a playlist locally and on the server
    RenamePlaylist {
        /// Server id of the playlist
        id: String,

        /// New name
        name: String,
    },

    /// Toggle the favorite flag of an album
    Favorite {
        /// Server id of the album
        album: String,
    },

    /// Generate shell completions
    Completion {
        /// Shell to generate completions for
        shell: clap_complete::Shell,
    },
}

#[derive(Subcommand, Debug)]
pub enum SyncTarget {
    /// Sync every playlist
    Playlists,

    /// Sync the songs of one album
    Album {
        /// Server id of the album
        id: String,
    },
}
