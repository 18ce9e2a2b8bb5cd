//! CLI command implementations

use anyhow::{Context, Result};
use clap_complete::generate;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::sync::Arc;

use ampsync::ampache::AmpacheApi;
use ampsync::config::AppConfig;
use ampsync::library::{DetailType, LibraryStore, PlayableId};
use ampsync::report::LogReporter;
use ampsync::sync::{
    CacheDir, DownloadEvent, DownloadManager, LibraryStats, LibrarySyncer, SyncResult,
};
use ampsync::utils::format_bytes;

use super::AuthManager;

/// Everything a command needs to talk to the server and the local library
struct Session {
    config: AppConfig,
    api: Arc<dyn AmpacheApi>,
    store: LibraryStore,
}

impl Session {
    fn open() -> Result<Self> {
        let config = AppConfig::load()?;
        let creds = AuthManager::load(&config)?;
        let api: Arc<dyn AmpacheApi> = Arc::new(creds.client(&config)?);
        let store = open_store(&config)?;
        Ok(Self { config, api, store })
    }

    fn syncer(&self) -> LibrarySyncer {
        LibrarySyncer::new(self.api.clone(), self.store.clone(), Arc::new(LogReporter))
    }

    async fn downloads(&self, parallel: Option<usize>) -> Result<DownloadManager> {
        let cache = CacheDir::new(self.config.cache_path()?);
        cache
            .init()
            .await
            .with_context(|| format!("Failed to create cache directory {:?}", cache.root()))?;
        Ok(DownloadManager::new(
            self.api.clone(),
            self.store.clone(),
            cache,
            Arc::new(LogReporter),
            parallel.unwrap_or(self.config.parallel_downloads),
        ))
    }
}

fn open_store(config: &AppConfig) -> Result<LibraryStore> {
    let path = config.library_path()?;
    LibraryStore::open(&path).with_context(|| format!("Failed to open library at {:?}", path))
}

fn print_sync_result(what: &str, result: &SyncResult) {
    println!("{} {} {}", "Synced".green().bold(), result.parsed, what);
    if !result.issues.is_empty() {
        println!(
            "{}",
            format!("  Skipped {} malformed entries:", result.issues.len()).yellow()
        );
        for issue in &result.issues {
            println!("    - <{}>: {}", issue.element, issue.message);
        }
    }
}

/// Authenticate with the Ampache server
pub async fn auth(
    url: Option<String>,
    username: Option<String>,
    password: Option<String>,
    force: bool,
) -> Result<()> {
    println!("{}", "Configuring Ampache credentials...".cyan());

    let mut config = AppConfig::load()?;
    let creds = AuthManager::authenticate(&mut config, url, username, password, force).await?;

    println!();
    println!("{}", "Authentication successful!".green().bold());
    println!("  Server: {}", creds.url);
    println!("  User: {}", creds.username);
    println!();
    println!("Password stored securely in system keyring.");

    Ok(())
}

pub async fn sync_playlists() -> Result<()> {
    let session = Session::open()?;
    println!("{}", "Syncing playlists...".cyan());
    let result = session.syncer().sync_playlists().await?;
    print_sync_result("playlists", &result);
    Ok(())
}

pub async fn sync_album(id: &str) -> Result<()> {
    let session = Session::open()?;
    let syncer = session.syncer();
    let album = syncer.album_for_id(id)?;

    println!("{}", format!("Syncing album {}...", id).cyan());
    let result = syncer.sync_album(album).await?;
    print_sync_result("songs", &result);

    let library = session.store.context();
    if let Some(album) = library.album(album) {
        let details = album.info_details(DetailType::Long).join(", ");
        println!("  {} ({})", album.name(), details);
        if album.has_cached_songs() {
            println!("  {}", "Some songs are available offline".dimmed());
        }
    }
    Ok(())
}

/// Print library counters
pub fn stats() -> Result<()> {
    let config = AppConfig::load()?;
    let store = open_store(&config)?;
    let stats = LibraryStats::collect(&store.context());

    println!("{}", "Library".green().bold());
    println!("  Playlists: {}", stats.playlists);
    println!("  Artists: {}", stats.artists);
    println!(
        "  Albums: {} ({} with synced songs)",
        stats.albums, stats.albums_with_synced_songs
    );
    println!("  Genres: {}", stats.genres);
    println!("  Songs: {}", stats.songs);
    println!("  Podcasts: {}", stats.podcasts);
    println!("  Podcast episodes: {}", stats.podcast_episodes);
    println!();
    println!("{}", "Cache".green().bold());
    println!("  Cached songs: {}", stats.cached_songs);
    println!("  Cached episodes: {}", stats.cached_podcast_episodes);
    println!("  Total size: {}", format_bytes(stats.cached_bytes));

    Ok(())
}

/// Collect the playables to download, syncing album songs first when needed
async fn download_targets(
    session: &Session,
    all: bool,
    albums: &[String],
) -> Result<Vec<PlayableId>> {
    if all {
        return Ok(session.store.context().songs_for_complete_library_download());
    }

    let syncer = session.syncer();
    let mut targets = Vec::new();
    for id in albums {
        let album = syncer.album_for_id(id)?;
        let synced = session
            .store
            .context()
            .album(album)
            .is_some_and(|a| a.is_songs_meta_data_synced());
        if !synced {
            syncer.sync_album(album).await?;
        }

        let library = session.store.context();
        if let Some(album) = library.album(album) {
            targets.extend(album.songs().iter().map(|song| song.handle()));
        }
    }
    Ok(targets)
}

pub async fn download(all: bool, albums: Vec<String>, parallel: Option<usize>) -> Result<()> {
    if !all && albums.is_empty() {
        anyhow::bail!("Nothing selected. Pass album ids or --all.");
    }

    let session = Session::open()?;
    let targets = download_targets(&session, all, &albums).await?;
    let manager = session.downloads(parallel).await?;

    let mut events = manager.subscribe();
    let started = manager.download(&targets);
    if started == 0 {
        println!("{}", "Everything is already cached.".green());
        return Ok(());
    }

    let pb = ProgressBar::new(started as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .context("Invalid progress template")?
            .progress_chars("#>-"),
    );

    let mut cached_bytes: u64 = 0;
    let mut failed = 0;
    let mut seen = 0;
    while seen < started {
        let Some(event) = events.recv().await else {
            break;
        };
        seen += 1;
        match event {
            DownloadEvent::Finished { file, .. } => {
                cached_bytes += file.size;
                pb.set_message(format_bytes(cached_bytes));
            }
            DownloadEvent::Failed { playable, message } => {
                failed += 1;
                let library = session.store.context();
                let name = library
                    .playable(playable)
                    .map(|p| p.display_string())
                    .unwrap_or_default();
                pb.println(format!("{} {}: {}", "Failed".red(), name, message));
            }
            DownloadEvent::Cancelled { .. } => {}
        }
        pb.inc(1);
    }
    pb.finish_and_clear();
    manager.wait_idle().await;

    println!();
    println!("{}", "Download complete!".green().bold());
    println!("  Downloaded: {}", started - failed);
    if failed > 0 {
        println!("  {}", format!("Failed: {}", failed).red());
    }
    println!("  Total size: {}", format_bytes(cached_bytes));

    Ok(())
}

pub async fn clear_cache() -> Result<()> {
    let session = Session::open()?;
    let manager = session.downloads(Some(1)).await?;

    let removed = manager.clear_cache().await?;
    println!("{} {} cached files", "Removed".green().bold(), removed);
    Ok(())
}

pub fn playlists() -> Result<()> {
    let config = AppConfig::load()?;
    let store = open_store(&config)?;
    let library = store.context();
    let playlists = library.playlists();

    if playlists.is_empty() {
        println!("{}", "No playlists. Run `ampsync sync playlists` first.".yellow());
        return Ok(());
    }
    for playlist in playlists {
        println!(
            "  {} {} ({} songs)",
            format!("[{}]", playlist.id()).dimmed(),
            playlist.name(),
            playlist.song_count()
        );
    }
    Ok(())
}

pub async fn rename_playlist(id: &str, name: &str) -> Result<()> {
    let session = Session::open()?;
    let playlist = session
        .store
        .context()
        .get_playlist(id)
        .with_context(|| format!("Unknown playlist {}. Run `ampsync sync playlists` first.", id))?;

    let upload = session.syncer().rename_playlist(playlist, name)?;
    upload.await.context("Playlist upload task failed")?;

    println!("{} playlist {} to {}", "Renamed".green().bold(), id, name.bold());
    Ok(())
}

pub async fn favorite_album(id: &str) -> Result<()> {
    let session = Session::open()?;
    let syncer = session.syncer();
    let album = syncer.album_for_id(id)?;

    let (favorite, upload) = syncer.toggle_favorite_album(album)?;
    upload.await.context("Favorite upload task failed")?;

    if favorite {
        println!("{} album {}", "Favorited".green().bold(), id);
    } else {
        println!("{} album {}", "Unfavorited".yellow().bold(), id);
    }
    Ok(())
}

/// Generate shell completions
pub fn completion(shell: clap_complete::Shell) {
    let mut cmd = super::Cli::command();
    generate(shell, &mut cmd, "ampsync", &mut io::stdout());
}

impl super::Cli {
    fn command() -> clap::Command {
        <Self as clap::CommandFactory>::command()
    }
}
