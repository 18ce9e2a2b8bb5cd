//! ampsync - Sync an Ampache library into a local store and offline cache

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod cli;

use cli::{Cli, Commands, SyncTarget};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        "ampsync=debug,reqwest=debug"
    } else {
        "ampsync=info"
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    match cli.command {
        Commands::Auth {
            url,
            username,
            password,
            force,
        } => {
            cli::commands::auth(url, username, password, force).await?;
        }
        Commands::Sync { target } => match target {
            SyncTarget::Playlists => cli::commands::sync_playlists().await?,
            SyncTarget::Album { id } => cli::commands::sync_album(&id).await?,
        },
        Commands::Stats => {
            cli::commands::stats()?;
        }
        Commands::Download {
            all,
            album,
            parallel,
        } => {
            cli::commands::download(all, album, parallel).await?;
        }
        Commands::ClearCache => {
            cli::commands::clear_cache().await?;
        }
        Commands::Playlists => {
            cli::commands::playlists()?;
        }
        Commands::RenamePlaylist { id, name } => {
            cli::commands::rename_playlist(&id, &name).await?;
        }
        Commands::Favorite { album } => {
            cli::commands::favorite_album(&album).await?;
        }
        Commands::Completion { shell } => {
            cli::commands::completion(shell);
        }
    }

    Ok(())
}
