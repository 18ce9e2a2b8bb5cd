//! Credential handling for the Ampache server
//!
//! Server URL and username live in the config file, the password in the
//! system keyring.

use anyhow::{Context, Result};
use dialoguer::{Input, Password};
use keyring::Entry;
use tracing::{debug, info};

use ampsync::ampache::{AmpacheApi, AmpacheClient};
use ampsync::config::AppConfig;

const KEYRING_SERVICE: &str = "ampsync";

/// Ampache server credentials
#[derive(Debug, Clone)]
pub struct Credentials {
    pub url: String,
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn client(&self, config: &AppConfig) -> Result<AmpacheClient> {
        AmpacheClient::new(
            &self.url,
            &self.username,
            &self.password,
            config.request_timeout(),
        )
        .context("Failed to create Ampache client")
    }
}

/// Manages authentication credentials storage
pub struct AuthManager;

impl AuthManager {
    /// Authenticate with the Ampache server
    ///
    /// Reuses stored credentials unless `force` is set, otherwise prompts for
    /// the missing values. Credentials are verified before they are stored.
    pub async fn authenticate(
        config: &mut AppConfig,
        url: Option<String>,
        username: Option<String>,
        password: Option<String>,
        force: bool,
    ) -> Result<Credentials> {
        if !force {
            if let Ok(creds) = Self::load(config) {
                info!("Found existing credentials");
                return Ok(creds);
            }
        } else {
            debug!("Force flag set, ignoring stored credentials");
        }

        let url = match url {
            Some(url) => url,
            None => Input::new()
                .with_prompt("Ampache server URL")
                .interact_text()
                .context("Failed to read URL")?,
        };

        let username = match username {
            Some(username) => username,
            None => Input::new()
                .with_prompt("Username")
                .interact_text()
                .context("Failed to read username")?,
        };

        let password = match password {
            Some(password) => password,
            None => Password::new()
                .with_prompt("Password")
                .interact()
                .context("Failed to read password")?,
        };

        let creds = Credentials {
            url: url.trim_end_matches('/').to_string(),
            username,
            password,
        };

        Self::verify(config, &creds).await?;

        Self::store_password(&creds.username, &creds.password)?;
        config.server_url = Some(creds.url.clone());
        config.username = Some(creds.username.clone());
        config.save()?;
        info!("Credentials stored");

        Ok(creds)
    }

    /// Load credentials from config and keyring
    pub fn load(config: &AppConfig) -> Result<Credentials> {
        let (url, username) = config.server()?;
        let password = Self::get_entry(username)?
            .get_password()
            .context("No Ampache password in keyring. Run `ampsync auth` first.")?;

        Ok(Credentials {
            url: url.to_string(),
            username: username.to_string(),
            password,
        })
    }

    fn store_password(username: &str, password: &str) -> Result<()> {
        Self::get_entry(username)?
            .set_password(password)
            .context("Failed to store password in keyring")?;
        debug!("Password stored in keyring");
        Ok(())
    }

    /// Verify credentials with a handshake
    async fn verify(config: &AppConfig, creds: &Credentials) -> Result<()> {
        debug!("Verifying credentials against {}", creds.url);

        let client = creds.client(config)?;
        let info = client
            .handshake()
            .await
            .context("Failed to verify credentials")?;

        info!(
            "Credentials verified (API {}, {} songs on server)",
            info.api, info.songs
        );
        Ok(())
    }

    fn get_entry(username: &str) -> Result<Entry> {
        let entry_key = format!("ampache:{}", username);
        Entry::new(KEYRING_SERVICE, &entry_key).context("Failed to access keyring")
    }
}
