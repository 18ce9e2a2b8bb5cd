//! Ampache XML API HTTP client

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use futures::{StreamExt, TryStreamExt};
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;
use url::Url;

use super::api::{AmpacheApi, ByteStream, DownloadRequest, FavoriteTarget};
use super::auth::{CLIENT_NAME, handshake_params};
use super::error::{ApiError, Result};
use super::parser::{ErrorParser, HandshakeInfo, HandshakeParser, parse_document};

const ENDPOINT: &str = "server/xml.server.php";

/// HTTP client for the Ampache XML API
#[derive(Clone)]
pub struct AmpacheClient {
    endpoint: Url,
    username: String,
    password: String,
    request_timeout: Duration,
    http_client: Client,
    session: Arc<Mutex<Option<String>>>,
}

impl AmpacheClient {
    /// Create a new client. `request_timeout` bounds every document request and
    /// the connection phase of downloads.
    pub fn new(
        server_url: &str,
        username: &str,
        password: &str,
        request_timeout: Duration,
    ) -> Result<Self> {
        let base = Url::parse(&format!("{}/", server_url.trim_end_matches('/')))?;
        let endpoint = base.join(ENDPOINT)?;

        let http_client = Client::builder()
            .user_agent(format!("{}/{}", CLIENT_NAME, env!("CARGO_PKG_VERSION")))
            .connect_timeout(request_timeout)
            .build()?;

        Ok(Self {
            endpoint,
            username: username.to_string(),
            password: password.to_string(),
            request_timeout,
            http_client,
            session: Arc::new(Mutex::new(None)),
        })
    }

    /// Build the endpoint URL for `params`
    fn build_url<K, V>(&self, params: &[(K, V)]) -> Url
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut()
            .extend_pairs(params.iter().map(|(k, v)| (k.as_ref(), v.as_ref())));
        url
    }

    async fn fetch_document(&self, url: Url) -> Result<Bytes> {
        let response = self
            .http_client
            .get(url)
            .timeout(self.request_timeout)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ApiError::Status(response.status()));
        }

        let body = response.bytes().await?;
        check_fault(&body)?;
        Ok(body)
    }

    async fn login(&self) -> Result<HandshakeInfo> {
        let params = handshake_params(&self.username, &self.password, Utc::now().timestamp());
        debug!("Performing handshake for user {}", self.username);

        let body = self.fetch_document(self.build_url(&params)).await?;
        let mut parser = HandshakeParser::new();
        parse_document(&body[..], &mut parser)?;
        let info = parser.into_info().ok_or(ApiError::MissingToken)?;

        debug!(
            "Handshake succeeded: api {}, {} songs, {} playlists",
            info.api, info.songs, info.playlists
        );
        *self.session.lock().await = Some(info.auth.clone());
        Ok(info)
    }

    async fn session_token(&self) -> Result<String> {
        if let Some(token) = self.session.lock().await.clone() {
            return Ok(token);
        }
        Ok(self.login().await?.auth)
    }

    async fn forget_session(&self) {
        debug!("Session expired, authenticating again");
        self.session.lock().await.take();
    }

    fn action_url(&self, token: &str, action: &str, params: &[(&str, &str)]) -> Url {
        let mut all = vec![("action", action), ("auth", token)];
        all.extend_from_slice(params);
        self.build_url(&all)
    }

    /// Call an authenticated action, re-authenticating once when the session expired
    async fn call(&self, action: &str, params: &[(&str, &str)]) -> Result<Bytes> {
        let token = self.session_token().await?;
        debug!("Calling action {}", action);
        match self.fetch_document(self.action_url(&token, action, params)).await {
            Err(error) if error.is_session_expired() => {
                self.forget_session().await;
                let token = self.session_token().await?;
                self.fetch_document(self.action_url(&token, action, params))
                    .await
            }
            result => result,
        }
    }

    async fn open_download(&self, url: Url) -> Result<ByteStream> {
        // No total timeout: a large file may legitimately take long.
        let response = self.http_client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(ApiError::Status(response.status()));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        // Errors come back as XML documents with a success status
        if content_type.contains("xml") {
            let body = response.bytes().await?;
            check_fault(&body)?;
            return Err(ApiError::UnexpectedResponse(format!(
                "download returned {}",
                content_type
            )));
        }

        Ok(response.bytes_stream().map_err(ApiError::from).boxed())
    }

    fn download_url(&self, token: &str, request: &DownloadRequest) -> Url {
        self.action_url(
            token,
            "download",
            &[
                ("type", request.object_type()),
                ("id", request.id.as_str()),
                ("format", "raw"),
            ],
        )
    }
}

/// Turn an Ampache error document into an error.
///
/// A body that is not well-formed XML is only a fault when an `<error>`
/// element precedes the malformed part; otherwise it is handed to the
/// entity parsers, which keep what they parsed before the bad byte.
fn check_fault(body: &[u8]) -> Result<()> {
    let mut parser = ErrorParser::new();
    if let Err(error) = parse_document(body, &mut parser) {
        debug!("Response is not well-formed: {}", error);
    }
    match parser.into_fault() {
        Some(fault) => Err(ApiError::Server {
            code: fault.code,
            message: fault.message,
        }),
        None => Ok(()),
    }
}

#[async_trait]
impl AmpacheApi for AmpacheClient {
    async fn handshake(&self) -> Result<HandshakeInfo> {
        self.login().await
    }

    async fn playlists(&self) -> Result<Bytes> {
        self.call("playlists", &[("hide_search", "1")]).await
    }

    async fn album_songs(&self, album_id: &str) -> Result<Bytes> {
        self.call("album_songs", &[("filter", album_id)]).await
    }

    async fn update_playlist_name(&self, playlist_id: &str, name: &str) -> Result<()> {
        self.call("playlist_edit", &[("filter", playlist_id), ("name", name)])
            .await?;
        Ok(())
    }

    async fn set_favorite(&self, target: FavoriteTarget, id: &str, favorite: bool) -> Result<()> {
        let flag = if favorite { "1" } else { "0" };
        self.call("flag", &[("type", target.as_str()), ("id", id), ("flag", flag)])
            .await?;
        Ok(())
    }

    async fn download(&self, request: &DownloadRequest) -> Result<ByteStream> {
        let token = self.session_token().await?;
        debug!("Downloading {} {}", request.object_type(), request.id);
        match self.open_download(self.download_url(&token, request)).await {
            Err(error) if error.is_session_expired() => {
                self.forget_session().await;
                let token = self.session_token().await?;
                self.open_download(self.download_url(&token, request))
                    .await
            }
            result => result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> AmpacheClient {
        AmpacheClient::new(
            "https://music.example/ampache/",
            "user",
            "pass",
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[test]
    fn test_endpoint_keeps_server_path() {
        let url = client().build_url(&[("action", "ping")]);
        assert_eq!(
            url.as_str(),
            "https://music.example/ampache/server/xml.server.php?action=ping"
        );
    }

    #[test]
    fn test_action_url_encodes_parameters() {
        let url = client().action_url("tok", "playlist_edit", &[("name", "Rock & Roll")]);
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(
            pairs,
            vec![
                ("action".to_string(), "playlist_edit".to_string()),
                ("auth".to_string(), "tok".to_string()),
                ("name".to_string(), "Rock & Roll".to_string()),
            ]
        );
    }

    #[test]
    fn test_download_url() {
        let request = DownloadRequest {
            id: "5".to_string(),
            is_podcast_episode: true,
        };
        let url = client().download_url("tok", &request);
        let query = url.query().unwrap();
        assert_eq!(
            query,
            "action=download&auth=tok&type=podcast_episode&id=5&format=raw"
        );
    }

    #[test]
    fn test_check_fault() {
        assert!(check_fault(b"<root><success code=\"1\">ok</success></root>").is_ok());
        let expired = b"<root><error errorCode=\"4701\">\
            <errorMessage>Expired</errorMessage></error></root>";
        let error = check_fault(expired).unwrap_err();
        assert!(error.is_session_expired());
    }

    #[test]
    fn test_malformed_document_is_not_a_fault() {
        let truncated =
            b"<root><playlist id=\"1\"><name>Kept</name></playlist><playlist id=\"2\"></root>";
        assert!(check_fault(truncated).is_ok());

        let expired_then_garbage = b"<root><error errorCode=\"4701\">\
            <errorMessage>Expired</errorMessage></error><oops></root>";
        let error = check_fault(expired_then_garbage).unwrap_err();
        assert!(error.is_session_expired());
    }

    #[test]
    fn test_invalid_server_url() {
        let result = AmpacheClient::new("not a url", "u", "p", Duration::from_secs(1));
        assert!(matches!(result, Err(ApiError::Url(_))));
    }
}
