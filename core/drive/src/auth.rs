//! OAuth2 authentication and token management for Google Drive.
//!
//! [`Authenticator::authorize`] turns a client-secret file into a
//! [`TokenManager`]: cached tokens are reused when they cover the required
//! scopes, otherwise the installed-app flow runs in the user's browser with a
//! loopback redirect. The resulting tokens are persisted in a [`TokenCache`].

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use oauth2::basic::{BasicClient, BasicTokenResponse};
use oauth2::{
    AuthType, AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken, EndpointNotSet,
    EndpointSet, PkceCodeChallenge, PkceCodeVerifier, RedirectUrl, RefreshToken, Scope,
    TokenResponse, TokenUrl,
};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use photodrive_common::{Error, Result};

use crate::callback::LoopbackReceiver;
use crate::config::DriveConfig;

/// Full access to the user's Drive.
pub const DRIVE_SCOPE: &str = "https://www.googleapis.com/auth/drive";
/// Access to the application data folder.
pub const DRIVE_APPDATA_SCOPE: &str = "https://www.googleapis.com/auth/drive.appdata";
/// Scopes every session is bound to.
pub const SCOPES: [&str; 2] = [DRIVE_SCOPE, DRIVE_APPDATA_SCOPE];

/// OAuth2 authorization endpoint.
const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/auth";
/// OAuth2 token endpoint.
const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

type GoogleClient =
    BasicClient<EndpointSet, EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointSet>;

/// OAuth2 client credentials from a Google Cloud Console client-secret file.
#[derive(Clone, Serialize, Deserialize)]
pub struct ClientSecrets {
    pub client_id: String,
    pub client_secret: String,
    #[serde(default = "default_auth_uri")]
    pub auth_uri: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
    #[serde(default)]
    pub redirect_uris: Vec<String>,
}

fn default_auth_uri() -> String {
    GOOGLE_AUTH_URL.to_string()
}

fn default_token_uri() -> String {
    GOOGLE_TOKEN_URL.to_string()
}

/// Top-level layout of the client-secret file.
#[derive(Deserialize)]
struct SecretsFile {
    installed: Option<ClientSecrets>,
    web: Option<ClientSecrets>,
}

impl ClientSecrets {
    /// Read a client-secret file.
    ///
    /// # Errors
    /// - File missing or unreadable (`Error::Io`)
    /// - File malformed or without an `installed`/`web` section
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        Self::from_json(&data).map_err(|e| match e {
            Error::InvalidInput(msg) => {
                Error::InvalidInput(format!("{} ({})", msg, path.display()))
            }
            other => other,
        })
    }

    /// Parse client-secret JSON.
    pub fn from_json(data: &str) -> Result<Self> {
        let file: SecretsFile = serde_json::from_str(data)
            .map_err(|e| Error::InvalidInput(format!("Malformed client secret file: {}", e)))?;

        let secrets = file.installed.or(file.web).ok_or_else(|| {
            Error::InvalidInput(
                "Client secret file has neither an 'installed' nor a 'web' section".to_string(),
            )
        })?;

        if secrets.client_id.is_empty() {
            return Err(Error::InvalidInput(
                "Client secret file has an empty client_id".to_string(),
            ));
        }

        Ok(secrets)
    }
}

impl fmt::Debug for ClientSecrets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientSecrets")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("auth_uri", &self.auth_uri)
            .field("token_uri", &self.token_uri)
            .finish()
    }
}

/// OAuth2 tokens with expiration tracking.
#[derive(Clone, Serialize, Deserialize)]
pub struct Tokens {
    /// Access token for API requests.
    pub access_token: String,
    /// Refresh token for obtaining new access tokens.
    pub refresh_token: String,
    /// When the access token expires.
    pub expires_at: DateTime<Utc>,
    /// Scopes the tokens were granted for.
    #[serde(default)]
    pub scopes: Vec<String>,
}

impl Tokens {
    /// Check if the access token is expired or about to expire.
    pub fn is_expired(&self) -> bool {
        // Consider expired if less than 5 minutes remaining
        self.expires_at < Utc::now() + Duration::minutes(5)
    }

    /// Whether every scope in `required` was granted.
    pub fn covers(&self, required: &[&str]) -> bool {
        required
            .iter()
            .all(|scope| self.scopes.iter().any(|granted| granted == scope))
    }

    fn from_response(response: &BasicTokenResponse, previous_refresh: Option<&str>) -> Result<Self> {
        let access_token = response.access_token().secret().clone();

        // Refresh responses usually omit the refresh token; keep the old one.
        let refresh_token = match (response.refresh_token(), previous_refresh) {
            (Some(token), _) => token.secret().clone(),
            (None, Some(previous)) => previous.to_string(),
            (None, None) => {
                return Err(Error::Authentication(
                    "No refresh token received. Ensure 'offline' access and 'consent' prompt were requested.".to_string(),
                ))
            }
        };

        let expires_in = response
            .expires_in()
            .unwrap_or_else(|| std::time::Duration::from_secs(3600));
        let expires_at =
            Utc::now() + Duration::from_std(expires_in).unwrap_or_else(|_| Duration::hours(1));

        let scopes = match response.scopes() {
            Some(scopes) => scopes.iter().map(|s| s.to_string()).collect(),
            None => SCOPES.iter().map(|s| s.to_string()).collect(),
        };

        Ok(Self {
            access_token,
            refresh_token,
            expires_at,
            scopes,
        })
    }
}

impl fmt::Debug for Tokens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tokens")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .field("scopes", &self.scopes)
            .finish()
    }
}

/// An authorization started in the browser and not yet exchanged for tokens.
pub struct PendingAuthorization {
    /// URL the user must visit.
    pub url: String,
    /// CSRF state the callback has to echo back.
    pub csrf_state: String,
    redirect_url: RedirectUrl,
    pkce_verifier: PkceCodeVerifier,
}

/// OAuth2 authentication manager for Google Drive.
pub struct AuthManager {
    client: GoogleClient,
    http: oauth2::reqwest::Client,
}

impl AuthManager {
    /// Create a new authentication manager.
    pub fn new(secrets: &ClientSecrets) -> Result<Self> {
        let client = BasicClient::new(ClientId::new(secrets.client_id.clone()))
            .set_client_secret(ClientSecret::new(secrets.client_secret.clone()))
            .set_auth_uri(
                AuthUrl::new(secrets.auth_uri.clone())
                    .map_err(|e| Error::InvalidInput(format!("Invalid auth URL: {}", e)))?,
            )
            .set_token_uri(
                TokenUrl::new(secrets.token_uri.clone())
                    .map_err(|e| Error::InvalidInput(format!("Invalid token URL: {}", e)))?,
            )
            .set_auth_type(AuthType::RequestBody);

        // The token endpoint must not be allowed to redirect us elsewhere.
        let http = oauth2::reqwest::ClientBuilder::new()
            .redirect(oauth2::reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| Error::Network(format!("Failed to create OAuth2 HTTP client: {}", e)))?;

        Ok(Self { client, http })
    }

    /// Build the consent URL for a flow redirecting to `redirect_url`.
    ///
    /// Requests both Drive scopes, offline access and a PKCE challenge.
    pub fn begin(&self, redirect_url: &str) -> Result<PendingAuthorization> {
        let redirect_url = RedirectUrl::new(redirect_url.to_string())
            .map_err(|e| Error::InvalidInput(format!("Invalid redirect URL: {}", e)))?;
        let (pkce_challenge, pkce_verifier) = PkceCodeChallenge::new_random_sha256();

        let (url, csrf_token) = self
            .client
            .authorize_url(CsrfToken::new_random)
            .add_scopes(SCOPES.iter().map(|s| Scope::new(s.to_string())))
            .add_extra_param("access_type", "offline")
            .add_extra_param("prompt", "consent")
            .set_pkce_challenge(pkce_challenge)
            .set_redirect_uri(Cow::Borrowed(&redirect_url))
            .url();

        Ok(PendingAuthorization {
            url: url.to_string(),
            csrf_state: csrf_token.secret().clone(),
            redirect_url,
            pkce_verifier,
        })
    }

    /// Exchange an authorization code for tokens.
    ///
    /// # Errors
    /// - Invalid authorization code
    /// - No refresh token in the response
    /// - Network errors
    pub async fn exchange_code(&self, code: &str, pending: PendingAuthorization) -> Result<Tokens> {
        let response = self
            .client
            .exchange_code(AuthorizationCode::new(code.to_string()))
            .set_pkce_verifier(pending.pkce_verifier)
            .set_redirect_uri(Cow::Owned(pending.redirect_url))
            .request_async(&self.http)
            .await
            .map_err(|e| Error::Authentication(format!("Token exchange failed: {}", e)))?;

        Tokens::from_response(&response, None)
    }

    /// Refresh an access token using the refresh token.
    ///
    /// # Errors
    /// - Invalid or revoked refresh token
    /// - Network errors
    pub async fn refresh_token(&self, refresh_token: &str) -> Result<Tokens> {
        let refresh = RefreshToken::new(refresh_token.to_string());
        let response = self
            .client
            .exchange_refresh_token(&refresh)
            .request_async(&self.http)
            .await
            .map_err(|e| Error::Authentication(format!("Token refresh failed: {}", e)))?;

        Tokens::from_response(&response, Some(refresh_token))
    }
}

/// Token cache file.
#[derive(Debug, Clone)]
pub struct TokenCache {
    path: PathBuf,
}

impl TokenCache {
    /// Cache backed by the file at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location of the cache file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load cached tokens.
    ///
    /// A missing file yields `None`. An unreadable or corrupt file is logged
    /// and also yields `None`, forcing a fresh authorization.
    pub async fn load(&self) -> Option<Tokens> {
        let data = match tokio::fs::read_to_string(&self.path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!("Could not read token cache {}: {}", self.path.display(), e);
                return None;
            }
        };

        match serde_json::from_str(&data) {
            Ok(tokens) => Some(tokens),
            Err(e) => {
                warn!("Ignoring corrupt token cache {}: {}", self.path.display(), e);
                None
            }
        }
    }

    /// Persist tokens, creating parent directories as needed.
    pub async fn store(&self, tokens: &Tokens) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let json = serde_json::to_string_pretty(tokens)
            .map_err(|e| Error::Serialization(format!("Failed to serialize tokens: {}", e)))?;
        tokio::fs::write(&self.path, json).await?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let permissions = std::fs::Permissions::from_mode(0o600);
            tokio::fs::set_permissions(&self.path, permissions).await?;
        }

        debug!("Stored tokens in {}", self.path.display());
        Ok(())
    }
}

/// Source of bearer tokens for Drive requests.
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// Get a valid access token.
    async fn access_token(&self) -> Result<String>;
}

/// A fixed access token obtained elsewhere.
///
/// Never refreshed; once it expires every request fails with
/// `Error::Authentication`.
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self(access_token.into())
    }
}

#[async_trait]
impl TokenSource for StaticToken {
    async fn access_token(&self) -> Result<String> {
        Ok(self.0.clone())
    }
}

/// Token manager that automatically refreshes expired tokens.
pub struct TokenManager {
    auth_manager: AuthManager,
    tokens: RwLock<Tokens>,
    cache: Option<TokenCache>,
}

impl TokenManager {
    /// Create a new token manager with initial tokens.
    ///
    /// Refreshed tokens are written back to `cache` when one is given.
    pub fn new(auth_manager: AuthManager, tokens: Tokens, cache: Option<TokenCache>) -> Self {
        Self {
            auth_manager,
            tokens: RwLock::new(tokens),
            cache,
        }
    }

    /// Get the current tokens.
    pub async fn get_tokens(&self) -> Tokens {
        self.tokens.read().await.clone()
    }
}

#[async_trait]
impl TokenSource for TokenManager {
    async fn access_token(&self) -> Result<String> {
        let tokens = self.tokens.read().await;

        if !tokens.is_expired() {
            return Ok(tokens.access_token.clone());
        }

        drop(tokens);

        let mut tokens = self.tokens.write().await;

        // Double-check after acquiring write lock
        if !tokens.is_expired() {
            return Ok(tokens.access_token.clone());
        }

        info!("Refreshing expired access token");

        let new_tokens = self
            .auth_manager
            .refresh_token(&tokens.refresh_token)
            .await?;

        if let Some(cache) = &self.cache {
            if let Err(e) = cache.store(&new_tokens).await {
                warn!("Could not persist refreshed tokens: {}", e);
            }
        }

        *tokens = new_tokens;

        Ok(tokens.access_token.clone())
    }
}

/// Drives authorization from a client-secret file to a [`TokenManager`].
pub struct Authenticator {
    auth_manager: AuthManager,
    cache: TokenCache,
}

impl Authenticator {
    /// Create an authenticator for `secrets`, caching tokens in `cache`.
    pub fn new(secrets: &ClientSecrets, cache: TokenCache) -> Result<Self> {
        Ok(Self {
            auth_manager: AuthManager::new(secrets)?,
            cache,
        })
    }

    /// Create an authenticator from the secret and cache paths in `config`.
    pub fn from_config(config: &DriveConfig) -> Result<Self> {
        let secrets = ClientSecrets::load(&config.client_secret_path)?;
        Self::new(&secrets, TokenCache::new(config.token_cache_path()))
    }

    /// Obtain tokens for [`SCOPES`], blocking until the user has consented
    /// if no usable cached tokens exist.
    ///
    /// # Errors
    /// - Consent denied or callback state mismatch
    /// - Token exchange failed
    /// - Token cache cannot be written
    pub async fn authorize(self) -> Result<TokenManager> {
        let tokens = match self.cached_tokens().await {
            Some(tokens) => tokens,
            None => {
                let tokens = self.run_browser_flow().await?;
                self.cache.store(&tokens).await?;
                info!("Authorization complete");
                tokens
            }
        };

        Ok(TokenManager::new(self.auth_manager, tokens, Some(self.cache)))
    }

    /// Cached tokens that cover the required scopes, refreshed if expired.
    async fn cached_tokens(&self) -> Option<Tokens> {
        let tokens = self.cache.load().await?;

        if !tokens.covers(&SCOPES) {
            info!("Cached credentials lack required scopes, re-authorizing");
            return None;
        }

        if !tokens.is_expired() {
            debug!("Using cached credentials from {}", self.cache.path().display());
            return Some(tokens);
        }

        match self.auth_manager.refresh_token(&tokens.refresh_token).await {
            Ok(refreshed) => {
                if let Err(e) = self.cache.store(&refreshed).await {
                    warn!("Could not persist refreshed tokens: {}", e);
                }
                Some(refreshed)
            }
            Err(e) => {
                warn!("Cached credentials could not be refreshed: {}", e);
                None
            }
        }
    }

    async fn run_browser_flow(&self) -> Result<Tokens> {
        let receiver = LoopbackReceiver::bind().await?;
        let pending = self.auth_manager.begin(&receiver.redirect_url())?;

        info!("Opening browser for Google authorization");
        if let Err(e) = open::that(&pending.url) {
            warn!("Could not open a browser: {}", e);
        }
        info!("If no browser opened, visit this URL to authorize: {}", pending.url);

        let code = receiver.wait_for_code(&pending.csrf_state).await?;
        self.auth_manager.exchange_code(&code, pending).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INSTALLED: &str = r#"{
        "installed": {
            "client_id": "1234.apps.googleusercontent.com",
            "project_id": "photo-uploader",
            "auth_uri": "https://accounts.google.com/o/oauth2/auth",
            "token_uri": "https://oauth2.googleapis.com/token",
            "client_secret": "s3cret",
            "redirect_uris": ["http://localhost"]
        }
    }"#;

    fn tokens(expires_at: DateTime<Utc>) -> Tokens {
        Tokens {
            access_token: "access".to_string(),
            refresh_token: "refresh".to_string(),
            expires_at,
            scopes: SCOPES.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_parse_installed_secrets() {
        let secrets = ClientSecrets::from_json(INSTALLED).unwrap();
        assert_eq!(secrets.client_id, "1234.apps.googleusercontent.com");
        assert_eq!(secrets.client_secret, "s3cret");
        assert_eq!(secrets.redirect_uris, vec!["http://localhost"]);
    }

    #[test]
    fn test_parse_web_secrets_with_default_endpoints() {
        let secrets =
            ClientSecrets::from_json(r#"{"web": {"client_id": "web-id", "client_secret": "x"}}"#)
                .unwrap();
        assert_eq!(secrets.client_id, "web-id");
        assert_eq!(secrets.auth_uri, GOOGLE_AUTH_URL);
        assert_eq!(secrets.token_uri, GOOGLE_TOKEN_URL);
    }

    #[test]
    fn test_malformed_secrets_rejected() {
        assert!(matches!(
            ClientSecrets::from_json("{not json"),
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            ClientSecrets::from_json(r#"{"other": {}}"#),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_missing_secret_file() {
        let err = ClientSecrets::load(Path::new("/nonexistent/client_secret.json")).unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_secrets_debug_is_redacted() {
        let secrets = ClientSecrets::from_json(INSTALLED).unwrap();
        let debug = format!("{:?}", secrets);
        assert!(!debug.contains("s3cret"));
        assert!(debug.contains("REDACTED"));
    }

    #[test]
    fn test_tokens_expiration() {
        assert!(tokens(Utc::now() - Duration::hours(1)).is_expired());
        assert!(!tokens(Utc::now() + Duration::hours(1)).is_expired());
    }

    #[test]
    fn test_tokens_near_expiration() {
        // Token expiring in 4 minutes should be considered expired (5 min buffer)
        assert!(tokens(Utc::now() + Duration::minutes(4)).is_expired());
    }

    #[test]
    fn test_tokens_scope_coverage() {
        let mut granted = tokens(Utc::now());
        assert!(granted.covers(&SCOPES));

        granted.scopes = vec![DRIVE_SCOPE.to_string()];
        assert!(granted.covers(&[DRIVE_SCOPE]));
        assert!(!granted.covers(&SCOPES));
    }

    #[test]
    fn test_authorization_url_generation() {
        let secrets = ClientSecrets::from_json(INSTALLED).unwrap();
        let manager = AuthManager::new(&secrets).unwrap();
        let pending = manager.begin("http://127.0.0.1:8765/").unwrap();

        let url = url::Url::parse(&pending.url).unwrap();
        let params: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();

        assert_eq!(url.host_str(), Some("accounts.google.com"));
        assert_eq!(params["client_id"], "1234.apps.googleusercontent.com");
        assert_eq!(params["access_type"], "offline");
        assert_eq!(params["redirect_uri"], "http://127.0.0.1:8765/");
        assert_eq!(params["code_challenge_method"], "S256");
        assert_eq!(params["state"], pending.csrf_state);

        let scopes: Vec<&str> = params["scope"].split(' ').collect();
        assert!(scopes.contains(&DRIVE_SCOPE));
        assert!(scopes.contains(&DRIVE_APPDATA_SCOPE));
    }

    #[tokio::test]
    async fn test_token_cache_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let cache = TokenCache::new(dir.path().join("nested").join("token.json"));

        assert!(cache.load().await.is_none());

        let stored = tokens(Utc::now() + Duration::hours(1));
        cache.store(&stored).await.unwrap();

        let loaded = cache.load().await.unwrap();
        assert_eq!(loaded.access_token, stored.access_token);
        assert_eq!(loaded.refresh_token, stored.refresh_token);
        assert_eq!(loaded.scopes, stored.scopes);
    }

    #[tokio::test]
    async fn test_corrupt_token_cache_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token.json");
        std::fs::write(&path, "garbage").unwrap();

        assert!(TokenCache::new(path).load().await.is_none());
    }

    #[tokio::test]
    async fn test_token_manager_returns_valid_token_without_refresh() {
        let secrets = ClientSecrets::from_json(INSTALLED).unwrap();
        let manager = TokenManager::new(
            AuthManager::new(&secrets).unwrap(),
            tokens(Utc::now() + Duration::hours(1)),
            None,
        );

        assert_eq!(manager.access_token().await.unwrap(), "access");
    }

    #[tokio::test]
    async fn test_authorize_uses_cached_tokens() {
        let dir = tempfile::tempdir().unwrap();
        let cache = TokenCache::new(dir.path().join("token.json"));
        cache
            .store(&tokens(Utc::now() + Duration::hours(1)))
            .await
            .unwrap();

        let secrets = ClientSecrets::from_json(INSTALLED).unwrap();
        let manager = Authenticator::new(&secrets, cache)
            .unwrap()
            .authorize()
            .await
            .unwrap();

        assert_eq!(manager.get_tokens().await.access_token, "access");
    }

    #[tokio::test]
    async fn test_static_token() {
        let source = StaticToken::new("fixed");
        assert_eq!(source.access_token().await.unwrap(), "fixed");
    }
}
