//! HTTP client for a Pairio server
//!
//! Signs each request with the channel password. Keys are sent as their
//! SHA-1 digest by default, so arbitrary keys fit in a URL path segment.
//!
//! A client can also read and write a [`LocalStore`]. [`GetFrom`] and
//! [`SetTo`] choose which side each call uses.

use pairio_core::{hash_key, sign, OperationKind, SignatureAlgorithm};
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::error::error_codes;
use crate::local::LocalStore;

/// Longest key or value the client will send
pub const MAX_FIELD_LEN: usize = 80;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid server URL: {0}")]
    InvalidUrl(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Local store error: {0}")]
    Local(#[from] std::io::Error),

    #[error("Server responded {status}: {message}")]
    Server {
        status: u16,
        error_code: Option<u32>,
        message: String,
    },
}

pub type ClientResult<T> = Result<T, ClientError>;

/// Where `get` looks for a value
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum GetFrom {
    Local,
    #[default]
    Remote,
    /// Local first, the server on a miss
    LocalThenRemote,
    /// The server first, local on a miss
    RemoteThenLocal,
}

/// Where `set` writes a value
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SetTo {
    Local,
    #[default]
    Remote,
    LocalAndRemote,
}

impl fmt::Display for GetFrom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            GetFrom::Local => "local",
            GetFrom::Remote => "remote",
            GetFrom::LocalThenRemote => "local_then_remote",
            GetFrom::RemoteThenLocal => "remote_then_local",
        })
    }
}

impl FromStr for GetFrom {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "local" => Ok(GetFrom::Local),
            "remote" => Ok(GetFrom::Remote),
            "local_then_remote" => Ok(GetFrom::LocalThenRemote),
            "remote_then_local" => Ok(GetFrom::RemoteThenLocal),
            other => Err(format!("Unexpected get_from: {}", other)),
        }
    }
}

impl fmt::Display for SetTo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SetTo::Local => "local",
            SetTo::Remote => "remote",
            SetTo::LocalAndRemote => "local_and_remote",
        })
    }
}

impl FromStr for SetTo {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "local" => Ok(SetTo::Local),
            "remote" => Ok(SetTo::Remote),
            "local_and_remote" => Ok(SetTo::LocalAndRemote),
            other => Err(format!("Unexpected set_to: {}", other)),
        }
    }
}

/// A key as given by the caller.
///
/// JSON keys are reduced to the SHA-1 of their compact, key-sorted encoding,
/// so structurally equal objects address the same value.
#[derive(Debug, Clone, PartialEq)]
pub enum Key {
    Text(String),
    Json(serde_json::Value),
}

impl Key {
    /// The string the key is stored under
    pub fn resolve(&self) -> String {
        match self {
            Key::Text(text) => text.clone(),
            Key::Json(value) => hash_key(&value.to_string()),
        }
    }
}

impl From<&str> for Key {
    fn from(key: &str) -> Self {
        Key::Text(key.to_string())
    }
}

impl From<String> for Key {
    fn from(key: String) -> Self {
        Key::Text(key)
    }
}

impl From<&String> for Key {
    fn from(key: &String) -> Self {
        Key::Text(key.clone())
    }
}

impl From<serde_json::Value> for Key {
    fn from(key: serde_json::Value) -> Self {
        Key::Json(key)
    }
}

#[derive(Debug, Deserialize)]
struct ResponseBody {
    #[serde(default)]
    success: bool,
    value: Option<String>,
    error_code: Option<u32>,
    error: Option<String>,
}

/// Client bound to one channel on one server
pub struct PairioClient {
    http: reqwest::Client,
    url: String,
    channel: String,
    password: String,
    algorithm: SignatureAlgorithm,
    hash_keys: bool,
    retry_delays: Vec<Duration>,
    local: Option<LocalStore>,
    get_from: GetFrom,
    set_to: SetTo,
}

impl std::fmt::Debug for PairioClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PairioClient")
            .field("url", &self.url)
            .field("channel", &self.channel)
            .field("password", &"[REDACTED]")
            .field("algorithm", &self.algorithm)
            .field("hash_keys", &self.hash_keys)
            .field("local", &self.local)
            .field("get_from", &self.get_from)
            .field("set_to", &self.set_to)
            .finish()
    }
}

impl PairioClient {
    pub fn new(
        url: impl Into<String>,
        channel: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            url: url.into().trim_end_matches('/').to_string(),
            channel: channel.into(),
            password: password.into(),
            algorithm: SignatureAlgorithm::default(),
            hash_keys: true,
            retry_delays: vec![Duration::from_millis(200), Duration::from_millis(500)],
            local: None,
            get_from: GetFrom::default(),
            set_to: SetTo::default(),
        }
    }

    /// Client that only uses a local store; no server is contacted
    pub fn local_only(store: LocalStore) -> Self {
        Self::new("http://localhost", "", "")
            .with_local_store(store)
            .with_get_from(GetFrom::Local)
            .with_set_to(SetTo::Local)
    }

    pub fn with_algorithm(mut self, algorithm: SignatureAlgorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    /// Send keys verbatim instead of as their digest
    pub fn with_raw_keys(mut self) -> Self {
        self.hash_keys = false;
        self
    }

    pub fn with_local_store(mut self, store: LocalStore) -> Self {
        self.local = Some(store);
        self
    }

    pub fn with_get_from(mut self, get_from: GetFrom) -> Self {
        self.get_from = get_from;
        self
    }

    pub fn with_set_to(mut self, set_to: SetTo) -> Self {
        self.set_to = set_to;
        self
    }

    /// Delays between attempts when the server cannot be reached
    pub fn with_retry_delays(mut self, delays: Vec<Duration>) -> Self {
        self.retry_delays = delays;
        self
    }

    fn wire_key(&self, key: &str) -> ClientResult<String> {
        check_key(key)?;
        Ok(if self.hash_keys {
            hash_key(key)
        } else {
            key.to_string()
        })
    }

    fn endpoint(&self, segments: &[&str], signature: Option<&str>) -> ClientResult<reqwest::Url> {
        let mut url = reqwest::Url::parse(&self.url)
            .map_err(|e| ClientError::InvalidUrl(format!("{}: {}", self.url, e)))?;
        url.path_segments_mut()
            .map_err(|_| ClientError::InvalidUrl(self.url.clone()))?
            .pop_if_empty()
            .extend(segments);
        if let Some(signature) = signature {
            url.query_pairs_mut()
                .append_pair("channel", &self.channel)
                .append_pair("signature", signature);
        }
        Ok(url)
    }

    /// URL of a signed `get`
    pub fn get_url(&self, collection: &str, key: &str) -> ClientResult<reqwest::Url> {
        let key = self.wire_key(key)?;
        let signature = sign(
            self.algorithm,
            OperationKind::Read,
            collection,
            &key,
            None,
            &self.password,
        );
        self.endpoint(&["get", collection, &key], Some(&signature))
    }

    /// URL of a signed `set`
    pub fn set_url(&self, collection: &str, key: &str, value: &str) -> ClientResult<reqwest::Url> {
        check_value(value)?;
        let key = self.wire_key(key)?;
        let signature = sign(
            self.algorithm,
            OperationKind::Write,
            collection,
            &key,
            Some(value),
            &self.password,
        );
        self.endpoint(&["set", collection, &key, value], Some(&signature))
    }

    /// Fetch a value; `None` when the key has never been set
    pub async fn get(&self, collection: &str, key: impl Into<Key>) -> ClientResult<Option<String>> {
        let key = checked_key(key.into())?;
        match self.get_from {
            GetFrom::Local => self.get_local(collection, &key).await,
            GetFrom::Remote => self.get_remote(collection, &key).await,
            GetFrom::LocalThenRemote => match self.get_local(collection, &key).await? {
                Some(value) => Ok(Some(value)),
                None => self.get_remote(collection, &key).await,
            },
            GetFrom::RemoteThenLocal => match self.get_remote(collection, &key).await? {
                Some(value) => Ok(Some(value)),
                None => self.get_local(collection, &key).await,
            },
        }
    }

    pub async fn set(&self, collection: &str, key: impl Into<Key>, value: &str) -> ClientResult<()> {
        check_value(value)?;
        let key = checked_key(key.into())?;
        match self.set_to {
            SetTo::Local => self.set_local(collection, &key, value).await,
            SetTo::Remote => self.set_remote(collection, &key, value).await,
            SetTo::LocalAndRemote => {
                self.set_local(collection, &key, value).await?;
                self.set_remote(collection, &key, value).await
            }
        }
    }

    fn local_store(&self) -> ClientResult<&LocalStore> {
        self.local.as_ref().ok_or_else(|| {
            ClientError::InvalidInput("No local store configured for this client".to_string())
        })
    }

    fn check_credentials(&self) -> ClientResult<()> {
        if self.channel.is_empty() {
            return Err(ClientError::InvalidInput(
                "You need to configure the pairio channel or set the PAIRIO_CHANNEL environment variable"
                    .to_string(),
            ));
        }
        if self.password.is_empty() {
            return Err(ClientError::InvalidInput(
                "You need to configure the pairio password or set the PAIRIO_PASSWORD environment variable"
                    .to_string(),
            ));
        }
        Ok(())
    }

    async fn get_local(&self, collection: &str, key: &str) -> ClientResult<Option<String>> {
        let value = self.local_store()?.get(collection, key).await?;
        debug!("Local get {}/{}: {}", collection, key, if value.is_some() { "hit" } else { "miss" });
        Ok(value)
    }

    async fn set_local(&self, collection: &str, key: &str, value: &str) -> ClientResult<()> {
        Ok(self.local_store()?.set(collection, key, value).await?)
    }

    async fn get_remote(&self, collection: &str, key: &str) -> ClientResult<Option<String>> {
        self.check_credentials()?;
        let url = self.get_url(collection, key)?;
        match self.call(url).await {
            Ok(body) => Ok(body.value),
            Err(ClientError::Server {
                error_code: Some(error_codes::KEY_NOT_FOUND),
                ..
            }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn set_remote(&self, collection: &str, key: &str, value: &str) -> ClientResult<()> {
        self.check_credentials()?;
        let url = self.set_url(collection, key, value)?;
        self.call(url).await.map(|_| ())
    }

    pub async fn probe(&self) -> ClientResult<()> {
        let url = self.endpoint(&["probe"], None)?;
        self.call(url).await.map(|_| ())
    }

    async fn call(&self, url: reqwest::Url) -> ClientResult<ResponseBody> {
        let mut delays = self.retry_delays.iter();
        let response = loop {
            match self.http.get(url.clone()).send().await {
                Ok(response) => break response,
                Err(e) if e.is_connect() || e.is_timeout() => match delays.next() {
                    Some(delay) => {
                        warn!("Retrying http request in {:?}: {}", delay, e);
                        tokio::time::sleep(*delay).await;
                    }
                    None => return Err(e.into()),
                },
                Err(e) => return Err(e.into()),
            }
        };

        let status = response.status();
        let body: ResponseBody = response.json().await?;
        if status.is_success() && body.success {
            Ok(body)
        } else {
            Err(ClientError::Server {
                status: status.as_u16(),
                error_code: body.error_code,
                message: body.error.unwrap_or_else(|| "unknown error".to_string()),
            })
        }
    }
}

fn check_key(key: &str) -> ClientResult<()> {
    if key.len() > MAX_FIELD_LEN {
        return Err(ClientError::InvalidInput(format!(
            "Key cannot have length > {}",
            MAX_FIELD_LEN
        )));
    }
    Ok(())
}

fn checked_key(key: Key) -> ClientResult<String> {
    let key = key.resolve();
    check_key(&key)?;
    Ok(key)
}

fn check_value(value: &str) -> ClientResult<()> {
    if value.len() > MAX_FIELD_LEN {
        return Err(ClientError::InvalidInput(format!(
            "Value cannot have length > {}",
            MAX_FIELD_LEN
        )));
    }
    Ok(())
}
