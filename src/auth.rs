use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

use crate::api::{self, ApiClient, ApiError, ApiRequest};
use crate::config::{ConfigError, ConfigStore, Key};
use crate::validate::{self, ValidationError};

const TOKEN_PATH: &str = "authenticate";

#[derive(Debug, Error)]
pub enum AuthError {
    #[error(transparent)]
    Invalid(#[from] ValidationError),
    #[error("not logged in; run `binocs login` first")]
    MissingCredentials,
    #[error("access key or secret key was rejected by the server")]
    Rejected,
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// A well-formed access key / secret key pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub access_key: String,
    pub secret_key: String,
}

impl Credentials {
    pub fn new(access_key: &str, secret_key: &str) -> Result<Self, ValidationError> {
        validate::access_key(access_key)?;
        validate::secret_key(secret_key)?;
        Ok(Credentials {
            access_key: access_key.to_string(),
            secret_key: secret_key.to_string(),
        })
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// Owns the config store and the cached access token. All authenticated
/// traffic goes through [`Session::send`].
pub struct Session {
    api: ApiClient,
    store: Mutex<ConfigStore>,
    // Held for the whole exchange, so concurrent callers queue on it and
    // pick up the token the first one fetched.
    token: Mutex<Option<String>>,
}

impl Session {
    pub fn new(api: ApiClient, store: ConfigStore) -> Self {
        Session {
            api,
            store: Mutex::new(store),
            token: Mutex::new(None),
        }
    }

    /// Exchange `access_key`/`secret_key` for a token and persist all three.
    pub fn login(&self, access_key: &str, secret_key: &str) -> Result<String, AuthError> {
        let credentials = Credentials::new(access_key, secret_key)?;
        let mut cached = lock(&self.token);
        let token = self.exchange(&credentials)?;

        let mut store = lock(&self.store);
        store.set(Key::AccessKey, &credentials.access_key);
        store.set(Key::SecretKey, &credentials.secret_key);
        store.set(Key::AccessToken, &token);
        store.flush()?;

        *cached = Some(token.clone());
        Ok(token)
    }

    /// Credentials currently on record, if any.
    pub fn stored_credentials(&self) -> Option<(String, String)> {
        let store = lock(&self.store);
        Some((store.get(Key::AccessKey)?, store.get(Key::SecretKey)?))
    }

    /// Forget credentials and token, locally and on disk.
    pub fn logout(&self) -> Result<(), AuthError> {
        let mut cached = lock(&self.token);
        let mut store = lock(&self.store);
        store.clear(Key::AccessKey);
        store.clear(Key::SecretKey);
        store.clear(Key::AccessToken);
        store.flush()?;
        *cached = None;
        Ok(())
    }

    /// Current token: cached, then stored, then freshly exchanged.
    pub fn token(&self) -> Result<String, AuthError> {
        let mut cached = lock(&self.token);
        if let Some(token) = cached.as_ref() {
            return Ok(token.clone());
        }
        if let Some(token) = lock(&self.store).get(Key::AccessToken) {
            *cached = Some(token.clone());
            return Ok(token);
        }
        let token = self.exchange_stored()?;
        *cached = Some(token.clone());
        Ok(token)
    }

    /// Replace `stale` with a fresh token. If another caller already replaced
    /// it, their token is returned without a second exchange.
    fn refresh(&self, stale: &str) -> Result<String, AuthError> {
        let mut cached = lock(&self.token);
        if let Some(current) = cached.as_ref().filter(|t| t.as_str() != stale) {
            return Ok(current.clone());
        }
        *cached = None;
        tracing::debug!("access token rejected, refreshing");
        let token = self.exchange_stored()?;
        *cached = Some(token.clone());
        Ok(token)
    }

    /// Send an authenticated request, refreshing the token once on 401.
    pub fn send(&self, request: &ApiRequest) -> Result<Vec<u8>, AuthError> {
        let token = self.token()?;
        match self.api.execute(request, Some(&token)) {
            Err(ApiError::Unauthorized) => {
                let token = self.refresh(&token)?;
                Ok(self.api.execute(request, Some(&token))?)
            }
            other => Ok(other?),
        }
    }

    pub fn fetch<T: DeserializeOwned>(&self, request: &ApiRequest) -> Result<T, AuthError> {
        let bytes = self.send(request)?;
        Ok(api::decode(&bytes)?)
    }

    /// Unix timestamp of the last upgrade check, if one was recorded.
    pub fn last_upgrade_check(&self) -> Option<u64> {
        lock(&self.store)
            .get(Key::UpgradeLastChecked)
            .and_then(|v| v.parse().ok())
    }

    pub fn record_upgrade_check(&self) -> Result<(), AuthError> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let mut store = lock(&self.store);
        store.set(Key::UpgradeLastChecked, now.to_string());
        store.flush()?;
        Ok(())
    }

    fn exchange_stored(&self) -> Result<String, AuthError> {
        let (access_key, secret_key) = self
            .stored_credentials()
            .ok_or(AuthError::MissingCredentials)?;
        let credentials = Credentials::new(&access_key, &secret_key)?;
        let token = self.exchange(&credentials)?;

        let mut store = lock(&self.store);
        store.set(Key::AccessToken, &token);
        store.flush()?;
        Ok(token)
    }

    fn exchange(&self, credentials: &Credentials) -> Result<String, AuthError> {
        let request = ApiRequest::post(TOKEN_PATH).json(json!({
            "access_key": credentials.access_key,
            "secret_key": credentials.secret_key,
        }));
        let bytes = match self.api.execute(&request, None) {
            Err(ApiError::Unauthorized) | Err(ApiError::Client { status: 403, .. }) => {
                return Err(AuthError::Rejected)
            }
            other => other?,
        };
        let response: TokenResponse = api::decode(&bytes)?;
        Ok(response.access_token)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
