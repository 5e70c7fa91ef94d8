use anyhow::{anyhow, Result};
use reqwest::Response;
use serde::Deserialize;
use serde_json::json;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::db::Database;
use crate::models::{AuthUser, Session};
use crate::services::crypto::CryptoService;
use crate::utils::now_unix;

const SESSION_SETTING: &str = "session";

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
    expires_at: Option<i64>,
    user: UserResponse,
}

#[derive(Deserialize)]
struct UserResponse {
    id: String,
    email: Option<String>,
    #[serde(default)]
    user_metadata: UserMetadata,
}

#[derive(Deserialize, Default)]
struct UserMetadata {
    full_name: Option<String>,
    name: Option<String>,
    avatar_url: Option<String>,
    picture: Option<String>,
}

impl From<UserResponse> for AuthUser {
    fn from(user: UserResponse) -> Self {
        let meta = user.user_metadata;
        AuthUser {
            id: user.id,
            email: user.email.unwrap_or_default(),
            display_name: meta.full_name.or(meta.name).unwrap_or_default(),
            photo_url: meta.avatar_url.or(meta.picture),
        }
    }
}

impl TokenResponse {
    fn into_session(self, now: i64) -> Session {
        let expires_at = self
            .expires_at
            .or_else(|| self.expires_in.map(|secs| now + secs));
        Session {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at,
            user: self.user.into(),
        }
    }
}

/// Client for the hosted identity provider's `/auth/v1` REST surface.
#[derive(Clone)]
pub struct IdentityClient {
    client: reqwest::Client,
    base_url: String,
    anon_key: String,
}

impl IdentityClient {
    pub fn new(base_url: &str, anon_key: &str) -> Self {
        IdentityClient {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            anon_key: anon_key.to_string(),
        }
    }

    /// Exchanges an ID token from a federated provider (e.g. Google) for a session.
    pub async fn sign_in_with_id_token(&self, provider: &str, id_token: &str) -> Result<Session> {
        let response = self
            .client
            .post(format!("{}/auth/v1/token", self.base_url))
            .query(&[("grant_type", "id_token")])
            .header("apikey", &self.anon_key)
            .json(&json!({"provider": provider, "id_token": id_token}))
            .send()
            .await?;
        let token: TokenResponse = read_json(response, "sign-in").await?;
        Ok(token.into_session(now_unix()))
    }

    pub async fn refresh(&self, refresh_token: &str) -> Result<Session> {
        let response = self
            .client
            .post(format!("{}/auth/v1/token", self.base_url))
            .query(&[("grant_type", "refresh_token")])
            .header("apikey", &self.anon_key)
            .json(&json!({"refresh_token": refresh_token}))
            .send()
            .await?;
        let token: TokenResponse = read_json(response, "session refresh").await?;
        Ok(token.into_session(now_unix()))
    }

    pub async fn current_user(&self, access_token: &str) -> Result<AuthUser> {
        let response = self
            .client
            .get(format!("{}/auth/v1/user", self.base_url))
            .header("apikey", &self.anon_key)
            .bearer_auth(access_token)
            .send()
            .await?;
        let user: UserResponse = read_json(response, "user lookup").await?;
        Ok(user.into())
    }

    pub async fn sign_out(&self, access_token: &str) -> Result<()> {
        let response = self
            .client
            .post(format!("{}/auth/v1/logout", self.base_url))
            .header("apikey", &self.anon_key)
            .bearer_auth(access_token)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(anyhow!("Identity provider error {} during sign-out", response.status()));
        }
        Ok(())
    }
}

async fn read_json<T: serde::de::DeserializeOwned>(response: Response, action: &str) -> Result<T> {
    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(anyhow!("Identity provider error {} during {}: {}", status, action, body));
    }
    Ok(response.json::<T>().await?)
}

/// Broadcasts sign-in and sign-out to anyone holding a receiver.
pub struct AuthState {
    tx: watch::Sender<Option<AuthUser>>,
}

impl AuthState {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        AuthState { tx }
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<AuthUser>> {
        self.tx.subscribe()
    }

    pub fn current(&self) -> Option<AuthUser> {
        self.tx.borrow().clone()
    }

    pub fn set(&self, user: Option<AuthUser>) {
        debug!(signed_in = user.is_some(), "auth state changed");
        self.tx.send_replace(user);
    }
}

impl Default for AuthState {
    fn default() -> Self {
        Self::new()
    }
}

/// Stores the session sealed in the settings table.
pub struct SessionVault {
    db: Arc<Mutex<Database>>,
    use_keychain: bool,
}

impl SessionVault {
    pub fn new(db: Arc<Mutex<Database>>, use_keychain: bool) -> Self {
        SessionVault { db, use_keychain }
    }

    pub fn save(&self, session: &Session) -> Result<()> {
        let plain = serde_json::to_string(session)?;
        let sealed = if self.use_keychain {
            CryptoService::seal_secret(SESSION_SETTING, &plain)?
        } else {
            CryptoService::seal_secret_local(&plain)?
        };
        let db = self.db.lock().map_err(|_| anyhow!("DB lock poisoned"))?;
        db.set_setting(SESSION_SETTING, &sealed)?;
        Ok(())
    }

    pub fn load(&self) -> Result<Option<Session>> {
        let sealed = {
            let db = self.db.lock().map_err(|_| anyhow!("DB lock poisoned"))?;
            db.get_setting(SESSION_SETTING)?
        };
        let Some(sealed) = sealed else {
            return Ok(None);
        };
        let plain = CryptoService::open_secret(&sealed)?;
        Ok(Some(serde_json::from_str(&plain)?))
    }

    pub fn clear(&self) -> Result<()> {
        let db = self.db.lock().map_err(|_| anyhow!("DB lock poisoned"))?;
        if let Some(sealed) = db.get_setting(SESSION_SETTING)? {
            CryptoService::forget_secret(&sealed);
        }
        db.delete_setting(SESSION_SETTING)?;
        Ok(())
    }
}

/// Picks the stored session back up, refreshing it once if it has expired.
pub async fn restore_session(
    vault: &SessionVault,
    identity: Option<&IdentityClient>,
) -> Result<Option<Session>> {
    let session = match vault.load() {
        Ok(Some(session)) => session,
        Ok(None) => return Ok(None),
        Err(err) => {
            warn!(error = %err, "stored session unreadable; signing out");
            vault.clear()?;
            return Ok(None);
        }
    };

    if !session.is_expired(now_unix()) {
        return Ok(Some(session));
    }

    let (Some(identity), Some(refresh_token)) = (identity, session.refresh_token.as_deref()) else {
        vault.clear()?;
        return Ok(None);
    };

    match identity.refresh(refresh_token).await {
        Ok(fresh) => {
            vault.save(&fresh)?;
            Ok(Some(fresh))
        }
        Err(err) => {
            warn!(error = %err, "session refresh failed; signing out");
            vault.clear()?;
            Ok(None)
        }
    }
}
