use anyhow::{anyhow, Result};
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

use crate::db::Database;
use crate::error::UploadError;
use crate::models::{AuthUser, Session, Settings, StorageBackend, UserProfile};
use crate::services::auth::{restore_session, AuthState, IdentityClient, SessionVault};
use crate::services::hosted::{HostedClient, HostedProfileStore, HostedReceiptStore};
use crate::services::quota::{fetch_or_create_profile, QuotaGate};
use crate::services::store::{LocalProfileStore, LocalReceiptStore, ProfileStore, ReceiptStore};
use crate::services::webhook::WebhookClient;

pub struct AppState {
    pub db: Arc<Mutex<Database>>,
    pub settings: Settings,
    pub auth: AuthState,
    pub quota: QuotaGate,
    pub webhook: WebhookClient,
    session: Mutex<Option<Session>>,
    vault: SessionVault,
    identity: Option<IdentityClient>,
    hosted: Option<HostedClient>,
}

impl AppState {
    pub fn new(db: Arc<Mutex<Database>>, settings: Settings, vault: SessionVault) -> Self {
        let endpoints = settings
            .hosted_url
            .as_deref()
            .zip(settings.hosted_anon_key.as_deref());
        let identity = endpoints.map(|(url, key)| IdentityClient::new(url, key));
        let hosted = endpoints.map(|(url, key)| HostedClient::new(url, key));

        AppState {
            db,
            quota: QuotaGate::new(settings.free_upload_limit),
            auth: AuthState::new(),
            webhook: WebhookClient::new(),
            session: Mutex::new(None),
            vault,
            identity,
            hosted,
            settings,
        }
    }

    pub fn with_webhook(mut self, webhook: WebhookClient) -> Self {
        self.webhook = webhook;
        self
    }

    fn access_token(&self) -> Option<String> {
        self.session
            .lock()
            .ok()
            .and_then(|guard| guard.as_ref().map(|s| s.access_token.clone()))
    }

    fn set_session(&self, session: Option<Session>) -> Result<()> {
        let user = session.as_ref().map(|s| s.user.clone());
        {
            let mut guard = self.session.lock().map_err(|_| anyhow!("Session lock"))?;
            *guard = session;
        }
        self.auth.set(user);
        Ok(())
    }

    /// `None` selects the local database; hosted storage without both endpoints is an error.
    fn hosted_client(&self) -> Result<Option<HostedClient>> {
        match (&self.settings.storage_backend, &self.hosted) {
            (StorageBackend::Local, _) => Ok(None),
            (StorageBackend::Hosted, Some(client)) => {
                Ok(Some(client.clone().with_access_token(self.access_token())))
            }
            (StorageBackend::Hosted, None) => Err(anyhow!(
                "Hosted storage needs both hosted_url and hosted_anon_key"
            )),
        }
    }

    pub fn receipt_store(&self) -> Result<Arc<dyn ReceiptStore>> {
        let store: Arc<dyn ReceiptStore> = match self.hosted_client()? {
            Some(client) => Arc::new(HostedReceiptStore::new(client, &self.settings.receipts_table)),
            None => Arc::new(LocalReceiptStore::new(self.db.clone())),
        };
        Ok(store)
    }

    pub fn profile_store(&self) -> Result<Arc<dyn ProfileStore>> {
        let store: Arc<dyn ProfileStore> = match self.hosted_client()? {
            Some(client) => Arc::new(HostedProfileStore::new(client)),
            None => Arc::new(LocalProfileStore::new(self.db.clone())),
        };
        Ok(store)
    }

    pub fn current_user(&self) -> Option<AuthUser> {
        self.auth.current()
    }

    pub fn require_user(&self) -> Result<AuthUser, UploadError> {
        self.current_user().ok_or(UploadError::NotSignedIn)
    }

    /// Asks the identity provider who the stored token belongs to. `None` without a provider.
    pub async fn verify_user(&self) -> Result<Option<AuthUser>> {
        match (&self.identity, self.access_token()) {
            (Some(identity), Some(token)) => Ok(Some(identity.current_user(&token).await?)),
            _ => Ok(None),
        }
    }

    /// Loads the stored session, if any, and announces the resulting user.
    pub async fn restore(&self) -> Result<Option<AuthUser>> {
        let session = restore_session(&self.vault, self.identity.as_ref()).await?;
        let user = session.as_ref().map(|s| s.user.clone());
        self.set_session(session)?;
        Ok(user)
    }

    pub async fn sign_in(&self, provider: &str, id_token: &str) -> Result<(AuthUser, UserProfile)> {
        let identity = self
            .identity
            .as_ref()
            .ok_or_else(|| anyhow!("Identity provider not configured; set hosted_url and hosted_anon_key"))?;
        let session = identity.sign_in_with_id_token(provider, id_token).await?;
        self.adopt_session(session).await
    }

    /// Persists a session and makes sure the user has an upload profile.
    pub async fn adopt_session(&self, session: Session) -> Result<(AuthUser, UserProfile)> {
        let user = session.user.clone();
        self.vault.save(&session)?;
        self.set_session(Some(session))?;
        info!(user_id = %user.id, "signed in");

        let profile = fetch_or_create_profile(self.profile_store()?.as_ref(), &user).await?;
        Ok((user, profile))
    }

    /// Always clears the local session, even when the provider cannot be reached.
    pub async fn sign_out(&self) -> Result<()> {
        if let (Some(identity), Some(token)) = (&self.identity, self.access_token()) {
            if let Err(err) = identity.sign_out(&token).await {
                warn!(error = %err, "remote sign-out failed");
            }
        }
        self.vault.clear()?;
        self.set_session(None)?;
        info!("signed out");
        Ok(())
    }
}
