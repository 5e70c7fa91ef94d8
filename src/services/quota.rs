use anyhow::Result;
use tracing::{info, warn};

use crate::models::{AuthUser, UserProfile};
use crate::services::store::ProfileStore;
use crate::utils::now_rfc3339;

pub const FREE_UPLOAD_LIMIT: u32 = 5;

/// Free-tier gate over the per-user upload counter.
#[derive(Debug, Clone, Copy)]
pub struct QuotaGate {
    limit: u32,
}

impl QuotaGate {
    pub fn new(limit: u32) -> Self {
        QuotaGate { limit }
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn can_upload(&self, profile: Option<&UserProfile>) -> bool {
        match profile {
            None => false,
            Some(profile) if profile.has_paid => true,
            Some(profile) => profile.upload_count < self.limit,
        }
    }

    /// `None` means unlimited.
    pub fn remaining_uploads(&self, profile: Option<&UserProfile>) -> Option<u32> {
        match profile {
            None => Some(0),
            Some(profile) if profile.has_paid => None,
            Some(profile) => Some(self.limit.saturating_sub(profile.upload_count)),
        }
    }

    /// Bumps the counter by one unless the gate is closed.
    ///
    /// This is a plain read-modify-write against the store: two sessions
    /// incrementing at the same moment can lose an update.
    pub async fn increment_upload_count(
        &self,
        store: &dyn ProfileStore,
        profile: &UserProfile,
    ) -> Result<Option<UserProfile>> {
        if !self.can_upload(Some(profile)) {
            return Ok(None);
        }

        let mut updated = profile.clone();
        updated.upload_count = profile.upload_count + 1;
        updated.updated_at = now_rfc3339();
        store
            .set_upload_count(&updated.uid, updated.upload_count, &updated.updated_at)
            .await?;
        info!(uid = %updated.uid, count = updated.upload_count, "upload counted");
        Ok(Some(updated))
    }
}

impl Default for QuotaGate {
    fn default() -> Self {
        QuotaGate::new(FREE_UPLOAD_LIMIT)
    }
}

pub async fn fetch_or_create_profile(
    store: &dyn ProfileStore,
    user: &AuthUser,
) -> Result<UserProfile> {
    if let Some(profile) = store.get(&user.id).await? {
        return Ok(profile);
    }

    let now = now_rfc3339();
    let profile = UserProfile {
        uid: user.id.clone(),
        email: user.email.clone(),
        display_name: user.display_name.clone(),
        photo_url: user.photo_url.clone(),
        upload_count: 0,
        has_paid: false,
        created_at: now.clone(),
        updated_at: now,
    };
    if let Err(err) = store.create(&profile).await {
        warn!(uid = %user.id, error = %err, "failed to create profile");
        return Err(err);
    }
    info!(uid = %user.id, "created upload profile");
    Ok(profile)
}
