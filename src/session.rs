//! Auth session handling
//!
//! The auth provider reports sign-in and sign-out; this module turns those
//! into profile loads and cache pinning. Sign-out never deletes stored
//! profiles: the local replica stays until retention evicts it.

use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::error::{Result, SyncError};
use crate::profile::{AuthUser, ProfileRecord};
use crate::profile_store::ProfileStore;

pub struct Session {
    store: Arc<ProfileStore>,
    current: RwLock<Option<String>>,
}

impl Session {
    pub fn new(store: Arc<ProfileStore>) -> Self {
        Self {
            store,
            current: RwLock::new(None),
        }
    }

    /// Signed-in user id, if any
    pub async fn current_user(&self) -> Option<String> {
        self.current.read().await.clone()
    }

    /// React to the auth provider's state change.
    ///
    /// Sign-in loads (or creates) the profile and pins it in the cache.
    /// Returns the signed-in user's profile, or `None` after sign-out or when
    /// no store can be reached on a first sign-in.
    pub async fn on_auth_state_changed(
        &self,
        user: Option<AuthUser>,
    ) -> Result<Option<ProfileRecord>> {
        let previous = self.current.read().await.clone();

        match user {
            None => {
                if let Some(user_id) = previous {
                    self.sign_out(&user_id).await;
                }
                Ok(None)
            }
            Some(user) => {
                if let Some(ref prev) = previous {
                    if *prev != user.user_id {
                        self.sign_out(prev).await;
                    }
                }

                *self.current.write().await = Some(user.user_id.clone());
                self.store.pin(&user.user_id).await;
                info!(user_id = %user.user_id, "Signed in");

                match self.store.initialize(&user).await {
                    Ok(record) => Ok(Some(record)),
                    Err(SyncError::AllStoresFailed { failed })
                    | Err(SyncError::BaseUnavailable { failed, .. }) => {
                        warn!(user_id = %user.user_id, ?failed, "Profile stores unreachable at sign-in");
                        // A default record whose write failed is still in the cache.
                        self.store.get(&user.user_id).await.or(Ok(None))
                    }
                    Err(e) => Err(e),
                }
            }
        }
    }

    async fn sign_out(&self, user_id: &str) {
        self.store.unpin(user_id).await;
        self.store.invalidate(user_id).await;
        let mut current = self.current.write().await;
        if current.as_deref() == Some(user_id) {
            *current = None;
        }
        info!(user_id, "Signed out");
    }
}
