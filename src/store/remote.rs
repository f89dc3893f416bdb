//! Remote adapters - HTTP clients for the two remote profile databases
//!
//! Each remote speaks its own schema; this module only translates field names
//! and encodings between `ProfileRecord` and the remote's native shape.
//!
//! ```text
//! relational  GET  {base}/rest/v1/profiles?user_id=eq.{id}
//!             POST {base}/rest/v1/profiles   (Prefer: resolution=merge-duplicates)
//!             GET  {base}/rest/v1/profiles?username=eq.{name}
//!
//! document    GET  {base}/users/{id}
//!             PUT  {base}/users/{id}
//!             GET  {base}/users?username={name}
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use reqwest::{header, Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

use super::{BackingStore, StoreId};
use crate::config::RemoteConfig;
use crate::error::{Result, SyncError};
use crate::profile::{ContactInfo, Platform, ProfileRecord, Theme};

/// Native schema of a remote database
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteSchema {
    /// Row-oriented REST table with snake_case columns
    Relational,
    /// Document collection with camelCase fields
    Document,
}

// ============================================================================
// Relational schema
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileRow {
    pub user_id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub social_links: BTreeMap<Platform, String>,
    #[serde(default)]
    pub contact_info: ContactInfo,
    #[serde(default)]
    pub theme: Theme,
    /// RFC 3339 with millisecond precision
    pub updated_at: String,
    #[serde(default)]
    pub followers: Vec<String>,
    #[serde(default)]
    pub following: Vec<String>,
}

impl From<&ProfileRecord> for ProfileRow {
    fn from(record: &ProfileRecord) -> Self {
        Self {
            user_id: record.user_id.clone(),
            display_name: non_empty(&record.display_name),
            username: non_empty(&record.username),
            bio: non_empty(&record.bio),
            avatar_url: record.photo_ref.clone(),
            social_links: record.social_links.clone(),
            contact_info: record.contact_info.clone(),
            theme: record.theme,
            updated_at: millis_to_rfc3339(record.updated_at),
            followers: record.followers.iter().cloned().collect(),
            following: record.following.iter().cloned().collect(),
        }
    }
}

impl TryFrom<ProfileRow> for ProfileRecord {
    type Error = SyncError;

    fn try_from(row: ProfileRow) -> Result<Self> {
        Ok(Self {
            updated_at: rfc3339_to_millis(&row.updated_at)?,
            user_id: row.user_id,
            display_name: row.display_name.unwrap_or_default(),
            username: row.username.unwrap_or_default(),
            bio: row.bio.unwrap_or_default(),
            photo_ref: row.avatar_url,
            social_links: row.social_links,
            contact_info: row.contact_info,
            theme: row.theme,
            followers: row.followers.into_iter().collect(),
            following: row.following.into_iter().collect(),
        })
    }
}

// ============================================================================
// Document schema
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserDocument {
    pub uid: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub bio: String,
    #[serde(default, rename = "photoURL")]
    pub photo_url: Option<String>,
    #[serde(default)]
    pub social_links: BTreeMap<Platform, String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub website: Option<String>,
    #[serde(default)]
    pub theme: Theme,
    /// Unix millis
    pub updated_at: u64,
    #[serde(default)]
    pub followers: BTreeSet<String>,
    #[serde(default)]
    pub following: BTreeSet<String>,
}

impl From<&ProfileRecord> for UserDocument {
    fn from(record: &ProfileRecord) -> Self {
        Self {
            uid: record.user_id.clone(),
            display_name: record.display_name.clone(),
            username: record.username.clone(),
            bio: record.bio.clone(),
            photo_url: record.photo_ref.clone(),
            social_links: record.social_links.clone(),
            phone: record.contact_info.phone.clone(),
            email: record.contact_info.email.clone(),
            website: record.contact_info.website.clone(),
            theme: record.theme,
            updated_at: record.updated_at,
            followers: record.followers.clone(),
            following: record.following.clone(),
        }
    }
}

impl From<UserDocument> for ProfileRecord {
    fn from(doc: UserDocument) -> Self {
        Self {
            user_id: doc.uid,
            display_name: doc.display_name,
            username: doc.username,
            bio: doc.bio,
            photo_ref: doc.photo_url,
            social_links: doc.social_links,
            contact_info: ContactInfo {
                phone: doc.phone,
                email: doc.email,
                website: doc.website,
            },
            theme: doc.theme,
            updated_at: doc.updated_at,
            followers: doc.followers,
            following: doc.following,
        }
    }
}

// ============================================================================
// Client
// ============================================================================

/// HTTP adapter for one remote profile database
pub struct RemoteStore {
    id: StoreId,
    schema: RemoteSchema,
    base_url: Url,
    client: Client,
}

impl RemoteStore {
    pub fn new(id: StoreId, config: &RemoteConfig) -> Result<Self> {
        let base_url = Url::parse(&config.base_url)
            .map_err(|e| SyncError::Config(format!("{} base_url: {}", id, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(SyncError::Config(format!(
                "{} base_url '{}' cannot be a base",
                id, config.base_url
            )));
        }

        let mut headers = header::HeaderMap::new();
        if let Some(ref api_key) = config.api_key {
            let value = header::HeaderValue::from_str(&format!("Bearer {}", api_key))
                .map_err(|e| SyncError::Config(format!("{} api_key: {}", id, e)))?;
            headers.insert(header::AUTHORIZATION, value);
        }

        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()?;

        Ok(Self {
            id,
            schema: config.schema,
            base_url,
            client,
        })
    }

    pub fn schema(&self) -> RemoteSchema {
        self.schema
    }

    /// Reachability probe. Any HTTP answer counts as online.
    pub async fn is_reachable(&self) -> bool {
        match self.client.get(self.base_url.clone()).send().await {
            Ok(_) => true,
            Err(e) => {
                debug!(store = %self.id, error = %e, "Remote unreachable");
                false
            }
        }
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn table_url(&self) -> Url {
        self.endpoint(&["rest", "v1", "profiles"])
    }

    async fn check_status(&self, response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        warn!(store = %self.id, %status, "Remote rejected request");
        Err(SyncError::unavailable(
            self.id,
            format!("HTTP {}: {}", status.as_u16(), body),
        ))
    }

    async fn query_rows(&self, column: &str, value: &str) -> Result<Option<ProfileRecord>> {
        let response = self
            .client
            .get(self.table_url())
            .query(&[(column, format!("eq.{}", value)), ("select", "*".to_string())])
            .send()
            .await
            .map_err(|e| SyncError::unavailable(self.id, e))?;
        let rows: Vec<ProfileRow> = self
            .check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| SyncError::unavailable(self.id, e))?;
        rows.into_iter()
            .next()
            .map(ProfileRecord::try_from)
            .transpose()
    }
}

#[async_trait]
impl BackingStore for RemoteStore {
    fn id(&self) -> StoreId {
        self.id
    }

    async fn get_record(&self, user_id: &str) -> Result<Option<ProfileRecord>> {
        match self.schema {
            RemoteSchema::Relational => self.query_rows("user_id", user_id).await,
            RemoteSchema::Document => {
                let response = self
                    .client
                    .get(self.endpoint(&["users", user_id]))
                    .send()
                    .await
                    .map_err(|e| SyncError::unavailable(self.id, e))?;
                if response.status() == StatusCode::NOT_FOUND {
                    return Ok(None);
                }
                let doc: UserDocument = self
                    .check_status(response)
                    .await?
                    .json()
                    .await
                    .map_err(|e| SyncError::unavailable(self.id, e))?;
                Ok(Some(doc.into()))
            }
        }
    }

    async fn put_record(&self, record: &ProfileRecord) -> Result<()> {
        let request = match self.schema {
            RemoteSchema::Relational => self
                .client
                .post(self.table_url())
                .header("Prefer", "resolution=merge-duplicates")
                .json(&[ProfileRow::from(record)]),
            RemoteSchema::Document => self
                .client
                .put(self.endpoint(&["users", &record.user_id]))
                .json(&UserDocument::from(record)),
        };

        let response = request
            .send()
            .await
            .map_err(|e| SyncError::unavailable(self.id, e))?;
        self.check_status(response).await?;
        debug!(store = %self.id, user_id = %record.user_id, "Remote profile saved");
        Ok(())
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<ProfileRecord>> {
        match self.schema {
            RemoteSchema::Relational => self.query_rows("username", username).await,
            RemoteSchema::Document => {
                let response = self
                    .client
                    .get(self.endpoint(&["users"]))
                    .query(&[("username", username)])
                    .send()
                    .await
                    .map_err(|e| SyncError::unavailable(self.id, e))?;
                let docs: Vec<UserDocument> = self
                    .check_status(response)
                    .await?
                    .json()
                    .await
                    .map_err(|e| SyncError::unavailable(self.id, e))?;
                Ok(docs.into_iter().next().map(ProfileRecord::from))
            }
        }
    }
}

fn non_empty(s: &str) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

fn millis_to_rfc3339(millis: u64) -> String {
    let dt = Utc
        .timestamp_millis_opt(millis as i64)
        .single()
        .unwrap_or_default();
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn rfc3339_to_millis(value: &str) -> Result<u64> {
    let dt = DateTime::parse_from_rfc3339(value)
        .map_err(|e| SyncError::Serialization(format!("updated_at '{}': {}", value, e)))?;
    Ok(dt.timestamp_millis().max(0) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> ProfileRecord {
        let mut record = ProfileRecord::new("u1");
        record.display_name = "Alice".into();
        record.username = "alice".into();
        record.photo_ref = Some("https://cdn.example.com/a.png".into());
        record
            .social_links
            .insert(Platform::Instagram, "https://instagram.com/alice".into());
        record.contact_info.email = Some("alice@example.com".into());
        record.theme = Theme::Dark;
        record.updated_at = 1_700_000_000_123;
        record.followers.insert("u2".into());
        record
    }

    #[test]
    fn test_relational_row_uses_native_names() {
        let row = ProfileRow::from(&sample());
        let json = serde_json::to_value(&row).unwrap();
        assert_eq!(json["user_id"], "u1");
        assert_eq!(json["avatar_url"], "https://cdn.example.com/a.png");
        assert_eq!(json["updated_at"], "2023-11-14T22:13:20.123Z");
        assert_eq!(json["theme"], "dark");
        assert_eq!(json["social_links"]["instagram"], "https://instagram.com/alice");
        assert_eq!(ProfileRecord::try_from(row).unwrap(), sample());
    }

    #[test]
    fn test_relational_row_tolerates_nulls() {
        let row: ProfileRow = serde_json::from_value(json!({
            "user_id": "u9",
            "display_name": null,
            "updated_at": "2024-01-01T00:00:00Z"
        }))
        .unwrap();
        let record = ProfileRecord::try_from(row).unwrap();
        assert_eq!(record.display_name, "");
        assert_eq!(record.updated_at, 1_704_067_200_000);
        assert!(record.social_links.is_empty());
    }

    #[test]
    fn test_relational_row_rejects_bad_timestamp() {
        let row: ProfileRow = serde_json::from_value(json!({
            "user_id": "u9",
            "updated_at": "yesterday"
        }))
        .unwrap();
        assert!(matches!(
            ProfileRecord::try_from(row),
            Err(SyncError::Serialization(_))
        ));
    }

    #[test]
    fn test_document_uses_camel_case_and_flat_contact() {
        let doc = UserDocument::from(&sample());
        let json = serde_json::to_value(&doc).unwrap();
        assert_eq!(json["uid"], "u1");
        assert_eq!(json["displayName"], "Alice");
        assert_eq!(json["photoURL"], "https://cdn.example.com/a.png");
        assert_eq!(json["email"], "alice@example.com");
        assert_eq!(json["updatedAt"], 1_700_000_000_123u64);
        assert_eq!(ProfileRecord::from(doc), sample());
    }

    #[test]
    fn test_endpoint_building_keeps_base_path() {
        let store = RemoteStore::new(
            StoreId::Secondary,
            &RemoteConfig {
                base_url: "https://db.example.com/v1/".into(),
                api_key: Some("secret".into()),
                schema: RemoteSchema::Document,
                request_timeout_ms: 1_000,
            },
        )
        .unwrap();
        assert_eq!(
            store.endpoint(&["users", "a b"]).as_str(),
            "https://db.example.com/v1/users/a%20b"
        );
    }

    #[test]
    fn test_rejects_invalid_base_url() {
        let result = RemoteStore::new(
            StoreId::Primary,
            &RemoteConfig {
                base_url: "not a url".into(),
                api_key: None,
                schema: RemoteSchema::Relational,
                request_timeout_ms: 1_000,
            },
        );
        assert!(matches!(result, Err(SyncError::Config(_))));
    }
}
