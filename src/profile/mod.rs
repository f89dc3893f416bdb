//! Profile record model
//!
//! Handles:
//! - The `ProfileRecord` every store persists
//! - Partial edits (`ProfilePatch`) and their validation
//! - Default records for first sign-in

pub mod patch;
pub mod validation;

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

pub use patch::ProfilePatch;

/// Social platforms a profile can link to
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Instagram,
    Twitter,
    Facebook,
    Linkedin,
    Tiktok,
    Youtube,
    Github,
    Snapchat,
    Whatsapp,
    Telegram,
    Website,
}

/// Display theme for the public profile page
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Light,
    Dark,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
}

/// A user's profile. Every backing store holds a replica of this.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileRecord {
    /// Stable identifier from the auth provider
    pub user_id: String,

    #[serde(default)]
    pub display_name: String,

    /// Lowercase, unique across all records
    #[serde(default)]
    pub username: String,

    #[serde(default)]
    pub bio: String,

    /// URI of an externally stored image
    #[serde(default)]
    pub photo_ref: Option<String>,

    #[serde(default)]
    pub social_links: BTreeMap<Platform, String>,

    #[serde(default)]
    pub contact_info: ContactInfo,

    #[serde(default)]
    pub theme: Theme,

    /// Logical write time (Unix millis). Sole basis for conflict resolution.
    pub updated_at: u64,

    #[serde(default)]
    pub followers: BTreeSet<String>,

    #[serde(default)]
    pub following: BTreeSet<String>,
}

impl ProfileRecord {
    /// Empty record for a user. `updated_at` of zero loses to any real write.
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            display_name: String::new(),
            username: String::new(),
            bio: String::new(),
            photo_ref: None,
            social_links: BTreeMap::new(),
            contact_info: ContactInfo::default(),
            theme: Theme::Light,
            updated_at: 0,
            followers: BTreeSet::new(),
            following: BTreeSet::new(),
        }
    }

    /// Default-populated record for a user signing in for the first time.
    pub fn from_auth(user: &AuthUser) -> Self {
        let mut record = Self::new(user.user_id.clone());
        record.display_name = user
            .display_name
            .clone()
            .unwrap_or_default()
            .chars()
            .take(validation::MAX_DISPLAY_NAME_CHARS)
            .collect();
        record.username = user
            .email
            .as_deref()
            .map(validation::username_from_email)
            .unwrap_or_default();
        record.photo_ref = user.avatar_uri.clone();
        record.contact_info.email = user.email.clone();
        record
    }

    /// True if `self` should replace `other` as the current replica.
    pub fn is_newer_than(&self, other: &ProfileRecord) -> bool {
        self.updated_at > other.updated_at
    }
}

/// Identity handed over by the external auth provider on sign-in
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUser {
    pub user_id: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub avatar_uri: Option<String>,
}
