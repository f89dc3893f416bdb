//! Partial profile edits

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::validation;
use super::{ContactInfo, Platform, ProfileRecord, Theme};
use crate::error::Result;

/// Fields a user may change. `None` leaves the field untouched.
///
/// `social_links` and `contact_info` replace the whole mapping when present.
/// `photo_ref: Some(None)` clears the photo.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfilePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo_ref: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub social_links: Option<BTreeMap<Platform, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_info: Option<ContactInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub theme: Option<Theme>,
}

impl ProfilePatch {
    pub fn display_name(mut self, value: impl Into<String>) -> Self {
        self.display_name = Some(value.into());
        self
    }

    pub fn username(mut self, value: impl Into<String>) -> Self {
        self.username = Some(value.into());
        self
    }

    pub fn bio(mut self, value: impl Into<String>) -> Self {
        self.bio = Some(value.into());
        self
    }

    pub fn photo_ref(mut self, value: Option<String>) -> Self {
        self.photo_ref = Some(value);
        self
    }

    pub fn social_links(mut self, links: BTreeMap<Platform, String>) -> Self {
        self.social_links = Some(links);
        self
    }

    pub fn contact_info(mut self, contact: ContactInfo) -> Self {
        self.contact_info = Some(contact);
        self
    }

    pub fn theme(mut self, theme: Theme) -> Self {
        self.theme = Some(theme);
        self
    }

    pub fn is_empty(&self) -> bool {
        *self == ProfilePatch::default()
    }

    /// Username this patch would set, lowercased.
    pub fn normalized_username(&self) -> Option<String> {
        self.username.as_ref().map(|u| u.trim().to_lowercase())
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(ref name) = self.display_name {
            validation::validate_display_name(name)?;
        }
        if let Some(username) = self.normalized_username() {
            validation::validate_username(&username)?;
        }
        if let Some(ref bio) = self.bio {
            validation::validate_bio(bio)?;
        }
        if let Some(Some(ref photo)) = self.photo_ref {
            validation::validate_link(photo)?;
        }
        if let Some(ref links) = self.social_links {
            for link in links.values() {
                validation::validate_link(link)?;
            }
        }
        if let Some(ref contact) = self.contact_info {
            if let Some(ref email) = contact.email {
                validation::validate_email(email)?;
            }
            if let Some(ref website) = contact.website {
                validation::validate_link(website)?;
            }
        }
        Ok(())
    }

    /// Merge into `record`. Does not touch `updated_at` or the social graph.
    pub fn apply(&self, record: &mut ProfileRecord) {
        if let Some(ref name) = self.display_name {
            record.display_name = name.clone();
        }
        if let Some(username) = self.normalized_username() {
            record.username = username;
        }
        if let Some(ref bio) = self.bio {
            record.bio = bio.clone();
        }
        if let Some(ref photo) = self.photo_ref {
            record.photo_ref = photo.clone();
        }
        if let Some(ref links) = self.social_links {
            record.social_links = links.clone();
        }
        if let Some(ref contact) = self.contact_info {
            record.contact_info = contact.clone();
        }
        if let Some(theme) = self.theme {
            record.theme = theme;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_only_touches_set_fields() {
        let mut record = ProfileRecord::new("u1");
        record.display_name = "Alice".into();
        record.bio = "old".into();
        record.followers.insert("u2".into());
        record.updated_at = 42;

        ProfilePatch::default().bio("new").apply(&mut record);

        assert_eq!(record.bio, "new");
        assert_eq!(record.display_name, "Alice");
        assert!(record.followers.contains("u2"));
        assert_eq!(record.updated_at, 42);
    }

    #[test]
    fn test_username_is_lowercased() {
        let mut record = ProfileRecord::new("u1");
        let patch = ProfilePatch::default().username("  Alice ");
        patch.validate().unwrap();
        patch.apply(&mut record);
        assert_eq!(record.username, "alice");
    }

    #[test]
    fn test_links_replace_whole_map() {
        let mut record = ProfileRecord::new("u1");
        record
            .social_links
            .insert(Platform::Twitter, "https://twitter.com/a".into());

        let mut links = BTreeMap::new();
        links.insert(Platform::Github, "https://github.com/a".into());
        ProfilePatch::default().social_links(links).apply(&mut record);

        assert_eq!(record.social_links.len(), 1);
        assert!(record.social_links.contains_key(&Platform::Github));
    }

    #[test]
    fn test_clear_photo() {
        let mut record = ProfileRecord::new("u1");
        record.photo_ref = Some("https://cdn.example.com/p.png".into());
        ProfilePatch::default().photo_ref(None).apply(&mut record);
        assert!(record.photo_ref.is_none());
    }

    #[test]
    fn test_validate_rejects_bad_link() {
        let mut links = BTreeMap::new();
        links.insert(Platform::Instagram, "ftp://nope".into());
        assert!(ProfilePatch::default().social_links(links).validate().is_err());
    }

    #[test]
    fn test_patch_json_is_sparse() {
        let patch = ProfilePatch::default().theme(Theme::Dark);
        let json = serde_json::to_string(&patch).unwrap();
        assert_eq!(json, r#"{"theme":"dark"}"#);
        assert!(!patch.is_empty());
        assert!(ProfilePatch::default().is_empty());
    }
}
