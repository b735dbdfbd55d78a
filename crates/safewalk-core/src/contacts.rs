//! Emergency contact profile.
//!
//! Contacts are phone numbers of exactly 10 digits. Validation happens here,
//! before a value reaches the key-value store, so the dispatcher can trust
//! whatever it reads back.

use std::fmt;
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use crate::storage::{KeyValueStore, StoreError, StoreKey};

static CONTACT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[0-9]{10}$").expect("valid regex"));

/// Returns `true` if `value` is a 10-digit phone number.
#[must_use]
pub fn is_valid_contact(value: &str) -> bool {
    CONTACT_RE.is_match(value)
}

/// Errors raised while reading or writing the profile.
#[derive(Debug, Error)]
pub enum ContactError {
    /// A contact number failed validation.
    #[error("invalid contact for {field}: '{value}'")]
    Invalid {
        /// Profile field that was rejected.
        field: &'static str,
        /// The rejected value.
        value: String,
    },

    /// The underlying store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A validated emergency contact phone number.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Contact(String);

impl Contact {
    /// Validate and wrap a phone number.
    ///
    /// # Errors
    ///
    /// Returns [`ContactError::Invalid`] unless `value` is exactly 10 digits.
    pub fn parse(value: impl Into<String>) -> Result<Self, ContactError> {
        let value = value.into();
        if is_valid_contact(&value) {
            Ok(Self(value))
        } else {
            Err(ContactError::Invalid {
                field: "contact",
                value,
            })
        }
    }

    /// The phone number.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Contact {
    type Error = ContactError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<Contact> for String {
    fn from(contact: Contact) -> Self {
        contact.0
    }
}

impl fmt::Display for Contact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The user profile: sender name plus two optional contacts.
///
/// Empty strings mean "not set", matching what the store holds for a blank form field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Profile {
    /// Name shown in the alert message.
    #[schema(example = "Alex")]
    pub username: String,

    /// First emergency contact, 10 digits or empty.
    #[schema(example = "5551234567")]
    pub contact1: String,

    /// Second emergency contact, 10 digits or empty.
    #[schema(example = "5559876543")]
    pub contact2: String,
}

impl Profile {
    /// Check every non-empty contact.
    ///
    /// # Errors
    ///
    /// Returns [`ContactError::Invalid`] naming the first rejected field.
    pub fn validate(&self) -> Result<(), ContactError> {
        for (field, value) in [("contact1", &self.contact1), ("contact2", &self.contact2)] {
            if !value.is_empty() && !is_valid_contact(value) {
                return Err(ContactError::Invalid {
                    field,
                    value: value.clone(),
                });
            }
        }
        Ok(())
    }

    /// Contacts in profile order, possibly empty strings.
    #[must_use]
    pub fn contacts(&self) -> [&str; 2] {
        [&self.contact1, &self.contact2]
    }
}

/// Reads and writes the [`Profile`] through a [`KeyValueStore`].
#[derive(Clone)]
pub struct ProfileStore {
    store: Arc<dyn KeyValueStore>,
}

impl ProfileStore {
    /// Wrap a key-value store.
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Load the profile; missing keys read as empty strings.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn load(&self) -> Result<Profile, ContactError> {
        let read = |key| -> Result<String, ContactError> {
            Ok(self.store.get(key)?.unwrap_or_default())
        };
        Ok(Profile {
            username: read(StoreKey::Username)?,
            contact1: read(StoreKey::Contact1)?,
            contact2: read(StoreKey::Contact2)?,
        })
    }

    /// Validate and save the profile. Contacts are trimmed before validation.
    ///
    /// # Errors
    ///
    /// Returns [`ContactError::Invalid`] without writing anything if a contact is
    /// malformed, or a store error.
    pub fn save(&self, profile: &Profile) -> Result<Profile, ContactError> {
        let profile = Profile {
            username: profile.username.trim().to_string(),
            contact1: profile.contact1.trim().to_string(),
            contact2: profile.contact2.trim().to_string(),
        };
        profile.validate()?;

        self.store.set_many(&[
            (StoreKey::Username, profile.username.as_str()),
            (StoreKey::Contact1, profile.contact1.as_str()),
            (StoreKey::Contact2, profile.contact2.as_str()),
        ])?;
        tracing::info!(
            contacts = profile.contacts().iter().filter(|c| !c.is_empty()).count(),
            "Profile saved"
        );
        Ok(profile)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{FileStore, MemoryStore};

    #[test]
    fn test_contact_validation() {
        assert!(is_valid_contact("5551234567"));
        assert!(!is_valid_contact("555123456"));
        assert!(!is_valid_contact("55512345678"));
        assert!(!is_valid_contact("555-123-456"));
        assert!(!is_valid_contact(""));
        assert!(!is_valid_contact("555123456a"));
    }

    #[test]
    fn test_contact_parse() {
        assert_eq!(Contact::parse("5551234567").unwrap().as_str(), "5551234567");
        assert!(matches!(
            Contact::parse("12345"),
            Err(ContactError::Invalid { .. })
        ));
    }

    #[test]
    fn test_contact_deserialize_validates() {
        let ok: Result<Contact, _> = serde_json::from_str("\"5551234567\"");
        assert!(ok.is_ok());
        let bad: Result<Contact, _> = serde_json::from_str("\"call me\"");
        assert!(bad.is_err());
    }

    #[test]
    fn test_profile_allows_blank_contacts() {
        let profile = Profile {
            username: "Alex".into(),
            contact1: "5551234567".into(),
            contact2: String::new(),
        };
        assert!(profile.validate().is_ok());
    }

    #[test]
    fn test_profile_store_roundtrip() {
        let store = ProfileStore::new(Arc::new(MemoryStore::new()));
        assert_eq!(store.load().unwrap(), Profile::default());

        let saved = store
            .save(&Profile {
                username: "  Alex ".into(),
                contact1: " 5551234567".into(),
                contact2: "5559876543".into(),
            })
            .unwrap();
        assert_eq!(saved.username, "Alex");
        assert_eq!(store.load().unwrap(), saved);
    }

    #[test]
    fn test_profile_store_failed_write_keeps_previous_profile() {
        let dir = tempfile::TempDir::new().unwrap();
        let data_dir = dir.path().join("data");
        let store = ProfileStore::new(Arc::new(FileStore::open(&data_dir).unwrap()));
        let first = store
            .save(&Profile {
                username: "Alex".into(),
                contact1: "5551234567".into(),
                contact2: String::new(),
            })
            .unwrap();

        std::fs::remove_dir_all(&data_dir).unwrap();
        std::fs::write(&data_dir, "not a directory").unwrap();
        let result = store.save(&Profile {
            username: "Sam".into(),
            contact1: "5559876543".into(),
            contact2: "5550001111".into(),
        });
        assert!(result.is_err());
        assert_eq!(store.load().unwrap(), first);
    }

    #[test]
    fn test_profile_store_rejects_invalid_without_writing() {
        let kv = Arc::new(MemoryStore::new());
        let store = ProfileStore::new(kv.clone());

        let err = store
            .save(&Profile {
                username: "Alex".into(),
                contact1: "5551234567".into(),
                contact2: "12".into(),
            })
            .unwrap_err();
        assert!(matches!(err, ContactError::Invalid { field: "contact2", .. }));
        assert!(kv.get(StoreKey::Username).unwrap().is_none());
    }
}
