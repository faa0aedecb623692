//! Document snapshot model.
//!
//! A [`DocumentSnapshot`] is the full record of one document: its identity,
//! ownership, access lists and content. The same shape is used by the durable
//! store and by the in-memory snapshot cache of the sync server.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Canonical form of a user identity (an e-mail address).
///
/// Access checks compare identities exactly, so every list that ends up in
/// a snapshot goes through here.
pub fn normalize_identity(identity: &str) -> String {
    identity.trim().to_lowercase()
}

fn normalize_identities<I>(identities: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = String>,
{
    identities
        .into_iter()
        .map(|identity| normalize_identity(&identity))
        .filter(|identity| !identity.is_empty())
        .collect()
}

/// Full record of a single document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentSnapshot {
    /// Opaque identifier, stable for the document's lifetime
    pub id: String,
    /// Identity of the user who created the document
    pub author: String,
    pub title: String,
    /// Identities allowed to open the document
    #[serde(default)]
    pub read_access: BTreeSet<String>,
    /// Identities allowed to edit the document
    #[serde(default)]
    pub write_access: BTreeSet<String>,
    /// Opaque content payload owned by the client application
    #[serde(default)]
    pub data: Value,
}

impl DocumentSnapshot {
    /// Whether `identity` may open the document.
    ///
    /// Writers can always read, and the author can always do both.
    pub fn can_read(&self, identity: &str) -> bool {
        self.author == identity
            || self.read_access.contains(identity)
            || self.write_access.contains(identity)
    }

    /// Whether `identity` may submit edits to the document.
    pub fn can_write(&self, identity: &str) -> bool {
        self.author == identity || self.write_access.contains(identity)
    }

    /// Apply an attribute update in place.
    pub fn apply_attribute(&mut self, attribute: &DocumentAttribute) {
        match attribute {
            DocumentAttribute::Title(title) => self.title = title.clone(),
            DocumentAttribute::Access {
                read_access,
                write_access,
            } => {
                self.read_access = read_access.clone();
                self.write_access = write_access.clone();
            }
        }
    }

    /// Lightweight listing view of this document.
    pub fn summary(&self) -> DocumentSummary {
        DocumentSummary {
            id: self.id.clone(),
            title: self.title.clone(),
        }
    }
}

/// A typed (field, value) pair for metadata updates.
///
/// Content is deliberately not an attribute: it only changes through edits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentAttribute {
    Title(String),
    /// Both access lists are replaced together
    Access {
        read_access: BTreeSet<String>,
        write_access: BTreeSet<String>,
    },
}

impl DocumentAttribute {
    /// Access update with both lists in canonical form
    pub fn access<R, W>(read_access: R, write_access: W) -> Self
    where
        R: IntoIterator<Item = String>,
        W: IntoIterator<Item = String>,
    {
        DocumentAttribute::Access {
            read_access: normalize_identities(read_access),
            write_access: normalize_identities(write_access),
        }
    }

    /// Name of the field this update touches (for logging).
    pub fn field(&self) -> &'static str {
        match self {
            DocumentAttribute::Title(_) => "title",
            DocumentAttribute::Access { .. } => "access",
        }
    }
}

/// Request to create a document.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewDocument {
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub read_access: Option<BTreeSet<String>>,
    #[serde(default)]
    pub write_access: Option<BTreeSet<String>>,
}

impl NewDocument {
    /// Build the stored snapshot for this request under the given id.
    ///
    /// Missing access lists default to the author alone. Identities are
    /// stored in canonical form.
    pub fn into_snapshot(self, id: String) -> DocumentSnapshot {
        let author = normalize_identity(&self.author);
        let author_only = || BTreeSet::from([author.clone()]);
        let read_access = self
            .read_access
            .map(normalize_identities)
            .unwrap_or_else(author_only);
        let write_access = self
            .write_access
            .map(normalize_identities)
            .unwrap_or_else(author_only);

        DocumentSnapshot {
            id,
            author,
            title: self.title,
            read_access,
            write_access,
            data: self.data,
        }
    }
}

/// Listing entry returned by filtered queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentSummary {
    pub id: String,
    pub title: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> DocumentSnapshot {
        NewDocument {
            author: "alice@example.com".to_string(),
            title: "Notes".to_string(),
            data: json!({"ops": []}),
            read_access: Some(BTreeSet::from(["carol@example.com".to_string()])),
            write_access: Some(BTreeSet::from(["bob@example.com".to_string()])),
        }
        .into_snapshot("doc-1".to_string())
    }

    #[test]
    fn test_access_rules() {
        let doc = sample();

        assert!(doc.can_read("alice@example.com"));
        assert!(doc.can_write("alice@example.com"));
        assert!(doc.can_read("bob@example.com"));
        assert!(doc.can_write("bob@example.com"));
        assert!(doc.can_read("carol@example.com"));
        assert!(!doc.can_write("carol@example.com"));
        assert!(!doc.can_read("mallory@example.com"));
    }

    #[test]
    fn test_missing_access_lists_default_to_author() {
        let doc = NewDocument {
            author: "alice@example.com".to_string(),
            ..Default::default()
        }
        .into_snapshot("doc-2".to_string());

        assert_eq!(doc.read_access, BTreeSet::from(["alice@example.com".to_string()]));
        assert_eq!(doc.write_access, BTreeSet::from(["alice@example.com".to_string()]));
    }

    #[test]
    fn test_identities_are_normalized() {
        let doc = NewDocument {
            author: " Alice@Example.com".to_string(),
            read_access: Some(BTreeSet::from(["Carol@Example.COM".to_string(), " ".to_string()])),
            ..Default::default()
        }
        .into_snapshot("doc-3".to_string());

        assert_eq!(doc.author, "alice@example.com");
        assert_eq!(doc.read_access, BTreeSet::from(["carol@example.com".to_string()]));
        assert_eq!(doc.write_access, BTreeSet::from(["alice@example.com".to_string()]));

        let update = DocumentAttribute::access(
            ["Dave@Example.com".to_string()],
            vec!["  BOB@example.com ".to_string()],
        );
        assert_eq!(
            update,
            DocumentAttribute::Access {
                read_access: BTreeSet::from(["dave@example.com".to_string()]),
                write_access: BTreeSet::from(["bob@example.com".to_string()]),
            }
        );
    }

    #[test]
    fn test_apply_attribute() {
        let mut doc = sample();

        doc.apply_attribute(&DocumentAttribute::Title("Renamed".to_string()));
        assert_eq!(doc.title, "Renamed");

        doc.apply_attribute(&DocumentAttribute::Access {
            read_access: BTreeSet::new(),
            write_access: BTreeSet::from(["dave@example.com".to_string()]),
        });
        assert!(!doc.can_read("carol@example.com"));
        assert!(doc.can_write("dave@example.com"));
        // Content is untouched by attribute updates
        assert_eq!(doc.data, json!({"ops": []}));
    }

    #[test]
    fn test_wire_field_names() {
        let value = serde_json::to_value(sample()).unwrap();
        assert!(value.get("readAccess").is_some());
        assert!(value.get("writeAccess").is_some());

        let parsed: NewDocument = serde_json::from_value(json!({
            "title": "From client",
            "readAccess": ["x@example.com"],
        }))
        .unwrap();
        assert_eq!(parsed.title, "From client");
        assert!(parsed.write_access.is_none());
    }
}
