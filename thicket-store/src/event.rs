//! Notifications produced by successful grafts.
//!
//! Events are returned to the caller once the transaction that produced
//! them has committed. The engine holds no subscribers; dispatching them to
//! indexers or listeners is the caller's job.

use crate::revision::Revision;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentEvent {
    /// First revision history of a document was stored
    Created { revision: Revision },
    /// A new leaf became the document's current revision
    Updated {
        previous: Option<Revision>,
        revision: Revision,
    },
    /// A branch grew but its leaf lost to the existing winner
    ConflictRecorded { revision: Revision, winner: Revision },
}

impl DocumentEvent {
    pub fn document_id(&self) -> &str {
        &self.revision().document_id
    }

    /// The newly inserted leaf.
    pub fn revision(&self) -> &Revision {
        match self {
            DocumentEvent::Created { revision }
            | DocumentEvent::Updated { revision, .. }
            | DocumentEvent::ConflictRecorded { revision, .. } => revision,
        }
    }

    /// Whether the event changed the document's visible content.
    pub fn changes_current(&self) -> bool {
        !matches!(self, DocumentEvent::ConflictRecorded { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::DocumentBody;
    use crate::revision::RevisionId;

    fn rev(id: &str) -> Revision {
        Revision {
            document_id: "doc1".into(),
            id: RevisionId::parse(id).unwrap(),
            sequence: 1,
            parent_sequence: None,
            body: DocumentBody::empty(),
            deleted: false,
            current: true,
            available: true,
        }
    }

    #[test]
    fn test_accessors() {
        let created = DocumentEvent::Created { revision: rev("1-a") };
        assert_eq!(created.document_id(), "doc1");
        assert!(created.changes_current());

        let conflict = DocumentEvent::ConflictRecorded {
            revision: rev("2-a"),
            winner: rev("2-b"),
        };
        assert_eq!(conflict.revision().id.to_string(), "2-a");
        assert!(!conflict.changes_current());
    }
}
