//! Attachment metadata carried alongside a revision.
//!
//! The graft algorithm never looks at attachments. The store writes them in
//! the same transaction as the revision they belong to, so a revision is
//! never visible with a dangling attachment reference.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Attachments of one revision, by name.
pub type Attachments = BTreeMap<String, Attachment>;

/// Metadata describing stored attachment bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentStub {
    pub content_type: String,
    /// Length of the stored bytes
    pub length: u64,
    /// Content address, `sha256-<hex>`
    pub digest: String,
    /// Transfer encoding reported by the peer (e.g. `gzip`), if any
    pub encoding: Option<String>,
}

/// An attachment supplied with a revision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attachment {
    /// Bytes not yet in the store. Written under their digest on insert.
    Unsaved { content_type: String, data: Vec<u8> },
    /// Reference to bytes the store already holds.
    Saved(AttachmentStub),
}

impl Attachment {
    pub fn unsaved(content_type: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Attachment::Unsaved {
            content_type: content_type.into(),
            data: data.into(),
        }
    }

    /// The stub this attachment will be recorded as.
    pub fn stub(&self) -> AttachmentStub {
        match self {
            Attachment::Unsaved { content_type, data } => AttachmentStub {
                content_type: content_type.clone(),
                length: data.len() as u64,
                digest: digest_of(data),
                encoding: None,
            },
            Attachment::Saved(stub) => stub.clone(),
        }
    }
}

/// Content address of attachment bytes.
pub fn digest_of(data: &[u8]) -> String {
    format!("sha256-{}", hex::encode(Sha256::digest(data)))
}
