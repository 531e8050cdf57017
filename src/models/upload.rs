//! Image files on their way into object storage.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// A file picked by the user: original name, declared MIME type and content.
#[derive(Clone, Debug, PartialEq)]
pub struct ImageFile {
    pub name: String,
    pub content_type: String,
    pub bytes: Bytes,
}

impl ImageFile {
    pub fn new(
        name: impl Into<String>,
        content_type: impl Into<String>,
        bytes: impl Into<Bytes>,
    ) -> Self {
        Self {
            name: name.into(),
            content_type: content_type.into(),
            bytes: bytes.into(),
        }
    }

    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }
}

/// Where an upload ended up.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct UploadedImage {
    /// Publicly reachable retrieval URL.
    pub url: String,
    /// Storage key inside the bucket, e.g. `products/p1-1700000000000.png`.
    pub path: String,
}

/// Options sent along with an object upload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UploadOptions {
    pub content_type: String,
    pub cache_control: String,
    /// Overwrite an existing object at the same key instead of failing.
    pub upsert: bool,
}

/// Backend acknowledgement of a stored object.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredObject {
    pub key: String,
    pub size_bytes: u64,
    pub etag: Option<String>,
}
