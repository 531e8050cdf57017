//! src/services/storage_service.rs
//!
//! Product image uploads. Files are validated locally, given
//! a collision-resistant key under `products/` and stored without overwriting
//! anything already at that key. Local previews are kept in process memory
//! until released.

use bytes::Bytes;
use chrono::Utc;
use parking_lot::Mutex;
use rand::Rng;
use std::{collections::HashMap, sync::Arc};
use tracing::{debug, info};
use uuid::Uuid;

use super::client_provider::BackendHandle;
use crate::{
    config::BackendConfig,
    errors::{UploadError, ValidationError},
    models::upload::{ImageFile, UploadOptions, UploadedImage},
};

/// Largest accepted image, in bytes.
pub const MAX_IMAGE_BYTES: u64 = 5 * 1024 * 1024;
pub const ALLOWED_IMAGE_TYPES: [&str; 4] = ["image/jpeg", "image/jpg", "image/png", "image/webp"];

const KEY_PREFIX: &str = "products";
const CACHE_CONTROL: &str = "max-age=3600";
const RANDOM_TOKEN_LEN: usize = 8;
const BASE36: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const PREVIEW_SCHEME: &str = "blob:";

/// Source of the millisecond timestamp embedded in storage keys.
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> i64;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

/// Pre-flight checks: present, allow-listed MIME type, at most 5 MiB.
pub fn validate_image(file: Option<&ImageFile>) -> Result<(), ValidationError> {
    let file = file.ok_or(ValidationError::MissingFile)?;
    if !ALLOWED_IMAGE_TYPES.contains(&file.content_type.as_str()) {
        return Err(ValidationError::UnsupportedType(file.content_type.clone()));
    }
    if file.size() > MAX_IMAGE_BYTES {
        return Err(ValidationError::TooLarge {
            size: file.size(),
            max: MAX_IMAGE_BYTES,
        });
    }
    Ok(())
}

/// Derive the storage key for an upload.
///
/// `products/<product_id>-<millis>.<ext>` when the owning product is known,
/// otherwise `products/<millis>-<random>.<ext>`.
pub fn storage_key<R: Rng + ?Sized>(
    file: &ImageFile,
    product_id: Option<&str>,
    now_millis: i64,
    rng: &mut R,
) -> String {
    let owner = product_id.map(sanitize_id).filter(|id| !id.is_empty());
    let base = match owner {
        Some(id) => format!("{id}-{now_millis}"),
        None => format!("{now_millis}-{}", random_token(rng)),
    };
    format!("{KEY_PREFIX}/{base}.{}", extension(file))
}

fn random_token<R: Rng + ?Sized>(rng: &mut R) -> String {
    (0..RANDOM_TOKEN_LEN)
        .map(|_| BASE36[rng.gen_range(0..BASE36.len())] as char)
        .collect()
}

/// Text after the last `.` of the file name, case kept, reduced to ASCII
/// alphanumerics. Falls back to the MIME subtype when the name has none.
fn extension(file: &ImageFile) -> String {
    let from_name = file
        .name
        .rsplit_once('.')
        .map(|(_, ext)| sanitize(ext))
        .filter(|ext| !ext.is_empty());
    from_name.unwrap_or_else(|| match file.content_type.as_str() {
        "image/jpeg" | "image/jpg" => "jpg".into(),
        other => other
            .rsplit_once('/')
            .map(|(_, sub)| sanitize(sub))
            .filter(|sub| !sub.is_empty())
            .unwrap_or_else(|| "bin".into()),
    })
}

fn sanitize(raw: &str) -> String {
    raw.chars().filter(char::is_ascii_alphanumeric).collect()
}

/// Product ids keep ASCII alphanumerics, `-` and `_`; anything that could
/// split or end a URL path is dropped.
fn sanitize_id(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_'))
        .collect()
}

/// Local display reference for a file that has not been uploaded yet.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PreviewHandle(String);

impl PreviewHandle {
    pub fn url(&self) -> &str {
        &self.0
    }
}

/// In-memory preview store. Entries stay until released.
#[derive(Default)]
pub struct PreviewRegistry {
    entries: Mutex<HashMap<String, Bytes>>,
}

impl PreviewRegistry {
    pub fn create(&self, file: &ImageFile) -> PreviewHandle {
        let url = format!("{PREVIEW_SCHEME}{}", Uuid::new_v4());
        self.entries.lock().insert(url.clone(), file.bytes.clone());
        PreviewHandle(url)
    }

    pub fn get(&self, url: &str) -> Option<Bytes> {
        self.entries.lock().get(url).cloned()
    }

    /// Free a preview. Anything that is not a live preview URL is ignored.
    pub fn release(&self, url: &str) {
        if !url.starts_with(PREVIEW_SCHEME) {
            return;
        }
        if self.entries.lock().remove(url).is_some() {
            debug!(url, "preview released");
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Clone)]
pub struct StorageService {
    backend: BackendHandle,
    bucket: String,
    clock: Arc<dyn Clock>,
    previews: Arc<PreviewRegistry>,
}

impl StorageService {
    pub fn new(backend: BackendHandle, config: &BackendConfig) -> Self {
        Self {
            backend,
            bucket: config.bucket.clone(),
            clock: Arc::new(SystemClock),
            previews: Arc::new(PreviewRegistry::default()),
        }
    }

    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn validate(&self, file: Option<&ImageFile>) -> Result<(), ValidationError> {
        validate_image(file)
    }

    /// Validate and store an image, returning its public URL and key.
    ///
    /// Nothing is sent when validation fails. An existing object at the
    /// derived key is never overwritten; the backend's conflict comes back as
    /// an error.
    pub async fn upload(
        &self,
        file: &ImageFile,
        product_id: Option<&str>,
    ) -> Result<UploadedImage, UploadError> {
        validate_image(Some(file))?;

        let path = storage_key(
            file,
            product_id,
            self.clock.now_millis(),
            &mut rand::thread_rng(),
        );
        let options = UploadOptions {
            content_type: file.content_type.clone(),
            cache_control: CACHE_CONTROL.into(),
            upsert: false,
        };
        debug!(bucket = %self.bucket, %path, size = file.size(), "uploading image");

        let stored = self
            .backend
            .upload(&self.bucket, &path, file.bytes.clone(), &options)
            .await?;
        let url = self.backend.public_url(&self.bucket, &stored.key);
        info!(%path, etag = ?stored.etag, "image uploaded");

        Ok(UploadedImage { url, path })
    }

    pub fn create_preview(&self, file: &ImageFile) -> PreviewHandle {
        self.previews.create(file)
    }

    pub fn preview_bytes(&self, url: &str) -> Option<Bytes> {
        self.previews.get(url)
    }

    pub fn release_preview(&self, url: &str) {
        self.previews.release(url);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::MemoryBackend;
    use rand::{SeedableRng, rngs::StdRng};

    struct FixedClock(i64);

    impl Clock for FixedClock {
        fn now_millis(&self) -> i64 {
            self.0
        }
    }

    fn png(size: usize) -> ImageFile {
        ImageFile::new("Summer Hat.PNG", "image/png", vec![7u8; size])
    }

    #[test]
    fn validation_rules() {
        assert_eq!(validate_image(None), Err(ValidationError::MissingFile));
        assert!(matches!(
            validate_image(Some(&ImageFile::new("a.gif", "image/gif", vec![1]))),
            Err(ValidationError::UnsupportedType(_))
        ));
        assert!(matches!(
            validate_image(Some(&png(MAX_IMAGE_BYTES as usize + 1))),
            Err(ValidationError::TooLarge { .. })
        ));
        assert_eq!(validate_image(Some(&png(MAX_IMAGE_BYTES as usize))), Ok(()));
        for mime in ["image/jpeg", "image/png", "image/webp"] {
            let file = ImageFile::new("x", mime, vec![0u8; 16]);
            assert_eq!(validate_image(Some(&file)), Ok(()));
        }
    }

    #[test]
    fn validation_messages_match_storefront_copy() {
        assert_eq!(ValidationError::MissingFile.to_string(), "No file selected");
        assert_eq!(
            ValidationError::TooLarge { size: 1, max: 1 }.to_string(),
            "File size too large. Maximum size is 5MB."
        );
    }

    #[test]
    fn keys_with_product_id_are_deterministic() {
        let mut rng = StdRng::seed_from_u64(1);
        let key = storage_key(&png(1), Some("p1"), 1_700_000_000_000, &mut rng);
        assert_eq!(key, "products/p1-1700000000000.PNG");
    }

    #[test]
    fn product_ids_cannot_break_out_of_the_key() {
        let mut rng = StdRng::seed_from_u64(1);
        let key = storage_key(&png(1), Some("../a/b?c#d e"), 42, &mut rng);
        assert_eq!(key, "products/abcde-42.PNG");

        let key = storage_key(&png(1), Some("///"), 42, &mut rng);
        assert!(key.starts_with("products/42-"));
    }

    #[test]
    fn keys_without_product_id_carry_randomness() {
        let mut rng = rand::thread_rng();
        let a = storage_key(&png(1), None, 42, &mut rng);
        let b = storage_key(&png(1), None, 42, &mut rng);
        assert!(a.starts_with("products/42-"));
        assert!(a.ends_with(".PNG"));
        assert_eq!(a.len(), "products/42-".len() + RANDOM_TOKEN_LEN + ".PNG".len());
        assert_ne!(a, b);
    }

    #[test]
    fn extension_falls_back_to_mime_subtype() {
        let file = ImageFile::new("photo", "image/jpeg", vec![1]);
        assert_eq!(extension(&file), "jpg");
        let file = ImageFile::new("odd.we bp!", "image/webp", vec![1]);
        assert_eq!(extension(&file), "webp");
    }

    #[tokio::test]
    async fn upload_stores_object_and_returns_public_url() {
        let backend = Arc::new(MemoryBackend::with_public_base("https://x.example.com"));
        let storage = StorageService::new(
            backend.clone(),
            &BackendConfig::new("https://x.example.com", "anon"),
        )
        .with_clock(FixedClock(1_000));

        let uploaded = storage.upload(&png(64), Some("p1")).await.unwrap();

        assert_eq!(uploaded.path, "products/p1-1000.PNG");
        assert_eq!(
            uploaded.url,
            "https://x.example.com/storage/v1/object/public/products/products/p1-1000.PNG"
        );
        let blob = backend.object("products", &uploaded.path).unwrap();
        assert_eq!(blob.content_type, "image/png");
        assert_eq!(blob.cache_control, "max-age=3600");
    }

    #[tokio::test]
    async fn colliding_upload_fails_instead_of_overwriting() {
        let backend = Arc::new(MemoryBackend::new());
        let storage = StorageService::new(
            backend.clone(),
            &BackendConfig::new("https://x.example.com", "anon"),
        )
        .with_clock(FixedClock(5));

        storage.upload(&png(8), Some("p1")).await.unwrap();
        let err = storage.upload(&png(9), Some("p1")).await.unwrap_err();

        assert!(matches!(err, UploadError::Storage(_)));
        assert_eq!(backend.object("products", "products/p1-5.PNG").unwrap().bytes.len(), 8);
    }

    #[tokio::test]
    async fn invalid_files_never_reach_the_backend() {
        let backend = Arc::new(MemoryBackend::new());
        let storage =
            StorageService::new(backend.clone(), &BackendConfig::new("https://x.example.com", "a"));

        let err = storage
            .upload(&ImageFile::new("doc.pdf", "application/pdf", vec![1]), None)
            .await
            .unwrap_err();

        assert!(matches!(err, UploadError::Validation(ValidationError::UnsupportedType(_))));
        assert_eq!(backend.object_count(), 0);
    }

    #[test]
    fn previews_live_until_released() {
        let registry = PreviewRegistry::default();
        let handle = registry.create(&png(3));
        assert!(handle.url().starts_with("blob:"));
        assert_eq!(registry.get(handle.url()).unwrap().len(), 3);

        registry.release("https://example.com/not-a-preview.png");
        registry.release("blob:unknown");
        assert_eq!(registry.len(), 1);

        registry.release(handle.url());
        registry.release(handle.url());
        assert!(registry.is_empty());
    }
}
