use anyhow::Context;
use bytes::Bytes;
use tracing::warn;
use uuid::Uuid;

use crate::storage::StorageClient;

const PRESIGN_TTL_SECS: u64 = 30 * 60;

/// Raw upload taken from the request.
pub struct PhotoUpload {
    pub body: Bytes,
    pub content_type: String,
}

fn ext_from_mime(ct: &str) -> Option<&'static str> {
    match ct {
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/gif" => Some("gif"),
        "image/webp" => Some("webp"),
        "image/heic" => Some("heic"),
        _ => None,
    }
}

/// Uploads the photo and returns its object key.
pub async fn store_photo(storage: &dyn StorageClient, photo: PhotoUpload) -> anyhow::Result<String> {
    let ext = ext_from_mime(&photo.content_type)
        .with_context(|| format!("unsupported photo type {}", photo.content_type))?;
    let key = format!("stores/{}.{}", Uuid::new_v4(), ext);
    storage
        .put_object(&key, photo.body, &photo.content_type)
        .await
        .with_context(|| format!("put_object {}", key))?;
    Ok(key)
}

/// Like [`store_photo`], but a failed or rejected upload only costs the photo.
pub async fn try_store_photo(storage: &dyn StorageClient, photo: Option<PhotoUpload>) -> Option<String> {
    let photo = photo.filter(|p| !p.body.is_empty())?;
    match store_photo(storage, photo).await {
        Ok(key) => Some(key),
        Err(e) => {
            warn!(error = %e, "photo upload skipped");
            None
        }
    }
}

pub async fn presign_photo(storage: &dyn StorageClient, key: &str) -> anyhow::Result<String> {
    storage
        .presign_get(key, PRESIGN_TTL_SECS)
        .await
        .with_context(|| format!("presign url for {}", key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::fakes::{FailingStorage, FakeStorage};

    fn upload(ct: &str) -> PhotoUpload {
        PhotoUpload {
            body: Bytes::from_static(b"\x89PNG"),
            content_type: ct.into(),
        }
    }

    #[test]
    fn test_ext_from_mime() {
        assert_eq!(ext_from_mime("image/jpeg"), Some("jpg"));
        assert_eq!(ext_from_mime("image/jpg"), Some("jpg"));
        assert_eq!(ext_from_mime("image/png"), Some("png"));
        assert_eq!(ext_from_mime("image/webp"), Some("webp"));
        assert_eq!(ext_from_mime("application/pdf"), None);
    }

    #[tokio::test]
    async fn stored_photo_key_keeps_extension() {
        let key = store_photo(&FakeStorage, upload("image/png")).await.unwrap();
        assert!(key.starts_with("stores/"));
        assert!(key.ends_with(".png"));
        let url = presign_photo(&FakeStorage, &key).await.unwrap();
        assert!(url.contains(&key));
    }

    #[tokio::test]
    async fn failures_degrade_to_no_photo() {
        assert!(try_store_photo(&FailingStorage, Some(upload("image/png"))).await.is_none());
        assert!(try_store_photo(&FakeStorage, Some(upload("text/plain"))).await.is_none());
        assert!(try_store_photo(&FakeStorage, None).await.is_none());
        assert!(try_store_photo(&FakeStorage, Some(upload("image/jpeg"))).await.is_some());
    }
}
