use anyhow::Context;
use bytes::Bytes;
use tracing::warn;
use uuid::Uuid;

use crate::storage::StorageClient;

/// A file received from the client, held in memory until uploaded.
#[derive(Debug, Clone)]
pub struct UploadItem {
    pub body: Bytes,
    pub content_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub key: String,
    pub url: String,
}

/// Uploads one user image, e.g. `users/<id>/avatar-<uuid>.png`.
pub async fn upload_user_image(
    storage: &dyn StorageClient,
    user_id: Uuid,
    purpose: &str,
    item: UploadItem,
) -> anyhow::Result<StoredObject> {
    anyhow::ensure!(!item.body.is_empty(), "empty {} upload", purpose);
    anyhow::ensure!(
        item.content_type.starts_with("image/"),
        "{} must be an image, got {}",
        purpose,
        item.content_type
    );

    let ext = ext_from_mime(&item.content_type).unwrap_or("bin");
    let key = format!("users/{}/{}-{}.{}", user_id, purpose, Uuid::new_v4(), ext);
    storage
        .put_object(&key, item.body, &item.content_type)
        .await
        .with_context(|| format!("put_object {}", key))?;
    let url = storage.public_url(&key);
    Ok(StoredObject { key, url })
}

/// Best-effort removal of objects whose owning record was never created.
pub async fn discard(storage: &dyn StorageClient, objects: &[StoredObject]) {
    for o in objects {
        if let Err(e) = storage.delete_object(&o.key).await {
            warn!(error = %e, key = %o.key, "failed to delete orphaned upload");
        }
    }
}

fn ext_from_mime(ct: &str) -> Option<&'static str> {
    match ct {
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/webp" => Some("webp"),
        "image/gif" => Some("gif"),
        "image/heic" => Some("heic"),
        _ => None,
    }
}
