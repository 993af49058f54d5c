use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use spin_sdk::http::{Request, Response};

use crate::config::*;
use crate::core::db::{KeyValueStore, StoreExt};
use crate::core::errors::ApiError;
use crate::core::helpers::{new_id, ok_json};
use crate::identity::Principal;
use crate::models::models::StoredImage;
use crate::state::AppState;

pub const IMAGE_ROUTE: &str = "/images/";

/// Binary image storage. `upload` hands back the URL the image is served at.
pub trait ImageStore: Send + Sync {
    fn upload(&self, bytes: &[u8], content_type: &str) -> anyhow::Result<String>;
    fn fetch(&self, image_id: &str) -> anyhow::Result<Option<StoredImage>>;
}

/// Keeps images in the key-value store next to the rest of the data.
pub struct KvImageStore {
    store: Arc<dyn KeyValueStore>,
}

impl KvImageStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }
}

impl ImageStore for KvImageStore {
    fn upload(&self, bytes: &[u8], content_type: &str) -> anyhow::Result<String> {
        if bytes.is_empty() {
            anyhow::bail!("File to upload cannot be empty");
        }
        let id = new_id();
        let image = StoredImage {
            content_type: content_type.to_string(),
            data: STANDARD.encode(bytes),
        };
        self.store.set_json(&image_key(&id), &image)?;

        let file_name = match mime_guess::get_mime_extensions_str(content_type)
            .and_then(|exts| exts.first())
        {
            Some(ext) => format!("{}.{}", id, ext),
            None => id,
        };
        Ok(format!("{}{}", IMAGE_ROUTE, file_name))
    }

    fn fetch(&self, image_id: &str) -> anyhow::Result<Option<StoredImage>> {
        self.store.get_json(&image_key(image_id))
    }
}

// === HTTP Handlers ===

pub fn upload_image(
    state: &AppState,
    principal: &Principal,
    req: &Request,
) -> Result<Response, ApiError> {
    let user_id = principal.require()?;
    let content_type = req
        .header("Content-Type")
        .and_then(|h| h.as_str())
        .unwrap_or_default()
        .to_string();
    if !content_type.starts_with("image/") {
        return Err(ApiError::BadRequest("Only image uploads are accepted".to_string()));
    }
    let bytes = req.body();
    if bytes.is_empty() {
        return Err(ApiError::BadRequest("File to upload cannot be empty".to_string()));
    }
    if bytes.len() > MAX_IMAGE_BYTES {
        return Err(ApiError::PayloadTooLarge);
    }

    let url = state.images.upload(bytes, &content_type)?;
    tracing::info!(user_id, %url, size = bytes.len(), "uploaded image");
    Ok(ok_json(&serde_json::json!({ "image_url": url })))
}

/// Serves `/images/{id}` or `/images/{id}.{ext}`.
pub fn serve_image(state: &AppState, file_name: &str) -> Result<Response, ApiError> {
    let image_id = file_name.split('.').next().unwrap_or_default();
    let not_found = || ApiError::NotFound("Image not found".to_string());
    if image_id.is_empty() {
        return Err(not_found());
    }
    let image = state.images.fetch(image_id)?.ok_or_else(not_found)?;
    let bytes = STANDARD
        .decode(image.data.as_bytes())
        .map_err(|e| anyhow::anyhow!("corrupt image {}: {}", image_id, e))?;

    // Fall back to the extension in the request path for untyped uploads.
    let content_type = if image.content_type.is_empty() {
        mime_guess::from_path(file_name)
            .first_or_octet_stream()
            .to_string()
    } else {
        image.content_type
    };

    Ok(Response::builder()
        .status(200)
        .header("Content-Type", content_type)
        .header("Cache-Control", "public, max-age=31536000, immutable")
        .body(bytes)
        .build())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::db::MemoryStore;

    #[test]
    fn upload_then_fetch() {
        let images = KvImageStore::new(Arc::new(MemoryStore::new()));
        let url = images.upload(&[0x89, b'P', b'N', b'G'], "image/png").unwrap();
        assert!(url.starts_with(IMAGE_ROUTE));
        assert!(url.ends_with(".png"));

        let file_name = url.trim_start_matches(IMAGE_ROUTE);
        let id = file_name.split('.').next().unwrap();
        let stored = images.fetch(id).unwrap().unwrap();
        assert_eq!(stored.content_type, "image/png");
        assert_eq!(STANDARD.decode(stored.data).unwrap(), vec![0x89, b'P', b'N', b'G']);
    }

    #[test]
    fn empty_upload_fails() {
        let images = KvImageStore::new(Arc::new(MemoryStore::new()));
        assert!(images.upload(&[], "image/png").is_err());
    }
}
