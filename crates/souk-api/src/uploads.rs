use axum::{
    Extension, Json,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header},
    response::IntoResponse,
};
use bytes::Bytes;
use tracing::{error, info};

use souk_types::api::{Claims, UploadResponse};

use crate::error::ApiError;
use crate::state::AppState;

/// 5 MB per image
pub const MAX_IMAGE_SIZE: usize = 5 * 1024 * 1024;

/// Accepted image formats: (content type, stored extension).
const IMAGE_TYPES: [(&str, &str); 3] = [
    ("image/jpeg", "jpg"),
    ("image/png", "png"),
    ("image/webp", "webp"),
];

/// POST /uploads: raw image bytes with an image Content-Type. Returns the
/// public URL to put in an ad's `images` or a message's `attachments`.
pub async fn upload_image(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    headers: HeaderMap,
    bytes: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    let ext = extension_for(content_type).ok_or(ApiError::UnsupportedMediaType)?;

    if bytes.is_empty() {
        return Err(ApiError::bad_request("empty upload"));
    }
    if bytes.len() > MAX_IMAGE_SIZE {
        return Err(ApiError::PayloadTooLarge);
    }
    if !magic_matches(ext, &bytes) {
        return Err(ApiError::bad_request("file content does not match its type"));
    }

    let name = state.storage.save(&bytes, ext).await.map_err(|e| {
        error!("Failed to store upload: {:#}", e);
        ApiError::Internal
    })?;

    info!("{} uploaded {} ({} bytes)", claims.sub, name, bytes.len());
    Ok((
        StatusCode::CREATED,
        Json(UploadResponse {
            url: state.media_url_for(&name),
            size: bytes.len() as u64,
        }),
    ))
}

/// GET /media/{name}: public, images are referenced from public listings.
pub async fn serve_media(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    // Only names produced by Storage::save are valid, which rules out traversal
    let (hash, ext) = name.split_once('.').ok_or(ApiError::NotFound("file"))?;
    if hash.len() != 64 || !hash.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(ApiError::NotFound("file"));
    }
    let content_type = IMAGE_TYPES
        .iter()
        .find(|(_, e)| *e == ext)
        .map(|(ct, _)| *ct)
        .ok_or(ApiError::NotFound("file"))?;

    let bytes = tokio::fs::read(state.storage.file_path(&name))
        .await
        .map_err(|_| ApiError::NotFound("file"))?;

    Ok((
        [
            (header::CONTENT_TYPE, content_type),
            (header::CACHE_CONTROL, "public, max-age=31536000, immutable"),
        ],
        bytes,
    ))
}

fn extension_for(content_type: &str) -> Option<&'static str> {
    let essence = content_type.split(';').next()?.trim();
    IMAGE_TYPES
        .iter()
        .find(|(ct, _)| ct.eq_ignore_ascii_case(essence))
        .map(|(_, ext)| *ext)
}

fn magic_matches(ext: &str, bytes: &[u8]) -> bool {
    match ext {
        "jpg" => bytes.starts_with(&[0xFF, 0xD8, 0xFF]),
        "png" => bytes.starts_with(b"\x89PNG\r\n\x1a\n"),
        "webp" => bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP",
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_type_parameters_are_ignored() {
        assert_eq!(extension_for("image/PNG; charset=binary"), Some("png"));
        assert_eq!(extension_for("image/gif"), None);
        assert_eq!(extension_for(""), None);
    }

    #[test]
    fn declared_type_must_match_the_bytes() {
        assert!(magic_matches("jpg", &[0xFF, 0xD8, 0xFF, 0xE0]));
        assert!(!magic_matches("png", &[0xFF, 0xD8, 0xFF, 0xE0]));
        assert!(magic_matches("webp", b"RIFF\x10\0\0\0WEBPVP8 "));
        assert!(!magic_matches("webp", b"RIFF"));
    }
}
