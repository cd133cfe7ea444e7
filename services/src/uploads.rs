//! Profile and plan image uploads.
//!
//! `POST /api/v1/user/uploadImage` takes a multipart form with one `image`
//! file part. The file is stored under `IMAGE_DIR` with a random name and
//! served back from `/access/images/<name>`.
//!
//! Only raster formats are accepted, and the leading bytes must agree with
//! the declared content type. Scriptable formats such as SVG are refused.

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Extension, Multipart, multipart::Field},
    http::StatusCode,
    routing::post,
};
use serde::{Deserialize, Serialize};

use crate::auth::RequireAuth;
use crate::config::Config;
use crate::database::Storage;
use crate::email::Mailer;
use crate::error::ApiError;
use crate::state::AppState;

/// URL prefix the image directory is served under.
pub const IMAGE_URL_PREFIX: &str = "/access/images";

/// Room for multipart boundaries and headers on top of the image itself.
const MULTIPART_OVERHEAD: usize = 16 * 1024;

#[derive(Debug, Serialize, Deserialize)]
pub struct UploadImageResponse {
    pub filename: String,
    pub url: String,
    pub content_type: String,
    pub size: usize,
}

pub fn upload_routes<S, M>(config: &Config) -> Router<AppState<S, M>>
where
    S: Storage,
    M: Mailer,
{
    Router::new().route(
        "/uploadImage",
        post(upload_image).layer(DefaultBodyLimit::max(
            config.max_image_bytes() + MULTIPART_OVERHEAD,
        )),
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ImageFormat {
    Png,
    Jpeg,
    Gif,
    Webp,
    Avif,
}

impl ImageFormat {
    fn from_content_type(content_type: &str) -> Option<Self> {
        match content_type {
            "image/png" => Some(Self::Png),
            "image/jpeg" | "image/jpg" => Some(Self::Jpeg),
            "image/gif" => Some(Self::Gif),
            "image/webp" => Some(Self::Webp),
            "image/avif" => Some(Self::Avif),
            _ => None,
        }
    }

    fn extension(self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpg",
            Self::Gif => "gif",
            Self::Webp => "webp",
            Self::Avif => "avif",
        }
    }

    /// Whether `bytes` start with this format's signature.
    fn matches(self, bytes: &[u8]) -> bool {
        match self {
            Self::Png => bytes.starts_with(b"\x89PNG\r\n\x1a\n"),
            Self::Jpeg => bytes.starts_with(&[0xFF, 0xD8, 0xFF]),
            Self::Gif => bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a"),
            Self::Webp => bytes.len() >= 12 && &bytes[..4] == b"RIFF" && &bytes[8..12] == b"WEBP",
            Self::Avif => {
                bytes.len() >= 12
                    && &bytes[4..8] == b"ftyp"
                    && matches!(&bytes[8..12], b"avif" | b"avis")
            }
        }
    }
}

async fn read_image(
    field: Field<'_>,
    max_bytes: usize,
) -> Result<(String, ImageFormat, Vec<u8>), ApiError> {
    let content_type = field.content_type().unwrap_or_default().to_owned();
    let Some(format) = ImageFormat::from_content_type(&content_type) else {
        return Err(ApiError::validation(format!(
            "expected a png, jpeg, gif, webp or avif upload, got '{content_type}'"
        )));
    };

    let bytes = field
        .bytes()
        .await
        .map_err(|e| ApiError::validation(e.body_text()))?;
    if bytes.is_empty() {
        return Err(ApiError::validation("image is empty"));
    }
    if bytes.len() > max_bytes {
        return Err(ApiError::validation(format!(
            "image exceeds {max_bytes} bytes"
        )));
    }
    if !format.matches(&bytes) {
        return Err(ApiError::validation(format!(
            "image content does not match '{content_type}'"
        )));
    }

    Ok((content_type, format, bytes.to_vec()))
}

#[tracing::instrument(skip_all)]
async fn upload_image(
    auth: RequireAuth,
    Extension(config): Extension<Config>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<UploadImageResponse>), ApiError> {
    let mut image = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::validation(e.body_text()))?
    {
        if field.name() == Some("image") {
            image = Some(read_image(field, config.max_image_bytes()).await?);
            break;
        }
    }

    let (content_type, format, bytes) =
        image.ok_or_else(|| ApiError::validation("multipart field 'image' is required"))?;
    let filename = format!("{}.{}", uuid::Uuid::new_v4(), format.extension());

    let dir = config.image_dir();
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| ApiError::internal(format!("failed to create image dir: {e}")))?;
    tokio::fs::write(dir.join(&filename), &bytes)
        .await
        .map_err(|e| ApiError::internal(format!("failed to write image: {e}")))?;

    tracing::info!(
        uploader = auth.email(),
        size = bytes.len(),
        filename = %filename,
        "Stored uploaded image"
    );

    Ok((
        StatusCode::CREATED,
        Json(UploadImageResponse {
            url: format!("{IMAGE_URL_PREFIX}/{filename}"),
            filename,
            content_type,
            size: bytes.len(),
        }),
    ))
}
