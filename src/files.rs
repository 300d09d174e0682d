//! Blob-store collaborator (`POST /api/files/*`)
//!
//! The server treats file contents as opaque — it never inspects or
//! transforms them. This module is a thin wrapper over an S3-compatible
//! backend (AWS S3, MinIO, Backblaze B2, Cloudflare R2) plus the one upload
//! handler the external interface exposes. Absence of `BLOB_STORE_ENDPOINT`
//! degrades this surface only; every other endpoint works without it.

use std::time::Duration;

use aws_config::Region;
use aws_sdk_s3::config::{Credentials, IdentityCache, SharedCredentialsProvider, StalledStreamProtectionConfig};
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use axum::extract::{Multipart, State};
use axum::routing::post;
use axum::{Json, Router};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::api::AppState;
use crate::auth::AuthUser;
use crate::config::Config;
use crate::error::{ok, ApiError, ApiResult};

const PRESIGN_EXPIRY: Duration = Duration::from_secs(3600);
const MAX_FILE_SIZE_BYTES: usize = 10 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum BlobStoreError {
    #[error("failed to upload file: {0}")]
    Upload(String),
    #[error("failed to generate presigned URL: {0}")]
    Presign(String),
    #[error("blob store configuration error: {0}")]
    Config(String),
}

impl From<BlobStoreError> for ApiError {
    fn from(err: BlobStoreError) -> Self {
        tracing::error!(error = %err, "blob store operation failed");
        Self::ServiceUnavailable("file storage is temporarily unavailable".into())
    }
}

/// Wraps an `aws-sdk-s3` client pointed at an S3-compatible backend.
#[derive(Clone)]
pub struct BlobStoreClient {
    client: Client,
    bucket: String,
}

impl BlobStoreClient {
    /// Build a client from [`Config`]'s `blob_store_*` fields. Returns `None`
    /// when no endpoint is configured — callers treat that as "feature
    /// disabled", not an error.
    pub async fn from_config(config: &Config) -> Option<Self> {
        let endpoint = config.blob_store_endpoint.clone()?;

        let region = Region::new("us-east-1");
        let mut builder = aws_sdk_s3::Config::builder()
            .region(region)
            .stalled_stream_protection(StalledStreamProtectionConfig::disabled())
            .identity_cache(IdentityCache::no_cache())
            .endpoint_url(&endpoint)
            .force_path_style(true);

        if let (Some(access_key), Some(secret_key)) =
            (config.blob_store_access_key.clone(), config.blob_store_secret_key.clone())
        {
            let credentials = Credentials::new(access_key, secret_key, None, None, "environment");
            builder = builder.credentials_provider(SharedCredentialsProvider::new(credentials));
        }

        let client = Client::from_conf(builder.build());
        tracing::info!(bucket = %config.blob_store_bucket, endpoint = %endpoint, "blob store client initialized");

        Some(Self { client, bucket: config.blob_store_bucket.clone() })
    }

    async fn upload(&self, key: &str, data: Vec<u8>, content_type: &str) -> Result<(), BlobStoreError> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(data))
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| BlobStoreError::Upload(e.to_string()))?;
        Ok(())
    }

    async fn presign_get(&self, key: &str) -> Result<String, BlobStoreError> {
        let presign_config =
            PresigningConfig::builder().expires_in(PRESIGN_EXPIRY).build().map_err(|e| BlobStoreError::Presign(e.to_string()))?;

        let presigned = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(presign_config)
            .await
            .map_err(|e| BlobStoreError::Presign(e.to_string()))?;

        Ok(presigned.uri().to_string())
    }

    /// Liveness check used by `/health`.
    pub async fn health_check(&self) -> Result<(), BlobStoreError> {
        self.client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .map_err(|e| BlobStoreError::Config(format!("bucket not accessible: {e}")))?;
        Ok(())
    }
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct UploadedFile {
    pub file_reference: String,
    pub download_url: String,
    pub size: usize,
}

/// `POST /api/files/upload` — multipart upload of a single opaque blob.
///
/// The returned `file_reference` is an opaque key, suitable for callers to
/// carry alongside an out-of-band encrypted message (e.g. as
/// `QueuedMessage.file_reference`); the server does not associate it with any
/// message automatically.
#[utoipa::path(
    post,
    path = "/api/files/upload",
    tag = "files",
    responses((status = 200, body = UploadedFile), (status = 400), (status = 503)),
    security(("bearer_auth" = [])),
)]
pub async fn upload(
    State(state): State<AppState>,
    auth: AuthUser,
    mut multipart: Multipart,
) -> ApiResult<axum::response::Response> {
    let blob_store = state
        .blob_store
        .as_ref()
        .ok_or_else(|| ApiError::ServiceUnavailable("file storage is not configured".into()))?;

    let field = multipart
        .next_field()
        .await
        .map_err(|_| ApiError::BadRequest("malformed multipart body".into()))?
        .ok_or_else(|| ApiError::BadRequest("no file provided".into()))?;

    let content_type = field.content_type().unwrap_or("application/octet-stream").to_string();
    let data = field.bytes().await.map_err(|_| ApiError::BadRequest("failed to read file contents".into()))?;

    if data.len() > MAX_FILE_SIZE_BYTES {
        return Err(ApiError::BadRequest(format!("file exceeds the {MAX_FILE_SIZE_BYTES}-byte limit")));
    }

    let key = format!("{}/{}", auth.user_id, Uuid::now_v7());
    blob_store.upload(&key, data.to_vec(), &content_type).await?;
    let download_url = blob_store.presign_get(&key).await?;

    Ok(ok(UploadedFile { file_reference: key, download_url, size: data.len() }))
}

pub fn router() -> Router<AppState> {
    Router::new().route("/upload", post(upload))
}
