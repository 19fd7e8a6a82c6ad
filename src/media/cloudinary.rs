//! Cloudinary avatar uploads via the signed upload API.

use super::{AvatarStore, MediaError, check_upload};
use crate::config::{MediaConfig, SignatureAlgorithm};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use sha1::Sha1;
use sha2::{Digest, Sha256};
use std::time::Duration;
use tracing::info;

const API_BASE: &str = "https://api.cloudinary.com/v1_1";
const DELIVERY_BASE: &str = "https://res.cloudinary.com";

#[derive(Debug, Deserialize)]
struct UploadResponse {
    public_id: String,
    version: u64,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

/// Uploads avatars as `{folder}avatar_{user_id}`, overwriting the previous one.
pub struct CloudinaryStore {
    client: reqwest::Client,
    api_base: String,
    cloud_name: String,
    api_key: String,
    api_secret: String,
    folder: String,
    size: u32,
    algorithm: SignatureAlgorithm,
}

impl CloudinaryStore {
    pub fn new(config: &MediaConfig) -> Result<Self, MediaError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            api_base: API_BASE.to_string(),
            cloud_name: config.cloud_name.clone(),
            api_key: config.api_key.clone(),
            api_secret: config.api_secret.clone(),
            folder: config.folder.clone(),
            size: config.avatar_size,
            algorithm: config.signature_algorithm,
        })
    }

    /// Point uploads at another API root.
    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into();
        self
    }

    fn public_id(&self, user_id: i64) -> String {
        format!("{}avatar_{}", self.folder, user_id)
    }

    fn signature(&self, params: &[(&str, String)]) -> String {
        match self.algorithm {
            SignatureAlgorithm::Sha1 => sign::<Sha1>(params, &self.api_secret),
            SignatureAlgorithm::Sha256 => sign::<Sha256>(params, &self.api_secret),
        }
    }

    /// Delivery URL cropped to a square of the configured size.
    fn delivery_url(&self, public_id: &str, version: u64) -> String {
        format!(
            "{DELIVERY_BASE}/{}/image/upload/c_fill,h_{size},w_{size}/v{version}/{public_id}",
            self.cloud_name,
            size = self.size,
        )
    }
}

/// Hex digest of `k1=v1&k2=v2...` (keys sorted) followed by the API secret.
fn sign<D: Digest>(params: &[(&str, String)], secret: &str) -> String {
    let mut sorted: Vec<_> = params.iter().collect();
    sorted.sort_by(|a, b| a.0.cmp(b.0));
    let joined = sorted
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&");

    let mut hasher = D::new();
    hasher.update(joined.as_bytes());
    hasher.update(secret.as_bytes());
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

#[async_trait]
impl AvatarStore for CloudinaryStore {
    async fn upload(
        &self,
        user_id: i64,
        data: Vec<u8>,
        content_type: Option<String>,
    ) -> Result<String, MediaError> {
        check_upload(&data, content_type.as_deref())?;

        let public_id = self.public_id(user_id);
        let timestamp = chrono::Utc::now().timestamp().to_string();
        let params = [
            ("overwrite", "true".to_string()),
            ("public_id", public_id.clone()),
            ("timestamp", timestamp.clone()),
        ];
        let signature = self.signature(&params);

        let mut file = Part::bytes(data).file_name(format!("avatar_{user_id}"));
        if let Some(ct) = content_type {
            file = file.mime_str(&ct)?;
        }
        let form = Form::new()
            .part("file", file)
            .text("api_key", self.api_key.clone())
            .text("overwrite", "true")
            .text("public_id", public_id)
            .text("timestamp", timestamp)
            .text("signature", signature);

        let url = format!("{}/{}/image/upload", self.api_base, self.cloud_name);
        let response = self.client.post(&url).multipart(form).send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = match response.json::<ErrorResponse>().await {
                Ok(body) => body.error.message,
                Err(_) => status.to_string(),
            };
            return Err(MediaError::Upstream(message));
        }

        let uploaded: UploadResponse = response.json().await?;
        info!(user_id, public_id = %uploaded.public_id, version = uploaded.version, "Avatar uploaded");
        Ok(self.delivery_url(&uploaded.public_id, uploaded.version))
    }
}
