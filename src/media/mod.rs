//! User avatars.
//!
//! New accounts get a Gravatar URL derived from their e-mail. Uploaded
//! avatars go to an [`AvatarStore`]; [`CloudinaryStore`] is the production
//! backend and [`DisabledAvatarStore`] rejects uploads when media is not
//! configured.

mod cloudinary;

pub use cloudinary::CloudinaryStore;

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

/// Avatar storage errors.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("avatar uploads are disabled")]
    Disabled,
    #[error("{0}")]
    Invalid(String),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("upload rejected: {0}")]
    Upstream(String),
}

/// Shared handle to the configured avatar store.
pub type SharedAvatarStore = Arc<dyn AvatarStore>;

#[async_trait]
pub trait AvatarStore: Send + Sync {
    /// Store `data` as the avatar of `user_id` and return its public URL.
    async fn upload(
        &self,
        user_id: i64,
        data: Vec<u8>,
        content_type: Option<String>,
    ) -> Result<String, MediaError>;
}

/// Rejects every upload.
pub struct DisabledAvatarStore;

#[async_trait]
impl AvatarStore for DisabledAvatarStore {
    async fn upload(&self, _: i64, _: Vec<u8>, _: Option<String>) -> Result<String, MediaError> {
        Err(MediaError::Disabled)
    }
}

/// Gravatar image URL for an e-mail address.
pub fn gravatar_url(email: &str) -> String {
    let normalized = email.trim().to_lowercase();
    format!(
        "https://www.gravatar.com/avatar/{:x}",
        md5::compute(normalized.as_bytes())
    )
}

/// Reject empty bodies and non-image content types.
pub fn check_upload(data: &[u8], content_type: Option<&str>) -> Result<(), MediaError> {
    if data.is_empty() {
        return Err(MediaError::Invalid("Uploaded file is empty".into()));
    }
    if let Some(ct) = content_type
        && !ct.starts_with("image/")
    {
        return Err(MediaError::Invalid("Uploaded file must be an image".into()));
    }
    Ok(())
}
