//! YouTube Data API publisher.
//!
//! Auth is a refresh-token exchange per call; uploads use the resumable
//! protocol (session POST, then a single PUT of the whole file).

use std::fs::File;
use std::path::Path;
use std::time::Duration;

use chrono::Utc;
use reqwest::StatusCode;
use reqwest::blocking::{Body, Client};
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE, LOCATION};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{info, warn};

use crate::config::YoutubeConfig;
use crate::error::{Error, Result};
use crate::stages::{Publisher, VideoMetadata};
use crate::utils::truncate_chars;

const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const UPLOAD_URL: &str = "https://www.googleapis.com/upload/youtube/v3/videos";
const THUMBNAIL_URL: &str = "https://www.googleapis.com/upload/youtube/v3/thumbnails/set";
const CHANNELS_URL: &str = "https://www.googleapis.com/youtube/v3/channels";

const API_TIMEOUT: Duration = Duration::from_secs(30);
const UPLOAD_TIMEOUT: Duration = Duration::from_secs(900);
const MAX_TITLE_CHARS: usize = 100;
const MAX_DESCRIPTION_CHARS: usize = 5000;

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Deserialize)]
struct UploadResponse {
    #[serde(default)]
    id: String,
}

pub struct YoutubePublisher {
    client: Client,
    client_id: String,
    client_secret: String,
    refresh_token: String,
    category_id: String,
    privacy_status: String,
}

impl YoutubePublisher {
    pub fn new(settings: &YoutubeConfig) -> Result<Self> {
        let (Some(client_id), Some(client_secret), Some(refresh_token)) = (
            settings.client_id.clone(),
            settings.client_secret.clone(),
            settings.refresh_token.clone(),
        ) else {
            return Err(Error::config(
                "YOUTUBE_CLIENT_ID, YOUTUBE_CLIENT_SECRET and YOUTUBE_REFRESH_TOKEN are required unless DRY_RUN=true",
            ));
        };
        let client = Client::builder().timeout(UPLOAD_TIMEOUT).build()?;
        Ok(Self {
            client,
            client_id,
            client_secret,
            refresh_token,
            category_id: settings.category_id.clone(),
            privacy_status: settings.privacy_status.clone(),
        })
    }

    fn access_token(&self) -> Result<String> {
        let resp = self
            .client
            .post(TOKEN_URL)
            .timeout(API_TIMEOUT)
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("refresh_token", self.refresh_token.as_str()),
                ("grant_type", "refresh_token"),
            ])
            .send()?;
        let status = resp.status();
        let body = resp.text()?;
        if !status.is_success() {
            return Err(api_error("token refresh", status, &body));
        }
        let token: TokenResponse = serde_json::from_str(&body)?;
        Ok(token.access_token)
    }

    fn start_session(&self, token: &str, metadata: &VideoMetadata, size: u64) -> Result<String> {
        let resp = self
            .client
            .post(UPLOAD_URL)
            .timeout(API_TIMEOUT)
            .query(&[("uploadType", "resumable"), ("part", "snippet,status")])
            .bearer_auth(token)
            .header("X-Upload-Content-Type", "video/*")
            .header("X-Upload-Content-Length", size.to_string())
            .json(&video_resource(metadata, &self.category_id, &self.privacy_status))
            .send()?;
        let status = resp.status();
        let location = resp
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        if !status.is_success() {
            let body = resp.text().unwrap_or_default();
            return Err(api_error("upload session", status, &body));
        }
        location.ok_or_else(|| Error::Publish("upload session response had no Location header".to_string()))
    }

    fn set_thumbnail(&self, token: &str, video_id: &str, thumbnail: &Path) -> Result<()> {
        let bytes = std::fs::read(thumbnail)?;
        let resp = self
            .client
            .post(THUMBNAIL_URL)
            .timeout(API_TIMEOUT)
            .query(&[("videoId", video_id), ("uploadType", "media")])
            .bearer_auth(token)
            .header(CONTENT_TYPE, "image/png")
            .body(bytes)
            .send()?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().unwrap_or_default();
            return Err(api_error("thumbnail", status, &body));
        }
        Ok(())
    }
}

impl Publisher for YoutubePublisher {
    fn upload(&self, video: &Path, metadata: &VideoMetadata, thumbnail: Option<&Path>) -> Result<String> {
        info!("Uploading '{}' to YouTube...", video.display());
        let token = self.access_token()?;
        let file = File::open(video)?;
        let size = file.metadata()?.len();

        let session = self.start_session(&token, metadata, size)?;
        let resp = self
            .client
            .put(session)
            .bearer_auth(&token)
            .header(CONTENT_TYPE, "video/*")
            .header(CONTENT_LENGTH, size)
            .body(Body::sized(file, size))
            .send()?;
        let status = resp.status();
        let body = resp.text()?;
        if !status.is_success() {
            return Err(api_error("upload", status, &body));
        }
        let uploaded: UploadResponse = serde_json::from_str(&body)?;
        info!(video_id = %uploaded.id, "Video uploaded");

        match thumbnail.filter(|p| p.is_file()) {
            Some(thumb) => match self.set_thumbnail(&token, &uploaded.id, thumb) {
                Ok(()) => info!("Thumbnail uploaded"),
                Err(e) => warn!("Failed to upload thumbnail: {}", e),
            },
            None => info!("No thumbnail available; skipping thumbnail upload"),
        }

        Ok(uploaded.id)
    }

    fn verify_credentials(&self) -> Result<()> {
        let token = self.access_token()?;
        let resp = self
            .client
            .get(CHANNELS_URL)
            .timeout(API_TIMEOUT)
            .query(&[("part", "id"), ("mine", "true")])
            .bearer_auth(token)
            .send()?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().unwrap_or_default();
            return Err(api_error("credential check", status, &body));
        }
        Ok(())
    }
}

/// Pretends to upload. Used with `DRY_RUN=true`.
#[derive(Debug, Default)]
pub struct DryRunPublisher;

impl Publisher for DryRunPublisher {
    fn upload(&self, video: &Path, metadata: &VideoMetadata, _thumbnail: Option<&Path>) -> Result<String> {
        if !video.is_file() {
            return Err(Error::Publish(format!("{} does not exist", video.display())));
        }
        let id = format!("dryrun-{}", Utc::now().format("%Y%m%d%H%M%S"));
        info!(video_id = %id, title = %metadata.title, "DRY_RUN: skipping upload");
        Ok(id)
    }

    fn verify_credentials(&self) -> Result<()> {
        info!("DRY_RUN: skipping credential check");
        Ok(())
    }
}

pub fn video_resource(metadata: &VideoMetadata, category_id: &str, privacy_status: &str) -> Value {
    json!({
        "snippet": {
            "title": truncate_chars(&metadata.title, MAX_TITLE_CHARS),
            "description": truncate_chars(&metadata.description, MAX_DESCRIPTION_CHARS),
            "tags": metadata.tags,
            "categoryId": category_id,
        },
        "status": {
            "privacyStatus": privacy_status,
            "selfDeclaredMadeForKids": false,
        }
    })
}

/// Quota and rate-limit replies become [`Error::RateLimited`].
fn api_error(action: &str, status: StatusCode, body: &str) -> Error {
    if status == StatusCode::TOO_MANY_REQUESTS
        || body.contains("quotaExceeded")
        || body.contains("rateLimitExceeded")
        || body.contains("uploadLimitExceeded")
    {
        return Error::rate_limited("youtube", format!("{action}: {status}"));
    }
    Error::Publish(format!("{action} failed with {status}: {}", truncate_chars(body, 300)))
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn metadata() -> VideoMetadata {
        VideoMetadata {
            title: "t".repeat(120),
            description: "desc".to_string(),
            tags: vec!["rust".to_string(), "Shorts".to_string()],
        }
    }

    #[test]
    fn resource_carries_snippet_and_status() {
        let body = video_resource(&metadata(), "28", "unlisted");
        assert_eq!(body["snippet"]["title"].as_str().unwrap().len(), 100);
        assert_eq!(body["snippet"]["categoryId"], "28");
        assert_eq!(body["snippet"]["tags"][1], "Shorts");
        assert_eq!(body["status"]["privacyStatus"], "unlisted");
        assert_eq!(body["status"]["selfDeclaredMadeForKids"], false);
    }

    #[test]
    fn quota_replies_are_rate_limits() {
        let body = r#"{"error": {"errors": [{"reason": "quotaExceeded"}]}}"#;
        assert!(api_error("upload", StatusCode::FORBIDDEN, body).is_rate_limited());
        assert!(api_error("upload", StatusCode::TOO_MANY_REQUESTS, "").is_rate_limited());
        assert!(!api_error("upload", StatusCode::UNAUTHORIZED, "invalid_grant").is_rate_limited());
    }

    #[test]
    fn missing_credentials_are_a_config_error() {
        let settings = YoutubeConfig {
            client_id: Some("id".to_string()),
            client_secret: None,
            refresh_token: Some("token".to_string()),
            category_id: "28".to_string(),
            privacy_status: "public".to_string(),
            dry_run: false,
        };
        assert!(matches!(YoutubePublisher::new(&settings), Err(Error::Configuration(_))));
    }

    #[test]
    fn dry_run_returns_synthetic_id() {
        let dir = TempDir::new().unwrap();
        let video = dir.path().join("v.mp4");
        std::fs::write(&video, b"mp4").unwrap();
        let id = DryRunPublisher.upload(&video, &metadata(), None).unwrap();
        assert!(id.starts_with("dryrun-"));
        assert!(DryRunPublisher.upload(&dir.path().join("missing.mp4"), &metadata(), None).is_err());
    }
}
