//! Client for the archive service's upload API.
//!
//! The archive groups the files and metadata of one run in an *upload*
//! container. The dispatcher drives this surface through the [`ArchiveApi`]
//! trait so it can be exercised against a recording stub in tests;
//! [`ArchiveClient`] is the HTTP implementation.
//!
//! Dictionary payloads are attached as a zip archive containing a single
//! `{name}.json` entry, which the archive unpacks and indexes on its side.
//! All calls carry a bearer token, are bounded by the configured timeout, and
//! treat any non-2xx response as a failure. No call is retried.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::io::Write;
use std::path::Path;
use std::time::Duration;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

use crate::error::{RelayError, RelayResult};

/// The archive operations the dispatcher needs.
#[async_trait]
pub trait ArchiveApi: Send + Sync + 'static {
    /// Create an upload container, returning its id.
    async fn create_upload(&self, upload_name: &str) -> RelayResult<String>;

    /// Attach a named dictionary payload to an upload.
    async fn add_dictionary(
        &self,
        name: &str,
        dictionary: &Value,
        upload_id: &str,
    ) -> RelayResult<()>;
}

#[derive(Debug, Deserialize)]
struct CreateUploadResponse {
    upload_id: String,
}

/// HTTP client for the archive's upload API.
#[derive(Debug, Clone)]
pub struct ArchiveClient {
    base_url: String,
    token: String,
    http: reqwest::Client,
}

impl ArchiveClient {
    /// Build a client for the given base URL and bearer token.
    ///
    /// `timeout` bounds every individual request; a timed-out call surfaces
    /// as an [`RelayError::Http`] failure like any other transport error.
    pub fn new(base_url: &str, token: &str, timeout: Duration) -> RelayResult<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            http,
        })
    }

    async fn check(response: reqwest::Response) -> RelayResult<reqwest::Response> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RelayError::Api { status, body });
        }
        Ok(response)
    }

    /// `POST {base}/uploads?upload_name={name}`: create an upload container.
    pub async fn create_upload(&self, upload_name: &str) -> RelayResult<String> {
        let response = self
            .http
            .post(format!("{}/uploads", self.base_url))
            .query(&[("upload_name", upload_name)])
            .bearer_auth(&self.token)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await?;
        let body: CreateUploadResponse = Self::check(response).await?.json().await?;
        Ok(body.upload_id)
    }

    /// `PUT {base}/uploads/{id}/raw/{name}`: attach a dictionary payload,
    /// packaged as a zip archive containing `{name}.json`.
    pub async fn add_dictionary(
        &self,
        name: &str,
        dictionary: &Value,
        upload_id: &str,
    ) -> RelayResult<()> {
        let archive = zip_dictionary(name, dictionary)?;
        let response = self
            .http
            .put(format!(
                "{}/uploads/{}/raw/{}",
                self.base_url, upload_id, name
            ))
            .bearer_auth(&self.token)
            .body(archive)
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    /// `PUT {base}/uploads/{id}/raw/{file_name}`: attach a raw file.
    pub async fn add_file(&self, path: &Path, upload_id: &str) -> RelayResult<()> {
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                RelayError::Configuration(format!("`{}` has no usable file name", path.display()))
            })?;
        let body = tokio::fs::read(path).await?;
        let response = self
            .http
            .put(format!(
                "{}/uploads/{}/raw/{}",
                self.base_url, upload_id, file_name
            ))
            .bearer_auth(&self.token)
            .body(body)
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    /// `GET {base}/uploads/{id}`: query the processing status of an upload.
    pub async fn upload_status(&self, upload_id: &str) -> RelayResult<Value> {
        let response = self
            .http
            .get(format!("{}/uploads/{}", self.base_url, upload_id))
            .bearer_auth(&self.token)
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    /// `POST {base}/uploads/{id}/edit`: attach or replace upload metadata.
    pub async fn edit_metadata(&self, upload_id: &str, metadata: &Value) -> RelayResult<Value> {
        let response = self
            .http
            .post(format!("{}/uploads/{}/edit", self.base_url, upload_id))
            .bearer_auth(&self.token)
            .header(reqwest::header::ACCEPT, "application/json")
            .json(&json!({ "metadata": metadata }))
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    /// `POST {base}/datasets/`: create a dataset grouping.
    pub async fn create_dataset(&self, dataset_name: &str) -> RelayResult<Value> {
        let response = self
            .http
            .post(format!("{}/datasets/", self.base_url))
            .bearer_auth(&self.token)
            .header(reqwest::header::ACCEPT, "application/json")
            .json(&json!({ "dataset_name": dataset_name }))
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }
}

#[async_trait]
impl ArchiveApi for ArchiveClient {
    async fn create_upload(&self, upload_name: &str) -> RelayResult<String> {
        ArchiveClient::create_upload(self, upload_name).await
    }

    async fn add_dictionary(
        &self,
        name: &str,
        dictionary: &Value,
        upload_id: &str,
    ) -> RelayResult<()> {
        ArchiveClient::add_dictionary(self, name, dictionary, upload_id).await
    }
}

/// Package a dictionary as a zip archive holding a single `{name}.json` entry.
fn zip_dictionary(name: &str, dictionary: &Value) -> RelayResult<Vec<u8>> {
    let mut writer = ZipWriter::new(std::io::Cursor::new(Vec::new()));
    writer.start_file(format!("{name}.json"), SimpleFileOptions::default())?;
    writer.write_all(&serde_json::to_vec(dictionary)?)?;
    Ok(writer.finish()?.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn test_zip_contains_named_json_entry() {
        let dictionary = json!({"uid": "a1", "time": 1.5});
        let bytes = zip_dictionary("1.5_run_start", &dictionary).expect("zip");

        let mut archive =
            zip::ZipArchive::new(std::io::Cursor::new(bytes)).expect("read archive back");
        assert_eq!(archive.len(), 1);
        let mut entry = archive.by_index(0).expect("entry");
        assert_eq!(entry.name(), "1.5_run_start.json");

        let mut contents = String::new();
        entry.read_to_string(&mut contents).expect("read entry");
        let parsed: Value = serde_json::from_str(&contents).expect("entry is JSON");
        assert_eq!(parsed, dictionary);
    }

    #[test]
    fn test_base_url_trailing_slash_is_trimmed() {
        let client = ArchiveClient::new(
            "https://archive.example.org/api/v1/",
            "token",
            Duration::from_secs(10),
        )
        .expect("client");
        assert_eq!(client.base_url, "https://archive.example.org/api/v1");
    }
}
