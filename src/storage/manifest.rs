//! Storage gateway response and the manifest derived from it

use serde::{Deserialize, Serialize};

use crate::errors::{DappError, DappResult};

/// File name under which the gateway reports the overall upload outcome
pub const MANIFEST_FILE_NAME: &str = "manifest.json";

/// Raw gateway response body
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub messages: Vec<GatewayMessage>,
}

/// Per-file entry of a gateway response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayMessage {
    pub filename: String,
    pub status: String,
    #[serde(rename = "transactionId", default, skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStatus {
    Success,
    Failed,
}

/// Upload outcome of one file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileReceipt {
    pub filename: String,
    pub status: UploadStatus,
    /// Storage transaction id, the durable content identifier
    pub content_id: Option<String>,
    pub error: Option<String>,
}

/// Uploaded files mapped to their durable storage identifiers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaManifest {
    /// Storage transaction id of `manifest.json`
    pub manifest_id: String,
    pub files: Vec<FileReceipt>,
}

impl MediaManifest {
    /// Check a gateway response and extract the manifest
    ///
    /// # Errors
    ///
    /// `Upload` if the body carries an `error`, if no `manifest.json` entry
    /// exists, or if that entry has no transaction id.
    pub fn from_response(response: GatewayResponse) -> DappResult<Self> {
        if let Some(error) = response.error {
            return Err(DappError::Upload(error));
        }

        let manifest = response
            .messages
            .iter()
            .find(|m| m.filename == MANIFEST_FILE_NAME)
            .ok_or_else(|| DappError::Upload(format!("gateway response has no {} entry", MANIFEST_FILE_NAME)))?;

        let manifest_id = match (&manifest.transaction_id, &manifest.error) {
            (Some(id), _) if !id.is_empty() => id.clone(),
            (_, Some(error)) => return Err(DappError::Upload(format!("manifest upload failed: {}", error))),
            _ => return Err(DappError::Upload("manifest has no transaction id".to_string())),
        };

        let files = response
            .messages
            .into_iter()
            .filter(|m| m.filename != MANIFEST_FILE_NAME)
            .map(|m| FileReceipt {
                status: if m.status.eq_ignore_ascii_case("success") {
                    UploadStatus::Success
                } else {
                    UploadStatus::Failed
                },
                filename: m.filename,
                content_id: m.transaction_id,
                error: m.error,
            })
            .collect();

        Ok(Self { manifest_id, files })
    }

    /// Durable URI of the manifest under `base`, e.g. `https://arweave.net/<id>`
    pub fn uri(&self, base: &str) -> String {
        format!("{}/{}", base.trim_end_matches('/'), self.manifest_id)
    }

    pub fn file(&self, name: &str) -> Option<&FileReceipt> {
        self.files.iter().find(|f| f.filename == name)
    }

    pub fn failed_files(&self) -> impl Iterator<Item = &FileReceipt> {
        self.files.iter().filter(|f| f.status == UploadStatus::Failed)
    }
}
