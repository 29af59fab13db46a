//! HTTP storage gateway client

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Serialize;
use solana_sdk::{pubkey::Pubkey, signature::Signature};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

use crate::errors::{DappError, DappResult};
use crate::storage::manifest::GatewayResponse;
use crate::types::MediaFile;

/// Key/value tag attached to a stored file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadTag {
    pub name: String,
    pub value: String,
}

/// One multipart upload
#[derive(Debug, Clone)]
pub struct UploadRequest {
    /// Funding transaction, for provenance
    pub transaction: Signature,
    /// Network name the funding transaction landed on
    pub env: String,
    /// Tags per file name
    pub tags: BTreeMap<String, Vec<UploadTag>>,
    pub files: Vec<MediaFile>,
}

impl UploadRequest {
    /// Upload of `files` paid by `transaction`, each tagged with `mint`
    pub fn for_mint(transaction: Signature, env: impl Into<String>, mint: &Pubkey, files: Vec<MediaFile>) -> Self {
        let tags = files
            .iter()
            .map(|f| {
                (
                    f.name.clone(),
                    vec![UploadTag {
                        name: "mint".to_string(),
                        value: mint.to_string(),
                    }],
                )
            })
            .collect();
        Self {
            transaction,
            env: env.into(),
            tags,
            files,
        }
    }

    pub fn total_bytes(&self) -> u64 {
        self.files.iter().map(MediaFile::size).sum()
    }
}

/// Object storage / pinning service
#[async_trait]
pub trait StorageGateway: Send + Sync {
    /// Post `request` and return the parsed body
    ///
    /// Fails with `Upload` on transport errors and non-2xx statuses. An
    /// `error` inside a 2xx body is left for the caller to interpret.
    async fn upload(&self, request: &UploadRequest) -> DappResult<GatewayResponse>;
}

/// Gateway reached over HTTP with a multipart form
#[derive(Debug, Clone)]
pub struct HttpStorageGateway {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpStorageGateway {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> DappResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DappError::Configuration(format!("storage http client: {}", e)))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    fn build_form(request: &UploadRequest) -> DappResult<Form> {
        let tags = serde_json::to_string(&request.tags)
            .map_err(|e| DappError::internal(format!("tags encoding: {}", e)))?;

        let mut form = Form::new()
            .text("transaction", request.transaction.to_string())
            .text("env", request.env.clone())
            .text("tags", tags);

        for file in &request.files {
            let mut part = Part::bytes(file.bytes.clone()).file_name(file.name.clone());
            if let Some(content_type) = &file.content_type {
                part = part
                    .mime_str(content_type)
                    .map_err(|e| DappError::validation(format!("content type of {}: {}", file.name, e)))?;
            }
            form = form.part("file[]", part);
        }
        Ok(form)
    }
}

#[async_trait]
impl StorageGateway for HttpStorageGateway {
    async fn upload(&self, request: &UploadRequest) -> DappResult<GatewayResponse> {
        debug!(
            endpoint = %self.endpoint,
            transaction = %request.transaction,
            files = request.files.len(),
            "Posting upload"
        );

        let form = Self::build_form(request)?;
        let response = self.client.post(&self.endpoint).multipart(form).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DappError::Upload(format!("gateway returned {}: {}", status, body.trim())));
        }

        response
            .json::<GatewayResponse>()
            .await
            .map_err(|e| DappError::Upload(format!("unreadable gateway response: {}", e)))
    }
}
