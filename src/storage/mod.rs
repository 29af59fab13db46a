//! Durable media storage
//!
//! Files are priced, paid for on-chain, then posted to the gateway tagged
//! with the funding transaction. The gateway answers with one receipt per
//! file plus a `manifest.json` entry whose transaction id becomes the
//! asset's metadata URI.

pub mod gateway;
pub mod manifest;
pub mod pricing;

pub use gateway::{HttpStorageGateway, StorageGateway, UploadRequest, UploadTag};
pub use manifest::{FileReceipt, GatewayMessage, GatewayResponse, MediaManifest, UploadStatus, MANIFEST_FILE_NAME};
pub use pricing::{LinearPricer, StoragePricer};

use crate::errors::DappResult;
use crate::metrics::{record, Timer};

/// Upload `request` and extract its manifest
///
/// # Errors
///
/// `Upload` for transport failures, non-2xx statuses, a body `error`, or a
/// missing manifest transaction id.
pub async fn upload_files<G: StorageGateway + ?Sized>(gateway: &G, request: &UploadRequest) -> DappResult<MediaManifest> {
    record(|m| m.uploads_total.inc());
    let timer = Timer::start();

    let result = gateway
        .upload(request)
        .await
        .and_then(MediaManifest::from_response);
    timer.finish(|m| &m.upload_latency);

    match &result {
        Ok(manifest) => tracing::debug!(
            manifest_id = %manifest.manifest_id,
            files = manifest.files.len(),
            "Upload accepted"
        ),
        Err(err) => {
            record(|m| m.uploads_failed.inc());
            tracing::warn!(error = %err, "Upload rejected");
        }
    }
    result
}
