//! Rewrites iSCSI attachment descriptors into local block devices
//!
//! Cinder answers an attachment update with the iSCSI connection details of
//! the volume. When the consumer runs on the same host as the target daemon,
//! it can open the backing store directly instead of logging into the target,
//! so the descriptor is rewritten to `driver_volume_type: local` with the
//! backing store as `device_path`.

use async_trait::async_trait;
use std::sync::Arc;

use crate::hooks::{settle, FailurePolicy, HookError, JsonHook, ProxiedResponse, Stage};
use crate::json::JsonDocument;
use crate::target::TargetDirectory;

pub const DRIVER_VOLUME_TYPE_PATH: &str = "attachment.connection_info.driver_volume_type";
pub const DEVICE_PATH_PATH: &str = "attachment.connection_info.device_path";
pub const VOLUME_ID_PATH: &str = "attachment.volume_id";
pub const LOCAL_DRIVER_VOLUME_TYPE: &str = "local";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RewriteStep {
    ReadVolumeId,
    LookupBackingStore,
    MarkLocal,
    SetDevicePath,
}

impl Stage for RewriteStep {
    fn policy(&self) -> FailurePolicy {
        match self {
            RewriteStep::ReadVolumeId => FailurePolicy::AbortChain,
            RewriteStep::LookupBackingStore
            | RewriteStep::MarkLocal
            | RewriteStep::SetDevicePath => FailurePolicy::ForwardUnmodified,
        }
    }
}

pub struct VolumeAttachmentRewriter {
    directory: Arc<dyn TargetDirectory>,
}

impl VolumeAttachmentRewriter {
    pub fn new(directory: Arc<dyn TargetDirectory>) -> Self {
        Self { directory }
    }

    /// Rewrite an attachment document in place
    ///
    /// The document is left untouched when the target directory cannot be
    /// queried. `driver_volume_type` is only replaced when it is present, and
    /// `device_path` only when the directory knows the volume.
    pub async fn rewrite(&self, document: &mut JsonDocument) -> Result<(), HookError> {
        tracing::debug!(body = %document, "Got attachment response");

        let has_driver_volume_type = document.contains(DRIVER_VOLUME_TYPE_PATH);

        let volume_id = document
            .get_str(VOLUME_ID_PATH)
            .map(str::to_string)
            .map_err(HookError::Contract);
        let Some(volume_id) = settle(RewriteStep::ReadVolumeId, volume_id)? else {
            return Ok(());
        };
        tracing::debug!(volume_id = %volume_id, "Filtering backing stores for volume");

        let lookup = self
            .directory
            .lookup_backing_path(&volume_id)
            .await
            .map_err(HookError::from);
        if let Err(e) = &lookup {
            tracing::error!(
                directory = self.directory.name(),
                volume_id = %volume_id,
                error = %e,
                "Failed to list iSCSI targets, forwarding attachment unchanged"
            );
        }
        let Some(backing_path) = settle(RewriteStep::LookupBackingStore, lookup)? else {
            return Ok(());
        };

        if has_driver_volume_type {
            tracing::debug!(
                from = ?document.get(DRIVER_VOLUME_TYPE_PATH).ok(),
                to = LOCAL_DRIVER_VOLUME_TYPE,
                "Replacing driver_volume_type"
            );
            let marked = document
                .set(DRIVER_VOLUME_TYPE_PATH, LOCAL_DRIVER_VOLUME_TYPE)
                .map_err(HookError::from);
            settle(RewriteStep::MarkLocal, marked)?;
        }

        match backing_path {
            Some(path) => {
                tracing::debug!(volume_id = %volume_id, device_path = %path, "Setting device_path");
                let written = document.set(DEVICE_PATH_PATH, path).map_err(HookError::from);
                settle(RewriteStep::SetDevicePath, written)?;
            }
            None => {
                tracing::error!(
                    directory = self.directory.name(),
                    volume_id = %volume_id,
                    "Failed to find backing volume path"
                );
            }
        }

        tracing::debug!(body = %document, "Sending rewritten attachment response");
        Ok(())
    }
}

#[async_trait]
impl JsonHook for VolumeAttachmentRewriter {
    fn name(&self) -> &str {
        "volume_attachment_local"
    }

    fn description(&self) -> &str {
        "Rewrites iSCSI attachments to driver_volume_type=local with the tgtd backing store as device_path"
    }

    async fn apply(
        &self,
        response: &mut ProxiedResponse,
        document: &mut JsonDocument,
    ) -> Result<(), HookError> {
        if !response.status.is_success() {
            tracing::debug!(
                status = %response.status,
                "Attachment request failed upstream, leaving error body alone"
            );
            return Ok(());
        }
        self.rewrite(document).await
    }
}
