//! Domain hooks for Cinder attachment responses

mod volume_attachment;

use std::sync::Arc;

use crate::hooks::HookChain;
use crate::target::TargetDirectory;

pub use volume_attachment::{
    RewriteStep, VolumeAttachmentRewriter, DEVICE_PATH_PATH, DRIVER_VOLUME_TYPE_PATH,
    LOCAL_DRIVER_VOLUME_TYPE, VOLUME_ID_PATH,
};

/// Hook chain for attachment update responses, built on top of `base`
pub fn attachment_chain(base: &HookChain, directory: Arc<dyn TargetDirectory>) -> HookChain {
    base.register_json(Arc::new(VolumeAttachmentRewriter::new(directory)))
}
