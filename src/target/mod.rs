//! Lookup of iSCSI backing stores exported by the local target daemon

mod tgtadm;

use async_trait::async_trait;
use std::process::ExitStatus;
use std::time::Duration;

pub use tgtadm::TgtadmDirectory;

/// Marker of the `tgtadm --op show` line carrying a LUN's backing store
pub const BACKING_STORE_MARKER: &str = "Backing store path:";

/// Source of volume → backing store path mappings
#[async_trait]
pub trait TargetDirectory: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str;

    /// Backing store path of `volume_id`, `None` if the daemon does not export it
    async fn lookup_backing_path(&self, volume_id: &str) -> Result<Option<String>, LookupError>;
}

#[derive(Debug, thiserror::Error)]
pub enum LookupError {
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with {status}: {stderr}")]
    Exit {
        program: String,
        status: ExitStatus,
        stderr: String,
    },

    #[error("{program} did not finish within {timeout:?}")]
    Timeout { program: String, timeout: Duration },

    #[error("target directory is closed")]
    Closed,
}

/// Find the backing store path of `volume_id` in target daemon output
///
/// Takes the first line, in output order, that carries the backing store
/// marker and mentions the volume id, and returns the trimmed text after its
/// first colon.
pub fn parse_backing_store_path(output: &str, volume_id: &str) -> Option<String> {
    if volume_id.is_empty() {
        return None;
    }

    let line = output
        .lines()
        .find(|line| line.contains(BACKING_STORE_MARKER) && line.contains(volume_id))?;
    let (_, path) = line.split_once(':')?;
    let path = path.trim();

    if path.is_empty() {
        None
    } else {
        Some(path.to_string())
    }
}
