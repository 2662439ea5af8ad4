//! `tgtadm`-backed target directory

use async_trait::async_trait;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::Semaphore;

use super::{parse_backing_store_path, LookupError, TargetDirectory};
use crate::config::TargetDirectoryConfig;

/// Queries the target daemon by running its admin command on every lookup
///
/// Each run is bounded by a timeout, and at most `max_concurrent` runs are in
/// flight at once. The child is killed when the lookup future is dropped, so
/// a client disconnect also ends the subprocess.
pub struct TgtadmDirectory {
    program: String,
    args: Vec<String>,
    timeout: Duration,
    permits: Arc<Semaphore>,
}

impl TgtadmDirectory {
    pub fn new(
        program: impl Into<String>,
        args: Vec<String>,
        timeout: Duration,
        max_concurrent: usize,
    ) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    pub fn from_config(config: &TargetDirectoryConfig) -> Self {
        Self::new(
            config.program.clone(),
            config.args.clone(),
            Duration::from_secs(config.timeout_seconds),
            config.max_concurrent,
        )
    }

    /// Run the admin command and return its standard output
    ///
    /// The timeout covers the wait for a concurrency permit as well as the
    /// command itself.
    pub async fn list_targets(&self) -> Result<String, LookupError> {
        match tokio::time::timeout(self.timeout, self.run_command()).await {
            Ok(result) => result,
            Err(_) => Err(LookupError::Timeout {
                program: self.program.clone(),
                timeout: self.timeout,
            }),
        }
    }

    async fn run_command(&self) -> Result<String, LookupError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| LookupError::Closed)?;

        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let output = command.output().await.map_err(|source| LookupError::Spawn {
            program: self.program.clone(),
            source,
        })?;

        if !output.status.success() {
            return Err(LookupError::Exit {
                program: self.program.clone(),
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl TargetDirectory for TgtadmDirectory {
    fn name(&self) -> &str {
        &self.program
    }

    async fn lookup_backing_path(&self, volume_id: &str) -> Result<Option<String>, LookupError> {
        let output = self.list_targets().await?;
        tracing::debug!(
            program = %self.program,
            output_size = output.len(),
            output = %output,
            "Listed iSCSI targets"
        );
        Ok(parse_backing_store_path(&output, volume_id))
    }
}
