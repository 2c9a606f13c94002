//! FUSE helpers that present a bucket as a filesystem at the staging path.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use libcsi::VolumeId;
use tokio::process::Command;
use tokio::time::Instant;
use tracing::{debug, info, instrument};

use super::{MountError, MountUtils};
use crate::s3::S3Config;

/// How long a helper has to make its mount visible after it returns.
pub const MOUNT_WAIT: Duration = Duration::from_secs(10);
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Mounts one bucket.
#[async_trait]
pub trait Mounter: Send + Sync {
    async fn stage(&self, staging_path: &Path) -> Result<(), MountError>;
}

/// Builds a [`Mounter`] bound to a bucket, its configuration and a volume.
pub trait MounterFactory: Send + Sync {
    fn new_mounter(
        &self,
        bucket: &str,
        config: &S3Config,
        volume_id: &VolumeId,
    ) -> Result<Box<dyn Mounter>, MountError>;
}

/// Supported FUSE helpers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HelperKind {
    S3fs,
    Goofys,
    Rclone,
}

impl HelperKind {
    pub fn program(&self) -> &'static str {
        match self {
            Self::S3fs => "s3fs",
            Self::Goofys => "goofys",
            Self::Rclone => "rclone",
        }
    }
}

impl fmt::Display for HelperKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.program())
    }
}

impl FromStr for HelperKind {
    type Err = MountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "s3fs" => Ok(Self::S3fs),
            "goofys" => Ok(Self::Goofys),
            "rclone" => Ok(Self::Rclone),
            other => Err(MountError::Config(format!("unknown mounter {other}"))),
        }
    }
}

/// A fully resolved helper invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelperCommand {
    pub program: &'static str,
    pub args: Vec<String>,
    /// Credentials travel here, never in `args`.
    pub envs: Vec<(&'static str, String)>,
}

impl HelperCommand {
    pub fn build(kind: HelperKind, bucket: &str, config: &S3Config, target: &Path) -> Self {
        let target = target.display().to_string();
        let endpoint = config.endpoint.as_str().trim_end_matches('/').to_owned();
        let mut args = match kind {
            HelperKind::S3fs => vec![
                bucket.to_owned(),
                target,
                "-o".into(),
                format!("url={endpoint}"),
                "-o".into(),
                format!("endpoint={}", config.region),
                "-o".into(),
                "use_path_request_style".into(),
                "-o".into(),
                "allow_other".into(),
                "-o".into(),
                "mp_umask=000".into(),
            ],
            HelperKind::Goofys => vec![
                "--endpoint".into(),
                endpoint,
                "--region".into(),
                config.region.clone(),
                "-o".into(),
                "allow_other".into(),
                bucket.to_owned(),
                target,
            ],
            HelperKind::Rclone => vec![
                "mount".into(),
                format!(":s3:{bucket}"),
                target,
                "--daemon".into(),
                "--s3-provider=Other".into(),
                "--s3-env-auth=true".into(),
                format!("--s3-endpoint={endpoint}"),
                format!("--s3-region={}", config.region),
                "--allow-other".into(),
                "--vfs-cache-mode=writes".into(),
            ],
        };
        args.extend(config.mount_options.iter().cloned());

        let envs = match kind {
            HelperKind::S3fs => vec![
                ("AWSACCESSKEYID", config.access_key_id.clone()),
                ("AWSSECRETACCESSKEY", config.secret_access_key.clone()),
            ],
            HelperKind::Goofys | HelperKind::Rclone => vec![
                ("AWS_ACCESS_KEY_ID", config.access_key_id.clone()),
                ("AWS_SECRET_ACCESS_KEY", config.secret_access_key.clone()),
            ],
        };

        Self {
            program: kind.program(),
            args,
            envs,
        }
    }
}

/// Produces [`FuseMounter`]s using the helper named in the volume secrets.
#[derive(Clone)]
pub struct FuseMounterFactory {
    mount_utils: Arc<dyn MountUtils>,
    wait: Duration,
}

impl FuseMounterFactory {
    pub fn new(mount_utils: Arc<dyn MountUtils>) -> Self {
        Self {
            mount_utils,
            wait: MOUNT_WAIT,
        }
    }

    pub fn with_wait(mut self, wait: Duration) -> Self {
        self.wait = wait;
        self
    }
}

impl MounterFactory for FuseMounterFactory {
    fn new_mounter(
        &self,
        bucket: &str,
        config: &S3Config,
        volume_id: &VolumeId,
    ) -> Result<Box<dyn Mounter>, MountError> {
        let kind: HelperKind = config.mounter.parse()?;
        Ok(Box::new(FuseMounter {
            kind,
            bucket: bucket.to_owned(),
            config: config.clone(),
            volume_id: volume_id.clone(),
            mount_utils: Arc::clone(&self.mount_utils),
            wait: self.wait,
        }))
    }
}

pub struct FuseMounter {
    kind: HelperKind,
    bucket: String,
    config: S3Config,
    volume_id: VolumeId,
    mount_utils: Arc<dyn MountUtils>,
    wait: Duration,
}

impl FuseMounter {
    async fn wait_for_mount(&self, path: &Path) -> Result<(), MountError> {
        let deadline = Instant::now() + self.wait;
        loop {
            match self.mount_utils.is_mount_point(path).await {
                Ok(true) => return Ok(()),
                Ok(false) | Err(MountError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
            if Instant::now() >= deadline {
                return Err(MountError::Timeout {
                    path: PathBuf::from(path),
                    secs: self.wait.as_secs(),
                });
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}

#[async_trait]
impl Mounter for FuseMounter {
    #[instrument(skip(self), fields(volume_id = %self.volume_id, bucket = %self.bucket, helper = %self.kind))]
    async fn stage(&self, staging_path: &Path) -> Result<(), MountError> {
        let cmd = HelperCommand::build(self.kind, &self.bucket, &self.config, staging_path);
        debug!(args = ?cmd.args, "running mount helper");

        let output = Command::new(cmd.program)
            .args(&cmd.args)
            .envs(cmd.envs.iter().map(|(k, v)| (*k, v.as_str())))
            .output()
            .await
            .map_err(|e| MountError::Helper {
                helper: cmd.program.to_owned(),
                reason: e.to_string(),
            })?;
        if !output.status.success() {
            return Err(MountError::Helper {
                helper: cmd.program.to_owned(),
                reason: format!(
                    "{}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }

        self.wait_for_mount(staging_path).await?;
        info!(path = %staging_path.display(), "bucket mounted");
        Ok(())
    }
}
