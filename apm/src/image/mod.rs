// SPDX-FileCopyrightText: Copyright © 2025 APM Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Image lifecycle: overlay enablement, host inspection, recipe build,
//! switch and prune. All external tooling goes through [`Runner`], so the
//! operations can be exercised without a bootable host.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};

use log::{debug, info};
use thiserror::Error;
use tokio::process::Command;

pub use self::bootc::HostImage;
pub use self::config::{ImageConfig, Module};

pub mod bootc;
pub mod config;
pub mod dockerfile;
pub mod staged;

use crate::environment;

/// Executes external image tooling (the bootable-container switcher and the
/// OCI builder). Enum dispatch keeps the mock always available to tests.
#[derive(Debug, Clone)]
pub enum Runner {
    Host(HostRunner),
    Mock(MockRunner),
}

impl Runner {
    pub fn host(command_prefix: Option<String>) -> Self {
        Self::Host(HostRunner { command_prefix })
    }

    pub async fn run(&self, program: &str, args: &[&str]) -> Result<String, Error> {
        match self {
            Self::Host(runner) => runner.run(program, args).await,
            Self::Mock(runner) => runner.run(program, args),
        }
    }
}

/// Production runner shelling out on the host, honouring the configured
/// command prefix (e.g. `sudo`).
#[derive(Debug, Clone)]
pub struct HostRunner {
    command_prefix: Option<String>,
}

impl HostRunner {
    async fn run(&self, program: &str, args: &[&str]) -> Result<String, Error> {
        let (binary, prefix_args) = match self.command_prefix.as_deref() {
            Some(prefix) if !prefix.is_empty() => (prefix, vec![program]),
            _ => (program, vec![]),
        };

        debug!("running {program} {args:?}");

        let output = Command::new(binary)
            .args(prefix_args)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|err| Error::Spawn(program.to_owned(), err))?;

        if !output.status.success() {
            return Err(Error::Command {
                program: program.to_owned(),
                status: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Test runner: records every invocation and replays canned stdout keyed
/// on `program subcommand`.
#[derive(Debug, Clone, Default)]
pub struct MockRunner {
    invocations: Arc<Mutex<Vec<Vec<String>>>>,
    responses: Arc<Mutex<HashMap<String, String>>>,
}

impl MockRunner {
    pub fn respond(&self, key: &str, stdout: &str) {
        self.responses
            .lock()
            .expect("mock lock")
            .insert(key.to_owned(), stdout.to_owned());
    }

    pub fn invocations(&self) -> Vec<Vec<String>> {
        self.invocations.lock().expect("mock lock").clone()
    }

    fn run(&self, program: &str, args: &[&str]) -> Result<String, Error> {
        let mut invocation = vec![program.to_owned()];
        invocation.extend(args.iter().map(|arg| (*arg).to_owned()));
        self.invocations
            .lock()
            .expect("mock lock")
            .push(invocation);

        let key = match args.first() {
            Some(subcommand) => format!("{program} {subcommand}"),
            None => program.to_owned(),
        };
        Ok(self
            .responses
            .lock()
            .expect("mock lock")
            .get(&key)
            .cloned()
            .unwrap_or_default())
    }
}

/// The image lifecycle service
#[derive(Debug, Clone)]
pub struct Service {
    runner: Runner,
    /// Where generated recipes land
    resource_dir: PathBuf,
    /// Path of /proc/mounts, injectable for tests
    mounts_path: PathBuf,
}

impl Service {
    pub fn new(runner: Runner, resource_dir: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            resource_dir: resource_dir.into(),
            mounts_path: PathBuf::from("/proc/mounts"),
        }
    }

    #[cfg(test)]
    pub(crate) fn with_mounts(mut self, path: impl AsRef<Path>) -> Self {
        self.mounts_path = path.as_ref().to_path_buf();
        self
    }

    /// Mount the writable overlay over `/usr` unless one is already active.
    /// Failure here is fatal to the calling operation.
    pub async fn enable_overlay(&self) -> Result<(), Error> {
        if self.usr_overlay_mounted().await? {
            debug!("overlay already mounted on /usr");
            return Ok(());
        }

        self.runner
            .run("bootc", &["usr-overlay"])
            .await
            .map_err(|err| Error::Overlay(Box::new(err)))?;

        Ok(())
    }

    async fn usr_overlay_mounted(&self) -> Result<bool, Error> {
        let mounts = fs_err::tokio::read_to_string(&self.mounts_path).await?;
        Ok(mounts.lines().any(|line| {
            let mut fields = line.split_whitespace();
            let _device = fields.next();
            matches!(
                (fields.next(), fields.next()),
                (Some("/usr"), Some("overlay"))
            )
        }))
    }

    /// Inspect the booted/staged images
    pub async fn host_image(&self) -> Result<HostImage, Error> {
        let json = self.runner.run("bootc", &["status", "--json"]).await?;
        Ok(HostImage::parse(&json)?)
    }

    /// Compose a fresh declarative config from the booted image
    pub async fn generate_default_config(&self) -> Result<ImageConfig, Error> {
        let host = self.host_image().await?;
        if host.booted_image.is_empty() {
            return Err(Error::NotAtomicHost);
        }
        Ok(ImageConfig::default_for(host.booted_image))
    }

    /// Render the build recipe for a resolved config
    pub fn generate_dockerfile(&self, config: &ImageConfig) -> Result<String, Error> {
        Ok(dockerfile::generate(config)?)
    }

    /// Build the image from the config and switch the boot target to the
    /// freshly built image in the local container store.
    pub async fn build_and_switch(&self, config: &ImageConfig) -> Result<(), Error> {
        let recipe = self.generate_dockerfile(config)?;

        fs_err::tokio::create_dir_all(&self.resource_dir).await?;
        let dockerfile = self.resource_dir.join("Dockerfile");
        fs_err::tokio::write(&dockerfile, &recipe).await?;

        info!("building image {}", environment::LOCAL_IMAGE_TAG);
        self.runner
            .run(
                "podman",
                &[
                    "build",
                    "--squash",
                    "--pull=always",
                    "-t",
                    environment::LOCAL_IMAGE_TAG,
                    "-f",
                    path_str(&dockerfile),
                    path_str(&self.resource_dir),
                ],
            )
            .await?;

        self.runner
            .run(
                "bootc",
                &[
                    "switch",
                    "--transport",
                    environment::CONTAINERS_STORAGE,
                    environment::LOCAL_IMAGE_TAG,
                ],
            )
            .await?;

        self.prune_old_images().await?;

        Ok(())
    }

    /// Switch the boot target without rebuilding
    pub async fn switch_image(&self, image: &str) -> Result<(), Error> {
        info!("switching boot target to {image}");
        self.runner.run("bootc", &["switch", image]).await?;
        Ok(())
    }

    /// Re-resolve the booted image: local-store images rebuild from the
    /// config, remote images take a plain upgrade.
    pub async fn check_and_update_base_image(&self, config: &ImageConfig) -> Result<(), Error> {
        let host = self.host_image().await?;

        if host.transport != environment::CONTAINERS_STORAGE {
            info!("upgrading booted image via transport {}", host.transport);
            self.runner.run("bootc", &["upgrade"]).await?;
            return Ok(());
        }

        config.check_image()?;
        self.build_and_switch(config).await
    }

    /// Remove dangling images from the container store
    pub async fn prune_old_images(&self) -> Result<(), Error> {
        self.runner.run("podman", &["image", "prune", "-f"]).await?;
        Ok(())
    }
}

fn path_str(path: &Path) -> &str {
    path.to_str().unwrap_or_default()
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("host is not booted from a container image")]
    NotAtomicHost,
    #[error("failed to mount /usr overlay")]
    Overlay(#[source] Box<Error>),
    #[error("failed to spawn {0}")]
    Spawn(String, #[source] std::io::Error),
    #[error("{program} exited with status {status}: {stderr}")]
    Command {
        program: String,
        status: i32,
        stderr: String,
    },
    #[error("config")]
    Config(#[from] config::Error),
    #[error("status output")]
    Status(#[from] serde_json::Error),
    #[error("io")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod test {
    use super::*;

    fn service() -> (tempfile::TempDir, MockRunner, Service) {
        let dir = tempfile::tempdir().unwrap();
        let mock = MockRunner::default();
        let service = Service::new(Runner::Mock(mock.clone()), dir.path().join("resources"));
        (dir, mock, service)
    }

    const STATUS_LOCAL: &str = r#"
    {"status":{"booted":{"image":{"image":{"image":"os","transport":"containers-storage"},
    "imageDigest":"sha256:11"},"pinned":false}}}
    "#;
    const STATUS_REGISTRY: &str = r#"
    {"status":{"booted":{"image":{"image":{"image":"reg/base:latest","transport":"registry"},
    "imageDigest":"sha256:22"},"pinned":false}}}
    "#;

    #[tokio::test]
    async fn overlay_idempotent() {
        let (dir, mock, service) = service();

        let mounts = dir.path().join("mounts");
        std::fs::write(&mounts, "overlay /usr overlay rw 0 0\n").unwrap();
        let service = service.with_mounts(&mounts);

        service.enable_overlay().await.unwrap();
        assert!(mock.invocations().is_empty());

        std::fs::write(&mounts, "/dev/sda1 / ext4 rw 0 0\n").unwrap();
        service.enable_overlay().await.unwrap();
        assert_eq!(mock.invocations(), vec![vec!["bootc", "usr-overlay"]]);
    }

    #[tokio::test]
    async fn build_and_switch_sequence() {
        let (dir, mock, service) = service();

        let mut config = ImageConfig::default_for("base:latest");
        config.add_install_package("curl");

        service.build_and_switch(&config).await.unwrap();

        let invocations = mock.invocations();
        assert_eq!(invocations.len(), 3);
        assert_eq!(invocations[0][0], "podman");
        assert_eq!(invocations[0][1], "build");
        assert!(invocations[0].contains(&"--squash".to_owned()));
        assert!(invocations[0].contains(&"--pull=always".to_owned()));
        assert_eq!(
            invocations[1],
            vec!["bootc", "switch", "--transport", "containers-storage", "os"]
        );
        assert_eq!(invocations[2], vec!["podman", "image", "prune", "-f"]);

        let recipe =
            std::fs::read_to_string(dir.path().join("resources").join("Dockerfile")).unwrap();
        assert!(recipe.starts_with("FROM base:latest"));
    }

    #[tokio::test]
    async fn update_prefers_plain_upgrade_off_local_store() {
        let (_dir, mock, service) = service();
        mock.respond("bootc status", STATUS_REGISTRY);

        let config = ImageConfig::default_for("base:latest");
        service.check_and_update_base_image(&config).await.unwrap();

        let invocations = mock.invocations();
        assert_eq!(invocations[1], vec!["bootc", "upgrade"]);
    }

    #[tokio::test]
    async fn update_rebuilds_local_store_images() {
        let (_dir, mock, service) = service();
        mock.respond("bootc status", STATUS_LOCAL);

        let config = ImageConfig::default_for("base:latest");
        service.check_and_update_base_image(&config).await.unwrap();

        let programs: Vec<_> = mock
            .invocations()
            .into_iter()
            .map(|invocation| invocation[..2.min(invocation.len())].join(" "))
            .collect();
        assert!(programs.contains(&"podman build".to_owned()));
        assert!(programs.contains(&"bootc switch".to_owned()));
    }

    #[tokio::test]
    async fn default_config_from_booted() {
        let (_dir, mock, service) = service();
        mock.respond("bootc status", STATUS_REGISTRY);

        let config = service.generate_default_config().await.unwrap();
        assert_eq!(config.image, "reg/base:latest");
        assert!(config.modules.is_empty());
    }
}
