use std::collections::HashMap;

use thiserror::Error;

use crate::config::{ClusterConfig, ExecutorConfig, ExecutorMode};
use crate::proxy::{ProxyError, ServiceKind, SharedProxyDiscovery};
use crate::ssh_pool::{SharedSshPool, SshPoolError};

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("local command failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("command exited non-zero: {0:?}: {1}")]
    NonZero(Option<i32>, String),

    #[error("proxy discovery error: {0}")]
    Proxy(#[from] ProxyError),

    #[error("ssh transport error: {0}")]
    Ssh(#[from] SshPoolError),

    #[error("failed to parse command output as JSON: {0}")]
    BadOutput(#[from] serde_json::Error),
}

/// Runs `occ`/photoprism CLI commands either locally via `docker exec`
/// or remotely through the SSH proxy pool, transparently retrying on
/// transport failures (spec §4.F). Grounded in the teacher's
/// `nextcloud.rs::run_occ_scan` for the local path and the original's
/// `DockerExecutor`/`SSHProxyClient` split for the cluster path; the
/// distillation's two near-duplicate executor interfaces collapse into
/// one `ServiceKind`-parameterized executor (spec §9 Open Question).
pub struct RemoteExecutor {
    config: ExecutorConfig,
    cluster: ClusterConfig,
    proxy_discovery: Option<SharedProxyDiscovery>,
    ssh_pool: Option<SharedSshPool>,
}

impl RemoteExecutor {
    pub fn new(
        config: ExecutorConfig,
        cluster: ClusterConfig,
        proxy_discovery: Option<SharedProxyDiscovery>,
        ssh_pool: Option<SharedSshPool>,
    ) -> Self {
        Self {
            config,
            cluster,
            proxy_discovery,
            ssh_pool,
        }
    }

    fn container_for(&self, kind: ServiceKind) -> &str {
        match kind {
            ServiceKind::Nextcloud => &self.config.nextcloud_container,
            ServiceKind::Photoprism => &self.config.photoprism_container,
        }
    }

    fn use_cluster(&self) -> bool {
        matches!(self.config.mode, ExecutorMode::Cluster)
            || (matches!(self.config.mode, ExecutorMode::Auto)
                && self.proxy_discovery.is_some()
                && self.ssh_pool.is_some())
    }

    /// Runs `occ files:scan --path=<path>` against the Nextcloud
    /// container, the second step of the downstream indexing chain
    /// (spec §4.J: `PhotoPrism import`, then `Nextcloud files:scan`,
    /// then `Nextcloud memories:index`).
    pub async fn occ_files_scan(&self, path: &str) -> Result<(), ExecutorError> {
        self.run(ServiceKind::Nextcloud, &format!("php occ files:scan --path={path}"))
            .await
            .map(|_| ())
    }

    /// Runs `occ memories:index`, the final step of the downstream
    /// indexing chain (spec §4.J).
    pub async fn occ_memories_index(&self) -> Result<(), ExecutorError> {
        self.run(ServiceKind::Nextcloud, "php occ memories:index").await.map(|_| ())
    }

    /// Triggers a PhotoPrism library import with `--move`, the first
    /// step of the downstream indexing chain (spec §4.J).
    pub async fn photoprism_import(&self) -> Result<(), ExecutorError> {
        self.run(ServiceKind::Photoprism, "photoprism import --move")
            .await
            .map(|_| ())
    }

    /// Lists Nextcloud user IDs via `occ user:list --output=json`, which
    /// prints a JSON object mapping username to display name (spec §6
    /// convenience operation). A parse failure is an ordinary
    /// `BadOutput` error, not a panic.
    pub async fn list_users(&self) -> Result<Vec<String>, ExecutorError> {
        let output = self
            .run(ServiceKind::Nextcloud, "php occ user:list --output=json")
            .await?;
        let users: HashMap<String, serde_json::Value> = serde_json::from_str(&output)?;
        Ok(users.into_keys().collect())
    }

    /// Attempts `command` up to `config.retries` times with `2^attempt`
    /// second backoff between attempts. Transport/discovery failures
    /// and plain command failures are retried alike up to the
    /// configured count (spec §4.F).
    async fn run(&self, kind: ServiceKind, command: &str) -> Result<String, ExecutorError> {
        let retries = self.config.retries.max(1);
        let mut last_err = None;

        for attempt in 0..retries {
            if attempt > 0 {
                tokio::time::sleep(std::time::Duration::from_secs(2u64.pow(attempt))).await;
            }

            let result = if self.use_cluster() {
                self.run_cluster(kind, command).await
            } else {
                self.run_local(kind, command).await
            };

            match result {
                Ok(output) => return Ok(output),
                Err(e) => last_err = Some(e),
            }
        }

        Err(last_err.expect("loop runs at least once"))
    }

    async fn run_local(&self, kind: ServiceKind, command: &str) -> Result<String, ExecutorError> {
        let container = self.container_for(kind);
        let mut args = vec!["exec".to_string(), container.to_string()];
        args.extend(command.split_whitespace().map(|s| s.to_string()));

        let output = tokio::time::timeout(
            std::time::Duration::from_millis(self.config.command_timeout_ms),
            tokio::process::Command::new(&self.config.container_engine)
                .args(&args)
                .kill_on_drop(true)
                .output(),
        )
        .await
        .map_err(|_| ExecutorError::NonZero(None, "command timed out".to_string()))??;

        if !output.status.success() {
            return Err(ExecutorError::NonZero(
                output.status.code(),
                String::from_utf8_lossy(&output.stderr).into_owned(),
            ));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn run_cluster(&self, kind: ServiceKind, command: &str) -> Result<String, ExecutorError> {
        let proxy_discovery = self
            .proxy_discovery
            .as_ref()
            .expect("cluster mode requires proxy discovery");
        let ssh_pool = self.ssh_pool.as_ref().expect("cluster mode requires ssh pool");

        let service = proxy_discovery.discover(kind, kind.label().to_string(), false).await?;
        let host = service
            .ip_address
            .map(|ip| ip.to_string())
            .unwrap_or(service.hostname.clone());

        let full_command = format!(
            "{} exec {} {}",
            self.config.container_engine,
            self.container_for(kind),
            command
        );

        let timeout = std::time::Duration::from_millis(self.config.command_timeout_ms);
        match ssh_pool.execute(&host, service.port, &full_command, timeout).await {
            Ok(output) => {
                proxy_discovery.mark_success(kind).await;
                Ok(output)
            }
            Err(e) => {
                proxy_discovery.mark_error(kind).await;
                Err(ExecutorError::Ssh(e))
            }
        }
    }
}
