use std::collections::HashMap;
use std::net::TcpStream;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use ssh2::Session;
use thiserror::Error;
use tokio::sync::Mutex;

const SSH_USERNAME: &str = "proxyuser";

#[derive(Debug, Error)]
pub enum SshPoolError {
    #[error("connection pool exhausted for {0}:{1}")]
    Exhausted(String, u16),

    #[error("failed to connect to {0}:{1}: {2}")]
    ConnectFailed(String, u16, std::io::Error),

    #[error("ssh handshake or auth failed: {0}")]
    Ssh(#[from] ssh2::Error),

    #[error("command exited non-zero: {0:?}")]
    CommandFailed(Option<i32>),

    #[error("command timed out against {0}:{1}")]
    TimedOut(String, u16),
}

type Endpoint = (String, u16);

struct PooledConnection {
    session: Session,
    last_used: Instant,
    error_count: u32,
}

/// SSH connection pool reused across repeated commands to the same
/// proxy endpoint (spec §4.H, grounded in the original
/// `SSHProxyClient`). The `ssh2` crate is synchronous, so every
/// session-touching operation runs inside `spawn_blocking`, following
/// the same bridging idiom used for filesystem syncs elsewhere in this
/// codebase.
pub struct SshPool {
    pools: Mutex<HashMap<Endpoint, Vec<PooledConnection>>>,
    private_key_path: PathBuf,
    max_connections: usize,
    idle_timeout: Duration,
    connect_timeout: Duration,
    max_wait_retries: u32,
}

impl SshPool {
    pub fn new(
        private_key_path: PathBuf,
        max_connections: usize,
        idle_timeout: Duration,
        connect_timeout: Duration,
        max_wait_retries: u32,
    ) -> Self {
        Self {
            pools: Mutex::new(HashMap::new()),
            private_key_path,
            max_connections,
            idle_timeout,
            connect_timeout,
            max_wait_retries,
        }
    }

    async fn acquire(&self, host: &str, port: u16) -> Result<Session, SshPoolError> {
        {
            let mut pools = self.pools.lock().await;
            let entries = pools.entry((host.to_string(), port)).or_default();
            if let Some(pos) = entries
                .iter()
                .position(|c| c.session.authenticated() && c.error_count < 3)
            {
                let conn = entries.remove(pos);
                return Ok(conn.session);
            }
        }

        let current_len = {
            let pools = self.pools.lock().await;
            pools.get(&(host.to_string(), port)).map(|v| v.len()).unwrap_or(0)
        };

        if current_len < self.max_connections {
            return self.connect(host, port).await;
        }

        for _ in 0..self.max_wait_retries {
            tokio::time::sleep(Duration::from_secs(1)).await;
            let mut pools = self.pools.lock().await;
            let entries = pools.entry((host.to_string(), port)).or_default();
            if let Some(pos) = entries.iter().position(|c| c.session.authenticated() && c.error_count < 3) {
                let conn = entries.remove(pos);
                return Ok(conn.session);
            }
        }

        Err(SshPoolError::Exhausted(host.to_string(), port))
    }

    async fn connect(&self, host: &str, port: u16) -> Result<Session, SshPoolError> {
        let host = host.to_string();
        let key_path = self.private_key_path.clone();
        let connect_timeout = self.connect_timeout;

        tokio::task::spawn_blocking(move || -> Result<Session, SshPoolError> {
            let tcp = TcpStream::connect_timeout(
                &format!("{host}:{port}")
                    .parse()
                    .map_err(|_| SshPoolError::ConnectFailed(host.clone(), port, std::io::Error::other("bad address")))?,
                connect_timeout,
            )
            .map_err(|e| SshPoolError::ConnectFailed(host.clone(), port, e))?;

            let mut session = Session::new()?;
            session.set_tcp_stream(tcp);
            session.handshake()?;
            session.userauth_pubkey_file(SSH_USERNAME, None, &key_path, None)?;

            Ok(session)
        })
        .await
        .expect("ssh connect task panicked")
    }

    async fn release(&self, host: &str, port: u16, session: Session, error_count: u32) {
        let mut pools = self.pools.lock().await;
        let entries = pools.entry((host.to_string(), port)).or_default();
        entries.push(PooledConnection {
            session,
            last_used: Instant::now(),
            error_count,
        });
    }

    /// Runs `command` on `host:port` once, bounding the blocking
    /// exec/read/wait-close sequence by `timeout` (spec §4.H contract
    /// `exec(conn, commandLine, timeout)`). A connection that has
    /// accumulated 3 or more errors is dropped instead of returned to
    /// the pool. Single-attempt: retry/backoff is owned entirely by the
    /// caller (`RemoteExecutor::run`, spec §4.F), not duplicated here.
    pub async fn execute(&self, host: &str, port: u16, command: &str, timeout: Duration) -> Result<String, SshPoolError> {
        let session = self.acquire(host, port).await?;

        let command_owned = command.to_string();
        let exec = tokio::task::spawn_blocking(move || -> (Result<String, SshPoolError>, Session) {
            let outcome = (|| -> Result<String, SshPoolError> {
                let mut channel = session.channel_session()?;
                channel.exec(&command_owned)?;
                let mut output = String::new();
                std::io::Read::read_to_string(&mut channel, &mut output)
                    .map_err(|e| SshPoolError::ConnectFailed(String::new(), 0, e))?;
                channel.wait_close()?;
                let exit_status = channel.exit_status()?;
                if exit_status != 0 {
                    return Err(SshPoolError::CommandFailed(Some(exit_status)));
                }
                Ok(output)
            })();
            (outcome, session)
        });

        let (outcome, session) = match tokio::time::timeout(timeout, exec).await {
            Ok(joined) => joined.expect("ssh exec task panicked"),
            Err(_) => {
                // The blocking task is still running against the session on
                // the executor; it cannot be cancelled, so the connection is
                // dropped instead of returned to the pool.
                return Err(SshPoolError::TimedOut(host.to_string(), port));
            }
        };

        match outcome {
            Ok(output) => {
                self.release(host, port, session, 0).await;
                Ok(output)
            }
            Err(e) => {
                let error_count = if matches!(e, SshPoolError::CommandFailed(_)) { 0 } else { 1 };
                if error_count < 3 {
                    self.release(host, port, session, error_count).await;
                }
                Err(e)
            }
        }
    }

    /// Drops idle or dead connections older than the configured idle
    /// timeout (spec §4.H `_cleanup_connections`).
    pub async fn reap_idle(&self) {
        let idle_timeout = self.idle_timeout;
        let mut pools = self.pools.lock().await;
        for entries in pools.values_mut() {
            entries.retain(|c| c.last_used.elapsed() < idle_timeout && c.error_count < 3);
        }
    }

    pub async fn close_all(&self) {
        self.pools.lock().await.clear();
    }

    pub async fn pool_stats(&self) -> HashMap<String, usize> {
        let pools = self.pools.lock().await;
        pools
            .iter()
            .map(|((host, port), entries)| (format!("{host}:{port}"), entries.len()))
            .collect()
    }
}

pub type SharedSshPool = Arc<SshPool>;
