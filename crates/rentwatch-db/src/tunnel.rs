//! Scoped access to the durable store, directly or through an SSH tunnel.

use std::future::Future;
use std::process::Stdio;
use std::time::Duration;

use rentwatch_core::{AppConfig, SshTunnelConfig, StoreAccess};
use sqlx::PgPool;
use tokio::net::{TcpListener, TcpStream};
use tokio::process::{Child, Command};

use crate::{connect_options, connect_pool_with, DbError, PoolConfig};

const TUNNEL_READY_ATTEMPTS: u32 = 50;
const TUNNEL_READY_INTERVAL: Duration = Duration::from_millis(100);

/// A running `ssh -N -L` port forward.
///
/// The child process is killed when the tunnel is closed or dropped.
pub struct SshTunnel {
    child: Child,
    local_port: u16,
}

impl SshTunnel {
    /// Forwards a free local port to `remote_host:remote_port` as seen from
    /// the SSH jump host, and waits until the local end accepts connections.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Tunnel`] if `ssh` cannot be spawned, exits early, or
    /// the forward does not come up in time.
    pub async fn open(
        ssh: &SshTunnelConfig,
        remote_host: &str,
        remote_port: u16,
    ) -> Result<Self, DbError> {
        let local_port = free_local_port().await?;

        let mut command = Command::new("ssh");
        command
            .args(["-N", "-o", "ExitOnForwardFailure=yes", "-o", "BatchMode=yes"])
            .arg("-L")
            .arg(format!("{local_port}:{remote_host}:{remote_port}"));
        if let Some(key) = &ssh.key_path {
            command.arg("-i").arg(key);
        }
        let child = command
            .arg(format!("{}@{}", ssh.user, ssh.host))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| DbError::Tunnel(format!("could not spawn ssh: {e}")))?;

        let mut tunnel = Self { child, local_port };
        tunnel.wait_until_ready().await?;
        tracing::info!(
            ssh_host = %ssh.host,
            local_port,
            remote = %format!("{remote_host}:{remote_port}"),
            "SSH tunnel established"
        );
        Ok(tunnel)
    }

    #[must_use]
    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    /// Stops the forward. Safe to call after the process already exited.
    pub async fn close(mut self) {
        if let Err(e) = self.child.kill().await {
            tracing::debug!(error = %e, "ssh process already gone");
        }
        tracing::debug!(local_port = self.local_port, "SSH tunnel closed");
    }

    async fn wait_until_ready(&mut self) -> Result<(), DbError> {
        for _ in 0..TUNNEL_READY_ATTEMPTS {
            if let Some(status) = self
                .child
                .try_wait()
                .map_err(|e| DbError::Tunnel(format!("could not poll ssh: {e}")))?
            {
                return Err(DbError::Tunnel(format!("ssh exited early with {status}")));
            }
            if TcpStream::connect(("127.0.0.1", self.local_port)).await.is_ok() {
                return Ok(());
            }
            tokio::time::sleep(TUNNEL_READY_INTERVAL).await;
        }
        Err(DbError::Tunnel(format!(
            "local port {} did not open within {:?}",
            self.local_port,
            TUNNEL_READY_INTERVAL * TUNNEL_READY_ATTEMPTS
        )))
    }
}

async fn free_local_port() -> Result<u16, DbError> {
    let listener = TcpListener::bind(("127.0.0.1", 0))
        .await
        .map_err(|e| DbError::Tunnel(format!("no free local port: {e}")))?;
    let port = listener
        .local_addr()
        .map_err(|e| DbError::Tunnel(format!("no free local port: {e}")))?
        .port();
    Ok(port)
}

/// Runs `body` with a pool on the configured store, then releases everything.
///
/// With [`StoreAccess::Direct`] the pool connects straight to the store. With
/// [`StoreAccess::Tunnel`] an SSH forward is opened first and the pool goes
/// through it. The pool is closed and the tunnel torn down whether `body`
/// succeeds or fails; if `body` panics, dropping the tunnel kills `ssh`.
///
/// # Errors
///
/// Returns the error from connecting (converted into `E`) or from `body`.
pub async fn with_store<T, E, F, Fut>(config: &AppConfig, body: F) -> Result<T, E>
where
    F: FnOnce(PgPool) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: From<DbError>,
{
    let pool_config = PoolConfig::from_app_config(config);
    let options = connect_options(config)?;

    match &config.store_access {
        StoreAccess::Direct => {
            let pool = connect_pool_with(options, pool_config)
                .await
                .map_err(DbError::from)?;
            let result = body(pool.clone()).await;
            pool.close().await;
            result
        }
        StoreAccess::Tunnel(ssh) => {
            let tunnel = SshTunnel::open(ssh, &config.db_host, config.db_port).await?;
            let options = options.host("127.0.0.1").port(tunnel.local_port());
            let pool = match connect_pool_with(options, pool_config).await {
                Ok(pool) => pool,
                Err(e) => {
                    tunnel.close().await;
                    return Err(DbError::from(e).into());
                }
            };
            let result = body(pool.clone()).await;
            pool.close().await;
            tunnel.close().await;
            result
        }
    }
}
