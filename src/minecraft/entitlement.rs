//! Applies purchased ranks inside the live game server.

use async_trait::async_trait;
use std::time::Duration;
use crate::config::RconConfig;
use crate::minecraft::rcon::{RconClient, RconError};

#[async_trait]
pub trait EntitlementGateway: Send + Sync {
    /// Grants `rank_name` to `username`. Returns `false` on any failure; the cause is logged.
    async fn apply_rank(&self, username: &str, rank_name: &str) -> bool;
}

/// Permission group name for a rank: lowercase, spaces replaced by underscores.
pub fn normalize_rank_name(rank_name: &str) -> String {
    rank_name.trim().to_lowercase().replace(' ', "_")
}

/// LuckPerms command adding the player to the rank's parent group.
pub fn grant_command(username: &str, rank_name: &str) -> String {
    format!("lp user {username} parent add {}", normalize_rank_name(rank_name))
}

/// RCON-backed gateway. Each attempt opens a fresh connection, bounded by the configured timeout.
pub struct RconEntitlements {
    cfg: RconConfig,
    retry_delay: Duration,
}

impl RconEntitlements {
    pub fn new(cfg: RconConfig) -> Self { Self { cfg, retry_delay: Duration::from_millis(500) } }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    async fn send(&self, command: &str) -> Result<String, RconError> {
        let mut client = RconClient::connect(&self.cfg.address(), &self.cfg.password).await?;
        client.command(command).await
    }
}

#[async_trait]
impl EntitlementGateway for RconEntitlements {
    async fn apply_rank(&self, username: &str, rank_name: &str) -> bool {
        if username.is_empty() {
            tracing::error!(rank = rank_name, "Cannot apply rank without a Minecraft username");
            return false;
        }
        let command = grant_command(username, rank_name);
        let attempts = self.cfg.max_attempts.max(1);
        for attempt in 1..=attempts {
            tracing::info!(addr = %self.cfg.address(), attempt, %command, "Sending rank command");
            match tokio::time::timeout(self.cfg.timeout, self.send(&command)).await {
                Ok(Ok(response)) => {
                    tracing::info!(username, rank = rank_name, %response, "Rank applied");
                    return true;
                }
                Ok(Err(RconError::AuthFailed)) => {
                    tracing::error!("RCON password rejected by the game server");
                    return false;
                }
                Ok(Err(e)) => tracing::warn!(attempt, error = %e, "Rank command failed"),
                Err(_) => tracing::warn!(attempt, timeout = ?self.cfg.timeout, "Rank command timed out"),
            }
            if attempt < attempts {
                tokio::time::sleep(self.retry_delay * attempt).await;
            }
        }
        tracing::error!(username, rank = rank_name, attempts, "Giving up applying rank");
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::minecraft::rcon::tests::fake_server;

    fn config(addr: &str, password: &str) -> RconConfig {
        let (host, port) = addr.rsplit_once(':').unwrap();
        RconConfig { host: host.into(), port: port.parse().unwrap(), password: password.into(), timeout: Duration::from_secs(2), max_attempts: 2 }
    }

    #[test]
    fn test_normalize_rank_name() {
        assert_eq!(normalize_rank_name("Hero"), "hero");
        assert_eq!(normalize_rank_name(" Grand Champion "), "grand_champion");
        assert_eq!(grant_command("Steve", "Grand Champion"), "lp user Steve parent add grand_champion");
    }

    #[tokio::test]
    async fn test_apply_rank_sends_luckperms_command() {
        let (addr, mut seen) = fake_server("secret").await;
        let gateway = RconEntitlements::new(config(&addr, "secret"));
        assert!(gateway.apply_rank("Steve", "Hero").await);
        assert_eq!(seen.recv().await.as_deref(), Some("lp user Steve parent add hero"));
    }

    #[tokio::test]
    async fn test_bad_password_is_soft_failure() {
        let (addr, _) = fake_server("secret").await;
        assert!(!RconEntitlements::new(config(&addr, "wrong")).apply_rank("Steve", "Hero").await);
    }

    #[tokio::test]
    async fn test_unreachable_server_is_soft_failure() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);
        let gateway = RconEntitlements::new(config(&addr, "secret")).with_retry_delay(Duration::from_millis(1));
        assert!(!gateway.apply_rank("Steve", "Hero").await);
    }
}
