//! Public Minecraft profile directory lookup

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use crate::config::MojangConfig;

#[async_trait]
pub trait ProfileDirectory: Send + Sync {
    /// UUID of the account with this name. Unknown names, rate limiting and transport
    /// errors all yield `None`.
    async fn lookup_uuid(&self, username: &str) -> Option<String>;
}

#[derive(Deserialize)]
struct ProfileResponse { id: String }

pub struct MojangProfiles {
    http: reqwest::Client,
    api_base: String,
}

impl MojangProfiles {
    pub fn new(cfg: &MojangConfig) -> reqwest::Result<Self> {
        let http = reqwest::Client::builder().timeout(cfg.timeout).build()?;
        Ok(Self { http, api_base: cfg.api_base.trim_end_matches('/').to_string() })
    }
}

#[async_trait]
impl ProfileDirectory for MojangProfiles {
    async fn lookup_uuid(&self, username: &str) -> Option<String> {
        let url = format!("{}/users/profiles/minecraft/{}", self.api_base, username);
        let resp = match self.http.get(url).send().await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(username, error = %e, "Profile lookup failed");
                return None;
            }
        };
        match resp.status() {
            StatusCode::OK => match resp.json::<ProfileResponse>().await {
                Ok(profile) => Some(profile.id),
                Err(e) => {
                    tracing::warn!(username, error = %e, "Unreadable profile response");
                    None
                }
            },
            StatusCode::NO_CONTENT | StatusCode::NOT_FOUND => None,
            StatusCode::TOO_MANY_REQUESTS => {
                tracing::warn!(username, "Profile lookup rate limited");
                None
            }
            status => {
                tracing::warn!(username, %status, "Unexpected profile lookup status");
                None
            }
        }
    }
}
