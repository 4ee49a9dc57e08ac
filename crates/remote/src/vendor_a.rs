//! AgentRun-equivalent managed runtime adapter (§4.1, §6 `AGENTRUN_*`).
//! Talks to a vendor "runtime" resource plus a default HTTPS endpoint over
//! a bearer-authenticated JSON API.

use async_trait::async_trait;
use deployment::{CreateSpec, DriverError};
use reqwest::Client;
use serde::Deserialize;

use crate::skeleton::VendorApi;
use crate::skeleton::VendorState;

#[derive(Debug, Clone)]
pub struct VendorAConfig {
    pub access_key_id: String,
    pub access_key_secret: String,
    pub account_id: String,
    pub region_id: String,
    pub cpu: u32,
    pub memory_mb: u32,
    pub prefix: String,
    pub api_base: String,
}

pub struct VendorARuntime {
    config: VendorAConfig,
    http: Client,
}

impl VendorARuntime {
    pub fn new(config: VendorAConfig) -> Self {
        Self {
            http: Client::new(),
            config,
        }
    }

    fn auth_header(&self) -> String {
        format!(
            "AK {}:{}",
            self.config.access_key_id, self.config.access_key_secret
        )
    }
}

#[derive(Deserialize)]
struct CreateResponse {
    runtime_id: String,
}

#[derive(Deserialize)]
struct StatusResponse {
    state: String,
    endpoint_url: Option<String>,
    message: Option<String>,
}

#[async_trait]
impl VendorApi for VendorARuntime {
    fn name(&self) -> &'static str {
        "agentrun"
    }

    async fn create_or_update(&self, spec: &CreateSpec) -> Result<String, DriverError> {
        let name = format!("{}{}", self.config.prefix, spec.name);
        let body = serde_json::json!({
            "accountId": self.config.account_id,
            "regionId": self.config.region_id,
            "name": name,
            "image": spec.image,
            "cpu": self.config.cpu,
            "memoryMb": self.config.memory_mb,
            "env": spec.environment,
        });

        let resp = self
            .http
            .post(format!("{}/runtimes", self.config.api_base))
            .header("Authorization", self.auth_header())
            .json(&body)
            .send()
            .await
            .map_err(|e| DriverError::Transport(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(DriverError::ImagePull {
                image: spec.image.clone(),
                reason: format!("agentrun create_or_update returned {}", resp.status()),
            });
        }

        let parsed: CreateResponse = resp
            .json()
            .await
            .map_err(|e| DriverError::Transport(e.to_string()))?;
        Ok(parsed.runtime_id)
    }

    async fn fetch_status(&self, handle: &str) -> Result<VendorState, DriverError> {
        let resp = self
            .http
            .get(format!("{}/runtimes/{handle}", self.config.api_base))
            .header("Authorization", self.auth_header())
            .send()
            .await
            .map_err(|e| DriverError::Transport(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(DriverError::Transport(format!(
                "agentrun status check for {handle} returned {}",
                resp.status()
            )));
        }

        let parsed: StatusResponse = resp
            .json()
            .await
            .map_err(|e| DriverError::Transport(e.to_string()))?;

        Ok(match parsed.state.as_str() {
            "ready" | "active" => VendorState::Ready {
                endpoint_url: parsed
                    .endpoint_url
                    .ok_or_else(|| DriverError::Transport(format!("agentrun runtime {handle} is ready but has no endpoint_url")))?,
            },
            "failed" => VendorState::Failed(parsed.message.unwrap_or_else(|| "unknown failure".to_string())),
            "deleting" => VendorState::Deleting,
            _ => VendorState::Pending,
        })
    }

    async fn stop(&self, handle: &str) -> Result<bool, DriverError> {
        let resp = self
            .http
            .post(format!("{}/runtimes/{handle}/stop", self.config.api_base))
            .header("Authorization", self.auth_header())
            .send()
            .await
            .map_err(|e| DriverError::Transport(e.to_string()))?;
        Ok(resp.status().is_success() || resp.status() == reqwest::StatusCode::NOT_FOUND)
    }

    async fn delete(&self, handle: &str) -> Result<bool, DriverError> {
        let resp = self
            .http
            .delete(format!("{}/runtimes/{handle}", self.config.api_base))
            .header("Authorization", self.auth_header())
            .send()
            .await
            .map_err(|e| DriverError::Transport(e.to_string()))?;
        Ok(resp.status().is_success() || resp.status() == reqwest::StatusCode::NOT_FOUND)
    }
}
