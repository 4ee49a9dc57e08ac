//! FC-equivalent managed runtime adapter (§4.1). Structurally identical to
//! [`crate::vendor_a::VendorARuntime`] — a different vendor wire shape fed
//! into the same [`crate::skeleton::ManagedRuntimeDriver`] skeleton, per §9
//! "each managed-runtime driver reduces to two `fetch_status` closures".

use async_trait::async_trait;
use deployment::{CreateSpec, DriverError};
use reqwest::Client;
use serde::Deserialize;

use crate::skeleton::{VendorApi, VendorState};

#[derive(Debug, Clone)]
pub struct VendorBConfig {
    pub api_key: String,
    pub api_base: String,
}

pub struct VendorBRuntime {
    config: VendorBConfig,
    http: Client,
}

impl VendorBRuntime {
    pub fn new(config: VendorBConfig) -> Self {
        Self {
            http: Client::new(),
            config,
        }
    }
}

#[derive(Deserialize)]
struct FunctionResponse {
    function_id: String,
}

#[derive(Deserialize)]
struct InstanceStatus {
    status: String,
    public_url: Option<String>,
    error: Option<String>,
}

#[async_trait]
impl VendorApi for VendorBRuntime {
    fn name(&self) -> &'static str {
        "fc"
    }

    async fn create_or_update(&self, spec: &CreateSpec) -> Result<String, DriverError> {
        let body = serde_json::json!({
            "functionName": spec.name,
            "image": spec.image,
            "environmentVariables": spec.environment,
        });

        let resp = self
            .http
            .put(format!("{}/functions/{}", self.config.api_base, spec.name))
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| DriverError::Transport(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(DriverError::ImagePull {
                image: spec.image.clone(),
                reason: format!("fc create_or_update returned {}", resp.status()),
            });
        }

        let parsed: FunctionResponse = resp
            .json()
            .await
            .map_err(|e| DriverError::Transport(e.to_string()))?;
        Ok(parsed.function_id)
    }

    async fn fetch_status(&self, handle: &str) -> Result<VendorState, DriverError> {
        let resp = self
            .http
            .get(format!("{}/functions/{handle}/status", self.config.api_base))
            .bearer_auth(&self.config.api_key)
            .send()
            .await
            .map_err(|e| DriverError::Transport(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(DriverError::Transport(format!(
                "fc status check for {handle} returned {}",
                resp.status()
            )));
        }

        let parsed: InstanceStatus = resp
            .json()
            .await
            .map_err(|e| DriverError::Transport(e.to_string()))?;

        Ok(match parsed.status.as_str() {
            "ready" | "active" => VendorState::Ready {
                endpoint_url: parsed
                    .public_url
                    .ok_or_else(|| DriverError::Transport(format!("fc function {handle} is ready but has no public_url")))?,
            },
            "failed" => VendorState::Failed(parsed.error.unwrap_or_else(|| "unknown failure".to_string())),
            "deleting" => VendorState::Deleting,
            _ => VendorState::Pending,
        })
    }

    async fn stop(&self, handle: &str) -> Result<bool, DriverError> {
        let resp = self
            .http
            .post(format!("{}/functions/{handle}/pause", self.config.api_base))
            .bearer_auth(&self.config.api_key)
            .send()
            .await
            .map_err(|e| DriverError::Transport(e.to_string()))?;
        Ok(resp.status().is_success() || resp.status() == reqwest::StatusCode::NOT_FOUND)
    }

    async fn delete(&self, handle: &str) -> Result<bool, DriverError> {
        let resp = self
            .http
            .delete(format!("{}/functions/{handle}", self.config.api_base))
            .bearer_auth(&self.config.api_key)
            .send()
            .await
            .map_err(|e| DriverError::Transport(e.to_string()))?;
        Ok(resp.status().is_success() || resp.status() == reqwest::StatusCode::NOT_FOUND)
    }
}
