//! The generic managed-runtime polling skeleton (§9). Each vendor supplies
//! a [`VendorApi`] impl; [`ManagedRuntimeDriver`] reduces the whole
//! five-op [`deployment::BackendDriver`] contract to that one adapter plus
//! `utils::retry::poll_until_terminal`.

use std::time::Duration;

use async_trait::async_trait;
use db::{DriverStatus, PortEntry};
use deployment::{BackendDriver, CreateOutcome, CreateSpec, DriverError, InspectResult};
use utils::retry::{PollError, poll_until_terminal};

/// Terminal/non-terminal states a vendor runtime object can report.
/// Mirrors §4.1: poll until `Ready`/`Active`, `Failed`, or `Deleting`.
#[derive(Debug, Clone)]
pub enum VendorState {
    Pending,
    Ready { endpoint_url: String },
    Failed(String),
    Deleting,
}

impl VendorState {
    fn is_terminal(&self) -> bool {
        !matches!(self, VendorState::Pending)
    }
}

/// What a vendor adapter must supply. Every method is a thin HTTP call to
/// the vendor's control-plane API; no retry/backoff logic belongs here —
/// that is entirely the skeleton's job.
#[async_trait]
pub trait VendorApi: Send + Sync {
    fn name(&self) -> &'static str;

    /// Creates or updates the vendor runtime object plus its default
    /// endpoint (§4.1). Returns the vendor-assigned handle.
    async fn create_or_update(&self, spec: &CreateSpec) -> Result<String, DriverError>;

    async fn fetch_status(&self, handle: &str) -> Result<VendorState, DriverError>;

    /// Best-effort pause; vendor runtimes without a distinct stop operation
    /// may treat this as a no-op success (idempotent per §4.1).
    async fn stop(&self, handle: &str) -> Result<bool, DriverError>;

    async fn delete(&self, handle: &str) -> Result<bool, DriverError>;

    fn max_poll_attempts(&self) -> u32 {
        60
    }

    fn poll_interval(&self) -> Duration {
        Duration::from_secs(2)
    }
}

pub struct ManagedRuntimeDriver<V: VendorApi> {
    vendor: V,
}

impl<V: VendorApi> ManagedRuntimeDriver<V> {
    pub fn new(vendor: V) -> Self {
        Self { vendor }
    }

    /// Splits a vendor endpoint URL into `(host, path, protocol)`. Managed
    /// runtimes are always fronted by TLS (§4.1: `protocol=https`).
    fn parse_endpoint(url: &str) -> Result<(String, String), DriverError> {
        let parsed = url::Url::parse(url)
            .map_err(|e| DriverError::Transport(format!("vendor returned an unparsable endpoint url {url:?}: {e}")))?;
        let host = parsed
            .host_str()
            .ok_or_else(|| DriverError::Transport(format!("vendor endpoint url {url:?} has no host")))?
            .to_string();
        let path = parsed.path().trim_start_matches('/').to_string();
        Ok((host, path))
    }
}

#[async_trait]
impl<V: VendorApi> BackendDriver for ManagedRuntimeDriver<V> {
    fn name(&self) -> &'static str {
        self.vendor.name()
    }

    async fn create(&self, spec: CreateSpec) -> Result<Option<CreateOutcome>, DriverError> {
        let handle = match self.vendor.create_or_update(&spec).await {
            Ok(h) => h,
            Err(e) => {
                tracing::warn!(vendor = self.vendor.name(), "create_or_update failed: {e}");
                return Ok(None);
            }
        };

        let terminal = poll_until_terminal(
            || async { self.vendor.fetch_status(&handle).await },
            |s: &VendorState| s.is_terminal(),
            self.vendor.max_poll_attempts(),
            self.vendor.poll_interval(),
        )
        .await;

        let state = match terminal {
            Ok(s) => s,
            Err(PollError::Timeout { attempts, last_status }) => {
                tracing::warn!(attempts, last_status, "vendor runtime never reached a terminal state");
                return Err(DriverError::ReadinessTimeout {
                    handle,
                    last_status: db::DriverStatus::Unknown,
                });
            }
            Err(PollError::Fetch(e)) => return Err(e),
        };

        match state {
            VendorState::Ready { endpoint_url } => {
                let (host, path) = Self::parse_endpoint(&endpoint_url)?;
                // §9 Open Questions: populate both the legacy "443/<path>"
                // ports encoding and the explicit `path` field.
                Ok(Some(CreateOutcome {
                    handle,
                    host_ports: vec![PortEntry::PathRouted(format!("443/{path}"))],
                    host,
                    protocol: "https".to_string(),
                    path: Some(path),
                }))
            }
            VendorState::Failed(reason) => {
                tracing::warn!(vendor = self.vendor.name(), %reason, "vendor runtime reached Failed");
                Ok(None)
            }
            VendorState::Deleting | VendorState::Pending => Ok(None),
        }
    }

    async fn start(&self, handle: &str) -> Result<bool, DriverError> {
        // Managed runtimes start as part of create_or_update; a bare
        // "start" is a status check that it's still live.
        let status = self.vendor.fetch_status(handle).await?;
        Ok(matches!(status, VendorState::Ready { .. }))
    }

    async fn stop(&self, handle: &str, _grace_period: Option<Duration>) -> Result<bool, DriverError> {
        self.vendor.stop(handle).await
    }

    async fn remove(&self, handle: &str, _force: bool) -> Result<bool, DriverError> {
        self.vendor.delete(handle).await
    }

    async fn inspect(&self, handle: &str) -> Result<InspectResult, DriverError> {
        let state = self.vendor.fetch_status(handle).await?;
        let status = match &state {
            VendorState::Pending => DriverStatus::Creating,
            VendorState::Ready { .. } => DriverStatus::Running,
            VendorState::Failed(_) | VendorState::Deleting => DriverStatus::Exited,
        };
        Ok(InspectResult {
            status,
            attributes: serde_json::json!({"vendor": self.vendor.name()}),
        })
    }

    async fn wait_for_ready(&self, handle: &str, timeout: Duration) -> Result<(), DriverError> {
        let start = tokio::time::Instant::now();
        loop {
            if let VendorState::Ready { .. } = self.vendor.fetch_status(handle).await? {
                return Ok(());
            }
            if start.elapsed() >= timeout {
                return Err(DriverError::ReadinessTimeout {
                    handle: handle.to_string(),
                    last_status: db::DriverStatus::Unknown,
                });
            }
            tokio::time::sleep(self.vendor.poll_interval()).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn spec() -> CreateSpec {
        CreateSpec {
            image: "sandbox/base:latest".to_string(),
            name: "test-container".to_string(),
            requested_ports: vec![8080],
            volumes: Default::default(),
            environment: Default::default(),
            runtime_config: serde_json::json!({}),
        }
    }

    struct MockVendor {
        states: Mutex<Vec<VendorState>>,
        polls: AtomicUsize,
    }

    #[async_trait]
    impl VendorApi for MockVendor {
        fn name(&self) -> &'static str {
            "mock-vendor"
        }

        async fn create_or_update(&self, _spec: &CreateSpec) -> Result<String, DriverError> {
            Ok("handle-1".to_string())
        }

        async fn fetch_status(&self, _handle: &str) -> Result<VendorState, DriverError> {
            let idx = self.polls.fetch_add(1, Ordering::SeqCst);
            let states = self.states.lock().unwrap();
            Ok(states.get(idx).cloned().unwrap_or_else(|| states.last().unwrap().clone()))
        }

        async fn stop(&self, _handle: &str) -> Result<bool, DriverError> {
            Ok(true)
        }

        async fn delete(&self, _handle: &str) -> Result<bool, DriverError> {
            Ok(true)
        }

        fn max_poll_attempts(&self) -> u32 {
            5
        }

        fn poll_interval(&self) -> Duration {
            Duration::from_millis(1)
        }
    }

    #[test]
    fn parse_endpoint_splits_host_and_path() {
        let (host, path) =
            ManagedRuntimeDriver::<MockVendor>::parse_endpoint("https://runtime.example.com/session/abc123").unwrap();
        assert_eq!(host, "runtime.example.com");
        assert_eq!(path, "session/abc123");
    }

    #[test]
    fn parse_endpoint_rejects_garbage_url() {
        let err = ManagedRuntimeDriver::<MockVendor>::parse_endpoint("not a url").unwrap_err();
        assert!(matches!(err, DriverError::Transport(_)));
    }

    #[tokio::test]
    async fn create_polls_until_ready_and_encodes_path() {
        let vendor = MockVendor {
            states: Mutex::new(vec![
                VendorState::Pending,
                VendorState::Pending,
                VendorState::Ready {
                    endpoint_url: "https://runtime.example.com/session/abc123".to_string(),
                },
            ]),
            polls: AtomicUsize::new(0),
        };
        let driver = ManagedRuntimeDriver::new(vendor);

        let outcome = driver.create(spec()).await.unwrap().unwrap();
        assert_eq!(outcome.host, "runtime.example.com");
        assert_eq!(outcome.path.as_deref(), Some("session/abc123"));
        assert_eq!(outcome.protocol, "https");
        assert!(matches!(&outcome.host_ports[0], db::PortEntry::PathRouted(p) if p == "443/session/abc123"));
    }

    #[tokio::test]
    async fn create_returns_none_when_vendor_reports_failed() {
        let vendor = MockVendor {
            states: Mutex::new(vec![VendorState::Failed("quota exceeded".to_string())]),
            polls: AtomicUsize::new(0),
        };
        let driver = ManagedRuntimeDriver::new(vendor);

        let outcome = driver.create(spec()).await.unwrap();
        assert!(outcome.is_none());
    }

    #[tokio::test]
    async fn create_times_out_if_never_terminal() {
        let vendor = MockVendor {
            states: Mutex::new(vec![VendorState::Pending]),
            polls: AtomicUsize::new(0),
        };
        let driver = ManagedRuntimeDriver::new(vendor);

        let err = driver.create(spec()).await.unwrap_err();
        assert!(matches!(err, DriverError::ReadinessTimeout { .. }));
    }
}
