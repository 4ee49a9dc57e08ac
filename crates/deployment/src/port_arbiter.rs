//! The port arbiter (§4.3): reserves host ports from a configured `[lo,
//! hi)` range, coordinating across manager replicas through whichever
//! [`db::collections::SharedSet`] implementation was wired up (in-process
//! or Redis) — the arbiter itself is agnostic to which.

use std::sync::Arc;

use db::collections::SharedSet;

use crate::driver::DriverError;

const PORT_SET_KEY: &str = "sandbox_occupied_ports";

pub struct PortArbiter {
    set: Arc<dyn SharedSet>,
    lo: u16,
    hi: u16,
}

impl PortArbiter {
    pub fn new(set: Arc<dyn SharedSet>, range: (u16, u16)) -> Self {
        Self {
            set,
            lo: range.0,
            hi: range.1,
        }
    }

    /// Claims `count` distinct ports from the configured range. Every
    /// candidate is first added to the shared set (atomic test-and-set);
    /// ports already claimed during a failed attempt are released before
    /// returning the error (§7 "do not partially allocate").
    pub async fn claim(&self, count: usize) -> Result<Vec<u16>, DriverError> {
        let mut claimed = Vec::with_capacity(count);
        for candidate in self.lo..self.hi {
            if claimed.len() == count {
                break;
            }
            match self.set.add(PORT_SET_KEY, candidate).await {
                Ok(true) => claimed.push(candidate),
                Ok(false) => continue,
                Err(e) => {
                    self.release(&claimed).await;
                    return Err(DriverError::Transport(e.to_string()));
                }
            }
        }

        if claimed.len() < count {
            self.release(&claimed).await;
            return Err(DriverError::NotEnoughPorts {
                wanted: count,
                found: claimed.len(),
            });
        }

        Ok(claimed)
    }

    /// Releases a port a driver failed to bind (stale claim), so the next
    /// candidate can be tried (§4.1 "Port negotiation").
    pub async fn release_one(&self, port: u16) {
        if let Err(e) = self.set.remove(PORT_SET_KEY, port).await {
            tracing::warn!(port, "failed to release stale port claim: {e}");
        }
    }

    pub async fn release(&self, ports: &[u16]) {
        for &p in ports {
            self.release_one(p).await;
        }
    }

    pub async fn reserved_count(&self) -> usize {
        self.set.len(PORT_SET_KEY).await.unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use db::collections::in_memory::InMemorySet;

    #[tokio::test]
    async fn claims_distinct_ports_within_range() {
        let arbiter = PortArbiter::new(Arc::new(InMemorySet::new()), (9000, 9010));
        let claimed = arbiter.claim(3).await.unwrap();
        assert_eq!(claimed.len(), 3);
        assert!(claimed.iter().all(|p| (9000..9010).contains(p)));
        let unique: std::collections::HashSet<_> = claimed.iter().collect();
        assert_eq!(unique.len(), 3);
    }

    #[tokio::test]
    async fn exhausted_range_releases_partial_claims() {
        let set = Arc::new(InMemorySet::new());
        let arbiter = PortArbiter::new(set.clone(), (9000, 9003));
        let err = arbiter.claim(5).await.unwrap_err();
        assert!(matches!(err, DriverError::NotEnoughPorts { .. }));
        assert_eq!(arbiter.reserved_count().await, 0);
    }

    #[tokio::test]
    async fn release_one_frees_port_for_reuse() {
        let arbiter = PortArbiter::new(Arc::new(InMemorySet::new()), (9000, 9001));
        let claimed = arbiter.claim(1).await.unwrap();
        arbiter.release_one(claimed[0]).await;
        let reclaimed = arbiter.claim(1).await.unwrap();
        assert_eq!(reclaimed, claimed);
    }
}
