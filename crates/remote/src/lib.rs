//! Managed-runtime (vendor serverless) backend drivers (§4.1 "Managed-runtime
//! drivers"). Unlike `local-deployment`'s drivers, these talk to an external
//! control plane this process does not own, so each driver is a thin
//! `create_or_update` + `fetch_status` adapter fed into a shared polling
//! skeleton (§9 "Polling loops with vendor APIs") rather than a full
//! container-lifecycle implementation.

pub mod skeleton;
pub mod vendor_a;
pub mod vendor_b;

pub use skeleton::{ManagedRuntimeDriver, VendorApi, VendorState};
pub use vendor_a::VendorARuntime;
pub use vendor_b::VendorBRuntime;
