pub mod driver;
pub mod port_arbiter;
pub mod registry;

pub use driver::{BackendDriver, CreateOutcome, CreateSpec, DriverError, InspectResult};
pub use port_arbiter::PortArbiter;
pub use registry::{DriverKind, ImageRewriteTable};
