pub mod collections;
pub mod deployment_store;
pub mod error;
pub mod model;

pub use deployment_store::{DeploymentRecord, DeploymentStateStore, DeploymentStatus};
pub use error::{CollectionError, StoreError};
pub use model::{Container, DriverStatus, PortEntry, SandboxType};
