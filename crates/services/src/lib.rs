//! The sandbox manager and training-environment layers (§4.2, §4.5, §4.6,
//! §4.7): everything that sits between the HTTP-facing binaries in `server`
//! and the backend drivers in `deployment`/`local-deployment`/`remote`.

pub mod driver_registry;
pub mod error;
pub mod facade;
pub mod manager;
pub mod mount;
pub mod sandbox_client;
pub mod training;

pub use error::{ManagerError, SandboxClientError, TrainingEnvError};
pub use manager::SandboxManager;
pub use mount::MountProvisioner;
pub use sandbox_client::SandboxClient;
