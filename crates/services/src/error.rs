//! Typed error enums for the manager and training-environment layers
//! (§1.1). Neither depends on `anyhow`: every variant is either a leaf or
//! wraps a lower layer's error with `#[from]`.

use deployment::DriverError;

#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    #[error("unknown sandbox type: {0}")]
    UnknownType(String),
    #[error("sandbox creation failed: backend {backend} could not create image {image}")]
    CreationFailed { backend: String, image: String },
    #[error(transparent)]
    Driver(#[from] DriverError),
    #[error("mount provisioning failed: {0}")]
    Mount(String),
    #[error("collection backend error: {0}")]
    Collection(#[from] db::CollectionError),
    #[error("no such session: {0}")]
    NoSuchSession(String),
    #[error("no driver configured for deployment kind {0}")]
    NoDriver(String),
}

#[derive(Debug, thiserror::Error)]
pub enum TrainingEnvError {
    #[error("unknown environment type: {0}")]
    UnknownEnvType(String),
    #[error("unknown instance id: {0}")]
    UnknownInstance(String),
    #[error("environment actor failed: {0}")]
    ActorFailed(String),
    #[error("environment actor panicked or was dropped before replying")]
    ActorGone,
}

#[derive(Debug, thiserror::Error)]
pub enum SandboxClientError {
    #[error("sandbox never became healthy within {0:?}")]
    ReadinessTimeout(std::time::Duration),
    #[error("transport error: {0}")]
    Transport(String),
}
