//! The training-environment service (§4.7): a parallel surface to the
//! sandbox manager for reinforcement-learning rollouts. An `Environment`
//! runs one task/episode at a time behind a dedicated actor task so a
//! panicking or hanging environment never blocks any other instance.

pub mod environment;
pub mod environments;
pub mod facade;
pub mod service;

pub use environment::{Environment, EnvironmentRegistry};
pub use service::TrainingEnvironmentService;
