//! The `Environment` trait and the environment-kind registry (§4.7
//! "Environment trait"). Mirrors `BaseEnv`/`Registry` from the training
//! sandbox this module replaces: `init`, `get_init_state`, `step`,
//! `evaluate`, `get_info`, `close`, plus a class-level `get_query_list`.
//! Unlike the backend-driver registry, every environment kind is wired in
//! here at construction time rather than resolved from configuration — the
//! set of environments is a compile-time property of this binary.

use std::collections::HashMap;

use serde_json::Value;

use crate::error::TrainingEnvError;

/// One running episode of one environment kind. Each instance is owned
/// exclusively by its actor task (`training::service`), so the trait has no
/// `Send + Sync` bound beyond what `Box<dyn Environment>` already needs to
/// move into a spawned task.
pub trait Environment: Send {
    fn get_init_state(&mut self, params: &Value) -> Result<Value, TrainingEnvError>;

    fn step(&mut self, action: &Value, params: &Value) -> Result<Value, TrainingEnvError>;

    fn evaluate(&mut self, messages: &Value, params: &Value) -> Result<f64, TrainingEnvError>;

    fn get_info(&mut self, messages: &Value, params: &Value) -> Result<Value, TrainingEnvError>;

    fn close(&mut self);
}

type Constructor =
    fn(task_id: &str, instance_id: &str, params: &Value) -> Result<Box<dyn Environment>, TrainingEnvError>;
type QueryListFn = fn(split: &str) -> Vec<String>;

/// Maps an environment-kind name (`"appworld"`, `"bfcl"`, ...) to its
/// constructor and its class-level query-list function. Built once at
/// startup via [`EnvironmentRegistry::with_builtins`]; never mutated after.
pub struct EnvironmentRegistry {
    constructors: HashMap<String, Constructor>,
    query_lists: HashMap<String, QueryListFn>,
}

impl EnvironmentRegistry {
    pub fn new() -> Self {
        Self {
            constructors: HashMap::new(),
            query_lists: HashMap::new(),
        }
    }

    pub fn register(&mut self, name: &str, constructor: Constructor, query_list: QueryListFn) {
        self.constructors.insert(name.to_string(), constructor);
        self.query_lists.insert(name.to_string(), query_list);
    }

    /// The registry pre-populated with every environment kind this binary
    /// ships (§4.7; grounded on `training_box/environments/{appworld,bfcl}`).
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(
            "appworld",
            super::environments::appworld::AppWorldEnvironment::construct,
            super::environments::appworld::query_list,
        );
        registry.register(
            "bfcl",
            super::environments::bfcl::BfclEnvironment::construct,
            super::environments::bfcl::query_list,
        );
        registry
    }

    pub fn create(
        &self,
        env_type: &str,
        task_id: &str,
        instance_id: &str,
        params: &Value,
    ) -> Result<Box<dyn Environment>, TrainingEnvError> {
        let constructor = self
            .constructors
            .get(env_type)
            .ok_or_else(|| TrainingEnvError::UnknownEnvType(env_type.to_string()))?;
        constructor(task_id, instance_id, params)
    }

    pub fn query_list(&self, env_type: &str, split: &str) -> Result<Vec<String>, TrainingEnvError> {
        let f = self
            .query_lists
            .get(env_type)
            .ok_or_else(|| TrainingEnvError::UnknownEnvType(env_type.to_string()))?;
        Ok(f(split))
    }
}

impl Default for EnvironmentRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}
