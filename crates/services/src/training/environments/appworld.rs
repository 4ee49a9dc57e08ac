//! An AppWorld-style environment (§4.7; grounded on
//! `training_box/environments/appworld/appworld_env.py`): the agent drives
//! the episode by submitting `apis.<app>.<method>(...)`-shaped code strings,
//! one per step, and is scored on how many of the task's expected API calls
//! it issued by the time it asks to be evaluated.
//!
//! The full original drives a real `AppWorld` simulator process per task;
//! this module keeps the same step/evaluate contract against a small
//! embedded fixture table instead of spawning that simulator.

use serde_json::{Value, json};

use crate::error::TrainingEnvError;
use crate::training::environment::Environment;

struct TaskFixture {
    task_id: &'static str,
    instruction: &'static str,
    expected_calls: &'static [&'static str],
}

const FIXTURES: &[TaskFixture] = &[
    TaskFixture {
        task_id: "appworld_0001",
        instruction: "Find the venmo account balance and transfer $10 to the top contact.",
        expected_calls: &["apis.venmo.show_balance", "apis.venmo.transfer_money"],
    },
    TaskFixture {
        task_id: "appworld_0002",
        instruction: "Reply to the most recent unread email from your supervisor.",
        expected_calls: &["apis.gmail.search_emails", "apis.gmail.send_email"],
    },
    TaskFixture {
        task_id: "appworld_0003",
        instruction: "Add the next calendar event's location to the todo list.",
        expected_calls: &["apis.calendar.show_events", "apis.todoist.add_task"],
    },
];

fn fixture_for(task_id: &str) -> &'static TaskFixture {
    FIXTURES
        .iter()
        .find(|f| f.task_id == task_id)
        .unwrap_or(&FIXTURES[0])
}

pub struct AppWorldEnvironment {
    task_id: String,
    instance_id: String,
    fixture: &'static TaskFixture,
    issued_calls: Vec<String>,
    turn: u32,
}

impl AppWorldEnvironment {
    pub fn construct(
        task_id: &str,
        instance_id: &str,
        _params: &Value,
    ) -> Result<Box<dyn Environment>, TrainingEnvError> {
        Ok(Box::new(AppWorldEnvironment {
            task_id: task_id.to_string(),
            instance_id: instance_id.to_string(),
            fixture: fixture_for(task_id),
            issued_calls: Vec::new(),
            turn: 0,
        }))
    }
}

impl Environment for AppWorldEnvironment {
    fn get_init_state(&mut self, _params: &Value) -> Result<Value, TrainingEnvError> {
        Ok(json!({
            "task_id": self.task_id,
            "instance_id": self.instance_id,
            "instruction": self.fixture.instruction,
            "turn": self.turn,
        }))
    }

    fn step(&mut self, action: &Value, _params: &Value) -> Result<Value, TrainingEnvError> {
        self.turn += 1;
        let code = action.get("code").and_then(Value::as_str).unwrap_or("");
        let matched = self
            .fixture
            .expected_calls
            .iter()
            .find(|call| code.contains(**call));
        if let Some(call) = matched {
            self.issued_calls.push((*call).to_string());
        }
        Ok(json!({
            "output": format!("executed: {code}"),
            "turn": self.turn,
            "done": self.issued_calls.len() >= self.fixture.expected_calls.len(),
        }))
    }

    fn evaluate(&mut self, _messages: &Value, _params: &Value) -> Result<f64, TrainingEnvError> {
        if self.fixture.expected_calls.is_empty() {
            return Ok(0.0);
        }
        let hit = self
            .fixture
            .expected_calls
            .iter()
            .filter(|call| self.issued_calls.iter().any(|issued| issued == *call))
            .count();
        Ok(hit as f64 / self.fixture.expected_calls.len() as f64)
    }

    fn get_info(&mut self, _messages: &Value, _params: &Value) -> Result<Value, TrainingEnvError> {
        Ok(json!({
            "task_id": self.task_id,
            "turn": self.turn,
            "issued_calls": self.issued_calls,
            "expected_calls": self.fixture.expected_calls,
        }))
    }

    fn close(&mut self) {
        tracing::debug!(task_id = %self.task_id, instance_id = %self.instance_id, "appworld environment closed");
    }
}

/// Class-level query list (§4.7 `get_query_list`): fixture task ids for the
/// requested split. The train/val/test partition here is a static slice of
/// the embedded fixture table rather than a filesystem dataset lookup.
pub fn query_list(split: &str) -> Vec<String> {
    match split {
        "train" => vec![FIXTURES[0].task_id.to_string(), FIXTURES[1].task_id.to_string()],
        "val" | "test" => vec![FIXTURES[2].task_id.to_string()],
        _ => FIXTURES.iter().map(|f| f.task_id.to_string()).collect(),
    }
}
