//! Event Model
//!
//! Domain events produced by the control plane and carried over the
//! pub/sub channel as JSON. Events are immutable once decoded; the broker
//! shares them across delivery tasks behind an `Arc`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind tag of job-level step events. High volume, never forwarded to viewers.
pub const KIND_JOB: &str = "sdk.EventJob";

/// A notification of something that happened in the control plane
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Kind tag (e.g. `sdk.EventRunWorkflow`)
    #[serde(rename = "type_event")]
    pub kind: String,

    /// When the event was produced
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,

    /// Host that produced the event
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub hostname: String,

    #[serde(default)]
    pub project_key: String,

    #[serde(default)]
    pub workflow_name: String,

    #[serde(default)]
    pub pipeline_name: String,

    #[serde(default)]
    pub application_name: String,

    #[serde(default)]
    pub environment_name: String,

    #[serde(default)]
    pub workflow_run_num: i64,

    #[serde(default)]
    pub workflow_node_run_id: i64,

    /// Status carried by run events (e.g. `Building`, `Success`)
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub status: String,

    /// User who triggered the event, if any
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub username: String,

    /// Kind-specific body
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl Event {
    /// Create an event of the given kind with every scope attribute empty
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            timestamp: Utc::now(),
            hostname: String::new(),
            project_key: String::new(),
            workflow_name: String::new(),
            pipeline_name: String::new(),
            application_name: String::new(),
            environment_name: String::new(),
            workflow_run_num: 0,
            workflow_node_run_id: 0,
            status: String::new(),
            username: String::new(),
            payload: serde_json::Value::Null,
        }
    }

    pub fn project(mut self, key: impl Into<String>) -> Self {
        self.project_key = key.into();
        self
    }

    pub fn workflow(mut self, name: impl Into<String>) -> Self {
        self.workflow_name = name.into();
        self
    }

    pub fn pipeline(mut self, name: impl Into<String>) -> Self {
        self.pipeline_name = name.into();
        self
    }

    pub fn application(mut self, name: impl Into<String>) -> Self {
        self.application_name = name.into();
        self
    }

    pub fn environment(mut self, name: impl Into<String>) -> Self {
        self.environment_name = name.into();
        self
    }

    pub fn run_number(mut self, number: i64) -> Self {
        self.workflow_run_num = number;
        self
    }

    pub fn node_run_id(mut self, id: i64) -> Self {
        self.workflow_node_run_id = id;
        self
    }

    pub fn payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    /// Kind without the `sdk.` namespace (e.g. `EventRunWorkflow`)
    pub fn short_kind(&self) -> &str {
        self.kind.strip_prefix("sdk.").unwrap_or(&self.kind)
    }
}
