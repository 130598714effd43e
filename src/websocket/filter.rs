//! Subscription Filters
//!
//! What a viewer asked to see, and the pure predicate deciding whether an
//! event reaches them. Two gates apply in order:
//!
//! 1. Visibility: the event kind maps to a permission scope the viewer must
//!    be able to read. Unknown kinds are never delivered.
//! 2. Narrowing: every populated filter field must equal the event's field.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::event::Event;
use crate::permission::{PermissionError, PermissionSnapshot, Scope};

/// Scope a given kind of event is checked against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KindScope {
    Project,
    Workflow,
    /// Visible to everyone when not attached to a project
    Broadcast,
}

/// Kind prefixes (after the `sdk.` namespace) and their scope check.
/// Order matters: the first matching prefix wins.
const KIND_SCOPES: &[(&str, KindScope)] = &[
    ("EventRunWorkflow", KindScope::Workflow),
    ("EventWorkflow", KindScope::Workflow),
    ("EventProject", KindScope::Project),
    ("EventApplication", KindScope::Project),
    ("EventPipeline", KindScope::Project),
    ("EventEnvironment", KindScope::Project),
    ("EventBroadcast", KindScope::Broadcast),
    ("Operation", KindScope::Project),
];

fn kind_scope(event: &Event) -> Option<KindScope> {
    let kind = event.short_kind();
    KIND_SCOPES
        .iter()
        .find(|(prefix, _)| kind.starts_with(prefix))
        .map(|(_, scope)| *scope)
}

/// True if the viewer may see this event at all
pub fn is_visible(event: &Event, permissions: &PermissionSnapshot) -> bool {
    match kind_scope(event) {
        Some(KindScope::Project) => permissions.can_read(&Scope::project(&event.project_key)),
        Some(KindScope::Workflow) => permissions.can_read(&Scope::workflow(
            &event.project_key,
            &event.workflow_name,
        )),
        Some(KindScope::Broadcast) => {
            event.project_key.is_empty()
                || permissions.can_read(&Scope::project(&event.project_key))
        }
        None => false,
    }
}

/// Full delivery predicate: visibility, then the session's own filter
pub fn accepts(
    event: &Event,
    filter: &SubscriptionFilter,
    permissions: &PermissionSnapshot,
) -> bool {
    is_visible(event, permissions) && filter.matches(event, permissions)
}

/// Errors raised while installing a filter
#[derive(Debug, Error)]
pub enum FilterError {
    #[error("Forbidden: no read access on {0}")]
    Forbidden(String),

    #[error("Invalid filter: {0}")]
    Invalid(String),

    #[error("Malformed filter: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Unable to check permissions: {0}")]
    Permission(#[from] PermissionError),
}

/// Scope declared by a viewer. Empty strings and zero numbers are wildcards.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubscriptionFilter {
    pub project_key: String,
    pub application_name: String,
    pub pipeline_name: String,
    pub environment_name: String,
    pub workflow_name: String,
    #[serde(alias = "workflow_run_num")]
    pub workflow_run_number: i64,
    pub workflow_node_run_id: i64,
    /// Only events on the viewer's favorite projects/workflows
    pub favorites: bool,
}

impl SubscriptionFilter {
    pub fn project(key: impl Into<String>) -> Self {
        Self {
            project_key: key.into(),
            ..Default::default()
        }
    }

    pub fn workflow(mut self, name: impl Into<String>) -> Self {
        self.workflow_name = name.into();
        self
    }

    pub fn run_number(mut self, number: i64) -> Self {
        self.workflow_run_number = number;
        self
    }

    pub fn favorites_only(mut self) -> Self {
        self.favorites = true;
        self
    }

    /// Scope the viewer must be able to read for this filter to be installed.
    /// `None` when the filter is not attached to any project.
    pub fn required_scope(&self) -> Result<Option<Scope>, FilterError> {
        match (self.project_key.is_empty(), self.workflow_name.is_empty()) {
            (true, true) => Ok(None),
            (true, false) => Err(FilterError::Invalid(
                "workflow_name requires project_key".to_string(),
            )),
            (false, true) => Ok(Some(Scope::project(&self.project_key))),
            (false, false) => Ok(Some(Scope::workflow(
                &self.project_key,
                &self.workflow_name,
            ))),
        }
    }

    /// Narrowing check; does not look at permissions except for favorites
    pub fn matches(&self, event: &Event, permissions: &PermissionSnapshot) -> bool {
        if self.favorites
            && !permissions.is_favorite(&event.project_key, &event.workflow_name)
        {
            return false;
        }

        field_matches(&self.project_key, &event.project_key)
            && field_matches(&self.application_name, &event.application_name)
            && field_matches(&self.pipeline_name, &event.pipeline_name)
            && field_matches(&self.environment_name, &event.environment_name)
            && field_matches(&self.workflow_name, &event.workflow_name)
            && number_matches(self.workflow_run_number, event.workflow_run_num)
            && number_matches(self.workflow_node_run_id, event.workflow_node_run_id)
    }
}

fn field_matches(wanted: &str, actual: &str) -> bool {
    wanted.is_empty() || wanted == actual
}

fn number_matches(wanted: i64, actual: i64) -> bool {
    wanted == 0 || wanted == actual
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permission::{Grant, Identity, PermissionLevel, Role};

    fn reader_of(project: &str) -> PermissionSnapshot {
        PermissionSnapshot::from_grants(
            Identity::new("alice"),
            vec![Grant {
                scope: Scope::project(project),
                level: PermissionLevel::Read,
            }],
        )
    }

    fn nobody() -> PermissionSnapshot {
        PermissionSnapshot::from_grants(Identity::new("mallory"), Vec::new())
    }

    fn run_event(project: &str, workflow: &str) -> Event {
        Event::new("sdk.EventRunWorkflow")
            .project(project)
            .workflow(workflow)
    }

    #[test]
    fn test_project_filter_with_read_access_delivers() {
        let filter = SubscriptionFilter::project("P1");
        let event = run_event("P1", "W");
        assert!(accepts(&event, &filter, &reader_of("P1")));
    }

    #[test]
    fn test_project_filter_without_access_rejects() {
        let filter = SubscriptionFilter::project("P1");
        let event = run_event("P1", "W");
        assert!(!accepts(&event, &filter, &nobody()));
        assert!(!accepts(&event, &filter, &reader_of("P2")));
    }

    #[test]
    fn test_workflow_mismatch_rejects() {
        let filter = SubscriptionFilter::project("P1").workflow("W1");
        let event = run_event("P1", "W2");
        assert!(!accepts(&event, &filter, &reader_of("P1")));
    }

    #[test]
    fn test_empty_filter_fields_are_wildcards() {
        let filter = SubscriptionFilter::default();
        let event = Event::new("sdk.EventPipelineAdd")
            .project("P1")
            .pipeline("build")
            .environment("prod");
        assert!(accepts(&event, &filter, &reader_of("P1")));
    }

    #[test]
    fn test_run_number_and_node_run() {
        let filter = SubscriptionFilter::project("P1").workflow("W").run_number(7);
        let permissions = reader_of("P1");
        assert!(accepts(&run_event("P1", "W").run_number(7), &filter, &permissions));
        assert!(!accepts(&run_event("P1", "W").run_number(8), &filter, &permissions));

        let mut filter = SubscriptionFilter::project("P1");
        filter.workflow_node_run_id = 42;
        assert!(accepts(&run_event("P1", "W").node_run_id(42), &filter, &permissions));
        assert!(!accepts(&run_event("P1", "W").node_run_id(41), &filter, &permissions));
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let filter = SubscriptionFilter::default();
        let event = Event::new("sdk.EventSomethingNew").project("P1");
        assert!(!accepts(&event, &filter, &reader_of("P1")));

        let admin = PermissionSnapshot::from_grants(
            Identity::new("root").role(Role::Admin),
            Vec::new(),
        );
        assert!(!accepts(&event, &filter, &admin));
    }

    #[test]
    fn test_broadcast_visibility() {
        let filter = SubscriptionFilter::default();
        let global = Event::new("sdk.EventBroadcastAdd");
        assert!(accepts(&global, &filter, &nobody()));

        let scoped = Event::new("sdk.EventBroadcastAdd").project("P1");
        assert!(!accepts(&scoped, &filter, &nobody()));
        assert!(accepts(&scoped, &filter, &reader_of("P1")));
    }

    #[test]
    fn test_bypass_role_sees_project_events() {
        let maintainer = PermissionSnapshot::from_grants(
            Identity::new("bob").role(Role::Maintainer),
            Vec::new(),
        );
        let filter = SubscriptionFilter::default();
        assert!(accepts(&run_event("ANY", "W"), &filter, &maintainer));
        assert!(accepts(
            &Event::new("sdk.EventApplicationAdd").project("ANY"),
            &filter,
            &maintainer
        ));
    }

    #[test]
    fn test_workflow_scope_uses_workflow_grant() {
        let permissions = PermissionSnapshot::from_grants(
            Identity::new("alice"),
            vec![
                Grant {
                    scope: Scope::project("P1"),
                    level: PermissionLevel::Read,
                },
                Grant {
                    scope: Scope::workflow("P1", "secret"),
                    level: PermissionLevel::None,
                },
            ],
        );
        let filter = SubscriptionFilter::default();
        assert!(accepts(&run_event("P1", "build"), &filter, &permissions));
        assert!(!accepts(&run_event("P1", "secret"), &filter, &permissions));
    }

    #[test]
    fn test_favorites_only() {
        let permissions = PermissionSnapshot::from_grants(
            Identity::new("alice").favorite("P1", Some("W1")),
            vec![Grant {
                scope: Scope::project("P1"),
                level: PermissionLevel::Read,
            }],
        );
        let filter = SubscriptionFilter::default().favorites_only();
        assert!(accepts(&run_event("P1", "W1"), &filter, &permissions));
        assert!(!accepts(&run_event("P1", "W2"), &filter, &permissions));
    }

    #[test]
    fn test_required_scope() {
        assert_eq!(SubscriptionFilter::default().required_scope().unwrap(), None);
        assert_eq!(
            SubscriptionFilter::project("P1").required_scope().unwrap(),
            Some(Scope::project("P1"))
        );
        assert_eq!(
            SubscriptionFilter::project("P1")
                .workflow("W")
                .required_scope()
                .unwrap(),
            Some(Scope::workflow("P1", "W"))
        );

        let mut orphan = SubscriptionFilter::default();
        orphan.workflow_name = "W".to_string();
        assert!(matches!(
            orphan.required_scope(),
            Err(FilterError::Invalid(_))
        ));
    }

    #[test]
    fn test_decode_client_frame() {
        let json = r#"{"project_key": "P1", "workflow_name": "W", "workflow_run_num": 3, "favorites": false}"#;
        let filter: SubscriptionFilter = serde_json::from_str(json).unwrap();
        assert_eq!(filter.project_key, "P1");
        assert_eq!(filter.workflow_run_number, 3);
        assert!(filter.application_name.is_empty());

        let filter: SubscriptionFilter = serde_json::from_str("{}").unwrap();
        assert_eq!(filter, SubscriptionFilter::default());

        assert!(serde_json::from_str::<SubscriptionFilter>("not json").is_err());
    }
}
