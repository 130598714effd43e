//! Permissions
//!
//! Viewer identity, permission levels, and the oracle that answers
//! "what can this identity do on this scope". The oracle is an external
//! collaborator; [`StaticPermissionOracle`] serves grants from configuration.
//!
//! A [`PermissionSnapshot`] is resolved once when a viewer connects and is
//! what the delivery predicate consults, so delivery never awaits the oracle.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Permission level on a scope. Ordered: `None < Read < ReadExecute < ReadWriteExecute`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum PermissionLevel {
    #[default]
    None = 0,
    Read = 4,
    ReadExecute = 5,
    ReadWriteExecute = 7,
}

impl PermissionLevel {
    pub fn can_read(self) -> bool {
        self >= PermissionLevel::Read
    }
}

/// Platform role of a viewer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    #[default]
    User,
    Maintainer,
    Admin,
}

/// A project, or a workflow inside a project, the viewer marked as favorite
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Favorite {
    pub project_key: String,
    #[serde(default)]
    pub workflow_name: Option<String>,
}

/// An authenticated viewer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub username: String,
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub favorites: Vec<Favorite>,
}

impl Identity {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            groups: Vec::new(),
            role: Role::User,
            favorites: Vec::new(),
        }
    }

    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.groups.push(group.into());
        self
    }

    pub fn role(mut self, role: Role) -> Self {
        self.role = role;
        self
    }

    pub fn favorite(mut self, project_key: impl Into<String>, workflow_name: Option<&str>) -> Self {
        self.favorites.push(Favorite {
            project_key: project_key.into(),
            workflow_name: workflow_name.map(str::to_string),
        });
        self
    }

    /// Maintainers and admins read every scope without explicit grants
    pub fn has_bypass(&self) -> bool {
        matches!(self.role, Role::Maintainer | Role::Admin)
    }
}

/// A permission scope
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scope {
    Project(String),
    Workflow {
        project_key: String,
        workflow_name: String,
    },
}

impl Scope {
    pub fn project(key: impl Into<String>) -> Self {
        Scope::Project(key.into())
    }

    pub fn workflow(project_key: impl Into<String>, workflow_name: impl Into<String>) -> Self {
        Scope::Workflow {
            project_key: project_key.into(),
            workflow_name: workflow_name.into(),
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Project(key) => write!(f, "project {}", key),
            Scope::Workflow {
                project_key,
                workflow_name,
            } => write!(f, "workflow {}/{}", project_key, workflow_name),
        }
    }
}

/// The level an identity holds on one scope
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grant {
    pub scope: Scope,
    pub level: PermissionLevel,
}

/// Errors returned by a permission oracle
#[derive(Debug, Error)]
pub enum PermissionError {
    #[error("Permission backend unavailable: {0}")]
    Unavailable(String),
}

/// Answers permission questions for an identity
#[async_trait]
pub trait PermissionOracle: Send + Sync {
    /// Highest level the identity holds on `scope` through any of its groups
    async fn max_permission_level(
        &self,
        identity: &Identity,
        scope: &Scope,
    ) -> Result<PermissionLevel, PermissionError>;

    /// Every grant reachable through the identity's groups
    async fn grants(&self, identity: &Identity) -> Result<Vec<Grant>, PermissionError>;
}

/// Permissions of one viewer, resolved at connection time
#[derive(Debug, Clone)]
pub struct PermissionSnapshot {
    identity: Identity,
    projects: HashMap<String, PermissionLevel>,
    workflows: HashMap<(String, String), PermissionLevel>,
}

impl PermissionSnapshot {
    /// Resolve the identity's grants through the oracle
    pub async fn resolve(
        oracle: &dyn PermissionOracle,
        identity: Identity,
    ) -> Result<Self, PermissionError> {
        let grants = oracle.grants(&identity).await?;
        Ok(Self::from_grants(identity, grants))
    }

    pub fn from_grants(identity: Identity, grants: impl IntoIterator<Item = Grant>) -> Self {
        let mut snapshot = Self {
            identity,
            projects: HashMap::new(),
            workflows: HashMap::new(),
        };
        for grant in grants {
            snapshot.record(grant.scope, grant.level);
        }
        snapshot
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn has_bypass(&self) -> bool {
        self.identity.has_bypass()
    }

    pub fn project_level(&self, project_key: &str) -> PermissionLevel {
        self.projects
            .get(project_key)
            .copied()
            .unwrap_or_default()
    }

    /// Workflow level, inheriting the project level when no workflow grant exists
    pub fn workflow_level(&self, project_key: &str, workflow_name: &str) -> PermissionLevel {
        self.workflows
            .get(&(project_key.to_string(), workflow_name.to_string()))
            .copied()
            .unwrap_or_else(|| self.project_level(project_key))
    }

    /// True if the viewer holds the bypass role or at least read on `scope`
    pub fn can_read(&self, scope: &Scope) -> bool {
        if self.has_bypass() {
            return true;
        }
        let level = match scope {
            Scope::Project(key) => self.project_level(key),
            Scope::Workflow {
                project_key,
                workflow_name,
            } => self.workflow_level(project_key, workflow_name),
        };
        level.can_read()
    }

    /// Overwrite the cached level for one scope
    pub fn record(&mut self, scope: Scope, level: PermissionLevel) {
        match scope {
            Scope::Project(key) => {
                self.projects.insert(key, level);
            }
            Scope::Workflow {
                project_key,
                workflow_name,
            } => {
                self.workflows.insert((project_key, workflow_name), level);
            }
        }
    }

    /// True if the project, or the project/workflow pair, is a favorite
    pub fn is_favorite(&self, project_key: &str, workflow_name: &str) -> bool {
        self.identity.favorites.iter().any(|f| {
            f.project_key == project_key
                && match &f.workflow_name {
                    None => true,
                    Some(w) => w == workflow_name,
                }
        })
    }
}

/// A grant given to a group, as written in configuration
#[derive(Debug, Clone, Deserialize)]
pub struct GroupGrant {
    pub group: String,
    pub project_key: String,
    #[serde(default)]
    pub workflow_name: Option<String>,
    pub level: PermissionLevel,
}

/// Permission oracle backed by a fixed list of group grants
#[derive(Debug, Clone, Default)]
pub struct StaticPermissionOracle {
    grants: Vec<GroupGrant>,
}

impl StaticPermissionOracle {
    pub fn new(grants: Vec<GroupGrant>) -> Self {
        Self { grants }
    }

    fn visible<'a>(&'a self, identity: &'a Identity) -> impl Iterator<Item = &'a GroupGrant> {
        self.grants
            .iter()
            .filter(move |g| identity.groups.iter().any(|name| name == &g.group))
    }

    fn project_level(&self, identity: &Identity, project_key: &str) -> PermissionLevel {
        self.visible(identity)
            .filter(|g| g.project_key == project_key && g.workflow_name.is_none())
            .map(|g| g.level)
            .max()
            .unwrap_or_default()
    }
}

#[async_trait]
impl PermissionOracle for StaticPermissionOracle {
    async fn max_permission_level(
        &self,
        identity: &Identity,
        scope: &Scope,
    ) -> Result<PermissionLevel, PermissionError> {
        let level = match scope {
            Scope::Project(key) => self.project_level(identity, key),
            Scope::Workflow {
                project_key,
                workflow_name,
            } => self
                .visible(identity)
                .filter(|g| {
                    &g.project_key == project_key
                        && g.workflow_name.as_deref() == Some(workflow_name.as_str())
                })
                .map(|g| g.level)
                .max()
                .unwrap_or_else(|| self.project_level(identity, project_key)),
        };
        Ok(level)
    }

    async fn grants(&self, identity: &Identity) -> Result<Vec<Grant>, PermissionError> {
        let mut levels: HashMap<Scope, PermissionLevel> = HashMap::new();
        for grant in self.visible(identity) {
            let scope = match &grant.workflow_name {
                None => Scope::project(&grant.project_key),
                Some(w) => Scope::workflow(&grant.project_key, w),
            };
            let entry = levels.entry(scope).or_default();
            *entry = (*entry).max(grant.level);
        }
        Ok(levels
            .into_iter()
            .map(|(scope, level)| Grant { scope, level })
            .collect())
    }
}
