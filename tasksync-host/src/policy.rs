//! Authorization hand-off point.
//!
//! Every task of a request passes through [`AccessPolicy::authorize`]
//! before it executes. A denial fails that task only.

use crate::SyncContext;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tasksync_protocol::TaskCommand;

/// Decides whether a task may execute.
#[async_trait]
pub trait AccessPolicy: Send + Sync {
    /// Returns `Err(reason)` to deny the task.
    async fn authorize(&self, ctx: &SyncContext, command: &TaskCommand) -> Result<(), String>;
}

/// Permits every task.
pub struct AllowAllPolicy;

#[async_trait]
impl AccessPolicy for AllowAllPolicy {
    async fn authorize(&self, _ctx: &SyncContext, _command: &TaskCommand) -> Result<(), String> {
        Ok(())
    }
}

/// A container operation an access rule can grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Create,
    Upsert,
    Read,
    Query,
    Patch,
    Delete,
    /// Every operation.
    Full,
}

impl Operation {
    fn grants(&self, kind: &str) -> bool {
        match self {
            Self::Full => true,
            Self::Create => kind == "create",
            Self::Upsert => kind == "upsert",
            Self::Read => kind == "read",
            Self::Query => kind == "query",
            Self::Patch => kind == "patch",
            Self::Delete => kind == "delete",
        }
    }
}

/// Rule table for [`ContainerAccessPolicy`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessRules {
    /// Operations granted per container.
    #[serde(default)]
    pub containers: BTreeMap<String, Vec<Operation>>,
    /// Permitted message names; `None` permits every message.
    #[serde(default)]
    pub messages: Option<Vec<String>>,
    /// Deny containers missing from `containers`.
    #[serde(default)]
    pub deny_unlisted: bool,
    /// Require the request to carry a user id.
    #[serde(default)]
    pub authenticated_only: bool,
}

/// Grants container operations from an [`AccessRules`] table.
pub struct ContainerAccessPolicy {
    rules: AccessRules,
}

impl ContainerAccessPolicy {
    pub fn new(rules: AccessRules) -> Self {
        Self { rules }
    }

    /// Parses the rule table from JSON.
    pub fn from_json(json: &str) -> crate::HostResult<Self> {
        Ok(Self::new(serde_json::from_str(json)?))
    }

    pub fn rules(&self) -> &AccessRules {
        &self.rules
    }
}

#[async_trait]
impl AccessPolicy for ContainerAccessPolicy {
    async fn authorize(&self, ctx: &SyncContext, command: &TaskCommand) -> Result<(), String> {
        if self.rules.authenticated_only && ctx.user_id().is_none() {
            return Err("user not authenticated".to_string());
        }

        if let TaskCommand::Message { name, .. } = command {
            return match &self.rules.messages {
                Some(allowed) if !allowed.iter().any(|m| m == name) => {
                    Err(format!("message '{name}' not permitted"))
                }
                _ => Ok(()),
            };
        }

        let container = command.container().unwrap_or_default();
        let kind = command.kind();
        match self.rules.containers.get(container) {
            Some(ops) if ops.iter().any(|op| op.grants(kind)) => Ok(()),
            Some(_) => Err(format!("{kind} on container '{container}' not permitted")),
            None if self.rules.deny_unlisted => {
                Err(format!("container '{container}' not permitted"))
            }
            None => Ok(()),
        }
    }
}
