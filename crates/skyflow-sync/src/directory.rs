//! Workspace and credential lookup

use crate::error::Result;
use async_trait::async_trait;
use skyflow_cloud::{Credential, Workspace};
use std::collections::HashMap;

/// Read access to the workspace/credential service
#[async_trait]
pub trait WorkspaceDirectory: Send + Sync {
    /// One page of workspaces, ordered stably across calls
    async fn list_workspaces(&self, limit: usize, offset: usize) -> Result<Vec<Workspace>>;

    /// All credentials registered in a workspace, active or not
    async fn credentials_for(&self, workspace_id: &str) -> Result<Vec<Credential>>;
}

/// Fixed set of workspaces and credentials, e.g. from the config file
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    workspaces: Vec<Workspace>,
    credentials: HashMap<String, Vec<Credential>>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_workspace(mut self, workspace: Workspace) -> Self {
        self.add_workspace(workspace);
        self
    }

    pub fn with_credential(mut self, credential: Credential) -> Self {
        self.add_credential(credential);
        self
    }

    pub fn add_workspace(&mut self, workspace: Workspace) {
        if !self.workspaces.iter().any(|w| w.id == workspace.id) {
            self.workspaces.push(workspace);
        }
    }

    pub fn add_credential(&mut self, credential: Credential) {
        self.credentials
            .entry(credential.workspace_id.clone())
            .or_default()
            .push(credential);
    }

    pub fn workspace_count(&self) -> usize {
        self.workspaces.len()
    }
}

#[async_trait]
impl WorkspaceDirectory for StaticDirectory {
    async fn list_workspaces(&self, limit: usize, offset: usize) -> Result<Vec<Workspace>> {
        Ok(self
            .workspaces
            .iter()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn credentials_for(&self, workspace_id: &str) -> Result<Vec<Credential>> {
        Ok(self
            .credentials
            .get(workspace_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_paging() {
        let mut directory = StaticDirectory::new();
        for i in 0..5 {
            directory.add_workspace(Workspace::new(format!("ws-{i}"), format!("Workspace {i}")));
        }

        let page = directory.list_workspaces(2, 0).await.unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].id, "ws-0");

        let page = directory.list_workspaces(2, 4).await.unwrap();
        assert_eq!(page.len(), 1);
        assert!(directory.list_workspaces(2, 6).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_credentials_by_workspace() {
        let directory = StaticDirectory::new()
            .with_workspace(Workspace::new("ws-1", "one"))
            .with_workspace(Workspace::new("ws-1", "duplicate"))
            .with_credential(Credential::new("c1", "ws-1", "aws"))
            .with_credential(Credential::new("c2", "ws-2", "gcp"));

        assert_eq!(directory.workspace_count(), 1);
        let creds = directory.credentials_for("ws-1").await.unwrap();
        assert_eq!(creds.len(), 1);
        assert_eq!(creds[0].id, "c1");
        assert!(directory.credentials_for("ws-9").await.unwrap().is_empty());
    }
}
