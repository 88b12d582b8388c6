/// Hot-reload workflow registry using ArcSwap
///
/// Holds the latest immutable snapshot of every workflow. Readers get an
/// `Arc<WorkflowDefinition>` that never changes under them; writers build a
/// new map and swap the pointer, so runs in flight keep the snapshot they
/// started with.

use crate::workflow::{storage::WorkflowStorage, types::WorkflowDefinition};
use anyhow::Result;
use arc_swap::ArcSwap;
use std::{collections::HashMap, sync::Arc};

type Snapshots = HashMap<String, Arc<WorkflowDefinition>>;

/// Lock-free map of workflow id to current snapshot
#[derive(Debug)]
pub struct WorkflowRegistry {
    workflows: ArcSwap<Snapshots>,
}

impl Default for WorkflowRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkflowRegistry {
    pub fn new() -> Self {
        Self {
            workflows: ArcSwap::new(Arc::new(HashMap::new())),
        }
    }

    /// Replace the registry contents with everything in storage
    pub async fn init_from_storage(&self, storage: &WorkflowStorage) -> Result<()> {
        let stored = storage.load_all_workflows().await?;
        let snapshots: Snapshots = stored
            .into_iter()
            .map(|wf| (wf.id.clone(), Arc::new(wf)))
            .collect();

        self.workflows.store(Arc::new(snapshots));
        tracing::info!("📥 Initialized workflow registry with {} workflows", self.workflows.load().len());

        Ok(())
    }

    /// Swap in a new snapshot for one workflow
    pub fn publish(&self, workflow: WorkflowDefinition) -> Arc<WorkflowDefinition> {
        let snapshot = Arc::new(workflow);
        let id = snapshot.id.clone();
        self.workflows.rcu(|current| {
            let mut next = (**current).clone();
            next.insert(id.clone(), Arc::clone(&snapshot));
            next
        });
        tracing::debug!("🔥 Hot-reloaded workflow snapshot: {} (v{})", snapshot.id, snapshot.version);
        snapshot
    }

    pub fn remove(&self, workflow_id: &str) -> bool {
        let mut removed = false;
        self.workflows.rcu(|current| {
            let mut next = (**current).clone();
            removed = next.remove(workflow_id).is_some();
            next
        });
        removed
    }

    /// Current snapshot of a workflow (lock-free read)
    pub fn get(&self, workflow_id: &str) -> Option<Arc<WorkflowDefinition>> {
        self.workflows.load().get(workflow_id).cloned()
    }

    pub fn list_workflow_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.workflows.load().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.workflows.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshots_are_isolated_from_later_edits() {
        let registry = WorkflowRegistry::new();
        let mut wf = WorkflowDefinition::new("Draft", "bob");
        let first = registry.publish(wf.clone());

        wf.name = "Renamed".into();
        wf.touch();
        registry.publish(wf.clone());

        assert_eq!(first.name, "Draft");
        assert_eq!(first.version, 1);
        let current = registry.get(&wf.id).unwrap();
        assert_eq!(current.name, "Renamed");
        assert_eq!(current.version, 2);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_remove() {
        let registry = WorkflowRegistry::new();
        let wf = registry.publish(WorkflowDefinition::new("Draft", "bob"));
        assert!(registry.remove(&wf.id));
        assert!(!registry.remove(&wf.id));
        assert!(registry.is_empty());
    }
}
