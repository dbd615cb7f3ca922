// Engine reconciliation - keeps the local mirror honest about the execution engine

//! # Engine Reconciliation
//!
//! The external execution engine owns control flow; this crate keeps a local
//! mirror of each instance. [`EngineReconciler`] is the only component that
//! treats the engine as authoritative. It tracks, per instance, where the two
//! sides stand:
//!
//! ```text
//! NOT_STARTED --execution started-----> STARTED
//! STARTED     --engine id persisted---> SYNCED
//! STARTED     --persist conflict------> DESYNCED
//! SYNCED      --engine mismatch-------> DESYNCED
//! ```
//!
//! DESYNCED is terminal. It is logged and surfaced through
//! [`EngineReconciler::desynced`] for an operator; nothing here repairs it.
//!
//! A start that fails for any other reason is rolled back to NOT_STARTED, so
//! it can be retried. Records of COMPLETE or CANCELLED instances that verify
//! cleanly are dropped, so only live and DESYNCED instances stay tracked.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::instance_store::ProcessInstanceStore;
use super::patch::InstancePatch;
use super::storage::InstanceQuery;
use crate::models::{
    FieldData, Process, ProcessDeployment, ProcessInstance, ProcessInstanceId, ProcessStatus,
};
use crate::{ProcessDeskError, Result};

/// Lookup keys for an engine execution; at least one must be set
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionCriteria {
    pub execution_id: Option<String>,
    pub business_key: Option<String>,
    pub process_definition_key: Option<String>,
}

impl ExecutionCriteria {
    pub fn by_execution<S: Into<String>>(execution_id: S) -> Self {
        Self {
            execution_id: Some(execution_id.into()),
            ..Self::default()
        }
    }

    pub fn by_business_key<S: Into<String>>(business_key: S) -> Self {
        Self {
            business_key: Some(business_key.into()),
            ..Self::default()
        }
    }

    pub fn in_process<S: Into<String>>(mut self, key: S) -> Self {
        self.process_definition_key = Some(key.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.execution_id.is_none()
            && self.business_key.is_none()
            && self.process_definition_key.is_none()
    }

    pub fn matches(&self, snapshot: &ExecutionSnapshot) -> bool {
        self.execution_id
            .as_ref()
            .map_or(true, |id| &snapshot.execution_id == id)
            && self
                .business_key
                .as_ref()
                .map_or(true, |key| &snapshot.business_key == key)
            && self
                .process_definition_key
                .as_ref()
                .map_or(true, |key| &snapshot.process_definition_key == key)
    }
}

/// What the engine knows about one execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionSnapshot {
    pub execution_id: String,
    /// Local process instance id the execution was started for
    pub business_key: String,
    pub process_definition_key: String,
    pub variables: HashMap<String, serde_json::Value>,
}

/// Outbound seam to the execution engine
#[async_trait]
pub trait ExecutionEngine: Send + Sync {
    async fn find_execution(&self, criteria: &ExecutionCriteria)
        -> Result<Option<ExecutionSnapshot>>;

    /// Start an execution and return its engine id
    async fn start(
        &self,
        process: &Process,
        deployment: &ProcessDeployment,
        business_key: &str,
        data: &FieldData,
    ) -> Result<String>;

    /// Cancel an execution. Returns false if the engine did not know it.
    async fn cancel(&self, execution_id: &str, reason: Option<&str>) -> Result<bool>;
}

/// Execution engine kept in memory, for tests and the admin demo
#[derive(Default)]
pub struct InMemoryExecutionEngine {
    executions: DashMap<String, ExecutionSnapshot>,
}

impl InMemoryExecutionEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn execution_count(&self) -> usize {
        self.executions.len()
    }
}

#[async_trait]
impl ExecutionEngine for InMemoryExecutionEngine {
    async fn find_execution(
        &self,
        criteria: &ExecutionCriteria,
    ) -> Result<Option<ExecutionSnapshot>> {
        if criteria.is_empty() {
            return Err(ProcessDeskError::InvalidInput(
                "execution criteria must name an execution, business key or process".into(),
            ));
        }
        if let Some(id) = &criteria.execution_id {
            return Ok(self
                .executions
                .get(id)
                .map(|entry| entry.value().clone())
                .filter(|snapshot| criteria.matches(snapshot)));
        }
        Ok(self
            .executions
            .iter()
            .find(|entry| criteria.matches(entry.value()))
            .map(|entry| entry.value().clone()))
    }

    async fn start(
        &self,
        _process: &Process,
        deployment: &ProcessDeployment,
        business_key: &str,
        data: &FieldData,
    ) -> Result<String> {
        let execution_id = format!("exec-{}", Uuid::new_v4());
        let variables = data
            .iter()
            .map(|(field, values)| {
                let value = match values.as_slice() {
                    [single] => single.clone(),
                    many => serde_json::Value::Array(many.to_vec()),
                };
                (field.clone(), value)
            })
            .collect();

        self.executions.insert(
            execution_id.clone(),
            ExecutionSnapshot {
                execution_id: execution_id.clone(),
                business_key: business_key.to_string(),
                process_definition_key: deployment.engine_process_definition_key.clone(),
                variables,
            },
        );
        Ok(execution_id)
    }

    async fn cancel(&self, execution_id: &str, _reason: Option<&str>) -> Result<bool> {
        Ok(self.executions.remove(execution_id).is_some())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReconciliationState {
    NotStarted,
    Started,
    Synced,
    Desynced,
}

/// What happened between the engine and the local store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconciliationEvent {
    ExecutionStarted,
    EngineIdPersisted,
    Diverged,
}

impl ReconciliationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconciliationState::NotStarted => "NOT_STARTED",
            ReconciliationState::Started => "STARTED",
            ReconciliationState::Synced => "SYNCED",
            ReconciliationState::Desynced => "DESYNCED",
        }
    }

    /// The state `event` moves to, or `InvalidTransition`
    pub fn next(self, event: ReconciliationEvent) -> Result<ReconciliationState> {
        use ReconciliationEvent::*;
        use ReconciliationState::*;

        match (self, event) {
            (NotStarted, ExecutionStarted) => Ok(Started),
            (Started, EngineIdPersisted) => Ok(Synced),
            (Started, Diverged) | (Synced, Diverged) => Ok(Desynced),
            (from, event) => Err(ProcessDeskError::InvalidTransition {
                from: from.to_string(),
                to: match event {
                    ExecutionStarted => Started.to_string(),
                    EngineIdPersisted => Synced.to_string(),
                    Diverged => Desynced.to_string(),
                },
                transition: format!("{:?}", event),
            }),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ReconciliationState::Desynced)
    }
}

impl std::fmt::Display for ReconciliationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationRecord {
    pub state: ReconciliationState,
    /// Engine execution started for the instance, once known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<String>,
    /// Why the record is DESYNCED, if it is
    pub reason: Option<String>,
    pub updated_at: DateTime<Utc>,
}

pub struct EngineReconciler {
    engine: Arc<dyn ExecutionEngine>,
    store: Arc<ProcessInstanceStore>,
    records: DashMap<ProcessInstanceId, ReconciliationRecord>,
}

impl EngineReconciler {
    pub fn new(engine: Arc<dyn ExecutionEngine>, store: Arc<ProcessInstanceStore>) -> Self {
        Self {
            engine,
            store,
            records: DashMap::new(),
        }
    }

    /// Start the engine execution for `instance` and persist its engine id.
    ///
    /// The instance is re-read first, so a stale or unsaved document never
    /// reaches the engine. Only one caller can move an instance to STARTED.
    pub async fn start_execution(
        &self,
        process: &Process,
        deployment: &ProcessDeployment,
        instance: &ProcessInstance,
    ) -> Result<ProcessInstance> {
        let id = &instance.process_instance_id;
        let stored = self.store.get(id).await?;
        self.claim_start(id)?;

        let execution_id = match self
            .engine
            .start(process, deployment, id.as_str(), &stored.data)
            .await
        {
            Ok(execution_id) => execution_id,
            Err(err) => {
                self.release_start(id);
                return Err(err);
            }
        };
        if let Some(mut record) = self.records.get_mut(id) {
            record.execution_id = Some(execution_id.clone());
        }
        info!(instance_id = %id, execution_id = %execution_id, "engine execution started");

        let patch = InstancePatch::new().engine_instance_id(execution_id.clone());
        match self.store.update(id, &patch).await {
            Ok(updated) => {
                self.advance(id, ReconciliationEvent::EngineIdPersisted)?;
                Ok(updated)
            }
            Err(err @ ProcessDeskError::Conflict { .. }) => {
                self.mark_desynced(id, format!("engine id {} not persisted: {}", execution_id, err));
                Err(err)
            }
            Err(err) => {
                match self
                    .engine
                    .cancel(&execution_id, Some("engine id not persisted"))
                    .await
                {
                    Ok(_) => {
                        warn!(
                            instance_id = %id,
                            execution_id = %execution_id,
                            error = %err,
                            "engine id not persisted, execution cancelled"
                        );
                        self.release_start(id);
                    }
                    Err(cancel_err) => {
                        self.mark_desynced(
                            id,
                            format!(
                                "engine id {} not persisted ({}) and cancel failed: {}",
                                execution_id, err, cancel_err
                            ),
                        );
                    }
                }
                Err(err)
            }
        }
    }

    /// Engine view of `instance`, by engine id when known
    pub async fn find_execution(
        &self,
        instance: &ProcessInstance,
    ) -> Result<Option<ExecutionSnapshot>> {
        let criteria = match &instance.engine_instance_id {
            Some(execution_id) => ExecutionCriteria::by_execution(execution_id.clone()),
            None => ExecutionCriteria::by_business_key(instance.process_instance_id.as_str()),
        };
        self.engine.find_execution(&criteria).await
    }

    /// Cancel the engine execution behind `instance`, if it has one
    pub async fn cancel_execution(
        &self,
        instance: &ProcessInstance,
        reason: Option<&str>,
    ) -> Result<bool> {
        let Some(execution_id) = &instance.engine_instance_id else {
            debug!(instance_id = %instance.process_instance_id, "no engine execution to cancel");
            return Ok(false);
        };
        let cancelled = self.engine.cancel(execution_id, reason).await?;
        info!(
            instance_id = %instance.process_instance_id,
            execution_id = %execution_id,
            cancelled,
            "engine execution cancel requested"
        );
        Ok(cancelled)
    }

    /// Compare the stored instance with the engine and record the outcome
    pub async fn verify(&self, id: &ProcessInstanceId) -> Result<ReconciliationState> {
        let current = self.state_of(id);
        if current.is_terminal() {
            return Ok(current);
        }

        let instance = self.store.get(id).await?;
        let Some(execution_id) = instance.engine_instance_id.clone() else {
            return Ok(current);
        };

        // A persisted engine id is proof the start completed, e.g. before a restart
        if current == ReconciliationState::NotStarted {
            self.advance(id, ReconciliationEvent::ExecutionStarted)?;
        }
        if self.state_of(id) == ReconciliationState::Started {
            self.advance(id, ReconciliationEvent::EngineIdPersisted)?;
        }

        let snapshot = self
            .engine
            .find_execution(&ExecutionCriteria::by_execution(execution_id.clone()))
            .await?;

        let mismatch = match (&snapshot, instance.process_status) {
            (None, ProcessStatus::Open | ProcessStatus::Suspended) => Some(format!(
                "engine has no execution {} for a {} instance",
                execution_id, instance.process_status
            )),
            (Some(_), ProcessStatus::Cancelled) => Some(format!(
                "execution {} still running for a cancelled instance",
                execution_id
            )),
            (Some(snapshot), _) if snapshot.business_key != id.as_str() => Some(format!(
                "execution {} belongs to business key {}",
                execution_id, snapshot.business_key
            )),
            _ => None,
        };

        match mismatch {
            Some(reason) => Ok(self.mark_desynced(id, reason)),
            None if instance.process_status.is_terminal() => {
                let state = self.state_of(id);
                self.records.remove_if(id, |_, record| !record.state.is_terminal());
                debug!(instance_id = %id, status = %instance.process_status, "reconciliation record dropped");
                Ok(state)
            }
            None => Ok(self.state_of(id)),
        }
    }

    /// Verify every instance matching `query`
    pub async fn audit(
        &self,
        query: &InstanceQuery,
    ) -> Result<Vec<(ProcessInstanceId, ReconciliationState)>> {
        let instances = self.store.find_all(query).await?;
        let mut outcome = Vec::with_capacity(instances.len());
        for instance in instances {
            let state = self.verify(&instance.process_instance_id).await?;
            outcome.push((instance.process_instance_id, state));
        }
        info!(
            checked = outcome.len(),
            desynced = outcome
                .iter()
                .filter(|(_, state)| state.is_terminal())
                .count(),
            "reconciliation audit finished"
        );
        Ok(outcome)
    }

    pub fn state_of(&self, id: &ProcessInstanceId) -> ReconciliationState {
        self.records
            .get(id)
            .map(|record| record.state)
            .unwrap_or(ReconciliationState::NotStarted)
    }

    pub fn record(&self, id: &ProcessInstanceId) -> Option<ReconciliationRecord> {
        self.records.get(id).map(|record| record.value().clone())
    }

    /// Number of instances with a reconciliation record
    pub fn tracked(&self) -> usize {
        self.records.len()
    }

    /// Instances waiting for an operator
    pub fn desynced(&self) -> Vec<(ProcessInstanceId, ReconciliationRecord)> {
        let mut found: Vec<_> = self
            .records
            .iter()
            .filter(|entry| entry.value().state.is_terminal())
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        found.sort_by(|a, b| a.0.cmp(&b.0));
        found
    }

    /// Move NOT_STARTED to STARTED under the entry lock
    fn claim_start(&self, id: &ProcessInstanceId) -> Result<()> {
        match self.records.entry(id.clone()) {
            Entry::Occupied(mut entry) => {
                let next = entry.get().state.next(ReconciliationEvent::ExecutionStarted)?;
                let record = entry.get_mut();
                record.state = next;
                record.updated_at = Utc::now();
            }
            Entry::Vacant(entry) => {
                entry.insert(ReconciliationRecord {
                    state: ReconciliationState::Started,
                    execution_id: None,
                    reason: None,
                    updated_at: Utc::now(),
                });
            }
        }
        debug!(instance_id = %id, state = %ReconciliationState::Started, "reconciliation state changed");
        Ok(())
    }

    /// Undo a claim whose execution is not running
    fn release_start(&self, id: &ProcessInstanceId) {
        self.records
            .remove_if(id, |_, record| record.state == ReconciliationState::Started);
        debug!(instance_id = %id, "engine start rolled back");
    }

    fn advance(
        &self,
        id: &ProcessInstanceId,
        event: ReconciliationEvent,
    ) -> Result<ReconciliationState> {
        let mut entry = self
            .records
            .entry(id.clone())
            .or_insert_with(|| ReconciliationRecord {
                state: ReconciliationState::NotStarted,
                execution_id: None,
                reason: None,
                updated_at: Utc::now(),
            });
        let next = entry.state.next(event)?;
        entry.state = next;
        entry.updated_at = Utc::now();
        debug!(instance_id = %id, state = %next, "reconciliation state changed");
        Ok(next)
    }

    /// Move to DESYNCED, keeping the first recorded reason
    fn mark_desynced(&self, id: &ProcessInstanceId, reason: String) -> ReconciliationState {
        let mut entry = self
            .records
            .entry(id.clone())
            .or_insert_with(|| ReconciliationRecord {
                state: ReconciliationState::Started,
                execution_id: None,
                reason: None,
                updated_at: Utc::now(),
            });
        if entry.state.is_terminal() {
            return entry.state;
        }
        // NOT_STARTED has nothing to diverge from; record it as a failed start
        let from = match entry.state {
            ReconciliationState::NotStarted => ReconciliationState::Started,
            state => state,
        };
        let next = from
            .next(ReconciliationEvent::Diverged)
            .unwrap_or(ReconciliationState::Desynced);
        warn!(instance_id = %id, reason = %reason, "instance desynchronized from engine");
        entry.state = next;
        entry.reason = Some(reason);
        entry.updated_at = Utc::now();
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::storage::{InMemoryStorage, InstanceRepository, Page, PageRequest};
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// In-memory instances whose updates can be switched to fail
    #[derive(Default)]
    struct UnreliableInstances {
        inner: InMemoryStorage,
        failing: AtomicBool,
    }

    #[async_trait]
    impl InstanceRepository for UnreliableInstances {
        async fn find_one(&self, id: &ProcessInstanceId) -> Result<Option<ProcessInstance>> {
            self.inner.find_one(id).await
        }

        async fn save(&self, instance: ProcessInstance) -> Result<ProcessInstance> {
            self.inner.save(instance).await
        }

        async fn update(
            &self,
            id: &ProcessInstanceId,
            patch: &InstancePatch,
        ) -> Result<Option<ProcessInstance>> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(ProcessDeskError::Storage(anyhow::anyhow!("write timed out")));
            }
            self.inner.update(id, patch).await
        }

        async fn find_page(
            &self,
            query: &InstanceQuery,
            page: PageRequest,
        ) -> Result<Page<ProcessInstance>> {
            self.inner.find_page(query, page).await
        }
    }

    fn fixtures() -> (Process, ProcessDeployment) {
        (
            Process::new("expense", "Expense").with_deployment("dep-1"),
            ProcessDeployment::new("dep-1", "expense", "expense_v3"),
        )
    }

    async fn setup() -> (
        EngineReconciler,
        Arc<InMemoryExecutionEngine>,
        Arc<ProcessInstanceStore>,
        ProcessInstance,
    ) {
        let (process, _) = fixtures();
        let store = Arc::new(ProcessInstanceStore::new(Arc::new(InMemoryStorage::new())));
        let engine = Arc::new(InMemoryExecutionEngine::new());
        let instance = ProcessInstance::builder(&process, "dep-1")
            .data(FieldData::from([("amount".to_string(), vec![json!("100")])]))
            .build();
        let instance = store.create(instance).await.unwrap();
        let reconciler = EngineReconciler::new(engine.clone(), store.clone());
        (reconciler, engine, store, instance)
    }

    #[test]
    fn test_state_machine() {
        use ReconciliationEvent::*;
        use ReconciliationState::*;

        assert_eq!(NotStarted.next(ExecutionStarted).unwrap(), Started);
        assert_eq!(Started.next(EngineIdPersisted).unwrap(), Synced);
        assert_eq!(Synced.next(Diverged).unwrap(), Desynced);

        let err = NotStarted.next(EngineIdPersisted).unwrap_err();
        assert!(matches!(err, ProcessDeskError::InvalidTransition { .. }));
        for event in [ExecutionStarted, EngineIdPersisted, Diverged] {
            assert!(Desynced.next(event).is_err());
        }
    }

    #[tokio::test]
    async fn test_start_execution_syncs() {
        let (reconciler, engine, _, instance) = setup().await;
        let (process, deployment) = fixtures();

        let updated = reconciler
            .start_execution(&process, &deployment, &instance)
            .await
            .unwrap();
        let id = &updated.process_instance_id;

        assert!(updated.engine_instance_id.is_some());
        assert_eq!(reconciler.state_of(id), ReconciliationState::Synced);

        let snapshot = reconciler.find_execution(&updated).await.unwrap().unwrap();
        assert_eq!(snapshot.business_key, id.as_str());
        assert_eq!(snapshot.process_definition_key, "expense_v3");
        assert_eq!(snapshot.variables["amount"], json!("100"));
        assert_eq!(engine.execution_count(), 1);

        // starting twice is not a legal move
        let again = reconciler
            .start_execution(&process, &deployment, &updated)
            .await
            .unwrap_err();
        assert!(matches!(again, ProcessDeskError::InvalidTransition { .. }));
        assert_eq!(engine.execution_count(), 1);
    }

    #[tokio::test]
    async fn test_conflicting_engine_id_desyncs() {
        let (reconciler, _, store, instance) = setup().await;
        let (process, deployment) = fixtures();
        let id = instance.process_instance_id.clone();
        store
            .update(&id, &InstancePatch::new().engine_instance_id("exec-foreign"))
            .await
            .unwrap();

        let err = reconciler
            .start_execution(&process, &deployment, &instance)
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessDeskError::Conflict { .. }));
        assert_eq!(reconciler.state_of(&id), ReconciliationState::Desynced);
        assert_eq!(reconciler.desynced().len(), 1);
    }

    #[tokio::test]
    async fn test_vanished_execution_desyncs_and_stays() {
        let (reconciler, engine, _, instance) = setup().await;
        let (process, deployment) = fixtures();
        let synced = reconciler
            .start_execution(&process, &deployment, &instance)
            .await
            .unwrap();
        let id = synced.process_instance_id.clone();

        assert_eq!(reconciler.verify(&id).await.unwrap(), ReconciliationState::Synced);

        assert!(reconciler.cancel_execution(&synced, Some("test")).await.unwrap());
        assert_eq!(engine.execution_count(), 0);
        assert_eq!(
            reconciler.verify(&id).await.unwrap(),
            ReconciliationState::Desynced
        );

        let record = reconciler.record(&id).unwrap();
        assert!(record.reason.unwrap().contains("no execution"));
        // later checks do not clear the state
        assert_eq!(
            reconciler.verify(&id).await.unwrap(),
            ReconciliationState::Desynced
        );
    }

    #[tokio::test]
    async fn test_audit_adopts_persisted_engine_ids() {
        let (_, engine, store, instance) = setup().await;
        let (process, deployment) = fixtures();
        let id = instance.process_instance_id.clone();
        let execution_id = engine
            .start(&process, &deployment, id.as_str(), &instance.data)
            .await
            .unwrap();
        store
            .update(&id, &InstancePatch::new().engine_instance_id(execution_id))
            .await
            .unwrap();

        // fresh reconciler, as after a restart
        let reconciler = EngineReconciler::new(engine.clone(), store.clone());
        let outcome = reconciler
            .audit(&InstanceQuery::new().process("expense"))
            .await
            .unwrap();
        assert_eq!(outcome, vec![(id.clone(), ReconciliationState::Synced)]);
        assert!(reconciler.desynced().is_empty());
    }

    #[tokio::test]
    async fn test_start_requires_stored_instance() {
        let (process, deployment) = fixtures();
        let store = Arc::new(ProcessInstanceStore::new(Arc::new(InMemoryStorage::new())));
        let engine = Arc::new(InMemoryExecutionEngine::new());
        let reconciler = EngineReconciler::new(engine.clone(), store.clone());
        let unsaved = ProcessInstance::builder(&process, "dep-1").build();
        let id = unsaved.process_instance_id.clone();

        let err = reconciler
            .start_execution(&process, &deployment, &unsaved)
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessDeskError::InstanceNotFound { .. }));
        assert_eq!(engine.execution_count(), 0);
        assert_eq!(reconciler.state_of(&id), ReconciliationState::NotStarted);

        let saved = store.create(unsaved).await.unwrap();
        reconciler
            .start_execution(&process, &deployment, &saved)
            .await
            .unwrap();
        assert_eq!(reconciler.state_of(&id), ReconciliationState::Synced);
    }

    #[tokio::test]
    async fn test_failed_persist_cancels_execution_and_allows_retry() {
        let (process, deployment) = fixtures();
        let instances = Arc::new(UnreliableInstances::default());
        let store = Arc::new(ProcessInstanceStore::new(instances.clone()));
        let engine = Arc::new(InMemoryExecutionEngine::new());
        let reconciler = EngineReconciler::new(engine.clone(), store.clone());
        let instance = store
            .create(ProcessInstance::builder(&process, "dep-1").build())
            .await
            .unwrap();
        let id = instance.process_instance_id.clone();

        instances.failing.store(true, Ordering::SeqCst);
        let err = reconciler
            .start_execution(&process, &deployment, &instance)
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessDeskError::Storage(_)));
        assert_eq!(engine.execution_count(), 0);
        assert_eq!(reconciler.state_of(&id), ReconciliationState::NotStarted);
        assert!(reconciler.desynced().is_empty());

        instances.failing.store(false, Ordering::SeqCst);
        let updated = reconciler
            .start_execution(&process, &deployment, &instance)
            .await
            .unwrap();
        assert_eq!(engine.execution_count(), 1);
        assert_eq!(
            reconciler.record(&id).unwrap().execution_id,
            updated.engine_instance_id
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_starts_run_one_execution() {
        let (reconciler, engine, _, instance) = setup().await;
        let (process, deployment) = fixtures();
        let reconciler = Arc::new(reconciler);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let reconciler = reconciler.clone();
                let (process, deployment, instance) =
                    (process.clone(), deployment.clone(), instance.clone());
                tokio::spawn(async move {
                    reconciler
                        .start_execution(&process, &deployment, &instance)
                        .await
                })
            })
            .collect();

        let mut started = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => started += 1,
                Err(err) => assert!(matches!(err, ProcessDeskError::InvalidTransition { .. })),
            }
        }
        assert_eq!(started, 1);
        assert_eq!(engine.execution_count(), 1);
    }

    #[tokio::test]
    async fn test_finished_instances_are_no_longer_tracked() {
        let (reconciler, engine, store, instance) = setup().await;
        let (process, deployment) = fixtures();
        let synced = reconciler
            .start_execution(&process, &deployment, &instance)
            .await
            .unwrap();
        let id = synced.process_instance_id.clone();
        assert_eq!(reconciler.tracked(), 1);

        reconciler.cancel_execution(&synced, None).await.unwrap();
        store
            .update(&id, &InstancePatch::new().process_status(ProcessStatus::Cancelled))
            .await
            .unwrap();

        assert_eq!(reconciler.verify(&id).await.unwrap(), ReconciliationState::Synced);
        assert_eq!(reconciler.tracked(), 0);
        assert_eq!(engine.execution_count(), 0);

        // DESYNCED records stay for the operator even once the instance is done
        let (process, _) = fixtures();
        let other = store
            .create(ProcessInstance::builder(&process, "dep-1").build())
            .await
            .unwrap();
        let other_id = other.process_instance_id.clone();
        reconciler
            .start_execution(&process, &deployment, &other)
            .await
            .unwrap();
        store
            .update(&other_id, &InstancePatch::new().process_status(ProcessStatus::Cancelled))
            .await
            .unwrap();
        assert_eq!(
            reconciler.verify(&other_id).await.unwrap(),
            ReconciliationState::Desynced
        );
        assert_eq!(reconciler.tracked(), 1);
    }

    #[test]
    fn test_empty_criteria_rejected() {
        let engine = InMemoryExecutionEngine::new();
        let result = tokio_test::block_on(engine.find_execution(&ExecutionCriteria::default()));
        assert!(matches!(result, Err(ProcessDeskError::InvalidInput(_))));
    }
}
