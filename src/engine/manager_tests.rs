// Lifecycle scenario tests for the StorageManager
use crate::{
    config::ConcurrencyMode,
    engine::{
        events::{EventBus, NotificationService},
        instance_store::ProcessInstanceStore,
        manager::StorageManager,
        patch::InstancePatch,
        reconcile::{EngineReconciler, InMemoryExecutionEngine, ReconciliationState},
        storage::{AttachmentRepository, InMemoryStorage, ProcessRepository, SubmissionRepository},
    },
    models::{
        ActionType, Attachment, AttachmentId, Entity, FieldData, LifecycleEventType, Notification,
        OperationResult, OperationType, Process, ProcessDeployment, ProcessInstance,
        ProcessStatus, Submission, Task, TaskId, Validation,
    },
    ProcessDeskError, Result,
};

use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;

// Attachment store that rejects every write
struct FailingAttachments;

#[async_trait]
impl AttachmentRepository for FailingAttachments {
    async fn save_attachment(&self, _attachment: Attachment) -> Result<Attachment> {
        Err(ProcessDeskError::Storage(anyhow::anyhow!("attachment store unavailable")))
    }

    async fn find_attachment(&self, _id: &AttachmentId) -> Result<Option<Attachment>> {
        Ok(None)
    }
}

// Test helpers
fn process() -> Process {
    Process::new("expense", "Expense Report")
        .with_label_template("Expense {{amount}}")
        .with_deployment("dep-1")
}

fn deployment() -> ProcessDeployment {
    ProcessDeployment::new("dep-1", "expense", "expense_v1")
        .with_initiation_status("pending-review")
        .with_completion_status("paid")
        .with_cancellation_status("withdrawn")
        .with_notification(
            Notification::new("done", LifecycleEventType::TaskCompleted).to("finance@example.com"),
        )
}

fn amount(value: &str) -> FieldData {
    FieldData::from([("amount".to_string(), vec![json!(value)])])
}

fn alice() -> Entity {
    Entity::user("alice")
}

async fn setup_with(mode: ConcurrencyMode) -> (StorageManager, Arc<InMemoryStorage>, EventBus) {
    let storage = Arc::new(InMemoryStorage::new());
    storage.save_process(process()).await.unwrap();
    storage.save_deployment(deployment()).await.unwrap();

    let bus = EventBus::new(16);
    let manager = StorageManager::with_backend(storage.clone(), Arc::new(bus.clone()))
        .with_concurrency(mode);
    (manager, storage, bus)
}

async fn setup() -> (StorageManager, Arc<InMemoryStorage>, EventBus) {
    setup_with(ConcurrencyMode::LastWriteWins).await
}

async fn create_default(manager: &StorageManager) -> ProcessInstance {
    manager
        .create(
            &process(),
            &deployment(),
            amount("100"),
            Vec::new(),
            None,
            &alice(),
        )
        .await
        .unwrap()
}

async fn with_task(manager: &StorageManager, instance: &ProcessInstance, id: &str) -> ProcessInstance {
    let task = Task::builder(id, "review").candidate("bob").build();
    assert!(manager.store_task(instance, Some(task)).await.unwrap());
    manager.store().get(&instance.process_instance_id).await.unwrap()
}

#[tokio::test]
async fn test_create_applies_initiation_status() {
    let (manager, _, _) = setup().await;
    let instance = create_default(&manager).await;

    assert_eq!(instance.application_status.as_deref(), Some("pending-review"));
    assert_eq!(instance.process_status, ProcessStatus::Open);
    assert_eq!(instance.process_instance_label, "Expense 100");
    assert_eq!(instance.initiator_id.as_deref(), Some("alice"));
    assert_eq!(instance.first_value("amount"), Some(&json!("100")));
}

#[tokio::test]
async fn test_create_persists_attachments_and_submission() {
    let (manager, storage, _) = setup().await;
    let receipt = Attachment::file("receipt.pdf", "s3://bucket/r1", "application/pdf", "alice");
    let submission = Submission::new("expense", ActionType::Create, amount("100"), "alice")
        .with_label("Team dinner");

    let instance = manager
        .create(
            &process(),
            &deployment(),
            amount("100"),
            vec![receipt.clone()],
            Some(submission.clone()),
            &alice(),
        )
        .await
        .unwrap();

    assert!(instance.has_attachment(&receipt.id));
    assert!(instance.submission_ids.contains(&submission.id));
    assert_eq!(instance.process_instance_label, "Team dinner");
    assert!(storage.find_attachment(&receipt.id).await.unwrap().is_some());
    assert!(storage.find_submission(&submission.id).await.unwrap().is_some());
}

#[tokio::test]
async fn test_create_requires_known_process_and_deployment() {
    let (manager, storage, _) = setup().await;

    let unknown = Process::new("travel", "Travel");
    let err = manager
        .create(&unknown, &deployment(), amount("1"), Vec::new(), None, &alice())
        .await
        .unwrap_err();
    assert!(matches!(err, ProcessDeskError::ProcessNotFound { .. }));

    let other = ProcessDeployment::new("dep-9", "expense", "expense_v9");
    let err = manager
        .create(&process(), &other, amount("1"), Vec::new(), None, &alice())
        .await
        .unwrap_err();
    assert!(matches!(err, ProcessDeskError::DeploymentNotFound { .. }));
    assert_eq!(storage.instance_count(), 0);
}

#[tokio::test]
async fn test_complete_closes_task_and_logs_operation() {
    let (manager, _, bus) = setup().await;
    let mut notifications = bus.subscribe();
    let instance = create_default(&manager).await;
    let instance = with_task(&manager, &instance, "t1").await;

    let result = OperationResult::new()
        .with_application_status("approved")
        .with_task(Task::builder("t1", "review").assignee("bob").build());
    let updated = manager
        .store_operation(OperationType::Complete, &result, &instance, &Entity::user("bob"))
        .await
        .unwrap();

    let t1 = updated.tasks.get(&TaskId::from("t1")).unwrap();
    assert!(!t1.active);
    assert!(t1.complete);
    assert_eq!(t1.assignee_id.as_deref(), Some("bob"));
    assert_eq!(updated.application_status.as_deref(), Some("approved"));

    let last = updated.operations.last().unwrap();
    assert_eq!(last.operation_type, OperationType::Complete);
    assert_eq!(last.acting_user_id, "bob");

    let event = notifications.recv().await.unwrap();
    assert_eq!(event.event_type, LifecycleEventType::TaskCompleted);
    assert_eq!(event.context["application_status"], "approved");
}

#[tokio::test]
async fn test_assign_and_update_leave_tasks_alone() {
    let (manager, _, _) = setup().await;
    let instance = create_default(&manager).await;
    let instance = with_task(&manager, &instance, "t1").await;
    let before = instance.tasks.clone();

    let reported = Task::builder("t1", "review").assignee("carol").build();
    for op in [OperationType::Assign, OperationType::Update] {
        let result = OperationResult::new().with_task(reported.clone());
        let updated = manager
            .store_operation(op, &result, &instance, &alice())
            .await
            .unwrap();
        assert_eq!(updated.tasks, before);
    }
}

#[tokio::test]
async fn test_operation_log_is_append_only() {
    let (manager, _, _) = setup().await;
    let instance = create_default(&manager).await;
    let instance = with_task(&manager, &instance, "t1").await;
    let claim = Task::builder("t1", "review").assignee("bob").build();

    let calls = [
        (OperationType::Claim, OperationResult::new().with_task(claim.clone())),
        (OperationType::Suspension, OperationResult::new()),
        (OperationType::Activation, OperationResult::new()),
        (OperationType::Update, OperationResult::new().with_explanation("typo")),
        (OperationType::Complete, OperationResult::new().with_task(claim)),
    ];

    let mut seen = Vec::new();
    let mut current = instance;
    for (op, result) in calls.iter() {
        current = manager
            .store_operation(*op, result, &current, &alice())
            .await
            .unwrap();
        // earlier entries are never rewritten
        assert_eq!(&current.operations.as_slice()[..seen.len()], seen.as_slice());
        seen = current.operations.as_slice().to_vec();
    }

    let types: Vec<_> = current
        .operations
        .iter()
        .map(|op| op.operation_type)
        .collect();
    assert_eq!(types, calls.iter().map(|(op, _)| *op).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_suspend_then_activate_restores_application_status() {
    let (manager, _, _) = setup().await;
    let instance = create_default(&manager).await;

    let suspended = manager
        .store_operation(
            OperationType::Suspension,
            &OperationResult::new().with_application_status("on-hold"),
            &instance,
            &alice(),
        )
        .await
        .unwrap();
    assert_eq!(suspended.process_status, ProcessStatus::Suspended);
    assert_eq!(suspended.application_status.as_deref(), Some("on-hold"));
    assert_eq!(
        suspended.previous_application_status.as_deref(),
        Some("pending-review")
    );

    let active = manager
        .store_operation(OperationType::Activation, &OperationResult::new(), &suspended, &alice())
        .await
        .unwrap();
    assert_eq!(active.process_status, ProcessStatus::Open);
    assert_eq!(active.application_status.as_deref(), Some("pending-review"));
}

#[tokio::test]
async fn test_cancel_uses_deployment_cancellation_status() {
    let (manager, _, _) = setup().await;
    let instance = create_default(&manager).await;

    let cancelled = manager
        .store_operation(OperationType::Cancel, &OperationResult::new(), &instance, &alice())
        .await
        .unwrap();
    assert_eq!(cancelled.process_status, ProcessStatus::Cancelled);
    assert_eq!(cancelled.application_status.as_deref(), Some("withdrawn"));
    assert!(cancelled.end_time.is_some());
}

#[tokio::test]
async fn test_attach_only_leaves_data_unchanged() {
    let (manager, _, _) = setup().await;
    let instance = create_default(&manager).await;
    let note = Attachment::text("comment", "see receipt", "alice");

    let validation = Validation {
        process: process(),
        deployment: deployment(),
        instance_id: Some(instance.process_instance_id.clone()),
        task: None,
        submission: Submission::new("expense", ActionType::Attach, amount("999"), "alice")
            .for_instance(instance.process_instance_id.clone()),
        data: amount("999"),
        attachments: vec![note.clone()],
        instance_version: None,
    };

    let updated = manager
        .store_validation(&validation, ActionType::Attach)
        .await
        .unwrap();
    assert_eq!(updated.data, instance.data);
    assert!(updated.has_attachment(&note.id));

    let saved = manager
        .store_validation(&validation, ActionType::Save)
        .await
        .unwrap();
    assert_eq!(saved.first_value("amount"), Some(&json!("999")));
}

#[tokio::test]
async fn test_store_validation_requires_instance() {
    let (manager, _, _) = setup().await;
    let validation = Validation {
        process: process(),
        deployment: deployment(),
        instance_id: None,
        task: None,
        submission: Submission::new("expense", ActionType::Save, amount("1"), "alice"),
        data: amount("1"),
        attachments: Vec::new(),
        instance_version: None,
    };

    let err = manager
        .store_validation(&validation, ActionType::Save)
        .await
        .unwrap_err();
    assert!(matches!(err, ProcessDeskError::InvalidInput(_)));
}

#[tokio::test]
async fn test_archive_sets_complete_and_end_time() {
    let (manager, _, _) = setup().await;
    let instance = create_default(&manager).await;
    let instance = with_task(&manager, &instance, "t1").await;

    let archived = manager.archive(&instance, amount("120")).await.unwrap();

    assert_eq!(archived.process_status, ProcessStatus::Complete);
    assert!(archived.end_time.is_some());
    assert_eq!(archived.application_status.as_deref(), Some("paid"));
    assert_eq!(archived.first_value("amount"), Some(&json!("120")));
    assert!(!archived.tasks.has_open_tasks());
    assert!(archived.check_invariants().is_ok());
}

#[tokio::test]
async fn test_minus_attachment_removes_one() {
    let (manager, _, _) = setup().await;
    let a1 = Attachment::text("a1", "first", "alice");
    let a2 = Attachment::text("a2", "second", "alice");
    let instance = manager
        .create(
            &process(),
            &deployment(),
            amount("100"),
            vec![a1.clone(), a2.clone()],
            None,
            &alice(),
        )
        .await
        .unwrap();

    let updated = manager
        .minus_attachment(&instance, &a1.id, &alice())
        .await
        .unwrap();
    assert_eq!(
        updated.attachment_ids.iter().cloned().collect::<Vec<_>>(),
        vec![a2.id.clone()]
    );

    let err = manager
        .minus_attachment(&updated, &AttachmentId::from("a-unknown"), &alice())
        .await
        .unwrap_err();
    assert!(matches!(err, ProcessDeskError::AttachmentNotFound { .. }));
}

#[tokio::test]
async fn test_store_task_none_is_noop() {
    let (manager, _, _) = setup().await;
    let instance = create_default(&manager).await;

    assert!(!manager.store_task(&instance, None).await.unwrap());
    let stored = manager.store().get(&instance.process_instance_id).await.unwrap();
    assert_eq!(stored, instance);
}

#[tokio::test]
async fn test_missing_instance_is_not_found() {
    let (manager, _, _) = setup().await;
    let ghost = ProcessInstance::builder(&process(), "dep-1").build();

    let err = manager
        .store_operation(OperationType::Claim, &OperationResult::new(), &ghost, &alice())
        .await
        .unwrap_err();
    assert!(err.is_not_found());
    assert!(manager.archive(&ghost, FieldData::new()).await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_repeated_patch_is_idempotent() {
    let (manager, _, _) = setup().await;
    let instance = create_default(&manager).await;
    let patch = InstancePatch::new()
        .data(amount("250"))
        .upsert_task(Task::builder("t1", "review").build())
        .add_attachments(vec![AttachmentId::from("a9")]);

    let once = manager
        .store()
        .update(&instance.process_instance_id, &patch)
        .await
        .unwrap();
    let twice = manager
        .store()
        .update(&instance.process_instance_id, &patch)
        .await
        .unwrap();
    assert_eq!(once, twice);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_task_completions_keep_both() {
    let (manager, _, _) = setup().await;
    let manager = Arc::new(manager);
    let instance = create_default(&manager).await;
    let instance = with_task(&manager, &instance, "t1").await;
    let instance = with_task(&manager, &instance, "t2").await;

    let handles: Vec<_> = ["t1", "t2"]
        .into_iter()
        .map(|task_id| {
            let manager = manager.clone();
            let instance = instance.clone();
            tokio::spawn(async move {
                let result = OperationResult::new().with_task(Task::builder(task_id, "review").build());
                manager
                    .store_operation(OperationType::Complete, &result, &instance, &alice())
                    .await
            })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let merged = manager.store().get(&instance.process_instance_id).await.unwrap();
    assert!(!merged.tasks.has_open_tasks());
    assert_eq!(merged.operations.len(), 2);
}

#[tokio::test]
async fn test_version_checked_rejects_stale_instance() {
    let (manager, _, _) = setup_with(ConcurrencyMode::VersionChecked).await;
    let stale = create_default(&manager).await;

    manager
        .store_operation(OperationType::Update, &OperationResult::new(), &stale, &alice())
        .await
        .unwrap();

    let err = manager
        .store_operation(OperationType::Update, &OperationResult::new(), &stale, &alice())
        .await
        .unwrap_err();
    assert!(matches!(err, ProcessDeskError::Conflict { .. }));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_notification_without_subscribers_does_not_fail() {
    let (manager, _, bus) = setup().await;
    assert_eq!(bus.subscriber_count(), 0);
    let instance = create_default(&manager).await;
    let instance = with_task(&manager, &instance, "t1").await;

    let result = OperationResult::new().with_task(Task::builder("t1", "review").build());
    let sent = bus
        .send(&deployment().notifications[0], &Default::default(), LifecycleEventType::TaskCompleted)
        .await;
    assert!(!sent);
    manager
        .store_operation(OperationType::Complete, &result, &instance, &alice())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_failed_attachment_write_creates_nothing() {
    let storage = Arc::new(InMemoryStorage::new());
    storage.save_process(process()).await.unwrap();
    storage.save_deployment(deployment()).await.unwrap();
    let store = Arc::new(ProcessInstanceStore::new(storage.clone()));
    let manager = StorageManager::new(
        storage.clone(),
        Arc::new(FailingAttachments),
        storage.clone(),
        store,
        Arc::new(EventBus::new(16)),
    );

    let err = manager
        .create(
            &process(),
            &deployment(),
            amount("100"),
            vec![Attachment::text("comment", "receipt attached", "alice")],
            None,
            &alice(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ProcessDeskError::Storage(_)));
    assert_eq!(storage.instance_count(), 0);
}

#[tokio::test]
async fn test_finished_instance_refuses_new_tasks() {
    let (manager, _, _) = setup().await;
    let instance = create_default(&manager).await;
    let instance = with_task(&manager, &instance, "t1").await;
    let archived = manager.archive(&instance, amount("100")).await.unwrap();

    let late = Task::builder("t9", "review").candidate("bob").build();
    let claim = OperationResult::new().with_task(late.assigned_to(Some("bob".into())));
    let err = manager
        .store_operation(OperationType::Claim, &claim, &archived, &Entity::user("bob"))
        .await
        .unwrap_err();
    assert!(matches!(err, ProcessDeskError::Conflict { .. }));

    let err = manager
        .store_task(&archived, Some(Task::builder("t10", "review").build()))
        .await
        .unwrap_err();
    assert!(matches!(err, ProcessDeskError::Conflict { .. }));

    let stored = manager.store().get(&archived.process_instance_id).await.unwrap();
    assert_eq!(stored, archived);
    assert!(stored.check_invariants().is_ok());
}

#[tokio::test]
async fn test_cancel_stops_engine_execution() {
    let (manager, _, _) = setup().await;
    let engine = Arc::new(InMemoryExecutionEngine::new());
    let reconciler = Arc::new(EngineReconciler::new(engine.clone(), manager.store().clone()));
    let manager = manager.with_reconciler(reconciler.clone());

    let instance = create_default(&manager).await;
    let instance = reconciler
        .start_execution(&process(), &deployment(), &instance)
        .await
        .unwrap();
    assert_eq!(engine.execution_count(), 1);

    let withdrawn = OperationResult::new().with_explanation("duplicate claim");
    let cancelled = manager
        .store_operation(OperationType::Cancel, &withdrawn, &instance, &alice())
        .await
        .unwrap();

    assert_eq!(cancelled.process_status, ProcessStatus::Cancelled);
    assert_eq!(engine.execution_count(), 0);
    assert_eq!(
        reconciler.verify(&cancelled.process_instance_id).await.unwrap(),
        ReconciliationState::Synced
    );
}

#[tokio::test]
async fn test_validation_version_guard() {
    let (manager, _, _) = setup_with(ConcurrencyMode::VersionChecked).await;
    let instance = create_default(&manager).await;
    let rendered_from = instance.version;

    manager
        .store_operation(OperationType::Update, &OperationResult::new(), &instance, &alice())
        .await
        .unwrap();

    let mut validation = Validation {
        process: process(),
        deployment: deployment(),
        instance_id: Some(instance.process_instance_id.clone()),
        task: None,
        submission: Submission::new("expense", ActionType::Save, amount("300"), "alice")
            .for_instance(instance.process_instance_id.clone()),
        data: amount("300"),
        attachments: Vec::new(),
        instance_version: Some(rendered_from),
    };
    let err = manager
        .store_validation(&validation, ActionType::Save)
        .await
        .unwrap_err();
    assert!(matches!(err, ProcessDeskError::Conflict { .. }));

    // without a version the save is merged last-write-wins
    validation.instance_version = None;
    let saved = manager
        .store_validation(&validation, ActionType::Save)
        .await
        .unwrap();
    assert_eq!(saved.first_value("amount"), Some(&json!("300")));
}
