//! Process Desk Admin CLI
//!
//! Operator tool: prints the effective configuration and runs a complete
//! instance lifecycle against in-memory backends.

use anyhow::Result;
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use process_desk::{
    EngineReconciler, Entity, EventBus, FieldData, InMemoryExecutionEngine, InMemoryStorage,
    LifecycleEventType, Notification, OperationResult, OperationType, Process, ProcessDeployment,
    ProcessDeskConfig, ProcessRepository, StorageManager, Task,
};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "process-desk-admin")]
#[command(about = "Process Desk Admin CLI - inspect configuration and exercise the lifecycle")]
#[command(version = "0.1")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (without extension is fine)
    #[arg(long, env = "PROCESS_DESK_CONFIG")]
    config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the effective configuration as JSON
    Config,

    /// Run create -> start -> claim -> complete -> archive in memory
    Demo {
        /// Amount submitted with the demo expense
        #[arg(long, default_value = "100")]
        amount: String,

        /// User who claims and completes the review task
        #[arg(long, default_value = "bob")]
        reviewer: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // .env is optional
    let dotenv_missing = dotenv().is_err();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => ProcessDeskConfig::from_file(path)?,
        None => ProcessDeskConfig::load()?,
    };

    let fallback = if cli.verbose {
        "debug".to_string()
    } else {
        config.log_filter.clone()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if dotenv_missing {
        info!("no .env file loaded");
    }

    match cli.command {
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        Commands::Demo { amount, reviewer } => {
            run_demo(&config, &amount, &reviewer).await?;
        }
    }

    Ok(())
}

async fn run_demo(config: &ProcessDeskConfig, amount: &str, reviewer: &str) -> Result<()> {
    let storage = Arc::new(InMemoryStorage::new());
    let bus = EventBus::new(config.notification_buffer);
    let engine = Arc::new(InMemoryExecutionEngine::new());

    let mut events = bus.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            info!(
                notification = %event.notification.name,
                event = ?event.event_type,
                "notification dispatched"
            );
        }
    });

    let process = Process::new("expense", "Expense Report")
        .with_label_template("Expense {{amount}}")
        .with_deployment("expense-1");
    let deployment = ProcessDeployment::new("expense-1", "expense", "expense_review")
        .with_initiation_status("pending-review")
        .with_completion_status("paid")
        .with_notification(
            Notification::new("review-done", LifecycleEventType::TaskCompleted)
                .to("finance@example.com")
                .with_subject("{{process_instance_label}} reviewed"),
        );
    storage.save_process(process.clone()).await?;
    storage.save_deployment(deployment.clone()).await?;

    let manager = StorageManager::with_backend(storage.clone(), Arc::new(bus.clone()))
        .with_concurrency(config.concurrency);
    let store = Arc::new(manager.store().as_ref().clone().with_page_size(config.page_size));
    let reconciler = Arc::new(EngineReconciler::new(engine.clone(), store));
    let manager = manager.with_reconciler(reconciler.clone());

    let initiator = Entity::user("alice").with_display_name("Alice");
    let data = FieldData::from([("amount".to_string(), vec![json!(amount)])]);
    let instance = manager
        .create(&process, &deployment, data.clone(), Vec::new(), None, &initiator)
        .await?;
    info!(instance_id = %instance.process_instance_id, "demo instance created");

    let instance = reconciler
        .start_execution(&process, &deployment, &instance)
        .await?;

    // the engine reports its first user task
    let review = Task::builder("review-1", "review")
        .label("Review expense")
        .candidate(reviewer)
        .build();
    manager.store_task(&instance, Some(review.clone())).await?;
    let instance = manager.store().get(&instance.process_instance_id).await?;

    let principal = Entity::user(reviewer);
    let claimed = OperationResult::new()
        .with_application_status("in-review")
        .with_task(review.assigned_to(Some(reviewer.to_string())));
    let instance = manager
        .store_operation(OperationType::Claim, &claimed, &instance, &principal)
        .await?;

    let approved = OperationResult::new()
        .with_application_status("approved")
        .with_explanation("receipts match")
        .with_task(review.assigned_to(Some(reviewer.to_string())));
    let instance = manager
        .store_operation(OperationType::Complete, &approved, &instance, &principal)
        .await?;

    let instance = manager.archive(&instance, data).await?;

    let state = reconciler.verify(&instance.process_instance_id).await?;
    if state.is_terminal() {
        warn!(instance_id = %instance.process_instance_id, "demo instance desynchronized");
    }
    info!(state = %state, "reconciliation state");

    println!("{}", serde_json::to_string_pretty(&instance)?);
    Ok(())
}
