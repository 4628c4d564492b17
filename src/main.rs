use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{error, info};
use uuid::Uuid;

use lot_allocation as engine;
use engine::events::{process_events, EventSender};
use engine::repositories::lot_candidate_repository::AllocationPolicyKind;
use engine::services::allocation::{AllocationService, CommitOptions};
use engine::services::erp_gateway::build_gateway;

#[derive(Debug, Parser)]
#[command(name = "lot-allocation", version, about = "Lot allocation and reservation engine")]
struct Cli {
    /// Overrides the configured allocation policy (fefo or fifo)
    #[arg(long, global = true)]
    policy: Option<AllocationPolicyKind>,

    /// Actor recorded in reservation history
    #[arg(long, global = true, default_value = "cli")]
    actor: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Apply the embedded schema migrations
    Migrate,
    /// Show the lots a demand order would draw from, without reserving
    Preview { order_id: Uuid },
    /// Reserve lots for a demand order
    Commit {
        order_id: Uuid,
        /// Register every created reservation with the ERP afterwards
        #[arg(long)]
        confirm: bool,
    },
    /// Register a reservation with the ERP and mark it confirmed
    Confirm { reservation_id: Uuid },
    /// Release one or more reservations
    Release {
        #[arg(required = true)]
        reservation_ids: Vec<Uuid>,
        #[arg(long)]
        reason: Option<String>,
    },
    /// Release every open reservation of a demand source
    ReleaseSource {
        source_id: Uuid,
        #[arg(long)]
        reason: Option<String>,
    },
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut cfg = engine::config::load_config()?;
    engine::config::init_tracing(cfg.log_level(), cfg.log_json);
    engine::metrics::register_metrics();
    if let Some(policy) = cli.policy {
        cfg.allocation.default_policy = policy;
    }

    let db = engine::db::establish_connection_from_app_config(&cfg).await?;
    engine::db::check_connection(&db).await?;
    if cfg.auto_migrate || matches!(cli.command, Command::Migrate) {
        engine::db::run_migrations(&db).await.map_err(|e| {
            error!("Failed running migrations: {}", e);
            e
        })?;
    }
    if matches!(cli.command, Command::Migrate) {
        info!("Migrations applied");
        return Ok(());
    }

    let (event_tx, event_rx) = mpsc::channel(cfg.event_channel_capacity);
    let event_worker = tokio::spawn(process_events(event_rx));

    let gateway = build_gateway(&cfg.allocation.gateway)?;
    let service = AllocationService::new(
        Arc::new(db),
        cfg.allocation.clone(),
        gateway,
        Arc::new(EventSender::new(event_tx)),
    );
    let actor = cli.actor.as_str();

    let outcome = match cli.command {
        Command::Migrate => Ok(()),
        Command::Preview { order_id } => match service.preview(order_id).await {
            Ok(plan) => print_json(&plan),
            Err(e) => Err(e.into()),
        },
        Command::Commit { order_id, confirm } => {
            let options = CommitOptions {
                confirm,
                actor: Some(cli.actor.clone()),
            };
            match service.commit(order_id, options).await {
                Ok(result) => print_json(&result),
                Err(e) => Err(e.into()),
            }
        }
        Command::Confirm { reservation_id } => match service.confirm(reservation_id, actor).await {
            Ok(reservation) => print_json(&reservation),
            Err(e) => Err(e.into()),
        },
        Command::Release {
            reservation_ids,
            reason,
        } => {
            let result = service
                .bulk_release(&reservation_ids, actor, reason.as_deref())
                .await;
            print_json(&result)
        }
        Command::ReleaseSource { source_id, reason } => {
            match service
                .release_for_source(source_id, actor, reason.as_deref())
                .await
            {
                Ok(released) => print_json(&released),
                Err(e) => Err(e.into()),
            }
        }
    };

    // Closing the last sender lets the event worker drain and exit.
    drop(service);
    let _ = event_worker.await;

    if let Err(e) = &outcome {
        error!(error = %e, "Command failed");
    }
    outcome
}
