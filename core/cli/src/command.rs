//! Subcommand definitions and dispatch for shard administration.
use std::sync::Arc;

use anyhow::Result;
use clap::Subcommand;
use clap::ValueEnum;

use queuecore_context::Context;
use queuecore_queue::execution_store::ExecutionStoreBackend;
use queuecore_queue::model::TaskCategory;
use queuecore_replication::DLQHandler;

/// Standard "user error" exit code (mirrors BSD sysexits `EX_USAGE`).
pub const EX_USAGE: i32 = 64;
/// Standard "service unavailable" exit code (mirrors BSD sysexits `EX_UNAVAILABLE`).
pub const EX_UNAVAILABLE: i32 = 69;
/// Success exit code.
pub const EX_OK: i32 = 0;

/// Task category selector for CLI arguments; mirrors [`TaskCategory`] without replication
/// (replication tasks are addressed by cluster, not by shard-scoped admin ack).
#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum TaskCategoryArg {
    Transfer,
    Timer,
}

/// Shard-scoped admin operations exposed on the `queued` binary.
#[derive(Clone, Debug, Subcommand)]
pub enum AdminCommand {
    /// Print the current size of a peer cluster's replication dead-letter queue.
    DescribeQueue {
        /// Source cluster whose DLQ to inspect.
        cluster: String,
    },

    /// Ask the owning shard process to drop and reload its processing queues.
    ///
    /// This core has no admin RPC surface of its own (an intentional omission, see the
    /// process wiring notes); the command validates the shard is a known identifier and
    /// reports that the actual reload must be triggered on the running process.
    ResetQueue {
        /// Shard identifier to reset.
        shard: String,
    },

    /// Read DLQ descriptors for a cluster, re-fetching their full payload from the source.
    ReadDlqMessages {
        cluster: String,
        #[arg(long, default_value_t = -1)]
        last_id: i64,
        #[arg(long, default_value_t = 100)]
        page_size: u32,
    },

    /// Delete DLQ rows up to and including `last_id`, without re-executing them.
    PurgeDlqMessages {
        cluster: String,
        #[arg(long)]
        last_id: i64,
    },

    /// Re-fetch, force-apply and delete DLQ rows for a cluster.
    MergeDlqMessages {
        cluster: String,
        #[arg(long, default_value_t = -1)]
        last_id: i64,
        #[arg(long, default_value_t = 100)]
        page_size: u32,
    },

    /// Force-ack a stuck task without executing it.
    RemoveTask {
        #[arg(long, value_enum)]
        category: TaskCategoryArg,
        #[arg(long)]
        task_id: i64,
        /// Required for `--category timer`: the task's visibility timestamp.
        #[arg(long)]
        visibility_ms: Option<i64>,
    },
}

/// Dependencies the admin commands run against.
pub struct AdminContext {
    pub store: Arc<dyn ExecutionStoreBackend>,
    /// Handler for the replication DLQ; `None` when no peer admin RPC backend is configured,
    /// in which case DLQ subcommands return [`EX_UNAVAILABLE`].
    pub dlq: Option<Arc<DLQHandler>>,
}

/// Run one admin command, returning the process exit code to use.
pub async fn execute(command: AdminCommand, context: &Context, admin: &AdminContext) -> Result<i32> {
    match command {
        AdminCommand::DescribeQueue { cluster } => describe_queue(context, admin, &cluster).await,
        AdminCommand::ResetQueue { shard } => reset_queue(context, &shard),
        AdminCommand::ReadDlqMessages {
            cluster,
            last_id,
            page_size,
        } => read_dlq_messages(context, admin, &cluster, last_id, page_size).await,
        AdminCommand::PurgeDlqMessages { cluster, last_id } => {
            purge_dlq_messages(context, admin, &cluster, last_id).await
        }
        AdminCommand::MergeDlqMessages {
            cluster,
            last_id,
            page_size,
        } => merge_dlq_messages(context, admin, &cluster, last_id, page_size).await,
        AdminCommand::RemoveTask {
            category,
            task_id,
            visibility_ms,
        } => remove_task(context, admin, category, task_id, visibility_ms).await,
    }
}

async fn describe_queue(context: &Context, admin: &AdminContext, cluster: &str) -> Result<i32> {
    match admin.store.get_replication_dlq_size(context, cluster).await {
        Ok(size) => {
            println!("cluster={cluster} dlq_size={size}");
            Ok(EX_OK)
        }
        Err(error) => {
            eprintln!("failed to read queue state: {error:?}");
            Ok(EX_UNAVAILABLE)
        }
    }
}

fn reset_queue(_context: &Context, shard: &str) -> Result<i32> {
    if shard.trim().is_empty() {
        eprintln!("a shard identifier is required");
        return Ok(EX_USAGE);
    }
    println!(
        "shard={shard}: processing-queue reload must be triggered on the owning process; \
         this core does not expose an admin RPC surface to do so remotely"
    );
    Ok(EX_OK)
}

async fn read_dlq_messages(
    context: &Context,
    admin: &AdminContext,
    cluster: &str,
    last_id: i64,
    page_size: u32,
) -> Result<i32> {
    let Some(dlq) = &admin.dlq else {
        eprintln!("no peer admin RPC backend configured; cannot re-fetch DLQ payloads");
        return Ok(EX_UNAVAILABLE);
    };
    match dlq.read_messages(context, cluster, last_id, page_size, None).await {
        Ok(page) => {
            for task in &page.tasks {
                println!("source_task_id={} created_at_ms={}", task.source_task_id, task.created_at_ms);
            }
            Ok(EX_OK)
        }
        Err(error) if error.downcast_ref::<queuecore_replication::error::InvalidCluster>().is_some() => {
            eprintln!("{error}");
            Ok(EX_USAGE)
        }
        Err(error) => {
            eprintln!("failed to read DLQ messages: {error:?}");
            Ok(EX_UNAVAILABLE)
        }
    }
}

async fn purge_dlq_messages(context: &Context, admin: &AdminContext, cluster: &str, last_id: i64) -> Result<i32> {
    let Some(dlq) = &admin.dlq else {
        eprintln!("no peer admin RPC backend configured; cannot purge the DLQ");
        return Ok(EX_UNAVAILABLE);
    };
    match dlq.purge_messages(context, cluster, last_id).await {
        Ok(()) => {
            println!("cluster={cluster}: purged DLQ rows up to {last_id}");
            Ok(EX_OK)
        }
        Err(error) if error.downcast_ref::<queuecore_replication::error::InvalidCluster>().is_some() => {
            eprintln!("{error}");
            Ok(EX_USAGE)
        }
        Err(error) => {
            eprintln!("failed to purge DLQ messages: {error:?}");
            Ok(EX_UNAVAILABLE)
        }
    }
}

async fn merge_dlq_messages(
    context: &Context,
    admin: &AdminContext,
    cluster: &str,
    last_id: i64,
    page_size: u32,
) -> Result<i32> {
    let Some(dlq) = &admin.dlq else {
        eprintln!("no peer admin RPC backend configured; cannot merge the DLQ");
        return Ok(EX_UNAVAILABLE);
    };
    match dlq.merge_messages(context, cluster, last_id, page_size, None).await {
        Ok(_next_page_token) => {
            println!("cluster={cluster}: merged DLQ rows up to {last_id}");
            Ok(EX_OK)
        }
        Err(error) if error.downcast_ref::<queuecore_replication::error::InvalidCluster>().is_some() => {
            eprintln!("{error}");
            Ok(EX_USAGE)
        }
        Err(error) => {
            eprintln!("failed to merge DLQ messages: {error:?}");
            Ok(EX_UNAVAILABLE)
        }
    }
}

async fn remove_task(
    context: &Context,
    admin: &AdminContext,
    category: TaskCategoryArg,
    task_id: i64,
    visibility_ms: Option<i64>,
) -> Result<i32> {
    let result = match category {
        TaskCategoryArg::Transfer => admin.store.complete_transfer_task(context, task_id).await,
        TaskCategoryArg::Timer => {
            let Some(visibility_ms) = visibility_ms else {
                eprintln!("--visibility-ms is required for --category timer");
                return Ok(EX_USAGE);
            };
            admin.store.complete_timer_task(context, visibility_ms, task_id).await
        }
    };
    match result {
        Ok(()) => {
            let category = match category {
                TaskCategoryArg::Transfer => TaskCategory::Transfer,
                TaskCategoryArg::Timer => TaskCategory::Timer,
            };
            println!("task_id={task_id} category={category:?}: acked");
            Ok(EX_OK)
        }
        Err(error) => {
            eprintln!("failed to remove task: {error:?}");
            Ok(EX_UNAVAILABLE)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use anyhow::Result;

    use queuecore_context::Context;
    use queuecore_queue::execution_store::ExecutionStoreFixture;
    use queuecore_queue::model::Task;
    use queuecore_queue::model::TaskCategory;
    use queuecore_queue::model::WorkflowRef;
    use queuecore_replication::peer::PeerAdminClientFixture;
    use queuecore_replication::ReplicationTaskApplier;

    use super::AdminCommand;
    use super::AdminContext;
    use super::TaskCategoryArg;
    use super::EX_OK;
    use super::EX_UNAVAILABLE;
    use super::EX_USAGE;

    struct NoopApplier;

    #[async_trait::async_trait]
    impl ReplicationTaskApplier for NoopApplier {
        async fn apply(&self, _: &Context, _: &queuecore_replication::model::ReplicationTask, _: bool) -> Result<()> {
            Ok(())
        }
    }

    fn task(id: i64) -> Task {
        Task {
            task_id: id,
            category: TaskCategory::Transfer,
            visibility_timestamp_ms: 0,
            workflow: WorkflowRef {
                domain_id: "d".into(),
                workflow_id: "w".into(),
                run_id: "r".into(),
            },
            payload: serde_json::Value::Null,
        }
    }

    #[tokio::test]
    async fn describe_queue_without_dlq_backend_reports_unavailable_is_not_required() {
        let context = Context::fixture();
        let store = Arc::new(ExecutionStoreFixture::new());
        store
            .put_replication_task_to_dlq(&context, "peer-a", task(1))
            .await
            .unwrap();
        let admin = AdminContext { store, dlq: None };

        let code = super::execute(
            AdminCommand::DescribeQueue {
                cluster: "peer-a".into(),
            },
            &context,
            &admin,
        )
        .await
        .unwrap();
        assert_eq!(code, EX_OK);
    }

    #[tokio::test]
    async fn dlq_commands_report_unavailable_without_a_peer_backend() {
        let context = Context::fixture();
        let admin = AdminContext {
            store: Arc::new(ExecutionStoreFixture::new()),
            dlq: None,
        };

        let code = super::execute(
            AdminCommand::ReadDlqMessages {
                cluster: "peer-a".into(),
                last_id: -1,
                page_size: 10,
            },
            &context,
            &admin,
        )
        .await
        .unwrap();
        assert_eq!(code, EX_UNAVAILABLE);
    }

    #[tokio::test]
    async fn purge_dlq_messages_rejects_unknown_cluster() {
        let context = Context::fixture();
        let store = Arc::new(ExecutionStoreFixture::new());
        let peer = Arc::new(PeerAdminClientFixture::new(Vec::new(), 10));
        let dlq = Arc::new(queuecore_replication::DLQHandler::new(
            0,
            vec!["known".into()],
            store.clone(),
            peer,
            Arc::new(NoopApplier),
        ));
        let admin = AdminContext {
            store,
            dlq: Some(dlq),
        };

        let code = super::execute(
            AdminCommand::PurgeDlqMessages {
                cluster: "unknown".into(),
                last_id: 0,
            },
            &context,
            &admin,
        )
        .await
        .unwrap();
        assert_eq!(code, EX_USAGE);
    }

    #[tokio::test]
    async fn remove_task_acks_a_stuck_transfer_task() {
        let context = Context::fixture();
        let store = Arc::new(ExecutionStoreFixture::new());
        store.seed_transfer(vec![task(1), task(2)]).await;
        let admin = AdminContext { store, dlq: None };

        let code = super::execute(
            AdminCommand::RemoveTask {
                category: TaskCategoryArg::Transfer,
                task_id: 1,
                visibility_ms: None,
            },
            &context,
            &admin,
        )
        .await
        .unwrap();
        assert_eq!(code, EX_OK);

        let remaining = admin_store_size(&context, &admin).await;
        assert_eq!(remaining, 1);
    }

    async fn admin_store_size(context: &Context, admin: &AdminContext) -> usize {
        admin
            .store
            .get_transfer_tasks(context, -1, i64::MAX, 10, None)
            .await
            .unwrap()
            .tasks
            .len()
    }
}
