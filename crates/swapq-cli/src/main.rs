use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Context;
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use serde::Deserialize;
use tokio::time::{Duration, sleep, timeout};
use tracing_subscriber::EnvFilter;

use swapq_core::app::{ToggleOutcome, WalletSession};
use swapq_core::config::{QueueConfig, StorageBackend};
use swapq_core::domain::{
    ConnectError, StepOutcome, Task, TaskId, TaskSpec, TaskStatus, WalletPrecondition,
};
use swapq_core::migration::InitContext;
use swapq_core::ports::{StepExecutor, WalletCollaborator, WalletState};
use swapq_core::{QueueManager, QueueManagerBuilder};

const DEMO_TASK_TYPE: &str = "demo-swap";

#[derive(Parser, Debug)]
#[command(name = "swapq", about = "Persistent swap task queue")]
struct Args {
    /// TOML config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Use the file backend rooted at this directory
    #[arg(long, global = true)]
    storage_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the legacy migration and print what it did
    Migrate,
    /// Print every task as JSON
    List,
    /// Enqueue a two-step swap that needs a network change, then connect
    Demo {
        #[arg(long, default_value = "metamask")]
        wallet: String,
        #[arg(long, default_value = "POLYGON")]
        chain: String,
    },
}

#[derive(Debug, Deserialize)]
struct DemoPayload {
    from: String,
    to: String,
    amount: String,
}

/// The swap step is blocked on the target network until the wallet is there.
struct DemoSwapExecutor {
    chain: String,
    remaining_blocks: AtomicU32,
}

impl DemoSwapExecutor {
    fn new(chain: &str, blocks: u32) -> Self {
        Self {
            chain: chain.to_string(),
            remaining_blocks: AtomicU32::new(blocks),
        }
    }
}

#[async_trait]
impl StepExecutor for DemoSwapExecutor {
    async fn execute(&self, task: &Task, step_index: usize) -> StepOutcome {
        let payload: DemoPayload = match serde_json::from_value(task.payload.clone()) {
            Ok(p) => p,
            Err(e) => return StepOutcome::error(format!("json decode: {e}")),
        };

        match task.steps.get(step_index).map(|s| s.name.as_str()) {
            Some("approve") => StepOutcome::done_with(serde_json::json!({ "approved": payload.amount })),
            Some("swap") => {
                let left = self.remaining_blocks.load(Ordering::Relaxed);
                if left > 0 {
                    self.remaining_blocks.fetch_sub(1, Ordering::Relaxed);
                    return StepOutcome::blocked(WalletPrecondition::change_network(
                        self.chain.clone(),
                    ));
                }
                println!("swapped {} {} -> {}", payload.amount, payload.from, payload.to);
                StepOutcome::done_with(serde_json::json!({ "tx": "0xdemo" }))
            }
            other => StepOutcome::error(format!("unknown step {other:?}")),
        }
    }
}

/// Always-installed wallets that connect instantly.
#[derive(Default)]
struct DemoWallets {
    connected: Mutex<HashSet<String>>,
}

#[async_trait]
impl WalletCollaborator for DemoWallets {
    fn current_state(&self, wallet_type: &str) -> WalletState {
        let connected = self
            .connected
            .lock()
            .map(|c| c.contains(wallet_type))
            .unwrap_or(false);
        WalletState {
            connected,
            installed: true,
            connecting: false,
        }
    }

    async fn connect(&self, wallet_type: &str, chain: Option<&str>) -> Result<(), ConnectError> {
        tracing::info!(wallet_type, chain, "demo wallet connected");
        self.connected
            .lock()
            .map_err(|e| ConnectError::Failed {
                wallet_type: wallet_type.to_string(),
                reason: e.to_string(),
            })?
            .insert(wallet_type.to_string());
        Ok(())
    }

    async fn disconnect(&self, wallet_type: &str) {
        if let Ok(mut connected) = self.connected.lock() {
            connected.remove(wallet_type);
        }
    }
}

fn load_config(args: &Args) -> anyhow::Result<QueueConfig> {
    let mut config = match &args.config {
        Some(path) => QueueConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => QueueConfig::from_env(),
    };
    if let Some(dir) = &args.storage_dir {
        config.storage.backend = StorageBackend::File;
        config.storage.dir = Some(dir.clone());
    }
    Ok(config)
}

fn init_tracing(config: &QueueConfig) -> anyhow::Result<()> {
    let filter = match std::env::var("RUST_LOG") {
        Ok(v) if !v.trim().is_empty() => EnvFilter::from_default_env(),
        _ => EnvFilter::try_new(&config.logging.filter)
            .with_context(|| format!("invalid log filter {:?}", config.logging.filter))?,
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}

async fn wait_for(manager: &QueueManager, id: &TaskId, status: TaskStatus) -> anyhow::Result<Task> {
    timeout(Duration::from_secs(5), async {
        loop {
            if let Some(task) = manager.get(id).await
                && task.status == status
            {
                return task;
            }
            sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .with_context(|| format!("task {id} did not reach {status}"))
}

async fn migrate(config: &QueueConfig, ctx: Arc<InitContext>) -> anyhow::Result<()> {
    let setup = QueueManagerBuilder::from_config(config, ctx)?
        .migration(true)
        .resume_on_init(false)
        .build()?;
    let manager = QueueManager::init(setup).await?;

    match manager.migration_report() {
        Some(report) => {
            let out = serde_json::json!({
                "already_done": report.was_already_done,
                "migrated": report.migrated,
                "already_present": report.already_present,
                "errors": report.errors.iter().map(|e| e.to_string()).collect::<Vec<_>>(),
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        None => anyhow::bail!("migration did not finish, see the log"),
    }
    Ok(())
}

async fn list(config: &QueueConfig, ctx: Arc<InitContext>) -> anyhow::Result<()> {
    let setup = QueueManagerBuilder::from_config(config, ctx)?
        .resume_on_init(false)
        .build()?;
    let manager = QueueManager::init(setup).await?;

    let tasks = manager.list().await;
    println!("{}", serde_json::to_string_pretty(&tasks)?);
    eprintln!("{:?}", manager.counts().await);
    Ok(())
}

async fn demo(
    config: &QueueConfig,
    ctx: Arc<InitContext>,
    wallet: &str,
    chain: &str,
) -> anyhow::Result<()> {
    let wallets = Arc::new(DemoWallets::default());
    let setup = QueueManagerBuilder::from_config(config, ctx)?
        .register_executor(DEMO_TASK_TYPE, DemoSwapExecutor::new(chain, 1))?
        .expect_task_types(&[DEMO_TASK_TYPE])
        .wallets(wallets.clone())
        .build()?;
    let manager = Arc::new(QueueManager::init(setup).await?);
    let session = WalletSession::new(
        manager.clone(),
        wallets,
        &[wallet],
        config.wallets.multi_wallets,
    );

    let spec = TaskSpec::new(DEMO_TASK_TYPE, &["approve", "swap"]).with_payload(
        serde_json::json!({ "from": "ETH.USDC", "to": format!("{chain}.USDC"), "amount": "25" }),
    );
    let id = manager.enqueue(spec).await?;
    let parked = wait_for(&manager, &id, TaskStatus::WaitingForNetworkChange).await?;
    println!(
        "task {id} is {} (needs {})",
        parked.status,
        parked.required_chain.as_deref().unwrap_or("-")
    );

    match session.toggle(wallet, chain).await? {
        ToggleOutcome::Connected { resumed } => println!("resumed {} task(s)", resumed.len()),
        other => println!("wallet toggle: {other:?}"),
    }

    let done = wait_for(&manager, &id, TaskStatus::Completed).await?;
    println!("{}", serde_json::to_string_pretty(&done)?);
    manager.shutdown();
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;
    init_tracing(&config)?;
    let ctx = InitContext::new();

    match &args.command {
        Commands::Migrate => migrate(&config, ctx).await,
        Commands::List => list(&config, ctx).await,
        Commands::Demo { wallet, chain } => demo(&config, ctx, wallet, chain).await,
    }
}
