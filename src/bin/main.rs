use anyhow::{Result, bail};
use clap::{Parser, Subcommand};
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use apc_sequencer::benchmark::{BENCHMARK_LOG, benchmark_grasps};
use apc_sequencer::control::{OperatorCommand, parse_operator_line, spawn_command_listener};
use apc_sequencer::services::sim::SimulatedCell;
use apc_sequencer::shelf::load_order_file;
use apc_sequencer::{
    Collaborators, ExecutionGate, FailurePolicy, PickConfig, PickOrchestrator, ProductName, Shelf,
    StatusPublisher, WorkOrderQueue, run_queue,
};

#[derive(Parser)]
#[command(name = "apc-sequencer")]
#[command(about = "Pick-and-place task sequencer")]
struct Cli {
    /// Configuration file (otherwise $XDG_CONFIG_HOME/apc/config.json or ./apc_config.json)
    #[arg(long, global = true, env = "APC_CONFIG")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Pick the work orders of an order file
    Run {
        /// Order file with bin contents and work orders
        #[arg(long)]
        orders: PathBuf,
        /// Index of the first order to run
        #[arg(long, default_value_t = 0)]
        order_start: usize,
        /// Maximum number of orders to run
        #[arg(long)]
        num_orders: Option<usize>,
        /// Step to start the first order at
        #[arg(long, default_value_t = 0)]
        jump_to: usize,
        /// Skip routine checkpoints, stop at breakpoints
        #[arg(long)]
        auto: bool,
        /// Skip every checkpoint
        #[arg(long)]
        full_auto: bool,
        /// Keep going after a failed order
        #[arg(long)]
        continue_on_failure: bool,
        /// Print status events as JSON lines on stdout
        #[arg(long)]
        print_events: bool,
    },
    /// Measure grasp generation success for each product in every bin
    BenchmarkGrasps {
        /// Comma-separated product names
        #[arg(long, value_delimiter = ',', required = true)]
        products: Vec<String>,
    },
    /// Move to the configured start pose
    GoHome,
    /// Alternate closing and opening the end effectors
    TestEndEffectors {
        #[arg(long, default_value_t = 10)]
        cycles: usize,
    },
    /// Print the shelf contents loaded from an order file
    ShowShelf {
        #[arg(long)]
        orders: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("apc_sequencer=info".parse()?))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => PickConfig::load_from(path)?,
        None => PickConfig::load()?,
    };

    match cli.command {
        Commands::Run {
            orders,
            order_start,
            num_orders,
            jump_to,
            auto,
            full_auto,
            continue_on_failure,
            print_events,
        } => {
            let (shelf, orders) = load_order_file(&orders, &config.shelf)?;
            let queue = WorkOrderQueue::window(orders, order_start, num_orders);
            let policy = if continue_on_failure {
                FailurePolicy::Continue
            } else {
                config.failure_policy
            };

            let gate = Arc::new(ExecutionGate::new(config.poll_interval()));
            if full_auto {
                gate.set_full_autonomous(true);
            } else if auto {
                gate.set_autonomous(true);
            }
            spawn_operator_input(gate.clone());
            spawn_shutdown_on_ctrl_c(gate.clone());

            let (mut orchestrator, _cell) = simulated_orchestrator(shelf, config, gate);
            if print_events {
                spawn_event_printer(orchestrator.status());
            }

            let summary = run_queue(&mut orchestrator, queue, jump_to, policy).await;
            println!("{}", serde_json::to_string_pretty(&summary)?);

            if summary.failed > 0 {
                bail!("{} order(s) failed", summary.failed);
            }
        }
        Commands::BenchmarkGrasps { products } => {
            let products: Vec<ProductName> = products.into_iter().map(ProductName::from).collect();
            let cell = Arc::new(SimulatedCell::new());
            let services = Collaborators::from_cell(cell.clone());

            let report = tokio::select! {
                report = benchmark_grasps(
                    &config.shelf,
                    &products,
                    config.dual_arm,
                    &services,
                    |product, _| cell.object_pose(product),
                ) => report?,
                _ = tokio::signal::ctrl_c() => bail!("Benchmark interrupted"),
            };

            info!("Overall success rate: {:.1}%", report.overall_rate());
            for score in &report.products {
                println!("{:<40} {:>6.1}%", score.product, score.rate());
            }
            report.append_to(&config.log_dir().join(BENCHMARK_LOG))?;
        }
        Commands::GoHome => {
            let shelf = Shelf::from_layout(&config.shelf)?;
            let gate = Arc::new(ExecutionGate::new(config.poll_interval()));
            let (orchestrator, _cell) = simulated_orchestrator(shelf, config, gate);
            orchestrator.move_to_start().await?;
            info!("At start pose");
        }
        Commands::TestEndEffectors { cycles } => {
            let shelf = Shelf::from_layout(&config.shelf)?;
            let gate = Arc::new(ExecutionGate::new(config.poll_interval()));
            spawn_shutdown_on_ctrl_c(gate.clone());
            let (orchestrator, _cell) = simulated_orchestrator(shelf, config, gate);
            let done = orchestrator.test_end_effectors(cycles).await?;
            info!("Completed {} of {} end effector cycles", done, cycles);
        }
        Commands::ShowShelf { orders } => {
            let (shelf, orders) = load_order_file(&orders, &config.shelf)?;
            println!("{}", serde_json::to_string_pretty(&shelf.snapshot())?);
            println!("Work orders:");
            for (i, order) in orders.iter().enumerate() {
                println!("  {:>3}: {}", i, order);
            }
        }
    }

    Ok(())
}

fn simulated_orchestrator(
    shelf: Shelf,
    config: PickConfig,
    gate: Arc<ExecutionGate>,
) -> (PickOrchestrator, Arc<SimulatedCell>) {
    warn!("Using the simulated cell; no hardware will move");
    let cell = Arc::new(SimulatedCell::new());
    let orchestrator = PickOrchestrator::new(
        shelf,
        config,
        gate,
        Collaborators::from_cell(cell.clone()),
        StatusPublisher::new(),
    );
    (orchestrator, cell)
}

/// Read operator commands from stdin on a dedicated thread.
fn spawn_operator_input(gate: Arc<ExecutionGate>) {
    let (tx, rx) = mpsc::channel::<OperatorCommand>(16);
    spawn_command_listener(gate, rx);

    info!("Operator input: <enter>/n next, a auto, m manual, f full auto, s stop");
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            match parse_operator_line(&line) {
                Some(command) => {
                    if tx.blocking_send(command).is_err() {
                        break;
                    }
                }
                None => warn!("Unrecognised operator input: {}", line.trim()),
            }
        }
    });
}

fn spawn_shutdown_on_ctrl_c(gate: Arc<ExecutionGate>) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, shutting down");
            gate.shutdown();
        }
    });
}

fn spawn_event_printer(status: &StatusPublisher) {
    let mut events = status.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(line) => println!("{}", line),
                    Err(e) => warn!("Unable to encode status event: {}", e),
                },
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Dropped {} status events", n);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}
