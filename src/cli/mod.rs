//! CLI subcommands: serve, validate, plan.

use crate::config::{Config, ServeArgs};
use crate::core::parser;
use crate::core::types::{Block, Mode, OperatorKind, Plan};
use crate::server::{self, AppState};
use crate::telemetry;
use anyhow::Context;
use clap::Subcommand;
use tokio_util::sync::CancellationToken;

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the reactor HTTP service
    Serve(ServeArgs),

    /// Parse a molecule and report how many calls it makes
    Validate {
        /// Molecule expression, e.g. '2p[H]*[3[O]]'
        molecule: String,
    },

    /// Show the plan tree of a molecule
    Plan {
        /// Molecule expression
        molecule: String,
    },
}

/// Dispatch a CLI command.
pub fn dispatch(cmd: Commands) -> anyhow::Result<()> {
    match cmd {
        Commands::Serve(args) => cmd_serve(args),
        Commands::Validate { molecule } => cmd_validate(&molecule),
        Commands::Plan { molecule } => cmd_plan(&molecule),
    }
}

fn cmd_serve(args: ServeArgs) -> anyhow::Result<()> {
    let config = Config::from_args(args).context("invalid configuration")?;
    telemetry::init(config.log_format);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("cannot start async runtime")?;
    runtime.block_on(run_server(config))
}

async fn run_server(config: Config) -> anyhow::Result<()> {
    let port = config.port;
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("cannot bind port {}", port))?;
    let state = AppState::new(config).map_err(anyhow::Error::msg)?;

    let shutdown = CancellationToken::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("shutdown requested");
                trigger.cancel();
            }
            Err(e) => tracing::warn!(error = %e, "cannot listen for ctrl-c"),
        }
    });

    server::serve(listener, state, shutdown)
        .await
        .context("server terminated with error")
}

fn cmd_validate(molecule: &str) -> anyhow::Result<()> {
    let plan = parser::parse_plan(molecule).with_context(|| format!("invalid molecule '{}'", molecule))?;
    println!("OK: {} ({} calls)", plan, plan.leaf_count());
    Ok(())
}

fn cmd_plan(molecule: &str) -> anyhow::Result<()> {
    let plan = parser::parse_plan(molecule).with_context(|| format!("invalid molecule '{}'", molecule))?;
    println!("Molecule: {} ({} calls)", plan, plan.leaf_count());
    println!();
    print!("{}", plan_tree(&plan));
    Ok(())
}

/// Indented plan tree, one node per line.
fn plan_tree(plan: &Plan) -> String {
    let mut out = String::new();
    write_node(plan, 0, &mut out);
    out
}

fn write_node(plan: &Plan, depth: usize, out: &mut String) {
    let indent = "  ".repeat(depth);
    match plan {
        Plan::Block(block) => {
            out.push_str(&format!(
                "{}{} {}\n",
                indent,
                block,
                describe_block(block)
            ));
        }
        Plan::Operator(op) => {
            let how = match op.kind {
                OperatorKind::SequentialThen => "then",
                OperatorKind::ParallelBoth => "both",
            };
            out.push_str(&format!(
                "{}{} {} ({} calls)\n",
                indent,
                op.kind.symbol(),
                how,
                op.leaf_count()
            ));
            write_node(&op.left, depth + 1, out);
            write_node(&op.right, depth + 1, out);
        }
    }
}

fn describe_block(block: &Block) -> String {
    let mode = match block.mode {
        Mode::Sequential => "sequential",
        Mode::Parallel => "parallel",
    };
    format!("({} {} x{}, {} calls)", mode, block.leaf(), block.times, block.leaf_count())
}
