//! `agentloop run`: Drive the tool-calling agent on one task.

use std::sync::Arc;

use agentloop_agent::{Agent, ToolCallAgent};
use agentloop_config::AppConfig;
use agentloop_core::agent::RunOutcome;
use agentloop_core::event::{DomainEvent, EventBus};
use agentloop_providers::build_from_config;
use anyhow::Context;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::warn;

use crate::RunArgs;

pub async fn run(config: &AppConfig, args: RunArgs) -> anyhow::Result<()> {
    let mut agent_config = config.agent.clone();
    if let Some(max_steps) = args.max_steps {
        agent_config.max_steps = max_steps;
    }

    let gateways = build_from_config(config).context("Failed to set up model gateways")?;
    let gateway = gateways
        .get(&args.profile)
        .with_context(|| format!("No model profile named '{}'", args.profile))?;
    if gateway.settings().api_key.is_empty() {
        warn!(profile = %gateway.profile(), "No API key configured; set AGENTLOOP_API_KEY or OPENAI_API_KEY");
    }

    let bus = Arc::new(EventBus::default());
    let progress = (!args.quiet).then(|| spawn_progress(bus.subscribe()));

    let tools = agentloop_tools::default_registry(&agent_config);
    let mut agent = ToolCallAgent::new("agentloop", gateway, tools, &agent_config)
        .with_tool_choice(args.tool_choice)
        .with_event_bus(Arc::clone(&bus));

    let result = agent.run(Some(args.prompt)).await;
    let outcome = agent.core().last_outcome().cloned();

    // Closing the bus ends the progress printer
    drop(agent);
    drop(bus);
    if let Some(progress) = progress {
        join_progress(progress).await;
    }

    let transcript = result.context("Agent run failed")?;
    println!("{transcript}");
    match outcome {
        Some(RunOutcome::Finished) => eprintln!("\n  ✓ finished"),
        Some(RunOutcome::BudgetExhausted) => eprintln!("\n  ⚠ step budget exhausted"),
        Some(RunOutcome::Failed(reason)) => eprintln!("\n  ✗ failed: {reason}"),
        None => {}
    }
    Ok(())
}

/// Wait for the progress printer; a crash is logged, never fatal to the run.
async fn join_progress(progress: JoinHandle<()>) -> bool {
    match progress.await {
        Ok(()) => true,
        Err(e) => {
            warn!(error = %e, "Progress printer stopped abnormally");
            false
        }
    }
}

fn spawn_progress(mut rx: broadcast::Receiver<Arc<DomainEvent>>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let event = match rx.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(skipped)) => {
                    eprintln!("  … {skipped} events skipped");
                    continue;
                }
                Err(RecvError::Closed) => break,
            };
            match &*event {
                DomainEvent::StepCompleted { step, summary_preview, .. } => {
                    let first_line = summary_preview.lines().next().unwrap_or_default();
                    eprintln!("  [step {step}] {first_line}");
                }
                DomainEvent::ToolExecuted { tool_name, success, duration_ms, .. } => {
                    let mark = if *success { "ok" } else { "error" };
                    eprintln!("    ↳ {tool_name} ({mark}, {duration_ms}ms)");
                }
                DomainEvent::StuckDetected { step, .. } => {
                    eprintln!("  [step {step}] repeating itself, nudging a new strategy");
                }
                DomainEvent::RunStarted { .. } | DomainEvent::RunFinished { .. } => {}
            }
        }
    })
}
