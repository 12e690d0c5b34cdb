//! `agentloop chat`: One model call without tools.

use std::io::Write;

use agentloop_config::AppConfig;
use agentloop_core::message::Message;
use agentloop_providers::build_from_config;
use anyhow::Context;

use crate::ChatArgs;

pub async fn run(config: &AppConfig, args: ChatArgs) -> anyhow::Result<()> {
    let gateways = build_from_config(config).context("Failed to set up model gateways")?;
    let gateway = gateways
        .get(&args.profile)
        .with_context(|| format!("No model profile named '{}'", args.profile))?;

    let system = args.system.map(|prompt| vec![Message::system(prompt)]);
    let answer = gateway
        .ask(
            &[Message::user(args.prompt)],
            system.as_deref(),
            args.stream,
            args.temperature,
        )
        .await
        .context("Model call failed")?;

    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{answer}")?;
    Ok(())
}
