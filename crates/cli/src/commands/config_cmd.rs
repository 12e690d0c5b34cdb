//! `agentloop config`: Print configuration.

use agentloop_config::AppConfig;

pub fn show(config: &AppConfig, default: bool) -> anyhow::Result<()> {
    if default {
        println!("{}", AppConfig::default_toml());
        return Ok(());
    }
    println!("{}", toml::to_string_pretty(&config.redacted())?);
    println!("# profiles: {}", config.llm.keys().cloned().collect::<Vec<_>>().join(", "));
    Ok(())
}
