//! `agentloop tools`: Show the built-in tool catalog.

use agentloop_config::AppConfig;

pub fn run(config: &AppConfig, json: bool) -> anyhow::Result<()> {
    let registry = agentloop_tools::default_registry(&config.agent);

    if json {
        println!("{}", serde_json::to_string_pretty(&registry.schema())?);
        return Ok(());
    }

    println!();
    println!("  Tools ({}):", registry.len());
    for definition in registry.schema() {
        let summary = definition.description.split(". ").next().unwrap_or_default();
        println!("    {:<16} {summary}", definition.name);
    }
    println!();
    Ok(())
}
