use super::{Cli, Command};
use anyhow::{Context, Result, anyhow};
use kvshard::{Arg, ClusterOptions, KeyRouter, MemoryConnector, ShardedClient, Topology};
use std::fs;
use std::path::Path;
use tracing::info;

pub async fn run(cli: Cli) -> Result<()> {
    let options = match &cli.options {
        Some(url) => ClusterOptions::from_url(url).map_err(|e| anyhow!(e))?,
        None => ClusterOptions::new(),
    };

    match cli.command {
        Command::Validate { topology } => validate(&topology),
        Command::Route { topology, keys } => route(&topology, &keys, &options),
        Command::Sandbox {
            topology,
            commands,
            script,
        } => sandbox(&topology, commands, script.as_deref(), options).await,
    }
}

fn load(path: &Path) -> Result<Topology> {
    let topology = Topology::load(path)
        .with_context(|| format!("Failed to load topology '{}'", path.display()))?;
    topology
        .validate()
        .with_context(|| format!("Invalid topology '{}'", path.display()))?;
    Ok(topology)
}

fn validate(path: &Path) -> Result<()> {
    let topology = load(path)?;
    println!(
        "{}: {} nodes, {} shards, default node {}",
        path.display(),
        topology.nodes.len(),
        topology.shard_count(),
        topology.default_node
    );
    for (shard, master) in topology.masters().iter().enumerate() {
        let address = topology
            .address(master)
            .map(ToString::to_string)
            .unwrap_or_default();
        let replicas = topology.replicas_of(master);
        if replicas.is_empty() {
            println!("  shard {:>3}  {} ({})", shard, master, address);
        } else {
            println!(
                "  shard {:>3}  {} ({}) replicas: {}",
                shard,
                master,
                address,
                replicas.join(", ")
            );
        }
    }
    Ok(())
}

fn route(path: &Path, keys: &[String], options: &ClusterOptions) -> Result<()> {
    let topology = load(path)?;
    let router = KeyRouter::new(&topology, options);
    for key in keys {
        let read = router.route(key, kvshard::Access::Read, |_| true);
        println!(
            "{}  shard={} master={} read={} stored={}",
            key,
            read.shard,
            read.master,
            read.node,
            router.stored_key(key)
        );
    }
    Ok(())
}

async fn sandbox(
    path: &Path,
    mut commands: Vec<String>,
    script: Option<&Path>,
    options: ClusterOptions,
) -> Result<()> {
    let topology = load(path)?;
    if let Some(script) = script {
        let text = fs::read_to_string(script)
            .with_context(|| format!("Failed to read script '{}'", script.display()))?;
        commands.extend(
            text.lines()
                .map(str::trim)
                .filter(|line| !line.is_empty() && !line.starts_with('#'))
                .map(str::to_string),
        );
    }
    if commands.is_empty() {
        return Err(anyhow!("No commands given"));
    }

    let connector = MemoryConnector::for_topology(&topology);
    let client = ShardedClient::connect(topology, &connector, options).await?;
    info!(shards = client.shard_count(), "sandbox cluster started");

    for line in &commands {
        let (name, args) = parse_command(line)?;
        match client.execute(name, &args).await {
            Ok(reply) => println!("{}> {}", line, reply),
            Err(err) => println!("{}> (error) {}", line, err),
        }
    }
    Ok(())
}

fn parse_command(line: &str) -> Result<(&str, Vec<Arg>)> {
    let mut words = line.split_whitespace();
    let name = words
        .next()
        .ok_or_else(|| anyhow!("Empty command line"))?;
    Ok((name, words.map(Arg::from).collect()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_command_splits_words() {
        let (name, args) = parse_command("  SET user:{1} ada ").unwrap();
        assert_eq!(name, "SET");
        assert_eq!(args, vec![Arg::from("user:{1}"), Arg::from("ada")]);
        assert!(parse_command("   ").is_err());
    }
}
