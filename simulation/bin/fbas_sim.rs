// Author: FBAS Simulation Team
//! Command line driver for federated voting scenarios
//!
//! Plays a built-in or exported scenario to completion and prints per-step events,
//! final node phases and the network analysis of the resulting roster.

use anyhow::{bail, Context as _, Result};
use clap::{Arg, ArgAction, ArgMatches, Command};
use fbas_simulation::{
    AnalysisCache, FederatedVotingContext, NetworkAnalysis, Scenario, ScenarioFactory, ScenarioLoader, Simulation,
    SimulationConfig,
};
use std::fs;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn scenario_arg() -> Arg {
    Arg::new("scenario")
        .short('s')
        .long("scenario")
        .value_name("SCENARIO")
        .help("Built-in scenario (basic-consensus, stuck, network-split) or a scenario JSON file")
        .default_value("basic-consensus")
}

fn config_arg() -> Arg {
    Arg::new("config")
        .short('c')
        .long("config")
        .value_name("FILE")
        .help("TOML simulation configuration")
}

fn load_config(matches: &ArgMatches) -> Result<SimulationConfig> {
    let mut config = match matches.get_one::<String>("config") {
        Some(path) => {
            let source = fs::read_to_string(path).with_context(|| format!("reading {}", path))?;
            SimulationConfig::from_toml_str(&source)?
        }
        None => SimulationConfig::default(),
    };
    if let Some(max_steps) = matches.try_get_one::<usize>("max-steps").ok().flatten() {
        config = config.with_max_steps(*max_steps);
    }
    config.validate()?;
    Ok(config)
}

fn load_simulation(matches: &ArgMatches, config: &SimulationConfig) -> Result<Simulation<FederatedVotingContext>> {
    let Some(name) = matches.get_one::<String>("scenario") else {
        bail!("no scenario given");
    };
    ScenarioLoader::load_by_name(name, config).with_context(|| format!("loading scenario {}", name))
}

fn print_analysis(analysis: &NetworkAnalysis) {
    let render = |sets: &[std::collections::BTreeSet<String>]| {
        sets.iter()
            .map(|set| format!("{{{}}}", set.iter().cloned().collect::<Vec<_>>().join(", ")))
            .collect::<Vec<_>>()
            .join(" ")
    };

    println!("Network analysis");
    println!("  nodes:               {}", analysis.nodes.join(", "));
    println!("  quorums:             {}", analysis.quorums.len());
    println!("  minimal quorums:     {}", render(&analysis.minimal_quorums));
    println!(
        "  top tier:            {}",
        analysis.top_tier_nodes.iter().cloned().collect::<Vec<_>>().join(", ")
    );
    println!("  d-sets:              {}", render(&analysis.d_sets));
    println!("  quorum intersection: {}", analysis.has_quorum_intersection());
}

fn run(matches: &ArgMatches) -> Result<()> {
    let config = load_config(matches)?;
    let mut simulation = load_simulation(matches, &config)?;
    let mut cache = AnalysisCache::with_limit(config.max_analyzed_nodes);

    let mut step = 0;
    let mut analysis_skipped = false;
    while step < config.max_steps && simulation.has_next_step() {
        simulation.execute_step();
        step += 1;
        println!("Step {}", step);
        for event in simulation.latest_events() {
            println!("  {}", event);
        }
        if let Err(err) = cache.refresh(&simulation.context().nodes()) {
            if !analysis_skipped {
                warn!("Skipping network analysis: {}", err);
                analysis_skipped = true;
            }
        }
    }

    println!();
    println!("Nodes");
    for node in simulation.context().federated_nodes() {
        println!(
            "  {:<4} {:<10} voted={:<8} accepted={:<8} confirmed={}",
            node.public_key,
            node.phase.to_string(),
            node.voted.unwrap_or_default(),
            node.accepted.unwrap_or_default(),
            node.confirmed.unwrap_or_default()
        );
    }
    println!("Outcome: {:?}", simulation.context().outcome());
    if simulation.is_stuck() {
        println!("The network is stuck");
    }

    let disrupted = simulation.disrupted_nodes();
    if let Some(analysis) = cache.current() {
        println!();
        print_analysis(analysis);
        if !disrupted.is_empty() {
            let intact = analysis.intact_nodes(&disrupted);
            println!("  intact nodes:        {}", intact.into_iter().collect::<Vec<_>>().join(", "));
        }
    }
    info!(
        "Finished after {} steps ({} reused, {} analyses)",
        step,
        simulation.reused_step_count(),
        cache.recomputations()
    );

    if let Some(path) = matches.get_one::<String>("export") {
        let scenario = Scenario::from_simulation("export", "Exported run", "Recorded by fbas-sim", &simulation);
        scenario.save(path).with_context(|| format!("writing {}", path))?;
        println!("Exported {} steps to {}", scenario.steps.len(), path);
    }
    Ok(())
}

fn analyze(matches: &ArgMatches) -> Result<()> {
    let config = load_config(matches)?;
    let mut simulation = load_simulation(matches, &config)?;
    simulation.run_to_completion(config.max_steps);

    let analysis = simulation.context().analyze()?;
    print_analysis(&analysis);
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let matches = Command::new("fbas-sim")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Federated voting simulation and quorum analysis")
        .subcommand_required(true)
        .subcommand(
            Command::new("run")
                .about("Play a scenario to completion")
                .arg(scenario_arg())
                .arg(config_arg())
                .arg(
                    Arg::new("export")
                        .short('e')
                        .long("export")
                        .value_name("FILE")
                        .help("Write the recorded run as scenario JSON"),
                )
                .arg(
                    Arg::new("max-steps")
                        .long("max-steps")
                        .value_name("N")
                        .help("Stop after N steps")
                        .value_parser(clap::value_parser!(usize))
                        .action(ArgAction::Set),
                ),
        )
        .subcommand(
            Command::new("analyze")
                .about("Print the quorum analysis of a scenario's final roster")
                .arg(scenario_arg())
                .arg(config_arg()),
        )
        .get_matches();

    match matches.subcommand() {
        Some(("run", sub)) => run(sub),
        Some(("analyze", sub)) => analyze(sub),
        _ => {
            let ids = ScenarioFactory::IDS.join(", ");
            bail!("unknown command; built-in scenarios: {}", ids)
        }
    }
}
