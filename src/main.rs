use std::fs;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use scratchflow::sim::config::{Config, SimConfig};
use scratchflow::sim::top::Sim;
use scratchflow::mem::double_buffer::DoubleBufferConfig;
use scratchflow::mem::dram::Dram;
use scratchflow::mem::llc::LlcConfig;
use scratchflow::sim::workload::WorkloadConfig;
use toml::Table;

#[derive(Parser)]
#[command(version, about)]
struct ScratchflowArgs {
    #[arg(help = "Path to config.toml")]
    config_path: PathBuf,
    #[arg(long, help = "Override number of processing elements")]
    num_pe: Option<usize>,
    #[arg(long, help = "Override DRAM latency in cycles")]
    dram_latency: Option<i64>,
    #[arg(long, help = "Count every LLC access as a hit")]
    always_hit: bool,
}

pub fn main() -> anyhow::Result<()> {
    env_logger::init();

    let argv = ScratchflowArgs::parse();
    let config = fs::read_to_string(&argv.config_path)
        .with_context(|| format!("failed to read config file {}", argv.config_path.display()))?;
    let config_table: Table = toml::from_str(&config).context("cannot parse config toml")?;

    let mut sim_config = SimConfig::from_section(config_table.get("sim"));
    let mut llc_config = LlcConfig::from_section(config_table.get("llc"));
    let buffer_config = DoubleBufferConfig::from_section(config_table.get("buffer"));
    let mut dram = Dram::from_section(config_table.get("dram"));
    let workload = WorkloadConfig::from_section(config_table.get("workload"));

    // override toml configs with argv
    sim_config.num_pe = argv.num_pe.unwrap_or(sim_config.num_pe);
    dram.latency = argv.dram_latency.unwrap_or(dram.latency);
    llc_config.always_hit = argv.always_hit || llc_config.always_hit;

    let mut sim = Sim::new(sim_config, llc_config, buffer_config, dram, workload)?;
    let report = sim.run()?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
