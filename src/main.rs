// SPDX-License-Identifier: GPL-2.0
//
// soctune: offline search for big.LITTLE power-management parameters.
// Replays recorded workloads through a quantized CPU simulation and drives
// NSGA-III toward the jank/energy/standby Pareto frontier, then emits
// per-SoC summaries, kernel scripts and uperf profiles.

mod boost;
mod codec;
mod config;
mod cpu_model;
mod dump;
mod interactive;
mod nsga;
mod opt;
mod pelt;
mod rank;
mod sim;
#[cfg(test)]
mod testutil;
mod walt;
mod workload;

use anyhow::Result;
use clap::Parser;
use log::info;
use std::path::PathBuf;
use std::time::Instant;

use crate::config::Config;
use crate::cpu_model::Soc;
use crate::dump::Dumper;
use crate::opt::OptimizerAdapter;
use crate::workload::Workload;

#[derive(Debug, Parser)]
#[command(version, about = "Search optimal power-management parameters for big.LITTLE SoCs")]
struct Opts {
    /// Optimizer configuration file.
    #[clap(short, long, default_value = "./conf.json")]
    config: PathBuf,

    /// Directory the result artifacts are written to.
    #[clap(short, long, default_value = "./output")]
    output: PathBuf,

    /// Shell template substituted into each generated powercfg.sh.
    #[clap(long, default_value = "./template/powercfg_template.sh")]
    template: PathBuf,

    /// Reject unrecognized configuration keys.
    #[clap(long, action = clap::ArgAction::SetTrue)]
    strict: bool,

    /// Increase log verbosity (-v for debug, -vv for trace).
    #[clap(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_logging(verbose: u8) -> Result<()> {
    let level = match verbose {
        0 => simplelog::LevelFilter::Info,
        1 => simplelog::LevelFilter::Debug,
        _ => simplelog::LevelFilter::Trace,
    };
    let mut lcfg = simplelog::ConfigBuilder::new();
    lcfg.set_time_level(simplelog::LevelFilter::Error)
        .set_location_level(simplelog::LevelFilter::Off)
        .set_target_level(simplelog::LevelFilter::Off)
        .set_thread_level(simplelog::LevelFilter::Off);
    simplelog::TermLogger::init(
        level,
        lcfg.build(),
        simplelog::TerminalMode::Stderr,
        simplelog::ColorChoice::Auto,
    )?;
    Ok(())
}

fn main() -> Result<()> {
    let opts = Opts::parse();
    init_logging(opts.verbose)?;

    let config = Config::load(&opts.config, opts.strict)?;
    let workload = Workload::from_file(&config.merged_workload)?;
    let idleload = Workload::from_file(&config.idle_workload)?;

    for model in &config.todo_models {
        let soc = Soc::from_file(model)?;
        info!("Target: {}", soc.name);

        let start = Instant::now();
        let adapter = OptimizerAdapter::new(&soc, &workload, &idleload, &config)?;
        let results = adapter.optimize()?;
        info!(
            "{}: optimized in {:.1} s, front holds {} individuals",
            soc.name,
            start.elapsed().as_secs_f64(),
            results.len()
        );

        Dumper::new(&soc, adapter.flavor(), &opts.output, &opts.template).dump_all(&results)?;
    }

    Ok(())
}
