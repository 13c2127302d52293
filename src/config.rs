// SPDX-License-Identifier: GPL-2.0
//
// soctune: conf.json model. Carries the work list, GA hyperparameters, the
// scoring weights/limits and the search-space bounds. Unknown keys are only
// rejected under strict mode.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::codec::ParamRangeCfg;
use crate::nsga::GaCfg;
use crate::rank::RankMisc;
use crate::sim::SimMisc;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Per-SoC model files to optimize, in order.
    pub todo_models: Vec<PathBuf>,
    pub merged_workload: PathBuf,
    pub idle_workload: PathBuf,
    #[serde(default)]
    pub use_uperf: bool,
    pub ga_parameter: GaParameter,
    pub misc_settings: MiscSettings,
    pub parameter_range: ParamRangeCfg,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GaParameter {
    pub population: usize,
    pub generation_max: usize,
    pub crossover_fraction: f64,
    pub mutation_rate: f64,
    pub eta: f64,
    pub thread_num: usize,
    pub random_seed: u64,
}

/// The flat `miscSettings` dictionary with its dotted key names.
#[derive(Debug, Clone, Deserialize)]
pub struct MiscSettings {
    #[serde(rename = "ga.cost.batteryScore.idleFraction")]
    pub idle_fraction: f64,
    #[serde(rename = "ga.cost.batteryScore.workFraction")]
    pub work_fraction: f64,
    #[serde(rename = "ga.cost.limit.idleLastingMin")]
    pub idle_lasting_min: f64,
    #[serde(rename = "ga.cost.limit.performanceMax")]
    pub performance_max: f64,
    #[serde(rename = "sim.power.workingBase_mw")]
    pub working_base_mw: i64,
    #[serde(rename = "sim.power.idleBase_mw")]
    pub idle_base_mw: i64,
    #[serde(rename = "eval.perf.commonFraction")]
    pub common_fraction: f64,
    #[serde(rename = "eval.perf.renderFraction")]
    pub render_fraction: f64,
    #[serde(rename = "eval.perf.partitionLen")]
    pub perf_partition_len: usize,
    #[serde(rename = "eval.perf.seqLagL1")]
    pub seq_lag_l1: i64,
    #[serde(rename = "eval.perf.seqLagL2")]
    pub seq_lag_l2: i64,
    #[serde(rename = "eval.perf.seqLagMax")]
    pub seq_lag_max: i64,
    #[serde(rename = "eval.power.partitionLen")]
    pub batt_partition_len: usize,
    #[serde(rename = "eval.complexityFraction", default)]
    pub complexity_fraction: f64,
}

const KNOWN_TOP_LEVEL: &[&str] = &[
    "todoModels",
    "mergedWorkload",
    "idleWorkload",
    "useUperf",
    "gaParameter",
    "miscSettings",
    "parameterRange",
];

const KNOWN_MISC: &[&str] = &[
    "ga.cost.batteryScore.idleFraction",
    "ga.cost.batteryScore.workFraction",
    "ga.cost.limit.idleLastingMin",
    "ga.cost.limit.performanceMax",
    "sim.power.workingBase_mw",
    "sim.power.idleBase_mw",
    "eval.perf.commonFraction",
    "eval.perf.renderFraction",
    "eval.perf.partitionLen",
    "eval.perf.seqLagL1",
    "eval.perf.seqLagL2",
    "eval.perf.seqLagMax",
    "eval.power.partitionLen",
    "eval.complexityFraction",
];

impl Config {
    pub fn load(path: &Path, strict: bool) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("cannot read config {}", path.display()))?;
        Self::from_json(&raw, strict)
            .with_context(|| format!("malformed config {}", path.display()))
    }

    pub fn from_json(raw: &str, strict: bool) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(raw)?;
        if strict {
            check_keys(&value, KNOWN_TOP_LEVEL, "top level")?;
            if let Some(misc) = value.get("miscSettings") {
                check_keys(misc, KNOWN_MISC, "miscSettings")?;
            }
        }
        let config: Config = serde_json::from_value(value)?;
        if config.todo_models.is_empty() {
            bail!("todoModels is empty");
        }
        if config.misc_settings.perf_partition_len == 0
            || config.misc_settings.batt_partition_len == 0
        {
            bail!("partition lengths must be positive");
        }
        Ok(config)
    }

    pub fn ga_cfg(&self) -> GaCfg {
        GaCfg {
            population: self.ga_parameter.population,
            generation_max: self.ga_parameter.generation_max,
            crossover_fraction: self.ga_parameter.crossover_fraction,
            mutation_rate: self.ga_parameter.mutation_rate,
            eta: self.ga_parameter.eta,
            thread_num: self.ga_parameter.thread_num,
            random_seed: self.ga_parameter.random_seed,
        }
    }

    pub fn sim_misc(&self) -> SimMisc {
        SimMisc {
            working_base_mw: self.misc_settings.working_base_mw,
            idle_base_mw: self.misc_settings.idle_base_mw,
        }
    }

    pub fn rank_misc(&self) -> RankMisc {
        RankMisc {
            render_fraction: self.misc_settings.render_fraction,
            common_fraction: self.misc_settings.common_fraction,
            complexity_fraction: self.misc_settings.complexity_fraction,
            perf_partition_len: self.misc_settings.perf_partition_len,
            seq_lag_l1: self.misc_settings.seq_lag_l1,
            seq_lag_l2: self.misc_settings.seq_lag_l2,
            seq_lag_max: self.misc_settings.seq_lag_max,
            batt_partition_len: self.misc_settings.batt_partition_len,
        }
    }
}

fn check_keys(value: &serde_json::Value, known: &[&str], where_: &str) -> Result<()> {
    if let Some(object) = value.as_object() {
        for key in object.keys() {
            if !known.contains(&key.as_str()) {
                bail!("unrecognized {where_} key: {key}");
            }
        }
    }
    Ok(())
}

#[cfg(test)]
pub(crate) const SAMPLE_CONF: &str = r#"{
    "todoModels": ["./models/sdm660.json"],
    "mergedWorkload": "./workload/merged.json",
    "idleWorkload": "./workload/idle.json",
    "useUperf": false,
    "gaParameter": {
        "population": 16,
        "generationMax": 4,
        "crossoverFraction": 0.8,
        "mutationRate": 0.3,
        "eta": 2.0,
        "threadNum": 1,
        "randomSeed": 12345
    },
    "miscSettings": {
        "ga.cost.batteryScore.idleFraction": 0.3,
        "ga.cost.batteryScore.workFraction": 0.7,
        "ga.cost.limit.idleLastingMin": 0.5,
        "ga.cost.limit.performanceMax": 2.0,
        "sim.power.workingBase_mw": 800,
        "sim.power.idleBase_mw": 20,
        "eval.perf.commonFraction": 0.0,
        "eval.perf.renderFraction": 1.0,
        "eval.perf.partitionLen": 5,
        "eval.perf.seqLagL1": 1,
        "eval.perf.seqLagL2": 3,
        "eval.perf.seqLagMax": 16,
        "eval.power.partitionLen": 10
    },
    "parameterRange": {
        "above_hispeed_delay": {"min": 1, "max": 10},
        "go_hispeed_load": {"min": 50, "max": 99},
        "max_freq_hysteresis": {"min": 1, "max": 10},
        "min_sample_time": {"min": 1, "max": 10},
        "target_loads": {"min": 40, "max": 95},
        "sched_downmigrate": {"min": 40, "max": 90},
        "sched_upmigrate": {"min": 50, "max": 95},
        "sched_freq_aggregate_threshold_pct": {"min": 25, "max": 1000},
        "sched_ravg_hist_size": {"min": 1, "max": 5},
        "sched_window_stats_policy": {"min": 0, "max": 3},
        "timer_rate": {"min": 1, "max": 5},
        "input_duration": {"min": 10, "max": 300},
        "down_threshold": {"min": 200, "max": 700},
        "up_threshold": {"min": 300, "max": 900},
        "load_avg_period_ms": {"min": 32, "max": 256},
        "sched_boost": {"min": 0, "max": 1}
    }
}"#;
