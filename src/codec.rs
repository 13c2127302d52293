// SPDX-License-Identifier: GPL-2.0
//
// soctune: bidirectional mapping between the optimizer's real-valued genome
// and typed tunable bundles. The decode order fixes the genome layout; the
// range table doubles as the search-space definition.

use anyhow::{bail, Result};
use serde::Deserialize;

use crate::boost::{InputBoostTunables, UperfBoostTunables};
use crate::cpu_model::{Cluster, Soc};
use crate::interactive::{
    InteractiveTunables, ABOVE_DELAY_MAX_LEN, TARGET_LOAD_MAX_LEN,
};
use crate::pelt::PeltTunables;
use crate::sim::{BoostTunables, SchedTunables, SimFlavor, Tunables};
use crate::walt::{WaltTunables, WindowStatsPolicy, RAVG_HIST_SIZE_MAX};

/// Inclusive quantization range for one genome component.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ParamRange {
    pub min: i64,
    pub max: i64,
}

/// Search-space bounds from `conf.json`'s `parameterRange` object. The PELT
/// entries are only required when a PELT-scheduled SoC is optimized.
#[derive(Debug, Clone, Deserialize)]
pub struct ParamRangeCfg {
    pub above_hispeed_delay: ParamRange,
    pub go_hispeed_load: ParamRange,
    pub max_freq_hysteresis: ParamRange,
    pub min_sample_time: ParamRange,
    pub target_loads: ParamRange,
    pub sched_downmigrate: ParamRange,
    pub sched_upmigrate: ParamRange,
    pub sched_freq_aggregate_threshold_pct: ParamRange,
    pub sched_ravg_hist_size: ParamRange,
    pub sched_window_stats_policy: ParamRange,
    pub timer_rate: ParamRange,
    pub input_duration: ParamRange,
    pub down_threshold: Option<ParamRange>,
    pub up_threshold: Option<ParamRange>,
    pub load_avg_period_ms: Option<ParamRange>,
    pub sched_boost: Option<ParamRange>,
}

/// Forced WALT migration thresholds on single-cluster SoCs, where a search
/// over up/down would only produce oscillation.
const SINGLE_CLUSTER_MIGRATE: i64 = 45;

#[derive(Debug, Clone)]
pub struct ParamCodec {
    soc: Soc,
    flavor: SimFlavor,
    desc: Vec<ParamRange>,
}

impl ParamCodec {
    pub fn new(soc: &Soc, flavor: SimFlavor, cfg: &ParamRangeCfg) -> Result<Self> {
        let mut desc = Vec::new();

        for cluster in &soc.clusters {
            push_governor_desc(&mut desc, cluster, cfg);
        }

        if flavor.is_walt() {
            desc.push(cfg.sched_downmigrate);
            desc.push(cfg.sched_upmigrate);
            desc.push(cfg.sched_freq_aggregate_threshold_pct);
            desc.push(cfg.sched_ravg_hist_size);
            desc.push(cfg.sched_window_stats_policy);
            desc.push(cfg.timer_rate);
        } else {
            desc.push(require(cfg.down_threshold, "down_threshold")?);
            desc.push(require(cfg.up_threshold, "up_threshold")?);
            desc.push(require(cfg.load_avg_period_ms, "load_avg_period_ms")?);
            desc.push(require(cfg.sched_boost, "sched_boost")?);
            desc.push(cfg.timer_rate);
        }

        if flavor.is_uperf() {
            let (up, down) = if flavor.is_walt() {
                (cfg.sched_upmigrate, cfg.sched_downmigrate)
            } else {
                (
                    require(cfg.up_threshold, "up_threshold")?,
                    require(cfg.down_threshold, "down_threshold")?,
                )
            };
            for cluster in &soc.clusters {
                let freq_range = ParamRange {
                    min: cluster.model.min_freq,
                    max: cluster.model.max_freq,
                };
                desc.push(freq_range);
                desc.push(freq_range);
            }
            desc.push(down);
            desc.push(up);
            for cluster in &soc.clusters {
                push_governor_desc(&mut desc, cluster, cfg);
            }
        } else {
            for cluster in &soc.clusters {
                desc.push(ParamRange {
                    min: cluster.model.min_freq,
                    max: cluster.model.max_freq,
                });
            }
            desc.push(cfg.input_duration);
        }

        Ok(ParamCodec {
            soc: soc.clone(),
            flavor,
            desc,
        })
    }

    /// Required genome length.
    pub fn param_len(&self) -> usize {
        self.desc.len()
    }

    /// Translate one genome into a typed bundle. Total for any genome of
    /// `param_len` components in [0, 1].
    pub fn decode(&self, genes: &[f64]) -> Tunables {
        debug_assert_eq!(genes.len(), self.desc.len());
        let mut cursor = Cursor {
            genes,
            desc: &self.desc,
            pos: 0,
        };

        let mut governor = Vec::with_capacity(self.soc.clusters.len());
        for cluster in &self.soc.clusters {
            governor.push(decode_governor_block(&mut cursor, cluster));
        }

        let sched = if self.flavor.is_walt() {
            let sched_downmigrate = cursor.load_grid();
            let sched_upmigrate = cursor.load_grid().max(sched_downmigrate);
            let sched_freq_aggregate_threshold_pct = cursor.stepped(25);
            let sched_ravg_hist_size =
                cursor.quantify().clamp(1, RAVG_HIST_SIZE_MAX as i64) as usize;
            let sched_window_stats_policy = WindowStatsPolicy::from_i64(cursor.quantify());
            let timer_rate = cursor.quantify().max(1);
            let (sched_upmigrate, sched_downmigrate) = if self.soc.clusters.len() < 2 {
                (SINGLE_CLUSTER_MIGRATE, SINGLE_CLUSTER_MIGRATE)
            } else {
                (sched_upmigrate, sched_downmigrate)
            };
            SchedTunables::Walt(WaltTunables {
                timer_rate,
                sched_upmigrate,
                sched_downmigrate,
                sched_ravg_hist_size,
                sched_window_stats_policy,
                sched_freq_aggregate_threshold_pct,
            })
        } else {
            let down_threshold = cursor.quantify();
            let up_threshold = cursor.quantify().max(down_threshold);
            let load_avg_period_ms = cursor.quantify().max(1);
            let boost = cursor.quantify();
            let timer_rate = cursor.quantify().max(1);
            SchedTunables::Pelt(PeltTunables {
                timer_rate,
                up_threshold,
                down_threshold,
                load_avg_period_ms,
                boost,
            })
        };
        let timer_rate = match &sched {
            SchedTunables::Walt(t) => t.timer_rate,
            SchedTunables::Pelt(t) => t.timer_rate,
        };

        let boost = if self.flavor.is_uperf() {
            let mut min_freq = [0i64; 2];
            let mut max_freq = [0i64; 2];
            for (idx, cluster) in self.soc.clusters.iter().enumerate().take(2) {
                min_freq[idx] = cursor.freq(cluster);
                max_freq[idx] = cursor.freq(cluster).max(min_freq[idx]);
            }
            let sched_down = cursor.load_grid();
            let sched_up = cursor.load_grid().max(sched_down);
            let mut boost_governor = Vec::with_capacity(self.soc.clusters.len());
            for cluster in &self.soc.clusters {
                let mut block = decode_governor_block(&mut cursor, cluster);
                normalize_governor_times(&mut block, timer_rate);
                boost_governor.push(block);
            }
            BoostTunables::Uperf(UperfBoostTunables {
                min_freq,
                max_freq,
                sched_up,
                sched_down,
                governor: boost_governor,
            })
        } else {
            let mut boost_freq = [0i64; 2];
            for (idx, cluster) in self.soc.clusters.iter().enumerate().take(2) {
                boost_freq[idx] = cursor.freq(cluster);
            }
            let duration_quantum = cursor.stepped(10);
            BoostTunables::Input(InputBoostTunables {
                boost_freq,
                duration_quantum,
            })
        };

        // Governor times are expressed in scheduler ticks, not quanta.
        for block in governor.iter_mut() {
            normalize_governor_times(block, timer_rate);
        }

        Tunables { governor, sched, boost }
    }
}

fn require(range: Option<ParamRange>, key: &str) -> Result<ParamRange> {
    match range {
        Some(range) => Ok(range),
        None => bail!("parameterRange.{key} is required for PELT SoCs"),
    }
}

fn push_governor_desc(desc: &mut Vec<ParamRange>, cluster: &Cluster, cfg: &ParamRangeCfg) {
    let n_opp = cluster.model.opp_table.len();
    desc.push(ParamRange {
        min: cluster.model.min_freq,
        max: cluster.model.max_freq,
    });
    desc.push(cfg.go_hispeed_load);
    desc.push(cfg.min_sample_time);
    desc.push(cfg.max_freq_hysteresis);
    for _ in 0..ABOVE_DELAY_MAX_LEN.min(n_opp) {
        desc.push(cfg.above_hispeed_delay);
    }
    for _ in 0..TARGET_LOAD_MAX_LEN.min(n_opp) {
        desc.push(cfg.target_loads);
    }
}

fn decode_governor_block(cursor: &mut Cursor, cluster: &Cluster) -> InteractiveTunables {
    let n_opp = cluster.model.opp_table.len();
    let hispeed_freq = cursor.freq(cluster);
    let go_hispeed_load = cursor.load_grid();
    let min_sample_time = cursor.quantify();
    let max_freq_hysteresis = cursor.quantify();

    let mut above_hispeed_delay = [1i64; ABOVE_DELAY_MAX_LEN];
    for slot in above_hispeed_delay.iter_mut().take(ABOVE_DELAY_MAX_LEN.min(n_opp)) {
        *slot = cursor.quantify();
    }
    let mut target_loads = [90i64; TARGET_LOAD_MAX_LEN];
    for slot in target_loads.iter_mut().take(TARGET_LOAD_MAX_LEN.min(n_opp)) {
        *slot = cursor.load_grid();
    }

    InteractiveTunables {
        hispeed_freq,
        go_hispeed_load,
        min_sample_time,
        max_freq_hysteresis,
        above_hispeed_delay,
        target_loads,
    }
}

/// Convert governor dwell times from quanta to scheduler ticks, keeping a
/// one-tick minimum.
fn normalize_governor_times(block: &mut InteractiveTunables, timer_rate: i64) {
    let to_ticks = |quanta: i64| ((quanta as f64 / timer_rate as f64).round() as i64).max(1);
    block.min_sample_time = to_ticks(block.min_sample_time);
    block.max_freq_hysteresis = to_ticks(block.max_freq_hysteresis);
    for slot in block.above_hispeed_delay.iter_mut() {
        *slot = to_ticks(*slot);
    }
}

struct Cursor<'a> {
    genes: &'a [f64],
    desc: &'a [ParamRange],
    pos: usize,
}

impl Cursor<'_> {
    fn next(&mut self) -> (f64, ParamRange) {
        let pair = (self.genes[self.pos], self.desc[self.pos]);
        self.pos += 1;
        pair
    }

    /// `range_start + round(r * (range_end - range_start))`.
    fn quantify(&mut self) -> i64 {
        let (ratio, range) = self.next();
        range.min + ((range.max - range.min) as f64 * ratio).round() as i64
    }

    /// Quantified value snapped to the cluster's opp grid.
    fn freq(&mut self, cluster: &Cluster) -> i64 {
        cluster.freq_floor_to_opp(self.quantify())
    }

    /// Load percentage on a coarse grid away from the extremes, trimming
    /// pointless parameter resolution.
    fn load_grid(&mut self) -> i64 {
        let load = self.quantify();
        if load > 15 && load < 85 {
            (load >> 2) << 2
        } else {
            load
        }
    }

    fn stepped(&mut self, step: i64) -> i64 {
        (self.quantify() / step) * step
    }
}

/// Baseline tunables used to produce the reference score.
pub fn default_tunables(soc: &Soc, flavor: SimFlavor) -> Tunables {
    let governor: Vec<InteractiveTunables> = soc
        .clusters
        .iter()
        .map(|cluster| InteractiveTunables {
            hispeed_freq: cluster.freq_floor_to_opp((cluster.model.max_freq as f64 * 0.6) as i64),
            go_hispeed_load: 90,
            min_sample_time: 2,
            max_freq_hysteresis: 2,
            above_hispeed_delay: [1; ABOVE_DELAY_MAX_LEN],
            target_loads: [90; TARGET_LOAD_MAX_LEN],
        })
        .collect();

    let sched = if flavor.is_walt() {
        SchedTunables::Walt(WaltTunables {
            timer_rate: 2,
            sched_upmigrate: 95,
            sched_downmigrate: 85,
            sched_ravg_hist_size: 5,
            sched_window_stats_policy: WindowStatsPolicy::MaxRecentAvg,
            sched_freq_aggregate_threshold_pct: 1000,
        })
    } else {
        SchedTunables::Pelt(PeltTunables {
            timer_rate: 2,
            up_threshold: 640,
            down_threshold: 480,
            load_avg_period_ms: 128,
            boost: 0,
        })
    };

    let boost = if flavor.is_uperf() {
        let mut min_freq = [0i64; 2];
        let mut max_freq = [i64::MAX; 2];
        for (idx, cluster) in soc.clusters.iter().enumerate().take(2) {
            min_freq[idx] = cluster.model.min_freq;
            max_freq[idx] = cluster.model.max_freq;
        }
        let (sched_up, sched_down) = if flavor.is_walt() { (95, 85) } else { (640, 480) };
        BoostTunables::Uperf(UperfBoostTunables {
            min_freq,
            max_freq,
            sched_up,
            sched_down,
            governor: governor.clone(),
        })
    } else {
        let mut boost_freq = [0i64; 2];
        for (idx, cluster) in soc.clusters.iter().enumerate().take(2) {
            boost_freq[idx] =
                cluster.freq_floor_to_opp((cluster.model.max_freq as f64 * 0.6) as i64);
        }
        BoostTunables::Input(InputBoostTunables {
            boost_freq,
            duration_quantum: 10,
        })
    };

    Tunables { governor, sched, boost }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{param_range_cfg, single_cluster_soc, two_cluster_soc};

    #[test]
    fn param_len_counts_every_block() {
        let cfg = param_range_cfg();
        let soc = two_cluster_soc();
        // Per cluster: 4 fixed + 4 above + 4 target_loads = 12. WALT adds 6,
        // input boost adds 2 freqs + duration.
        let codec = ParamCodec::new(&soc, SimFlavor::QcomBL, &cfg).unwrap();
        assert_eq!(codec.param_len(), 2 * 12 + 6 + 3);
        // PELT adds 5; uperf replaces the input block with 2x2 freqs +
        // up/down + a nested governor block per cluster.
        let codec = ParamCodec::new(&soc, SimFlavor::BL, &cfg).unwrap();
        assert_eq!(codec.param_len(), 2 * 12 + 5 + 3);
        let codec = ParamCodec::new(&soc, SimFlavor::QcomUp, &cfg).unwrap();
        assert_eq!(codec.param_len(), 2 * 12 + 6 + 4 + 2 + 2 * 12);
    }

    #[test]
    fn decode_is_deterministic() {
        let cfg = param_range_cfg();
        let soc = two_cluster_soc();
        let codec = ParamCodec::new(&soc, SimFlavor::QcomBL, &cfg).unwrap();
        let genes: Vec<f64> = (0..codec.param_len())
            .map(|idx| (idx as f64 * 0.37) % 1.0)
            .collect();
        assert_eq!(codec.decode(&genes), codec.decode(&genes));
    }

    #[test]
    fn range_edges_decode_to_bounds() {
        let cfg = param_range_cfg();
        let soc = two_cluster_soc();
        let codec = ParamCodec::new(&soc, SimFlavor::QcomBL, &cfg).unwrap();

        let lo = codec.decode(&vec![0.0; codec.param_len()]);
        assert_eq!(lo.governor[0].hispeed_freq, soc.clusters[0].model.min_freq);
        let walt = lo.walt();
        assert_eq!(walt.timer_rate, 1);
        assert_eq!(walt.sched_downmigrate, cfg.sched_downmigrate.min);

        let hi = codec.decode(&vec![1.0; codec.param_len()]);
        assert_eq!(hi.governor[0].hispeed_freq, soc.clusters[0].model.max_freq);
        assert_eq!(hi.walt().sched_freq_aggregate_threshold_pct,
                   (cfg.sched_freq_aggregate_threshold_pct.max / 25) * 25);
    }

    #[test]
    fn upmigrate_never_below_downmigrate() {
        let cfg = param_range_cfg();
        let soc = two_cluster_soc();
        let codec = ParamCodec::new(&soc, SimFlavor::QcomBL, &cfg).unwrap();
        let mut genes = vec![0.5; codec.param_len()];
        // Force a raw down above the raw up; decode must reorder them.
        let sched_base = 2 * 12;
        genes[sched_base] = 1.0;
        genes[sched_base + 1] = 0.0;
        let walt = codec.decode(&genes).walt().clone();
        assert!(walt.sched_upmigrate >= walt.sched_downmigrate);

        let codec = ParamCodec::new(&soc, SimFlavor::BL, &cfg).unwrap();
        let mut genes = vec![0.5; codec.param_len()];
        genes[sched_base] = 1.0;
        genes[sched_base + 1] = 0.0;
        let pelt = codec.decode(&genes).pelt().clone();
        assert!(pelt.up_threshold >= pelt.down_threshold);
    }

    #[test]
    fn single_cluster_walt_forces_fixed_thresholds() {
        let cfg = param_range_cfg();
        let soc = single_cluster_soc();
        let codec = ParamCodec::new(&soc, SimFlavor::QcomBL, &cfg).unwrap();
        let walt = codec.decode(&vec![0.9; codec.param_len()]).walt().clone();
        assert_eq!(walt.sched_upmigrate, SINGLE_CLUSTER_MIGRATE);
        assert_eq!(walt.sched_downmigrate, SINGLE_CLUSTER_MIGRATE);
    }

    #[test]
    fn governor_times_are_rescaled_to_ticks() {
        let cfg = param_range_cfg();
        let soc = two_cluster_soc();
        let codec = ParamCodec::new(&soc, SimFlavor::QcomBL, &cfg).unwrap();
        // timer_rate gene at max -> 5 ticks; min_sample_time gene at max ->
        // 10 quanta -> 2 ticks.
        let mut genes = vec![0.0; codec.param_len()];
        genes[2] = 1.0;
        let sched_base = 2 * 12;
        genes[sched_base + 5] = 1.0;
        let decoded = codec.decode(&genes);
        assert_eq!(decoded.timer_rate(), cfg.timer_rate.max);
        assert_eq!(decoded.governor[0].min_sample_time,
                   (cfg.min_sample_time.max as f64 / cfg.timer_rate.max as f64).round().max(1.0) as i64);
        // Everything else sits at the one-tick floor.
        assert!(decoded.governor[0].above_hispeed_delay.iter().all(|&d| d == 1));
    }

    #[test]
    fn pelt_ranges_are_required_for_pelt_socs() {
        let mut cfg = param_range_cfg();
        cfg.down_threshold = None;
        let soc = two_cluster_soc();
        assert!(ParamCodec::new(&soc, SimFlavor::QcomBL, &cfg).is_ok());
        assert!(ParamCodec::new(&soc, SimFlavor::BL, &cfg).is_err());
    }
}
