// SPDX-License-Identifier: GPL-2.0
//
// soctune: PELT-style scheduler model. Tracks a geometrically decayed
// utilization signal on the active cluster and migrates across fixed
// utilization thresholds on the 0..1024 scale.

use crate::sim::{CpuEnv, Scheduler};

const TICK_MS: i64 = 10;
const THRESHOLD_SCALE: u64 = 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeltTunables {
    pub timer_rate: i64,
    pub up_threshold: i64,
    pub down_threshold: i64,
    pub load_avg_period_ms: i64,
    pub boost: i64,
}

#[derive(Debug, Clone)]
pub struct PeltHmp {
    tunables: PeltTunables,
    little: usize,
    big: usize,
    active: usize,
    idle: usize,
    cluster_num: usize,
    demand: u64,
    up_demand_thd: u64,
    down_demand_thd: u64,
    decay_ratio: u32,
    load_avg_max: u32,
    entry_cnt: i64,
    max_load_sum: u64,
    governor_cnt: i64,
}

/// `(a * mul) >> shift` without intermediate overflow.
pub fn mul_u64_u32_shr(a: u64, mul: u32, shift: u32) -> u64 {
    ((a as u128 * mul as u128) >> shift) as u64
}

/// Per-tick decay factor scaled into u32: `y^period_ms = 0.5`, ratio =
/// `UINT32_MAX * y^tick_ms`.
pub fn calc_decay_ratio(tick_ms: i64, period_ms: i64) -> u32 {
    let y = 0.5f64.powf(1.0 / period_ms as f64);
    (u32::MAX as f64 * y.powi(tick_ms as i32)) as u32
}

/// Limit of the decayed geometric series: the fixed point of
/// `x = 1024 + (x * ratio) >> 32`.
pub fn calc_load_avg_max(decay_ratio: u32) -> u32 {
    let mut max: u64 = 0;
    let mut last: u64 = u64::MAX;
    while max != last {
        last = max;
        max = 1024 + mul_u64_u32_shr(max, decay_ratio, 32);
    }
    max as u32
}

impl PeltHmp {
    pub fn new(tunables: PeltTunables, env: &CpuEnv) -> Self {
        let little = 0;
        let big = env.clusters.len() - 1;
        let decay_ratio = calc_decay_ratio(TICK_MS, tunables.load_avg_period_ms);
        let load_avg_max = calc_load_avg_max(decay_ratio);
        PeltHmp {
            up_demand_thd: tunables.up_threshold as u64,
            down_demand_thd: tunables.down_threshold as u64,
            tunables,
            little,
            big,
            active: big,
            idle: little,
            cluster_num: if big == little { 1 } else { 2 },
            demand: 0,
            decay_ratio,
            load_avg_max,
            entry_cnt: 0,
            max_load_sum: 0,
            governor_cnt: 0,
        }
    }

    /// Decay the running signal, add the new sample, and report effective
    /// utilization with the reachable maximum mapped to 1024. Utilization
    /// only depends on busy time, not on the cluster's frequency headroom.
    fn update_busy_time(&mut self, env: &CpuEnv, max_load: i64) -> u64 {
        let now_busy =
            env.clusters[self.active].busy_pct_of_load(max_load) as u64 * THRESHOLD_SCALE / 100;
        self.demand = now_busy + mul_u64_u32_shr(self.demand, self.decay_ratio, 32);
        self.demand * THRESHOLD_SCALE / self.load_avg_max as u64
    }
}

impl Scheduler for PeltHmp {
    fn scheduler_tick(&mut self, env: &mut CpuEnv, max_load: i64, _loads: &[i64; 4], _now: i64) -> i64 {
        // Migration tracks the decayed signal every quantum; frequency
        // selection still samples busy time per timer_rate window.
        let util = self.update_busy_time(env, max_load);
        if util > self.up_demand_thd {
            self.active = self.big;
            self.idle = self.little;
        } else if util < self.down_demand_thd {
            self.active = self.little;
            self.idle = self.big;
        }

        self.entry_cnt += 1;
        self.max_load_sum += max_load as u64;

        if self.entry_cnt == self.tunables.timer_rate {
            let max_load_avg = (self.max_load_sum / self.tunables.timer_rate as u64) as i64;
            self.entry_cnt = 0;
            self.max_load_sum = 0;

            let CpuEnv { clusters, governors } = env;
            clusters[self.idle].busy_pct = 0;
            clusters[self.active].busy_pct = clusters[self.active].busy_pct_of_load(max_load_avg);

            let busy = clusters[self.little].busy_pct;
            let freq = governors[0].timer_tick(&clusters[self.little], busy, self.governor_cnt);
            clusters[self.little].set_cur_freq(freq);
            if self.cluster_num > 1 {
                let busy = clusters[self.big].busy_pct;
                let freq = governors[1].timer_tick(&clusters[self.big], busy, self.governor_cnt);
                clusters[self.big].set_cur_freq(freq);
            }
            self.governor_cnt += 1;
        }

        env.clusters[self.active].calc_capacity()
    }

    fn calc_power(&self, env: &CpuEnv, loads: &[i64; 4]) -> i64 {
        let active = &env.clusters[self.active];
        let idle = &env.clusters[self.idle];
        let idle_load_pcts = [1, 0, 0, 0];
        let mut load_pcts = [0i64; 4];
        for (pct, &load) in load_pcts.iter_mut().zip(loads.iter()) {
            *pct = load / (active.model.efficiency * active.cur_freq);
        }
        active.calc_power(&load_pcts) + idle.calc_power(&idle_load_pcts)
    }

    fn calc_power_for_idle(&self, env: &CpuEnv, _loads: &[i64; 4]) -> i64 {
        let idle_load_pcts = [100, 0, 0, 0];
        let mut pwr = env.clusters[self.little].calc_power(&idle_load_pcts);
        if self.active != self.little {
            pwr += env.clusters[self.big].calc_power(&idle_load_pcts);
        }
        pwr
    }

    fn active_idx(&self) -> usize {
        self.active
    }

    fn migration_thresholds(&self) -> (i64, i64) {
        (self.tunables.up_threshold, self.tunables.down_threshold)
    }

    fn set_migration_thresholds(&mut self, up: i64, down: i64) {
        self.tunables.up_threshold = up;
        self.tunables.down_threshold = down;
        self.up_demand_thd = up as u64;
        self.down_demand_thd = down as u64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{dual_cluster_env, pelt_tunables};

    #[test]
    fn decay_limit_is_a_fixed_point() {
        for period_ms in [32, 64, 128, 256] {
            let ratio = calc_decay_ratio(TICK_MS, period_ms);
            let max = calc_load_avg_max(ratio) as u64;
            let next = 1024 + mul_u64_u32_shr(max, ratio, 32);
            assert!(max.abs_diff(next) < 1, "period {period_ms}: {max} vs {next}");
        }
    }

    #[test]
    fn sustained_full_load_saturates_util() {
        let env = dual_cluster_env();
        let mut hmp = PeltHmp::new(pelt_tunables(), &env);
        // 100% busy on the active cluster, 128 ms half-life: one half-life
        // (~13 ticks) reaches half of max, and utilization saturates toward
        // 1024 under sustained load.
        let full = env.clusters[hmp.active].calc_capacity();
        let mut util = 0;
        for tick in 1..=90 {
            util = hmp.update_busy_time(&env, full);
            if tick == 13 {
                assert!((450..=580).contains(&util), "util at half-life: {util}");
            }
        }
        assert!(util >= 1000, "util after 90 ticks: {util}");
        for _ in 0..30 {
            util = hmp.update_busy_time(&env, full);
            assert!(util >= 1000, "util decayed to {util}");
        }
    }

    #[test]
    fn migrates_on_util_thresholds() {
        let mut env = dual_cluster_env();
        let mut hmp = PeltHmp::new(pelt_tunables(), &env);
        assert_eq!(hmp.active_idx(), 1);

        // Idle load decays utilization below down_threshold -> little.
        for now in 0..40 {
            hmp.scheduler_tick(&mut env, 0, &[0, 0, 0, 0], now);
        }
        assert_eq!(hmp.active_idx(), 0);

        // Saturating load pushes utilization past up_threshold -> big.
        for now in 40..80 {
            let full = env.clusters[hmp.active_idx()].calc_capacity();
            hmp.scheduler_tick(&mut env, full, &[full, 0, 0, 0], now);
        }
        assert_eq!(hmp.active_idx(), 1);
    }
}
