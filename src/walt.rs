// SPDX-License-Identifier: GPL-2.0
//
// soctune: WALT-style heterogeneous scheduler model. Aggregates windowed
// load, summarizes it per the window-stats policy and migrates the hot
// cluster across the up/down demand thresholds.

use crate::cpu_model::Cluster;
use crate::sim::{CpuEnv, Scheduler};

pub const RAVG_HIST_SIZE_MAX: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowStatsPolicy {
    Recent,
    Max,
    MaxRecentAvg,
    Avg,
}

impl WindowStatsPolicy {
    /// Kernel sysfs numbering: 0 recent, 1 max, 2 max-recent-avg, 3 avg.
    pub fn from_i64(raw: i64) -> Self {
        match raw {
            0 => WindowStatsPolicy::Recent,
            1 => WindowStatsPolicy::Max,
            3 => WindowStatsPolicy::Avg,
            _ => WindowStatsPolicy::MaxRecentAvg,
        }
    }

    pub fn as_i64(self) -> i64 {
        match self {
            WindowStatsPolicy::Recent => 0,
            WindowStatsPolicy::Max => 1,
            WindowStatsPolicy::MaxRecentAvg => 2,
            WindowStatsPolicy::Avg => 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaltTunables {
    pub timer_rate: i64,
    pub sched_upmigrate: i64,
    pub sched_downmigrate: i64,
    pub sched_ravg_hist_size: usize,
    pub sched_window_stats_policy: WindowStatsPolicy,
    pub sched_freq_aggregate_threshold_pct: i64,
}

#[derive(Debug, Clone)]
pub struct WaltHmp {
    tunables: WaltTunables,
    little: usize,
    big: usize,
    active: usize,
    idle: usize,
    cluster_num: usize,
    /// `little.max_freq * little.efficiency`, the base for migration
    /// thresholds.
    little_cap_base: i64,
    up_demand_thd: u64,
    down_demand_thd: u64,
    demand: u64,
    sum_history: [i64; RAVG_HIST_SIZE_MAX],
    entry_cnt: i64,
    max_load_sum: u64,
    loads_sum: [u64; 4],
    governor_cnt: i64,
}

impl WaltHmp {
    pub fn new(tunables: WaltTunables, env: &CpuEnv) -> Self {
        let little = 0;
        let big = env.clusters.len() - 1;
        let model = &env.clusters[little].model;
        let little_cap_base = model.max_freq * model.efficiency;
        let mut hmp = WaltHmp {
            tunables,
            little,
            big,
            active: big,
            idle: little,
            cluster_num: if big == little { 1 } else { 2 },
            little_cap_base,
            up_demand_thd: 0,
            down_demand_thd: 0,
            demand: 0,
            sum_history: [0; RAVG_HIST_SIZE_MAX],
            entry_cnt: 0,
            max_load_sum: 0,
            loads_sum: [0; 4],
            governor_cnt: 0,
        };
        hmp.refresh_demand_thds();
        hmp
    }

    fn refresh_demand_thds(&mut self) {
        self.up_demand_thd = (self.little_cap_base * self.tunables.sched_upmigrate) as u64;
        self.down_demand_thd = (self.little_cap_base * self.tunables.sched_downmigrate) as u64;
    }

    /// Shift one sample into the load history and summarize it into the
    /// demand estimate.
    fn update_history(&mut self, in_demand: i64) {
        let hist_size = self.tunables.sched_ravg_hist_size;
        let mut sum: i64 = 0;
        let mut max: i64 = 0;

        for widx in (1..hist_size).rev() {
            self.sum_history[widx] = self.sum_history[widx - 1];
            sum += self.sum_history[widx];
            max = max.max(self.sum_history[widx]);
        }
        self.sum_history[0] = in_demand;
        sum += in_demand;
        max = max.max(in_demand);

        let avg = sum / hist_size as i64;
        let demand = match self.tunables.sched_window_stats_policy {
            WindowStatsPolicy::Recent => in_demand,
            WindowStatsPolicy::Max => max,
            WindowStatsPolicy::Avg => avg,
            WindowStatsPolicy::MaxRecentAvg => avg.max(in_demand),
        };
        self.demand = demand as u64;
    }

    fn aggregate_busy_pct_if_need(&self, active: &Cluster, loads_avg: &[i64; 4]) -> i64 {
        let mut aggregated_load: i64 = 0;
        for &load in loads_avg.iter().take(active.model.core_num) {
            aggregated_load += load;
        }
        let aggregated_busy_pct = active.busy_pct_of_load(aggregated_load);
        if aggregated_busy_pct > self.tunables.sched_freq_aggregate_threshold_pct {
            aggregated_busy_pct
        } else {
            active.busy_pct_of_load(self.demand as i64)
        }
    }
}

impl Scheduler for WaltHmp {
    fn scheduler_tick(&mut self, env: &mut CpuEnv, max_load: i64, loads: &[i64; 4], _now: i64) -> i64 {
        self.entry_cnt += 1;
        self.max_load_sum += max_load as u64;
        for (sum, &load) in self.loads_sum.iter_mut().zip(loads.iter()) {
            *sum += load as u64;
        }

        if self.entry_cnt == self.tunables.timer_rate {
            let timer_rate = self.tunables.timer_rate as u64;
            let max_load_avg = (self.max_load_sum / timer_rate) as i64;
            let mut loads_avg = [0i64; 4];
            for (avg, &sum) in loads_avg.iter_mut().zip(self.loads_sum.iter()) {
                *avg = (sum / timer_rate) as i64;
            }

            self.entry_cnt = 0;
            self.max_load_sum = 0;
            self.loads_sum = [0; 4];

            self.update_history(max_load_avg);

            if self.demand > self.up_demand_thd {
                self.active = self.big;
                self.idle = self.little;
            } else if self.demand < self.down_demand_thd {
                self.active = self.little;
                self.idle = self.big;
            }

            let CpuEnv { clusters, governors } = env;
            clusters[self.idle].busy_pct = 0;
            clusters[self.active].busy_pct =
                self.aggregate_busy_pct_if_need(&clusters[self.active], &loads_avg);

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
        // If load never migrated to the big cluster, treat it as offline.
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
        (self.tunables.sched_upmigrate, self.tunables.sched_downmigrate)
    }

    fn set_migration_thresholds(&mut self, up: i64, down: i64) {
        self.tunables.sched_upmigrate = up;
        self.tunables.sched_downmigrate = down;
        self.refresh_demand_thds();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{dual_cluster_env, walt_tunables};

    #[test]
    fn migrates_up_and_down_with_demand() {
        let mut env = dual_cluster_env();
        let little_cap_base = env.clusters[0].model.max_freq * env.clusters[0].model.efficiency;
        let mut hmp = WaltHmp::new(walt_tunables(), &env);
        assert_eq!(hmp.active_idx(), 1);

        // Ramp demand from 10% to 100% of little capacity, one governor
        // window per step. Policy Recent makes demand track the ramp.
        let mut crossed_at = None;
        for step in 1..=10 {
            let load = little_cap_base * step * 10;
            let loads = [load, 0, 0, 0];
            for tick in 0..2 {
                hmp.scheduler_tick(&mut env, load, &loads, step * 2 + tick);
            }
            if crossed_at.is_none() && hmp.active_idx() == 1 {
                crossed_at = Some(step);
            }
            if step <= 7 && crossed_at.is_none() {
                assert_eq!(hmp.active_idx(), 0, "migrated early at {step}0%");
            }
        }
        // upmigrate = 80% -> big no later than the window after crossing.
        assert!(crossed_at.unwrap() <= 9, "crossed at {crossed_at:?}");

        // Fall back only after demand sinks under downmigrate = 20%.
        let load = little_cap_base * 10;
        let loads = [load, 0, 0, 0];
        for tick in 0..2 {
            hmp.scheduler_tick(&mut env, load, &loads, 100 + tick);
        }
        assert_eq!(hmp.active_idx(), 0);
    }

    #[test]
    fn raising_loads_never_lowers_busy_pct() {
        let t = walt_tunables();
        let little_cap_base = {
            let env = dual_cluster_env();
            env.clusters[0].model.max_freq * env.clusters[0].model.efficiency
        };
        let base = little_cap_base * 40;
        let mut busy_seen = Vec::new();
        for bump in [0, 10, 20, 30] {
            let mut env = dual_cluster_env();
            let mut hmp = WaltHmp::new(t.clone(), &env);
            let load = base + little_cap_base * bump;
            let loads = [load, load / 2, 0, 0];
            for now in 0..2 {
                hmp.scheduler_tick(&mut env, load, &loads, now);
            }
            busy_seen.push(env.clusters[hmp.active_idx()].busy_pct);
        }
        assert!(busy_seen.windows(2).all(|w| w[0] <= w[1]), "{busy_seen:?}");
    }

    #[test]
    fn window_stats_policies_summarize_history() {
        let env = dual_cluster_env();
        let mut t = walt_tunables();
        t.sched_ravg_hist_size = 3;

        for (policy, expected) in [
            (WindowStatsPolicy::Recent, 100),
            (WindowStatsPolicy::Max, 700),
            (WindowStatsPolicy::Avg, 300),
            (WindowStatsPolicy::MaxRecentAvg, 300),
        ] {
            t.sched_window_stats_policy = policy;
            let mut hmp = WaltHmp::new(t.clone(), &env);
            for demand in [700, 100, 100] {
                hmp.update_history(demand);
            }
            assert_eq!(hmp.demand, expected, "{policy:?}");
        }
    }
}
