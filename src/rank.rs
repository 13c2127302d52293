// SPDX-License-Identifier: GPL-2.0
//
// soctune: converts simulator traces into the three normalized fitness
// scalars. Partitioned scoring penalizes concentrated jank and localized
// battery drain harder than long-run averages would.

use crate::cpu_model::Soc;
use crate::sim::SimResultPack;
use crate::workload::Workload;

/// Normalized fitness triple. `performance` is a lag measure (lower is
/// better); `battery_life` and `idle_lasting` are lasting ratios (higher is
/// better). `ref_power_consumed` is only populated by an init-mode pass.
#[derive(Debug, Clone, Default)]
pub struct Score {
    pub performance: f64,
    pub battery_life: f64,
    pub idle_lasting: f64,
    pub ref_power_consumed: Vec<u64>,
}

impl Score {
    /// Identity baseline used to seed the init-mode evaluation.
    pub fn unit() -> Self {
        Score {
            performance: 1.0,
            battery_life: 1.0,
            idle_lasting: 1.0,
            ref_power_consumed: Vec::new(),
        }
    }
}

/// Scoring weights and partition geometry.
#[derive(Debug, Clone, Copy)]
pub struct RankMisc {
    pub render_fraction: f64,
    /// Weight of per-quantum lag; zero scores render frames only.
    pub common_fraction: f64,
    /// Reserved for the parameter-complexity regularizer.
    #[allow(dead_code)]
    pub complexity_fraction: f64,
    pub perf_partition_len: usize,
    pub seq_lag_l1: i64,
    pub seq_lag_l2: i64,
    pub seq_lag_max: i64,
    pub batt_partition_len: usize,
}

#[derive(Debug, Clone)]
pub struct Rank {
    misc: RankMisc,
    default_score: Score,
}

impl Rank {
    pub fn new(default_score: Score, misc: RankMisc) -> Self {
        Rank { misc, default_score }
    }

    /// Score one simulation pack. In init mode the pack itself becomes the
    /// battery reference, so the returned score carries the partition sums
    /// for the caller to freeze.
    pub fn eval(&self, workload: &Workload, rp: &SimResultPack, soc: &Soc, is_init: bool) -> Score {
        let ref_power = if is_init {
            self.batt_partitions(&rp.onscreen.power)
        } else {
            Vec::new()
        };
        let refs = if is_init {
            &ref_power
        } else {
            &self.default_score.ref_power_consumed
        };

        let performance = self.eval_performance(workload, soc, &rp.onscreen.capacity);
        let battery_life = self.eval_battery_life(&rp.onscreen.power, refs);
        let idle_lasting = self.eval_idle_lasting(rp.offscreen_pwr);

        Score {
            performance,
            battery_life,
            idle_lasting,
            ref_power_consumed: ref_power,
        }
    }

    fn eval_performance(&self, workload: &Workload, soc: &Soc, capacity_log: &[u32]) -> f64 {
        let enough_capacity = soc.enough_capacity();
        let is_lag =
            |required: i64, provided: i64| provided < required && provided < enough_capacity;

        let mut render_lag_seq = Vec::with_capacity(workload.render_load.len());
        for frame in &workload.render_load {
            let mut aggregated: u64 = 0;
            for (idx, quantums) in frame.window_idxs.iter().zip(frame.window_quantums.iter()) {
                aggregated += capacity_log[*idx] as u64 * *quantums as u64;
            }
            let provided = (aggregated / workload.frame_quantum as u64) as i64;
            render_lag_seq.push(is_lag(frame.frame_load, provided));
        }
        let render_lag_ratio = self.perf_partition_eval(&render_lag_seq);

        let mut score = self.misc.render_fraction * render_lag_ratio;
        if self.misc.common_fraction != 0.0 {
            let common_lag_seq: Vec<bool> = workload
                .windowed_load
                .iter()
                .zip(capacity_log.iter())
                .map(|(slice, &provided)| is_lag(slice.max_load, provided as i64))
                .collect();
            score += self.misc.common_fraction * self.perf_partition_eval(&common_lag_seq);
        }

        score / self.default_score.performance
    }

    /// L2 mean of per-partition lag counts. A recent-lag counter halves on
    /// every smooth quantum and sustained lag past the second level counts
    /// double.
    fn perf_partition_eval(&self, lag_seq: &[bool]) -> f64 {
        let partition_len = self.misc.perf_partition_len;
        let n_partition = lag_seq.len() / partition_len;
        if n_partition == 0 {
            return 0.0;
        }

        let mut period_lag_arr = Vec::with_capacity(n_partition);
        let mut cnt = 1usize;
        let mut period_lag_cnt: u64 = 0;
        let mut n_recent_lag: i64 = 0;
        for &is_lag in lag_seq {
            if cnt == partition_len {
                period_lag_arr.push(period_lag_cnt);
                period_lag_cnt = 0;
                cnt = 0;
            }
            if !is_lag {
                n_recent_lag >>= 1;
            }
            n_recent_lag = self.misc.seq_lag_max.min(n_recent_lag + is_lag as i64);
            period_lag_cnt += u64::from(n_recent_lag >= self.misc.seq_lag_l1);
            period_lag_cnt += u64::from(n_recent_lag >= self.misc.seq_lag_l2);
            cnt += 1;
        }

        let sum: u64 = period_lag_arr.iter().map(|&l| l * l).sum();
        ((sum / n_partition as u64) as f64).sqrt()
    }

    fn eval_battery_life(&self, power_log: &[u32], refs: &[u64]) -> f64 {
        let partitional = self.batt_partition_eval(power_log, refs);
        1.0 / (partitional * self.default_score.battery_life)
    }

    fn batt_partition_eval(&self, power_seq: &[u32], refs: &[u64]) -> f64 {
        let n_partition = power_seq.len() / self.misc.batt_partition_len;
        if n_partition == 0 || refs.is_empty() {
            return 1.0;
        }

        let partitions = self.batt_partitions(power_seq);
        let mut sum = 0.0;
        for (consumed, reference) in partitions.iter().zip(refs.iter()) {
            let ratio = *consumed as f64 / *reference as f64;
            sum += ratio * ratio;
        }
        (sum / n_partition as f64).sqrt()
    }

    fn batt_partitions(&self, power_seq: &[u32]) -> Vec<u64> {
        let partition_len = self.misc.batt_partition_len;
        let n_partition = power_seq.len() / partition_len;

        let mut period_power_arr = Vec::with_capacity(n_partition);
        let mut cnt = 1usize;
        let mut period_power_consumed: u64 = 0;
        for &power in power_seq {
            if cnt == partition_len {
                period_power_arr.push(period_power_consumed);
                period_power_consumed = 0;
                cnt = 0;
            }
            period_power_consumed += power as u64;
            cnt += 1;
        }
        period_power_arr
    }

    fn eval_idle_lasting(&self, idle_power_consumed: u64) -> f64 {
        1.0 / (idle_power_consumed as f64 * self.default_score.idle_lasting)
    }
}
