// SPDX-License-Identifier: GPL-2.0
//
// soctune: Interactive cpufreq governor model. Frequency choice follows the
// msm kernel's interactive governor: target-load bisection, hispeed jump,
// max-freq hysteresis and the min-sample-time floor guard.

use crate::cpu_model::Cluster;

pub const TARGET_LOAD_MAX_LEN: usize = 24;
pub const ABOVE_DELAY_MAX_LEN: usize = 32;

/// Per-cluster Interactive tunables. Times are in governor ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InteractiveTunables {
    pub hispeed_freq: i64,
    pub go_hispeed_load: i64,
    pub min_sample_time: i64,
    pub max_freq_hysteresis: i64,
    /// Hold time before rising through an opp, indexed by opp.
    pub above_hispeed_delay: [i64; ABOVE_DELAY_MAX_LEN],
    /// Target load percent per opp.
    pub target_loads: [i64; TARGET_LOAD_MAX_LEN],
}

#[derive(Debug, Clone)]
pub struct Interactive {
    tunables: InteractiveTunables,
    target_freq: i64,
    floor_freq: i64,
    max_freq_hyst_start_time: i64,
    hispeed_validate_time: i64,
    floor_validate_time: i64,
}

impl Interactive {
    pub fn new(tunables: InteractiveTunables, cluster: &Cluster) -> Self {
        Interactive {
            tunables,
            target_freq: cluster.model.max_freq,
            floor_freq: cluster.model.max_freq,
            max_freq_hyst_start_time: 0,
            hispeed_validate_time: 0,
            floor_validate_time: 0,
        }
    }

    pub fn tunables(&self) -> &InteractiveTunables {
        &self.tunables
    }

    /// Swap tunables in place, keeping governor state. Used by the boost
    /// controllers to override and later restore parameters mid-run.
    pub fn set_tunables(&mut self, tunables: InteractiveTunables) {
        self.tunables = tunables;
    }

    fn freq_to_targetload(&self, cluster: &Cluster, freq: i64) -> i64 {
        let idx = cluster.find_idx_floor(freq, 0).min(TARGET_LOAD_MAX_LEN - 1);
        self.tunables.target_loads[idx]
    }

    fn freq_to_above_hispeed_delay(&self, cluster: &Cluster, freq: i64) -> i64 {
        let idx = cluster.find_idx_floor(freq, 0).min(ABOVE_DELAY_MAX_LEN - 1);
        self.tunables.above_hispeed_delay[idx]
    }

    /// Converge on the lowest opp whose target load covers `load`, pinching
    /// the candidate window from both sides. Ties break toward the frequency
    /// we started from.
    fn choose_freq(&self, cluster: &Cluster, start_freq: i64, load: i64) -> i64 {
        let loadadjfreq = start_freq * load;
        let mut freq = start_freq;
        let mut freqmin = 0i64;
        let mut freqmax = i64::MAX;

        loop {
            let prevfreq = freq;
            let tl = self.freq_to_targetload(cluster, freq);
            freq = cluster.freq_floor_to_opp(loadadjfreq / tl);

            if freq > prevfreq {
                // The previous frequency is too low.
                freqmin = prevfreq;
                if freq >= freqmax {
                    freq = cluster.freq_ceiling_to_opp(freqmax - 1);
                    if freq == freqmin {
                        freq = freqmax;
                        break;
                    }
                }
            } else if freq < prevfreq {
                // The previous frequency is high enough.
                freqmax = prevfreq;
                if freq <= freqmin {
                    freq = cluster.freq_floor_to_opp(freqmin + 1);
                    if freq == freqmax {
                        break;
                    }
                }
            }

            if freq == prevfreq {
                break;
            }
        }

        freq
    }

    /// One governor tick with the observed busy percentage. Returns the
    /// committed target frequency, already snapped to the cluster's window.
    pub fn timer_tick(&mut self, cluster: &Cluster, load: i64, now: i64) -> i64 {
        let mut skip_hispeed_logic = false;
        let mut skip_min_sample_time = false;
        let mut jump_to_max_no_ts = false;

        let mut new_freq = self.choose_freq(cluster, self.target_freq, load);

        if now - self.max_freq_hyst_start_time < self.tunables.max_freq_hysteresis
            && load >= self.tunables.go_hispeed_load
        {
            skip_hispeed_logic = true;
            skip_min_sample_time = true;
            jump_to_max_no_ts = true;
        }

        if jump_to_max_no_ts {
            new_freq = cluster.model.max_freq;
        } else if !skip_hispeed_logic && load >= self.tunables.go_hispeed_load {
            if self.target_freq < self.tunables.hispeed_freq {
                new_freq = self.tunables.hispeed_freq;
            } else {
                new_freq = new_freq.max(self.tunables.hispeed_freq);
            }
        }

        if now - self.max_freq_hyst_start_time < self.tunables.max_freq_hysteresis {
            new_freq = new_freq.max(self.tunables.hispeed_freq);
        }

        if !skip_hispeed_logic
            && self.target_freq >= self.tunables.hispeed_freq
            && new_freq > self.target_freq
            && now - self.hispeed_validate_time
                < self.freq_to_above_hispeed_delay(cluster, self.target_freq)
        {
            return self.target_freq;
        }

        self.hispeed_validate_time = now;

        new_freq = cluster.freq_floor_to_opp(new_freq);

        // Do not scale below floor_freq unless we have dwelt at or above it
        // for min_sample_time since last validated.
        if !skip_min_sample_time
            && new_freq < self.floor_freq
            && now - self.floor_validate_time < self.tunables.min_sample_time
        {
            return self.target_freq;
        }

        if !jump_to_max_no_ts {
            self.floor_freq = new_freq;
            self.floor_validate_time = now;
        }

        if new_freq >= cluster.model.max_freq && !jump_to_max_no_ts {
            self.max_freq_hyst_start_time = now;
        }

        self.target_freq = new_freq;
        self.target_freq
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu_model::{ClusterModel, OppEntry};

    fn cluster() -> Cluster {
        Cluster::new(ClusterModel {
            min_freq: 600,
            max_freq: 1400,
            efficiency: 1000,
            core_num: 4,
            opp_table: vec![
                OppEntry { freq: 600, core_power: 50, cluster_power: 10 },
                OppEntry { freq: 800, core_power: 70, cluster_power: 15 },
                OppEntry { freq: 1000, core_power: 90, cluster_power: 20 },
                OppEntry { freq: 1400, core_power: 150, cluster_power: 40 },
            ],
        })
    }

    fn tunables() -> InteractiveTunables {
        InteractiveTunables {
            hispeed_freq: 1000,
            go_hispeed_load: 90,
            min_sample_time: 2,
            max_freq_hysteresis: 2,
            above_hispeed_delay: [1; ABOVE_DELAY_MAX_LEN],
            target_loads: [90; TARGET_LOAD_MAX_LEN],
        }
    }

    #[test]
    fn choose_freq_converges_to_target_load() {
        let cl = cluster();
        let gov = Interactive::new(tunables(), &cl);
        // 1400 MHz at 30% busy carries 420 MHz of work; 90% target load
        // wants the lowest opp >= 466 MHz.
        assert_eq!(gov.choose_freq(&cl, 1400, 30), 600);
        // 90% busy at 600 keeps 600 busy at exactly the target.
        assert_eq!(gov.choose_freq(&cl, 600, 90), 600);
        assert_eq!(gov.choose_freq(&cl, 600, 100), 800);
    }

    #[test]
    fn floor_guard_holds_descent() {
        let cl = cluster();
        let mut gov = Interactive::new(tunables(), &cl);
        // Sustained heavy load keeps the cluster at max; the tick at now=2
        // falls outside the initial hysteresis window and validates the floor.
        for now in 0..3 {
            assert_eq!(gov.timer_tick(&cl, 95, now), 1400);
        }
        // Load vanishes. min_sample_time holds the floor for one more tick,
        // then the governor is free to descend.
        assert_eq!(gov.timer_tick(&cl, 5, 3), 1400);
        assert_eq!(gov.timer_tick(&cl, 5, 4), 600);
    }

    #[test]
    fn hispeed_jump_on_heavy_load() {
        let cl = cluster();
        let mut gov = Interactive::new(tunables(), &cl);
        // Walk the governor down to idle first, past hysteresis and floor.
        let mut now = 10;
        for _ in 0..4 {
            gov.timer_tick(&cl, 5, now);
            now += 1;
        }
        assert_eq!(gov.target_freq, 600);
        // Heavy load from below hispeed jumps straight to hispeed_freq.
        let jumped = gov.timer_tick(&cl, 95, now);
        assert_eq!(jumped, 1000);
    }
}
