// SPDX-License-Identifier: GPL-2.0
//
// soctune: short-term override controllers. InputBoost raises cluster
// frequency floors for a fixed window after a touch event; UperfBoost
// swaps in a whole alternate tuning set while frames are in flight.

use crate::interactive::InteractiveTunables;
use crate::sim::{Boost, CpuEnv, Scheduler};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputBoostTunables {
    pub boost_freq: [i64; 2],
    pub duration_quantum: i64,
}

/// Raises each cluster's frequency floor on input and restores the model
/// floor once the boost window expires. Inert when `duration_quantum` is 0.
#[derive(Debug, Clone)]
pub struct InputBoost {
    tunables: InputBoostTunables,
    input_happened_quantum: i64,
    in_boost: bool,
}

impl InputBoost {
    pub fn new(tunables: InputBoostTunables) -> Self {
        InputBoost {
            tunables,
            input_happened_quantum: 0,
            in_boost: false,
        }
    }

    pub fn disabled() -> Self {
        Self::new(InputBoostTunables {
            boost_freq: [0, 0],
            duration_quantum: 0,
        })
    }
}

impl<S: Scheduler> Boost<S> for InputBoost {
    fn tick(&mut self, env: &mut CpuEnv, _sched: &mut S, has_input: bool, _has_render: bool, now: i64) {
        if has_input && self.tunables.duration_quantum > 0 {
            for (cluster, &freq) in env.clusters.iter_mut().zip(self.tunables.boost_freq.iter()) {
                cluster.set_min_freq(freq);
            }
            self.input_happened_quantum = now;
            self.in_boost = true;
            return;
        }

        if self.in_boost && now - self.input_happened_quantum > self.tunables.duration_quantum {
            for cluster in env.clusters.iter_mut() {
                let floor = cluster.model.min_freq;
                cluster.set_min_freq(floor);
            }
            self.in_boost = false;
        }
    }
}

/// Quanta without an event before UperfBoost restores the backup (200 ms).
const UPERF_EXIT_QUANTA: i64 = 20;

#[derive(Debug, Clone, PartialEq)]
pub struct UperfBoostTunables {
    pub min_freq: [i64; 2],
    pub max_freq: [i64; 2],
    pub sched_up: i64,
    pub sched_down: i64,
    /// Override governor parameters, little-to-big.
    pub governor: Vec<InteractiveTunables>,
}

#[derive(Debug, Clone)]
struct UperfBackup {
    cluster_limits: Vec<(i64, i64)>,
    sched_thresholds: (i64, i64),
    governors: Vec<InteractiveTunables>,
}

/// Applies per-cluster frequency clamps, scheduler migration thresholds and
/// governor overrides while input or render events keep arriving. The
/// pre-boost tunables are captured once, on the first boost entry, and
/// restored 20 quanta after the last event.
#[derive(Debug, Clone)]
pub struct UperfBoost {
    tunables: UperfBoostTunables,
    enabled: bool,
    in_boost: bool,
    last_event_quantum: i64,
    backup: Option<UperfBackup>,
}

impl UperfBoost {
    pub fn new(tunables: UperfBoostTunables) -> Self {
        UperfBoost {
            tunables,
            enabled: true,
            in_boost: false,
            last_event_quantum: 0,
            backup: None,
        }
    }

    pub fn disabled() -> Self {
        UperfBoost {
            tunables: UperfBoostTunables {
                min_freq: [0, 0],
                max_freq: [i64::MAX, i64::MAX],
                sched_up: 0,
                sched_down: 0,
                governor: Vec::new(),
            },
            enabled: false,
            in_boost: false,
            last_event_quantum: 0,
            backup: None,
        }
    }

    fn capture<S: Scheduler>(env: &CpuEnv, sched: &S) -> UperfBackup {
        UperfBackup {
            cluster_limits: env
                .clusters
                .iter()
                .map(|cl| (cl.min_freq_limit(), cl.max_freq_limit()))
                .collect(),
            sched_thresholds: sched.migration_thresholds(),
            governors: env.governors.iter().map(|g| *g.tunables()).collect(),
        }
    }

    fn apply<S: Scheduler>(&self, env: &mut CpuEnv, sched: &mut S) {
        for (idx, cluster) in env.clusters.iter_mut().enumerate().take(2) {
            cluster.set_max_freq(self.tunables.max_freq[idx]);
            cluster.set_min_freq(self.tunables.min_freq[idx]);
        }
        sched.set_migration_thresholds(self.tunables.sched_up, self.tunables.sched_down);
        for (governor, tunables) in env.governors.iter_mut().zip(self.tunables.governor.iter()) {
            governor.set_tunables(*tunables);
        }
    }

    fn restore<S: Scheduler>(&self, env: &mut CpuEnv, sched: &mut S, backup: &UperfBackup) {
        for (cluster, &(min, max)) in env.clusters.iter_mut().zip(backup.cluster_limits.iter()) {
            cluster.set_max_freq(max);
            cluster.set_min_freq(min);
        }
        let (up, down) = backup.sched_thresholds;
        sched.set_migration_thresholds(up, down);
        for (governor, tunables) in env.governors.iter_mut().zip(backup.governors.iter()) {
            governor.set_tunables(*tunables);
        }
    }
}

impl<S: Scheduler> Boost<S> for UperfBoost {
    fn tick(&mut self, env: &mut CpuEnv, sched: &mut S, has_input: bool, has_render: bool, now: i64) {
        if !self.enabled {
            return;
        }

        if has_input || has_render {
            if !self.in_boost {
                if self.backup.is_none() {
                    self.backup = Some(Self::capture(env, sched));
                }
                self.apply(env, sched);
                self.in_boost = true;
            }
            self.last_event_quantum = now;
            return;
        }

        if self.in_boost && now - self.last_event_quantum > UPERF_EXIT_QUANTA {
            if let Some(backup) = self.backup.clone() {
                self.restore(env, sched, &backup);
            }
            self.in_boost = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{dual_cluster_env, uperf_tunables, walt_tunables};
    use crate::walt::WaltHmp;

    #[test]
    fn input_boost_window_raises_and_restores_floor() {
        let mut env = dual_cluster_env();
        let mut sched = WaltHmp::new(walt_tunables(), &env);
        let mut boost = InputBoost::new(InputBoostTunables {
            boost_freq: [1200, 1800],
            duration_quantum: 50,
        });

        // 10 idle quanta, one input event, then idle again.
        for now in 0..10 {
            boost.tick(&mut env, &mut sched, false, false, now);
            assert_eq!(env.clusters[0].min_freq_limit(), env.clusters[0].model.min_freq);
        }
        boost.tick(&mut env, &mut sched, true, false, 10);
        for now in 11..=60 {
            assert_eq!(env.clusters[0].min_freq_limit(), 1200, "quantum {now}");
            assert_eq!(env.clusters[1].min_freq_limit(), 1800, "quantum {now}");
            boost.tick(&mut env, &mut sched, false, false, now);
        }
        // now - 10 > 50 at quantum 61: floor restored.
        boost.tick(&mut env, &mut sched, false, false, 61);
        assert_eq!(env.clusters[0].min_freq_limit(), env.clusters[0].model.min_freq);
        assert_eq!(env.clusters[1].min_freq_limit(), env.clusters[1].model.min_freq);
    }

    #[test]
    fn zero_duration_is_inert() {
        let mut env = dual_cluster_env();
        let mut sched = WaltHmp::new(walt_tunables(), &env);
        let mut boost = InputBoost::disabled();
        boost.tick(&mut env, &mut sched, true, false, 0);
        assert_eq!(env.clusters[0].min_freq_limit(), env.clusters[0].model.min_freq);
    }

    #[test]
    fn uperf_applies_and_restores_after_render_stops() {
        let mut env = dual_cluster_env();
        let mut sched = WaltHmp::new(walt_tunables(), &env);
        let tunables = uperf_tunables();
        let mut boost = UperfBoost::new(tunables.clone());

        let stock_thresholds = sched.migration_thresholds();
        let stock_governor = *env.governors[0].tunables();

        boost.tick(&mut env, &mut sched, false, true, 0);
        assert_eq!(env.clusters[0].min_freq_limit(), tunables.min_freq[0]);
        assert_eq!(env.clusters[1].max_freq_limit(), tunables.max_freq[1]);
        assert_eq!(sched.migration_thresholds(), (tunables.sched_up, tunables.sched_down));
        assert_eq!(env.governors[0].tunables(), &tunables.governor[0]);

        // Render events keep extending the exit timer.
        for now in 1..5 {
            boost.tick(&mut env, &mut sched, false, true, now);
        }
        for now in 5..25 {
            boost.tick(&mut env, &mut sched, false, false, now);
            assert_eq!(sched.migration_thresholds(), (tunables.sched_up, tunables.sched_down));
        }
        // 25 - 4 > 20: backup restored.
        boost.tick(&mut env, &mut sched, false, false, 25);
        assert_eq!(sched.migration_thresholds(), stock_thresholds);
        assert_eq!(env.governors[0].tunables(), &stock_governor);
        assert_eq!(env.clusters[0].min_freq_limit(), env.clusters[0].model.min_freq);
        assert_eq!(env.clusters[1].max_freq_limit(), env.clusters[1].model.max_freq);
    }

    #[test]
    fn uperf_backs_up_only_once() {
        let mut env = dual_cluster_env();
        let mut sched = WaltHmp::new(walt_tunables(), &env);
        let mut boost = UperfBoost::new(uperf_tunables());

        boost.tick(&mut env, &mut sched, true, false, 0);
        let first_backup = boost.backup.clone().unwrap();
        // Exit, then re-enter while boosted state is still applied elsewhere.
        boost.tick(&mut env, &mut sched, false, false, 30);
        boost.tick(&mut env, &mut sched, true, false, 31);
        let second_backup = boost.backup.clone().unwrap();
        assert_eq!(first_backup.sched_thresholds, second_backup.sched_thresholds);
        assert_eq!(first_backup.cluster_limits, second_backup.cluster_limits);
    }
}
