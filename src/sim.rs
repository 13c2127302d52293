// SPDX-License-Identifier: GPL-2.0
//
// soctune: time-quantized simulation driver. Each evaluation owns a fresh
// CpuEnv (clusters + governors), a scheduler and a boost controller; the
// four flavors pair them statically so the per-quantum loop monomorphizes.

use anyhow::{bail, Result};

use crate::boost::{InputBoost, UperfBoost};
use crate::cpu_model::{SchedType, Soc};
use crate::interactive::{Interactive, InteractiveTunables};
use crate::pelt::{PeltHmp, PeltTunables};
use crate::walt::{WaltHmp, WaltTunables};
use crate::workload::Workload;

pub use crate::boost::{InputBoostTunables, UperfBoostTunables};
use crate::cpu_model::Cluster;

/// Mutable per-evaluation arena: cluster state plus the little/big governor
/// pair. Governors address clusters by index for the duration of one tick.
#[derive(Debug, Clone)]
pub struct CpuEnv {
    pub clusters: Vec<Cluster>,
    pub governors: Vec<Interactive>,
}

impl CpuEnv {
    pub fn new(soc: &Soc, governor_tunables: &[InteractiveTunables]) -> Self {
        let clusters = soc.clusters.clone();
        let little = &clusters[0];
        let big = &clusters[clusters.len() - 1];
        let mut governors = vec![Interactive::new(governor_tunables[0], little)];
        if clusters.len() > 1 {
            let big_tunables = governor_tunables[governor_tunables.len() - 1];
            governors.push(Interactive::new(big_tunables, big));
        }
        CpuEnv { clusters, governors }
    }
}

/// Cluster-selection and frequency-clocking contract shared by the WALT and
/// PELT variants.
pub trait Scheduler {
    fn scheduler_tick(&mut self, env: &mut CpuEnv, max_load: i64, loads: &[i64; 4], now: i64) -> i64;
    fn calc_power(&self, env: &CpuEnv, loads: &[i64; 4]) -> i64;
    fn calc_power_for_idle(&self, env: &CpuEnv, loads: &[i64; 4]) -> i64;
    fn active_idx(&self) -> usize;
    /// `(up, down)` in the variant's native units.
    fn migration_thresholds(&self) -> (i64, i64);
    fn set_migration_thresholds(&mut self, up: i64, down: i64);
}

/// Short-term override contract: observes input/render edges each quantum.
pub trait Boost<S: Scheduler> {
    fn tick(&mut self, env: &mut CpuEnv, sched: &mut S, has_input: bool, has_render: bool, now: i64);
}

#[derive(Debug, Clone, Default)]
pub struct SimResult {
    pub capacity: Vec<u32>,
    pub power: Vec<u32>,
}

#[derive(Debug, Clone, Default)]
pub struct SimResultPack {
    pub onscreen: SimResult,
    pub offscreen_pwr: u64,
}

/// Constant baseline draw, in mW.
#[derive(Debug, Clone, Copy)]
pub struct SimMisc {
    pub working_base_mw: i64,
    pub idle_base_mw: i64,
}

/// The four supported governor/scheduler/boost products.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimFlavor {
    /// Interactive + WALT + InputBoost.
    QcomBL,
    /// Interactive + PELT + InputBoost.
    BL,
    /// Interactive + WALT + UperfBoost.
    QcomUp,
    /// Interactive + PELT + UperfBoost.
    Up,
}

impl SimFlavor {
    pub fn select(sched_type: SchedType, use_uperf: bool) -> Result<SimFlavor> {
        match (sched_type, use_uperf) {
            (SchedType::Walt, false) => Ok(SimFlavor::QcomBL),
            (SchedType::Pelt, false) => Ok(SimFlavor::BL),
            (SchedType::Walt, true) => Ok(SimFlavor::QcomUp),
            (SchedType::Pelt, true) => Ok(SimFlavor::Up),
            (SchedType::Legacy, _) => bail!("legacy sched_type is not supported"),
        }
    }

    pub fn is_walt(self) -> bool {
        matches!(self, SimFlavor::QcomBL | SimFlavor::QcomUp)
    }

    pub fn is_uperf(self) -> bool {
        matches!(self, SimFlavor::QcomUp | SimFlavor::Up)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SchedTunables {
    Walt(WaltTunables),
    Pelt(PeltTunables),
}

#[derive(Debug, Clone, PartialEq)]
pub enum BoostTunables {
    Input(InputBoostTunables),
    Uperf(UperfBoostTunables),
}

/// Genome-decoded parameter bundle for one evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct Tunables {
    /// Per-cluster governor parameters, little-to-big.
    pub governor: Vec<InteractiveTunables>,
    pub sched: SchedTunables,
    pub boost: BoostTunables,
}

impl Tunables {
    pub fn walt(&self) -> &WaltTunables {
        match &self.sched {
            SchedTunables::Walt(t) => t,
            SchedTunables::Pelt(_) => panic!("not a WALT tunable bundle"),
        }
    }

    pub fn pelt(&self) -> &PeltTunables {
        match &self.sched {
            SchedTunables::Pelt(t) => t,
            SchedTunables::Walt(_) => panic!("not a PELT tunable bundle"),
        }
    }

    pub fn timer_rate(&self) -> i64 {
        match &self.sched {
            SchedTunables::Walt(t) => t.timer_rate,
            SchedTunables::Pelt(t) => t.timer_rate,
        }
    }
}

/// Run one full on-screen + off-screen simulation of `tunables` against the
/// SoC. The flavor must agree with the tunable bundle's variants.
pub fn run_sim(
    flavor: SimFlavor,
    tunables: &Tunables,
    soc: &Soc,
    workload: &Workload,
    idleload: &Workload,
    misc: SimMisc,
) -> Result<SimResultPack> {
    let env = CpuEnv::new(soc, &tunables.governor);
    match (flavor, &tunables.sched, &tunables.boost) {
        (SimFlavor::QcomBL, SchedTunables::Walt(st), BoostTunables::Input(bt)) => {
            let sched = WaltHmp::new(st.clone(), &env);
            let boost = input_boost_for(soc, bt);
            Ok(simulate(env, sched, boost, workload, idleload, misc))
        }
        (SimFlavor::BL, SchedTunables::Pelt(st), BoostTunables::Input(bt)) => {
            let sched = PeltHmp::new(st.clone(), &env);
            let boost = input_boost_for(soc, bt);
            Ok(simulate(env, sched, boost, workload, idleload, misc))
        }
        (SimFlavor::QcomUp, SchedTunables::Walt(st), BoostTunables::Uperf(bt)) => {
            let sched = WaltHmp::new(st.clone(), &env);
            let boost = uperf_boost_for(soc, bt);
            Ok(simulate(env, sched, boost, workload, idleload, misc))
        }
        (SimFlavor::Up, SchedTunables::Pelt(st), BoostTunables::Uperf(bt)) => {
            let sched = PeltHmp::new(st.clone(), &env);
            let boost = uperf_boost_for(soc, bt);
            Ok(simulate(env, sched, boost, workload, idleload, misc))
        }
        _ => bail!("tunable bundle does not match simulator flavor {flavor:?}"),
    }
}

fn input_boost_for(soc: &Soc, tunables: &InputBoostTunables) -> InputBoost {
    if soc.input_boost {
        InputBoost::new(*tunables)
    } else {
        InputBoost::disabled()
    }
}

fn uperf_boost_for(soc: &Soc, tunables: &UperfBoostTunables) -> UperfBoost {
    if soc.input_boost {
        UperfBoost::new(tunables.clone())
    } else {
        UperfBoost::disabled()
    }
}

fn simulate<S: Scheduler, B: Boost<S>>(
    mut env: CpuEnv,
    mut sched: S,
    mut boost: B,
    workload: &Workload,
    idleload: &Workload,
    misc: SimMisc,
) -> SimResultPack {
    let base_pwr = misc.working_base_mw * 100;
    let idle_base_pwr = misc.idle_base_mw * 100;

    let mut rp = SimResultPack::default();
    rp.onscreen.capacity.reserve(workload.windowed_load.len());
    rp.onscreen.power.reserve(workload.windowed_load.len());

    let mut quantum: i64 = 0;
    let mut capacity = env.clusters[0].calc_capacity();

    // On-screen: log per-quantum provided capacity and power draw.
    for slice in &workload.windowed_load {
        let max_load = slice.max_load.min(capacity);
        let loads = adapt_loads(&slice.load, capacity);

        rp.onscreen.capacity.push(capacity as u32);
        rp.onscreen.power.push((base_pwr + sched.calc_power(&env, &loads)) as u32);

        boost.tick(&mut env, &mut sched, slice.has_input_event, slice.has_render, quantum);
        capacity = sched.scheduler_tick(&mut env, max_load, &loads, quantum);
        quantum += 1;
    }

    // Off-screen: only the energy total matters, jank is not assessed.
    rp.offscreen_pwr = idle_base_pwr as u64 * idleload.windowed_load.len() as u64;
    for slice in &idleload.windowed_load {
        let max_load = slice.max_load.min(capacity);
        let loads = adapt_loads(&slice.load, capacity);

        rp.offscreen_pwr += sched.calc_power_for_idle(&env, &loads) as u64;

        boost.tick(&mut env, &mut sched, slice.has_input_event, slice.has_render, quantum);
        capacity = sched.scheduler_tick(&mut env, max_load, &loads, quantum);
        quantum += 1;
    }

    rp
}

/// The simulator cannot consume more demand than the capacity on offer.
fn adapt_loads(loads: &[i64; 4], capacity: i64) -> [i64; 4] {
    let mut adapted = *loads;
    for load in adapted.iter_mut() {
        *load = (*load).min(capacity);
    }
    adapted
}
