// SPDX-License-Identifier: GPL-2.0
//
// soctune: shared fixtures for unit tests — small SoCs, synthetic traces
// and baseline tunable bundles.

use crate::boost::UperfBoostTunables;
use crate::codec::{self, ParamRange, ParamRangeCfg};
use crate::cpu_model::{Cluster, ClusterModel, IntraType, OppEntry, SchedType, Soc};
use crate::interactive::{
    InteractiveTunables, ABOVE_DELAY_MAX_LEN, TARGET_LOAD_MAX_LEN,
};
use crate::pelt::PeltTunables;
use crate::rank::RankMisc;
use crate::sim::{CpuEnv, SimFlavor, SimMisc, Tunables};
use crate::walt::{WaltTunables, WindowStatsPolicy};
use crate::workload::{LoadSlice, RenderSlice, Workload};

fn cluster(
    min_freq: i64,
    max_freq: i64,
    efficiency: i64,
    opp: &[(i64, i64, i64)],
) -> Cluster {
    Cluster::new(ClusterModel {
        min_freq,
        max_freq,
        efficiency,
        core_num: 4,
        opp_table: opp
            .iter()
            .map(|&(freq, core_power, cluster_power)| OppEntry {
                freq,
                core_power,
                cluster_power,
            })
            .collect(),
    })
}

pub fn single_cluster_soc() -> Soc {
    Soc {
        name: "uni".to_string(),
        clusters: vec![cluster(
            600,
            1400,
            1000,
            &[(600, 50, 10), (1000, 90, 20), (1400, 150, 40)],
        )],
        sched_type: SchedType::Walt,
        intra_type: IntraType::Smp,
        input_boost: true,
        enough_capacity_pct: 110.0,
    }
}

pub fn two_cluster_soc() -> Soc {
    Soc {
        name: "duo".to_string(),
        clusters: vec![
            cluster(
                600,
                1500,
                1000,
                &[(600, 40, 10), (900, 60, 15), (1200, 90, 20), (1500, 140, 30)],
            ),
            cluster(
                1100,
                2400,
                1740,
                &[(1100, 150, 20), (1400, 220, 30), (1800, 350, 40), (2400, 560, 60)],
            ),
        ],
        sched_type: SchedType::Walt,
        intra_type: IntraType::Smp,
        input_boost: true,
        enough_capacity_pct: 110.0,
    }
}

pub fn interactive_tunables(hispeed_freq: i64) -> InteractiveTunables {
    InteractiveTunables {
        hispeed_freq,
        go_hispeed_load: 90,
        min_sample_time: 2,
        max_freq_hysteresis: 2,
        above_hispeed_delay: [1; ABOVE_DELAY_MAX_LEN],
        target_loads: [90; TARGET_LOAD_MAX_LEN],
    }
}

pub fn walt_tunables() -> WaltTunables {
    WaltTunables {
        timer_rate: 2,
        sched_upmigrate: 80,
        sched_downmigrate: 20,
        sched_ravg_hist_size: 5,
        sched_window_stats_policy: WindowStatsPolicy::Recent,
        sched_freq_aggregate_threshold_pct: 1000,
    }
}

pub fn pelt_tunables() -> PeltTunables {
    PeltTunables {
        timer_rate: 2,
        up_threshold: 640,
        down_threshold: 480,
        load_avg_period_ms: 128,
        boost: 0,
    }
}

pub fn uperf_tunables() -> UperfBoostTunables {
    UperfBoostTunables {
        min_freq: [900, 1400],
        max_freq: [1500, 2400],
        sched_up: 90,
        sched_down: 30,
        governor: vec![interactive_tunables(1200), interactive_tunables(1800)],
    }
}

pub fn dual_cluster_env() -> CpuEnv {
    let soc = two_cluster_soc();
    CpuEnv::new(&soc, &[interactive_tunables(900), interactive_tunables(1400)])
}

pub fn sim_misc() -> SimMisc {
    SimMisc {
        working_base_mw: 800,
        idle_base_mw: 20,
    }
}

pub fn rank_misc() -> RankMisc {
    RankMisc {
        render_fraction: 1.0,
        common_fraction: 0.0,
        complexity_fraction: 0.0,
        perf_partition_len: 5,
        seq_lag_l1: 1,
        seq_lag_l2: 3,
        seq_lag_max: 16,
        batt_partition_len: 10,
    }
}

pub fn default_tunables_for(soc: &Soc, flavor: SimFlavor) -> Tunables {
    codec::default_tunables(soc, flavor)
}

pub fn param_range_cfg() -> ParamRangeCfg {
    let range = |min, max| ParamRange { min, max };
    ParamRangeCfg {
        above_hispeed_delay: range(1, 10),
        go_hispeed_load: range(50, 99),
        max_freq_hysteresis: range(1, 10),
        min_sample_time: range(1, 10),
        target_loads: range(40, 95),
        sched_downmigrate: range(40, 90),
        sched_upmigrate: range(50, 95),
        sched_freq_aggregate_threshold_pct: range(25, 1000),
        sched_ravg_hist_size: range(1, 5),
        sched_window_stats_policy: range(0, 3),
        timer_rate: range(1, 5),
        input_duration: range(10, 300),
        down_threshold: Some(range(200, 700)),
        up_threshold: Some(range(300, 900)),
        load_avg_period_ms: Some(range(32, 256)),
        sched_boost: Some(range(0, 1)),
    }
}

fn render_frames(burst_windows: &[usize], n_windows: usize, load_pct: i64, scale: i64) -> Vec<RenderSlice> {
    // window_quantum 3, frame_quantum 6: a frame starting on a window
    // boundary covers that window and the next.
    burst_windows
        .iter()
        .filter(|&&w| w + 1 < n_windows)
        .map(|&w| RenderSlice {
            window_idxs: [w, w + 1, 0],
            window_quantums: [3, 3, 0],
            frame_load: load_pct * scale,
        })
        .collect()
}

fn trace(windows: Vec<LoadSlice>, render: Vec<RenderSlice>) -> Workload {
    Workload {
        windowed_load: windows,
        render_load: render,
        src: vec!["synthetic".to_string()],
        quantum_sec: 0.01,
        window_quantum: 3,
        frame_quantum: 6,
        efficiency: 1000,
        freq: 1500,
        load_scale: 1,
        core_num: 4,
    }
}

/// Uniform load at `pct` percent. With `with_render`, one frame starts on
/// every fifth window.
pub fn flat_workload(n_windows: usize, pct: i64, with_render: bool) -> Workload {
    let scale = 1500 * 1000;
    let slice = LoadSlice {
        max_load: pct * scale,
        load: [pct * scale, pct * scale / 2, pct * scale / 4, 0],
        has_input_event: false,
        has_render: false,
    };
    let mut windows = vec![slice; n_windows];
    let render = if with_render {
        let starts: Vec<usize> = (0..n_windows).step_by(5).collect();
        let frames = render_frames(&starts, n_windows, pct, scale);
        for frame in &frames {
            windows[frame.window_idxs[0]].has_render = true;
            windows[frame.window_idxs[1]].has_render = true;
        }
        frames
    } else {
        Vec::new()
    };
    trace(windows, render)
}

/// Mostly idle trace with a saturating burst and render frame every tenth
/// window. Guarantees some frames land on windows where the governor has
/// already descended, so the default score has nonzero lag.
pub fn bursty_workload(n_windows: usize) -> Workload {
    let scale = 1500 * 1000;
    let mut windows = Vec::with_capacity(n_windows);
    let mut bursts = Vec::new();
    for idx in 0..n_windows {
        let pct = if idx % 10 == 9 {
            bursts.push(idx);
            100
        } else {
            5
        };
        windows.push(LoadSlice {
            max_load: pct * scale,
            load: [pct * scale, 0, 0, 0],
            has_input_event: false,
            has_render: false,
        });
    }
    let frames = render_frames(&bursts, n_windows, 100, scale);
    for frame in &frames {
        windows[frame.window_idxs[0]].has_render = true;
        windows[frame.window_idxs[1]].has_render = true;
    }
    trace(windows, frames)
}
