// SPDX-License-Identifier: GPL-2.0
//
// soctune: recorded workload traces — windowed per-core loads, render frames
// and input events, loaded from the capture tool's JSON format.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;

/// Per-quantum aggregate demand. Loads are absolute capacity units
/// (`pct * freq * efficiency * load_scale`), not percentages.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoadSlice {
    pub max_load: i64,
    pub load: [i64; 4],
    pub has_input_event: bool,
    pub has_render: bool,
}

/// One render frame, split across the (up to three) windows it overlaps.
/// `window_quantums` sums to `frame_quantum`.
#[derive(Debug, Clone, Copy, Default)]
pub struct RenderSlice {
    pub window_idxs: [usize; 3],
    pub window_quantums: [i64; 3],
    pub frame_load: i64,
}

#[derive(Debug, Clone)]
pub struct Workload {
    pub windowed_load: Vec<LoadSlice>,
    pub render_load: Vec<RenderSlice>,
    pub src: Vec<String>,
    pub quantum_sec: f64,
    pub window_quantum: i64,
    pub frame_quantum: i64,
    pub efficiency: i64,
    pub freq: i64,
    pub load_scale: i64,
    pub core_num: usize,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WorkloadFile {
    quantum_sec: f64,
    window_quantum: i64,
    frame_quantum: i64,
    efficiency: i64,
    freq: i64,
    load_scale: i64,
    core_num: usize,
    #[serde(default)]
    src: Vec<String>,
    render_load: Vec<Vec<i64>>,
    windowed_load: Vec<Vec<i64>>,
}

impl Workload {
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("cannot read workload {}", path.display()))?;
        Self::from_json(&raw).with_context(|| format!("malformed workload {}", path.display()))
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let file: WorkloadFile = serde_json::from_str(raw)?;
        if file.core_num == 0 || file.core_num > 4 {
            bail!("coreNum {} out of range 1..=4", file.core_num);
        }
        if file.window_quantum <= 0 || file.frame_quantum <= 0 {
            bail!("windowQuantum and frameQuantum must be positive");
        }
        if file.render_load.is_empty() {
            bail!("renderLoad is empty");
        }
        if file.windowed_load.is_empty() {
            bail!("windowedLoad is empty");
        }

        let loadpct_to_demand =
            |pct: i64| file.load_scale * file.freq * file.efficiency * pct;
        let next_win_q =
            |q: i64| (q / file.window_quantum + 1) * file.window_quantum;

        let mut render_load = Vec::with_capacity(file.render_load.len());
        for (idx, frame) in file.render_load.iter().enumerate() {
            if frame.len() != 2 {
                bail!("renderLoad[{idx}]: expected [begin_q, load_pct]");
            }
            let begin_q = frame[0];
            let end_q = begin_q + file.frame_quantum;
            let mut slice = RenderSlice {
                frame_load: loadpct_to_demand(frame[1]),
                ..Default::default()
            };
            let mut rec = 0;
            let mut left_q = begin_q;
            let mut right_q = next_win_q(begin_q);
            while left_q != right_q {
                if rec >= 3 {
                    bail!("renderLoad[{idx}]: frame spans more than 3 windows");
                }
                slice.window_idxs[rec] = (left_q / file.window_quantum) as usize;
                slice.window_quantums[rec] = right_q - left_q;
                left_q = right_q;
                right_q = end_q.min(next_win_q(right_q));
                rec += 1;
            }
            render_load.push(slice);
        }

        let n_windows = file.windowed_load.len();
        for (idx, frame) in render_load.iter().enumerate() {
            if frame.window_idxs.iter().any(|&w| w >= n_windows) {
                bail!("renderLoad[{idx}]: window index past end of windowedLoad");
            }
        }

        let has_render = |win_idx: usize| {
            render_load.iter().any(|r| {
                r.window_idxs
                    .iter()
                    .zip(r.window_quantums.iter())
                    .any(|(&w, &q)| q > 0 && w == win_idx)
            })
        };

        let mut windowed_load = Vec::with_capacity(n_windows);
        for (idx, row) in file.windowed_load.iter().enumerate() {
            if row.len() != file.core_num + 2 {
                bail!(
                    "windowedLoad[{idx}]: expected {} columns, got {}",
                    file.core_num + 2,
                    row.len()
                );
            }
            let mut slice = LoadSlice {
                max_load: loadpct_to_demand(row[0]),
                has_input_event: row[file.core_num + 1] != 0,
                has_render: has_render(idx),
                ..Default::default()
            };
            for core in 0..file.core_num {
                slice.load[core] = loadpct_to_demand(row[core + 1]);
            }
            windowed_load.push(slice);
        }

        Ok(Workload {
            windowed_load,
            render_load,
            src: file.src,
            quantum_sec: file.quantum_sec,
            window_quantum: file.window_quantum,
            frame_quantum: file.frame_quantum,
            efficiency: file.efficiency,
            freq: file.freq,
            load_scale: file.load_scale,
            core_num: file.core_num,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_trace(render: &str, windows: &str) -> String {
        format!(
            r#"{{
                "quantumSec": 0.01, "windowQuantum": 3, "frameQuantum": 6,
                "efficiency": 1000, "freq": 1000, "loadScale": 1, "coreNum": 2,
                "src": ["game.trace"],
                "renderLoad": {render},
                "windowedLoad": {windows}
            }}"#
        )
    }

    #[test]
    fn render_frames_split_across_windows() {
        let raw = raw_trace(
            "[[1, 50]]",
            "[[10, 10, 5, 0], [20, 15, 10, 1], [30, 20, 15, 0], [5, 5, 0, 0]]",
        );
        let w = Workload::from_json(&raw).unwrap();
        assert_eq!(w.quantum_sec, 0.01);
        assert_eq!(w.window_quantum, 3);
        assert_eq!((w.efficiency, w.freq, w.load_scale), (1000, 1000, 1));
        assert_eq!(w.core_num, 2);
        assert_eq!(w.src, vec!["game.trace".to_string()]);
        assert_eq!(w.render_load.len(), 1);
        let r = &w.render_load[0];
        // Frame [1, 7) over 3-quantum windows: [1,3) + [3,6) + [6,7).
        assert_eq!(r.window_idxs, [0, 1, 2]);
        assert_eq!(r.window_quantums, [2, 3, 1]);
        assert_eq!(r.window_quantums.iter().sum::<i64>(), w.frame_quantum);
        assert_eq!(r.frame_load, 1 * 1000 * 1000 * 50);

        assert!(w.windowed_load[0].has_render);
        assert!(w.windowed_load[1].has_render);
        assert!(w.windowed_load[2].has_render);
        assert!(!w.windowed_load[3].has_render);
        assert!(w.windowed_load[1].has_input_event);
        assert_eq!(w.windowed_load[1].load, [15_000_000, 10_000_000, 0, 0]);
    }

    #[test]
    fn empty_sections_are_fatal() {
        assert!(Workload::from_json(&raw_trace("[]", "[[10, 10, 5, 0]]")).is_err());
        assert!(Workload::from_json(&raw_trace("[[0, 50]]", "[]")).is_err());
    }

    #[test]
    fn render_past_trace_end_is_fatal() {
        let raw = raw_trace("[[9, 50]]", "[[10, 10, 5, 0], [20, 15, 10, 1]]");
        assert!(Workload::from_json(&raw).is_err());
    }

    #[test]
    fn short_rows_are_fatal() {
        let raw = raw_trace("[[0, 50]]", "[[10, 10, 5]]");
        assert!(Workload::from_json(&raw).is_err());
    }
}
