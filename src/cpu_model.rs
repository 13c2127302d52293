// SPDX-License-Identifier: GPL-2.0
//
// soctune: CPU model — per-cluster opp tables, frequency windows, power and
// capacity arithmetic, and the SoC model file loader.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;

/// One operating performance point: frequency in MHz, powers in mW.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OppEntry {
    pub freq: i64,
    pub core_power: i64,
    pub cluster_power: i64,
}

/// Immutable description of one CPU cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterModel {
    pub min_freq: i64,
    pub max_freq: i64,
    /// IPC scale relative to a reference core.
    pub efficiency: i64,
    pub core_num: usize,
    /// Sorted ascending by frequency.
    pub opp_table: Vec<OppEntry>,
}

/// Mutable cluster state during a simulation run. The three opp indices hold
/// `min_opp_idx <= cur_opp_idx <= max_opp_idx` at all times.
#[derive(Debug, Clone)]
pub struct Cluster {
    pub model: ClusterModel,
    pub cur_freq: i64,
    pub busy_pct: i64,
    min_opp_idx: usize,
    max_opp_idx: usize,
    cur_opp_idx: usize,
}

impl Cluster {
    pub fn new(model: ClusterModel) -> Self {
        let mut cluster = Cluster {
            cur_freq: model.opp_table[0].freq,
            busy_pct: 0,
            min_opp_idx: 0,
            max_opp_idx: model.opp_table.len() - 1,
            cur_opp_idx: 0,
            model,
        };
        cluster.set_min_freq(cluster.model.min_freq);
        cluster.set_max_freq(cluster.model.max_freq);
        cluster.set_cur_freq(cluster.model.max_freq);
        cluster
    }

    /// Index of the lowest opp at or above `freq`, scanning from `start_idx`
    /// over the whole table. Saturates at the last opp.
    pub fn find_idx_floor(&self, freq: i64, start_idx: usize) -> usize {
        let mut i = start_idx;
        let uplimit = self.model.opp_table.len() - 1;
        while i < uplimit && self.model.opp_table[i].freq < freq {
            i += 1;
        }
        i
    }

    fn freq_floor_to_idx(&self, freq: i64) -> usize {
        let mut i = self.min_opp_idx;
        while i < self.max_opp_idx && self.model.opp_table[i].freq < freq {
            i += 1;
        }
        i
    }

    fn freq_ceiling_to_idx(&self, freq: i64) -> usize {
        let mut i = self.min_opp_idx + 1;
        while i <= self.max_opp_idx && self.model.opp_table[i].freq <= freq {
            i += 1;
        }
        i - 1
    }

    /// Lowest opp frequency >= `freq` inside the `[min, max]` window.
    pub fn freq_floor_to_opp(&self, freq: i64) -> i64 {
        self.model.opp_table[self.freq_floor_to_idx(freq)].freq
    }

    /// Highest opp frequency <= `freq` inside the `[min, max]` window.
    pub fn freq_ceiling_to_opp(&self, freq: i64) -> i64 {
        self.model.opp_table[self.freq_ceiling_to_idx(freq)].freq
    }

    pub fn set_min_freq(&mut self, freq: i64) {
        self.min_opp_idx = self.find_idx_floor(freq, 0).min(self.max_opp_idx);
        if self.cur_freq < freq {
            self.set_cur_freq(freq);
        }
    }

    pub fn set_max_freq(&mut self, freq: i64) {
        let mut i = self.min_opp_idx;
        while i < self.model.opp_table.len() - 1 && self.model.opp_table[i + 1].freq <= freq {
            i += 1;
        }
        self.max_opp_idx = i;
        if self.cur_opp_idx > self.max_opp_idx {
            self.cur_opp_idx = self.max_opp_idx;
            self.cur_freq = self.model.opp_table[self.cur_opp_idx].freq;
        }
    }

    pub fn set_cur_freq(&mut self, freq: i64) {
        self.cur_opp_idx = self.freq_floor_to_idx(freq);
        self.cur_freq = self.model.opp_table[self.cur_opp_idx].freq;
    }

    /// Effective floor frequency after clamping.
    pub fn min_freq_limit(&self) -> i64 {
        self.model.opp_table[self.min_opp_idx].freq
    }

    /// Effective ceiling frequency after clamping.
    pub fn max_freq_limit(&self) -> i64 {
        self.model.opp_table[self.max_opp_idx].freq
    }

    /// Instantaneous power draw at the current opp, given per-core busy
    /// percentages. The cluster term carries the same x100 percent scale as
    /// the core term.
    pub fn calc_power(&self, load_pcts: &[i64; 4]) -> i64 {
        let opp = &self.model.opp_table[self.cur_opp_idx];
        let mut pct_sum = 0;
        for &pct in load_pcts.iter().take(self.model.core_num) {
            pct_sum += pct;
        }
        opp.cluster_power * 100 + opp.core_power * pct_sum
    }

    /// Aggregate computational rate currently provided.
    pub fn calc_capacity(&self) -> i64 {
        self.cur_freq * self.model.efficiency * 100
    }

    /// Convert an absolute load demand into a busy percentage at the current
    /// frequency, clamped to [0, 100].
    pub fn busy_pct_of_load(&self, load: i64) -> i64 {
        (load / (self.cur_freq * self.model.efficiency)).clamp(0, 100)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedType {
    Walt,
    Pelt,
    Legacy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntraType {
    Smp,
    Asmp,
}

/// A SoC: clusters in little-to-big order plus scheduling traits.
#[derive(Debug, Clone)]
pub struct Soc {
    pub name: String,
    pub clusters: Vec<Cluster>,
    pub sched_type: SchedType,
    pub intra_type: IntraType,
    pub input_boost: bool,
    /// Percent of big-cluster capacity above which unmet demand no longer
    /// counts as jank.
    pub enough_capacity_pct: f64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SocFile {
    name: String,
    enough_capacity_pct: f64,
    sched: SchedType,
    intra: IntraType,
    #[serde(default = "default_input_boost")]
    input_boost: bool,
    cluster: Vec<ClusterFile>,
}

fn default_input_boost() -> bool {
    true
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClusterFile {
    core_num: usize,
    efficiency: i64,
    min_freq: i64,
    max_freq: i64,
    opp: Vec<i64>,
    core_power: Vec<i64>,
    cluster_power: Vec<i64>,
}

impl Soc {
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("cannot read SoC model {}", path.display()))?;
        Self::from_json(&raw).with_context(|| format!("malformed SoC model {}", path.display()))
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let file: SocFile = serde_json::from_str(raw)?;
        if file.cluster.is_empty() {
            bail!("SoC has no clusters");
        }
        let mut clusters = Vec::with_capacity(file.cluster.len());
        for (idx, cl) in file.cluster.iter().enumerate() {
            if cl.opp.is_empty() {
                bail!("cluster {idx}: empty opp table");
            }
            if cl.opp.len() != cl.core_power.len() || cl.opp.len() != cl.cluster_power.len() {
                bail!("cluster {idx}: opp/corePower/clusterPower length mismatch");
            }
            if !cl.opp.windows(2).all(|w| w[0] < w[1]) {
                bail!("cluster {idx}: opp frequencies must be strictly increasing");
            }
            if cl.core_num == 0 || cl.core_num > 4 {
                bail!("cluster {idx}: coreNum {} out of range 1..=4", cl.core_num);
            }
            let opp_table = cl
                .opp
                .iter()
                .zip(cl.core_power.iter())
                .zip(cl.cluster_power.iter())
                .map(|((&freq, &core_power), &cluster_power)| OppEntry {
                    freq,
                    core_power,
                    cluster_power,
                })
                .collect();
            clusters.push(Cluster::new(ClusterModel {
                min_freq: cl.min_freq,
                max_freq: cl.max_freq,
                efficiency: cl.efficiency,
                core_num: cl.core_num,
                opp_table,
            }));
        }
        Ok(Soc {
            name: file.name,
            clusters,
            sched_type: file.sched,
            intra_type: file.intra,
            input_boost: file.input_boost,
            enough_capacity_pct: file.enough_capacity_pct,
        })
    }

    pub fn big_idx(&self) -> usize {
        self.clusters.len() - 1
    }

    pub fn little(&self) -> &Cluster {
        &self.clusters[0]
    }

    pub fn big(&self) -> &Cluster {
        &self.clusters[self.big_idx()]
    }

    /// Demand above this is unmeetable-by-policy and does not count as lag.
    pub fn enough_capacity(&self) -> i64 {
        let big = self.big();
        ((big.model.max_freq * big.model.efficiency) as f64 * self.enough_capacity_pct) as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn test_model(min_freq: i64, max_freq: i64) -> ClusterModel {
        ClusterModel {
            min_freq,
            max_freq,
            efficiency: 1000,
            core_num: 4,
            opp_table: vec![
                OppEntry { freq: 600, core_power: 50, cluster_power: 10 },
                OppEntry { freq: 1000, core_power: 90, cluster_power: 20 },
                OppEntry { freq: 1400, core_power: 150, cluster_power: 40 },
            ],
        }
    }

    #[test]
    fn opp_floor_clamps_into_table() {
        let cl = Cluster::new(test_model(600, 1400));
        for f in [0, 599, 600, 601, 999, 1000, 1200, 1400, 9999] {
            let opp = cl.freq_floor_to_opp(f);
            assert!(cl.model.opp_table.iter().any(|o| o.freq == opp));
            if f <= cl.model.max_freq {
                assert!(opp >= f.min(600), "floor({f}) = {opp}");
            }
            assert!(opp >= cl.min_freq_limit() && opp <= cl.max_freq_limit());
        }
        assert_eq!(cl.freq_floor_to_opp(601), 1000);
        assert_eq!(cl.freq_ceiling_to_opp(999), 600);
        assert_eq!(cl.freq_ceiling_to_opp(1400), 1400);
    }

    #[test]
    fn min_freq_pushes_current_up() {
        let mut cl = Cluster::new(test_model(600, 1400));
        cl.set_cur_freq(600);
        assert_eq!(cl.cur_freq, 600);
        cl.set_min_freq(1000);
        assert_eq!(cl.cur_freq, 1000);
        assert_eq!(cl.min_freq_limit(), 1000);
        // Restoring the floor does not drop the current frequency.
        cl.set_min_freq(600);
        assert_eq!(cl.cur_freq, 1000);
    }

    #[test]
    fn max_freq_pushes_current_down() {
        let mut cl = Cluster::new(test_model(600, 1400));
        assert_eq!(cl.cur_freq, 1400);
        cl.set_max_freq(1000);
        assert_eq!(cl.cur_freq, 1000);
        assert_eq!(cl.max_freq_limit(), 1000);
        cl.set_max_freq(1400);
        assert_eq!(cl.cur_freq, 1000);
        // The floor search now stops at the restored ceiling.
        assert_eq!(cl.freq_floor_to_opp(2000), 1400);
    }

    #[test]
    fn power_and_capacity() {
        let mut cl = Cluster::new(test_model(600, 1400));
        cl.set_cur_freq(1000);
        assert_eq!(cl.calc_capacity(), 1000 * 1000 * 100);
        let pcts = [50, 50, 0, 0];
        assert_eq!(cl.calc_power(&pcts), 20 * 100 + 90 * 100);
        assert_eq!(cl.busy_pct_of_load(cl.calc_capacity() / 2), 50);
        assert_eq!(cl.busy_pct_of_load(i64::MAX / (1000 * 1000)), 100);
    }

    #[test]
    fn soc_model_parses() {
        let raw = r#"{
            "name": "sdm660",
            "enoughCapacityPct": 1.1,
            "sched": "walt",
            "intra": "smp",
            "cluster": [
                {"coreNum": 4, "efficiency": 1024, "minFreq": 633, "maxFreq": 1843,
                 "opp": [633, 1113, 1843], "corePower": [30, 70, 160], "clusterPower": [9, 14, 30]},
                {"coreNum": 4, "efficiency": 1740, "minFreq": 1113, "maxFreq": 2208,
                 "opp": [1113, 1747, 2208], "corePower": [120, 280, 560], "clusterPower": [20, 30, 50]}
            ]
        }"#;
        let soc = Soc::from_json(raw).unwrap();
        assert_eq!(soc.name, "sdm660");
        assert_eq!(soc.sched_type, SchedType::Walt);
        assert_eq!(soc.intra_type, IntraType::Smp);
        assert_eq!(soc.clusters.len(), 2);
        assert_eq!(soc.little().model.max_freq, 1843);
        assert_eq!(soc.big().model.max_freq, 2208);
        assert!(soc.input_boost);
        assert_eq!(soc.enough_capacity(), (2208f64 * 1740.0 * 1.1) as i64);
    }

    #[test]
    fn soc_model_rejects_unsorted_opp() {
        let raw = r#"{
            "name": "bad", "enoughCapacityPct": 1.0, "sched": "pelt", "intra": "smp",
            "cluster": [{"coreNum": 4, "efficiency": 1024, "minFreq": 600, "maxFreq": 1400,
                         "opp": [600, 600, 1400], "corePower": [1, 2, 3], "clusterPower": [1, 2, 3]}]
        }"#;
        assert!(Soc::from_json(raw).is_err());
    }
}
