// SPDX-License-Identifier: GPL-2.0
//
// soctune: result serializers. Emits the human-readable per-individual
// summary, the score CSV, the vendor-kernel powercfg.sh (InputBoost
// flavors) and the uperf profile JSON (UperfBoost flavors).

use anyhow::{Context, Result};
use chrono::Local;
use log::warn;
use serde_json::json;
use std::fs;
use std::path::{Path, PathBuf};

use crate::boost::UperfBoostTunables;
use crate::cpu_model::{Cluster, Soc};
use crate::interactive::{InteractiveTunables, ABOVE_DELAY_MAX_LEN, TARGET_LOAD_MAX_LEN};
use crate::opt::OptResult;
use crate::sim::{BoostTunables, SchedTunables, SimFlavor, Tunables};

/// Performance ceilings for the seven powercfg levels and the three uperf
/// modes. Each level takes the longest-lasting individual under its ceiling.
const PERF_LEVELS: [f64; 7] = [0.00, 0.15, 0.30, 0.50, 0.75, 0.99, 1.20];
const UPERF_MODES: [(&str, f64); 3] =
    [("performance", 0.15), ("balance", 0.50), ("powersave", 0.99)];

fn ms_to_us(ms: i64) -> i64 {
    1000 * ms
}

fn mhz_to_khz(mhz: i64) -> i64 {
    1000 * mhz
}

fn quantum_to_ms(n_quantum: i64) -> i64 {
    n_quantum * 10
}

fn pct(value: f64) -> f64 {
    value * 100.0
}

/// Governor dwell times are stored in scheduler ticks; sysfs wants µs, held
/// just under the tick boundary.
fn ticks_to_us(ticks: i64, timer_rate: i64) -> i64 {
    ms_to_us(quantum_to_ms(ticks * timer_rate) - 2)
}

fn replace_once(text: &mut String, from: &str, to: &str) -> bool {
    match text.find(from) {
        Some(start) => {
            text.replace_range(start..start + from.len(), to);
            true
        }
        None => false,
    }
}

/// Deduplicated `freq:load` list in the interactive governor's sysfs syntax,
/// e.g. `80 1036000:85 1401000:90`.
fn target_loads_to_str(tunables: &InteractiveTunables, cluster: &Cluster) -> String {
    let n_target_loads = TARGET_LOAD_MAX_LEN.min(cluster.model.opp_table.len());
    let min_freq = cluster.model.min_freq;
    let mut buf = String::new();
    let mut prev = -1i64;
    for idx in 0..n_target_loads {
        let freq = cluster.model.opp_table[idx].freq;
        let load = tunables.target_loads[idx];
        if prev == load {
            continue;
        }
        if freq == min_freq {
            buf.push_str(&load.to_string());
            prev = load;
        } else if freq > min_freq {
            buf.push_str(&format!(" {}:{}", mhz_to_khz(freq), load));
            prev = load;
        }
    }
    buf
}

/// `freq:delay_us` list starting at hispeed_freq. The last opp's delay is
/// never consulted and is left out.
fn hispeed_delay_to_str(
    tunables: &InteractiveTunables,
    cluster: &Cluster,
    timer_rate: i64,
) -> String {
    let n_above = ABOVE_DELAY_MAX_LEN.min(cluster.model.opp_table.len()) - 1;
    let mut buf = String::new();
    let mut prev = -1i64;
    for idx in 0..n_above {
        let freq = cluster.model.opp_table[idx].freq;
        let delay = tunables.above_hispeed_delay[idx];
        if prev == delay {
            continue;
        }
        if freq == tunables.hispeed_freq {
            buf.push_str(&ticks_to_us(delay, timer_rate).to_string());
            prev = delay;
        } else if freq > tunables.hispeed_freq {
            buf.push_str(&format!(" {}:{}", mhz_to_khz(freq), ticks_to_us(delay, timer_rate)));
            prev = delay;
        }
    }
    buf
}

/// Qualcomm per-core frequency wildcard, e.g. `0:902000 1:0 2:0 3:0 4:1401000`.
fn qcom_freq_param_to_str(freq0: i64, freq1: i64, ncore0: usize, ncore1: usize) -> String {
    let mut buf = format!("0:{}", mhz_to_khz(freq0));
    for core in 1..ncore0 {
        buf.push_str(&format!(" {core}:0"));
    }
    if ncore1 > 0 {
        buf.push_str(&format!(" {ncore0}:{}", mhz_to_khz(freq1)));
    }
    buf
}

/// Accumulates `<prefix><n>="<value>"` lines with a running counter, so the
/// sysfs object list and the per-level value lists stay in lockstep.
struct SysfsLines {
    prefix: String,
    n: usize,
    buf: String,
}

impl SysfsLines {
    fn new(prefix: &str) -> Self {
        SysfsLines {
            prefix: prefix.to_string(),
            n: 0,
            buf: String::new(),
        }
    }

    fn push(&mut self, value: &str) {
        self.n += 1;
        self.buf.push_str(&format!("{}{}=\"{}\"\n", self.prefix, self.n, value));
    }

    fn push_int(&mut self, value: i64) {
        self.push(&value.to_string());
    }

    fn push_raw(&mut self, line: &str) {
        self.buf.push_str(line);
        self.buf.push('\n');
    }
}

pub struct Dumper<'a> {
    soc: &'a Soc,
    flavor: SimFlavor,
    output_path: PathBuf,
    template_path: PathBuf,
}

impl<'a> Dumper<'a> {
    pub fn new(soc: &'a Soc, flavor: SimFlavor, output_path: &Path, template_path: &Path) -> Self {
        Dumper {
            soc,
            flavor,
            output_path: output_path.to_path_buf(),
            template_path: template_path.to_path_buf(),
        }
    }

    pub fn dump_all(&self, results: &[OptResult]) -> Result<()> {
        fs::create_dir_all(&self.output_path).with_context(|| {
            format!("cannot create output directory {}", self.output_path.display())
        })?;
        self.dump_txt(results)?;
        self.dump_csv(results)?;
        if self.flavor.is_uperf() {
            self.dump_uperf_json(results)?;
        } else {
            self.dump_powercfg(results)?;
        }
        Ok(())
    }

    pub fn dump_txt(&self, results: &[OptResult]) -> Result<()> {
        let mut buf = String::new();
        for (idx, result) in results.iter().enumerate() {
            buf.push_str("================\n\n");
            buf.push_str(&format!(">>> {idx} <<<\n"));
            buf.push_str(&format!("performance: {}\n", pct(result.score.performance)));
            buf.push_str(&format!("battery_life: {}\n", pct(result.score.battery_life)));
            buf.push_str(&format!("idle_lasting: {}\n", pct(result.score.idle_lasting)));
            buf.push('\n');
            buf.push_str(&self.tunables_to_str(&result.tunables));
        }
        let path = self.output_path.join(format!("{}.txt", self.soc.name));
        fs::write(&path, buf).with_context(|| format!("cannot write {}", path.display()))
    }

    pub fn dump_csv(&self, results: &[OptResult]) -> Result<()> {
        let mut buf = String::new();
        for (idx, result) in results.iter().enumerate() {
            buf.push_str(&format!(
                "{},{},{},{}\n",
                pct(result.score.performance),
                pct(result.score.battery_life),
                pct(result.score.idle_lasting),
                idx
            ));
        }
        let path = self.output_path.join(format!("{}.csv", self.soc.name));
        fs::write(&path, buf).with_context(|| format!("cannot write {}", path.display()))
    }

    fn tunables_to_str(&self, tunables: &Tunables) -> String {
        let timer_rate = tunables.timer_rate();
        let mut buf = String::new();

        for (idx, governor) in tunables.governor.iter().enumerate() {
            let cluster = &self.soc.clusters[idx.min(self.soc.clusters.len() - 1)];
            buf.push_str(&governor_section(governor, cluster, idx, timer_rate));
        }

        match &tunables.sched {
            SchedTunables::Walt(sched) => {
                buf.push_str("[hmp sched]\n\n");
                buf.push_str(&format!("sched_downmigrate: {}\n", sched.sched_downmigrate));
                buf.push_str(&format!("sched_upmigrate: {}\n", sched.sched_upmigrate));
                buf.push_str(&format!(
                    "sched_freq_aggregate_threshold_pct: {}\n",
                    sched.sched_freq_aggregate_threshold_pct
                ));
                buf.push_str(&format!("sched_ravg_hist_size: {}\n", sched.sched_ravg_hist_size));
                buf.push_str(&format!(
                    "sched_window_stats_policy: {}\n",
                    sched.sched_window_stats_policy.as_i64()
                ));
                buf.push_str(&format!(
                    "timer_rate: {}\n\n",
                    ms_to_us(quantum_to_ms(sched.timer_rate))
                ));
            }
            SchedTunables::Pelt(sched) => {
                buf.push_str("[hmp sched]\n\n");
                buf.push_str(&format!("down_threshold: {}\n", sched.down_threshold));
                buf.push_str(&format!("up_threshold: {}\n", sched.up_threshold));
                buf.push_str(&format!("load_avg_period_ms: {}\n", sched.load_avg_period_ms));
                buf.push_str(&format!("boost: {}\n", sched.boost));
                buf.push_str(&format!(
                    "timer_rate: {}\n\n",
                    ms_to_us(quantum_to_ms(sched.timer_rate))
                ));
            }
        }

        match &tunables.boost {
            BoostTunables::Input(boost) if self.soc.input_boost => {
                buf.push_str("[input boost]\n\n");
                for (idx, _) in self.soc.clusters.iter().enumerate().take(2) {
                    buf.push_str(&format!("cluster {idx}: {}\n", boost.boost_freq[idx]));
                }
                buf.push_str(&format!("ms: {}\n\n", quantum_to_ms(boost.duration_quantum)));
            }
            BoostTunables::Uperf(boost) if self.soc.input_boost => {
                buf.push_str("[uperf boost]\n\n");
                for (idx, _) in self.soc.clusters.iter().enumerate().take(2) {
                    buf.push_str(&format!(
                        "cluster {idx}: min {} max {}\n",
                        boost.min_freq[idx], boost.max_freq[idx]
                    ));
                }
                buf.push_str(&format!("sched up/down: {}/{}\n\n", boost.sched_up, boost.sched_down));
                for (idx, governor) in boost.governor.iter().enumerate() {
                    let cluster = &self.soc.clusters[idx.min(self.soc.clusters.len() - 1)];
                    buf.push_str(&governor_section(governor, cluster, idx, timer_rate));
                }
            }
            _ => {}
        }

        buf
    }

    /// Best-lasting individual with a performance score under the ceiling;
    /// falls back to the first individual.
    fn find_level(results: &[OptResult], perf_ceiling: f64) -> usize {
        let mut best_idx = 0;
        let mut max_battery_life = 0.0;
        for (idx, result) in results.iter().enumerate() {
            if result.score.performance < perf_ceiling && result.score.battery_life > max_battery_life
            {
                best_idx = idx;
                max_battery_life = result.score.battery_life;
            }
        }
        best_idx
    }

    pub fn dump_powercfg(&self, results: &[OptResult]) -> Result<()> {
        if results.is_empty() {
            warn!("{}: empty front, skipping powercfg.sh", self.soc.name);
            return Ok(());
        }
        let mut template = fs::read_to_string(&self.template_path).with_context(|| {
            format!("cannot read shell template {}", self.template_path.display())
        })?;

        let script_dir = self.output_path.join(&self.soc.name);
        fs::create_dir_all(&script_dir)
            .with_context(|| format!("cannot create {}", script_dir.display()))?;

        let datetime = Local::now().format("%F %T").to_string();
        let (sysfs_obj, n_param) = self.sysfs_obj_to_str();

        template = template.replace("[platform_name]", &self.soc.name);
        template = template.replace("[generated_time]", &datetime);
        replace_once(&mut template, "[sysfs_obj]", &sysfs_obj);
        replace_once(&mut template, "[param_num]", &n_param.to_string());

        for (level, &perf_ceiling) in PERF_LEVELS.iter().enumerate() {
            let idx = Self::find_level(results, perf_ceiling);
            let result = &results[idx];
            let mut content = format!(
                "# lag percent: {:.1}%\n# battery life: {:.1}%\n",
                pct(result.score.performance),
                pct(result.score.battery_life)
            );
            content.push_str(&self.level_to_str(&result.tunables, level));
            replace_once(&mut template, &format!("[level{level}]"), &content);
        }

        let path = script_dir.join("powercfg.sh");
        fs::write(&path, template).with_context(|| format!("cannot write {}", path.display()))
    }

    fn sysfs_obj_to_str(&self) -> (String, usize) {
        let mut lines = SysfsLines::new("sysfs_obj");
        let cluster_num = self.soc.clusters.len();

        let sched_dir = if self.flavor.is_walt() {
            "/proc/sys/kernel"
        } else {
            "/proc/sys/kernel/hmp"
        };
        lines.push_raw(&format!("SCHED_DIR=\"{sched_dir}\""));
        if cluster_num < 2 {
            lines.push_raw("C0_GOVERNOR_DIR=\"/sys/devices/system/cpu/cpufreq/interactive\"");
            lines.push_raw("C1_GOVERNOR_DIR=\"\"");
            lines.push_raw("C0_DIR=\"/sys/devices/system/cpu/cpu0\"");
            lines.push_raw("C1_DIR=\"/sys/devices/system/cpu/cpu4\"");
        } else {
            let c0_core_num = self.soc.clusters[0].model.core_num;
            lines.push_raw("C0_GOVERNOR_DIR=\"/sys/devices/system/cpu/cpu0/cpufreq/interactive\"");
            lines.push_raw(&format!(
                "C1_GOVERNOR_DIR=\"/sys/devices/system/cpu/cpu{c0_core_num}/cpufreq/interactive\""
            ));
            lines.push_raw("C0_DIR=\"/sys/devices/system/cpu/cpu0\"");
            lines.push_raw(&format!("C1_DIR=\"/sys/devices/system/cpu/cpu{c0_core_num}\""));
        }
        lines.push_raw("");

        if self.flavor.is_walt() {
            // Disable thermal core control before switching governors.
            lines.push("/sys/module/msm_thermal/core_control/enabled");
            lines.push("/sys/module/msm_thermal/parameters/enabled");
            lines.push("/sys/module/msm_performance/parameters/cpu_min_freq");
            lines.push("/sys/module/msm_performance/parameters/cpu_max_freq");
        } else {
            lines.push("/sys/power/cpuhotplug/enabled");
            lines.push("/sys/devices/system/cpu/cpuhotplug/enabled");
        }

        for idx in 0..cluster_num {
            lines.push(&format!("${{C{idx}_DIR}}/online"));
            for param in ["scaling_governor", "scaling_min_freq", "scaling_max_freq"] {
                lines.push(&format!("${{C{idx}_DIR}}/cpufreq/{param}"));
            }
            let governor_params: &[&str] = if self.flavor.is_walt() {
                &[
                    "hispeed_freq",
                    "go_hispeed_load",
                    "min_sample_time",
                    "max_freq_hysteresis",
                    "above_hispeed_delay",
                    "target_loads",
                    "timer_rate",
                    "timer_slack",
                    "ignore_hispeed_on_notif",
                    "boost",
                    "fast_ramp_down",
                    "align_windows",
                    "use_migration_notif",
                    "enable_prediction",
                    "use_sched_load",
                    "boostpulse_duration",
                ]
            } else {
                &[
                    "hispeed_freq",
                    "go_hispeed_load",
                    "min_sample_time",
                    "max_freq_hysteresis",
                    "above_hispeed_delay",
                    "target_loads",
                    "timer_rate",
                    "timer_slack",
                    "boost",
                    "boostpulse_duration",
                ]
            };
            for param in governor_params {
                lines.push(&format!("${{C{idx}_GOVERNOR_DIR}}/{param}"));
            }
        }

        // down is written before and after up so the pair applies whichever
        // side of the old window the new one lands on.
        let sched_params: &[&str] = if self.flavor.is_walt() {
            &[
                "sched_downmigrate",
                "sched_upmigrate",
                "sched_downmigrate",
                "sched_freq_aggregate",
                "sched_ravg_hist_size",
                "sched_window_stats_policy",
                "sched_spill_load",
                "sched_restrict_cluster_spill",
                "sched_boost",
                "sched_prefer_sync_wakee_to_waker",
                "sched_freq_inc_notify",
                "sched_freq_dec_notify",
            ]
        } else {
            &[
                "down_threshold",
                "up_threshold",
                "down_threshold",
                "load_avg_period_ms",
                "boost",
            ]
        };
        for param in sched_params {
            lines.push(&format!("${{SCHED_DIR}}/{param}"));
        }

        if self.soc.input_boost {
            lines.push("/sys/module/msm_performance/parameters/touchboost");
            lines.push("/sys/module/cpu_boost/parameters/input_boost_ms");
            lines.push("/sys/module/cpu_boost/parameters/input_boost_freq");
        }

        (lines.buf.clone(), lines.n)
    }

    fn level_to_str(&self, tunables: &Tunables, level: usize) -> String {
        let mut lines = SysfsLines::new(&format!("level{level}_val"));
        let cluster_num = self.soc.clusters.len();
        let timer_rate = tunables.timer_rate();

        if self.flavor.is_walt() {
            lines.push("0");
            lines.push("N");
            let ncore0 = self.soc.clusters[0].model.core_num;
            let ncore1 = if cluster_num > 1 {
                self.soc.clusters[1].model.core_num
            } else {
                0
            };
            let min0 = self.soc.clusters[0].model.min_freq - 1;
            let max0 = self.soc.clusters[0].model.max_freq + 1;
            let (min1, max1) = if cluster_num > 1 {
                (
                    self.soc.clusters[1].model.min_freq - 1,
                    self.soc.clusters[1].model.max_freq + 1,
                )
            } else {
                (0, 0)
            };
            lines.push(&qcom_freq_param_to_str(min0, min1, ncore0, ncore1));
            lines.push(&qcom_freq_param_to_str(max0, max1, ncore0, ncore1));
        } else {
            lines.push("0");
            lines.push("0");
        }

        for idx in 0..cluster_num {
            let cluster = &self.soc.clusters[idx];
            let governor = &tunables.governor[idx.min(tunables.governor.len() - 1)];
            lines.push_int(1);
            lines.push("interactive");
            // One step outside the table, so the kernel clamps instead of
            // rejecting the write.
            lines.push_int(mhz_to_khz(cluster.model.min_freq - 1));
            lines.push_int(mhz_to_khz(cluster.model.max_freq + 1));
            lines.push_int(mhz_to_khz(governor.hispeed_freq));
            lines.push_int(governor.go_hispeed_load);
            lines.push_int(ticks_to_us(governor.min_sample_time, timer_rate));
            lines.push_int(ticks_to_us(governor.max_freq_hysteresis, timer_rate));
            lines.push(&hispeed_delay_to_str(governor, cluster, timer_rate));
            lines.push(&target_loads_to_str(governor, cluster));
            lines.push_int(ms_to_us(quantum_to_ms(timer_rate)));
            lines.push_int(12345678);
            if self.flavor.is_walt() {
                lines.push_int(0); // ignore_hispeed_on_notif
                lines.push_int(0); // boost
                lines.push_int(0); // fast_ramp_down
                lines.push_int(0); // align_windows
                lines.push_int(1); // use_migration_notif
                lines.push_int(0); // enable_prediction
                lines.push_int(1); // use_sched_load
                lines.push_int(0); // boostpulse_duration
            } else {
                lines.push_int(0); // boost
                lines.push_int(0); // boostpulse_duration
            }
        }

        match &tunables.sched {
            SchedTunables::Walt(sched) => {
                lines.push_int(sched.sched_downmigrate);
                lines.push_int(sched.sched_upmigrate);
                lines.push_int(sched.sched_downmigrate);
                lines.push_int(0); // sched_freq_aggregate
                lines.push_int(sched.sched_ravg_hist_size as i64);
                lines.push_int(sched.sched_window_stats_policy.as_i64());
                lines.push_int(90); // sched_spill_load
                lines.push_int(1); // sched_restrict_cluster_spill
                lines.push_int(0); // sched_boost
                lines.push_int(1); // sched_prefer_sync_wakee_to_waker
                lines.push_int(200000); // sched_freq_inc_notify
                lines.push_int(400000); // sched_freq_dec_notify
            }
            SchedTunables::Pelt(sched) => {
                lines.push_int(sched.down_threshold);
                lines.push_int(sched.up_threshold);
                lines.push_int(sched.down_threshold);
                lines.push_int(sched.load_avg_period_ms);
                lines.push_int(sched.boost);
            }
        }

        if self.soc.input_boost {
            if let BoostTunables::Input(boost) = &tunables.boost {
                lines.push_int(0); // msm touchboost off, cpu_boost drives it
                lines.push_int(quantum_to_ms(boost.duration_quantum));
                let ncore0 = self.soc.clusters[0].model.core_num;
                let ncore1 = if cluster_num > 1 {
                    self.soc.clusters[1].model.core_num
                } else {
                    0
                };
                lines.push(&qcom_freq_param_to_str(
                    boost.boost_freq[0],
                    boost.boost_freq[1],
                    ncore0,
                    ncore1,
                ));
            }
        }

        lines.buf
    }

    pub fn dump_uperf_json(&self, results: &[OptResult]) -> Result<()> {
        if results.is_empty() {
            warn!("{}: empty front, skipping uperf json", self.soc.name);
            return Ok(());
        }

        let mut modes = serde_json::Map::new();
        for (mode, perf_ceiling) in UPERF_MODES {
            let idx = Self::find_level(results, perf_ceiling);
            let result = &results[idx];
            modes.insert(mode.to_string(), self.uperf_mode_json(result));
        }

        let profile = json!({
            "name": self.soc.name,
            "generatedTime": Local::now().format("%F %T").to_string(),
            "modes": modes,
        });

        let path = self.output_path.join(format!("{}.json", self.soc.name));
        let raw = serde_json::to_string_pretty(&profile)?;
        fs::write(&path, raw).with_context(|| format!("cannot write {}", path.display()))
    }

    fn uperf_mode_json(&self, result: &OptResult) -> serde_json::Value {
        let tunables = &result.tunables;
        let timer_rate = tunables.timer_rate();
        let boost = match &tunables.boost {
            BoostTunables::Uperf(boost) => boost,
            BoostTunables::Input(_) => {
                return json!({});
            }
        };

        let cluster_json = |idx: usize, boost: &UperfBoostTunables| {
            let cluster = &self.soc.clusters[idx];
            let governor = &boost.governor[idx.min(boost.governor.len() - 1)];
            json!({
                "minFreqKhz": mhz_to_khz(boost.min_freq[idx]),
                "maxFreqKhz": mhz_to_khz(boost.max_freq[idx]),
                "hispeedFreqKhz": mhz_to_khz(governor.hispeed_freq),
                "goHispeedLoad": governor.go_hispeed_load,
                "minSampleTimeUs": ticks_to_us(governor.min_sample_time, timer_rate),
                "maxFreqHysteresisUs": ticks_to_us(governor.max_freq_hysteresis, timer_rate),
                "aboveHispeedDelay": hispeed_delay_to_str(governor, cluster, timer_rate),
                "targetLoads": target_loads_to_str(governor, cluster),
            })
        };

        let clusters: Vec<serde_json::Value> = (0..self.soc.clusters.len().min(2))
            .map(|idx| cluster_json(idx, boost))
            .collect();

        json!({
            "lagPercent": pct(result.score.performance),
            "batteryLifePercent": pct(result.score.battery_life),
            "idleLastingPercent": pct(result.score.idle_lasting),
            "schedUp": boost.sched_up,
            "schedDown": boost.sched_down,
            "timerRateUs": ms_to_us(quantum_to_ms(timer_rate)),
            "cluster": clusters,
        })
    }
}

fn governor_section(
    governor: &InteractiveTunables,
    cluster: &Cluster,
    idx: usize,
    timer_rate: i64,
) -> String {
    let mut buf = String::new();
    buf.push_str(&format!("[interactive] cluster {idx}\n\n"));
    buf.push_str(&format!("hispeed_freq: {}\n", mhz_to_khz(governor.hispeed_freq)));
    buf.push_str(&format!("go_hispeed_load: {}\n", governor.go_hispeed_load));
    buf.push_str(&format!(
        "min_sample_time: {}\n",
        ticks_to_us(governor.min_sample_time, timer_rate)
    ));
    buf.push_str(&format!(
        "max_freq_hysteresis: {}\n",
        ticks_to_us(governor.max_freq_hysteresis, timer_rate)
    ));
    buf.push_str(&format!(
        "above_hispeed_delay: {}\n",
        hispeed_delay_to_str(governor, cluster, timer_rate)
    ));
    buf.push_str(&format!(
        "target_loads: {}\n\n",
        target_loads_to_str(governor, cluster)
    ));
    buf
}
