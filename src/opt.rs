// SPDX-License-Identifier: GPL-2.0
//
// soctune: optimizer adapter. Freezes the default-tunables reference score,
// exposes the decode -> simulate -> rank pipeline as the NSGA-III fitness
// function, applies the feasibility gates and extracts the final front as
// typed results.

use anyhow::{Context, Result};
use log::warn;

use crate::codec::{ParamCodec, ParamRangeCfg};
use crate::config::Config;
use crate::cpu_model::Soc;
use crate::nsga::{GaCfg, MiddleCost, Nsga3, Problem};
use crate::rank::{Rank, RankMisc, Score};
use crate::sim::{run_sim, SimFlavor, SimMisc, Tunables};
use crate::workload::Workload;

/// One Pareto-front member, decoded for the serializers.
#[derive(Debug, Clone)]
pub struct OptResult {
    pub tunables: Tunables,
    pub score: Score,
}

pub struct OptimizerAdapter<'a> {
    soc: &'a Soc,
    workload: &'a Workload,
    idleload: &'a Workload,
    flavor: SimFlavor,
    codec: ParamCodec,
    ga_cfg: GaCfg,
    sim_misc: SimMisc,
    rank: Rank,
    default_score: Score,
    work_fraction: f64,
    idle_fraction: f64,
    idle_lasting_min: f64,
    performance_max: f64,
}

impl<'a> OptimizerAdapter<'a> {
    pub fn new(
        soc: &'a Soc,
        workload: &'a Workload,
        idleload: &'a Workload,
        config: &Config,
    ) -> Result<Self> {
        let flavor = SimFlavor::select(soc.sched_type, config.use_uperf)
            .with_context(|| format!("selecting simulator flavor for {}", soc.name))?;
        Self::with_flavor(
            soc,
            workload,
            idleload,
            flavor,
            &config.parameter_range,
            config.ga_cfg(),
            config.sim_misc(),
            config.rank_misc(),
            config.misc_settings.work_fraction,
            config.misc_settings.idle_fraction,
            config.misc_settings.idle_lasting_min,
            config.misc_settings.performance_max,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn with_flavor(
        soc: &'a Soc,
        workload: &'a Workload,
        idleload: &'a Workload,
        flavor: SimFlavor,
        ranges: &ParamRangeCfg,
        ga_cfg: GaCfg,
        sim_misc: SimMisc,
        rank_misc: RankMisc,
        work_fraction: f64,
        idle_fraction: f64,
        idle_lasting_min: f64,
        performance_max: f64,
    ) -> Result<Self> {
        let codec = ParamCodec::new(soc, flavor, ranges)
            .with_context(|| format!("building search space for {}", soc.name))?;

        // Reference pass: the default tunables scored against themselves fix
        // the normalization for every subsequent evaluation.
        let defaults = crate::codec::default_tunables(soc, flavor);
        let rp = run_sim(flavor, &defaults, soc, workload, idleload, sim_misc)?;
        let default_score = Rank::new(Score::unit(), rank_misc).eval(workload, &rp, soc, true);
        let rank = Rank::new(default_score.clone(), rank_misc);

        Ok(OptimizerAdapter {
            soc,
            workload,
            idleload,
            flavor,
            codec,
            ga_cfg,
            sim_misc,
            rank,
            default_score,
            work_fraction,
            idle_fraction,
            idle_lasting_min,
            performance_max,
        })
    }

    pub fn flavor(&self) -> SimFlavor {
        self.flavor
    }

    pub fn default_score(&self) -> &Score {
        &self.default_score
    }

    /// Simulate and rank one bundle against the frozen reference.
    pub fn score_tunables(&self, tunables: &Tunables) -> Result<Score> {
        let rp = run_sim(
            self.flavor,
            tunables,
            self.soc,
            self.workload,
            self.idleload,
            self.sim_misc,
        )?;
        Ok(self.rank.eval(self.workload, &rp, self.soc, false))
    }

    fn passes_gates(&self, score: &Score) -> bool {
        score.idle_lasting > self.idle_lasting_min && score.performance < self.performance_max
    }

    /// Run the evolution and decode the final first front.
    pub fn optimize(&self) -> Result<Vec<OptResult>> {
        let front = Nsga3::new(self.ga_cfg.clone(), self)?
            .solve()
            .with_context(|| format!("optimizing {}", self.soc.name))?;

        Ok(front
            .into_iter()
            .map(|individual| OptResult {
                tunables: self.codec.decode(&individual.genes),
                score: Score {
                    performance: individual.cost.c1,
                    battery_life: individual.cost.c2,
                    idle_lasting: individual.cost.c3,
                    ref_power_consumed: Vec::new(),
                },
            })
            .collect())
    }
}

impl Problem for OptimizerAdapter<'_> {
    fn param_len(&self) -> usize {
        self.codec.param_len()
    }

    fn evaluate(&self, genes: &[f64]) -> Option<(MiddleCost, [f64; 2])> {
        let tunables = self.codec.decode(genes);
        let score = match self.score_tunables(&tunables) {
            Ok(score) => score,
            Err(err) => {
                warn!("evaluation failed, discarding individual: {err:#}");
                return None;
            }
        };
        if !self.passes_gates(&score) {
            return None;
        }

        let cost = MiddleCost {
            c1: score.performance,
            c2: score.battery_life,
            c3: score.idle_lasting,
        };
        // Both objectives are minimized; lasting scores flip sign.
        let battery_objective =
            -(self.work_fraction * score.battery_life + self.idle_fraction * score.idle_lasting);
        Some((cost, [score.performance, battery_objective]))
    }
}
