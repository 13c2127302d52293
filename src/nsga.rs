// SPDX-License-Identifier: GPL-2.0
//
// soctune: NSGA-III engine. Real-valued genomes, SBX crossover, polynomial
// mutation, fast non-dominated sort and reference-point niching over the
// 2-objective normalized hyperplane. Fitness evaluation fans out over a
// crossbeam worker pool; genome generation and selection stay serial so a
// fixed seed reproduces the run at any thread count.

use anyhow::{bail, Result};
use log::{debug, info};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

#[derive(Debug, Clone)]
pub struct GaCfg {
    pub population: usize,
    pub generation_max: usize,
    pub crossover_fraction: f64,
    pub mutation_rate: f64,
    pub eta: f64,
    pub thread_num: usize,
    pub random_seed: u64,
}

/// Raw per-evaluation costs retained for reporting alongside the two
/// minimized objectives.
#[derive(Debug, Clone, Copy, Default)]
pub struct MiddleCost {
    pub c1: f64,
    pub c2: f64,
    pub c3: f64,
}

#[derive(Debug, Clone)]
pub struct Individual {
    pub genes: Vec<f64>,
    pub objectives: [f64; 2],
    pub cost: MiddleCost,
}

/// Fitness contract the optimizer drives. `evaluate` returns `None` when
/// the genome fails the feasibility gates; such individuals are discarded
/// and regenerated.
pub trait Problem: Sync {
    fn param_len(&self) -> usize;
    fn evaluate(&self, genes: &[f64]) -> Option<(MiddleCost, [f64; 2])>;
}

/// Consecutive all-rejected batches tolerated before giving up on a
/// feasible population.
const MAX_SPAWN_BATCHES: usize = 100;

pub struct Nsga3<'a, P: Problem> {
    cfg: GaCfg,
    problem: &'a P,
    rng: StdRng,
    ref_points: Vec<[f64; 2]>,
}

impl<'a, P: Problem> Nsga3<'a, P> {
    pub fn new(cfg: GaCfg, problem: &'a P) -> Result<Self> {
        if cfg.population < 4 {
            bail!("population must be at least 4, got {}", cfg.population);
        }
        if cfg.generation_max == 0 {
            bail!("generationMax must be positive");
        }
        if problem.param_len() == 0 {
            bail!("empty parameter space");
        }
        let rng = StdRng::seed_from_u64(cfg.random_seed);
        let ref_points = das_dennis_points(cfg.population - 1);
        Ok(Nsga3 {
            cfg,
            problem,
            rng,
            ref_points,
        })
    }

    /// Evolve to `generation_max` and return the final first front.
    pub fn solve(&mut self) -> Result<Vec<Individual>> {
        info!(
            "nsga3: population {} over {} generations, {} genes",
            self.cfg.population,
            self.cfg.generation_max,
            self.problem.param_len()
        );

        let mut population = self.initial_population()?;
        for generation in 0..self.cfg.generation_max {
            let children = self.breed(&population)?;
            let mut merged = population;
            merged.extend(children);
            population = self.select_next(merged);
            debug!(
                "nsga3: generation {}/{} selected {}",
                generation + 1,
                self.cfg.generation_max,
                population.len()
            );
        }

        let fronts = fast_nondominated_sort(&population);
        let front = fronts
            .first()
            .map(|front| front.iter().map(|&idx| population[idx].clone()).collect())
            .unwrap_or_default();
        Ok(front)
    }

    fn random_genome(&mut self) -> Vec<f64> {
        (0..self.problem.param_len())
            .map(|_| self.rng.gen::<f64>())
            .collect()
    }

    fn initial_population(&mut self) -> Result<Vec<Individual>> {
        let target = self.cfg.population;
        let mut accepted = Vec::with_capacity(target);
        let mut batches = 0;
        while accepted.len() < target {
            let genomes: Vec<Vec<f64>> = (0..target - accepted.len())
                .map(|_| self.random_genome())
                .collect();
            accepted.extend(self.evaluate_batch(genomes)?.into_iter().flatten());
            batches += 1;
            if batches > MAX_SPAWN_BATCHES {
                bail!("no feasible individuals after {MAX_SPAWN_BATCHES} init batches");
            }
        }
        Ok(accepted)
    }

    fn breed(&mut self, parents: &[Individual]) -> Result<Vec<Individual>> {
        let target = ((self.cfg.crossover_fraction * self.cfg.population as f64).round() as usize)
            .max(1);
        let mut children = Vec::with_capacity(target);
        let mut batches = 0;
        while children.len() < target {
            let genomes: Vec<Vec<f64>> = (0..target - children.len())
                .map(|_| {
                    let a = self.rng.gen_range(0..parents.len());
                    let b = self.rng.gen_range(0..parents.len());
                    let mut child = sbx_crossover(
                        &mut self.rng,
                        self.cfg.eta,
                        &parents[a].genes,
                        &parents[b].genes,
                    );
                    if self.rng.gen::<f64>() < self.cfg.mutation_rate {
                        child = polynomial_mutate(&mut self.rng, self.cfg.eta, &child);
                    }
                    child
                })
                .collect();
            children.extend(self.evaluate_batch(genomes)?.into_iter().flatten());
            batches += 1;
            if batches > MAX_SPAWN_BATCHES {
                bail!("no feasible offspring after {MAX_SPAWN_BATCHES} breeding batches");
            }
        }
        Ok(children)
    }

    fn eval_one(&self, genes: Vec<f64>) -> Option<Individual> {
        self.problem.evaluate(&genes).map(|(cost, objectives)| Individual {
            genes,
            objectives,
            cost,
        })
    }

    /// Evaluate a batch, in submission order. Failed (infeasible) slots come
    /// back as `None`.
    fn evaluate_batch(&self, genomes: Vec<Vec<f64>>) -> Result<Vec<Option<Individual>>> {
        if self.cfg.thread_num <= 1 || genomes.len() <= 1 {
            return Ok(genomes.into_iter().map(|g| self.eval_one(g)).collect());
        }

        let n_tasks = genomes.len();
        let mut results: Vec<Option<Individual>> = Vec::with_capacity(n_tasks);
        results.resize_with(n_tasks, || None);

        let scope_result = crossbeam::thread::scope(|scope| {
            let (task_tx, task_rx) = crossbeam::channel::unbounded();
            let (result_tx, result_rx) = crossbeam::channel::unbounded();
            for task in genomes.into_iter().enumerate() {
                task_tx.send(task).expect("task queue closed early");
            }
            drop(task_tx);

            for _ in 0..self.cfg.thread_num {
                let task_rx = task_rx.clone();
                let result_tx = result_tx.clone();
                scope.spawn(move |_| {
                    while let Ok((idx, genes)) = task_rx.recv() {
                        let evaluated = self.eval_one(genes);
                        if result_tx.send((idx, evaluated)).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(result_tx);

            while let Ok((idx, evaluated)) = result_rx.recv() {
                results[idx] = evaluated;
            }
        });
        if scope_result.is_err() {
            bail!("evaluation worker panicked");
        }
        Ok(results)
    }

    /// NSGA-III environmental selection: fill whole fronts, then niche the
    /// split front over the reference points.
    fn select_next(&mut self, merged: Vec<Individual>) -> Vec<Individual> {
        let target = self.cfg.population;
        let fronts = fast_nondominated_sort(&merged);

        let mut selected: Vec<usize> = Vec::with_capacity(target);
        let mut split_front: Vec<usize> = Vec::new();
        for front in fronts {
            if selected.len() + front.len() <= target {
                selected.extend(front);
            } else {
                split_front = front;
                break;
            }
        }
        if selected.len() < target && !split_front.is_empty() {
            let chosen = self.niche_split_front(&merged, &selected, &split_front, target - selected.len());
            selected.extend(chosen);
        }

        selected.into_iter().map(|idx| merged[idx].clone()).collect()
    }

    fn niche_split_front(
        &mut self,
        merged: &[Individual],
        selected: &[usize],
        split_front: &[usize],
        n_needed: usize,
    ) -> Vec<usize> {
        // Normalize over the union of the already-selected members and the
        // split front, then associate everyone with a reference direction.
        let considered: Vec<usize> = selected.iter().chain(split_front.iter()).copied().collect();
        let normalized = normalize_objectives(merged, &considered);
        let norm_of = |idx: usize| {
            let pos = considered.iter().position(|&i| i == idx).unwrap_or(0);
            normalized[pos]
        };

        let mut niche_count = vec![0usize; self.ref_points.len()];
        for &idx in selected {
            let (ref_idx, _) = associate(norm_of(idx), &self.ref_points);
            niche_count[ref_idx] += 1;
        }

        struct Candidate {
            member: usize,
            ref_idx: usize,
            distance: f64,
        }
        let mut candidates: Vec<Candidate> = split_front
            .iter()
            .map(|&member| {
                let (ref_idx, distance) = associate(norm_of(member), &self.ref_points);
                Candidate {
                    member,
                    ref_idx,
                    distance,
                }
            })
            .collect();

        let mut chosen = Vec::with_capacity(n_needed);
        while chosen.len() < n_needed && !candidates.is_empty() {
            // Reference point with the lowest niche count among those that
            // still have candidates; break count ties randomly.
            let mut live_refs: Vec<usize> = candidates.iter().map(|c| c.ref_idx).collect();
            live_refs.sort_unstable();
            live_refs.dedup();
            let min_count = live_refs.iter().map(|&r| niche_count[r]).min().unwrap();
            let min_refs: Vec<usize> = live_refs
                .into_iter()
                .filter(|&r| niche_count[r] == min_count)
                .collect();
            let ref_idx = min_refs[self.rng.gen_range(0..min_refs.len())];

            let pool: Vec<usize> = candidates
                .iter()
                .enumerate()
                .filter(|(_, c)| c.ref_idx == ref_idx)
                .map(|(pos, _)| pos)
                .collect();
            let pick = if niche_count[ref_idx] == 0 {
                // Empty niche: take the member closest to the reference line.
                *pool
                    .iter()
                    .min_by(|&&a, &&b| {
                        candidates[a]
                            .distance
                            .partial_cmp(&candidates[b].distance)
                            .unwrap_or(std::cmp::Ordering::Equal)
                    })
                    .unwrap()
            } else {
                pool[self.rng.gen_range(0..pool.len())]
            };

            let candidate = candidates.swap_remove(pick);
            niche_count[candidate.ref_idx] += 1;
            chosen.push(candidate.member);
        }
        chosen
    }
}

/// Das-Dennis reference directions on the 2-objective unit simplex.
fn das_dennis_points(divisions: usize) -> Vec<[f64; 2]> {
    let h = divisions.max(1);
    (0..=h)
        .map(|i| {
            let a = i as f64 / h as f64;
            [a, 1.0 - a]
        })
        .collect()
}

/// `a` dominates `b`: no objective is worse and at least one is better.
fn dominates(a: &Individual, b: &Individual) -> bool {
    a.objectives[0] <= b.objectives[0]
        && a.objectives[1] <= b.objectives[1]
        && (a.objectives[0] < b.objectives[0] || a.objectives[1] < b.objectives[1])
}

/// Standard fast non-dominated sort; returns fronts of indices, best first.
pub fn fast_nondominated_sort(population: &[Individual]) -> Vec<Vec<usize>> {
    let n = population.len();
    let mut dominated_by: Vec<Vec<usize>> = vec![Vec::new(); n];
    let mut domination_count = vec![0usize; n];
    let mut fronts: Vec<Vec<usize>> = Vec::new();

    let mut first_front = Vec::new();
    for p in 0..n {
        for q in 0..n {
            if p == q {
                continue;
            }
            if dominates(&population[p], &population[q]) {
                dominated_by[p].push(q);
            } else if dominates(&population[q], &population[p]) {
                domination_count[p] += 1;
            }
        }
        if domination_count[p] == 0 {
            first_front.push(p);
        }
    }

    let mut current = first_front;
    while !current.is_empty() {
        let mut next = Vec::new();
        for &p in &current {
            for &q in &dominated_by[p] {
                domination_count[q] -= 1;
                if domination_count[q] == 0 {
                    next.push(q);
                }
            }
        }
        fronts.push(std::mem::take(&mut current));
        current = next;
    }
    fronts
}

/// Ideal-point translation and extreme-point intercept normalization of the
/// considered members' objectives.
fn normalize_objectives(population: &[Individual], considered: &[usize]) -> Vec<[f64; 2]> {
    let mut ideal = [f64::INFINITY; 2];
    for &idx in considered {
        for axis in 0..2 {
            ideal[axis] = ideal[axis].min(population[idx].objectives[axis]);
        }
    }

    let translated: Vec<[f64; 2]> = considered
        .iter()
        .map(|&idx| {
            [
                population[idx].objectives[0] - ideal[0],
                population[idx].objectives[1] - ideal[1],
            ]
        })
        .collect();

    // Extreme point per axis by the achievement scalarizing function.
    let asf = |point: &[f64; 2], axis: usize| {
        let mut worst = 0f64;
        for k in 0..2 {
            let weight = if k == axis { 1.0 } else { 1e-6 };
            worst = worst.max(point[k] / weight);
        }
        worst
    };
    let extreme = |axis: usize| {
        translated
            .iter()
            .min_by(|a, b| {
                asf(a, axis)
                    .partial_cmp(&asf(b, axis))
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .copied()
            .unwrap_or([1.0, 1.0])
    };
    let e0 = extreme(0);
    let e1 = extreme(1);

    // Intercepts of the line through the extreme points; degenerate cases
    // fall back to the per-axis maxima.
    let det = e0[0] * e1[1] - e0[1] * e1[0];
    let mut intercepts = [0f64; 2];
    if det.abs() > 1e-12 {
        let u = (e1[1] - e0[1]) / det;
        let v = (e0[0] - e1[0]) / det;
        intercepts = [1.0 / u, 1.0 / v];
    }
    for axis in 0..2 {
        if !(intercepts[axis].is_finite() && intercepts[axis] > 1e-12) {
            let max = translated
                .iter()
                .map(|p| p[axis])
                .fold(0f64, f64::max);
            intercepts[axis] = if max > 1e-12 { max } else { 1.0 };
        }
    }

    translated
        .iter()
        .map(|p| [p[0] / intercepts[0], p[1] / intercepts[1]])
        .collect()
}

/// Closest reference direction by perpendicular distance.
fn associate(point: [f64; 2], ref_points: &[[f64; 2]]) -> (usize, f64) {
    let mut best = (0usize, f64::INFINITY);
    for (idx, dir) in ref_points.iter().enumerate() {
        let norm_sq = dir[0] * dir[0] + dir[1] * dir[1];
        let dot = point[0] * dir[0] + point[1] * dir[1];
        let scale = dot / norm_sq;
        let dx = point[0] - scale * dir[0];
        let dy = point[1] - scale * dir[1];
        let distance = (dx * dx + dy * dy).sqrt();
        if distance < best.1 {
            best = (idx, distance);
        }
    }
    best
}

/// Polynomial bounded mutation after Deb's NSGA-II reference code. Each
/// component is copied unchanged with probability 0.5.
pub fn polynomial_mutate(rng: &mut StdRng, eta: f64, base: &[f64]) -> Vec<f64> {
    let eta_1 = eta + 1.0;
    let mut_pow = 1.0 / eta_1;
    base.iter()
        .map(|&x| {
            if rng.gen::<f64>() >= 0.5 {
                return x;
            }
            let delta_1 = x;
            let delta_2 = 1.0 - x;
            let rnd = rng.gen::<f64>();
            let delta_q = if rnd < 0.5 {
                let val = 2.0 * rnd + (1.0 - 2.0 * rnd) * (1.0 - delta_1).powf(eta_1);
                val.powf(mut_pow) - 1.0
            } else {
                let val = 2.0 * (1.0 - rnd) + 2.0 * (rnd - 0.5) * (1.0 - delta_2).powf(eta_1);
                1.0 - val.powf(mut_pow)
            };
            (x + delta_q).clamp(0.0, 1.0)
        })
        .collect()
}

/// Simulated binary bounded crossover; emits one of the two children per
/// component, keeping the first parent's component with probability 0.5.
pub fn sbx_crossover(rng: &mut StdRng, eta: f64, parent_a: &[f64], parent_b: &[f64]) -> Vec<f64> {
    let eta_1 = eta + 1.0;
    parent_a
        .iter()
        .zip(parent_b.iter())
        .map(|(&a, &b)| {
            if rng.gen::<f64>() >= 0.5 {
                return a;
            }
            let x1 = a.min(b);
            let x2 = a.max(b);
            if x2 - x1 < 1e-14 {
                // Identical components have no spread to recombine over.
                return a;
            }
            let rnd = rng.gen::<f64>();
            let x2_x1 = x2 - x1;

            let child = |beta: f64, sign: f64| {
                let alpha = 2.0 - beta.powf(-eta_1);
                let beta_q = if rnd <= 1.0 / alpha {
                    (rnd * alpha).powf(1.0 / eta_1)
                } else {
                    (1.0 / (2.0 - rnd * alpha)).powf(1.0 / eta_1)
                };
                (0.5 * (x1 + x2 + sign * beta_q * x2_x1)).clamp(0.0, 1.0)
            };

            let c1 = child(1.0 + (2.0 * x1 / x2_x1), -1.0);
            let c2 = child(1.0 + (2.0 * (1.0 - x2) / x2_x1), 1.0);

            if rng.gen::<f64>() <= 0.5 {
                c2
            } else {
                c1
            }
        })
        .collect()
}
