//! Population-based policy search
//!
//! Evolutionary optimization over actor weight vectors: evaluate against
//! the critic, carry the top fraction unchanged, draw the remaining
//! parents with replacement under a sign-sensitive softmax, single-point
//! column crossover, Bernoulli-masked Gaussian mutation. Runs one
//! generation at a time, indefinitely.

use ndarray::Array2;
use rand::distributions::WeightedIndex;
use rand::prelude::Distribution;
use rand::Rng;
use rand_distr::Normal;

use crate::config::EvolutionConfig;
use crate::error::{FxrlError, Result};
use crate::network::NetworkWeights;

/// One member of the population: an actor weight set and its fitness
/// under the current critic.
#[derive(Debug, Clone)]
pub struct Individual {
    pub weights: NetworkWeights,
    pub fitness: f32,
}

/// Fixed-size population of actor weight vectors.
#[derive(Debug, Clone)]
pub struct Population {
    individuals: Vec<Individual>,
    config: EvolutionConfig,
    fittest: NetworkWeights,
}

impl Population {
    /// Initialize with fresh random individuals shaped like `template`.
    pub fn new<R: Rng>(template: &NetworkWeights, config: EvolutionConfig, rng: &mut R) -> Self {
        let init = Normal::new(0.0f32, 0.1).expect("valid normal");
        let individuals = (0..config.population_size)
            .map(|_| Individual {
                weights: NetworkWeights::new(
                    template
                        .tensors
                        .iter()
                        .map(|t| Array2::from_shape_fn(t.dim(), |_| init.sample(rng)))
                        .collect(),
                ),
                fitness: 0.0,
            })
            .collect();
        Self {
            individuals,
            fittest: template.clone(),
            config,
        }
    }

    /// Rebuild from checkpointed weight vectors.
    pub fn from_weights(weights: Vec<NetworkWeights>, config: EvolutionConfig) -> Result<Self> {
        if weights.len() != config.population_size {
            return Err(FxrlError::shape(config.population_size, weights.len()));
        }
        let fittest = weights[0].clone();
        Ok(Self {
            individuals: weights
                .into_iter()
                .map(|w| Individual {
                    weights: w,
                    fitness: 0.0,
                })
                .collect(),
            fittest,
            config,
        })
    }

    pub fn len(&self) -> usize {
        self.individuals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.individuals.is_empty()
    }

    pub fn individuals(&self) -> &[Individual] {
        &self.individuals
    }

    /// Assign the fitness computed for individual `index`.
    pub fn set_fitness(&mut self, index: usize, fitness: f32) {
        self.individuals[index].fitness = fitness;
    }

    /// Weights of the best individual found by the last generation.
    pub fn fittest(&self) -> &NetworkWeights {
        &self.fittest
    }

    /// All weight vectors, for checkpointing.
    pub fn weight_vectors(&self) -> Vec<NetworkWeights> {
        self.individuals.iter().map(|i| i.weights.clone()).collect()
    }

    /// Run one generation: select, crossover, mutate, replace.
    ///
    /// Population size is conserved; the top `winner_fraction` survive
    /// unchanged and the fittest individual is recorded for
    /// reinstallation into the online actor.
    pub fn evolve<R: Rng>(&mut self, rng: &mut R) -> Result<()> {
        self.individuals.sort_by(|a, b| {
            b.fitness
                .partial_cmp(&a.fitness)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        self.fittest = self.individuals[0].weights.clone();

        let n_winners = self.config.n_winners();
        let n_parents = self.config.n_parents();

        let fitnesses: Vec<f32> = self.individuals.iter().map(|i| i.fitness).collect();
        let weights = selection_weights(&fitnesses);
        let sampler = WeightedIndex::new(&weights)
            .map_err(|e| FxrlError::Other(anyhow::anyhow!("parent sampling weights: {e}")))?;

        // Parents are drawn with replacement under the sign-sensitive
        // softmax weighting.
        let parents: Vec<NetworkWeights> = (0..n_parents)
            .map(|_| self.individuals[sampler.sample(rng)].weights.clone())
            .collect();

        let mut next: Vec<Individual> = self.individuals[..n_winners].to_vec();
        for pair in parents.chunks(2) {
            if let [p1, p2] = pair {
                let (mut c1, mut c2) = crossover(p1, p2, rng);
                mutate(&mut c1, self.config.mutation_rate, self.config.mutation_scale, rng);
                mutate(&mut c2, self.config.mutation_rate, self.config.mutation_scale, rng);
                next.push(Individual { weights: c1, fitness: 0.0 });
                next.push(Individual { weights: c2, fitness: 0.0 });
            } else {
                // Odd parent count: the last parent contributes a single
                // mutated clone.
                let mut c = pair[0].clone();
                mutate(&mut c, self.config.mutation_rate, self.config.mutation_scale, rng);
                next.push(Individual { weights: c, fitness: 0.0 });
            }
        }
        next.truncate(self.config.population_size);
        self.individuals = next;
        Ok(())
    }
}

/// Sign-sensitive softmax over `|f| / sum(|f|) * sign(f)`.
///
/// Deliberately NOT a plain softmax of fitness: negative-fitness
/// individuals are pushed toward the low end of the distribution while
/// magnitude still matters. Preserved as shipped.
pub fn selection_weights(fitnesses: &[f32]) -> Vec<f64> {
    let abs_sum: f64 = fitnesses.iter().map(|f| f.abs() as f64).sum();
    if abs_sum == 0.0 {
        return vec![1.0; fitnesses.len()];
    }
    let scores: Vec<f64> = fitnesses
        .iter()
        .map(|&f| {
            let sign = if f > 0.0 {
                1.0
            } else if f < 0.0 {
                -1.0
            } else {
                0.0
            };
            f.abs() as f64 / abs_sum * sign
        })
        .collect();
    let max = scores.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let exp: Vec<f64> = scores.iter().map(|s| (s - max).exp()).collect();
    let total: f64 = exp.iter().sum();
    exp.into_iter().map(|e| e / total).collect()
}

/// Single-point column crossover on each weight tensor: the cut index is
/// uniform over the tensor's second dimension; columns past the cut swap
/// parents.
pub fn crossover<R: Rng>(
    parent1: &NetworkWeights,
    parent2: &NetworkWeights,
    rng: &mut R,
) -> (NetworkWeights, NetworkWeights) {
    let mut child1 = parent1.clone();
    let mut child2 = parent2.clone();
    for k in 0..child1.tensors.len() {
        let cols = child1.tensors[k].ncols();
        if cols == 0 {
            continue;
        }
        let cut = rng.gen_range(0..cols);
        for col in cut..cols {
            for row in 0..child1.tensors[k].nrows() {
                child1.tensors[k][[row, col]] = parent2.tensors[k][[row, col]];
                child2.tensors[k][[row, col]] = parent1.tensors[k][[row, col]];
            }
        }
    }
    (child1, child2)
}

/// Per-element Bernoulli mask gating an additive Gaussian perturbation.
pub fn mutate<R: Rng>(weights: &mut NetworkWeights, rate: f64, scale: f64, rng: &mut R) {
    let noise = Normal::new(0.0f32, scale as f32).expect("valid normal");
    for tensor in &mut weights.tensors {
        for value in tensor.iter_mut() {
            if rng.gen_bool(rate) {
                *value += noise.sample(rng);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn template() -> NetworkWeights {
        NetworkWeights::new(vec![Array2::zeros((3, 4))])
    }

    fn config(size: usize) -> EvolutionConfig {
        EvolutionConfig {
            population_size: size,
            winner_fraction: 0.4,
            mutation_rate: 0.5,
            mutation_scale: 0.1,
            ..Default::default()
        }
    }

    #[test]
    fn one_generation_conserves_size_and_carries_winners() {
        let mut rng = StdRng::seed_from_u64(17);
        let mut population = Population::new(&template(), config(10), &mut rng);
        for i in 0..10 {
            population.set_fitness(i, i as f32 - 3.0);
        }
        let top_before: Vec<NetworkWeights> = {
            let mut sorted = population.individuals().to_vec();
            sorted.sort_by(|a, b| b.fitness.partial_cmp(&a.fitness).unwrap());
            sorted[..4].iter().map(|i| i.weights.clone()).collect()
        };

        population.evolve(&mut rng).unwrap();

        assert_eq!(population.len(), 10);
        // Exactly the 4 fittest survive byte-identical
        for (survivor, expected) in population.individuals()[..4].iter().zip(&top_before) {
            assert_eq!(&survivor.weights, expected);
        }
    }

    #[test]
    fn fittest_is_recorded_after_evolution() {
        let mut rng = StdRng::seed_from_u64(17);
        let mut population = Population::new(&template(), config(10), &mut rng);
        for i in 0..10 {
            population.set_fitness(i, if i == 7 { 100.0 } else { 0.1 });
        }
        let best = population.individuals()[7].weights.clone();
        population.evolve(&mut rng).unwrap();
        assert_eq!(population.fittest(), &best);
    }

    #[test]
    fn crossover_swaps_columns_past_the_cut() {
        let mut rng = StdRng::seed_from_u64(3);
        let p1 = NetworkWeights::new(vec![Array2::from_elem((2, 4), 1.0)]);
        let p2 = NetworkWeights::new(vec![Array2::from_elem((2, 4), 2.0)]);

        // The cut is uniform over the columns, zero included, so run a
        // few draws and check the structural property each time
        for _ in 0..16 {
            let (c1, c2) = crossover(&p1, &p2, &mut rng);
            let mut crossed = false;
            for col in 0..4 {
                let a = c1.tensors[0][[0, col]];
                let b = c2.tensors[0][[0, col]];
                // Each column comes wholesale from one parent, mirrored
                assert!(a == 1.0 || a == 2.0);
                assert_eq!(a + b, 3.0);
                // Parent-1 columns form a (possibly empty) prefix of
                // child 1; once past the cut every column is parent 2's
                if a == 2.0 {
                    crossed = true;
                } else {
                    assert!(!crossed, "parent-1 column after the cut");
                }
            }
            // A cut inside the tensor always swaps the last column
            assert_eq!(c1.tensors[0][[1, 3]], 2.0);
        }
    }

    #[test]
    fn sign_sensitive_weighting_prefers_positive_fitness() {
        let weights = selection_weights(&[5.0, -5.0, 0.0]);
        assert!(weights[0] > weights[2]);
        assert!(weights[2] > weights[1]);
    }

    #[test]
    fn zero_fitness_population_gets_uniform_weights() {
        let weights = selection_weights(&[0.0, 0.0]);
        assert_eq!(weights, vec![1.0, 1.0]);
    }

    #[test]
    fn mutation_respects_the_bernoulli_mask() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut w = NetworkWeights::new(vec![Array2::zeros((10, 10))]);
        mutate(&mut w, 0.0, 1.0, &mut rng);
        assert!(w.tensors[0].iter().all(|&v| v == 0.0));

        mutate(&mut w, 1.0, 1.0, &mut rng);
        assert!(w.tensors[0].iter().any(|&v| v != 0.0));
    }

    #[test]
    fn restore_rejects_wrong_population_size() {
        let err = Population::from_weights(vec![template(); 3], config(10));
        assert!(err.is_err());
    }
}
