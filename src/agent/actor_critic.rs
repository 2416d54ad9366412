//! Actor-critic agent with population-based policy search
//!
//! Continuous two-dimensional actions (trade-class signal, leverage),
//! twin critics with a shared value head, and an evolutionary search
//! over actor weights in place of a policy gradient: every few
//! iterations the population is scored against the online critic and the
//! fittest individual becomes the acting policy. The critic itself is
//! trained by gradient descent with Huber losses, and the target network
//! tracks the online one through soft updates.

use ndarray::{Array1, Array2, Array3, Axis};
use rand::prelude::Distribution;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::Normal;
use tracing::debug;

use crate::agent::evolution::Population;
use crate::agent::{
    is_eval_iteration, stack_batch, ActionBatch, AgentSnapshot, AgentState, TradeDecision,
    TrainReport, TrainableAgent, PRIORITY_EPSILON,
};
use crate::config::{AgentConfig, EvolutionConfig};
use crate::error::{FxrlError, Result};
use crate::memory::{Action, PrioritizedReplayBuffer, Transition};
use crate::network::{huber_value, ActorCriticNetwork, CRITIC_HUBER_DELTA};

/// Iterations during which the policy is pure uniform exploration.
const WARMUP_RANDOM_ITERATIONS: usize = 100;

/// Actor-critic agent over a continuous `[signal, leverage]` action pair.
pub struct ActorCriticAgent {
    online: Box<dyn ActorCriticNetwork>,
    target: Box<dyn ActorCriticNetwork>,
    population: Population,
    state: AgentState,
    config: AgentConfig,
    evolution: EvolutionConfig,
    /// Initial learning rate, the base of the exponential decay schedule
    base_lr: f32,
    /// Counts exploration-noise draws; every 5th draw widens the noise
    random_counter: usize,
    rng: StdRng,
}

impl ActorCriticAgent {
    /// Build the agent, freeze the target network from the online one and
    /// seed the actor-weight population.
    pub fn new(
        online: Box<dyn ActorCriticNetwork>,
        mut target: Box<dyn ActorCriticNetwork>,
        config: AgentConfig,
        evolution: EvolutionConfig,
        seed: u64,
    ) -> Result<Self> {
        target.set_weights(&online.weights())?;
        let mut rng = StdRng::seed_from_u64(seed);
        let population = Population::new(&online.actor_weights(), evolution.clone(), &mut rng);
        // The discount starts at zero and ramps through the adaptive
        // schedule in gamma_update.
        let state = AgentState::new(config.lr, 0.0);
        Ok(Self {
            online,
            target,
            population,
            base_lr: config.lr,
            state,
            config,
            evolution,
            random_counter: 0,
            rng,
        })
    }

    /// Stack continuous actions into a `[batch, 2]` matrix.
    fn continuous_matrix(actions: &[Action]) -> Result<Array2<f32>> {
        let mut out = Array2::zeros((actions.len(), 2));
        for (i, action) in actions.iter().enumerate() {
            match action {
                Action::Continuous(v) => {
                    out[[i, 0]] = v[0];
                    out[[i, 1]] = v[1];
                }
                Action::Discrete(_) => {
                    return Err(FxrlError::shape(
                        "continuous action",
                        format!("{action:?}"),
                    ))
                }
            }
        }
        Ok(out)
    }

    /// Per-transition Huber error between the mean twin-critic estimate
    /// and `r + gamma * target_v`, both evaluated at the stored states
    /// and actions.
    fn huber_priorities(
        &self,
        states: &Array3<f32>,
        actions: &Array2<f32>,
        rewards: &Array1<f32>,
    ) -> Vec<f32> {
        let q = self.online.critic(states, actions).mean_q();
        let target_v = self.target.critic(states, actions).v;
        (0..rewards.len())
            .map(|i| {
                let e = rewards[i] + self.state.gamma * target_v[i] - q[i];
                huber_value(e, CRITIC_HUBER_DELTA)
            })
            .collect()
    }

    /// Score every individual against the online critic, run one
    /// generation and install the fittest actor.
    fn evolve_policy(&mut self, states: &Array3<f32>) -> Result<()> {
        for idx in 0..self.population.len() {
            let weights = self.population.individuals()[idx].weights.clone();
            self.online.set_actor_weights(&weights)?;
            let pi = self.online.act(states);
            let fitness = self
                .online
                .critic(states, &pi)
                .mean_q()
                .mean()
                .unwrap_or(0.0);
            self.population.set_fitness(idx, fitness);
        }
        self.population.evolve(&mut self.rng)?;
        let fittest = self.population.fittest().clone();
        self.online.set_actor_weights(&fittest)?;

        let mut target_weights = self.target.weights();
        target_weights.soft_update(&self.online.weights(), self.evolution.tau)?;
        self.target.set_weights(&target_weights)?;
        debug!(iteration = self.state.iteration, "population generation");
        Ok(())
    }

    fn uniform_pair<R: Rng>(rng: &mut R) -> [f32; 2] {
        [rng.gen_range(-1.0..=1.0), rng.gen_range(-1.0..=1.0)]
    }
}

impl TrainableAgent for ActorCriticAgent {
    fn policy(&mut self, states: &Array3<f32>, iteration: usize) -> ActionBatch {
        let batch = states.len_of(Axis(0));

        if iteration <= WARMUP_RANDOM_ITERATIONS {
            let mut out = Array2::zeros((batch, 2));
            for mut row in out.rows_mut() {
                let pair = Self::uniform_pair(&mut self.rng);
                row[0] = pair[0];
                row[1] = pair[1];
            }
            return ActionBatch::Continuous(out);
        }

        let mut policy = self.online.act(states);
        if !is_eval_iteration(iteration) {
            // Every 5th noisy pass widens the perturbation and also
            // resamples roughly half the rows uniformly.
            let wide = self.random_counter % 5 == 0;
            let eps_noise = if wide { 0.5 } else { 0.1 };
            let noise = Normal::new(0.0f32, 1.0).expect("valid normal");
            for v in policy.iter_mut() {
                *v += eps_noise * noise.sample(&mut self.rng);
            }
            if wide {
                for mut row in policy.rows_mut() {
                    if self.rng.gen::<f32>() < 0.5 {
                        let pair = Self::uniform_pair(&mut self.rng);
                        row[0] = pair[0];
                        row[1] = pair[1];
                    }
                }
            }
            self.random_counter += 1;
        }
        ActionBatch::Continuous(policy)
    }

    fn decision(&self, actions: &ActionBatch) -> TradeDecision {
        let matrix = match actions {
            ActionBatch::Continuous(m) => m,
            ActionBatch::Discrete(_) => {
                return TradeDecision {
                    classes: Vec::new(),
                    leverage: None,
                }
            }
        };
        let mut classes = Vec::with_capacity(matrix.nrows());
        let mut leverage = Vec::with_capacity(matrix.nrows());
        for row in matrix.rows() {
            classes.push(if row[0] > 0.5 { 0 } else { 1 });
            // Long exposure is scaled up, short exposure damped
            leverage.push(if row[1] > 0.0 {
                row[1] * 2.5
            } else {
                row[1] * 0.5
            });
        }
        TradeDecision {
            classes,
            leverage: Some(leverage),
        }
    }

    fn priorities(&self, transitions: &[Transition]) -> Result<Vec<f32>> {
        let (states, _next_states, rewards, actions) = stack_batch(transitions)?;
        let actions = Self::continuous_matrix(&actions)?;
        Ok(self.huber_priorities(&states, &actions, &rewards))
    }

    fn train(&mut self, memory: &mut PrioritizedReplayBuffer) -> Result<TrainReport> {
        let batch = memory.sample(self.config.batch_size, &mut self.rng)?;
        let (states, next_states, rewards, actions) = stack_batch(&batch.transitions)?;
        let actions = Self::continuous_matrix(&actions)?;

        // Value target is the mean twin-critic estimate under the
        // current policy's own actions.
        let pi = self.online.act(&states);
        let v_backup = self
            .online
            .critic(&states, &pi)
            .mean_q()
            .mean()
            .unwrap_or(0.0);

        let target_v = self.target.critic(&next_states, &actions).v;
        let q_backup = &rewards + &target_v.mapv(|v| self.state.gamma * v);

        let new_priorities: Vec<f32> = self
            .huber_priorities(&states, &actions, &rewards)
            .into_iter()
            .map(|p| p + PRIORITY_EPSILON)
            .collect();
        memory.batch_update(&batch.tree_indices, &new_priorities)?;

        let loss = self.online.fit_critic(&states, &actions, &q_backup, v_backup)?;
        self.state.train_steps += 1;

        if self.state.iteration >= self.evolution.evolve_after
            && self.state.iteration % self.evolution.evolve_interval == 0
        {
            self.evolve_policy(&states)?;
        }
        debug!(loss, step = self.state.train_steps, "actor-critic train step");

        Ok(TrainReport {
            loss,
            batch_size: batch.len(),
        })
    }

    fn lr_decay(&mut self, iteration: usize) {
        let lr = self.base_lr * 0.0001f32.powf(iteration as f32 / 10_000_000.0);
        self.online.set_learning_rate(lr);
        self.state.learning_rate = lr;
    }

    /// Adaptive discount: starts at zero, saturates toward 0.2.
    fn gamma_update(&mut self, iteration: usize) {
        self.state.gamma = 1.0 - (0.8 + 0.2 * (-1e-5 * iteration as f32).exp());
    }

    fn state(&self) -> &AgentState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut AgentState {
        &mut self.state
    }

    fn snapshot(&self) -> AgentSnapshot {
        AgentSnapshot {
            state: self.state.clone(),
            weights: self.online.weights(),
            target_weights: self.target.weights(),
            population: Some(self.population.weight_vectors()),
            saved_at: chrono::Utc::now(),
        }
    }

    fn restore(&mut self, snapshot: &AgentSnapshot) -> Result<()> {
        self.online.set_weights(&snapshot.weights)?;
        self.target.set_weights(&snapshot.target_weights)?;
        if let Some(population) = &snapshot.population {
            self.population =
                Population::from_weights(population.clone(), self.evolution.clone())?;
        }
        self.state = snapshot.state.clone();
        self.online.set_learning_rate(self.state.learning_rate);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MemoryConfig;
    use crate::network::{CriticEstimate, LinearActorCritic, NetworkWeights};

    /// Critic stub with scripted outputs for backup verification.
    struct ScriptedCritic {
        q: f32,
        v: f32,
        lr: f32,
        actor: NetworkWeights,
    }

    impl ScriptedCritic {
        fn boxed(q: f32, v: f32) -> Box<dyn ActorCriticNetwork> {
            Box::new(Self {
                q,
                v,
                lr: 1e-3,
                actor: NetworkWeights::new(vec![Array2::zeros((4, 2))]),
            })
        }
    }

    impl ActorCriticNetwork for ScriptedCritic {
        fn act(&self, states: &Array3<f32>) -> Array2<f32> {
            Array2::from_elem((states.len_of(Axis(0)), 2), 0.25)
        }

        fn critic(&self, states: &Array3<f32>, _actions: &Array2<f32>) -> CriticEstimate {
            let n = states.len_of(Axis(0));
            CriticEstimate {
                q1: Array1::from_elem(n, self.q),
                q2: Array1::from_elem(n, self.q),
                v: Array1::from_elem(n, self.v),
            }
        }

        fn fit_critic(
            &mut self,
            _states: &Array3<f32>,
            _actions: &Array2<f32>,
            _q_backup: &Array1<f32>,
            _v_backup: f32,
        ) -> Result<f32> {
            Ok(0.0)
        }

        fn learning_rate(&self) -> f32 {
            self.lr
        }

        fn set_learning_rate(&mut self, lr: f32) {
            self.lr = lr;
        }

        fn actor_weights(&self) -> NetworkWeights {
            self.actor.clone()
        }

        fn set_actor_weights(&mut self, weights: &NetworkWeights) -> Result<()> {
            self.actor = weights.clone();
            Ok(())
        }

        fn weights(&self) -> NetworkWeights {
            self.actor.clone()
        }

        fn set_weights(&mut self, weights: &NetworkWeights) -> Result<()> {
            self.actor = weights.clone();
            Ok(())
        }
    }

    fn small_config() -> AgentConfig {
        AgentConfig {
            batch_size: 4,
            ..Default::default()
        }
    }

    fn small_evolution() -> EvolutionConfig {
        EvolutionConfig {
            population_size: 6,
            ..Default::default()
        }
    }

    fn transition(reward: f32, action: [f32; 2]) -> Transition {
        Transition {
            state: Array2::zeros((3, 2)),
            action: Action::Continuous(action),
            n_step_return: reward,
            next_state: Array2::zeros((3, 2)),
        }
    }

    fn scripted_agent(q: f32, v: f32) -> ActorCriticAgent {
        ActorCriticAgent::new(
            ScriptedCritic::boxed(q, v),
            ScriptedCritic::boxed(q, v),
            small_config(),
            small_evolution(),
            42,
        )
        .unwrap()
    }

    #[test]
    fn warmup_policy_is_uniform_in_the_action_box() {
        let mut agent = scripted_agent(0.0, 0.0);
        let states = Array3::zeros((8, 3, 2));
        let actions = agent.policy(&states, 10);
        match actions {
            ActionBatch::Continuous(m) => {
                assert_eq!(m.dim(), (8, 2));
                assert!(m.iter().all(|&v| (-1.0..=1.0).contains(&v)));
            }
            _ => panic!("expected continuous actions"),
        }
    }

    #[test]
    fn eval_policy_is_the_deterministic_actor_output() {
        let mut agent = scripted_agent(0.0, 0.0);
        let states = Array3::zeros((4, 3, 2));
        // (i + 1) % 5 == 0 and past the random warm-up
        let a = agent.policy(&states, 999);
        let b = agent.policy(&states, 999);
        match (a, b) {
            (ActionBatch::Continuous(x), ActionBatch::Continuous(y)) => {
                assert_eq!(x, y);
                assert!(x.iter().all(|&v| v == 0.25));
            }
            _ => panic!("expected continuous actions"),
        }
    }

    #[test]
    fn decision_thresholds_class_and_scales_leverage() {
        let agent = scripted_agent(0.0, 0.0);
        let mut m = Array2::zeros((2, 2));
        m[[0, 0]] = 0.6;
        m[[0, 1]] = 0.4;
        m[[1, 0]] = 0.4;
        m[[1, 1]] = -0.4;
        let d = agent.decision(&ActionBatch::Continuous(m));

        assert_eq!(d.classes, vec![0, 1]);
        let leverage = d.leverage.unwrap();
        assert!((leverage[0] - 1.0).abs() < 1e-6);
        assert!((leverage[1] + 0.2).abs() < 1e-6);
    }

    #[test]
    fn priorities_are_huber_errors_of_the_value_backup() {
        let mut agent = scripted_agent(1.0, 2.0);
        agent.state.gamma = 0.5;
        // backup = 1 + 0.5 * 2 = 2, q = 1, |e| = 1 <= delta, huber = 0.5
        let p = agent.priorities(&[transition(1.0, [0.1, 0.2])]).unwrap();
        assert_eq!(p.len(), 1);
        assert!((p[0] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn gamma_ramps_from_zero_toward_its_ceiling() {
        let mut agent = scripted_agent(0.0, 0.0);
        agent.gamma_update(0);
        assert!(agent.state().gamma.abs() < 1e-6);
        agent.gamma_update(100_000_000);
        assert!((agent.state().gamma - 0.2).abs() < 1e-3);
    }

    #[test]
    fn lr_decays_exponentially_over_the_run() {
        let mut agent = scripted_agent(0.0, 0.0);
        agent.lr_decay(0);
        let base = agent.state().learning_rate;
        agent.lr_decay(10_000_000);
        assert!((agent.state().learning_rate - base * 1e-4).abs() < base * 1e-6);
    }

    #[test]
    fn train_updates_priorities_and_evolves_past_the_gate() {
        let mut rng = StdRng::seed_from_u64(7);
        let online = Box::new(LinearActorCritic::new(3, 2, 1e-3, &mut rng));
        let target = Box::new(LinearActorCritic::new(3, 2, 1e-3, &mut rng));
        // Agent seed distinct from the network rng so the population is
        // not initialized from the same sample stream as the actor
        let mut agent =
            ActorCriticAgent::new(online, target, small_config(), small_evolution(), 99).unwrap();
        agent.state.iteration = 50;
        agent.gamma_update(50);

        let mut memory = PrioritizedReplayBuffer::new(&MemoryConfig {
            capacity: 64,
            max_priority: 1.0,
        });
        // Non-zero, varied states so critic estimates (and fitnesses)
        // differ across individuals
        for i in 0..16 {
            let mut t = transition(i as f32 * 0.1, [0.1, -0.1]);
            t.state.fill(0.3 + i as f32 * 0.05);
            t.next_state.fill(0.4 + i as f32 * 0.05);
            memory.store(t, 1.0).unwrap();
        }
        let actor_before = agent.online.actor_weights();
        let report = agent.train(&mut memory).unwrap();

        assert_eq!(report.batch_size, 4);
        assert_eq!(agent.state().train_steps, 1);
        // The generation installed the fittest individual's actor
        assert_eq!(agent.online.actor_weights(), *agent.population.fittest());
        assert_ne!(agent.online.actor_weights(), actor_before);
    }

    #[test]
    fn snapshot_roundtrip_restores_the_population() {
        let mut agent = scripted_agent(0.0, 0.0);
        agent.state.iteration = 123;
        let snapshot = agent.snapshot();
        assert_eq!(snapshot.population.as_ref().unwrap().len(), 6);

        let mut restored = scripted_agent(0.0, 0.0);
        restored.restore(&snapshot).unwrap();
        assert_eq!(restored.state().iteration, 123);
        assert_eq!(restored.population.weight_vectors().len(), 6);
    }
}
