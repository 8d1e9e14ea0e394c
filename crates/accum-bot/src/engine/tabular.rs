//! Tabular Q-learning decision engine.
//!
//! Snapshots are bucketed by regime (5), volatility (3 bins) and liquidity
//! (3 bins) into one of 45 integer states:
//!
//! ```text
//! bucket = regime_index * 9 + volatility_bin * 3 + liquidity_bin
//! ```
//!
//! Each visited bucket holds one value per [`ActionKind`], zero-initialized
//! on first visit. Buckets are never removed.

use std::collections::HashMap;

use accum_common::{Action, ActionKind, MarketState};
use async_trait::async_trait;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use serde::Serialize;
use tracing::debug;

use super::{DecisionEngine, EngineError};

const KINDS: usize = ActionKind::ALL.len();

/// Configuration for the tabular engine.
#[derive(Debug, Clone)]
pub struct TabularConfig {
    pub learning_rate: f64,
    pub discount_factor: f64,
    pub epsilon: f64,
    pub epsilon_decay: f64,
    pub min_epsilon: f64,
    /// Volatility bin edges (low | medium | high).
    pub volatility_bins: [f64; 2],
    /// Liquidity score bin edges (low | medium | high).
    pub liquidity_bins: [f64; 2],
    /// Fraction of capital proposed at confidence 1.
    pub base_size: f64,
    pub seed: u64,
}

impl Default for TabularConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.1,
            discount_factor: 0.95,
            epsilon: 0.1,
            epsilon_decay: 0.995,
            min_epsilon: 0.01,
            volatility_bins: [0.02, 0.05],
            liquidity_bins: [0.4, 0.7],
            base_size: 0.1,
            seed: 7,
        }
    }
}

/// Serializable view of the learner.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TabularState {
    pub episode_count: u64,
    pub epsilon: f64,
    pub table_size: usize,
}

struct Learner {
    table: HashMap<u32, [f64; KINDS]>,
    epsilon: f64,
    episode_count: u64,
    rng: StdRng,
}

/// Epsilon-greedy Q-learning voter.
pub struct TabularEngine {
    name: String,
    config: TabularConfig,
    learner: Mutex<Learner>,
}

impl TabularEngine {
    pub fn new(config: TabularConfig) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        Self {
            name: "tabular".to_string(),
            learner: Mutex::new(Learner {
                table: HashMap::new(),
                epsilon: config.epsilon,
                episode_count: 0,
                rng,
            }),
            config,
        }
    }

    pub fn with_seed(seed: u64) -> Self {
        Self::new(TabularConfig {
            seed,
            ..Default::default()
        })
    }

    pub fn state(&self) -> TabularState {
        let learner = self.learner.lock();
        TabularState {
            episode_count: learner.episode_count,
            epsilon: learner.epsilon,
            table_size: learner.table.len(),
        }
    }

    /// Integer bucket for a snapshot.
    pub fn bucket(&self, snapshot: &MarketState) -> u32 {
        let vol = bin(snapshot.volatility, self.config.volatility_bins);
        let liq = bin(snapshot.liquidity_score, self.config.liquidity_bins);
        (snapshot.regime.index() as u32) * 9 + vol * 3 + liq
    }

    /// Current value estimate, `None` if the bucket was never visited.
    pub fn q_value(&self, bucket: u32, kind: ActionKind) -> Option<f64> {
        self.learner
            .lock()
            .table
            .get(&bucket)
            .map(|values| values[kind.index()])
    }

    /// Pick an action for the snapshot.
    ///
    /// Returns the kind, its confidence, the bucket and whether the pick
    /// was exploratory.
    pub fn select(&self, snapshot: &MarketState) -> (ActionKind, f64, u32, bool) {
        let bucket = self.bucket(snapshot);
        let mut learner = self.learner.lock();
        let learner = &mut *learner;
        let values = *learner.table.entry(bucket).or_insert([0.0; KINDS]);

        if learner.rng.r#gen::<f64>() < learner.epsilon {
            let kind = ActionKind::ALL[learner.rng.gen_range(0..KINDS)];
            return (kind, 0.3, bucket, true);
        }

        // Ties resolve to Hold, then to canonical order.
        let mut best = ActionKind::Hold;
        for kind in ActionKind::ALL {
            if values[kind.index()] > values[best.index()] {
                best = kind;
            }
        }
        let max = values[best.index()];
        let avg = values.iter().sum::<f64>() / KINDS as f64;
        let confidence = if max > avg {
            (0.5 + (max - avg) * 2.0).min(0.9)
        } else {
            0.5
        };
        (best, confidence, bucket, false)
    }

    /// One-step Q-learning update.
    pub fn update(
        &self,
        state: &MarketState,
        action: ActionKind,
        reward: f64,
        next_state: &MarketState,
        done: bool,
    ) {
        let bucket = self.bucket(state);
        let next_bucket = self.bucket(next_state);
        self.update_bucket(bucket, action, reward, next_bucket, done);
    }

    /// Same as [`TabularEngine::update`] on precomputed buckets.
    pub fn update_bucket(
        &self,
        bucket: u32,
        action: ActionKind,
        reward: f64,
        next_bucket: u32,
        done: bool,
    ) {
        let cfg = &self.config;
        let mut learner = self.learner.lock();
        let next_max = learner
            .table
            .entry(next_bucket)
            .or_insert([0.0; KINDS])
            .iter()
            .copied()
            .fold(f64::NEG_INFINITY, f64::max);
        let target = if done {
            reward
        } else {
            reward + cfg.discount_factor * next_max
        };

        let values = learner.table.entry(bucket).or_insert([0.0; KINDS]);
        let current = values[action.index()];
        values[action.index()] = current + cfg.learning_rate * (target - current);
        let updated = values[action.index()];

        if done {
            learner.episode_count += 1;
            learner.epsilon = (learner.epsilon * cfg.epsilon_decay).max(cfg.min_epsilon);
        }
        debug!(
            bucket,
            action = %action,
            reward,
            q_before = current,
            q_after = updated,
            epsilon = learner.epsilon,
            "Q-value updated"
        );
    }
}

#[async_trait]
impl DecisionEngine for TabularEngine {
    fn name(&self) -> &str {
        &self.name
    }

    async fn evaluate(&self, snapshot: &MarketState) -> Result<Action, EngineError> {
        let (kind, confidence, bucket, explored) = self.select(snapshot);
        let q = self.q_value(bucket, kind).unwrap_or(0.0);
        let mut action = Action::new(kind, confidence)
            .with_meta("bucket", bucket)
            .with_meta("q_value", q)
            .with_meta("explored", explored);
        if kind.is_entry() {
            let size = self.config.base_size * confidence;
            action.set_size(Decimal::from_f64(size).unwrap_or(Decimal::ZERO));
        }
        Ok(action)
    }
}

fn bin(value: f64, edges: [f64; 2]) -> u32 {
    if value < edges[0] {
        0
    } else if value < edges[1] {
        1
    } else {
        2
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use accum_common::MarketRegime;
    use rust_decimal_macros::dec;

    fn greedy() -> TabularEngine {
        TabularEngine::new(TabularConfig {
            epsilon: 0.0,
            min_epsilon: 0.0,
            ..Default::default()
        })
    }

    fn snapshot(regime: MarketRegime, volatility: f64, liquidity: f64) -> MarketState {
        let mut s = MarketState::new("SOL", dec!(100));
        s.regime = regime;
        s.volatility = volatility;
        s.liquidity_score = liquidity;
        s
    }

    #[test]
    fn test_bucket_encoding() {
        let engine = greedy();
        assert_eq!(engine.bucket(&snapshot(MarketRegime::TrendingUp, 0.01, 0.1)), 0);
        assert_eq!(engine.bucket(&snapshot(MarketRegime::TrendingUp, 0.03, 0.5)), 4);
        assert_eq!(engine.bucket(&snapshot(MarketRegime::Unknown, 0.09, 0.9)), 44);
    }

    #[test]
    fn test_unvisited_bucket_prefers_hold() {
        let engine = greedy();
        let (kind, confidence, _, explored) =
            engine.select(&snapshot(MarketRegime::Ranging, 0.01, 0.8));
        assert_eq!(kind, ActionKind::Hold);
        assert_eq!(confidence, 0.5);
        assert!(!explored);
        assert_eq!(engine.state().table_size, 1);
    }

    #[test]
    fn test_terminal_update_moves_toward_reward() {
        let engine = greedy();
        let s = snapshot(MarketRegime::TrendingUp, 0.01, 0.8);
        let bucket = engine.bucket(&s);

        engine.update(&s, ActionKind::Long, 1.0, &s, true);
        assert!((engine.q_value(bucket, ActionKind::Long).unwrap() - 0.1).abs() < 1e-12);

        engine.update(&s, ActionKind::Short, -1.0, &s, true);
        assert!((engine.q_value(bucket, ActionKind::Short).unwrap() + 0.1).abs() < 1e-12);

        let (kind, confidence, _, _) = engine.select(&s);
        assert_eq!(kind, ActionKind::Long);
        // max 0.1, mean 0.0 -> 0.5 + 0.2
        assert!((confidence - 0.7).abs() < 1e-12);
    }

    #[test]
    fn test_non_terminal_update_uses_successor() {
        let engine = greedy();
        let s = snapshot(MarketRegime::TrendingUp, 0.01, 0.8);
        let next = snapshot(MarketRegime::TrendingDown, 0.01, 0.8);
        engine.update(&next, ActionKind::Hold, 10.0, &next, true);
        engine.update(&s, ActionKind::Long, 0.0, &next, false);
        // 0.1 * (0 + 0.95 * 1.0)
        let q = engine.q_value(engine.bucket(&s), ActionKind::Long).unwrap();
        assert!((q - 0.095).abs() < 1e-12);
        assert_eq!(engine.state().episode_count, 1);
    }

    #[test]
    fn test_epsilon_decays_to_floor() {
        let engine = TabularEngine::new(TabularConfig {
            epsilon: 0.02,
            epsilon_decay: 0.5,
            min_epsilon: 0.01,
            ..Default::default()
        });
        let s = snapshot(MarketRegime::Ranging, 0.01, 0.8);
        engine.update(&s, ActionKind::Hold, 0.0, &s, false);
        assert_eq!(engine.state().epsilon, 0.02);
        engine.update(&s, ActionKind::Hold, 0.0, &s, true);
        assert_eq!(engine.state().epsilon, 0.01);
        engine.update(&s, ActionKind::Hold, 0.0, &s, true);
        assert_eq!(engine.state().epsilon, 0.01);
    }

    #[test]
    fn test_full_exploration_reports_low_confidence() {
        let engine = TabularEngine::new(TabularConfig {
            epsilon: 1.0,
            ..Default::default()
        });
        let s = snapshot(MarketRegime::Ranging, 0.01, 0.8);
        for _ in 0..10 {
            let (_, confidence, _, explored) = engine.select(&s);
            assert!(explored);
            assert_eq!(confidence, 0.3);
        }
    }

    #[tokio::test]
    async fn test_evaluate_attaches_metadata() {
        let engine = greedy();
        let action = engine
            .evaluate(&snapshot(MarketRegime::Ranging, 0.01, 0.8))
            .await
            .unwrap();
        assert_eq!(action.metadata["bucket"], 20);
        assert_eq!(action.metadata["explored"], false);
    }
}
