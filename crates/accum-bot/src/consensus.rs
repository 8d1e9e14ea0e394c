//! Multi-engine consensus voter.
//!
//! Runs every registered engine against the same snapshot, concurrently,
//! with a per-engine timeout, then folds the surviving votes into one
//! [`Decision`].
//!
//! ## Aggregation
//!
//! - Confidences are summed per action kind; the highest sum wins, ties go
//!   to the kind voted first (registry order).
//! - `consensus = winner_sum / total_sum × (0.7 + 0.3 × winner_votes / votes)`,
//!   clamped to 1.
//! - The consensus action's size and leverage are the means over the
//!   winning votes. The sizing engine replaces them later.
//! - No surviving votes: blocked HOLD at confidence 0.

use std::sync::Arc;
use std::time::Duration;

use accum_common::{Action, ActionKind, BlockReason, Decision, EngineVote, MarketState};
use futures::future::join_all;
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use crate::engine::{DecisionEngine, EngineError};

/// Configuration for the consensus voter.
#[derive(Debug, Clone)]
pub struct ConsensusConfig {
    /// Per-engine evaluation timeout.
    pub engine_timeout: Duration,
    /// Threshold used by [`ConsensusVoter::run_and_assert`] callers by default.
    pub min_confidence: f64,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            engine_timeout: Duration::from_millis(500),
            min_confidence: 0.75,
        }
    }
}

/// What happened to one engine during a vote.
#[derive(Debug)]
pub enum EngineOutcome {
    Voted(Action),
    Failed(EngineError),
    TimedOut,
}

/// Per-engine outcome, in registry order.
#[derive(Debug)]
pub struct EngineReport {
    pub engine: String,
    pub outcome: EngineOutcome,
}

/// Ordered registry of engines plus the aggregation rule.
pub struct ConsensusVoter {
    config: ConsensusConfig,
    engines: Vec<(String, Arc<dyn DecisionEngine>)>,
}

impl ConsensusVoter {
    pub fn new(config: ConsensusConfig) -> Self {
        Self {
            config,
            engines: Vec::new(),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(ConsensusConfig::default())
    }

    pub fn config(&self) -> &ConsensusConfig {
        &self.config
    }

    /// Register an engine under its own name.
    pub fn register(&mut self, engine: Arc<dyn DecisionEngine>) {
        let name = engine.name().to_string();
        self.register_as(name, engine);
    }

    /// Register an engine under an explicit name.
    pub fn register_as(&mut self, name: impl Into<String>, engine: Arc<dyn DecisionEngine>) {
        self.engines.push((name.into(), engine));
    }

    pub fn engine_names(&self) -> Vec<&str> {
        self.engines.iter().map(|(name, _)| name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.engines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.engines.is_empty()
    }

    /// Invoke every engine concurrently and collect their outcomes.
    ///
    /// Each engine runs on its own task, so one that blocks its thread or
    /// panics cannot stall or take down the others. A task still running
    /// at the deadline is aborted and reported as timed out.
    pub async fn collect_votes(&self, snapshot: &MarketState) -> Vec<EngineReport> {
        let timeout = self.config.engine_timeout;
        let calls = self.engines.iter().map(|(name, engine)| {
            let engine = Arc::clone(engine);
            let snapshot = snapshot.clone();
            let mut handle = tokio::spawn(async move { engine.evaluate(&snapshot).await });
            async move {
                let outcome = match tokio::time::timeout(timeout, &mut handle).await {
                    Ok(Ok(Ok(action))) => EngineOutcome::Voted(action),
                    Ok(Ok(Err(e))) => EngineOutcome::Failed(e),
                    Ok(Err(join_err)) => {
                        EngineOutcome::Failed(EngineError::evaluation(name, join_err.to_string()))
                    }
                    Err(_) => {
                        handle.abort();
                        EngineOutcome::TimedOut
                    }
                };
                EngineReport {
                    engine: name.clone(),
                    outcome,
                }
            }
        });
        join_all(calls).await
    }

    /// Run all engines and aggregate their votes.
    pub async fn run(&self, snapshot: &MarketState) -> Decision {
        let reports = self.collect_votes(snapshot).await;
        let timeout_ms = self.config.engine_timeout.as_millis() as u64;

        let mut votes = Vec::with_capacity(reports.len());
        for report in reports {
            match report.outcome {
                EngineOutcome::Voted(action) => {
                    debug!(
                        engine = %report.engine,
                        kind = %action.kind,
                        confidence = action.confidence,
                        "Engine vote"
                    );
                    votes.push(EngineVote {
                        engine: report.engine,
                        action,
                    });
                }
                EngineOutcome::Failed(e) => {
                    warn!(engine = %report.engine, error = %e, "Engine failed, vote dropped");
                }
                EngineOutcome::TimedOut => {
                    warn!(engine = %report.engine, timeout_ms, "Engine timed out, vote dropped");
                }
            }
        }

        aggregate(votes, snapshot.clone())
    }

    /// Run, then block the decision if consensus confidence is below
    /// `min_confidence`.
    pub async fn run_and_assert(&self, snapshot: &MarketState, min_confidence: f64) -> Decision {
        let mut decision = self.run(snapshot).await;
        if decision.confidence < min_confidence {
            info!(
                confidence = decision.confidence,
                min_confidence,
                kind = %decision.action.kind,
                "Consensus below threshold"
            );
            decision.block(BlockReason::LowConfidence);
        }
        decision
    }
}

/// Fold votes into a decision. Pure; exposed for testing.
pub fn aggregate(votes: Vec<EngineVote>, snapshot: MarketState) -> Decision {
    if votes.is_empty() {
        return Decision::blocked(
            Action::hold(0.0),
            0.0,
            vec![BlockReason::LowConfidence],
            votes,
            snapshot,
        );
    }

    // (kind, summed confidence, vote count), in first-seen order.
    let mut tally: Vec<(ActionKind, f64, usize)> = Vec::new();
    for vote in &votes {
        match tally.iter_mut().find(|(kind, _, _)| *kind == vote.action.kind) {
            Some(entry) => {
                entry.1 += vote.action.confidence;
                entry.2 += 1;
            }
            None => tally.push((vote.action.kind, vote.action.confidence, 1)),
        }
    }

    let mut winner = tally[0];
    for entry in &tally[1..] {
        if entry.1 > winner.1 {
            winner = *entry;
        }
    }
    let (kind, winner_sum, winner_count) = winner;

    let total: f64 = tally.iter().map(|(_, sum, _)| sum).sum();
    let share = if total > 0.0 { winner_sum / total } else { 0.0 };
    let agreement = winner_count as f64 / votes.len() as f64;
    let consensus = (share * (0.7 + 0.3 * agreement)).min(1.0);

    let matching: Vec<&Action> = votes
        .iter()
        .map(|v| &v.action)
        .filter(|a| a.kind == kind)
        .collect();
    let n = Decimal::from(matching.len());
    let size = matching.iter().map(|a| a.size).sum::<Decimal>() / n;
    let leverage = matching.iter().map(|a| a.leverage).sum::<Decimal>() / n;

    let action = Action::new(kind, consensus)
        .with_size(size)
        .with_leverage(leverage)
        .with_meta("votes_for", winner_count)
        .with_meta("total_votes", votes.len());

    Decision::approved(action, consensus, votes, snapshot)
}
