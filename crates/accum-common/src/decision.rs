//! Actions, engine votes and consensus decisions.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::types::{MarketState, Side};

/// Hard ceiling on any leverage multiplier carried by an [`Action`].
pub const MAX_LEVERAGE: Decimal = Decimal::from_parts(5, 0, 0, false, 0);

/// The five canonical action kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    /// Open or add to a long position.
    Long,
    /// Open or add to a short position.
    Short,
    /// Do nothing this cycle.
    Hold,
    /// Close every open position.
    Exit,
    /// Close part of the book.
    Reduce,
}

impl ActionKind {
    /// All action kinds in canonical order. Ties in aggregation resolve to
    /// whichever kind was seen first, so this order only matters for tables.
    pub const ALL: [ActionKind; 5] = [
        ActionKind::Long,
        ActionKind::Short,
        ActionKind::Hold,
        ActionKind::Exit,
        ActionKind::Reduce,
    ];

    pub fn index(&self) -> usize {
        match self {
            ActionKind::Long => 0,
            ActionKind::Short => 1,
            ActionKind::Hold => 2,
            ActionKind::Exit => 3,
            ActionKind::Reduce => 4,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Long => "long",
            ActionKind::Short => "short",
            ActionKind::Hold => "hold",
            ActionKind::Exit => "exit",
            ActionKind::Reduce => "reduce",
        }
    }

    /// Whether this kind opens new exposure.
    pub fn is_entry(&self) -> bool {
        matches!(self, ActionKind::Long | ActionKind::Short)
    }

    /// Order side for entry kinds.
    pub fn entry_side(&self) -> Option<Side> {
        match self {
            ActionKind::Long => Some(Side::Buy),
            ActionKind::Short => Some(Side::Sell),
            _ => None,
        }
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A proposed trade.
///
/// Constructors and setters clamp every bounded field: confidence into
/// [0, 1], size into [0, 1], leverage into [1, MAX_LEVERAGE].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub kind: ActionKind,
    pub confidence: f64,
    /// Fraction of capital to deploy.
    pub size: Decimal,
    pub leverage: Decimal,
    pub stop_loss_pct: Option<Decimal>,
    pub take_profit_pct: Option<Decimal>,
    /// Engine-internal diagnostics (Q-value, bucket id, ...).
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl Action {
    pub fn new(kind: ActionKind, confidence: f64) -> Self {
        Self {
            kind,
            confidence: clamp_unit(confidence),
            size: Decimal::ZERO,
            leverage: Decimal::ONE,
            stop_loss_pct: None,
            take_profit_pct: None,
            metadata: Map::new(),
        }
    }

    /// A zero-size hold.
    pub fn hold(confidence: f64) -> Self {
        Self::new(ActionKind::Hold, confidence)
    }

    pub fn with_size(mut self, size: Decimal) -> Self {
        self.set_size(size);
        self
    }

    pub fn with_leverage(mut self, leverage: Decimal) -> Self {
        self.set_leverage(leverage);
        self
    }

    pub fn with_stops(mut self, stop_loss_pct: Decimal, take_profit_pct: Decimal) -> Self {
        self.stop_loss_pct = Some(stop_loss_pct);
        self.take_profit_pct = Some(take_profit_pct);
        self
    }

    pub fn with_meta(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    pub fn set_size(&mut self, size: Decimal) {
        self.size = size.clamp(Decimal::ZERO, Decimal::ONE);
    }

    pub fn set_leverage(&mut self, leverage: Decimal) {
        self.leverage = leverage.clamp(Decimal::ONE, MAX_LEVERAGE);
    }

    pub fn set_confidence(&mut self, confidence: f64) {
        self.confidence = clamp_unit(confidence);
    }
}

/// Clamp to [0, 1], mapping NaN to 0.
pub fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(0.0, 1.0)
}

/// One engine's raw vote, kept verbatim for audit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineVote {
    pub engine: String,
    pub action: Action,
}

/// Why a cycle was blocked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BlockReason {
    HighMevRisk,
    HighLatency,
    PriceJump,
    EmaDeviation,
    LowVolume,
    LowConfidence,
    CircuitBreaker,
    MaxLossExceeded,
}

impl BlockReason {
    /// Get a short code for this reason.
    pub fn code(&self) -> &'static str {
        match self {
            BlockReason::HighMevRisk => "HIGH_MEV_RISK",
            BlockReason::HighLatency => "HIGH_LATENCY",
            BlockReason::PriceJump => "PRICE_JUMP",
            BlockReason::EmaDeviation => "EMA_DEVIATION",
            BlockReason::LowVolume => "LOW_VOLUME",
            BlockReason::LowConfidence => "LOW_CONFIDENCE",
            BlockReason::CircuitBreaker => "CIRCUIT_BREAKER",
            BlockReason::MaxLossExceeded => "MAX_LOSS_EXCEEDED",
        }
    }
}

impl std::fmt::Display for BlockReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            BlockReason::HighMevRisk => "Front-running risk above limit",
            BlockReason::HighLatency => "Latency above limit",
            BlockReason::PriceJump => "Price jump above limit",
            BlockReason::EmaDeviation => "Moving-average divergence above limit",
            BlockReason::LowVolume => "24h volume below minimum",
            BlockReason::LowConfidence => "Consensus confidence below threshold",
            BlockReason::CircuitBreaker => "Circuit breaker tripped",
            BlockReason::MaxLossExceeded => "Maximum loss exceeded",
        };
        write!(f, "{} ({})", text, self.code())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecisionStatus {
    Approved,
    Blocked,
    Pending,
}

impl std::fmt::Display for DecisionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecisionStatus::Approved => write!(f, "approved"),
            DecisionStatus::Blocked => write!(f, "blocked"),
            DecisionStatus::Pending => write!(f, "pending"),
        }
    }
}

/// Consensus output for one cycle.
///
/// `reasons` is empty exactly when `status` is `Approved`; the constructors
/// and [`Decision::block`] keep that true.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub status: DecisionStatus,
    pub action: Action,
    pub confidence: f64,
    pub reasons: Vec<BlockReason>,
    pub votes: Vec<EngineVote>,
    pub timestamp: DateTime<Utc>,
    pub snapshot: MarketState,
}

impl Decision {
    pub fn approved(
        action: Action,
        confidence: f64,
        votes: Vec<EngineVote>,
        snapshot: MarketState,
    ) -> Self {
        Self {
            status: DecisionStatus::Approved,
            action,
            confidence: clamp_unit(confidence),
            reasons: Vec::new(),
            votes,
            timestamp: Utc::now(),
            snapshot,
        }
    }

    /// A blocked decision. An empty `reasons` list is replaced by
    /// `LowConfidence` so a blocked decision always names a reason.
    pub fn blocked(
        action: Action,
        confidence: f64,
        mut reasons: Vec<BlockReason>,
        votes: Vec<EngineVote>,
        snapshot: MarketState,
    ) -> Self {
        if reasons.is_empty() {
            reasons.push(BlockReason::LowConfidence);
        }
        Self {
            status: DecisionStatus::Blocked,
            action,
            confidence: clamp_unit(confidence),
            reasons,
            votes,
            timestamp: Utc::now(),
            snapshot,
        }
    }

    /// Force this decision to blocked with an additional reason.
    pub fn block(&mut self, reason: BlockReason) {
        self.status = DecisionStatus::Blocked;
        if !self.reasons.contains(&reason) {
            self.reasons.push(reason);
        }
    }

    pub fn is_approved(&self) -> bool {
        self.status == DecisionStatus::Approved
    }

    pub fn is_blocked(&self) -> bool {
        self.status == DecisionStatus::Blocked
    }

    /// Comma-separated reason codes, for logging.
    pub fn reason_codes(&self) -> String {
        self.reasons
            .iter()
            .map(|r| r.code())
            .collect::<Vec<_>>()
            .join(",")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_action_clamps() {
        let action = Action::new(ActionKind::Long, 1.7)
            .with_size(dec!(1.5))
            .with_leverage(dec!(12));
        assert_eq!(action.confidence, 1.0);
        assert_eq!(action.size, dec!(1));
        assert_eq!(action.leverage, dec!(5));

        let action = Action::new(ActionKind::Short, -0.2)
            .with_size(dec!(-0.1))
            .with_leverage(dec!(0.5));
        assert_eq!(action.confidence, 0.0);
        assert_eq!(action.size, dec!(0));
        assert_eq!(action.leverage, dec!(1));
        assert_eq!(Action::new(ActionKind::Hold, f64::NAN).confidence, 0.0);
    }

    #[test]
    fn test_action_kind_order() {
        for (i, kind) in ActionKind::ALL.iter().enumerate() {
            assert_eq!(kind.index(), i);
        }
        assert_eq!(ActionKind::Long.entry_side(), Some(Side::Buy));
        assert_eq!(ActionKind::Short.entry_side(), Some(Side::Sell));
        assert_eq!(ActionKind::Exit.entry_side(), None);
        assert!(!ActionKind::Reduce.is_entry());
    }

    #[test]
    fn test_block_reason_codes() {
        assert_eq!(BlockReason::HighMevRisk.code(), "HIGH_MEV_RISK");
        assert_eq!(
            serde_json::to_string(&BlockReason::EmaDeviation).unwrap(),
            "\"EMA_DEVIATION\""
        );
        assert!(BlockReason::LowVolume.to_string().contains("LOW_VOLUME"));
    }

    #[test]
    fn test_decision_reason_invariant() {
        let snapshot = MarketState::new("SOL", dec!(100));
        let approved = Decision::approved(Action::hold(0.9), 0.9, vec![], snapshot.clone());
        assert!(approved.is_approved());
        assert!(approved.reasons.is_empty());

        let blocked = Decision::blocked(Action::hold(0.0), 0.0, vec![], vec![], snapshot);
        assert!(blocked.is_blocked());
        assert_eq!(blocked.reasons, vec![BlockReason::LowConfidence]);

        let mut d = approved;
        d.block(BlockReason::LowConfidence);
        d.block(BlockReason::LowConfidence);
        assert!(d.is_blocked());
        assert_eq!(d.reason_codes(), "LOW_CONFIDENCE");
    }
}
