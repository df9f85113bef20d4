// =============================================================================
// Shared types used across the confluence engine
// =============================================================================

use serde::{Deserialize, Serialize};

/// Market regime phase, as reported by the phase/regime publisher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    Accumulation,
    Markup,
    Distribution,
    Markdown,
}

impl Phase {
    pub fn from_number(n: u8) -> Option<Self> {
        match n {
            1 => Some(Self::Accumulation),
            2 => Some(Self::Markup),
            3 => Some(Self::Distribution),
            4 => Some(Self::Markdown),
            _ => None,
        }
    }

    pub fn number(self) -> u8 {
        match self {
            Self::Accumulation => 1,
            Self::Markup => 2,
            Self::Distribution => 3,
            Self::Markdown => 4,
        }
    }

    /// Directions the phase allows a trade to take.
    pub fn allowed_directions(self) -> &'static [Direction] {
        match self {
            Self::Accumulation => &[Direction::Long],
            Self::Markup => &[Direction::Long, Direction::Short],
            Self::Distribution => &[Direction::Short],
            Self::Markdown => &[Direction::Long, Direction::Short],
        }
    }

    /// Maximum size multiplier this phase permits.
    pub fn size_cap(self) -> f64 {
        match self {
            Self::Accumulation => 1.0,
            Self::Markup => 1.2,
            Self::Distribution => 1.0,
            Self::Markdown => 1.2,
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Accumulation => write!(f, "ACCUMULATION"),
            Self::Markup => write!(f, "MARKUP"),
            Self::Distribution => write!(f, "DISTRIBUTION"),
            Self::Markdown => write!(f, "MARKDOWN"),
        }
    }
}

/// Volatility bucket reported alongside a phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Volatility {
    Low,
    Normal,
    High,
}

impl Volatility {
    /// Size multiplier cap contributed by this volatility bucket.
    pub fn size_cap(self) -> f64 {
        match self {
            Self::Low => 1.2,
            Self::Normal => 1.0,
            Self::High => 0.6,
        }
    }
}

impl std::fmt::Display for Volatility {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "LOW"),
            Self::Normal => write!(f, "NORMAL"),
            Self::High => write!(f, "HIGH"),
        }
    }
}

/// Trade direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Long,
    Short,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Long => write!(f, "LONG"),
            Self::Short => write!(f, "SHORT"),
        }
    }
}

/// Regime bias reported by the phase publisher; `Neutral` means it defers to
/// other gates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Bias {
    Long,
    Short,
    Neutral,
}

impl Bias {
    /// Whether this bias permits a trade in `direction`.
    pub fn permits(self, direction: Direction) -> bool {
        match (self, direction) {
            (Self::Neutral, _) => true,
            (Self::Long, Direction::Long) => true,
            (Self::Short, Direction::Short) => true,
            _ => false,
        }
    }
}

/// Per-timeframe alignment tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeframeState {
    Bullish,
    Bearish,
    Neutral,
}

/// Options/signal expert quality grade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Quality {
    Extreme,
    High,
    Medium,
}

impl Quality {
    /// Multiplicative size boost contributed by this quality grade.
    pub fn boost(self) -> f64 {
        match self {
            Self::Extreme => 1.15,
            Self::High => 1.0,
            Self::Medium => 0.85,
        }
    }
}

/// Structural-validator execution-quality grade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionQuality {
    A,
    B,
    C,
}

impl ExecutionQuality {
    /// Quality-grade score used by the structural gate's mean-score
    /// calculation (A=100, B=75, C has no defined score — the structural
    /// gate fails outright before this is consulted).
    pub fn grade_score(self) -> f64 {
        match self {
            Self::A => 100.0,
            Self::B => 75.0,
            Self::C => 0.0,
        }
    }
}

/// Gamma bias reported/derived for an options chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GammaBias {
    Positive,
    Negative,
    Neutral,
}

/// Trade-velocity bucket derived from volume vs. average volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeVelocity {
    Slow,
    Normal,
    Fast,
}

/// Final engine verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    Execute,
    Wait,
    Skip,
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Execute => write!(f, "EXECUTE"),
            Self::Wait => write!(f, "WAIT"),
            Self::Skip => write!(f, "SKIP"),
        }
    }
}

/// Milliseconds since the UNIX epoch. Kept as a plain alias (not `Instant`)
/// because it must be serializable and comparable across process restarts.
pub type MillisTimestamp = i64;
