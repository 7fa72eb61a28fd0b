use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BetStatus {
    Idle,
    ChallengePending,
    Accepted,
    WaitingForStart,
    InProgress,
    Settled,
    Declined,
    Refunded,
}

impl BetStatus {
    /// Accepted, waiting for the game or the game is running.
    pub fn is_live(&self) -> bool {
        matches!(self, BetStatus::Accepted | BetStatus::WaitingForStart | BetStatus::InProgress)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BetStatus::Idle => "idle",
            BetStatus::ChallengePending => "challenge_pending",
            BetStatus::Accepted => "accepted",
            BetStatus::WaitingForStart => "waiting_for_start",
            BetStatus::InProgress => "in_progress",
            BetStatus::Settled => "settled",
            BetStatus::Declined => "declined",
            BetStatus::Refunded => "refunded",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bet {
    pub challenger: String,
    pub opponent: String,
    pub bet_amount: f64,
    pub status: BetStatus,
    pub created_at: DateTime<Utc>,
}

impl Bet {
    pub fn new(challenger: impl Into<String>, opponent: impl Into<String>, bet_amount: f64) -> Self {
        Self {
            challenger: challenger.into(),
            opponent: opponent.into(),
            bet_amount,
            status: BetStatus::ChallengePending,
            created_at: Utc::now(),
        }
    }
}

/// Entry of the pending (declined / not completed) bet queue.
/// Unique on `(challenger, bet_amount)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingBet {
    pub challenger: String,
    pub bet_amount: f64,
    #[serde(default)]
    pub inactive: bool,
    pub created_at: DateTime<Utc>,
}

impl PendingBet {
    pub fn new(challenger: impl Into<String>, bet_amount: f64) -> Self {
        Self {
            challenger: challenger.into(),
            bet_amount,
            inactive: false,
            created_at: Utc::now(),
        }
    }

    pub fn same_key(&self, other: &PendingBet) -> bool {
        self.challenger == other.challenger && self.bet_amount == other.bet_amount
    }
}

impl From<&Bet> for PendingBet {
    fn from(bet: &Bet) -> Self {
        PendingBet::new(bet.challenger.clone(), bet.bet_amount)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefundReason {
    /// Match without a winner (out of sync).
    NoWinner,
    /// Match duration outside the sane window.
    InvalidDuration,
    /// Valid match, but the winner is neither side of the bet.
    WinnerOutsideBet,
    /// No matching result before the max wait ran out.
    ResultTimeout,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum BetOutcome {
    Settled {
        winner: String,
        challenger_won: bool,
        replay_hash: Option<String>,
    },
    Refunded {
        reason: RefundReason,
    },
}

impl BetOutcome {
    pub fn is_refund(&self) -> bool {
        matches!(self, BetOutcome::Refunded { .. })
    }
}

/// Short view of the newest detected match, for the status surface.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LatestMatchSummary {
    pub id: Option<i64>,
    pub replay_hash: Option<String>,
    pub map: String,
    pub classification: String,
    pub duration: String,
    pub winner: Option<String>,
    pub players: Vec<String>,
}

/// What the UI renders: status line plus the refund flag.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BetSnapshot {
    pub status: BetStatus,
    pub status_text: String,
    pub refund: bool,
    pub bet: Option<Bet>,
    pub outcome: Option<BetOutcome>,
    pub latest_match: Option<LatestMatchSummary>,
}

impl BetSnapshot {
    pub fn idle() -> Self {
        Self {
            status: BetStatus::Idle,
            status_text: String::new(),
            refund: false,
            bet: None,
            outcome: None,
            latest_match: None,
        }
    }
}
