//! AoE2 Wager — Bet Lifecycle
//!
//! Co dělá:
//!   1. Drží jednu sázku hráče: výzva → přijetí/odmítnutí → výsledek
//!   2. Heuristické časovače (start/konec bitvy), přebité skutečným výsledkem z feedu
//!   3. Odmítnuté sázky ukládá do perzistentní fronty (SQLite, unikátní challenger+částka)
//!   4. Session = jeden task, jedna časová osa; akce UI, feed i časovače jdou přes select!

pub mod bet;
pub mod error;
pub mod lifecycle;
pub mod session;
pub mod store;

pub use bet::{Bet, BetOutcome, BetSnapshot, BetStatus, LatestMatchSummary, PendingBet, RefundReason};
pub use error::ActionError;
pub use lifecycle::{BetLifecycle, DeclineReceipt, LifecycleTimings, Transition};
pub use session::{spawn_session, BetAction, SessionConfig, SessionContext, SessionHandle, SessionReport};
pub use store::{MemoryBetStore, PendingBetStore, SqliteBetStore};
