use thiserror::Error;

use crate::bet::BetStatus;

/// Synchronous rejection of a user action. The bet state is left untouched.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ActionError {
    #[error("{0} name must contain letters or digits")]
    EmptyName(&'static str),
    #[error("bet amount must be a positive number (got {0})")]
    InvalidAmount(f64),
    #[error("cannot challenge yourself")]
    SelfChallenge,
    #[error("cannot {action} while bet is {status:?}")]
    InvalidTransition { action: &'static str, status: BetStatus },
    #[error("another bet is still active ({0:?})")]
    Busy(BetStatus),
    #[error("session is closed")]
    SessionClosed,
}
