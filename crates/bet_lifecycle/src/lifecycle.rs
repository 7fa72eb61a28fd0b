//! Per-bet state machine: challenge → accept/decline → settlement.
//!
//! Timers are plain deadlines on the tokio clock. Each transition replaces
//! the pending deadline, so a stale timer can never fire into a new state.

use match_feed::{normalize_name, Classification, InvalidReason, ValidatedMatch};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::bet::{Bet, BetOutcome, BetSnapshot, BetStatus, PendingBet, RefundReason};
use crate::error::ActionError;
use crate::store::PendingBetStore;

#[derive(Debug, Clone, PartialEq)]
pub struct LifecycleTimings {
    /// Declined → Idle.
    pub decline_cooldown: Duration,
    /// Accepted → WaitingForStart.
    pub start_detection: Duration,
    /// WaitingForStart → InProgress.
    pub battle_start: Duration,
    /// InProgress → "Battle Finished! Processing Win." text.
    pub battle_finish: Duration,
    /// InProgress without a matching result → Refunded.
    pub max_result_wait: Duration,
}

impl Default for LifecycleTimings {
    fn default() -> Self {
        Self {
            decline_cooldown: Duration::from_secs(2),
            start_detection: Duration::from_secs(5),
            battle_start: Duration::from_secs(5),
            battle_finish: Duration::from_secs(10),
            // 4h max délka hry + rezerva na parser
            max_result_wait: Duration::from_secs(4 * 3600 + 15 * 60),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: BetStatus,
    pub to: BetStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeclineReceipt {
    pub transition: Transition,
    /// `Some(true)` = queued, `Some(false)` = already queued, `None` = store failed.
    pub queued: Option<bool>,
}

pub struct BetLifecycle {
    timings: LifecycleTimings,
    display_name: String,
    bet: Option<Bet>,
    status: BetStatus,
    status_text: String,
    deadline: Option<Instant>,
    in_progress_since: Option<Instant>,
    baseline_hash: Option<String>,
    outcome: Option<BetOutcome>,
}

/// A name has to survive `normalize_name`, otherwise no match could ever involve it.
fn validate_name(name: &str, role: &'static str) -> Result<String, ActionError> {
    let name = name.trim();
    if normalize_name(name).is_empty() {
        return Err(ActionError::EmptyName(role));
    }
    Ok(name.to_string())
}

fn validate_amount(amount: f64) -> Result<f64, ActionError> {
    if amount.is_finite() && amount > 0.0 {
        Ok(amount)
    } else {
        Err(ActionError::InvalidAmount(amount))
    }
}

impl BetLifecycle {
    pub fn new(display_name: impl Into<String>, timings: LifecycleTimings) -> Self {
        Self {
            timings,
            display_name: display_name.into(),
            bet: None,
            status: BetStatus::Idle,
            status_text: String::new(),
            deadline: None,
            in_progress_since: None,
            baseline_hash: None,
            outcome: None,
        }
    }

    pub fn status(&self) -> BetStatus {
        self.status
    }

    pub fn status_text(&self) -> &str {
        &self.status_text
    }

    pub fn bet(&self) -> Option<&Bet> {
        self.bet.as_ref()
    }

    pub fn outcome(&self) -> Option<&BetOutcome> {
        self.outcome.as_ref()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn timings(&self) -> &LifecycleTimings {
        &self.timings
    }

    pub fn snapshot(&self) -> BetSnapshot {
        BetSnapshot {
            status: self.status,
            status_text: self.status_text.clone(),
            refund: self.outcome.as_ref().is_some_and(BetOutcome::is_refund),
            bet: self.bet.clone(),
            outcome: self.outcome.clone(),
            latest_match: None,
        }
    }

    fn move_to(&mut self, to: BetStatus, text: impl Into<String>) -> Transition {
        let from = self.status;
        self.status = to;
        self.status_text = text.into();
        if let Some(bet) = self.bet.as_mut() {
            bet.status = to;
        }
        Transition { from, to }
    }

    fn ensure_can_open(&self) -> Result<(), ActionError> {
        match self.status {
            BetStatus::Idle | BetStatus::Settled | BetStatus::Refunded => Ok(()),
            other => Err(ActionError::Busy(other)),
        }
    }

    fn open(&mut self, bet: Bet, text: String) -> Transition {
        self.bet = Some(bet);
        self.outcome = None;
        self.deadline = None;
        self.in_progress_since = None;
        self.baseline_hash = None;
        self.move_to(BetStatus::ChallengePending, text)
    }

    // ── User actions ─────────────────────────────────────────────────────────

    /// Someone challenged the local player.
    pub fn receive_challenge(&mut self, challenger: &str, bet_amount: f64) -> Result<Transition, ActionError> {
        let challenger = validate_name(challenger, "challenger")?;
        let bet_amount = validate_amount(bet_amount)?;
        if normalize_name(&challenger) == normalize_name(&self.display_name) {
            return Err(ActionError::SelfChallenge);
        }
        self.ensure_can_open()?;

        info!("challenge received: {} → {} (${})", challenger, self.display_name, bet_amount);
        let text = format!("{challenger} has challenged you! ${bet_amount} Bet Pending");
        let bet = Bet::new(challenger, self.display_name.clone(), bet_amount);
        Ok(self.open(bet, text))
    }

    /// The local player challenges `opponent`.
    pub fn issue_challenge(&mut self, opponent: &str, bet_amount: f64) -> Result<Transition, ActionError> {
        let opponent = validate_name(opponent, "opponent")?;
        let bet_amount = validate_amount(bet_amount)?;
        if normalize_name(&opponent) == normalize_name(&self.display_name) {
            return Err(ActionError::SelfChallenge);
        }
        self.ensure_can_open()?;

        info!("challenge issued: {} → {} (${})", self.display_name, opponent, bet_amount);
        let text = format!("Challenge sent to {opponent}. ${bet_amount} Bet Pending");
        let bet = Bet::new(self.display_name.clone(), opponent, bet_amount);
        Ok(self.open(bet, text))
    }

    /// `baseline_hash` = latest match identity at the time of acceptance;
    /// that match is already over and cannot settle this bet.
    pub fn accept(&mut self, now: Instant, baseline_hash: Option<String>) -> Result<Transition, ActionError> {
        if self.status != BetStatus::ChallengePending {
            return Err(ActionError::InvalidTransition { action: "accept", status: self.status });
        }

        self.baseline_hash = baseline_hash;
        self.deadline = Some(now + self.timings.start_detection);
        Ok(self.move_to(BetStatus::Accepted, "Accepted!"))
    }

    pub fn decline(&mut self, now: Instant, store: &dyn PendingBetStore) -> Result<DeclineReceipt, ActionError> {
        if self.status != BetStatus::ChallengePending {
            return Err(ActionError::InvalidTransition { action: "decline", status: self.status });
        }

        let queued = match self.bet.as_ref() {
            Some(bet) => match store.enqueue(&PendingBet::from(bet)) {
                Ok(inserted) => Some(inserted),
                Err(e) => {
                    warn!("pending bet enqueue failed: {:#}", e);
                    None
                }
            },
            None => None,
        };

        self.deadline = Some(now + self.timings.decline_cooldown);
        let transition = self.move_to(BetStatus::Declined, "Bet Declined");
        Ok(DeclineReceipt { transition, queued })
    }

    // ── Timers ───────────────────────────────────────────────────────────────

    /// Fire the pending deadline if it is due.
    pub fn on_timer(&mut self, now: Instant) -> Option<Transition> {
        let at = self.deadline.filter(|d| *d <= now)?;
        self.deadline = None;

        match self.status {
            BetStatus::Declined => {
                let t = self.move_to(BetStatus::Idle, "");
                self.bet = None;
                self.outcome = None;
                Some(t)
            }
            BetStatus::Accepted => {
                self.deadline = Some(at + self.timings.battle_start);
                Some(self.move_to(BetStatus::WaitingForStart, "Waiting For Battle To Start"))
            }
            BetStatus::WaitingForStart => {
                self.in_progress_since = Some(at);
                self.deadline = Some(self.in_progress_deadline(at));
                Some(self.move_to(BetStatus::InProgress, "Battle Underway!"))
            }
            BetStatus::InProgress => {
                let since = self.in_progress_since.unwrap_or(at);
                let give_up_at = since + self.timings.max_result_wait;
                if at >= give_up_at {
                    warn!(
                        "no match result {}s after battle start, refunding",
                        self.timings.max_result_wait.as_secs()
                    );
                    return Some(self.refund(
                        RefundReason::ResultTimeout,
                        "No match result detected in time. Bet refunded.",
                    ));
                }

                self.deadline = Some(give_up_at);
                Some(self.move_to(BetStatus::InProgress, "Battle Finished! Processing Win."))
            }
            other => {
                debug!("stale timer ignored in {:?}", other);
                None
            }
        }
    }

    fn in_progress_deadline(&self, since: Instant) -> Instant {
        if self.timings.battle_finish < self.timings.max_result_wait {
            since + self.timings.battle_finish
        } else {
            since + self.timings.max_result_wait
        }
    }

    // ── Match results ────────────────────────────────────────────────────────

    fn is_participant(&self, player_name: &str) -> bool {
        let Some(bet) = self.bet.as_ref() else {
            return false;
        };
        let name = normalize_name(player_name);
        !name.is_empty() && (name == normalize_name(&bet.challenger) || name == normalize_name(&bet.opponent))
    }

    /// A newly detected match; overrides the timer heuristic when it concerns this bet.
    pub fn on_match(&mut self, detected: &ValidatedMatch) -> Option<Transition> {
        if !self.status.is_live() {
            return None;
        }

        let identity = detected.identity();
        if self.baseline_hash.as_deref() == Some(identity.as_str()) {
            debug!("match {} predates acceptance, ignored", identity);
            return None;
        }

        if !detected.record.players.iter().any(|p| self.is_participant(&p.name)) {
            debug!(
                "match {} ({:?}) does not involve this bet, ignored",
                identity,
                detected.record.player_names()
            );
            return None;
        }

        self.deadline = None;
        let transition = match detected.classification {
            Classification::InvalidRefundable(InvalidReason::NoWinner) => self.refund(
                RefundReason::NoWinner,
                "No winner detected. Match likely ended in Out of Sync. All bets refunded.",
            ),
            Classification::InvalidRefundable(InvalidReason::InvalidDuration) => self.refund(
                RefundReason::InvalidDuration,
                "Invalid match duration (likely Out of Sync). Bet refunded.",
            ),
            Classification::Valid => match detected.winner_name() {
                Some(winner) if self.is_participant(winner) => {
                    self.settle(winner.to_string(), detected.record.replay_hash.clone())
                }
                winner => {
                    warn!("valid match {} won by {:?}, outside the bet", identity, winner);
                    self.refund(
                        RefundReason::WinnerOutsideBet,
                        "Match won by a player outside this bet. Bet refunded.",
                    )
                }
            },
        };
        Some(transition)
    }

    fn settle(&mut self, winner: String, replay_hash: Option<String>) -> Transition {
        let (challenger_won, amount) = match self.bet.as_ref() {
            Some(bet) => (normalize_name(&winner) == normalize_name(&bet.challenger), bet.bet_amount),
            None => (false, 0.0),
        };
        info!("bet settled: {} wins ${}", winner, amount);

        let text = format!("Battle Finished! {winner} wins the ${amount} bet.");
        self.outcome = Some(BetOutcome::Settled {
            winner,
            challenger_won,
            replay_hash,
        });
        self.deadline = None;
        self.move_to(BetStatus::Settled, text)
    }

    fn refund(&mut self, reason: RefundReason, text: &str) -> Transition {
        info!("bet refunded: {:?}", reason);
        self.outcome = Some(BetOutcome::Refunded { reason });
        self.deadline = None;
        self.move_to(BetStatus::Refunded, text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryBetStore;
    use match_feed::{classify, normalize_value, MatchFeedDeduplicator};
    use serde_json::json;

    fn lifecycle() -> BetLifecycle {
        BetLifecycle::new("You", LifecycleTimings::default())
    }

    fn detected(hash: &str, duration: i64, players: serde_json::Value) -> ValidatedMatch {
        classify(
            normalize_value(json!({
                "id": 1,
                "replay_hash": hash,
                "duration": duration,
                "players": players
            }))
            .unwrap(),
        )
    }

    /// Fire every deadline up to `until`, returning the statuses passed through.
    fn run_until(lc: &mut BetLifecycle, until: Instant) -> Vec<BetStatus> {
        let mut seen = Vec::new();
        while let Some(d) = lc.next_deadline().filter(|d| *d <= until) {
            if let Some(t) = lc.on_timer(d) {
                seen.push(t.to);
            }
        }
        seen
    }

    #[test]
    fn heuristic_timers_walk_through_the_phases() {
        let mut lc = lifecycle();
        let t0 = Instant::now();
        lc.receive_challenge("RedLineKey", 3.0).unwrap();
        lc.accept(t0, None).unwrap();

        assert!(run_until(&mut lc, t0 + Duration::from_secs(4)).is_empty());
        assert_eq!(run_until(&mut lc, t0 + Duration::from_secs(5)), vec![BetStatus::WaitingForStart]);
        assert_eq!(lc.status_text(), "Waiting For Battle To Start");
        assert_eq!(run_until(&mut lc, t0 + Duration::from_secs(10)), vec![BetStatus::InProgress]);
        assert_eq!(lc.status_text(), "Battle Underway!");
        assert_eq!(run_until(&mut lc, t0 + Duration::from_secs(20)), vec![BetStatus::InProgress]);
        assert_eq!(lc.status_text(), "Battle Finished! Processing Win.");
        assert!(lc.outcome().is_none());
    }

    #[test]
    fn no_result_within_max_wait_refunds_without_queueing() {
        let store = MemoryBetStore::new();
        let mut lc = lifecycle();
        let t0 = Instant::now();
        lc.receive_challenge("RedLineKey", 3.0).unwrap();
        lc.accept(t0, None).unwrap();

        let horizon = t0 + Duration::from_secs(10) + lc.timings().max_result_wait;
        let seen = run_until(&mut lc, horizon);
        assert_eq!(seen.last(), Some(&BetStatus::Refunded));
        assert_eq!(lc.outcome(), Some(&BetOutcome::Refunded { reason: RefundReason::ResultTimeout }));
        assert!(lc.snapshot().refund);
        assert!(lc.next_deadline().is_none());
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn matching_valid_result_settles_for_challenger() {
        let mut lc = lifecycle();
        let t0 = Instant::now();
        lc.receive_challenge("RedLineKey", 3.0).unwrap();
        lc.accept(t0, None).unwrap();
        run_until(&mut lc, t0 + Duration::from_secs(12));

        let m = detected(
            "fresh",
            1800,
            json!([{"name": "RedLineKey", "winner": true}, {"name": "You", "winner": false}]),
        );
        let t = lc.on_match(&m).unwrap();
        assert_eq!(t, Transition { from: BetStatus::InProgress, to: BetStatus::Settled });
        assert_eq!(
            lc.outcome(),
            Some(&BetOutcome::Settled {
                winner: "RedLineKey".to_string(),
                challenger_won: true,
                replay_hash: Some("fresh".to_string()),
            })
        );
        assert_eq!(lc.bet().unwrap().status, BetStatus::Settled);
        assert!(!lc.snapshot().refund);
        assert!(lc.next_deadline().is_none());
    }

    #[test]
    fn result_overrides_heuristic_before_start_is_detected() {
        let mut lc = lifecycle();
        lc.receive_challenge("RedLineKey", 3.0).unwrap();
        lc.accept(Instant::now(), None).unwrap();

        let m = detected("h", 900, json!([{"name": "redlinekey"}, {"name": "YOU", "winner": true}]));
        lc.on_match(&m).unwrap();
        assert_eq!(lc.status(), BetStatus::Settled);
        match lc.outcome() {
            Some(BetOutcome::Settled { winner, challenger_won, .. }) => {
                assert_eq!(winner, "YOU");
                assert!(!challenger_won);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn out_of_sync_result_refunds() {
        let mut lc = lifecycle();
        lc.receive_challenge("RedLineKey", 3.0).unwrap();
        lc.accept(Instant::now(), None).unwrap();

        let m = detected("oos", 600, json!([{"name": "RedLineKey", "winner": false}, {"name": "You", "winner": false}]));
        lc.on_match(&m).unwrap();
        assert_eq!(lc.outcome(), Some(&BetOutcome::Refunded { reason: RefundReason::NoWinner }));
        assert!(lc.status_text().contains("Out of Sync"));
    }

    #[test]
    fn invalid_duration_refunds_even_with_winner() {
        let mut lc = lifecycle();
        lc.receive_challenge("RedLineKey", 3.0).unwrap();
        lc.accept(Instant::now(), None).unwrap();

        let m = detected("long", 14401, json!([{"name": "RedLineKey", "winner": true}, {"name": "You"}]));
        lc.on_match(&m).unwrap();
        assert_eq!(lc.outcome(), Some(&BetOutcome::Refunded { reason: RefundReason::InvalidDuration }));
    }

    #[test]
    fn unrelated_and_pre_existing_matches_are_ignored() {
        let mut lc = lifecycle();
        lc.receive_challenge("RedLineKey", 3.0).unwrap();
        lc.accept(Instant::now(), Some("old".to_string())).unwrap();

        let stale = detected("old", 900, json!([{"name": "RedLineKey", "winner": true}, {"name": "You"}]));
        assert!(lc.on_match(&stale).is_none());

        let other = detected("other", 900, json!([{"name": "Viper", "winner": true}, {"name": "Hera"}]));
        assert!(lc.on_match(&other).is_none());

        assert_eq!(lc.status(), BetStatus::Accepted);
        assert!(lc.next_deadline().is_some());
    }

    #[test]
    fn pre_existing_match_without_hash_or_id_never_settles() {
        let feed = vec![json!({
            "duration": 900,
            "players": [{"name": "RedLineKey", "winner": true}, {"name": "You", "winner": false}]
        })];
        let mut dedup = MatchFeedDeduplicator::new();
        let before = dedup.ingest(feed.clone()).unwrap();

        let mut lc = lifecycle();
        lc.receive_challenge("RedLineKey", 3.0).unwrap();
        lc.accept(Instant::now(), dedup.last_hash().map(str::to_string)).unwrap();

        assert!(dedup.ingest(feed).is_none());
        assert!(lc.on_match(&before.latest).is_none());
        assert_eq!(lc.status(), BetStatus::Accepted);
    }

    #[test]
    fn winner_outside_bet_refunds() {
        let mut lc = lifecycle();
        lc.receive_challenge("RedLineKey", 3.0).unwrap();
        lc.accept(Instant::now(), None).unwrap();

        let m = detected(
            "ffa",
            900,
            json!([{"name": "RedLineKey"}, {"name": "You"}, {"name": "Viper", "winner": true}]),
        );
        lc.on_match(&m).unwrap();
        assert_eq!(lc.outcome(), Some(&BetOutcome::Refunded { reason: RefundReason::WinnerOutsideBet }));
    }

    #[test]
    fn matches_before_acceptance_do_nothing() {
        let mut lc = lifecycle();
        lc.receive_challenge("RedLineKey", 3.0).unwrap();
        let m = detected("h", 900, json!([{"name": "RedLineKey", "winner": true}, {"name": "You"}]));
        assert!(lc.on_match(&m).is_none());
        assert_eq!(lc.status(), BetStatus::ChallengePending);
    }

    #[test]
    fn decline_queues_once_and_resets_after_cooldown() {
        let store = MemoryBetStore::new();
        let mut lc = lifecycle();
        let t0 = Instant::now();

        lc.receive_challenge("RedLineKey", 3.0).unwrap();
        let receipt = lc.decline(t0, &store).unwrap();
        assert_eq!(receipt.transition.to, BetStatus::Declined);
        assert_eq!(receipt.queued, Some(true));

        // cooldown still running
        assert_eq!(lc.receive_challenge("RedLineKey", 3.0), Err(ActionError::Busy(BetStatus::Declined)));
        assert!(lc.on_timer(t0 + Duration::from_secs(1)).is_none());

        let reset = lc.on_timer(t0 + Duration::from_secs(2)).unwrap();
        assert_eq!(reset, Transition { from: BetStatus::Declined, to: BetStatus::Idle });
        assert!(lc.bet().is_none());

        // same offer comes back and is declined again
        lc.receive_challenge("RedLineKey", 3.0).unwrap();
        let again = lc.decline(t0 + Duration::from_secs(3), &store).unwrap();
        assert_eq!(again.queued, Some(false));
        assert_eq!(store.list().unwrap().len(), 1);
    }

    #[test]
    fn invalid_input_is_rejected_without_mutation() {
        let mut lc = lifecycle();
        assert_eq!(lc.receive_challenge("   ", 3.0), Err(ActionError::EmptyName("challenger")));
        assert_eq!(lc.receive_challenge("RedLineKey", 0.0), Err(ActionError::InvalidAmount(0.0)));
        assert!(matches!(lc.receive_challenge("RedLineKey", f64::NAN), Err(ActionError::InvalidAmount(_))));
        assert_eq!(lc.issue_challenge("you", 3.0), Err(ActionError::SelfChallenge));
        assert_eq!(lc.receive_challenge("!!!", 3.0), Err(ActionError::EmptyName("challenger")));
        assert_eq!(lc.issue_challenge(" -_- ", 3.0), Err(ActionError::EmptyName("opponent")));
        assert_eq!(
            lc.accept(Instant::now(), None),
            Err(ActionError::InvalidTransition { action: "accept", status: BetStatus::Idle })
        );
        assert_eq!(lc.status(), BetStatus::Idle);
        assert!(lc.bet().is_none());
        assert!(lc.next_deadline().is_none());
    }

    #[test]
    fn issued_challenge_puts_local_player_as_challenger() {
        let mut lc = lifecycle();
        lc.issue_challenge(" Viper ", 10.0).unwrap();
        let bet = lc.bet().unwrap();
        assert_eq!(bet.challenger, "You");
        assert_eq!(bet.opponent, "Viper");
        assert_eq!(lc.status(), BetStatus::ChallengePending);

        assert_eq!(lc.issue_challenge("Hera", 1.0), Err(ActionError::Busy(BetStatus::ChallengePending)));
    }

    #[test]
    fn settled_bet_can_be_replaced_by_new_challenge() {
        let mut lc = lifecycle();
        lc.receive_challenge("RedLineKey", 3.0).unwrap();
        lc.accept(Instant::now(), None).unwrap();
        lc.on_match(&detected("h", 900, json!([{"name": "RedLineKey", "winner": true}, {"name": "You"}])))
            .unwrap();

        lc.receive_challenge("Viper", 4.0).unwrap();
        assert_eq!(lc.status(), BetStatus::ChallengePending);
        assert!(lc.outcome().is_none());
        assert_eq!(lc.bet().unwrap().challenger, "Viper");
    }
}
