//! One wager session: a single task owns the bet, the feed deduplicator and
//! all timers. UI actions, feed results and deadlines are serialized through
//! one `select!` loop, so there is exactly one timeline per session.

use anyhow::{Context, Result};
use logger::{now_iso, BetTransitionEvent, EventLogger, FeedStatusEvent, MatchDetectedEvent, PendingBetEvent, SessionHeartbeatEvent};
use match_feed::{describe_duration, fetch_with_timeout, MatchFeedDeduplicator, MatchFeedSource, NewLatestMatch, ValidatedMatch};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep_until, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::bet::{Bet, BetSnapshot, BetStatus, LatestMatchSummary};
use crate::error::ActionError;
use crate::lifecycle::{BetLifecycle, LifecycleTimings, Transition};
use crate::store::PendingBetStore;

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub poll_interval: Duration,
    pub fetch_timeout: Duration,
    pub timings: LifecycleTimings,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(3),
            fetch_timeout: Duration::from_secs(10),
            timings: LifecycleTimings::default(),
        }
    }
}

pub struct SessionContext {
    /// Local player; the opponent side of received challenges.
    pub display_name: String,
    pub config: SessionConfig,
    pub store: Box<dyn PendingBetStore>,
    pub logger: EventLogger,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BetAction {
    /// Local player challenges someone.
    Challenge { opponent: String, amount: f64 },
    /// Someone challenged the local player.
    ChallengeReceived { challenger: String, amount: f64 },
    Accept,
    Decline,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionReport {
    pub polls: u64,
    pub failed_polls: u64,
    pub matches_detected: u64,
    pub final_status: BetStatus,
}

struct Command {
    action: BetAction,
    reply: oneshot::Sender<Result<BetSnapshot, ActionError>>,
}

pub struct SessionHandle {
    commands: mpsc::Sender<Command>,
    status: watch::Receiver<BetSnapshot>,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<SessionReport>,
}

impl SessionHandle {
    /// Apply an action; the returned snapshot already reflects it.
    pub async fn submit(&self, action: BetAction) -> Result<BetSnapshot, ActionError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command { action, reply })
            .await
            .map_err(|_| ActionError::SessionClosed)?;
        rx.await.map_err(|_| ActionError::SessionClosed)?
    }

    /// Subscribe to status updates.
    pub fn status(&self) -> watch::Receiver<BetSnapshot> {
        self.status.clone()
    }

    pub fn current(&self) -> BetSnapshot {
        self.status.borrow().clone()
    }

    /// Stop the loop, abort any in-flight fetch and wait for the task.
    /// No timer or feed callback runs after this returns.
    pub async fn cancel(mut self) -> Result<SessionReport> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        self.task.await.context("wager session task failed")
    }
}

pub fn spawn_session(ctx: SessionContext, feed: Arc<dyn MatchFeedSource>) -> SessionHandle {
    let (cmd_tx, cmd_rx) = mpsc::channel(16);
    let (status_tx, status_rx) = watch::channel(BetSnapshot::idle());
    let (shutdown_tx, shutdown_rx) = oneshot::channel();

    let task = tokio::spawn(run_session(ctx, feed, cmd_rx, shutdown_rx, status_tx));

    SessionHandle {
        commands: cmd_tx,
        status: status_rx,
        shutdown: Some(shutdown_tx),
        task,
    }
}

// ====================================================================
// Session state (owned by the loop task)
// ====================================================================

struct SessionState {
    lifecycle: BetLifecycle,
    dedup: MatchFeedDeduplicator,
    latest: Option<LatestMatchSummary>,
    feed_ok: Option<bool>,
    polls: u64,
    failed_polls: u64,
    matches_detected: u64,
}

fn summarize(m: &ValidatedMatch) -> LatestMatchSummary {
    LatestMatchSummary {
        id: m.record.id,
        replay_hash: m.record.replay_hash.clone(),
        map: m.record.map_name(),
        classification: m.classification.label().to_string(),
        duration: describe_duration(m.effective_duration),
        winner: m.winner_name().map(str::to_string),
        players: m.record.player_names(),
    }
}

impl SessionState {
    fn snapshot(&self) -> BetSnapshot {
        let mut snap = self.lifecycle.snapshot();
        snap.latest_match = self.latest.clone();
        snap
    }

    fn publish(&self, status_tx: &watch::Sender<BetSnapshot>) {
        status_tx.send_replace(self.snapshot());
    }

    /// `previous_bet` covers transitions that clear the bet (Declined → Idle).
    fn after_transition(
        &self,
        t: Transition,
        previous_bet: Option<&Bet>,
        logger: &EventLogger,
        status_tx: &watch::Sender<BetSnapshot>,
    ) {
        let snap = self.snapshot();
        info!("bet {} → {}: {}", t.from.as_str(), t.to.as_str(), snap.status_text);

        let bet = snap.bet.as_ref().or(previous_bet);
        logger.log_quiet(&BetTransitionEvent {
            ts: now_iso(),
            event: "BET_TRANSITION",
            challenger: bet.map(|b| b.challenger.clone()).unwrap_or_default(),
            opponent: bet.map(|b| b.opponent.clone()).unwrap_or_default(),
            bet_amount: bet.map(|b| b.bet_amount).unwrap_or_default(),
            from: t.from.as_str().to_string(),
            to: t.to.as_str().to_string(),
            status_text: snap.status_text.clone(),
            refund: snap.refund,
        });

        status_tx.send_replace(snap);
    }

    fn handle_command(&mut self, cmd: Command, ctx: &SessionContext, status_tx: &watch::Sender<BetSnapshot>) {
        let now = Instant::now();
        let result = match cmd.action {
            BetAction::Challenge { opponent, amount } => self.lifecycle.issue_challenge(&opponent, amount),
            BetAction::ChallengeReceived { challenger, amount } => {
                self.lifecycle.receive_challenge(&challenger, amount)
            }
            BetAction::Accept => {
                let baseline = self.dedup.last_hash().map(str::to_string);
                self.lifecycle.accept(now, baseline)
            }
            BetAction::Decline => self.lifecycle.decline(now, ctx.store.as_ref()).map(|receipt| {
                if let (Some(inserted), Some(bet)) = (receipt.queued, self.lifecycle.bet()) {
                    ctx.logger.log_quiet(&PendingBetEvent {
                        ts: now_iso(),
                        event: "PENDING_BET_QUEUED",
                        challenger: bet.challenger.clone(),
                        bet_amount: bet.bet_amount,
                        inserted,
                    });
                }
                receipt.transition
            }),
        };

        let reply = match result {
            Ok(t) => {
                self.after_transition(t, None, &ctx.logger, status_tx);
                Ok(self.snapshot())
            }
            Err(e) => {
                debug!("action rejected: {}", e);
                Err(e)
            }
        };
        if cmd.reply.send(reply).is_err() {
            debug!("action caller went away before the reply");
        }
    }

    fn handle_timers(&mut self, ctx: &SessionContext, status_tx: &watch::Sender<BetSnapshot>) {
        let now = Instant::now();
        loop {
            let previous_bet = self.lifecycle.bet().cloned();
            match self.lifecycle.on_timer(now) {
                Some(t) => self.after_transition(t, previous_bet.as_ref(), &ctx.logger, status_tx),
                None => break,
            }
        }
    }

    fn set_feed_health(&mut self, ok: bool, records: usize, message: String, logger: &EventLogger) {
        if self.feed_ok == Some(ok) {
            return;
        }
        self.feed_ok = Some(ok);
        if ok {
            info!("match feed OK ({} records)", records);
        } else {
            warn!("match feed DOWN: {}", message);
        }
        logger.log_quiet(&FeedStatusEvent {
            ts: now_iso(),
            event: "FEED_STATUS",
            ok,
            records,
            message,
        });
    }

    fn handle_feed(&mut self, result: Result<Vec<Value>>, ctx: &SessionContext, status_tx: &watch::Sender<BetSnapshot>) {
        let feed = match result {
            Ok(feed) => feed,
            Err(e) => {
                self.failed_polls += 1;
                self.set_feed_health(false, 0, format!("{e:#}"), &ctx.logger);
                return;
            }
        };
        self.set_feed_health(true, feed.len(), String::new(), &ctx.logger);

        let Some(NewLatestMatch { latest, previous_hash }) = self.dedup.ingest(feed) else {
            return;
        };
        self.matches_detected += 1;

        ctx.logger.log_quiet(&MatchDetectedEvent {
            ts: now_iso(),
            event: "MATCH_DETECTED",
            match_id: latest.record.id,
            replay_hash: Some(latest.identity()),
            previous_hash,
            map: latest.record.map_name(),
            classification: latest.classification.label().to_string(),
            effective_duration: latest.effective_duration,
            winner: latest.winner_name().map(str::to_string),
            players: latest.record.player_names(),
        });

        self.latest = Some(summarize(&latest));
        match self.lifecycle.on_match(&latest) {
            Some(t) => self.after_transition(t, None, &ctx.logger, status_tx),
            None => self.publish(status_tx),
        }
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(at) => sleep_until(at).await,
        None => std::future::pending::<()>().await,
    }
}

fn heartbeat(ctx: &SessionContext, phase: &str, state: &SessionState) {
    ctx.logger.log_quiet(&SessionHeartbeatEvent {
        ts: now_iso(),
        event: "SESSION_HEARTBEAT",
        display_name: ctx.display_name.clone(),
        phase: phase.to_string(),
        poll_interval_secs: ctx.config.poll_interval.as_secs(),
        polls: state.polls,
        matches_detected: state.matches_detected,
    });
}

async fn run_session(
    ctx: SessionContext,
    feed: Arc<dyn MatchFeedSource>,
    mut commands: mpsc::Receiver<Command>,
    mut shutdown: oneshot::Receiver<()>,
    status_tx: watch::Sender<BetSnapshot>,
) -> SessionReport {
    let mut state = SessionState {
        lifecycle: BetLifecycle::new(ctx.display_name.clone(), ctx.config.timings.clone()),
        dedup: MatchFeedDeduplicator::new(),
        latest: None,
        feed_ok: None,
        polls: 0,
        failed_polls: 0,
        matches_detected: 0,
    };

    let (feed_tx, mut feed_rx) = mpsc::channel::<Result<Vec<Value>>>(1);
    let mut in_flight: Option<JoinHandle<()>> = None;

    let mut poll_ticker = interval(ctx.config.poll_interval);
    poll_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(
        "wager session started for '{}' (poll {}s, fetch timeout {}s)",
        ctx.display_name,
        ctx.config.poll_interval.as_secs(),
        ctx.config.fetch_timeout.as_secs()
    );
    heartbeat(&ctx, "START", &state);

    loop {
        let deadline = state.lifecycle.next_deadline();

        tokio::select! {
            biased;

            _ = &mut shutdown => {
                info!("wager session cancelled");
                break;
            }

            cmd = commands.recv() => match cmd {
                Some(cmd) => state.handle_command(cmd, &ctx, &status_tx),
                None => {
                    info!("all session handles dropped, stopping");
                    break;
                }
            },

            Some(result) = feed_rx.recv() => {
                in_flight = None;
                state.handle_feed(result, &ctx, &status_tx);
            }

            _ = sleep_until_deadline(deadline) => {
                state.handle_timers(&ctx, &status_tx);
            }

            _ = poll_ticker.tick() => {
                if in_flight.as_ref().is_some_and(|h| !h.is_finished()) {
                    debug!("previous feed fetch still running, tick skipped");
                    continue;
                }
                state.polls += 1;

                let source = Arc::clone(&feed);
                let tx = feed_tx.clone();
                let timeout = ctx.config.fetch_timeout;
                in_flight = Some(tokio::spawn(async move {
                    let result = fetch_with_timeout(source.as_ref(), timeout).await;
                    let _ = tx.send(result).await;
                }));
            }
        }
    }

    if let Some(fetch) = in_flight.take() {
        fetch.abort();
    }
    heartbeat(&ctx, "STOP", &state);
    info!(
        "wager session stopped: {} polls ({} failed), {} matches, bet {}",
        state.polls,
        state.failed_polls,
        state.matches_detected,
        state.lifecycle.status().as_str()
    );

    SessionReport {
        polls: state.polls,
        failed_polls: state.failed_polls,
        matches_detected: state.matches_detected,
        final_status: state.lifecycle.status(),
    }
}
