use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::debounce::Debouncer;
use crate::error::{BracketError, Result};
use crate::overlay::{match_state, DisplayMatch, MatchState, Overlay, OverlayPhase};
use crate::progress::{self, ProgressSnapshot};
use crate::store::{BracketStore, ChangeStream};
use crate::topology::Round;
use crate::types::{
  BracketSnapshot, Match, RepairReport, ScoreSubmission, StoreEvent, SubmitReceipt, SweepReport,
  TournamentStatus,
};
use crate::validator::{self, ValidationReport};
use futures::StreamExt;
use std::{
  collections::{BTreeSet, HashMap, HashSet},
  sync::{Arc, Mutex, MutexGuard},
  time::Duration,
};
use tokio::{
  sync::watch,
  time::{Instant, MissedTickBehavior},
};
use tracing::{debug, info, warn};

const RESUBSCRIBE_DELAY_MS: u64 = 1_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorConfig {
  pub resync_debounce_ms: u64,
  pub confirm_timeout_ms: u64,
  pub overlay_sweep_interval_ms: u64,
  pub auto_sweep: bool,
}

impl Default for OrchestratorConfig {
  fn default() -> Self {
    OrchestratorConfig::from(&EngineConfig::default())
  }
}

impl From<&EngineConfig> for OrchestratorConfig {
  fn from(config: &EngineConfig) -> Self {
    OrchestratorConfig {
      resync_debounce_ms: config.resync_debounce_ms,
      confirm_timeout_ms: config.confirm_timeout_ms,
      overlay_sweep_interval_ms: config.overlay_sweep_interval_ms.max(1),
      auto_sweep: config.auto_sweep,
    }
  }
}

/// What a single change-feed event did to the local view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventOutcome {
  /// Belongs to another tournament, or carries nothing to merge.
  Ignored,
  /// Older than the row already held.
  Stale,
  Merged,
  /// Merged, and settled the pending overlay for this match.
  Confirmed(String),
  /// The feed lost events; only a full fetch can repair the view.
  ResyncRequired,
}

#[derive(Default)]
struct ViewState {
  status: TournamentStatus,
  champion_id: Option<String>,
  rows: HashMap<String, Match>,
  overlays: HashMap<String, Overlay>,
  in_flight: HashSet<String>,
  completed_rounds: BTreeSet<Round>,
  /// Rounds that flipped to complete and have not been swept for yet.
  unswept_rounds: BTreeSet<Round>,
  next_generation: u64,
}

impl ViewState {
  fn sorted_rows(&self) -> Vec<Match> {
    let mut rows: Vec<Match> = self.rows.values().cloned().collect();
    rows.sort_by(|a, b| (a.round, a.match_number, &a.id).cmp(&(b.round, b.match_number, &b.id)));
    rows
  }

  fn refresh_completed_rounds(&mut self) {
    let rows = self.sorted_rows();
    let now: BTreeSet<Round> = progress::completed_rounds(&rows).into_iter().collect();
    for round in now.difference(&self.completed_rounds) {
      self.unswept_rounds.insert(*round);
    }
    self.completed_rounds = now;
  }

  /// Backend wins: any overlay whose row is now resolved is dropped.
  fn settle_overlays(&mut self) -> Vec<String> {
    let rows = &self.rows;
    let settled: Vec<String> = self
      .overlays
      .values()
      .filter(|overlay| rows.get(&overlay.match_id).is_some_and(|row| overlay.is_confirmed_by(row)))
      .map(|overlay| overlay.match_id.clone())
      .collect();
    for id in &settled {
      self.overlays.remove(id);
    }
    settled
  }
}

/// Client-side coordinator for one tournament's bracket.
///
/// Holds the last confirmed rows from the backend plus at most one optimistic
/// overlay per match. Scores go to the store once; the change feed (or a
/// resync) is what turns an overlay into confirmed state.
pub struct AdvancementOrchestrator<S: BracketStore + ?Sized> {
  tournament_id: String,
  store: Arc<S>,
  clock: Arc<dyn Clock>,
  config: OrchestratorConfig,
  state: Mutex<ViewState>,
}

impl<S: BracketStore + ?Sized> AdvancementOrchestrator<S> {
  pub fn new(tournament_id: &str, store: Arc<S>, clock: Arc<dyn Clock>, config: OrchestratorConfig) -> Self {
    AdvancementOrchestrator {
      tournament_id: tournament_id.to_string(),
      store,
      clock,
      config,
      state: Mutex::new(ViewState::default()),
    }
  }

  pub fn tournament_id(&self) -> &str {
    &self.tournament_id
  }

  pub fn config(&self) -> &OrchestratorConfig {
    &self.config
  }

  fn state(&self) -> MutexGuard<'_, ViewState> {
    self.state.lock().unwrap_or_else(|e| e.into_inner())
  }

  // ── Fetching ─────────────────────────────────────────────────────────

  /// Ask the store for the bracket (creating it if needed) and adopt it.
  pub async fn generate(&self, force: bool) -> Result<BracketSnapshot> {
    let snapshot = self.store.generate_bracket(&self.tournament_id, force).await?;
    self.adopt(&snapshot, true);
    info!(tournament_id = %self.tournament_id, force, "bracket generated");
    Ok(snapshot)
  }

  /// Initial fetch. Rounds already complete at load time are not swept for.
  pub async fn load(&self) -> Result<BracketSnapshot> {
    let snapshot = self.store.get_bracket_state(&self.tournament_id).await?;
    self.adopt(&snapshot, true);
    info!(
      tournament_id = %self.tournament_id,
      matches = snapshot.matches.len(),
      "bracket loaded"
    );
    Ok(snapshot)
  }

  /// Full refetch; replaces every confirmed row.
  pub async fn resync(&self) -> Result<()> {
    let snapshot = self.store.get_bracket_state(&self.tournament_id).await?;
    self.adopt(&snapshot, false);
    debug!(tournament_id = %self.tournament_id, "bracket resynced");
    Ok(())
  }

  fn adopt(&self, snapshot: &BracketSnapshot, baseline: bool) {
    let mut state = self.state();
    state.status = snapshot.status;
    state.champion_id = snapshot.champion_id.clone();
    state.rows = snapshot
      .matches
      .iter()
      .map(|m| (m.id.clone(), m.clone()))
      .collect();
    let settled = state.settle_overlays();
    if !settled.is_empty() {
      info!(matches = ?settled, "pending scores confirmed by resync");
    }
    if baseline {
      let rows = state.sorted_rows();
      state.completed_rounds = progress::completed_rounds(&rows).into_iter().collect();
      state.unswept_rounds.clear();
    } else {
      state.refresh_completed_rounds();
    }
  }

  // ── Scoring ──────────────────────────────────────────────────────────

  /// Apply the score locally, then send it to the store once.
  ///
  /// A failure rolls the overlay back and is returned as is; nothing is
  /// retried. On success the overlay stays until the backend row shows up.
  pub async fn submit_score(
    &self,
    match_id: &str,
    score1: u32,
    score2: u32,
    submitted_by: &str,
  ) -> Result<SubmitReceipt> {
    let generation = {
      let mut state = self.state();
      if state.in_flight.contains(match_id) {
        return Err(BracketError::conflict(match_id, "a submission is already in flight"));
      }
      if state.overlays.contains_key(match_id) {
        return Err(BracketError::conflict(match_id, "a submitted score is awaiting confirmation"));
      }
      let row = state
        .rows
        .get(match_id)
        .ok_or_else(|| BracketError::MatchNotFound(match_id.to_string()))?;
      if row.is_resolved() {
        return Err(BracketError::not_ready(match_id, "match is already completed"));
      }
      let (Some(p1), Some(p2)) = (row.player1_id.clone(), row.player2_id.clone()) else {
        return Err(BracketError::not_ready(match_id, "both players must be confirmed first"));
      };
      if score1 == score2 {
        return Err(BracketError::validation(format!(
          "match {match_id} cannot end in a tie ({score1}-{score2})"
        )));
      }
      let winner_id = if score1 > score2 { p1 } else { p2 };
      state.next_generation += 1;
      let generation = state.next_generation;
      state.overlays.insert(
        match_id.to_string(),
        Overlay {
          match_id: match_id.to_string(),
          winner_id,
          score1,
          score2,
          submitted_at_ms: self.clock.now_ms(),
          generation,
          phase: OverlayPhase::InFlight,
        },
      );
      state.in_flight.insert(match_id.to_string());
      generation
    };
    info!(match_id, score1, score2, submitted_by, "score submitted");

    let result = self
      .store
      .submit_match_score(ScoreSubmission {
        match_id: match_id.to_string(),
        score1,
        score2,
        submitted_by: submitted_by.to_string(),
      })
      .await;

    let mut state = self.state();
    state.in_flight.remove(match_id);
    let ours = state
      .overlays
      .get(match_id)
      .is_some_and(|overlay| overlay.generation == generation);
    match result {
      Ok(receipt) => {
        if ours {
          if let Some(overlay) = state.overlays.get_mut(match_id) {
            overlay.phase = OverlayPhase::AwaitingConfirmation;
          }
        }
        debug!(match_id, winner = %receipt.winner_id, "store accepted score");
        Ok(receipt)
      }
      Err(err) => {
        if ours {
          state.overlays.remove(match_id);
        }
        warn!(match_id, code = err.code(), "score submission failed, rolled back: {err}");
        Err(err)
      }
    }
  }

  /// Drop the local marker. The remote call, if any, keeps going and the
  /// match stays locked until it returns.
  pub fn discard_overlay(&self, match_id: &str) -> bool {
    let removed = self.state().overlays.remove(match_id).is_some();
    if removed {
      info!(match_id, "optimistic score discarded");
    }
    removed
  }

  /// Clear overlays that went unconfirmed for longer than the timeout.
  pub fn expire_overlays(&self) -> Vec<String> {
    let now = self.clock.now_ms();
    let timeout = self.config.confirm_timeout_ms;
    let mut state = self.state();
    let expired: Vec<String> = state
      .overlays
      .values()
      .filter(|overlay| overlay.is_expired(now, timeout))
      .map(|overlay| overlay.match_id.clone())
      .collect();
    for id in &expired {
      state.overlays.remove(id);
      warn!(match_id = %id, timeout_ms = timeout, "no confirmation received, reverting to backend state");
    }
    expired
  }

  // ── Reconciliation ───────────────────────────────────────────────────

  pub fn handle_event(&self, event: StoreEvent) -> EventOutcome {
    let change = match event {
      StoreEvent::Row(change) => change,
      StoreEvent::Audit(audit) => {
        debug!(
          source = %audit.source_match_id,
          player = %audit.player_id,
          destination = ?audit.destination_match_id,
          "advancement recorded"
        );
        return EventOutcome::Ignored;
      }
      StoreEvent::Lagged(missed) => {
        warn!(missed, "change feed lagged");
        return EventOutcome::ResyncRequired;
      }
    };
    if change.tournament_id != self.tournament_id {
      return EventOutcome::Ignored;
    }

    let row = change.row;
    let mut state = self.state();
    if let Some(known) = state.rows.get(&row.id) {
      if row.is_older_than(known) {
        debug!(match_id = %row.id, "dropping stale row event");
        return EventOutcome::Stale;
      }
    }
    let match_id = row.id.clone();
    let confirmed = state
      .overlays
      .get(&match_id)
      .is_some_and(|overlay| overlay.is_confirmed_by(&row));
    state.rows.insert(match_id.clone(), row);
    state.refresh_completed_rounds();
    if confirmed {
      state.overlays.remove(&match_id);
      info!(match_id = %match_id, "score confirmed");
      EventOutcome::Confirmed(match_id)
    } else {
      EventOutcome::Merged
    }
  }

  // ── Advancement sweep ────────────────────────────────────────────────

  pub async fn trigger_sweep(&self) -> Result<SweepReport> {
    let report = self.store.trigger_advancement_sweep(&self.tournament_id).await?;
    for (stage, outcome) in &report {
      if outcome.is_failed() {
        warn!(?stage, ?outcome, "sweep stage failed");
      } else {
        debug!(?stage, ?outcome, "sweep stage");
      }
    }
    Ok(report)
  }

  /// Run the sweep if some round flipped to complete since the last call.
  /// Returns `None` when nothing was due or auto-sweep is off.
  pub async fn sweep_if_rounds_completed(&self) -> Option<Result<SweepReport>> {
    if !self.config.auto_sweep {
      return None;
    }
    let rounds = std::mem::take(&mut self.state().unswept_rounds);
    if rounds.is_empty() {
      return None;
    }
    info!(rounds = ?rounds, "round completed, running advancement sweep");
    let result = self.trigger_sweep().await;
    if let Err(err) = &result {
      warn!("advancement sweep failed: {err}");
      // Try again on the next completion check.
      self.state().unswept_rounds.extend(rounds);
    }
    Some(result)
  }

  // ── Read side ────────────────────────────────────────────────────────

  pub fn display_matches(&self) -> Vec<DisplayMatch> {
    let state = self.state();
    state
      .sorted_rows()
      .iter()
      .map(|row| DisplayMatch::new(row, state.overlays.get(&row.id)))
      .collect()
  }

  pub fn match_state(&self, match_id: &str) -> Result<MatchState> {
    let state = self.state();
    let row = state
      .rows
      .get(match_id)
      .ok_or_else(|| BracketError::MatchNotFound(match_id.to_string()))?;
    Ok(match_state(row, state.overlays.get(match_id)))
  }

  pub fn confirmed_rows(&self) -> Vec<Match> {
    self.state().sorted_rows()
  }

  pub fn status(&self) -> (TournamentStatus, Option<String>) {
    let state = self.state();
    (state.status, state.champion_id.clone())
  }

  pub fn pending_matches(&self) -> Vec<String> {
    let mut ids: Vec<String> = self.state().overlays.keys().cloned().collect();
    ids.sort();
    ids
  }

  /// Computed from confirmed rows only.
  pub fn progress(&self) -> ProgressSnapshot {
    progress::progress(&self.confirmed_rows())
  }

  pub fn validate(&self) -> ValidationReport {
    validator::validate(&self.confirmed_rows())
  }

  /// Call the store's repair only when validation fails, then refetch.
  pub async fn repair_if_invalid(&self) -> Result<Option<RepairReport>> {
    let report = self.validate();
    if report.valid {
      return Ok(None);
    }
    warn!(errors = ?report.errors, "bracket structure invalid, requesting repair");
    let repair = self.store.repair_bracket(&self.tournament_id).await?;
    self.resync().await?;
    Ok(Some(repair))
  }

  // ── Event loop ───────────────────────────────────────────────────────

  /// Consume the change feed until `shutdown` turns true.
  ///
  /// Every row event pushes the resync deadline out by the debounce window;
  /// a subscription that ends is re-opened, and every (re)subscribe
  /// schedules a resync to cover whatever was missed in between.
  pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
    enum Wake {
      Shutdown,
      Event(Option<StoreEvent>),
      Resync,
      Expire,
    }

    let origin = Instant::now();
    let elapsed_ms = || origin.elapsed().as_millis() as u64;
    let mut debouncer = Debouncer::new(self.config.resync_debounce_ms);
    let mut expiry = tokio::time::interval(Duration::from_millis(self.config.overlay_sweep_interval_ms.max(1)));
    expiry.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut stream: Option<ChangeStream> = None;

    info!(tournament_id = %self.tournament_id, "bracket event loop started");
    loop {
      if *shutdown.borrow() {
        break;
      }
      if stream.is_none() {
        match self.store.change_stream(&self.tournament_id).await {
          Ok(feed) => {
            debug!(tournament_id = %self.tournament_id, "subscribed to change feed");
            stream = Some(feed);
            debouncer.note_event(elapsed_ms());
          }
          Err(err) => {
            warn!("change feed subscribe failed: {err}");
            tokio::select! {
              _ = shutdown.changed() => {}
              _ = tokio::time::sleep(Duration::from_millis(RESUBSCRIBE_DELAY_MS)) => {}
            }
            continue;
          }
        }
      }

      let resync_at = debouncer.deadline().map(|ms| origin + Duration::from_millis(ms));
      let wake = tokio::select! {
        changed = shutdown.changed() => {
          if changed.is_err() { Wake::Shutdown } else { continue; }
        }
        event = next_event(&mut stream) => Wake::Event(event),
        _ = sleep_until(resync_at) => Wake::Resync,
        _ = expiry.tick() => Wake::Expire,
      };

      match wake {
        Wake::Shutdown => break,
        Wake::Event(None) => {
          info!(tournament_id = %self.tournament_id, "change feed ended, re-subscribing");
          stream = None;
        }
        Wake::Event(Some(event)) => {
          let outcome = self.handle_event(event);
          if outcome != EventOutcome::Ignored {
            debouncer.note_event(elapsed_ms());
          }
          if let Some(Err(err)) = self.sweep_if_rounds_completed().await {
            debug!("sweep will be retried: {err}");
          }
        }
        Wake::Resync => {
          if let Some(coalesced) = debouncer.take_due(elapsed_ms()) {
            debug!(coalesced, "debounced resync");
            if let Err(err) = self.resync().await {
              warn!("resync failed: {err}");
            }
            if let Some(Err(err)) = self.sweep_if_rounds_completed().await {
              debug!("sweep will be retried: {err}");
            }
          }
        }
        Wake::Expire => {
          self.expire_overlays();
        }
      }
    }
    info!(tournament_id = %self.tournament_id, "bracket event loop stopped");
  }
}

async fn next_event(stream: &mut Option<ChangeStream>) -> Option<StoreEvent> {
  match stream {
    Some(feed) => feed.next().await,
    None => std::future::pending().await,
  }
}

async fn sleep_until(deadline: Option<Instant>) {
  match deadline {
    Some(at) => tokio::time::sleep_until(at).await,
    None => std::future::pending().await,
  }
}
