use crate::advancement::{destination, SlotRef};
use crate::clock::Clock;
use crate::error::{BracketError, Result};
use crate::progress::round_complete;
use crate::store::{BracketStore, ChangeStream, ProfileDirectory};
use crate::topology::{expected_slots, Round, PLAYER_COUNT};
use crate::types::{
  AdvancementAudit, BracketSnapshot, Match, MatchStatus, PlayerProfile, RepairReport, RowChangeEvent,
  RowChangeKind, ScoreSubmission, StageOutcome, StoreEvent, SubmitReceipt, SweepReport, SweepStage,
  TournamentStatus,
};
use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::{
  collections::{HashMap, HashSet},
  sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
  },
};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

const EVENT_CHANNEL_CAPACITY: usize = 1024;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimPlayer {
  pub id: String,
  pub name: String,
}

#[derive(Clone, Debug)]
struct RecordedOutcome {
  round: Round,
  match_number: u32,
  winner_id: String,
  score1: u32,
  score2: u32,
}

/// In-memory authoritative SABO bracket.
///
/// Mirrors the backend's rules: scoring a match advances winner and loser along
/// the edges inside each segment; the edges that converge on the semifinal and
/// final are left to the advancement sweep.
pub struct SaboSim {
  tournament_id: String,
  players: Vec<SimPlayer>,
  matches: Vec<Match>,
  match_index: HashMap<String, usize>,
  status: TournamentStatus,
  champion_id: Option<String>,
  outcomes: Vec<RecordedOutcome>,
  events: Vec<StoreEvent>,
}

impl SaboSim {
  /// `players` is the seed order: round-1 match `i` gets seeds `2i - 1` and `2i`.
  pub fn new(tournament_id: &str, players: Vec<SimPlayer>, now_ms: u64) -> Result<Self> {
    if players.len() != PLAYER_COUNT {
      return Err(BracketError::validation(format!(
        "SABO brackets need exactly {PLAYER_COUNT} players, got {}",
        players.len()
      )));
    }
    let mut seen = HashSet::new();
    for player in &players {
      if !seen.insert(player.id.as_str()) {
        return Err(BracketError::validation(format!("player {} is seeded twice", player.id)));
      }
    }

    let mut sim = SaboSim {
      tournament_id: tournament_id.to_string(),
      players,
      matches: Vec::new(),
      match_index: HashMap::new(),
      status: TournamentStatus::Registration,
      champion_id: None,
      outcomes: Vec::new(),
      events: Vec::new(),
    };
    for (round, match_number) in expected_slots() {
      sim.insert_row(round, match_number, now_ms);
    }
    info!(tournament_id, "generated SABO bracket");
    Ok(sim)
  }

  pub fn tournament_id(&self) -> &str {
    &self.tournament_id
  }

  pub fn snapshot(&self) -> BracketSnapshot {
    BracketSnapshot {
      tournament_id: self.tournament_id.clone(),
      status: self.status,
      champion_id: self.champion_id.clone(),
      matches: self.matches.clone(),
    }
  }

  pub fn drain_events(&mut self) -> Vec<StoreEvent> {
    std::mem::take(&mut self.events)
  }

  pub fn get_match(&self, round: Round, match_number: u32) -> Option<&Match> {
    self.position(round, match_number).map(|idx| &self.matches[idx])
  }

  fn match_id(&self, round: Round, match_number: u32) -> String {
    format!("{}-r{}-m{match_number}", self.tournament_id, round.code())
  }

  fn position(&self, round: Round, match_number: u32) -> Option<usize> {
    self
      .matches
      .iter()
      .position(|m| m.round == round && m.match_number == match_number)
  }

  fn insert_row(&mut self, round: Round, match_number: u32, now_ms: u64) -> String {
    let id = self.match_id(round, match_number);
    let mut row = Match::empty(id.clone(), round, match_number);
    row.updated_at_ms = now_ms;
    if round == Round::Winners1 {
      let seed_a = ((match_number - 1) * 2) as usize;
      row.player1_id = self.players.get(seed_a).map(|p| p.id.clone());
      row.player2_id = self.players.get(seed_a + 1).map(|p| p.id.clone());
      if row.has_both_players() {
        row.status = MatchStatus::Ready;
      }
    }
    self.matches.push(row.clone());
    self.match_index.insert(id.clone(), self.matches.len() - 1);
    self.push_row_event(RowChangeKind::Insert, row);
    id
  }

  fn reindex(&mut self) {
    self.match_index = self
      .matches
      .iter()
      .enumerate()
      .map(|(idx, m)| (m.id.clone(), idx))
      .collect();
  }

  fn push_row_event(&mut self, kind: RowChangeKind, row: Match) {
    self.events.push(StoreEvent::Row(RowChangeEvent {
      tournament_id: self.tournament_id.clone(),
      kind,
      row,
    }));
  }

  // ── Scoring ──────────────────────────────────────────────────────────

  pub fn submit(&mut self, submission: &ScoreSubmission, now_ms: u64) -> Result<SubmitReceipt> {
    let index = self
      .match_index
      .get(&submission.match_id)
      .copied()
      .ok_or_else(|| BracketError::MatchNotFound(submission.match_id.clone()))?;
    let (winner_id, round, match_number) = {
      let m = &self.matches[index];
      if m.status == MatchStatus::Completed {
        return Err(BracketError::not_ready(&m.id, "match is already completed"));
      }
      let (Some(p1), Some(p2)) = (m.player1_id.clone(), m.player2_id.clone()) else {
        return Err(BracketError::not_ready(&m.id, "match is still waiting for players"));
      };
      if submission.score1 == submission.score2 {
        return Err(BracketError::validation(format!(
          "match {} cannot end in a tie ({}-{})",
          m.id, submission.score1, submission.score2
        )));
      }
      let winner = if submission.score1 > submission.score2 { p1 } else { p2 };
      (winner, m.round, m.match_number)
    };

    let mut row = self.matches[index].clone();
    row.score1 = Some(submission.score1);
    row.score2 = Some(submission.score2);
    row.winner_id = Some(winner_id.clone());
    row.status = MatchStatus::Completed;
    row.updated_at_ms = now_ms;
    // Nothing is written unless every destination can take its player.
    for (dest, player) in intra_segment_moves(&row) {
      self.check_slot(dest, &player)?;
    }

    self.matches[index] = row.clone();
    self.push_row_event(RowChangeKind::Update, row.clone());
    self.outcomes.push(RecordedOutcome {
      round,
      match_number,
      winner_id: winner_id.clone(),
      score1: submission.score1,
      score2: submission.score2,
    });
    if self.status == TournamentStatus::Registration {
      self.status = TournamentStatus::Ongoing;
    }
    info!(
      match_id = %row.id,
      winner = %winner_id,
      submitted_by = %submission.submitted_by,
      "score recorded"
    );

    let advanced_into = self.advance_within_segment(&row, now_ms)?;
    Ok(SubmitReceipt {
      match_id: row.id,
      winner_id,
      advanced_into,
    })
  }

  fn advance_within_segment(&mut self, source: &Match, now_ms: u64) -> Result<Vec<String>> {
    let mut advanced = Vec::new();
    for (dest, player) in intra_segment_moves(source) {
      if let Some(id) = self.place(dest, &player, &source.id, now_ms)? {
        advanced.push(id);
      }
    }
    Ok(advanced)
  }

  /// Index of the destination row, or the reason `player_id` cannot go there.
  fn check_slot(&self, dest: SlotRef, player_id: &str) -> Result<usize> {
    let index = self.position(dest.round, dest.match_number).ok_or_else(|| {
      BracketError::validation(format!(
        "destination round {} match {} is missing",
        dest.round.code(),
        dest.match_number
      ))
    })?;
    let m = &self.matches[index];
    match m.player(dest.slot) {
      Some(existing) if existing != player_id => Err(BracketError::conflict(
        &m.id,
        format!("slot {:?} already holds {existing}, refusing to overwrite with {player_id}", dest.slot),
      )),
      _ => Ok(index),
    }
  }

  /// Put `player_id` into `dest`. Returns the destination id when something
  /// changed, `None` when the player was already there.
  fn place(&mut self, dest: SlotRef, player_id: &str, source_match_id: &str, now_ms: u64) -> Result<Option<String>> {
    let index = self.check_slot(dest, player_id)?;
    let row = {
      let m = &mut self.matches[index];
      if m.player(dest.slot).is_some() {
        return Ok(None);
      }
      m.set_player(dest.slot, Some(player_id.to_string()));
      if m.has_both_players() && m.status == MatchStatus::Pending {
        m.status = MatchStatus::Ready;
      }
      m.updated_at_ms = now_ms;
      m.clone()
    };
    debug!(
      source = source_match_id,
      destination = %row.id,
      slot = ?dest.slot,
      player = player_id,
      "advanced player"
    );
    self.push_row_event(RowChangeKind::Update, row.clone());
    self.events.push(StoreEvent::Audit(AdvancementAudit {
      tournament_id: self.tournament_id.clone(),
      source_match_id: source_match_id.to_string(),
      player_id: player_id.to_string(),
      destination_match_id: Some(row.id.clone()),
      destination_slot: Some(dest.slot),
      recorded_at_ms: now_ms,
    }));
    Ok(Some(row.id))
  }

  // ── Advancement sweep ────────────────────────────────────────────────

  pub fn sweep(&mut self, now_ms: u64) -> SweepReport {
    let mut report = SweepReport::new();
    for stage in SweepStage::ALL {
      let outcome = match self.run_stage(stage, now_ms) {
        Ok(outcome) => outcome,
        Err(err) => {
          warn!(tournament_id = %self.tournament_id, ?stage, "sweep stage failed: {err}");
          StageOutcome::Failed(err.to_string())
        }
      };
      report.insert(stage, outcome);
    }
    report
  }

  fn run_stage(&mut self, stage: SweepStage, now_ms: u64) -> Result<StageOutcome> {
    match stage {
      SweepStage::LosersACompletion => self.promote_round(Round::LosersA3, "Losers A final", now_ms),
      SweepStage::LosersBCompletion => self.promote_round(Round::LosersB2, "Losers B final", now_ms),
      SweepStage::SemifinalSetup => self.promote_round(Round::Winners3, "Winners Round 3", now_ms),
      SweepStage::SemifinalCompletion => self.promote_round(Round::Semifinal, "semifinals", now_ms),
      SweepStage::Finalization => Ok(self.finalize()),
      SweepStage::StatusUpdate => Ok(self.update_status()),
    }
  }

  /// Move the winners of a completed `round` into their destinations.
  fn promote_round(&mut self, round: Round, name: &str, now_ms: u64) -> Result<StageOutcome> {
    if !round_complete(&self.matches, round) {
      return Ok(StageOutcome::NotNeeded(format!("{name} not completed yet")));
    }
    let sources: Vec<Match> = self
      .matches
      .iter()
      .filter(|m| m.round == round)
      .cloned()
      .collect();
    let mut placed = Vec::new();
    for source in sources {
      let (Some(winner), Some(dest)) = (
        source.winner_id.clone(),
        destination(source.round, source.match_number, true),
      ) else {
        continue;
      };
      if let Some(id) = self.place(dest, &winner, &source.id, now_ms)? {
        placed.push(id);
      }
    }
    if placed.is_empty() {
      Ok(StageOutcome::NotNeeded(format!("{name} winners already advanced")))
    } else {
      Ok(StageOutcome::Applied(format!("advanced {name} winners into {}", placed.join(", "))))
    }
  }

  fn finalize(&mut self) -> StageOutcome {
    let Some(final_match) = self.get_match(Round::Final, 1).filter(|m| m.is_resolved()) else {
      return StageOutcome::NotNeeded("final not completed yet".to_string());
    };
    let winner = final_match.winner_id.clone();
    if self.champion_id == winner {
      return StageOutcome::NotNeeded("champion already recorded".to_string());
    }
    self.champion_id = winner.clone();
    info!(tournament_id = %self.tournament_id, champion = ?winner, "tournament finalized");
    StageOutcome::Applied(format!("champion {}", winner.unwrap_or_default()))
  }

  fn update_status(&mut self) -> StageOutcome {
    let desired = if self.champion_id.is_some() {
      TournamentStatus::Completed
    } else if self.matches.iter().any(|m| m.status == MatchStatus::Completed) {
      TournamentStatus::Ongoing
    } else {
      self.status
    };
    if desired == self.status {
      return StageOutcome::NotNeeded(format!("status already {:?}", self.status).to_lowercase());
    }
    self.status = desired;
    StageOutcome::Applied(format!("status set to {desired:?}").to_lowercase())
  }

  // ── Repair ───────────────────────────────────────────────────────────

  /// Recreate missing rows, drop duplicate positions, then replay every
  /// recorded outcome so the recreated rows get their players back.
  pub fn repair(&mut self, now_ms: u64) -> Result<RepairReport> {
    let mut report = RepairReport::default();

    let mut seen = HashSet::new();
    let mut keep = Vec::with_capacity(self.matches.len());
    let mut sorted = std::mem::take(&mut self.matches);
    // A completed copy of a duplicated position wins over an empty one.
    sorted.sort_by_key(|m| (m.round, m.match_number, m.status != MatchStatus::Completed));
    for m in sorted {
      if seen.insert((m.round, m.match_number)) {
        keep.push(m);
      } else {
        report.removed.push(m.id);
      }
    }
    self.matches = keep;
    self.reindex();

    for (round, match_number) in expected_slots() {
      if self.position(round, match_number).is_none() {
        let id = self.insert_row(round, match_number, now_ms);
        report.created.push(id);
      }
    }
    self.matches.sort_by_key(|m| (m.round, m.match_number));
    self.reindex();

    // Earlier rounds first, so a recreated row has its players back before its
    // own result is written again.
    let mut outcomes = self.outcomes.clone();
    outcomes.sort_by_key(|o| (o.round, o.match_number));
    for outcome in outcomes {
      let Some(index) = self.position(outcome.round, outcome.match_number) else {
        continue;
      };
      if !self.matches[index].is_resolved() {
        let m = &mut self.matches[index];
        if !m.has_both_players() || !m.contains_player(&outcome.winner_id) {
          continue;
        }
        m.winner_id = Some(outcome.winner_id.clone());
        m.score1 = Some(outcome.score1);
        m.score2 = Some(outcome.score2);
        m.status = MatchStatus::Completed;
        m.updated_at_ms = now_ms;
        let row = m.clone();
        report.restored.push(row.id.clone());
        self.push_row_event(RowChangeKind::Update, row);
      }
      let source = self.matches[index].clone();
      report.replayed += self.advance_within_segment(&source, now_ms)?.len();
    }

    if report.is_noop() {
      debug!(tournament_id = %self.tournament_id, "repair found nothing to fix");
    } else {
      warn!(
        tournament_id = %self.tournament_id,
        created = report.created.len(),
        removed = report.removed.len(),
        restored = report.restored.len(),
        "bracket repaired"
      );
    }
    Ok(report)
  }

  /// Drop a row, as a lost write on the backend would.
  pub fn remove_match(&mut self, round: Round, match_number: u32) -> Option<Match> {
    let index = self.position(round, match_number)?;
    let removed = self.matches.remove(index);
    self.reindex();
    Some(removed)
  }

  /// Play out the whole bracket with player1 winning 2-1 every time.
  pub fn complete_all_matches(&mut self, now_ms: u64) -> Result<()> {
    let mut safety = 0;
    loop {
      safety += 1;
      if safety > 1_000 {
        return Err(BracketError::validation("auto-complete exceeded safety limit"));
      }
      self.sweep(now_ms);
      let next = self
        .matches
        .iter()
        .filter(|m| m.status == MatchStatus::Ready)
        .min_by_key(|m| (m.round, m.match_number))
        .map(|m| m.id.clone());
      let Some(match_id) = next else {
        break;
      };
      self.submit(
        &ScoreSubmission {
          match_id,
          score1: 2,
          score2: 1,
          submitted_by: "auto-complete".to_string(),
        },
        now_ms,
      )?;
    }
    Ok(())
  }
}

/// Winner and loser moves that stay inside the source's segment; anything
/// bound for the semifinal or final waits for the sweep.
fn intra_segment_moves(source: &Match) -> Vec<(SlotRef, String)> {
  let loser = source.loser_id().map(str::to_string);
  [(true, source.winner_id.clone()), (false, loser)]
    .into_iter()
    .filter_map(|(is_winner, player)| {
      let dest = destination(source.round, source.match_number, is_winner)?;
      if matches!(dest.round, Round::Semifinal | Round::Final) {
        return None;
      }
      Some((dest, player?))
    })
    .collect()
}

// ── Async store wrapper ────────────────────────────────────────────────

/// `BracketStore` over a set of [`SaboSim`]s, one per tournament. All
/// mutations for every tournament are serialized behind one lock.
pub struct SimBracketStore {
  clock: Arc<dyn Clock>,
  rosters: Mutex<HashMap<String, Vec<SimPlayer>>>,
  sims: Mutex<HashMap<String, SaboSim>>,
  events: broadcast::Sender<StoreEvent>,
  fail_next_submit: Mutex<Option<String>>,
  submit_calls: AtomicUsize,
  sweep_calls: AtomicUsize,
  state_reads: AtomicUsize,
}

impl SimBracketStore {
  pub fn new(clock: Arc<dyn Clock>) -> Self {
    let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
    SimBracketStore {
      clock,
      rosters: Mutex::new(HashMap::new()),
      sims: Mutex::new(HashMap::new()),
      events,
      fail_next_submit: Mutex::new(None),
      submit_calls: AtomicUsize::new(0),
      sweep_calls: AtomicUsize::new(0),
      state_reads: AtomicUsize::new(0),
    }
  }

  pub fn register_tournament(&self, tournament_id: &str, players: Vec<SimPlayer>) {
    let mut guard = self.rosters.lock().unwrap_or_else(|e| e.into_inner());
    guard.insert(tournament_id.to_string(), players);
  }

  /// The next `submit_match_score` fails with a transport error without touching state.
  pub fn fail_next_submit(&self, message: &str) {
    let mut guard = self.fail_next_submit.lock().unwrap_or_else(|e| e.into_inner());
    *guard = Some(message.to_string());
  }

  pub fn submit_calls(&self) -> usize {
    self.submit_calls.load(Ordering::SeqCst)
  }

  pub fn sweep_calls(&self) -> usize {
    self.sweep_calls.load(Ordering::SeqCst)
  }

  pub fn state_reads(&self) -> usize {
    self.state_reads.load(Ordering::SeqCst)
  }

  /// Run `f` against a tournament's sim and publish whatever events it produced.
  pub fn with_sim<F, R>(&self, tournament_id: &str, f: F) -> Result<R>
  where
    F: FnOnce(&mut SaboSim, u64) -> Result<R>,
  {
    let now = self.clock.now_ms();
    let mut guard = self.sims.lock().unwrap_or_else(|e| e.into_inner());
    let sim = guard
      .get_mut(tournament_id)
      .ok_or_else(|| BracketError::TournamentNotFound(tournament_id.to_string()))?;
    let result = f(sim, now);
    self.publish(sim.drain_events());
    result
  }

  fn publish(&self, events: Vec<StoreEvent>) {
    for event in events {
      // No subscribers is fine.
      let _ = self.events.send(event);
    }
  }

  fn tournament_for_match(&self, match_id: &str) -> Result<String> {
    let guard = self.sims.lock().unwrap_or_else(|e| e.into_inner());
    guard
      .values()
      .find(|sim| sim.match_index.contains_key(match_id))
      .map(|sim| sim.tournament_id.clone())
      .ok_or_else(|| BracketError::MatchNotFound(match_id.to_string()))
  }
}

#[async_trait]
impl BracketStore for SimBracketStore {
  async fn generate_bracket(&self, tournament_id: &str, force: bool) -> Result<BracketSnapshot> {
    let now = self.clock.now_ms();
    let players = {
      let guard = self.rosters.lock().unwrap_or_else(|e| e.into_inner());
      guard.get(tournament_id).cloned()
    };
    let mut guard = self.sims.lock().unwrap_or_else(|e| e.into_inner());
    if !force {
      if let Some(sim) = guard.get(tournament_id) {
        return Ok(sim.snapshot());
      }
    }
    let players = players.ok_or_else(|| BracketError::TournamentNotFound(tournament_id.to_string()))?;
    let mut sim = SaboSim::new(tournament_id, players, now)?;
    self.publish(sim.drain_events());
    let snapshot = sim.snapshot();
    guard.insert(tournament_id.to_string(), sim);
    Ok(snapshot)
  }

  async fn submit_match_score(&self, submission: ScoreSubmission) -> Result<SubmitReceipt> {
    self.submit_calls.fetch_add(1, Ordering::SeqCst);
    let injected = {
      let mut guard = self.fail_next_submit.lock().unwrap_or_else(|e| e.into_inner());
      guard.take()
    };
    if let Some(message) = injected {
      return Err(BracketError::Transport(message));
    }
    let tournament_id = self.tournament_for_match(&submission.match_id)?;
    self.with_sim(&tournament_id, |sim, now| sim.submit(&submission, now))
  }

  async fn trigger_advancement_sweep(&self, tournament_id: &str) -> Result<SweepReport> {
    self.sweep_calls.fetch_add(1, Ordering::SeqCst);
    self.with_sim(tournament_id, |sim, now| Ok(sim.sweep(now)))
  }

  async fn get_bracket_state(&self, tournament_id: &str) -> Result<BracketSnapshot> {
    self.state_reads.fetch_add(1, Ordering::SeqCst);
    self.with_sim(tournament_id, |sim, _| Ok(sim.snapshot()))
  }

  async fn change_stream(&self, tournament_id: &str) -> Result<ChangeStream> {
    let rx = self.events.subscribe();
    let wanted = tournament_id.to_string();
    let stream = futures::stream::unfold(rx, |mut rx| async move {
      match rx.recv().await {
        Ok(event) => Some((event, rx)),
        Err(broadcast::error::RecvError::Lagged(missed)) => Some((StoreEvent::Lagged(missed), rx)),
        Err(broadcast::error::RecvError::Closed) => None,
      }
    })
    .filter(move |event| {
      let keep = event.tournament_id().map_or(true, |id| id == wanted);
      futures::future::ready(keep)
    });
    Ok(stream.boxed())
  }

  async fn repair_bracket(&self, tournament_id: &str) -> Result<RepairReport> {
    self.with_sim(tournament_id, |sim, now| sim.repair(now))
  }
}

#[async_trait]
impl ProfileDirectory for SimBracketStore {
  async fn fetch_profiles(&self, player_ids: &[String]) -> Result<Vec<PlayerProfile>> {
    let guard = self.rosters.lock().unwrap_or_else(|e| e.into_inner());
    let wanted: HashSet<&str> = player_ids.iter().map(String::as_str).collect();
    Ok(
      guard
        .values()
        .flatten()
        .filter(|p| wanted.contains(p.id.as_str()))
        .map(|p| PlayerProfile {
          id: p.id.clone(),
          display_name: p.name.clone(),
          avatar_url: None,
        })
        .collect(),
    )
  }
}

/// Sixteen players `p01`..`p16` in seed order.
pub fn demo_players() -> Vec<SimPlayer> {
  (1..=PLAYER_COUNT)
    .map(|n| SimPlayer {
      id: format!("p{n:02}"),
      name: format!("Player {n}"),
    })
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::classifier::organize;
  use crate::clock::ManualClock;
  use crate::progress::{progress, Stage};
  use crate::validator::validate;

  fn sim() -> SaboSim {
    SaboSim::new("t1", demo_players(), 0).unwrap()
  }

  fn score(sim: &mut SaboSim, round: Round, match_number: u32, score1: u32, score2: u32) -> SubmitReceipt {
    let match_id = sim.get_match(round, match_number).unwrap().id.clone();
    sim
      .submit(
        &ScoreSubmission {
          match_id,
          score1,
          score2,
          submitted_by: "tester".to_string(),
        },
        1,
      )
      .unwrap()
  }

  fn play_round(sim: &mut SaboSim, round: Round) {
    for n in 1..=round.expected_count() as u32 {
      score(sim, round, n, 2, 0);
    }
  }

  fn ready_in(sim: &SaboSim, round: Round) -> Vec<Match> {
    sim
      .snapshot()
      .round(round)
      .into_iter()
      .filter(|m| m.status == MatchStatus::Ready)
      .cloned()
      .collect()
  }

  #[test]
  fn rejects_wrong_player_count() {
    let mut players = demo_players();
    players.pop();
    assert!(matches!(SaboSim::new("t1", players, 0), Err(BracketError::Validation(_))));
  }

  #[test]
  fn generated_bracket_is_valid_and_seeded() {
    let sim = sim();
    let snapshot = sim.snapshot();
    assert!(validate(&snapshot.matches).valid);
    assert_eq!(organize(&snapshot.matches).counts(), [14, 7, 3, 2, 1]);
    let first = snapshot.find(Round::Winners1, 1).unwrap();
    assert_eq!(first.player1_id.as_deref(), Some("p01"));
    assert_eq!(first.player2_id.as_deref(), Some("p02"));
    assert_eq!(ready_in(&sim, Round::Winners1).len(), 8);
    assert!(ready_in(&sim, Round::LosersA1).is_empty());
  }

  #[test]
  fn round_one_fills_round_two_and_losers_a() {
    let mut sim = sim();
    play_round(&mut sim, Round::Winners1);

    let round2 = ready_in(&sim, Round::Winners2);
    assert_eq!(round2.len(), 4);
    let losers_a = ready_in(&sim, Round::LosersA1);
    assert_eq!(losers_a.len(), 4);

    let mut losers: Vec<String> = losers_a
      .iter()
      .flat_map(|m| [m.player1_id.clone().unwrap(), m.player2_id.clone().unwrap()])
      .collect();
    losers.sort();
    let expected: Vec<String> = (1..=8).map(|n| format!("p{:02}", n * 2)).collect();
    assert_eq!(losers, expected);
  }

  #[test]
  fn rejects_scoring_twice_and_unready_matches() {
    let mut sim = sim();
    score(&mut sim, Round::Winners1, 1, 2, 0);
    let done_id = sim.get_match(Round::Winners1, 1).unwrap().id.clone();
    let again = sim.submit(
      &ScoreSubmission {
        match_id: done_id,
        score1: 0,
        score2: 2,
        submitted_by: "tester".to_string(),
      },
      2,
    );
    assert!(matches!(again, Err(BracketError::NotReady { .. })));

    let waiting_id = sim.get_match(Round::Winners2, 1).unwrap().id.clone();
    let early = sim.submit(
      &ScoreSubmission {
        match_id: waiting_id,
        score1: 2,
        score2: 0,
        submitted_by: "tester".to_string(),
      },
      2,
    );
    assert!(matches!(early, Err(BracketError::NotReady { .. })));
  }

  #[test]
  fn semifinals_wait_for_sweep_then_pair_finalists_with_branch_champions() {
    let mut sim = sim();
    for round in [
      Round::Winners1,
      Round::Winners2,
      Round::Winners3,
      Round::LosersA1,
      Round::LosersA2,
      Round::LosersA3,
      Round::LosersB1,
      Round::LosersB2,
    ] {
      play_round(&mut sim, round);
    }
    assert!(ready_in(&sim, Round::Semifinal).is_empty());

    let report = sim.sweep(2);
    assert!(matches!(report[&SweepStage::LosersACompletion], StageOutcome::Applied(_)));
    assert!(matches!(report[&SweepStage::LosersBCompletion], StageOutcome::Applied(_)));
    assert!(matches!(report[&SweepStage::SemifinalSetup], StageOutcome::Applied(_)));
    assert!(report[&SweepStage::SemifinalCompletion].is_not_needed());

    let snapshot = sim.snapshot();
    let semis = snapshot.round(Round::Semifinal);
    assert_eq!(semis.len(), 2);
    let w3: Vec<String> = snapshot
      .round(Round::Winners3)
      .iter()
      .map(|m| m.winner_id.clone().unwrap())
      .collect();
    let a_champ = snapshot.find(Round::LosersA3, 1).unwrap().winner_id.clone();
    let b_champ = snapshot.find(Round::LosersB2, 1).unwrap().winner_id.clone();
    assert_eq!(semis[0].player1_id.as_ref(), Some(&w3[0]));
    assert_eq!(semis[0].player2_id, a_champ);
    assert_eq!(semis[1].player1_id.as_ref(), Some(&w3[1]));
    assert_eq!(semis[1].player2_id, b_champ);
    assert!(semis.iter().all(|m| m.status == MatchStatus::Ready));
  }

  #[test]
  fn second_sweep_is_all_not_needed() {
    let mut sim = sim();
    sim.complete_all_matches(5).unwrap();
    let second = sim.sweep(6);
    assert_eq!(second.len(), SweepStage::ALL.len());
    assert!(second.values().all(StageOutcome::is_not_needed), "{second:?}");
    assert_eq!(sim.sweep(7), second);
  }

  #[test]
  fn full_playthrough_finishes_tournament() {
    let mut sim = sim();
    sim.complete_all_matches(5).unwrap();
    let snapshot = sim.snapshot();
    assert!(validate(&snapshot.matches).valid);
    let progress = progress(&snapshot.matches);
    assert_eq!(progress.percentage, 100);
    assert_eq!(progress.current_stage, Stage::TournamentComplete);
    assert_eq!(snapshot.status, TournamentStatus::Completed);
    assert_eq!(snapshot.champion_id, snapshot.find(Round::Final, 1).unwrap().winner_id);
  }

  #[test]
  fn repair_restores_lost_row_and_its_players() {
    let mut sim = sim();
    play_round(&mut sim, Round::Winners1);
    let before = sim.get_match(Round::LosersA1, 3).cloned().unwrap();
    sim.remove_match(Round::LosersA1, 3).unwrap();
    assert!(!validate(&sim.snapshot().matches).valid);

    let report = sim.repair(9).unwrap();
    assert_eq!(report.created, vec![before.id.clone()]);
    assert!(report.replayed >= 2);
    let after = sim.get_match(Round::LosersA1, 3).unwrap();
    assert_eq!(after.player1_id, before.player1_id);
    assert_eq!(after.player2_id, before.player2_id);
    assert_eq!(after.status, MatchStatus::Ready);
    assert!(validate(&sim.snapshot().matches).valid);

    assert!(sim.repair(10).unwrap().is_noop());
  }

  #[test]
  fn repair_writes_back_results_of_lost_completed_rows() {
    let mut sim = sim();
    play_round(&mut sim, Round::Winners1);
    score(&mut sim, Round::LosersA1, 1, 0, 2);
    let lost_w1 = sim.remove_match(Round::Winners1, 1).unwrap();
    let lost_la1 = sim.remove_match(Round::LosersA1, 1).unwrap();

    let report = sim.repair(9).unwrap();
    assert_eq!(report.created.len(), 2);
    assert_eq!(report.restored, vec![lost_w1.id.clone(), lost_la1.id.clone()]);

    let w1 = sim.get_match(Round::Winners1, 1).unwrap();
    assert_eq!(w1.status, MatchStatus::Completed);
    assert_eq!(w1.winner_id.as_deref(), Some("p01"));
    assert_eq!((w1.score1, w1.score2), (Some(2), Some(0)));
    let la1 = sim.get_match(Round::LosersA1, 1).unwrap();
    assert_eq!(la1.winner_id, lost_la1.winner_id);
    assert_eq!(la1.player1_id, lost_la1.player1_id);
    assert_eq!(
      sim.get_match(Round::Winners2, 1).unwrap().player1_id.as_deref(),
      Some("p01")
    );
    assert!(validate(&sim.snapshot().matches).valid);

    let resubmit = sim.submit(
      &ScoreSubmission {
        match_id: lost_w1.id.clone(),
        score1: 0,
        score2: 2,
        submitted_by: "tester".to_string(),
      },
      10,
    );
    assert!(matches!(resubmit, Err(BracketError::NotReady { .. })));
    assert!(sim.repair(11).unwrap().is_noop());
  }

  #[test]
  fn conflicting_destination_leaves_match_unscored() {
    let mut sim = sim();
    let w2 = sim.position(Round::Winners2, 1).unwrap();
    sim.matches[w2].player1_id = Some("intruder".to_string());
    let match_id = sim.get_match(Round::Winners1, 1).unwrap().id.clone();
    sim.drain_events();

    let err = sim
      .submit(
        &ScoreSubmission {
          match_id,
          score1: 2,
          score2: 0,
          submitted_by: "tester".to_string(),
        },
        1,
      )
      .unwrap_err();
    assert!(matches!(err, BracketError::Conflict { .. }));

    let w1 = sim.get_match(Round::Winners1, 1).unwrap();
    assert_eq!(w1.status, MatchStatus::Ready);
    assert_eq!(w1.winner_id, None);
    assert_eq!(sim.get_match(Round::LosersA1, 1).unwrap().player1_id, None);
    assert!(sim.outcomes.is_empty());
    assert!(sim.drain_events().is_empty());
    assert_eq!(sim.snapshot().status, TournamentStatus::Registration);
  }

  #[tokio::test]
  async fn store_generate_is_idempotent_without_force() {
    let store = SimBracketStore::new(Arc::new(ManualClock::new(0)));
    store.register_tournament("t1", demo_players());
    let first = store.generate_bracket("t1", false).await.unwrap();
    let id = first.find(Round::Winners1, 1).unwrap().id.clone();
    store
      .submit_match_score(ScoreSubmission {
        match_id: id,
        score1: 2,
        score2: 0,
        submitted_by: "tester".to_string(),
      })
      .await
      .unwrap();

    let again = store.generate_bracket("t1", false).await.unwrap();
    assert!(again.find(Round::Winners1, 1).unwrap().is_resolved());
    let forced = store.generate_bracket("t1", true).await.unwrap();
    assert!(!forced.find(Round::Winners1, 1).unwrap().is_resolved());
  }

  #[tokio::test]
  async fn store_reports_unknown_tournament() {
    let store = SimBracketStore::new(Arc::new(ManualClock::new(0)));
    let err = store.get_bracket_state("nope").await.unwrap_err();
    assert_eq!(err, BracketError::TournamentNotFound("nope".to_string()));
  }
}
