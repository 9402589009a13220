use crate::topology::{Round, Segment};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ── Match rows ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchStatus {
  Pending,
  Ready,
  Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PlayerSlot {
  Player1,
  Player2,
}

impl PlayerSlot {
  pub fn other(self) -> PlayerSlot {
    match self {
      PlayerSlot::Player1 => PlayerSlot::Player2,
      PlayerSlot::Player2 => PlayerSlot::Player1,
    }
  }
}

/// One row of the bracket, as the backend stores it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Match {
  pub id: String,
  #[serde(rename = "roundNumber")]
  pub round: Round,
  pub match_number: u32,
  pub player1_id: Option<String>,
  pub player2_id: Option<String>,
  pub winner_id: Option<String>,
  pub status: MatchStatus,
  pub score1: Option<u32>,
  pub score2: Option<u32>,
  /// Last write time on the backend; 0 when the source did not send one.
  #[serde(default)]
  pub updated_at_ms: u64,
}

impl Match {
  pub fn empty(id: impl Into<String>, round: Round, match_number: u32) -> Self {
    Match {
      id: id.into(),
      round,
      match_number,
      player1_id: None,
      player2_id: None,
      winner_id: None,
      status: MatchStatus::Pending,
      score1: None,
      score2: None,
      updated_at_ms: 0,
    }
  }

  pub fn segment(&self) -> Segment {
    self.round.segment()
  }

  pub fn player(&self, slot: PlayerSlot) -> Option<&str> {
    match slot {
      PlayerSlot::Player1 => self.player1_id.as_deref(),
      PlayerSlot::Player2 => self.player2_id.as_deref(),
    }
  }

  pub fn set_player(&mut self, slot: PlayerSlot, player_id: Option<String>) {
    match slot {
      PlayerSlot::Player1 => self.player1_id = player_id,
      PlayerSlot::Player2 => self.player2_id = player_id,
    }
  }

  pub fn has_both_players(&self) -> bool {
    self.player1_id.is_some() && self.player2_id.is_some()
  }

  pub fn player_count(&self) -> usize {
    usize::from(self.player1_id.is_some()) + usize::from(self.player2_id.is_some())
  }

  /// Completed with a recorded winner; the predicate round completion is built on.
  pub fn is_resolved(&self) -> bool {
    self.status == MatchStatus::Completed && self.winner_id.is_some()
  }

  pub fn loser_id(&self) -> Option<&str> {
    let winner = self.winner_id.as_deref()?;
    match (self.player1_id.as_deref(), self.player2_id.as_deref()) {
      (Some(p1), Some(p2)) if p1 == winner => Some(p2),
      (Some(p1), Some(p2)) if p2 == winner => Some(p1),
      _ => None,
    }
  }

  pub fn contains_player(&self, player_id: &str) -> bool {
    self.player1_id.as_deref() == Some(player_id) || self.player2_id.as_deref() == Some(player_id)
  }

  /// Strictly older than `known`. A missing timestamp on either side never
  /// counts as older.
  pub fn is_older_than(&self, known: &Match) -> bool {
    self.updated_at_ms != 0 && known.updated_at_ms != 0 && self.updated_at_ms < known.updated_at_ms
  }
}

// ── Tournament snapshot ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TournamentStatus {
  #[default]
  Registration,
  Ongoing,
  Completed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BracketSnapshot {
  pub tournament_id: String,
  #[serde(default)]
  pub status: TournamentStatus,
  #[serde(default)]
  pub champion_id: Option<String>,
  pub matches: Vec<Match>,
}

impl BracketSnapshot {
  pub fn find(&self, round: Round, match_number: u32) -> Option<&Match> {
    self.matches
      .iter()
      .find(|m| m.round == round && m.match_number == match_number)
  }

  pub fn round(&self, round: Round) -> Vec<&Match> {
    let mut out: Vec<&Match> = self.matches.iter().filter(|m| m.round == round).collect();
    out.sort_by_key(|m| m.match_number);
    out
  }
}

// ── Score submission ───────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreSubmission {
  pub match_id: String,
  pub score1: u32,
  pub score2: u32,
  pub submitted_by: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitReceipt {
  pub match_id: String,
  pub winner_id: String,
  /// Match ids whose slots the backend filled as part of this submission.
  #[serde(default)]
  pub advanced_into: Vec<String>,
}

// ── Advancement sweep ──────────────────────────────────────────────────

/// Stages of the advancement sweep, in the order they run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SweepStage {
  LosersACompletion,
  LosersBCompletion,
  SemifinalSetup,
  SemifinalCompletion,
  Finalization,
  StatusUpdate,
}

impl SweepStage {
  pub const ALL: [SweepStage; 6] = [
    SweepStage::LosersACompletion,
    SweepStage::LosersBCompletion,
    SweepStage::SemifinalSetup,
    SweepStage::SemifinalCompletion,
    SweepStage::Finalization,
    SweepStage::StatusUpdate,
  ];
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum StageOutcome {
  Applied(String),
  NotNeeded(String),
  Failed(String),
}

impl StageOutcome {
  pub fn is_failed(&self) -> bool {
    matches!(self, StageOutcome::Failed(_))
  }

  pub fn is_not_needed(&self) -> bool {
    matches!(self, StageOutcome::NotNeeded(_))
  }
}

pub type SweepReport = BTreeMap<SweepStage, StageOutcome>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct RepairReport {
  pub created: Vec<String>,
  pub removed: Vec<String>,
  /// Rows whose recorded result had to be written back.
  #[serde(default)]
  pub restored: Vec<String>,
  pub replayed: usize,
}

impl RepairReport {
  pub fn is_noop(&self) -> bool {
    self.created.is_empty() && self.removed.is_empty() && self.restored.is_empty()
  }
}

// ── Change feed ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RowChangeKind {
  Insert,
  Update,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RowChangeEvent {
  pub tournament_id: String,
  pub kind: RowChangeKind,
  pub row: Match,
}

/// One entry of the backend's advancement audit log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdvancementAudit {
  pub tournament_id: String,
  pub source_match_id: String,
  pub player_id: String,
  pub destination_match_id: Option<String>,
  pub destination_slot: Option<PlayerSlot>,
  pub recorded_at_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum StoreEvent {
  Row(RowChangeEvent),
  Audit(AdvancementAudit),
  /// The feed dropped events; the consumer must resync.
  Lagged(u64),
}

impl StoreEvent {
  /// `None` for feed-level events that belong to no single tournament.
  pub fn tournament_id(&self) -> Option<&str> {
    match self {
      StoreEvent::Row(change) => Some(&change.tournament_id),
      StoreEvent::Audit(audit) => Some(&audit.tournament_id),
      StoreEvent::Lagged(_) => None,
    }
  }
}

// ── Profiles ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerProfile {
  pub id: String,
  pub display_name: String,
  pub avatar_url: Option<String>,
}
