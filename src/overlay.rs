use crate::types::{Match, MatchStatus};
use serde::{Deserialize, Serialize};

/// What the client shows for one match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchState {
  NoPlayers,
  WaitingOpponent,
  Ready,
  ScoreSubmittedOptimistic,
  Confirmed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverlayPhase {
  /// The remote call has not returned yet.
  InFlight,
  /// The backend accepted the score; waiting for the change feed to show it.
  AwaitingConfirmation,
}

/// A locally applied, not yet confirmed score.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Overlay {
  pub match_id: String,
  pub winner_id: String,
  pub score1: u32,
  pub score2: u32,
  pub submitted_at_ms: u64,
  /// Distinguishes this submission from a later one for the same match.
  pub generation: u64,
  pub phase: OverlayPhase,
}

impl Overlay {
  pub fn is_expired(&self, now_ms: u64, timeout_ms: u64) -> bool {
    now_ms.saturating_sub(self.submitted_at_ms) >= timeout_ms
  }

  /// The row as the user should see it. Only the scored match itself
  /// changes; downstream slots are never filled from an overlay.
  pub fn apply(&self, row: &Match) -> Match {
    let mut shown = row.clone();
    shown.winner_id = Some(self.winner_id.clone());
    shown.score1 = Some(self.score1);
    shown.score2 = Some(self.score2);
    shown.status = MatchStatus::Completed;
    shown
  }

  /// Any authoritative row that shows the match resolved settles the
  /// overlay, whatever winner it carries.
  pub fn is_confirmed_by(&self, row: &Match) -> bool {
    row.id == self.match_id && row.is_resolved()
  }
}

pub fn match_state(row: &Match, overlay: Option<&Overlay>) -> MatchState {
  if row.is_resolved() {
    return MatchState::Confirmed;
  }
  if overlay.is_some() {
    return MatchState::ScoreSubmittedOptimistic;
  }
  match row.player_count() {
    0 => MatchState::NoPlayers,
    1 => MatchState::WaitingOpponent,
    _ => MatchState::Ready,
  }
}

/// A match row prepared for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayMatch {
  #[serde(flatten)]
  pub row: Match,
  pub pending: bool,
  pub state: MatchState,
}

impl DisplayMatch {
  pub fn new(row: &Match, overlay: Option<&Overlay>) -> Self {
    let state = match_state(row, overlay);
    match overlay.filter(|_| state == MatchState::ScoreSubmittedOptimistic) {
      Some(overlay) => DisplayMatch {
        row: overlay.apply(row),
        pending: true,
        state,
      },
      None => DisplayMatch {
        row: row.clone(),
        pending: false,
        state,
      },
    }
  }
}
