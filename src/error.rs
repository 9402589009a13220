use thiserror::Error;

pub type Result<T> = std::result::Result<T, BracketError>;

/// Everything the bracket engine and its store clients can fail with.
///
/// A Winners-Round-3 loser having nowhere to go is not represented here: that
/// is `Advancement::Eliminated`, a normal outcome.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BracketError {
  #[error("bracket validation failed: {}", .0.join("; "))]
  Validation(Vec<String>),

  #[error("match {match_id} is not ready for scoring: {reason}")]
  NotReady { match_id: String, reason: String },

  #[error("conflicting submission for match {match_id}: {reason}")]
  Conflict { match_id: String, reason: String },

  #[error("bracket store transport error: {0}")]
  Transport(String),

  #[error("unknown round code {0}")]
  UnknownRound(i32),

  #[error("match {0} not found")]
  MatchNotFound(String),

  #[error("tournament {0} not found")]
  TournamentNotFound(String),
}

impl BracketError {
  pub fn validation(message: impl Into<String>) -> Self {
    BracketError::Validation(vec![message.into()])
  }

  pub fn not_ready(match_id: &str, reason: impl Into<String>) -> Self {
    BracketError::NotReady {
      match_id: match_id.to_string(),
      reason: reason.into(),
    }
  }

  pub fn conflict(match_id: &str, reason: impl Into<String>) -> Self {
    BracketError::Conflict {
      match_id: match_id.to_string(),
      reason: reason.into(),
    }
  }

  /// Short machine-readable code, shared with the RPC backend's error payloads.
  pub fn code(&self) -> &'static str {
    match self {
      BracketError::Validation(_) => "validation",
      BracketError::NotReady { .. } => "not_ready",
      BracketError::Conflict { .. } => "conflict",
      BracketError::Transport(_) => "transport",
      BracketError::UnknownRound(_) => "unknown_round",
      BracketError::MatchNotFound(_) => "match_not_found",
      BracketError::TournamentNotFound(_) => "tournament_not_found",
    }
  }

  /// Transport failures are the only errors a caller may reasonably retry by hand.
  pub fn is_transport(&self) -> bool {
    matches!(self, BracketError::Transport(_))
  }
}

impl From<reqwest::Error> for BracketError {
  fn from(err: reqwest::Error) -> Self {
    BracketError::Transport(err.to_string())
  }
}

impl From<tungstenite::Error> for BracketError {
  fn from(err: tungstenite::Error) -> Self {
    BracketError::Transport(format!("change feed: {err}"))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn validation_message_joins_errors() {
    let err = BracketError::Validation(vec!["a".to_string(), "b".to_string()]);
    assert_eq!(err.to_string(), "bracket validation failed: a; b");
    assert_eq!(err.code(), "validation");
  }

  #[test]
  fn only_transport_is_transport() {
    assert!(BracketError::Transport("down".into()).is_transport());
    assert!(!BracketError::not_ready("m1", "missing players").is_transport());
  }
}
