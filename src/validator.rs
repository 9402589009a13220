use crate::classifier::organize;
use crate::topology::{Round, Segment, TOTAL_MATCHES};
use crate::types::{Match, MatchStatus};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
  pub valid: bool,
  pub errors: Vec<String>,
}

impl ValidationReport {
  fn from_errors(errors: Vec<String>) -> Self {
    ValidationReport {
      valid: errors.is_empty(),
      errors,
    }
  }
}

/// Check an observed match collection against the fixed SABO layout.
///
/// Pure: the same input always yields the same report, errors in a stable order.
pub fn validate(matches: &[Match]) -> ValidationReport {
  let mut errors = Vec::new();

  if matches.len() != TOTAL_MATCHES {
    errors.push(format!(
      "expected {TOTAL_MATCHES} matches in total, found {}",
      matches.len()
    ));
  }

  let organized = organize(matches);
  for segment in [Segment::Winners, Segment::LosersA, Segment::LosersB] {
    let found = organized.segment(segment).len();
    let expected = segment.expected_count();
    if found != expected {
      errors.push(format!("expected {expected} {segment} matches, found {found}"));
    }
  }
  let finals = organized.semifinals.len() + organized.final_match.len();
  let expected_finals = Segment::Semifinal.expected_count() + Segment::Final.expected_count();
  if finals != expected_finals {
    errors.push(format!(
      "expected {expected_finals} semifinal and final matches, found {finals}"
    ));
  }

  let mut per_round: BTreeMap<Round, usize> = BTreeMap::new();
  for m in matches {
    *per_round.entry(m.round).or_default() += 1;
  }
  for round in Round::ALL {
    let found = per_round.get(&round).copied().unwrap_or(0);
    if found != round.expected_count() {
      errors.push(format!(
        "round {} expects {} matches, found {found}",
        round.code(),
        round.expected_count()
      ));
    }
  }

  let mut positions = HashSet::new();
  let mut sorted: Vec<&Match> = matches.iter().collect();
  sorted.sort_by(|a, b| (a.round, a.match_number, &a.id).cmp(&(b.round, b.match_number, &b.id)));
  for m in sorted {
    if m.match_number == 0 || m.match_number as usize > m.round.expected_count() {
      errors.push(format!(
        "match {} has match number {} outside 1..={} for round {}",
        m.id,
        m.match_number,
        m.round.expected_count(),
        m.round.code()
      ));
    }
    if !positions.insert((m.round, m.match_number)) {
      errors.push(format!(
        "duplicate position: round {} match {}",
        m.round.code(),
        m.match_number
      ));
    }
    errors.extend(row_errors(m));
  }

  ValidationReport::from_errors(errors)
}

fn row_errors(m: &Match) -> Vec<String> {
  let mut errors = Vec::new();
  match m.status {
    MatchStatus::Completed => {
      if m.winner_id.is_none() {
        errors.push(format!("match {} is completed without a winner", m.id));
      }
      if m.score1.is_none() || m.score2.is_none() {
        errors.push(format!("match {} is completed without both scores", m.id));
      }
      if let Some(winner) = m.winner_id.as_deref() {
        if !m.contains_player(winner) {
          errors.push(format!("match {} winner {winner} is not one of its players", m.id));
        }
      }
    }
    MatchStatus::Ready => {
      if !m.has_both_players() {
        errors.push(format!("match {} is ready without both players", m.id));
      }
    }
    MatchStatus::Pending => {}
  }
  if let (Some(p1), Some(p2)) = (m.player1_id.as_deref(), m.player2_id.as_deref()) {
    if p1 == p2 {
      errors.push(format!("match {} has the same player in both slots", m.id));
    }
  }
  errors
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::topology::expected_slots;

  fn skeleton() -> Vec<Match> {
    expected_slots()
      .into_iter()
      .map(|(round, n)| Match::empty(format!("{}-{n}", round.code()), round, n))
      .collect()
  }

  #[test]
  fn skeleton_is_valid() {
    let report = validate(&skeleton());
    assert!(report.valid, "{:?}", report.errors);
    assert!(report.errors.is_empty());
  }

  #[test]
  fn missing_match_is_reported() {
    let mut matches = skeleton();
    matches.retain(|m| !(m.round == Round::LosersB1 && m.match_number == 2));
    let report = validate(&matches);
    assert!(!report.valid);
    assert!(report.errors.contains(&"expected 27 matches in total, found 26".to_string()));
    assert!(report.errors.contains(&"expected 3 losers_b matches, found 2".to_string()));
    assert!(report.errors.contains(&"round 201 expects 2 matches, found 1".to_string()));
  }

  #[test]
  fn duplicate_and_row_invariants() {
    let mut matches = skeleton();
    let mut dup = matches[0].clone();
    dup.id = "dup".to_string();
    matches.push(dup);
    matches[1].status = MatchStatus::Completed;
    matches[2].status = MatchStatus::Ready;
    let report = validate(&matches);
    assert!(report.errors.iter().any(|e| e.starts_with("duplicate position: round 1 match 1")));
    assert!(report.errors.iter().any(|e| e.contains("completed without a winner")));
    assert!(report.errors.iter().any(|e| e.contains("ready without both players")));
  }

  #[test]
  fn deterministic() {
    let mut matches = skeleton();
    matches.truncate(20);
    assert_eq!(validate(&matches), validate(&matches));
  }
}
