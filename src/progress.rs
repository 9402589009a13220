use crate::topology::{Round, Segment, TOTAL_MATCHES};
use crate::types::{Match, MatchStatus};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
  WinnersRound1,
  WinnersRound2,
  WinnersRound3,
  LosersBranches,
  Semifinals,
  Final,
  TournamentComplete,
}

impl Stage {
  pub fn label(self) -> &'static str {
    match self {
      Stage::WinnersRound1 => "Winners Round 1",
      Stage::WinnersRound2 => "Winners Round 2",
      Stage::WinnersRound3 => "Winners Round 3",
      Stage::LosersBranches => "Losers Branches",
      Stage::Semifinals => "Semifinals",
      Stage::Final => "Final",
      Stage::TournamentComplete => "Tournament Complete",
    }
  }
}

impl fmt::Display for Stage {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.label())
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSnapshot {
  pub completed: usize,
  pub total: usize,
  pub percentage: u8,
  pub current_stage: Stage,
  /// Advisory only; never fed back into bracket state.
  pub next_actions: Vec<String>,
  pub completed_rounds: Vec<Round>,
}

/// Every match of `round` is completed with a winner. A round with no rows is
/// not complete.
pub fn round_complete(matches: &[Match], round: Round) -> bool {
  let mut any = false;
  for m in matches.iter().filter(|m| m.round == round) {
    any = true;
    if !m.is_resolved() {
      return false;
    }
  }
  any
}

pub fn completed_rounds(matches: &[Match]) -> Vec<Round> {
  Round::ALL
    .iter()
    .copied()
    .filter(|round| round_complete(matches, *round))
    .collect()
}

pub fn current_stage(matches: &[Match]) -> Stage {
  if !round_complete(matches, Round::Winners1) {
    return Stage::WinnersRound1;
  }
  if !round_complete(matches, Round::Winners2) {
    return Stage::WinnersRound2;
  }
  if !round_complete(matches, Round::Winners3) {
    return Stage::WinnersRound3;
  }
  if !(round_complete(matches, Round::LosersA3) && round_complete(matches, Round::LosersB2)) {
    return Stage::LosersBranches;
  }
  if !round_complete(matches, Round::Semifinal) {
    return Stage::Semifinals;
  }
  if !round_complete(matches, Round::Final) {
    return Stage::Final;
  }
  Stage::TournamentComplete
}

pub fn progress(matches: &[Match]) -> ProgressSnapshot {
  let completed = matches
    .iter()
    .filter(|m| m.status == MatchStatus::Completed)
    .count()
    .min(TOTAL_MATCHES);
  let percentage = ((completed as f64 / TOTAL_MATCHES as f64) * 100.0).round() as u8;
  let stage = current_stage(matches);
  ProgressSnapshot {
    completed,
    total: TOTAL_MATCHES,
    percentage,
    current_stage: stage,
    next_actions: next_actions(matches, stage),
    completed_rounds: completed_rounds(matches),
  }
}

fn remaining(matches: &[Match], round: Round) -> usize {
  let done = matches
    .iter()
    .filter(|m| m.round == round && m.is_resolved())
    .count();
  round.expected_count().saturating_sub(done)
}

fn segment_remaining(matches: &[Match], segment: Segment) -> usize {
  segment.rounds().iter().map(|round| remaining(matches, *round)).sum()
}

fn plural(count: usize) -> &'static str {
  if count == 1 { "match" } else { "matches" }
}

fn next_actions(matches: &[Match], stage: Stage) -> Vec<String> {
  let mut out = Vec::new();
  let round_action = |round: Round| {
    let left = remaining(matches, round);
    format!("Complete {left} remaining {} {}", round.label(), plural(left))
  };
  match stage {
    Stage::WinnersRound1 => out.push(round_action(Round::Winners1)),
    Stage::WinnersRound2 => out.push(round_action(Round::Winners2)),
    Stage::WinnersRound3 => out.push(round_action(Round::Winners3)),
    Stage::LosersBranches => out.push("Complete Losers Branch finals".to_string()),
    Stage::Semifinals => out.push(round_action(Round::Semifinal)),
    Stage::Final => out.push(round_action(Round::Final)),
    Stage::TournamentComplete => {
      out.push("Tournament complete: publish final standings".to_string());
      return out;
    }
  }
  // The losers branches run alongside the Winners rounds.
  if stage != Stage::Semifinals && stage != Stage::Final {
    for (segment, name) in [(Segment::LosersA, "Losers Branch A"), (Segment::LosersB, "Losers Branch B")] {
      let left = segment_remaining(matches, segment);
      if left > 0 {
        out.push(format!("{name}: {left} {} remaining", plural(left)));
      }
    }
  }
  let ready = matches
    .iter()
    .filter(|m| m.status == MatchStatus::Ready)
    .count();
  if ready > 0 {
    out.push(format!("{ready} {} ready to be played", plural(ready)));
  }
  out
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

  fn resolve(m: &mut Match) {
    let p1 = format!("{}-p1", m.id);
    let p2 = format!("{}-p2", m.id);
    m.player1_id = Some(p1.clone());
    m.player2_id = Some(p2);
    m.winner_id = Some(p1);
    m.score1 = Some(2);
    m.score2 = Some(0);
    m.status = MatchStatus::Completed;
  }

  #[test]
  fn round_complete_requires_every_match() {
    let mut matches = skeleton();
    assert!(!round_complete(&matches, Round::Winners3));
    for m in matches.iter_mut().filter(|m| m.round == Round::Winners3) {
      resolve(m);
    }
    assert!(round_complete(&matches, Round::Winners3));

    let m = matches
      .iter_mut()
      .find(|m| m.round == Round::Winners3)
      .unwrap();
    m.winner_id = None;
    assert!(!round_complete(&matches, Round::Winners3));
  }

  #[test]
  fn empty_round_is_not_complete() {
    assert!(!round_complete(&[], Round::Final));
  }

  #[test]
  fn fresh_bracket_starts_in_round_one() {
    let snapshot = progress(&skeleton());
    assert_eq!(snapshot.completed, 0);
    assert_eq!(snapshot.percentage, 0);
    assert_eq!(snapshot.current_stage, Stage::WinnersRound1);
    assert_eq!(snapshot.next_actions[0], "Complete 8 remaining Winners Round 1 matches");
  }

  #[test]
  fn stage_waits_for_both_branch_finals() {
    let mut matches = skeleton();
    for m in matches.iter_mut().filter(|m| m.segment() == Segment::Winners) {
      resolve(m);
    }
    for m in matches.iter_mut().filter(|m| m.segment() == Segment::LosersA) {
      resolve(m);
    }
    assert_eq!(current_stage(&matches), Stage::LosersBranches);
    let snapshot = progress(&matches);
    assert_eq!(snapshot.next_actions[0], "Complete Losers Branch finals");
    assert!(snapshot.next_actions.contains(&"Losers Branch B: 3 matches remaining".to_string()));

    for m in matches.iter_mut().filter(|m| m.segment() == Segment::LosersB) {
      resolve(m);
    }
    assert_eq!(current_stage(&matches), Stage::Semifinals);
  }

  #[test]
  fn full_bracket_is_complete() {
    let mut matches = skeleton();
    matches.iter_mut().for_each(resolve);
    let snapshot = progress(&matches);
    assert_eq!(snapshot.completed, 27);
    assert_eq!(snapshot.percentage, 100);
    assert_eq!(snapshot.current_stage, Stage::TournamentComplete);
    assert_eq!(snapshot.current_stage.label(), "Tournament Complete");
    assert_eq!(snapshot.completed_rounds.len(), 10);
  }
}
