use crate::error::{BracketError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

// ── Constants ──────────────────────────────────────────────────────────

pub const TOTAL_MATCHES: usize = 27;
pub const PLAYER_COUNT: usize = 16;

// ── Rounds ─────────────────────────────────────────────────────────────

/// One of the ten rounds of a SABO bracket.
///
/// On the wire a round is its numeric code (1, 2, 3, 101, 102, 103, 201, 202,
/// 250, 300); everywhere else it is this enum, so an out-of-range round cannot
/// be constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub enum Round {
  Winners1,
  Winners2,
  Winners3,
  LosersA1,
  LosersA2,
  LosersA3,
  LosersB1,
  LosersB2,
  Semifinal,
  Final,
}

impl Round {
  pub const ALL: [Round; 10] = [
    Round::Winners1,
    Round::Winners2,
    Round::Winners3,
    Round::LosersA1,
    Round::LosersA2,
    Round::LosersA3,
    Round::LosersB1,
    Round::LosersB2,
    Round::Semifinal,
    Round::Final,
  ];

  pub fn code(self) -> i32 {
    match self {
      Round::Winners1 => 1,
      Round::Winners2 => 2,
      Round::Winners3 => 3,
      Round::LosersA1 => 101,
      Round::LosersA2 => 102,
      Round::LosersA3 => 103,
      Round::LosersB1 => 201,
      Round::LosersB2 => 202,
      Round::Semifinal => 250,
      Round::Final => 300,
    }
  }

  pub fn from_code(code: i32) -> Result<Round> {
    Round::ALL
      .iter()
      .copied()
      .find(|round| round.code() == code)
      .ok_or(BracketError::UnknownRound(code))
  }

  pub fn segment(self) -> Segment {
    match self {
      Round::Winners1 | Round::Winners2 | Round::Winners3 => Segment::Winners,
      Round::LosersA1 | Round::LosersA2 | Round::LosersA3 => Segment::LosersA,
      Round::LosersB1 | Round::LosersB2 => Segment::LosersB,
      Round::Semifinal => Segment::Semifinal,
      Round::Final => Segment::Final,
    }
  }

  pub fn expected_count(self) -> usize {
    match self {
      Round::Winners1 => 8,
      Round::Winners2 => 4,
      Round::Winners3 => 2,
      Round::LosersA1 => 4,
      Round::LosersA2 => 2,
      Round::LosersA3 => 1,
      Round::LosersB1 => 2,
      Round::LosersB2 => 1,
      Round::Semifinal => 2,
      Round::Final => 1,
    }
  }

  pub fn label(self) -> &'static str {
    match self {
      Round::Winners1 => "Winners Round 1",
      Round::Winners2 => "Winners Round 2",
      Round::Winners3 => "Winners Round 3",
      Round::LosersA1 => "Losers A Round 1",
      Round::LosersA2 => "Losers A Round 2",
      Round::LosersA3 => "Losers A Final",
      Round::LosersB1 => "Losers B Round 1",
      Round::LosersB2 => "Losers B Final",
      Round::Semifinal => "Semifinal",
      Round::Final => "Final",
    }
  }
}

impl TryFrom<i32> for Round {
  type Error = BracketError;

  fn try_from(code: i32) -> Result<Round> {
    Round::from_code(code)
  }
}

impl From<Round> for i32 {
  fn from(round: Round) -> i32 {
    round.code()
  }
}

impl fmt::Display for Round {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{} ({})", self.label(), self.code())
  }
}

// ── Segments ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Segment {
  Winners,
  LosersA,
  LosersB,
  Semifinal,
  Final,
}

impl Segment {
  pub const ALL: [Segment; 5] = [
    Segment::Winners,
    Segment::LosersA,
    Segment::LosersB,
    Segment::Semifinal,
    Segment::Final,
  ];

  pub fn rounds(self) -> &'static [Round] {
    match self {
      Segment::Winners => &[Round::Winners1, Round::Winners2, Round::Winners3],
      Segment::LosersA => &[Round::LosersA1, Round::LosersA2, Round::LosersA3],
      Segment::LosersB => &[Round::LosersB1, Round::LosersB2],
      Segment::Semifinal => &[Round::Semifinal],
      Segment::Final => &[Round::Final],
    }
  }

  /// 14 / 7 / 3 / 2 / 1.
  pub fn expected_count(self) -> usize {
    self.rounds().iter().map(|round| round.expected_count()).sum()
  }

  pub fn label(self) -> &'static str {
    match self {
      Segment::Winners => "winners",
      Segment::LosersA => "losers_a",
      Segment::LosersB => "losers_b",
      Segment::Semifinal => "semifinal",
      Segment::Final => "final",
    }
  }
}

impl fmt::Display for Segment {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.label())
  }
}

// ── Lookups ────────────────────────────────────────────────────────────

pub fn segment_of(round: Round) -> Segment {
  round.segment()
}

pub fn expected_count(round: Round) -> usize {
  round.expected_count()
}

/// Segment lookup for a raw round code coming off the wire.
pub fn segment_of_code(code: i32) -> Result<Segment> {
  Round::from_code(code).map(Round::segment)
}

pub fn expected_count_for_code(code: i32) -> Result<usize> {
  Round::from_code(code).map(Round::expected_count)
}

/// Every `(round, match_number)` position of a well-formed bracket, in canonical order.
pub fn expected_slots() -> Vec<(Round, u32)> {
  Round::ALL
    .iter()
    .flat_map(|round| (1..=round.expected_count() as u32).map(move |n| (*round, n)))
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn counts_sum_to_total() {
    let total: usize = Round::ALL.iter().map(|r| r.expected_count()).sum();
    assert_eq!(total, TOTAL_MATCHES);
    assert_eq!(expected_slots().len(), TOTAL_MATCHES);
  }

  #[test]
  fn segment_counts() {
    let counts: Vec<usize> = Segment::ALL.iter().map(|s| s.expected_count()).collect();
    assert_eq!(counts, vec![14, 7, 3, 2, 1]);
  }

  #[test]
  fn codes_round_trip_and_reject_unknown() {
    for round in Round::ALL {
      assert_eq!(Round::from_code(round.code()), Ok(round));
    }
    assert_eq!(Round::from_code(4), Err(BracketError::UnknownRound(4)));
    assert_eq!(segment_of_code(104), Err(BracketError::UnknownRound(104)));
    assert_eq!(expected_count_for_code(201), Ok(2));
  }

  #[test]
  fn round_serializes_as_code() {
    let json = serde_json::to_string(&Round::LosersB2).unwrap();
    assert_eq!(json, "202");
    let parsed: Round = serde_json::from_str("250").unwrap();
    assert_eq!(parsed, Round::Semifinal);
    assert!(serde_json::from_str::<Round>("251").is_err());
  }

  #[test]
  fn segment_membership() {
    assert_eq!(segment_of(Round::Winners3), Segment::Winners);
    assert_eq!(segment_of(Round::LosersA3), Segment::LosersA);
    assert_eq!(segment_of(Round::LosersB1), Segment::LosersB);
    assert_eq!(segment_of(Round::Semifinal), Segment::Semifinal);
    assert_eq!(segment_of(Round::Final), Segment::Final);
  }
}
