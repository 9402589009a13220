use crate::topology::Segment;
use crate::types::Match;

/// A flat match list split by bracket segment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrganizedBracket {
  pub winners: Vec<Match>,
  pub losers_a: Vec<Match>,
  pub losers_b: Vec<Match>,
  pub semifinals: Vec<Match>,
  pub final_match: Vec<Match>,
}

impl OrganizedBracket {
  pub fn segment(&self, segment: Segment) -> &[Match] {
    match segment {
      Segment::Winners => &self.winners,
      Segment::LosersA => &self.losers_a,
      Segment::LosersB => &self.losers_b,
      Segment::Semifinal => &self.semifinals,
      Segment::Final => &self.final_match,
    }
  }

  pub fn counts(&self) -> [usize; 5] {
    Segment::ALL.map(|segment| self.segment(segment).len())
  }

  pub fn total(&self) -> usize {
    self.counts().iter().sum()
  }
}

/// Partition `matches` into the five segments. Input order is ignored; each
/// bucket comes back sorted by round then match number.
pub fn organize(matches: &[Match]) -> OrganizedBracket {
  let mut out = OrganizedBracket::default();
  for m in matches {
    let bucket = match m.segment() {
      Segment::Winners => &mut out.winners,
      Segment::LosersA => &mut out.losers_a,
      Segment::LosersB => &mut out.losers_b,
      Segment::Semifinal => &mut out.semifinals,
      Segment::Final => &mut out.final_match,
    };
    bucket.push(m.clone());
  }
  for bucket in [
    &mut out.winners,
    &mut out.losers_a,
    &mut out.losers_b,
    &mut out.semifinals,
    &mut out.final_match,
  ] {
    bucket.sort_by_key(|m| (m.round, m.match_number));
  }
  out
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::topology::{expected_slots, Round};
  use std::collections::HashSet;

  fn full_bracket() -> Vec<Match> {
    expected_slots()
      .into_iter()
      .map(|(round, n)| Match::empty(format!("{}-{n}", round.code()), round, n))
      .collect()
  }

  #[test]
  fn partitions_full_bracket() {
    let mut matches = full_bracket();
    matches.reverse();
    let organized = organize(&matches);
    assert_eq!(organized.counts(), [14, 7, 3, 2, 1]);

    let mut seen = HashSet::new();
    for segment in Segment::ALL {
      for m in organized.segment(segment) {
        assert_eq!(m.segment(), segment);
        assert!(seen.insert(m.id.clone()), "duplicate {}", m.id);
      }
    }
    assert_eq!(seen.len(), matches.len());
  }

  #[test]
  fn buckets_are_sorted() {
    let organized = organize(&full_bracket());
    let first = &organized.winners[0];
    assert_eq!((first.round, first.match_number), (Round::Winners1, 1));
    let last = organized.winners.last().unwrap();
    assert_eq!((last.round, last.match_number), (Round::Winners3, 2));
  }

  #[test]
  fn partial_input_keeps_every_match() {
    let matches: Vec<Match> = full_bracket().into_iter().step_by(3).collect();
    let organized = organize(&matches);
    assert_eq!(organized.total(), matches.len());
  }
}
