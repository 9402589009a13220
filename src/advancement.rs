use crate::topology::{expected_slots, Round};
use crate::types::PlayerSlot;

/// Where a player goes after a match resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advancement {
  To(Round),
  /// No further destination. Includes the Winners-Round-3 loser, which is a
  /// normal outcome rather than an error.
  Eliminated,
  /// Winner of the final.
  Champion,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotRef {
  pub round: Round,
  pub match_number: u32,
  pub slot: PlayerSlot,
}

/// A source that feeds one slot of a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Feeder {
  pub round: Round,
  pub match_number: u32,
  pub is_winner: bool,
  pub slot: PlayerSlot,
}

pub fn target(source: Round, is_winner: bool) -> Advancement {
  use Round::*;
  match (source, is_winner) {
    (Winners1, true) => Advancement::To(Winners2),
    (Winners1, false) => Advancement::To(LosersA1),
    (Winners2, true) => Advancement::To(Winners3),
    (Winners2, false) => Advancement::To(LosersB1),
    (Winners3, true) => Advancement::To(Semifinal),
    (LosersA1, true) => Advancement::To(LosersA2),
    (LosersA2, true) => Advancement::To(LosersA3),
    (LosersA3, true) => Advancement::To(Semifinal),
    (LosersB1, true) => Advancement::To(LosersB2),
    (LosersB2, true) => Advancement::To(Semifinal),
    (Semifinal, true) => Advancement::To(Final),
    (Final, true) => Advancement::Champion,
    (_, false) => Advancement::Eliminated,
  }
}

/// Odd source match numbers feed player1, even ones player2.
pub fn slot_for(source_match_number: u32) -> PlayerSlot {
  if source_match_number % 2 == 1 {
    PlayerSlot::Player1
  } else {
    PlayerSlot::Player2
  }
}

/// Exact slot a resolved match sends its winner (or loser) to.
///
/// Halving edges use `ceil(n / 2)` and [`slot_for`]. The three edges into the
/// semifinal converge instead: Winners-Round-3 match `n` feeds semifinal `n`
/// as player1, the Losers A champion takes semifinal 1 player2 and the Losers
/// B champion takes semifinal 2 player2.
pub fn destination(source: Round, match_number: u32, is_winner: bool) -> Option<SlotRef> {
  let Advancement::To(round) = target(source, is_winner) else {
    return None;
  };
  let slot_ref = match (source, round) {
    (Round::Winners3, Round::Semifinal) => SlotRef {
      round,
      match_number,
      slot: PlayerSlot::Player1,
    },
    (Round::LosersA3, Round::Semifinal) => SlotRef {
      round,
      match_number: 1,
      slot: PlayerSlot::Player2,
    },
    (Round::LosersB2, Round::Semifinal) => SlotRef {
      round,
      match_number: 2,
      slot: PlayerSlot::Player2,
    },
    _ => SlotRef {
      round,
      match_number: match_number.div_ceil(2),
      slot: slot_for(match_number),
    },
  };
  Some(slot_ref)
}

/// Inverse of [`destination`]: every source slot that feeds `(round, match_number)`.
pub fn sources_of(round: Round, match_number: u32) -> Vec<Feeder> {
  let mut out = Vec::new();
  for (source_round, source_number) in expected_slots() {
    for is_winner in [true, false] {
      if let Some(dest) = destination(source_round, source_number, is_winner) {
        if dest.round == round && dest.match_number == match_number {
          out.push(Feeder {
            round: source_round,
            match_number: source_number,
            is_winner,
            slot: dest.slot,
          });
        }
      }
    }
  }
  out
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn winners_and_branch_mapping() {
    assert_eq!(target(Round::Winners1, true), Advancement::To(Round::Winners2));
    assert_eq!(target(Round::Winners3, true), Advancement::To(Round::Semifinal));
    assert_eq!(target(Round::Winners3, false), Advancement::Eliminated);
    assert_eq!(target(Round::LosersB2, true), Advancement::To(Round::Semifinal));
    assert_eq!(target(Round::Semifinal, true), Advancement::To(Round::Final));
    assert_eq!(target(Round::Final, true), Advancement::Champion);
  }

  #[test]
  fn loser_routing() {
    assert_eq!(target(Round::Winners1, false), Advancement::To(Round::LosersA1));
    assert_eq!(target(Round::Winners2, false), Advancement::To(Round::LosersB1));
    for round in [Round::LosersA1, Round::LosersA3, Round::LosersB2, Round::Semifinal, Round::Final] {
      assert_eq!(target(round, false), Advancement::Eliminated);
    }
  }

  #[test]
  fn halving_edges_pair_adjacent_matches() {
    let a = destination(Round::Winners1, 7, true).unwrap();
    let b = destination(Round::Winners1, 8, true).unwrap();
    assert_eq!((a.round, a.match_number, a.slot), (Round::Winners2, 4, PlayerSlot::Player1));
    assert_eq!((b.round, b.match_number, b.slot), (Round::Winners2, 4, PlayerSlot::Player2));

    let loser = destination(Round::Winners2, 3, false).unwrap();
    assert_eq!((loser.round, loser.match_number, loser.slot), (Round::LosersB1, 2, PlayerSlot::Player1));
  }

  #[test]
  fn semifinal_edges_converge() {
    let w1 = destination(Round::Winners3, 1, true).unwrap();
    let w2 = destination(Round::Winners3, 2, true).unwrap();
    let a = destination(Round::LosersA3, 1, true).unwrap();
    let b = destination(Round::LosersB2, 1, true).unwrap();
    assert_eq!((w1.match_number, w1.slot), (1, PlayerSlot::Player1));
    assert_eq!((w2.match_number, w2.slot), (2, PlayerSlot::Player1));
    assert_eq!((a.match_number, a.slot), (1, PlayerSlot::Player2));
    assert_eq!((b.match_number, b.slot), (2, PlayerSlot::Player2));
    assert_eq!(destination(Round::Winners3, 1, false), None);
  }

  #[test]
  fn every_non_seeded_slot_has_exactly_one_feeder() {
    for (round, n) in expected_slots() {
      let feeders = sources_of(round, n);
      if round == Round::Winners1 {
        assert!(feeders.is_empty());
        continue;
      }
      assert_eq!(feeders.len(), 2, "{round} #{n}");
      assert_ne!(feeders[0].slot, feeders[1].slot, "{round} #{n}");
    }
  }
}
