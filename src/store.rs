use crate::error::Result;
use crate::types::{
  BracketSnapshot, PlayerProfile, RepairReport, ScoreSubmission, StoreEvent, SubmitReceipt, SweepReport,
};
use async_trait::async_trait;
use futures::stream::BoxStream;

/// Change feed for one tournament. Ends when the underlying subscription drops;
/// callers re-subscribe.
pub type ChangeStream = BoxStream<'static, StoreEvent>;

/// The authoritative bracket backend.
///
/// Every mutating call is at-least-once safe: `generate_bracket` without
/// `force` returns the existing bracket, a repeated sweep reports its stages as
/// not needed, and a score for an already completed match is rejected with
/// `NotReady` rather than applied twice.
#[async_trait]
pub trait BracketStore: Send + Sync {
  async fn generate_bracket(&self, tournament_id: &str, force: bool) -> Result<BracketSnapshot>;

  async fn submit_match_score(&self, submission: ScoreSubmission) -> Result<SubmitReceipt>;

  async fn trigger_advancement_sweep(&self, tournament_id: &str) -> Result<SweepReport>;

  async fn get_bracket_state(&self, tournament_id: &str) -> Result<BracketSnapshot>;

  async fn change_stream(&self, tournament_id: &str) -> Result<ChangeStream>;

  async fn repair_bracket(&self, tournament_id: &str) -> Result<RepairReport>;
}

/// Source of player display data for the profile cache.
#[async_trait]
pub trait ProfileDirectory: Send + Sync {
  async fn fetch_profiles(&self, player_ids: &[String]) -> Result<Vec<PlayerProfile>>;
}
