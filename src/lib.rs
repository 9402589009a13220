pub mod error;
pub mod topology;
pub mod types;
pub mod classifier;
pub mod advancement;
pub mod validator;
pub mod progress;
pub mod clock;
pub mod config;
pub mod store;
pub mod overlay;
pub mod debounce;
pub mod orchestrator;
pub mod profile_cache;
pub mod http_store;
pub mod sabo_sim;

pub use advancement::{destination, slot_for, sources_of, target, Advancement, SlotRef};
pub use classifier::{organize, OrganizedBracket};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{init_logging, load_config, EngineConfig};
pub use error::{BracketError, Result};
pub use http_store::HttpBracketStore;
pub use orchestrator::{AdvancementOrchestrator, EventOutcome, OrchestratorConfig};
pub use overlay::{DisplayMatch, MatchState};
pub use profile_cache::ProfileCache;
pub use progress::{progress, round_complete, ProgressSnapshot, Stage};
pub use sabo_sim::{SaboSim, SimBracketStore, SimPlayer};
pub use store::{BracketStore, ChangeStream, ProfileDirectory};
pub use topology::{Round, Segment, PLAYER_COUNT, TOTAL_MATCHES};
pub use types::*;
pub use validator::{validate, ValidationReport};

use std::{path::Path, sync::Arc};
use tracing::info;

/// Everything a live bracket view needs, wired against the remote store.
pub struct LiveBracket {
  pub orchestrator: Arc<AdvancementOrchestrator<HttpBracketStore>>,
  pub profiles: ProfileCache<HttpBracketStore>,
}

/// Load `.env` and `sabo.json`, then build the orchestrator and profile cache
/// for `tournament_id`. Logging is left to the caller (`init_logging`).
pub fn connect(tournament_id: &str) -> Result<LiveBracket> {
  config::load_env_file(Path::new(".env"));
  let config = load_config().map_err(BracketError::validation)?;
  connect_with(tournament_id, &config)
}

pub fn connect_with(tournament_id: &str, config: &EngineConfig) -> Result<LiveBracket> {
  let store = Arc::new(HttpBracketStore::from_config(config)?);
  let clock: Arc<dyn Clock> = Arc::new(SystemClock);
  let orchestrator = AdvancementOrchestrator::new(
    tournament_id,
    store.clone(),
    clock.clone(),
    OrchestratorConfig::from(config),
  );
  let profiles = ProfileCache::new(store, clock, config.profile_ttl_ms);
  info!(tournament_id, store_url = %config.store_url, "live bracket configured");
  Ok(LiveBracket {
    orchestrator: Arc::new(orchestrator),
    profiles,
  })
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn connect_with_requires_a_store_url() {
    let err = connect_with("t1", &EngineConfig::default()).err().unwrap();
    assert!(matches!(err, BracketError::Validation(_)));
  }

  #[test]
  fn connect_with_applies_engine_settings() {
    let config = EngineConfig {
      store_url: "http://localhost:9000".to_string(),
      resync_debounce_ms: 50,
      auto_sweep: false,
      ..EngineConfig::default()
    };
    let live = connect_with("t1", &config).unwrap();
    assert_eq!(live.orchestrator.tournament_id(), "t1");
    assert_eq!(live.orchestrator.config().resync_debounce_ms, 50);
    assert!(!live.orchestrator.config().auto_sweep);
  }
}
