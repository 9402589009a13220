use crate::config::EngineConfig;
use crate::error::{BracketError, Result};
use crate::store::{BracketStore, ChangeStream, ProfileDirectory};
use crate::types::{
  BracketSnapshot, PlayerProfile, RepairReport, ScoreSubmission, StoreEvent, SubmitReceipt, SweepReport,
};
use async_trait::async_trait;
use futures::{channel::mpsc, StreamExt};
use reqwest::StatusCode;
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::{json, Value};
use std::{io::ErrorKind, net::TcpStream, time::Duration};
use tungstenite::{
  client::IntoClientRequest,
  http::HeaderValue,
  stream::MaybeTlsStream,
  Message, WebSocket,
};
use tracing::{debug, info, warn};

const USER_AGENT: &str = "sabo-bracket";
const FEED_POLL_INTERVAL_MS: u64 = 250;

type FeedSocket = WebSocket<MaybeTlsStream<TcpStream>>;

/// Structured rejection the RPC backend sends with non-2xx responses.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct BackendErrorBody {
  code: Option<String>,
  message: Option<String>,
  match_id: Option<String>,
  errors: Vec<String>,
}

/// Turn a non-2xx response into a `BracketError`. Bodies carrying a known
/// `code` become the matching domain error; anything else is transport.
pub fn map_backend_error(context: &str, status: StatusCode, body: &str) -> BracketError {
  let parsed = serde_json::from_str::<BackendErrorBody>(body).ok();
  if let Some(parsed) = parsed {
    let message = parsed.message.clone().unwrap_or_else(|| status.to_string());
    let match_id = parsed.match_id.clone().unwrap_or_default();
    match parsed.code.as_deref() {
      Some("not_ready") => return BracketError::not_ready(&match_id, message),
      Some("conflict") => return BracketError::conflict(&match_id, message),
      Some("validation") => {
        let errors = if parsed.errors.is_empty() { vec![message] } else { parsed.errors };
        return BracketError::Validation(errors);
      }
      Some("match_not_found") => return BracketError::MatchNotFound(match_id),
      _ => {}
    }
  }
  BracketError::Transport(format!("{context} failed with {status}: {body}"))
}

/// Parse one websocket frame of the change feed.
pub fn parse_feed_frame(text: &str) -> Result<StoreEvent> {
  serde_json::from_str(text).map_err(|e| BracketError::Transport(format!("bad change feed frame: {e}")))
}

/// `BracketStore` backed by the remote RPC service.
pub struct HttpBracketStore {
  client: reqwest::Client,
  base_url: String,
  ws_url: String,
  token: String,
}

impl HttpBracketStore {
  pub fn new(base_url: &str, ws_url: &str, token: &str) -> Self {
    HttpBracketStore {
      client: reqwest::Client::new(),
      base_url: base_url.trim().trim_end_matches('/').to_string(),
      ws_url: ws_url.trim().trim_end_matches('/').to_string(),
      token: token.trim().to_string(),
    }
  }

  pub fn from_config(config: &EngineConfig) -> Result<Self> {
    if config.store_url.trim().is_empty() {
      return Err(BracketError::validation(
        "bracket store URL is not configured (set storeUrl or SABO_STORE_URL)",
      ));
    }
    Ok(Self::new(&config.store_url, &config.resolved_ws_url(), &config.api_token))
  }

  pub fn rpc_url(&self, function: &str) -> String {
    format!("{}/rpc/{function}", self.base_url)
  }

  pub fn feed_url(&self, tournament_id: &str) -> String {
    format!("{}/tournaments/{tournament_id}/changes", self.ws_url)
  }

  fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
    let request = request.header("User-Agent", USER_AGENT);
    if self.token.is_empty() {
      request
    } else {
      request.bearer_auth(&self.token)
    }
  }

  async fn rpc<T: DeserializeOwned>(&self, function: &str, body: Value) -> Result<T> {
    let url = self.rpc_url(function);
    debug!(%url, body = %body, "bracket store request");
    let resp = self.authorize(self.client.post(&url)).json(&body).send().await.map_err(|e| {
      warn!(function, "bracket store request failed: {e}");
      BracketError::from(e)
    })?;
    self.decode(function, resp).await
  }

  async fn get<T: DeserializeOwned>(&self, context: &str, url: &str) -> Result<T> {
    debug!(%url, "bracket store request");
    let resp = self.authorize(self.client.get(url)).send().await.map_err(|e| {
      warn!(context, "bracket store request failed: {e}");
      BracketError::from(e)
    })?;
    self.decode(context, resp).await
  }

  async fn decode<T: DeserializeOwned>(&self, context: &str, resp: reqwest::Response) -> Result<T> {
    let status = resp.status();
    let body = resp.text().await?;
    debug!(context, %status, "bracket store response");
    if !status.is_success() {
      let err = map_backend_error(context, status, &body);
      warn!(context, code = err.code(), "bracket store rejected request: {err}");
      return Err(err);
    }
    serde_json::from_str(&body).map_err(|e| {
      warn!(context, "bracket store response did not parse: {e}");
      BracketError::Transport(format!("{context} returned an unreadable body: {e}"))
    })
  }

  fn connect_feed(url: &str, token: &str) -> Result<FeedSocket> {
    let mut request = url.into_client_request()?;
    if !token.is_empty() {
      let value = HeaderValue::from_str(&format!("Bearer {token}"))
        .map_err(|e| BracketError::Transport(format!("invalid api token header: {e}")))?;
      request.headers_mut().insert("Authorization", value);
    }
    let (socket, _) = tungstenite::connect(request)?;
    Ok(socket)
  }
}

/// Forward feed frames until the socket closes or the receiver goes away.
/// Reads time out every `FEED_POLL_INTERVAL_MS` so a dropped receiver is
/// noticed on a silent feed too.
fn pump_feed(mut socket: FeedSocket, tx: mpsc::UnboundedSender<StoreEvent>, url: String) {
  if let Err(e) = set_feed_read_timeout(&socket, Duration::from_millis(FEED_POLL_INTERVAL_MS)) {
    warn!(%url, "change feed read timeout not set: {e}");
  }
  loop {
    if tx.is_closed() {
      debug!(%url, "change feed receiver dropped");
      break;
    }
    match socket.read() {
      Ok(Message::Text(text)) => match parse_feed_frame(&text) {
        Ok(event) => {
          if tx.unbounded_send(event).is_err() {
            break;
          }
        }
        Err(e) => warn!(%url, "{e}"),
      },
      Ok(Message::Close(_)) => {
        info!(%url, "change feed closed by server");
        break;
      }
      Ok(_) => {}
      Err(tungstenite::Error::Io(e)) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {}
      Err(e) => {
        warn!(%url, "change feed read failed: {e}");
        break;
      }
    }
  }
  let _ = socket.close(None);
}

fn set_feed_read_timeout(socket: &FeedSocket, timeout: Duration) -> std::io::Result<()> {
  match socket.get_ref() {
    MaybeTlsStream::Plain(stream) => stream.set_read_timeout(Some(timeout)),
    MaybeTlsStream::Rustls(stream) => stream.get_ref().set_read_timeout(Some(timeout)),
    _ => Ok(()),
  }
}

#[async_trait]
impl BracketStore for HttpBracketStore {
  async fn generate_bracket(&self, tournament_id: &str, force: bool) -> Result<BracketSnapshot> {
    self
      .rpc(
        "generate_sabo_bracket",
        json!({ "tournamentId": tournament_id, "force": force }),
      )
      .await
  }

  async fn submit_match_score(&self, submission: ScoreSubmission) -> Result<SubmitReceipt> {
    let body = serde_json::to_value(&submission)
      .map_err(|e| BracketError::validation(format!("encode score submission: {e}")))?;
    self.rpc("submit_sabo_match_score", body).await
  }

  async fn trigger_advancement_sweep(&self, tournament_id: &str) -> Result<SweepReport> {
    self
      .rpc("trigger_sabo_advancement_sweep", json!({ "tournamentId": tournament_id }))
      .await
  }

  async fn get_bracket_state(&self, tournament_id: &str) -> Result<BracketSnapshot> {
    let url = format!("{}/tournaments/{tournament_id}/bracket", self.base_url);
    self.get("get_bracket_state", &url).await
  }

  async fn change_stream(&self, tournament_id: &str) -> Result<ChangeStream> {
    let url = self.feed_url(tournament_id);
    let token = self.token.clone();
    let connect_url = url.clone();
    let socket = tokio::task::spawn_blocking(move || Self::connect_feed(&connect_url, &token))
      .await
      .map_err(|e| BracketError::Transport(format!("change feed task: {e}")))??;
    info!(%url, "change feed connected");

    let (tx, rx) = mpsc::unbounded();
    tokio::task::spawn_blocking(move || pump_feed(socket, tx, url));
    Ok(rx.boxed())
  }

  async fn repair_bracket(&self, tournament_id: &str) -> Result<RepairReport> {
    self
      .rpc("repair_sabo_bracket", json!({ "tournamentId": tournament_id }))
      .await
  }
}

#[async_trait]
impl ProfileDirectory for HttpBracketStore {
  async fn fetch_profiles(&self, player_ids: &[String]) -> Result<Vec<PlayerProfile>> {
    if player_ids.is_empty() {
      return Ok(Vec::new());
    }
    self
      .rpc("get_player_profiles", json!({ "playerIds": player_ids }))
      .await
  }
}
