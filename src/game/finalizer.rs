//! Result Finalizer: one persistence call per finished match.
//!
//! Local matches always report. Online matches report from one side only,
//! and [`crate::game::sync::MatchSync`] decides which side that is.

use futures::future::BoxFuture;
use log::info;
use serde::{Deserialize, Serialize};

use crate::error::PersistError;
use crate::game::state_machine::MatchStateMachine;
use crate::game::utils::color_to_string;
use crate::models::game_state::{MatchSession, Mode};

/// Body of the result save request.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ResultRecord {
    pub status: String,
    pub player_color: String,
    pub fen: String,
    pub winner: Option<String>,
    pub opponent_name: String,
    pub game_type: String,
    /// Relay match id; only online matches have one the store can use.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_id: Option<String>,
}

#[derive(Deserialize, Debug)]
struct SaveResponse {
    #[serde(rename = "matchId")]
    match_id: serde_json::Value,
}

/// Outbound persistence for finished matches. Resolves to the opaque
/// identifier the store assigned.
pub trait ResultStore: Send + Sync {
    fn save(&self, record: ResultRecord) -> BoxFuture<'static, Result<String, PersistError>>;
}

pub struct HttpResultStore {
    client: reqwest::Client,
    url: String,
}

impl HttpResultStore {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

impl ResultStore for HttpResultStore {
    fn save(&self, record: ResultRecord) -> BoxFuture<'static, Result<String, PersistError>> {
        let request = self.client.post(&self.url).json(&record);
        Box::pin(async move {
            let response = request.send().await?;
            let status = response.status();
            if !status.is_success() {
                return Err(PersistError::Rejected {
                    reason: format!("HTTP {}", status),
                });
            }
            let body: SaveResponse = response.json().await?;
            Ok(match body.match_id {
                serde_json::Value::String(id) => id,
                other => other.to_string(),
            })
        })
    }
}

/// Latch ensuring a finished match is saved once. A failed save re-arms it
/// so the next evaluation retries.
#[derive(Debug, Default)]
pub struct ResultFinalizer {
    latched: bool,
}

impl ResultFinalizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_latched(&self) -> bool {
        self.latched
    }

    /// Returns the record to save the first time the match is seen in a
    /// terminal status; `None` on every other call.
    pub fn evaluate(
        &mut self,
        session: &MatchSession,
        machine: &MatchStateMachine,
    ) -> Option<ResultRecord> {
        if self.latched || !machine.is_terminal() {
            return None;
        }
        self.latched = true;
        let record = build_record(session, machine);
        info!(
            "Finalizing {} match {}: {} (winner: {:?})",
            record.game_type, session.match_id, record.status, record.winner
        );
        Some(record)
    }

    pub fn on_failure(&mut self) {
        self.latched = false;
    }
}

fn build_record(session: &MatchSession, machine: &MatchStateMachine) -> ResultRecord {
    let status = machine.status();
    let winner = status
        .winner()
        .map(|color| session.name_of(color).to_string());
    ResultRecord {
        status: status.to_string(),
        player_color: color_to_string(session.local_color),
        fen: machine.position().to_notation(),
        winner,
        opponent_name: session.opponent.clone(),
        game_type: match session.mode {
            Mode::Bot => "BOT".to_string(),
            Mode::OfflinePair => "OFFLINE FRIEND".to_string(),
            Mode::Online => "ONLINE".to_string(),
        },
        match_id: (session.mode == Mode::Online).then(|| session.match_id.clone()),
    }
}
