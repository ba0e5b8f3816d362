use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::WireError;
use crate::game::clock::TimeControl;
use crate::models::game_state::Mode;

/// Relay topics: move, game-state and chat topics per match, plus a private
/// draw-offer queue per user.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Topic {
    Moves(String),
    GameState(String),
    Chat(String),
    DrawOffers(String),
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topic::Moves(match_id) => write!(f, "/topic/moves/{}", match_id),
            Topic::GameState(match_id) => write!(f, "/topic/game-state/{}", match_id),
            Topic::Chat(match_id) => write!(f, "/topic/chat/{}", match_id),
            Topic::DrawOffers(user) => write!(f, "/user/{}/queue/draw-offers", user),
        }
    }
}

/// Coarse status carried on move messages.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WireStatus {
    InProgress,
    Finished,
    Draw,
}

/// Move published to `/topic/moves/{match}` after a local move commits.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MoveMessage {
    pub from_row: i64,
    pub from_col: i64,
    pub to_row: i64,
    pub to_col: i64,
    pub piece: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub promoted_to: Option<String>,
    pub fen_after: String,
    pub board: Vec<Vec<String>>,
    pub move_notation: String,
    pub status: WireStatus,
    pub player_color: String,
    pub player_username: String,
    pub match_id: String,
}

/// Events on `/topic/game-state/{match}` and the private draw-offer queue.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(
    tag = "type",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum GameStateEvent {
    Resignation { player: String, match_id: String },
    DrawOffer {
        #[serde(alias = "from")]
        player: String,
        match_id: String,
    },
    DrawAccepted { player: String, match_id: String },
    DrawDeclined { player: String, match_id: String },
}

/// Line published to `/topic/chat/{match}`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub from: String,
    pub message: String,
    pub match_id: String,
}

/// Everything that can arrive from the relay, decoded by topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayMessage {
    Move(MoveMessage),
    Resignation { player: String, match_id: String },
    DrawOffer { player: String, match_id: String },
    DrawAccepted { player: String, match_id: String },
    DrawDeclined { player: String, match_id: String },
    Chat(ChatMessage),
}

impl RelayMessage {
    /// Decodes a raw relay payload. Unknown `type` tags and missing fields
    /// are errors; nothing is guessed.
    pub fn decode(topic: &Topic, payload: &str) -> Result<Self, WireError> {
        let malformed = |source| WireError::Malformed {
            topic: topic.to_string(),
            source,
        };
        match topic {
            Topic::Moves(_) => serde_json::from_str::<MoveMessage>(payload)
                .map(RelayMessage::Move)
                .map_err(malformed),
            Topic::Chat(_) => serde_json::from_str::<ChatMessage>(payload)
                .map(RelayMessage::Chat)
                .map_err(malformed),
            Topic::GameState(_) => serde_json::from_str::<GameStateEvent>(payload)
                .map(RelayMessage::from)
                .map_err(malformed),
            Topic::DrawOffers(_) => {
                match serde_json::from_str::<GameStateEvent>(payload).map_err(malformed)? {
                    GameStateEvent::DrawOffer { player, match_id } => {
                        Ok(RelayMessage::DrawOffer { player, match_id })
                    }
                    other => Err(WireError::UnexpectedEvent {
                        topic: topic.to_string(),
                        kind: other.kind(),
                    }),
                }
            }
        }
    }
}

impl GameStateEvent {
    /// The wire `type` tag.
    pub fn kind(&self) -> &'static str {
        match self {
            GameStateEvent::Resignation { .. } => "RESIGNATION",
            GameStateEvent::DrawOffer { .. } => "DRAW_OFFER",
            GameStateEvent::DrawAccepted { .. } => "DRAW_ACCEPTED",
            GameStateEvent::DrawDeclined { .. } => "DRAW_DECLINED",
        }
    }
}

impl From<GameStateEvent> for RelayMessage {
    fn from(event: GameStateEvent) -> Self {
        match event {
            GameStateEvent::Resignation { player, match_id } => {
                RelayMessage::Resignation { player, match_id }
            }
            GameStateEvent::DrawOffer { player, match_id } => {
                RelayMessage::DrawOffer { player, match_id }
            }
            GameStateEvent::DrawAccepted { player, match_id } => {
                RelayMessage::DrawAccepted { player, match_id }
            }
            GameStateEvent::DrawDeclined { player, match_id } => {
                RelayMessage::DrawDeclined { player, match_id }
            }
        }
    }
}

/// Message sent from the browser to the server
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Local match against the bot or a friend on the same device.
    Start {
        mode: Mode,
        #[serde(default)]
        color: Option<String>,
        #[serde(default)]
        username: Option<String>,
        #[serde(default)]
        opponent: Option<String>,
        #[serde(default)]
        time: Option<String>,
        #[serde(default)]
        increment_seconds: Option<u64>,
        #[serde(default)]
        fen: Option<String>,
    },
    CreateRoom {
        username: String,
        #[serde(default)]
        color: Option<String>,
        #[serde(default)]
        time: Option<String>,
    },
    JoinRoom {
        username: String,
        match_id: String,
    },
    /// Online match against whoever else is waiting.
    FindOpponent {
        username: String,
        #[serde(default)]
        time: Option<String>,
    },
    CancelWaiting,
    Move {
        from: String,
        to: String,
        #[serde(default)]
        promotion: Option<String>,
    },
    GetMoves {
        square: String,
    },
    Resign,
    OfferDraw,
    AcceptDraw,
    DeclineDraw,
    Chat {
        message: String,
    },
    Leave {
        #[serde(default)]
        confirmed: bool,
    },
}

/// Last move information
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct LastMove {
    pub from: String,
    pub to: String,
    pub san: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct MoveOption {
    pub to: String,
    pub promotion: bool,
    pub capture: bool,
}

/// Snapshot of one match as shown to its page.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct GameView {
    pub match_id: String,
    pub mode: Mode,
    pub color: String,
    pub opponent: String,
    pub fen: String,
    pub board: Vec<Vec<String>>,
    pub turn: String,
    pub is_my_turn: bool,
    pub status: String,
    pub status_text: String,
    pub winner: Option<String>,
    pub history: Vec<String>,
    pub last_move: Option<LastMove>,
    pub time_control: TimeControl,
    pub white_time: u64,
    pub black_time: u64,
    pub pending_draw_offer: Option<String>,
}

/// Message sent from the server to the browser
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "message_type", rename_all = "snake_case")]
pub enum ServerMessage {
    State(GameView),
    RoomCreated { match_id: String, color: String },
    RoomJoined { match_id: String, color: String },
    Waiting,
    WaitingCancelled { cancelled: bool },
    MatchFound { match_id: String, color: String, opponent: String },
    AvailableMoves { square: String, moves: Vec<MoveOption> },
    PromotionRequired { from: String, to: String },
    Rejected { reason: String },
    DrawOffered { from: String },
    Chat { from: String, message: String },
    Notice { text: String },
    LeaveConfirmation { required: bool },
    Error { error: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_move() -> MoveMessage {
        MoveMessage {
            from_row: 6,
            from_col: 4,
            to_row: 4,
            to_col: 4,
            piece: "p".into(),
            promoted_to: None,
            fen_after: "fen".into(),
            board: vec![vec![String::new(); 8]; 8],
            move_notation: "e4".into(),
            status: WireStatus::InProgress,
            player_color: "white".into(),
            player_username: "alice".into(),
            match_id: "42".into(),
        }
    }

    #[test]
    fn move_message_uses_camel_case_fields() {
        let json = serde_json::to_value(sample_move()).unwrap();
        assert_eq!(json["fromRow"], 6);
        assert_eq!(json["moveNotation"], "e4");
        assert_eq!(json["status"], "IN_PROGRESS");
        assert_eq!(json["matchId"], "42");
        assert!(json.get("promotedTo").is_none());
    }

    #[test]
    fn decodes_move_topic_payloads() {
        let topic = Topic::Moves("42".into());
        let payload = serde_json::to_string(&sample_move()).unwrap();
        assert_eq!(
            RelayMessage::decode(&topic, &payload).unwrap(),
            RelayMessage::Move(sample_move())
        );
    }

    #[test]
    fn decodes_game_state_events() {
        let topic = Topic::GameState("42".into());
        let msg = RelayMessage::decode(
            &topic,
            r#"{"type":"RESIGNATION","player":"bob","matchId":"42","timestamp":1}"#,
        )
        .unwrap();
        assert_eq!(
            msg,
            RelayMessage::Resignation {
                player: "bob".into(),
                match_id: "42".into()
            }
        );

        let offers = Topic::DrawOffers("alice".into());
        let msg = RelayMessage::decode(
            &offers,
            r#"{"type":"DRAW_OFFER","from":"bob","matchId":"42"}"#,
        )
        .unwrap();
        assert!(matches!(msg, RelayMessage::DrawOffer { ref player, .. } if player == "bob"));
    }

    #[test]
    fn decodes_chat_lines() {
        let topic = Topic::Chat("42".into());
        let msg = RelayMessage::decode(
            &topic,
            r#"{"type":"CHAT_MESSAGE","from":"bob","message":"gg","matchId":"42","timestamp":1}"#,
        )
        .unwrap();
        assert_eq!(
            msg,
            RelayMessage::Chat(ChatMessage {
                from: "bob".into(),
                message: "gg".into(),
                match_id: "42".into(),
            })
        );
        assert!(RelayMessage::decode(&topic, r#"{"from":"bob","matchId":"42"}"#).is_err());
    }

    #[test]
    fn draw_offer_queue_only_carries_offers() {
        let offers = Topic::DrawOffers("alice".into());
        let err = RelayMessage::decode(
            &offers,
            r#"{"type":"RESIGNATION","player":"bob","matchId":"42"}"#,
        )
        .unwrap_err();
        assert!(matches!(err, WireError::UnexpectedEvent { kind: "RESIGNATION", .. }));
        assert!(RelayMessage::decode(
            &offers,
            r#"{"type":"DRAW_ACCEPTED","player":"bob","matchId":"42"}"#
        )
        .is_err());
    }

    #[test]
    fn unknown_tags_and_missing_fields_are_rejected() {
        let topic = Topic::GameState("42".into());
        assert!(RelayMessage::decode(&topic, r#"{"type":"CHAT","matchId":"42"}"#).is_err());
        assert!(RelayMessage::decode(&topic, r#"{"player":"bob","matchId":"42"}"#).is_err());
        assert!(RelayMessage::decode(&Topic::Moves("42".into()), r#"{"fromRow":1}"#).is_err());
        assert!(RelayMessage::decode(&topic, "not json").is_err());
    }

    #[test]
    fn game_state_events_serialize_with_type_tag() {
        let event = GameStateEvent::DrawAccepted {
            player: "alice".into(),
            match_id: "42".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "DRAW_ACCEPTED");
        assert_eq!(json["type"], event.kind());
        assert_eq!(json["matchId"], "42");
        assert_eq!(json["player"], "alice");
    }

    #[test]
    fn client_messages_are_tagged_by_action() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"action":"move","from":"e2","to":"e4"}"#).unwrap();
        assert_eq!(
            msg,
            ClientMessage::Move {
                from: "e2".into(),
                to: "e4".into(),
                promotion: None
            }
        );
        let msg: ClientMessage =
            serde_json::from_str(r#"{"action":"start","mode":"offline","time":"stopwatch"}"#)
                .unwrap();
        assert!(matches!(msg, ClientMessage::Start { mode: Mode::OfflinePair, .. }));
        let msg: ClientMessage =
            serde_json::from_str(r#"{"action":"find_opponent","username":"bob","time":"300"}"#)
                .unwrap();
        assert!(matches!(msg, ClientMessage::FindOpponent { time: Some(_), .. }));
        let msg: ClientMessage = serde_json::from_str(r#"{"action":"cancel_waiting"}"#).unwrap();
        assert_eq!(msg, ClientMessage::CancelWaiting);
        assert!(serde_json::from_str::<ClientMessage>(r#"{"action":"fly"}"#).is_err());
    }

    #[test]
    fn topics_render_relay_destinations() {
        assert_eq!(Topic::Moves("7".into()).to_string(), "/topic/moves/7");
        assert_eq!(Topic::GameState("7".into()).to_string(), "/topic/game-state/7");
        assert_eq!(Topic::Chat("7".into()).to_string(), "/topic/chat/7");
        assert_eq!(
            Topic::DrawOffers("bob".into()).to_string(),
            "/user/bob/queue/draw-offers"
        );
    }
}
