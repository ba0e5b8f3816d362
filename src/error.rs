//! Error types for the match host.
//!
//! Nothing in here is fatal to the process: rules rejections are ordinary
//! outcomes (see [`crate::game::state_machine::MoveRejected`]), and the
//! variants below are logged, surfaced to the player as a notice, or both.

/// Errors raised while loading or decoding positions and squares.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("invalid position notation: {notation}")]
    InvalidNotation { notation: String },

    #[error("invalid square: {square}")]
    InvalidSquare { square: String },

    #[error("row/column out of range: ({row}, {col})")]
    CoordinateOutOfRange { row: i64, col: i64 },

    #[error("invalid promotion piece: {piece}")]
    InvalidPromotion { piece: String },
}

/// Errors raised while decoding payloads from the relay, the oracle or the
/// browser.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("malformed payload on {topic}: {source}")]
    Malformed {
        topic: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("{kind} event is not accepted on {topic}")]
    UnexpectedEvent { topic: String, kind: &'static str },

    #[error("payload for match {got} delivered to match {expected}")]
    WrongMatch { expected: String, got: String },

    #[error("malformed oracle reply: {line}")]
    OracleReply { line: String },

    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// Errors raised by the outbound result persistence call.
#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("result store request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("result store rejected the record: {reason}")]
    Rejected { reason: String },
}

/// Errors raised while talking to the move oracle worker.
#[derive(Debug, thiserror::Error)]
pub enum OracleError {
    #[error("failed to spawn engine at {path}: {source}")]
    Spawn {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("engine pipe closed: {0}")]
    Io(#[from] std::io::Error),

    #[error("position rejected by oracle: {0}")]
    Position(#[from] EngineError),
}

/// Errors raised by the relay's room registry.
#[derive(Debug, thiserror::Error)]
pub enum RoomError {
    #[error("no open match {match_id}")]
    NotFound { match_id: String },

    #[error("{username} is already seated in match {match_id}")]
    NameTaken { match_id: String, username: String },

    #[error("a username is required")]
    MissingUsername,
}

/// Errors raised while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },

    #[error("invalid configuration: {reason}")]
    Invalid { reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let err = EngineError::InvalidNotation {
            notation: "not a fen".into(),
        };
        assert_eq!(err.to_string(), "invalid position notation: not a fen");

        let err = WireError::WrongMatch {
            expected: "a".into(),
            got: "b".into(),
        };
        assert_eq!(err.to_string(), "payload for match b delivered to match a");

        let err = ConfigError::InvalidValue {
            key: "CHESS_ENGINE_DEPTH",
            value: "deep".into(),
        };
        assert_eq!(err.to_string(), "invalid value for CHESS_ENGINE_DEPTH: deep");
    }

    #[test]
    fn errors_are_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<EngineError>();
        assert_send_sync::<WireError>();
        assert_send_sync::<PersistError>();
        assert_send_sync::<OracleError>();
        assert_send_sync::<RoomError>();
    }
}
