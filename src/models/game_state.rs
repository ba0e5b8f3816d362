use chess::Color;
use serde::{Deserialize, Serialize};

use crate::game::clock::TimeControl;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Bot,
    #[serde(alias = "offline")]
    OfflinePair,
    Online,
}

impl Mode {
    pub fn is_local(&self) -> bool {
        matches!(self, Mode::Bot | Mode::OfflinePair)
    }
}

/// One match as seen from one page instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchSession {
    pub match_id: String,
    pub mode: Mode,
    /// Identity used for self-echo filtering and result attribution.
    pub local_player: String,
    /// The local player's colour. In offline-pair mode this is the colour of
    /// the first player named on the page; both sides move on this device.
    pub local_color: Color,
    pub opponent: String,
    pub time_control: TimeControl,
    pub start_notation: Option<String>,
}

impl MatchSession {
    pub const BOT_NAME: &'static str = "Computer";

    pub fn bot(local_player: impl Into<String>, local_color: Color, time_control: TimeControl) -> Self {
        Self {
            match_id: "bot-match".to_string(),
            mode: Mode::Bot,
            local_player: local_player.into(),
            local_color,
            opponent: Self::BOT_NAME.to_string(),
            time_control,
            start_notation: None,
        }
    }

    pub fn offline(
        local_player: impl Into<String>,
        friend: impl Into<String>,
        local_color: Color,
        time_control: TimeControl,
    ) -> Self {
        Self {
            match_id: "offline-match".to_string(),
            mode: Mode::OfflinePair,
            local_player: local_player.into(),
            local_color,
            opponent: friend.into(),
            time_control,
            start_notation: None,
        }
    }

    pub fn online(
        match_id: impl Into<String>,
        local_player: impl Into<String>,
        local_color: Color,
        opponent: impl Into<String>,
        time_control: TimeControl,
    ) -> Self {
        Self {
            match_id: match_id.into(),
            mode: Mode::Online,
            local_player: local_player.into(),
            local_color,
            opponent: opponent.into(),
            time_control,
            start_notation: None,
        }
    }

    pub fn with_start(mut self, notation: Option<String>) -> Self {
        self.start_notation = notation;
        self
    }

    /// Display name of whoever plays `color`.
    pub fn name_of(&self, color: Color) -> &str {
        if color == self.local_color {
            &self.local_player
        } else {
            &self.opponent
        }
    }
}
