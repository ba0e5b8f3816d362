//! Synchronization Layer.
//!
//! Connects one [`MatchStateMachine`] to its input sources: local player
//! actions, the relay (online), the move oracle (bot) and the clock. The
//! layer does no I/O. Every input returns the [`Outbound`] effects the host
//! has to carry out, and the host feeds results back in as further inputs.

use std::time::Duration;

use chess::Color;
use log::{debug, info, warn};
use serde::Serialize;

use crate::error::WireError;
use crate::game::clock::{ClockEvent, ClockState};
use crate::game::engine::{CandidateMove, MoveRecord};
use crate::game::finalizer::{ResultFinalizer, ResultRecord};
use crate::game::oracle::parse_bestmove;
use crate::game::state_machine::{MatchStateMachine, MoveRejected, Status};
use crate::game::utils::{
    color_to_string, parse_promotion, piece_char, promotion_suffix, square_from_row_col,
    square_to_row_col,
};
use crate::models::game_state::{MatchSession, Mode};
use crate::models::messages::{
    ChatMessage, GameStateEvent, GameView, LastMove, MoveMessage, RelayMessage, Topic, WireStatus,
};

/// Side effects requested by the layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Send `payload` to every subscriber of `topic`.
    Publish { topic: Topic, payload: String },
    /// Call [`MatchSync::oracle_due`] after `delay`.
    ScheduleOracle { delay: Duration },
    /// Ask the oracle for a move in `notation`.
    OracleSearch { notation: String, depth: u8 },
    /// Hand the record to the result store.
    SaveResult(ResultRecord),
    /// Draw offer addressed to the local player.
    DrawOffered { from: String },
    /// Chat line for the match, the local player's own lines included.
    Chat { from: String, message: String },
    /// Informational text for the page.
    Notice(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OracleSettings {
    pub depth: u8,
    pub delay: Duration,
}

impl Default for OracleSettings {
    fn default() -> Self {
        Self {
            depth: 10,
            delay: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct PendingOffer {
    from: String,
}

pub struct MatchSync {
    session: MatchSession,
    machine: MatchStateMachine,
    clock: ClockState,
    finalizer: ResultFinalizer,
    oracle: OracleSettings,
    search_pending: bool,
    incoming_offer: Option<PendingOffer>,
    offer_outstanding: bool,
    /// Online only: this side ended the match and so reports the result.
    ended_here: bool,
}

impl MatchSync {
    /// Starts the match and returns any effect the opening position needs,
    /// such as the bot moving first.
    pub fn start(session: MatchSession, oracle: OracleSettings) -> (Self, Vec<Outbound>) {
        let mut machine = MatchStateMachine::new();
        machine.start(session.start_notation.as_deref());
        let clock = ClockState::new(session.time_control);
        info!(
            "Starting {:?} match {} for {} as {}",
            session.mode,
            session.match_id,
            session.local_player,
            color_to_string(session.local_color)
        );

        let mut sync = Self {
            session,
            machine,
            clock,
            finalizer: ResultFinalizer::new(),
            oracle,
            search_pending: false,
            incoming_offer: None,
            offer_outstanding: false,
            ended_here: false,
        };
        let mut out = Vec::new();
        sync.schedule_oracle_if_due(&mut out);
        sync.settle(&mut out);
        (sync, out)
    }

    pub fn session(&self) -> &MatchSession {
        &self.session
    }

    pub fn machine(&self) -> &MatchStateMachine {
        &self.machine
    }

    pub fn clock(&self) -> &ClockState {
        &self.clock
    }

    pub fn search_pending(&self) -> bool {
        self.search_pending
    }

    /// Whether the page may move the side whose turn it is.
    pub fn may_move_locally(&self) -> bool {
        match self.session.mode {
            Mode::OfflinePair => true,
            Mode::Bot | Mode::Online => self.machine.turn() == self.session.local_color,
        }
    }

    /// A move made on this page.
    pub fn local_move(
        &mut self,
        candidate: CandidateMove,
    ) -> Result<(MoveRecord, Vec<Outbound>), MoveRejected> {
        if self.machine.is_terminal() {
            return Err(MoveRejected::GameOver);
        }
        if !self.may_move_locally() {
            return Err(MoveRejected::NotYourTurn);
        }
        let record = self.machine.apply(candidate)?;
        self.clock.credit_move(record.color);
        self.ended_here = self.machine.is_terminal();

        let mut out = Vec::new();
        match self.session.mode {
            Mode::Online => {
                let message = self.move_message(&record);
                self.publish(Topic::Moves(self.session.match_id.clone()), &message, &mut out);
            }
            Mode::Bot => self.schedule_oracle_if_due(&mut out),
            Mode::OfflinePair => {}
        }
        self.settle(&mut out);
        Ok((record, out))
    }

    /// The delayed bot trigger fired. Turn ownership is checked again here
    /// since the match may have moved on while the timer was pending.
    pub fn oracle_due(&mut self) -> Vec<Outbound> {
        let mut out = Vec::new();
        if !self.is_oracle_turn() {
            debug!("Oracle trigger for {} is stale", self.session.match_id);
            return out;
        }
        if self.search_pending {
            debug!("Oracle search already outstanding");
            return out;
        }
        self.search_pending = true;
        out.push(Outbound::OracleSearch {
            notation: self.machine.position().to_notation(),
            depth: self.oracle.depth,
        });
        out
    }

    /// The oracle failed to take the request; allows a later retry.
    pub fn oracle_failed(&mut self) {
        self.search_pending = false;
    }

    /// A line from the oracle worker. Only `bestmove` lines matter.
    pub fn oracle_reply(&mut self, line: &str) -> Vec<Outbound> {
        let mut out = Vec::new();
        let parsed = match parse_bestmove(line) {
            Some(parsed) => parsed,
            None => return out,
        };
        self.search_pending = false;

        let candidate = match parsed {
            Ok(Some(candidate)) => candidate,
            Ok(None) => {
                debug!("Oracle has no move in {}", self.machine.position().to_notation());
                return out;
            }
            Err(e) => {
                warn!("{}", e);
                return out;
            }
        };
        if !self.is_oracle_turn() {
            debug!("Discarding stale oracle reply {}", candidate);
            return out;
        }

        let candidate = candidate.with_default_promotion(&self.machine.position());
        match self.machine.apply(candidate) {
            Ok(record) => {
                info!("{} played {}", MatchSession::BOT_NAME, record.san);
                self.clock.credit_move(record.color);
            }
            Err(e) => warn!("Oracle move {} rejected: {}", candidate, e),
        }
        self.settle(&mut out);
        out
    }

    /// A raw payload delivered by the relay.
    pub fn incoming(&mut self, topic: &Topic, payload: &str) -> Vec<Outbound> {
        let mut out = Vec::new();
        let message = match RelayMessage::decode(topic, payload) {
            Ok(message) => message,
            Err(e) => {
                warn!("Dropping relay payload: {}", e);
                return out;
            }
        };

        match message {
            RelayMessage::Move(message) => self.remote_move(message),
            RelayMessage::Resignation { player, match_id } => {
                if self.is_foreign(&match_id) {
                    return out;
                }
                let loser = self.color_of(&player);
                if self.machine.resign(loser) {
                    out.push(Outbound::Notice(format!("{} resigned", player)));
                }
            }
            RelayMessage::DrawOffer { player, match_id } => {
                if self.is_foreign(&match_id) || player == self.session.local_player {
                    return out;
                }
                if self.machine.is_terminal() {
                    debug!("Ignoring draw offer from {} after the game ended", player);
                    return out;
                }
                if let Some(previous) = self.incoming_offer.replace(PendingOffer {
                    from: player.clone(),
                }) {
                    debug!("Draw offer from {} supersedes one from {}", player, previous.from);
                }
                out.push(Outbound::DrawOffered { from: player });
            }
            RelayMessage::DrawAccepted { player, match_id } => {
                if self.is_foreign(&match_id) {
                    return out;
                }
                let own_echo = player == self.session.local_player;
                if !own_echo && !self.offer_outstanding {
                    warn!("Dropping draw acceptance from {}: no offer is outstanding", player);
                    return out;
                }
                self.clear_offers();
                if self.machine.agree_draw() && !own_echo {
                    out.push(Outbound::Notice(format!("{} accepted the draw", player)));
                }
            }
            RelayMessage::DrawDeclined { player, match_id } => {
                if self.is_foreign(&match_id) {
                    return out;
                }
                if player != self.session.local_player && self.offer_outstanding {
                    self.offer_outstanding = false;
                    out.push(Outbound::Notice(format!("{} declined the draw offer", player)));
                }
            }
            RelayMessage::Chat(chat) => {
                if !self.is_foreign(&chat.match_id) {
                    out.push(Outbound::Chat {
                        from: chat.from,
                        message: chat.message,
                    });
                }
            }
        }
        self.settle(&mut out);
        out
    }

    pub fn resign(&mut self) -> Vec<Outbound> {
        let mut out = Vec::new();
        if self.machine.is_terminal() {
            return out;
        }
        let loser = match self.session.mode {
            Mode::OfflinePair => self.machine.turn(),
            Mode::Bot | Mode::Online => self.session.local_color,
        };
        self.machine.resign(loser);
        self.ended_here = true;
        if self.session.mode == Mode::Online {
            let event = GameStateEvent::Resignation {
                player: self.session.local_player.clone(),
                match_id: self.session.match_id.clone(),
            };
            self.publish(Topic::GameState(self.session.match_id.clone()), &event, &mut out);
        }
        self.settle(&mut out);
        out
    }

    pub fn offer_draw(&mut self) -> Vec<Outbound> {
        let mut out = Vec::new();
        if self.machine.is_terminal() {
            return out;
        }
        match self.session.mode {
            Mode::Online => {
                self.offer_outstanding = true;
                let event = GameStateEvent::DrawOffer {
                    player: self.session.local_player.clone(),
                    match_id: self.session.match_id.clone(),
                };
                self.publish(Topic::DrawOffers(self.session.opponent.clone()), &event, &mut out);
                out.push(Outbound::Notice(format!(
                    "Draw offered to {}",
                    self.session.opponent
                )));
            }
            Mode::Bot => {
                out.push(Outbound::Notice(format!(
                    "{} declined the draw offer",
                    MatchSession::BOT_NAME
                )));
            }
            Mode::OfflinePair => {
                self.machine.agree_draw();
            }
        }
        self.settle(&mut out);
        out
    }

    pub fn accept_draw(&mut self) -> Vec<Outbound> {
        let mut out = Vec::new();
        if self.machine.is_terminal() {
            return out;
        }
        if self.incoming_offer.take().is_none() {
            out.push(Outbound::Notice("There is no draw offer to accept".to_string()));
            return out;
        }
        self.machine.agree_draw();
        self.ended_here = true;
        let event = GameStateEvent::DrawAccepted {
            player: self.session.local_player.clone(),
            match_id: self.session.match_id.clone(),
        };
        self.publish(Topic::GameState(self.session.match_id.clone()), &event, &mut out);
        self.settle(&mut out);
        out
    }

    pub fn decline_draw(&mut self) -> Vec<Outbound> {
        let mut out = Vec::new();
        if self.incoming_offer.take().is_none() {
            return out;
        }
        let event = GameStateEvent::DrawDeclined {
            player: self.session.local_player.clone(),
            match_id: self.session.match_id.clone(),
        };
        self.publish(Topic::GameState(self.session.match_id.clone()), &event, &mut out);
        out
    }

    /// A chat line typed on this page. Online matches only; the line reaches
    /// the page through the relay echo like the opponent's lines.
    pub fn chat(&self, message: &str) -> Vec<Outbound> {
        let mut out = Vec::new();
        let message = message.trim();
        if message.is_empty() {
            return out;
        }
        if self.session.mode != Mode::Online {
            out.push(Outbound::Notice(
                "Chat is only available in online matches".to_string(),
            ));
            return out;
        }
        let chat = ChatMessage {
            from: self.session.local_player.clone(),
            message: message.to_string(),
            match_id: self.session.match_id.clone(),
        };
        self.publish(Topic::Chat(self.session.match_id.clone()), &chat, &mut out);
        out
    }

    /// One clock second for the side to move.
    pub fn tick(&mut self) -> Vec<Outbound> {
        let mut out = Vec::new();
        let turn = self.machine.turn();
        if let ClockEvent::Expired { loser } = self.clock.tick(turn, self.machine.status()) {
            if self.machine.expire(loser) {
                // Each side runs both clocks; the side whose flag fell reports.
                self.ended_here = loser == self.session.local_color;
                out.push(Outbound::Notice(format!(
                    "{} ran out of time",
                    self.session.name_of(loser)
                )));
            }
            self.settle(&mut out);
        }
        out
    }

    /// Result store reported a failure; the next evaluation retries.
    pub fn save_failed(&mut self) {
        self.finalizer.on_failure();
    }

    /// Re-runs the terminal evaluation, e.g. after a failed save.
    pub fn reevaluate(&mut self) -> Vec<Outbound> {
        let mut out = Vec::new();
        self.settle(&mut out);
        out
    }

    /// Leaving a running local match needs the player's confirmation.
    pub fn confirm_leave_required(&self) -> bool {
        self.session.mode.is_local() && !self.machine.is_terminal()
    }

    pub fn view(&self) -> GameView {
        let position = self.machine.position();
        let status = self.machine.status();
        let terminal = status.is_terminal();
        GameView {
            match_id: self.session.match_id.clone(),
            mode: self.session.mode,
            color: color_to_string(self.session.local_color),
            opponent: self.session.opponent.clone(),
            fen: position.to_notation(),
            board: position.board_grid(),
            turn: color_to_string(position.turn()),
            is_my_turn: !terminal && self.may_move_locally(),
            status: status.tag().to_string(),
            status_text: status.to_string(),
            winner: status
                .winner()
                .map(|color| self.session.name_of(color).to_string()),
            history: self.machine.history().iter().map(|r| r.san.clone()).collect(),
            last_move: self.machine.last_move().map(|r| LastMove {
                from: r.from.to_string(),
                to: r.to.to_string(),
                san: r.san.clone(),
            }),
            time_control: self.clock.control,
            white_time: self.clock.remaining(Color::White),
            black_time: self.clock.remaining(Color::Black),
            pending_draw_offer: self.incoming_offer.as_ref().map(|o| o.from.clone()),
        }
    }

    fn remote_move(&mut self, message: MoveMessage) {
        if message.player_username == self.session.local_player {
            debug!("Ignoring echo of own move {}", message.move_notation);
            return;
        }
        if self.is_foreign(&message.match_id) {
            return;
        }
        if self.machine.turn() == self.session.local_color {
            debug!("Ignoring {} while it is our turn", message.move_notation);
            return;
        }

        let squares = square_from_row_col(message.from_row, message.from_col)
            .and_then(|from| Ok((from, square_from_row_col(message.to_row, message.to_col)?)));
        let (from, to) = match squares {
            Ok(squares) => squares,
            Err(e) => {
                warn!("Dropping remote move: {}", e);
                return;
            }
        };
        let promotion = message.promoted_to.as_deref().filter(|p| !p.is_empty());
        let promotion = match promotion.map(parse_promotion).transpose() {
            Ok(promotion) => promotion,
            Err(e) => {
                warn!("Dropping remote move {}: {}", message.move_notation, e);
                return;
            }
        };
        let candidate = CandidateMove::new(from, to, promotion)
            .with_default_promotion(&self.machine.position());

        match self.machine.apply(candidate) {
            Ok(record) => {
                debug!("Remote move {} from {}", record.san, message.player_username);
                self.clock.credit_move(record.color);
            }
            Err(e) => debug!("Remote move {} not applied: {}", candidate, e),
        }
    }

    fn move_message(&self, record: &MoveRecord) -> MoveMessage {
        let (from_row, from_col) = square_to_row_col(record.from);
        let (to_row, to_col) = square_to_row_col(record.to);
        let status = match self.machine.status() {
            Status::Checkmate { .. } | Status::Resigned { .. } | Status::Timeout { .. } => {
                WireStatus::Finished
            }
            Status::Stalemate | Status::Draw(_) => WireStatus::Draw,
            Status::Idle | Status::InProgress | Status::Check => WireStatus::InProgress,
        };
        let position = self.machine.position();
        MoveMessage {
            from_row,
            from_col,
            to_row,
            to_col,
            piece: piece_char(record.piece, Color::Black).to_string(),
            promoted_to: record.promotion.map(|p| promotion_suffix(p).to_string()),
            fen_after: record.fen_after.clone(),
            board: position.board_grid(),
            move_notation: record.san.clone(),
            status,
            player_color: color_to_string(record.color),
            player_username: self.session.local_player.clone(),
            match_id: self.session.match_id.clone(),
        }
    }

    fn publish<T: Serialize>(&self, topic: Topic, payload: &T, out: &mut Vec<Outbound>) {
        match serde_json::to_string(payload) {
            Ok(payload) => out.push(Outbound::Publish { topic, payload }),
            Err(e) => warn!("Failed to encode payload for {}: {}", topic, e),
        }
    }

    fn is_oracle_turn(&self) -> bool {
        self.session.mode == Mode::Bot
            && !self.machine.is_terminal()
            && self.machine.turn() != self.session.local_color
    }

    fn schedule_oracle_if_due(&self, out: &mut Vec<Outbound>) {
        if self.is_oracle_turn() {
            out.push(Outbound::ScheduleOracle {
                delay: self.oracle.delay,
            });
        }
    }

    fn is_foreign(&self, match_id: &str) -> bool {
        if match_id == self.session.match_id {
            return false;
        }
        warn!(
            "Dropping relay payload: {}",
            WireError::WrongMatch {
                expected: self.session.match_id.clone(),
                got: match_id.to_string(),
            }
        );
        true
    }

    fn color_of(&self, player: &str) -> Color {
        if player == self.session.local_player {
            self.session.local_color
        } else {
            !self.session.local_color
        }
    }

    fn clear_offers(&mut self) {
        self.incoming_offer = None;
        self.offer_outstanding = false;
    }

    fn settle(&mut self, out: &mut Vec<Outbound>) {
        if self.machine.is_terminal() {
            self.clear_offers();
        }
        if self.session.mode == Mode::Online && !self.ended_here {
            return;
        }
        if let Some(record) = self.finalizer.evaluate(&self.session, &self.machine) {
            out.push(Outbound::SaveResult(record));
        }
    }
}
