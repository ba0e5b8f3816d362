use actix::prelude::*;
use actix_web_actors::ws;
use chess::Color;
use log::{debug, error, info};

use crate::error::EngineError;
use crate::game::clock::TimeControl;
use crate::game::engine::CandidateMove;
use crate::game::state_machine::MoveRejected;
use crate::game::sync::MatchSync;
use crate::game::utils::{color_to_string, parse_color, parse_promotion, parse_square};
use crate::models::*;
use crate::relay::{CancelWaiting, CreateRoom, FindOpponent, JoinRoom, OpponentJoined, RoomSeat};
use crate::websocket::handler::ChessWebSocket;

const DEFAULT_PLAYER: &str = "Player";
const DEFAULT_FRIEND: &str = "Friend";

fn parse_candidate(
    from: &str,
    to: &str,
    promotion: Option<&str>,
) -> Result<CandidateMove, EngineError> {
    let promotion = promotion
        .filter(|p| !p.is_empty())
        .map(parse_promotion)
        .transpose()?;
    Ok(CandidateMove::new(parse_square(from)?, parse_square(to)?, promotion))
}

fn online_session(seat: RoomSeat) -> MatchSession {
    MatchSession::online(
        seat.match_id,
        seat.username,
        seat.color,
        seat.opponent.unwrap_or_default(),
        seat.time_control,
    )
}

impl ChessWebSocket {
    pub fn handle_message(&mut self, msg: ClientMessage, ctx: &mut ws::WebsocketContext<Self>) {
        match msg {
            ClientMessage::Start {
                mode,
                color,
                username,
                opponent,
                time,
                increment_seconds,
                fen,
            } => {
                let color = color.as_deref().and_then(parse_color).unwrap_or(Color::White);
                let username = username.unwrap_or_else(|| DEFAULT_PLAYER.to_string());
                let time_control = TimeControl::parse(time.as_deref())
                    .with_increment(increment_seconds.unwrap_or(0));
                let session = match mode {
                    Mode::Bot => MatchSession::bot(username, color, time_control),
                    Mode::OfflinePair => MatchSession::offline(
                        username,
                        opponent.unwrap_or_else(|| DEFAULT_FRIEND.to_string()),
                        color,
                        time_control,
                    ),
                    Mode::Online => {
                        self.send(
                            ctx,
                            &ServerMessage::Error {
                                error: "Online matches start with create_room or join_room"
                                    .to_string(),
                            },
                        );
                        return;
                    }
                };
                self.begin(session.with_start(fen), ctx);
            }
            ClientMessage::CreateRoom {
                username,
                color,
                time,
            } => self.handle_create_room(username, color, time, ctx),
            ClientMessage::JoinRoom { username, match_id } => {
                self.handle_join_room(username, match_id, ctx)
            }
            ClientMessage::FindOpponent { username, time } => {
                self.handle_find_opponent(username, time, ctx)
            }
            ClientMessage::CancelWaiting => self.handle_cancel_waiting(ctx),
            ClientMessage::Move {
                from,
                to,
                promotion,
            } => self.handle_move(from, to, promotion, ctx),
            ClientMessage::GetMoves { square } => self.handle_get_moves(square, ctx),
            ClientMessage::Resign => self.drive(ctx, MatchSync::resign),
            ClientMessage::OfferDraw => self.drive(ctx, MatchSync::offer_draw),
            ClientMessage::AcceptDraw => self.drive(ctx, MatchSync::accept_draw),
            ClientMessage::DeclineDraw => self.drive(ctx, MatchSync::decline_draw),
            ClientMessage::Chat { message } => self.drive(ctx, |sync| sync.chat(&message)),
            ClientMessage::Leave { confirmed } => self.handle_leave(confirmed, ctx),
        }
    }

    fn handle_create_room(
        &mut self,
        username: String,
        color: Option<String>,
        time: Option<String>,
        ctx: &mut ws::WebsocketContext<Self>,
    ) {
        self.teardown(ctx);
        let request = CreateRoom {
            id: self.id.clone(),
            username,
            color: color.as_deref().and_then(parse_color).unwrap_or(Color::White),
            time_control: TimeControl::parse(time.as_deref()),
            host: ctx.address().recipient(),
        };
        ctx.wait(
            self.app_state
                .relay
                .send(request)
                .into_actor(self)
                .map(|result, act, ctx| match result {
                    Ok(Ok(seat)) => {
                        act.pending_room = Some(seat.match_id.clone());
                        act.send(
                            ctx,
                            &ServerMessage::RoomCreated {
                                match_id: seat.match_id,
                                color: color_to_string(seat.color),
                            },
                        );
                    }
                    Ok(Err(e)) => act.send(ctx, &ServerMessage::Error { error: e.to_string() }),
                    Err(e) => {
                        error!("Relay unavailable: {}", e);
                        act.send(
                            ctx,
                            &ServerMessage::Error {
                                error: "Relay unavailable".to_string(),
                            },
                        );
                    }
                }),
        );
    }

    fn handle_join_room(
        &mut self,
        username: String,
        match_id: String,
        ctx: &mut ws::WebsocketContext<Self>,
    ) {
        self.teardown(ctx);
        ctx.wait(
            self.app_state
                .relay
                .send(JoinRoom { match_id, username })
                .into_actor(self)
                .map(|result, act, ctx| match result {
                    Ok(Ok(seat)) => {
                        act.send(
                            ctx,
                            &ServerMessage::RoomJoined {
                                match_id: seat.match_id.clone(),
                                color: color_to_string(seat.color),
                            },
                        );
                        act.begin(online_session(seat), ctx);
                    }
                    Ok(Err(e)) => act.send(ctx, &ServerMessage::Error { error: e.to_string() }),
                    Err(e) => {
                        error!("Relay unavailable: {}", e);
                        act.send(
                            ctx,
                            &ServerMessage::Error {
                                error: "Relay unavailable".to_string(),
                            },
                        );
                    }
                }),
        );
    }

    fn handle_find_opponent(
        &mut self,
        username: String,
        time: Option<String>,
        ctx: &mut ws::WebsocketContext<Self>,
    ) {
        self.teardown(ctx);
        let request = FindOpponent {
            id: self.id.clone(),
            username,
            time_control: TimeControl::parse(time.as_deref()),
            recipient: ctx.address().recipient(),
        };
        ctx.wait(
            self.app_state
                .relay
                .send(request)
                .into_actor(self)
                .map(|result, act, ctx| match result {
                    Ok(Ok(Some(seat))) => act.found_match(seat, ctx),
                    Ok(Ok(None)) => {
                        act.seeking = true;
                        act.send(ctx, &ServerMessage::Waiting);
                    }
                    Ok(Err(e)) => act.send(ctx, &ServerMessage::Error { error: e.to_string() }),
                    Err(e) => {
                        error!("Relay unavailable: {}", e);
                        act.send(
                            ctx,
                            &ServerMessage::Error {
                                error: "Relay unavailable".to_string(),
                            },
                        );
                    }
                }),
        );
    }

    fn handle_cancel_waiting(&mut self, ctx: &mut ws::WebsocketContext<Self>) {
        self.seeking = false;
        ctx.wait(
            self.app_state
                .relay
                .send(CancelWaiting {
                    id: self.id.clone(),
                })
                .into_actor(self)
                .map(|result, act, ctx| {
                    let cancelled = result.unwrap_or_else(|e| {
                        error!("Relay unavailable: {}", e);
                        false
                    });
                    act.send(ctx, &ServerMessage::WaitingCancelled { cancelled });
                }),
        );
    }

    fn found_match(&mut self, seat: RoomSeat, ctx: &mut ws::WebsocketContext<Self>) {
        self.send(
            ctx,
            &ServerMessage::MatchFound {
                match_id: seat.match_id.clone(),
                color: color_to_string(seat.color),
                opponent: seat.opponent.clone().unwrap_or_default(),
            },
        );
        self.begin(online_session(seat), ctx);
    }

    fn handle_move(
        &mut self,
        from: String,
        to: String,
        promotion: Option<String>,
        ctx: &mut ws::WebsocketContext<Self>,
    ) {
        let candidate = match parse_candidate(&from, &to, promotion.as_deref()) {
            Ok(candidate) => candidate,
            Err(e) => {
                self.send(ctx, &ServerMessage::Error { error: e.to_string() });
                return;
            }
        };
        let outcome = match self.sync.as_mut() {
            Some(sync) => sync.local_move(candidate),
            None => {
                self.send(
                    ctx,
                    &ServerMessage::Error {
                        error: "Not in a game".to_string(),
                    },
                );
                return;
            }
        };

        match outcome {
            Ok((record, effects)) => {
                debug!("{} played {}", self.id, record.san);
                self.perform(effects, ctx);
                self.push_state(ctx);
            }
            Err(MoveRejected::PromotionRequired) => {
                self.send(ctx, &ServerMessage::PromotionRequired { from, to });
            }
            Err(rejected) => {
                debug!("Rejected {} from {}: {}", candidate, self.id, rejected);
                self.send(
                    ctx,
                    &ServerMessage::Rejected {
                        reason: rejected.to_string(),
                    },
                );
            }
        }
    }

    fn handle_get_moves(&mut self, square: String, ctx: &mut ws::WebsocketContext<Self>) {
        let from = match parse_square(&square) {
            Ok(from) => from,
            Err(e) => {
                self.send(ctx, &ServerMessage::Error { error: e.to_string() });
                return;
            }
        };
        let moves = match &self.sync {
            Some(sync) if sync.may_move_locally() => sync
                .machine()
                .moves_from(from)
                .into_iter()
                .map(|d| MoveOption {
                    to: d.to.to_string(),
                    promotion: d.promotion,
                    capture: d.capture,
                })
                .collect(),
            Some(_) => Vec::new(),
            None => {
                self.send(
                    ctx,
                    &ServerMessage::Error {
                        error: "Not in a game".to_string(),
                    },
                );
                return;
            }
        };
        self.send(ctx, &ServerMessage::AvailableMoves { square, moves });
    }

    fn handle_leave(&mut self, confirmed: bool, ctx: &mut ws::WebsocketContext<Self>) {
        let required = self
            .sync
            .as_ref()
            .is_some_and(MatchSync::confirm_leave_required);
        if required && !confirmed {
            self.send(ctx, &ServerMessage::LeaveConfirmation { required: true });
            return;
        }
        self.teardown(ctx);
        self.send(ctx, &ServerMessage::LeaveConfirmation { required: false });
    }
}

impl Handler<OpponentJoined> for ChessWebSocket {
    type Result = ();

    fn handle(&mut self, msg: OpponentJoined, ctx: &mut Self::Context) {
        if self.seeking {
            info!("{} paired into match {}", self.id, msg.seat.match_id);
            self.found_match(msg.seat, ctx);
            return;
        }
        if self.pending_room.as_deref() != Some(msg.seat.match_id.as_str()) {
            debug!("Ignoring join for room {} no longer awaited", msg.seat.match_id);
            return;
        }
        let opponent = msg.seat.opponent.clone().unwrap_or_default();
        info!("{} joined room {}", opponent, msg.seat.match_id);
        self.send(
            ctx,
            &ServerMessage::Notice {
                text: format!("{} joined the match", opponent),
            },
        );
        self.begin(online_session(msg.seat), ctx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chess::{Piece, Square};

    #[test]
    fn parses_candidates_from_page_squares() {
        let mv = parse_candidate("e2", "e4", None).unwrap();
        assert_eq!(mv, CandidateMove::new(Square::E2, Square::E4, None));

        let mv = parse_candidate("a7", "a8", Some("n")).unwrap();
        assert_eq!(mv.promotion, Some(Piece::Knight));

        assert!(parse_candidate("a7", "a8", Some("")).unwrap().promotion.is_none());
        assert!(parse_candidate("z9", "a8", None).is_err());
        assert!(parse_candidate("a7", "a8", Some("king")).is_err());
    }
}
