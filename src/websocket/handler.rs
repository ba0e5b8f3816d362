use std::sync::Arc;
use std::time::Duration;

use actix::prelude::*;
use actix_web::web;
use actix_web_actors::ws;
use log::{debug, error, info, warn};

use crate::game::clock::TimeControl;
use crate::game::finalizer::ResultRecord;
use crate::game::oracle::{FallbackOracle, MoveOracle, OracleLine, UciOracle};
use crate::game::sync::{MatchSync, OracleSettings, Outbound};
use crate::models::*;
use crate::relay::{Delivery, Publish, Subscribe, Unsubscribe};

/// One browser connection. The actor's mailbox is the match's event loop:
/// player actions, relay deliveries, oracle output, clock ticks and save
/// completions are all handled here one at a time.
pub struct ChessWebSocket {
    pub id: String,
    pub app_state: web::Data<AppState>,
    pub(crate) sync: Option<MatchSync>,
    pub(crate) pending_room: Option<String>,
    /// Queued for matchmaking; the next [`crate::relay::OpponentJoined`] is ours.
    pub(crate) seeking: bool,
    oracle: Option<Box<dyn MoveOracle>>,
    clock: Option<SpawnHandle>,
    /// Bumped whenever the match is replaced, so timers and futures started
    /// for an earlier match can recognise themselves as stale.
    generation: u64,
}

impl ChessWebSocket {
    pub fn new(id: String, app_state: web::Data<AppState>) -> Self {
        Self {
            id,
            app_state,
            sync: None,
            pending_room: None,
            seeking: false,
            oracle: None,
            clock: None,
            generation: 0,
        }
    }

    pub(crate) fn send(&self, ctx: &mut ws::WebsocketContext<Self>, message: &ServerMessage) {
        match serde_json::to_string(message) {
            Ok(text) => ctx.text(text),
            Err(e) => {
                warn!("Failed to serialize response: {}", e);
                ctx.text("{\"message_type\":\"error\",\"error\":\"Internal server error\"}");
            }
        }
    }

    pub(crate) fn push_state(&self, ctx: &mut ws::WebsocketContext<Self>) {
        if let Some(sync) = &self.sync {
            self.send(ctx, &ServerMessage::State(sync.view()));
        }
    }

    /// Runs a player action against the current match.
    pub(crate) fn drive(
        &mut self,
        ctx: &mut ws::WebsocketContext<Self>,
        action: impl FnOnce(&mut MatchSync) -> Vec<Outbound>,
    ) {
        if self.sync.is_none() {
            self.send(
                ctx,
                &ServerMessage::Error {
                    error: "Not in a game".to_string(),
                },
            );
            return;
        }
        self.drive_quiet(ctx, action);
    }

    /// Like [`Self::drive`], for internal triggers that may outlive the match.
    fn drive_quiet(
        &mut self,
        ctx: &mut ws::WebsocketContext<Self>,
        action: impl FnOnce(&mut MatchSync) -> Vec<Outbound>,
    ) {
        let effects = match self.sync.as_mut() {
            Some(sync) => action(sync),
            None => return,
        };
        self.perform(effects, ctx);
        self.push_state(ctx);
    }

    /// Starts `session`, replacing whatever this connection was doing.
    pub(crate) fn begin(&mut self, session: MatchSession, ctx: &mut ws::WebsocketContext<Self>) {
        self.teardown(ctx);

        if session.mode == Mode::Online {
            let topics = vec![
                Topic::Moves(session.match_id.clone()),
                Topic::GameState(session.match_id.clone()),
                Topic::Chat(session.match_id.clone()),
                Topic::DrawOffers(session.local_player.clone()),
            ];
            self.app_state.relay.do_send(Subscribe {
                id: self.id.clone(),
                topics,
                recipient: ctx.address().recipient(),
            });
        }

        let config = &self.app_state.config;
        let settings = OracleSettings {
            depth: config.engine_depth,
            delay: config.bot_delay,
        };
        let timed = session.time_control != TimeControl::Untimed;
        let (sync, effects) = MatchSync::start(session, settings);
        self.sync = Some(sync);

        if timed {
            self.clock = Some(ctx.run_interval(Duration::from_secs(1), |act, ctx| {
                let running = act
                    .sync
                    .as_ref()
                    .is_some_and(|s| s.clock().is_running(s.machine().status()));
                if running {
                    act.drive_quiet(ctx, MatchSync::tick);
                }
            }));
        }
        self.perform(effects, ctx);
        self.push_state(ctx);
    }

    /// Leaves the current match: stops its clock, kills the oracle and drops
    /// relay subscriptions, open rooms and the matchmaking queue entry.
    pub(crate) fn teardown(&mut self, ctx: &mut ws::WebsocketContext<Self>) {
        self.generation += 1;
        self.pending_room = None;
        self.seeking = false;
        if let Some(handle) = self.clock.take() {
            ctx.cancel_future(handle);
        }
        if let Some(mut oracle) = self.oracle.take() {
            oracle.shutdown();
        }
        if let Some(sync) = self.sync.take() {
            info!(
                "{} left match {} ({})",
                self.id,
                sync.session().match_id,
                sync.machine().status()
            );
        }
        self.app_state.relay.do_send(Unsubscribe {
            id: self.id.clone(),
        });
    }

    /// Retries a save that failed earlier, if the match is still finished.
    pub(crate) fn retry_save(&mut self, ctx: &mut ws::WebsocketContext<Self>) {
        let effects = match self.sync.as_mut() {
            Some(sync) => sync.reevaluate(),
            None => return,
        };
        self.perform(effects, ctx);
    }

    pub(crate) fn perform(&mut self, effects: Vec<Outbound>, ctx: &mut ws::WebsocketContext<Self>) {
        for effect in effects {
            match effect {
                Outbound::Publish { topic, payload } => {
                    self.app_state.relay.do_send(Publish { topic, payload });
                }
                Outbound::ScheduleOracle { delay } => {
                    let generation = self.generation;
                    ctx.run_later(delay, move |act, ctx| {
                        if act.generation == generation {
                            act.drive_quiet(ctx, MatchSync::oracle_due);
                        }
                    });
                }
                Outbound::OracleSearch { notation, depth } => self.search(&notation, depth, ctx),
                Outbound::SaveResult(record) => self.save(record, ctx),
                Outbound::DrawOffered { from } => {
                    self.send(ctx, &ServerMessage::DrawOffered { from });
                }
                Outbound::Chat { from, message } => {
                    self.send(ctx, &ServerMessage::Chat { from, message });
                }
                Outbound::Notice(text) => self.send(ctx, &ServerMessage::Notice { text }),
            }
        }
    }

    fn spawn_oracle(&self, ctx: &mut ws::WebsocketContext<Self>) -> Box<dyn MoveOracle> {
        let replies = ctx.address().recipient::<OracleLine>();
        if let Some(path) = &self.app_state.config.engine_path {
            match UciOracle::spawn(path, replies.clone()) {
                Ok(oracle) => return Box::new(oracle),
                Err(e) => warn!("{}; using the built-in oracle", e),
            }
        }
        Box::new(FallbackOracle::new(replies))
    }

    fn search(&mut self, notation: &str, depth: u8, ctx: &mut ws::WebsocketContext<Self>) {
        if self.oracle.is_none() {
            self.oracle = Some(self.spawn_oracle(ctx));
        }
        let result = match self.oracle.as_mut() {
            Some(oracle) => oracle.search(notation, depth),
            None => return,
        };
        let Err(e) = result else {
            return;
        };

        warn!("Oracle search failed: {}; switching to the built-in oracle", e);
        let mut fallback = FallbackOracle::new(ctx.address().recipient());
        let retry = fallback.search(notation, depth);
        if let Some(mut broken) = self.oracle.replace(Box::new(fallback)) {
            broken.shutdown();
        }
        if let Err(e) = retry {
            error!("Built-in oracle failed on {}: {}", notation, e);
            if let Some(sync) = self.sync.as_mut() {
                sync.oracle_failed();
            }
        }
    }

    fn save(&mut self, record: ResultRecord, ctx: &mut ws::WebsocketContext<Self>) {
        let generation = self.generation;
        let store = Arc::clone(&self.app_state.store);
        ctx.spawn(
            store
                .save(record)
                .into_actor(self)
                .map(move |result, act, ctx| match result {
                    Ok(match_id) => {
                        info!("Saved match result as {}", match_id);
                        if act.generation == generation {
                            act.send(
                                ctx,
                                &ServerMessage::Notice {
                                    text: "Game result saved".to_string(),
                                },
                            );
                        }
                    }
                    Err(e) => {
                        warn!("Failed to save match result: {}", e);
                        if act.generation == generation {
                            if let Some(sync) = act.sync.as_mut() {
                                sync.save_failed();
                            }
                            act.send(
                                ctx,
                                &ServerMessage::Notice {
                                    text: "Could not save the game result".to_string(),
                                },
                            );
                        }
                    }
                }),
        );
    }
}

impl Actor for ChessWebSocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, _ctx: &mut Self::Context) {
        info!("WebSocket connection started: {}", self.id);
    }

    fn stopping(&mut self, ctx: &mut Self::Context) -> Running {
        self.teardown(ctx);
        info!("WebSocket connection closed: {}", self.id);
        Running::Stop
    }
}

impl Handler<Delivery> for ChessWebSocket {
    type Result = ();

    fn handle(&mut self, msg: Delivery, ctx: &mut Self::Context) {
        debug!("{} <- {}: {}", self.id, msg.topic, msg.payload);
        self.drive_quiet(ctx, |sync| sync.incoming(&msg.topic, &msg.payload));
    }
}

impl Handler<OracleLine> for ChessWebSocket {
    type Result = ();

    fn handle(&mut self, msg: OracleLine, ctx: &mut Self::Context) {
        let line = msg.0;
        let expected = self.sync.as_ref().is_some_and(MatchSync::search_pending);
        if !line.starts_with("bestmove") || !expected {
            debug!("oracle -> {}", line);
            return;
        }
        let generation = self.generation;
        ctx.run_later(self.app_state.config.bot_reply_delay, move |act, ctx| {
            if act.generation == generation {
                act.drive_quiet(ctx, |sync| sync.oracle_reply(&line));
            }
        });
    }
}

// WebSocket message handler
impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for ChessWebSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(msg)) => {
                ctx.pong(&msg);
            }
            Ok(ws::Message::Pong(_)) => {}
            Ok(ws::Message::Text(text)) => {
                debug!("Received text message: {}", text);
                match serde_json::from_str::<ClientMessage>(text.as_ref()) {
                    Ok(client_msg) => {
                        self.handle_message(client_msg, ctx);
                        self.retry_save(ctx);
                    }
                    Err(e) => {
                        warn!("Error parsing client message: {}", e);
                        self.send(
                            ctx,
                            &ServerMessage::Error {
                                error: format!("Invalid message format: {}", e),
                            },
                        );
                    }
                }
            }
            Ok(ws::Message::Binary(_)) => {
                warn!("Binary messages are not supported");
                self.send(
                    ctx,
                    &ServerMessage::Error {
                        error: "Binary messages are not supported".to_string(),
                    },
                );
            }
            Ok(ws::Message::Close(reason)) => {
                ctx.close(reason);
                ctx.stop();
            }
            Ok(_) => {}
            Err(e) => {
                warn!("WebSocket protocol error on {}: {}", self.id, e);
                ctx.stop();
            }
        }
    }
}
