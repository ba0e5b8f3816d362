//! In-process message relay.
//!
//! Connections subscribe to topics and publish raw JSON payloads. A publish
//! reaches every subscriber of the topic, the publisher included, in the
//! order the hub received it. The hub also keeps the open online rooms and
//! the queue of players waiting for a random opponent, and hands out match
//! ids and colours to both.

use std::collections::HashMap;

use actix::prelude::*;
use chess::Color;
use log::{debug, info};
use uuid::Uuid;

use crate::error::RoomError;
use crate::game::clock::TimeControl;
use crate::game::utils::color_to_string;
use crate::models::messages::Topic;

/// A payload delivered to one subscriber.
#[derive(Message, Debug, Clone, PartialEq, Eq)]
#[rtype(result = "()")]
pub struct Delivery {
    pub topic: Topic,
    pub payload: String,
}

#[derive(Message)]
#[rtype(result = "()")]
pub struct Subscribe {
    pub id: String,
    pub topics: Vec<Topic>,
    pub recipient: Recipient<Delivery>,
}

/// Drops every subscription held by `id`, any room it opened that nobody
/// joined, and its place in the matchmaking queue.
#[derive(Message)]
#[rtype(result = "()")]
pub struct Unsubscribe {
    pub id: String,
}

#[derive(Message, Debug, Clone)]
#[rtype(result = "()")]
pub struct Publish {
    pub topic: Topic,
    pub payload: String,
}

/// Sent to a room's creator once somebody takes the other seat, and to a
/// waiting player once matchmaking pairs them.
#[derive(Message, Debug, Clone, PartialEq, Eq)]
#[rtype(result = "()")]
pub struct OpponentJoined {
    pub seat: RoomSeat,
}

/// One player's view of a room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomSeat {
    pub match_id: String,
    pub username: String,
    pub color: Color,
    pub opponent: Option<String>,
    pub time_control: TimeControl,
}

#[derive(Message)]
#[rtype(result = "Result<RoomSeat, RoomError>")]
pub struct CreateRoom {
    pub id: String,
    pub username: String,
    pub color: Color,
    pub time_control: TimeControl,
    pub host: Recipient<OpponentJoined>,
}

#[derive(Message)]
#[rtype(result = "Result<RoomSeat, RoomError>")]
pub struct JoinRoom {
    pub match_id: String,
    pub username: String,
}

/// Asks to be paired with whoever is waiting under the same time control.
/// Resolves to the caller's seat when a pairing happened, or `None` when the
/// caller was queued and will get [`OpponentJoined`] later.
#[derive(Message)]
#[rtype(result = "Result<Option<RoomSeat>, RoomError>")]
pub struct FindOpponent {
    pub id: String,
    pub username: String,
    pub time_control: TimeControl,
    pub recipient: Recipient<OpponentJoined>,
}

/// Leaves the matchmaking queue. Resolves to whether `id` was waiting.
#[derive(Message)]
#[rtype(result = "bool")]
pub struct CancelWaiting {
    pub id: String,
}

/// An open room. It leaves the registry as soon as the second seat is taken.
struct Room {
    host_id: String,
    host: Recipient<OpponentJoined>,
    host_name: String,
    host_color: Color,
    time_control: TimeControl,
}

struct Seeker {
    id: String,
    username: String,
    time_control: TimeControl,
    recipient: Recipient<OpponentJoined>,
}

#[derive(Default)]
pub struct RelayHub {
    sessions: HashMap<String, Recipient<Delivery>>,
    topics: HashMap<Topic, Vec<String>>,
    rooms: HashMap<String, Room>,
    waiting: Vec<Seeker>,
}

impl RelayHub {
    pub fn new() -> Self {
        Self::default()
    }

    fn broadcast(&self, topic: &Topic, payload: &str) {
        let subscribers = match self.topics.get(topic) {
            Some(ids) if !ids.is_empty() => ids,
            _ => {
                debug!("No subscribers on {}", topic);
                return;
            }
        };
        debug!("Relaying to {} subscriber(s) of {}", subscribers.len(), topic);
        for id in subscribers {
            if let Some(recipient) = self.sessions.get(id) {
                recipient.do_send(Delivery {
                    topic: topic.clone(),
                    payload: payload.to_string(),
                });
            }
        }
    }
}

impl Actor for RelayHub {
    type Context = Context<Self>;

    fn started(&mut self, _ctx: &mut Self::Context) {
        info!("Relay hub started");
    }
}

impl Handler<Subscribe> for RelayHub {
    type Result = ();

    fn handle(&mut self, msg: Subscribe, _: &mut Context<Self>) {
        for topic in msg.topics {
            let ids = self.topics.entry(topic.clone()).or_default();
            if !ids.contains(&msg.id) {
                ids.push(msg.id.clone());
                debug!("{} subscribed to {}", msg.id, topic);
            }
        }
        self.sessions.insert(msg.id, msg.recipient);
    }
}

impl Handler<Unsubscribe> for RelayHub {
    type Result = ();

    fn handle(&mut self, msg: Unsubscribe, _: &mut Context<Self>) {
        self.sessions.remove(&msg.id);
        self.topics.retain(|_, ids| {
            ids.retain(|id| id != &msg.id);
            !ids.is_empty()
        });
        self.rooms.retain(|match_id, room| {
            let abandoned = room.host_id == msg.id;
            if abandoned {
                info!("Closing unjoined room {}", match_id);
            }
            !abandoned
        });
        self.waiting.retain(|seeker| seeker.id != msg.id);
        debug!("{} left the relay, {} session(s) remain", msg.id, self.sessions.len());
    }
}

impl Handler<Publish> for RelayHub {
    type Result = ();

    fn handle(&mut self, msg: Publish, _: &mut Context<Self>) {
        self.broadcast(&msg.topic, &msg.payload);
    }
}

impl Handler<CreateRoom> for RelayHub {
    type Result = Result<RoomSeat, RoomError>;

    fn handle(&mut self, msg: CreateRoom, _: &mut Context<Self>) -> Self::Result {
        if msg.username.trim().is_empty() {
            return Err(RoomError::MissingUsername);
        }
        let match_id = Uuid::new_v4().to_string();
        info!(
            "{} opened match {} as {}",
            msg.username,
            match_id,
            color_to_string(msg.color)
        );
        self.rooms.insert(
            match_id.clone(),
            Room {
                host_id: msg.id,
                host: msg.host,
                host_name: msg.username.clone(),
                host_color: msg.color,
                time_control: msg.time_control,
            },
        );
        Ok(RoomSeat {
            match_id,
            username: msg.username,
            color: msg.color,
            opponent: None,
            time_control: msg.time_control,
        })
    }
}

impl Handler<JoinRoom> for RelayHub {
    type Result = Result<RoomSeat, RoomError>;

    fn handle(&mut self, msg: JoinRoom, _: &mut Context<Self>) -> Self::Result {
        if msg.username.trim().is_empty() {
            return Err(RoomError::MissingUsername);
        }
        let room = self
            .rooms
            .remove(&msg.match_id)
            .ok_or_else(|| RoomError::NotFound {
                match_id: msg.match_id.clone(),
            })?;
        // Self-echo filtering keys on the username, so both seats need distinct names.
        if room.host_name == msg.username {
            self.rooms.insert(msg.match_id.clone(), room);
            return Err(RoomError::NameTaken {
                match_id: msg.match_id,
                username: msg.username,
            });
        }

        let host_seat = RoomSeat {
            match_id: msg.match_id.clone(),
            username: room.host_name.clone(),
            color: room.host_color,
            opponent: Some(msg.username.clone()),
            time_control: room.time_control,
        };
        room.host.do_send(OpponentJoined { seat: host_seat });
        info!("{} joined match {}", msg.username, msg.match_id);

        Ok(RoomSeat {
            match_id: msg.match_id,
            username: msg.username,
            color: !room.host_color,
            opponent: Some(room.host_name),
            time_control: room.time_control,
        })
    }
}

impl Handler<FindOpponent> for RelayHub {
    type Result = Result<Option<RoomSeat>, RoomError>;

    fn handle(&mut self, msg: FindOpponent, _: &mut Context<Self>) -> Self::Result {
        if msg.username.trim().is_empty() {
            return Err(RoomError::MissingUsername);
        }
        self.waiting.retain(|seeker| seeker.id != msg.id);

        let partner = self.waiting.iter().position(|seeker| {
            seeker.username != msg.username && seeker.time_control == msg.time_control
        });
        let Some(index) = partner else {
            info!("{} is waiting for an opponent", msg.username);
            self.waiting.push(Seeker {
                id: msg.id,
                username: msg.username,
                time_control: msg.time_control,
                recipient: msg.recipient,
            });
            return Ok(None);
        };

        // The player who waited longest takes white.
        let waiter = self.waiting.remove(index);
        let match_id = Uuid::new_v4().to_string();
        info!(
            "Paired {} (white) with {} (black) in match {}",
            waiter.username, msg.username, match_id
        );
        waiter.recipient.do_send(OpponentJoined {
            seat: RoomSeat {
                match_id: match_id.clone(),
                username: waiter.username.clone(),
                color: Color::White,
                opponent: Some(msg.username.clone()),
                time_control: waiter.time_control,
            },
        });
        Ok(Some(RoomSeat {
            match_id,
            username: msg.username,
            color: Color::Black,
            opponent: Some(waiter.username),
            time_control: waiter.time_control,
        }))
    }
}

impl Handler<CancelWaiting> for RelayHub {
    type Result = bool;

    fn handle(&mut self, msg: CancelWaiting, _: &mut Context<Self>) -> Self::Result {
        let before = self.waiting.len();
        self.waiting.retain(|seeker| seeker.id != msg.id);
        let cancelled = self.waiting.len() != before;
        if cancelled {
            info!("{} stopped waiting for an opponent", msg.id);
        }
        cancelled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Collector {
        deliveries: Vec<Delivery>,
        joined: Vec<RoomSeat>,
    }

    impl Actor for Collector {
        type Context = Context<Self>;
    }

    impl Handler<Delivery> for Collector {
        type Result = ();

        fn handle(&mut self, msg: Delivery, _: &mut Context<Self>) {
            self.deliveries.push(msg);
        }
    }

    impl Handler<OpponentJoined> for Collector {
        type Result = ();

        fn handle(&mut self, msg: OpponentJoined, _: &mut Context<Self>) {
            self.joined.push(msg.seat);
        }
    }

    #[derive(Message)]
    #[rtype(result = "(Vec<Delivery>, Vec<RoomSeat>)")]
    struct Drain;

    impl Handler<Drain> for Collector {
        type Result = MessageResult<Drain>;

        fn handle(&mut self, _: Drain, _: &mut Context<Self>) -> Self::Result {
            MessageResult((
                std::mem::take(&mut self.deliveries),
                std::mem::take(&mut self.joined),
            ))
        }
    }

    #[derive(Message)]
    #[rtype(result = "usize")]
    struct OpenRooms;

    impl Handler<OpenRooms> for RelayHub {
        type Result = usize;

        fn handle(&mut self, _: OpenRooms, _: &mut Context<Self>) -> usize {
            self.rooms.len()
        }
    }

    #[derive(Message)]
    #[rtype(result = "usize")]
    struct WaitingPlayers;

    impl Handler<WaitingPlayers> for RelayHub {
        type Result = usize;

        fn handle(&mut self, _: WaitingPlayers, _: &mut Context<Self>) -> usize {
            self.waiting.len()
        }
    }

    async fn subscribe(hub: &Addr<RelayHub>, id: &str, topics: Vec<Topic>) -> Addr<Collector> {
        let collector = Collector::default().start();
        hub.send(Subscribe {
            id: id.to_string(),
            topics,
            recipient: collector.clone().recipient(),
        })
        .await
        .unwrap();
        collector
    }

    #[actix_rt::test]
    async fn publish_reaches_every_subscriber_including_sender() {
        let hub = RelayHub::new().start();
        let moves = Topic::Moves("1".into());
        let a = subscribe(&hub, "a", vec![moves.clone()]).await;
        let b = subscribe(&hub, "b", vec![moves.clone()]).await;
        let c = subscribe(&hub, "c", vec![Topic::Moves("2".into())]).await;

        for payload in ["first", "second"] {
            hub.send(Publish {
                topic: moves.clone(),
                payload: payload.into(),
            })
            .await
            .unwrap();
        }

        for collector in [&a, &b] {
            let (seen, _) = collector.send(Drain).await.unwrap();
            let payloads: Vec<_> = seen.iter().map(|d| d.payload.as_str()).collect();
            assert_eq!(payloads, vec!["first", "second"]);
        }
        assert!(c.send(Drain).await.unwrap().0.is_empty());
    }

    #[actix_rt::test]
    async fn unsubscribe_stops_delivery() {
        let hub = RelayHub::new().start();
        let topic = Topic::GameState("1".into());
        let a = subscribe(&hub, "a", vec![topic.clone()]).await;

        hub.send(Unsubscribe { id: "a".into() }).await.unwrap();
        hub.send(Publish {
            topic,
            payload: "late".into(),
        })
        .await
        .unwrap();
        assert!(a.send(Drain).await.unwrap().0.is_empty());
    }

    #[actix_rt::test]
    async fn rooms_seat_two_players_with_opposite_colours() {
        let hub = RelayHub::new().start();
        let host = Collector::default().start();

        let seat = hub
            .send(CreateRoom {
                id: "conn-1".into(),
                username: "alice".into(),
                color: Color::Black,
                time_control: TimeControl::parse(Some("300")),
                host: host.clone().recipient(),
            })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(seat.color, Color::Black);
        assert_eq!(seat.opponent, None);

        let taken = hub
            .send(JoinRoom {
                match_id: seat.match_id.clone(),
                username: "alice".into(),
            })
            .await
            .unwrap();
        assert!(matches!(taken, Err(RoomError::NameTaken { .. })));

        let guest = hub
            .send(JoinRoom {
                match_id: seat.match_id.clone(),
                username: "bob".into(),
            })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(guest.color, Color::White);
        assert_eq!(guest.opponent.as_deref(), Some("alice"));
        assert_eq!(guest.time_control, seat.time_control);

        let (_, joined) = host.send(Drain).await.unwrap();
        assert_eq!(joined.len(), 1);
        assert_eq!(joined[0].opponent.as_deref(), Some("bob"));

        let late = hub
            .send(JoinRoom {
                match_id: seat.match_id,
                username: "carol".into(),
            })
            .await
            .unwrap();
        assert!(matches!(late, Err(RoomError::NotFound { .. })));
    }

    #[actix_rt::test]
    async fn joined_rooms_leave_the_registry() {
        let hub = RelayHub::new().start();
        let host = Collector::default().start();
        let seat = hub
            .send(CreateRoom {
                id: "conn-1".into(),
                username: "alice".into(),
                color: Color::White,
                time_control: TimeControl::Untimed,
                host: host.clone().recipient(),
            })
            .await
            .unwrap()
            .unwrap();
        hub.send(JoinRoom {
            match_id: seat.match_id.clone(),
            username: "bob".into(),
        })
        .await
        .unwrap()
        .unwrap();

        let open = hub.send(OpenRooms).await.unwrap();
        assert_eq!(open, 0);

        // Both seats leaving afterwards touches nothing.
        for id in ["conn-1", "conn-2"] {
            hub.send(Unsubscribe { id: id.into() }).await.unwrap();
        }
        assert_eq!(hub.send(OpenRooms).await.unwrap(), 0);
    }

    async fn seek(
        hub: &Addr<RelayHub>,
        id: &str,
        username: &str,
        time_control: TimeControl,
    ) -> (Addr<Collector>, Option<RoomSeat>) {
        let collector = Collector::default().start();
        let seat = hub
            .send(FindOpponent {
                id: id.into(),
                username: username.into(),
                time_control,
                recipient: collector.clone().recipient(),
            })
            .await
            .unwrap()
            .unwrap();
        (collector, seat)
    }

    #[actix_rt::test]
    async fn matchmaking_pairs_the_longest_waiting_player_as_white() {
        let hub = RelayHub::new().start();
        let blitz = TimeControl::parse(Some("300"));

        let (first, seat) = seek(&hub, "conn-1", "alice", blitz).await;
        assert_eq!(seat, None);
        let (_, seat) = seek(&hub, "conn-2", "carol", TimeControl::Untimed).await;
        assert_eq!(seat, None);

        let (_, seat) = seek(&hub, "conn-3", "bob", blitz).await;
        let seat = seat.unwrap();
        assert_eq!(seat.color, Color::Black);
        assert_eq!(seat.opponent.as_deref(), Some("alice"));
        assert_eq!(seat.time_control, blitz);

        let (_, joined) = first.send(Drain).await.unwrap();
        assert_eq!(joined.len(), 1);
        assert_eq!(joined[0].match_id, seat.match_id);
        assert_eq!(joined[0].color, Color::White);
        assert_eq!(joined[0].opponent.as_deref(), Some("bob"));

        assert_eq!(hub.send(WaitingPlayers).await.unwrap(), 1);
    }

    #[actix_rt::test]
    async fn matchmaking_skips_the_same_name_and_honours_cancellation() {
        let hub = RelayHub::new().start();
        let (_, seat) = seek(&hub, "conn-1", "alice", TimeControl::Untimed).await;
        assert_eq!(seat, None);
        let (_, seat) = seek(&hub, "conn-2", "alice", TimeControl::Untimed).await;
        assert_eq!(seat, None);
        assert_eq!(hub.send(WaitingPlayers).await.unwrap(), 2);

        assert!(hub.send(CancelWaiting { id: "conn-1".into() }).await.unwrap());
        assert!(!hub.send(CancelWaiting { id: "conn-1".into() }).await.unwrap());
        hub.send(Unsubscribe { id: "conn-2".into() }).await.unwrap();
        assert_eq!(hub.send(WaitingPlayers).await.unwrap(), 0);

        let missing = hub
            .send(FindOpponent {
                id: "conn-3".into(),
                username: " ".into(),
                time_control: TimeControl::Untimed,
                recipient: Collector::default().start().recipient(),
            })
            .await
            .unwrap();
        assert!(matches!(missing, Err(RoomError::MissingUsername)));
    }

    #[actix_rt::test]
    async fn unknown_and_abandoned_rooms_cannot_be_joined() {
        let hub = RelayHub::new().start();
        let missing = hub
            .send(JoinRoom {
                match_id: "nope".into(),
                username: "bob".into(),
            })
            .await
            .unwrap();
        assert!(matches!(missing, Err(RoomError::NotFound { .. })));

        let host = Collector::default().start();
        let seat = hub
            .send(CreateRoom {
                id: "conn-1".into(),
                username: "alice".into(),
                color: Color::White,
                time_control: TimeControl::Untimed,
                host: host.recipient(),
            })
            .await
            .unwrap()
            .unwrap();
        hub.send(Unsubscribe {
            id: "conn-1".into(),
        })
        .await
        .unwrap();

        let closed = hub
            .send(JoinRoom {
                match_id: seat.match_id,
                username: "bob".into(),
            })
            .await
            .unwrap();
        assert!(matches!(closed, Err(RoomError::NotFound { .. })));
    }
}
