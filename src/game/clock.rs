//! Per-side clock accounting, one tick per second.

use chess::Color;
use serde::{Deserialize, Serialize};

use crate::game::state_machine::Status;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum TimeControl {
    #[default]
    Untimed,
    Countdown { seconds: u64, increment_seconds: u64 },
    Stopwatch,
}

impl TimeControl {
    /// Parses the page's `time` parameter: `"stopwatch"`, a number of
    /// seconds, or nothing.
    pub fn parse(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            None | Some("") => TimeControl::Untimed,
            Some(v) if v.eq_ignore_ascii_case("stopwatch") => TimeControl::Stopwatch,
            Some(v) => match v.parse::<u64>() {
                Ok(0) | Err(_) => TimeControl::Untimed,
                Ok(seconds) => TimeControl::Countdown {
                    seconds,
                    increment_seconds: 0,
                },
            },
        }
    }

    pub fn with_increment(self, increment_seconds: u64) -> Self {
        match self {
            TimeControl::Countdown { seconds, .. } => TimeControl::Countdown {
                seconds,
                increment_seconds,
            },
            other => other,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClockEvent {
    /// Nothing changed: untimed, terminal, or already expired.
    Idle,
    Ticked,
    Expired { loser: Color },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClockState {
    pub white: u64,
    pub black: u64,
    pub control: TimeControl,
    expired: bool,
}

impl ClockState {
    pub fn new(control: TimeControl) -> Self {
        let initial = match control {
            TimeControl::Countdown { seconds, .. } => seconds,
            TimeControl::Stopwatch | TimeControl::Untimed => 0,
        };
        Self {
            white: initial,
            black: initial,
            control,
            expired: false,
        }
    }

    pub fn is_running(&self, status: Status) -> bool {
        self.control != TimeControl::Untimed && !status.is_terminal() && status != Status::Idle
    }

    pub fn remaining(&self, color: Color) -> u64 {
        match color {
            Color::White => self.white,
            Color::Black => self.black,
        }
    }

    /// Advances the active side by one second. Only `active` changes.
    pub fn tick(&mut self, active: Color, status: Status) -> ClockEvent {
        if !self.is_running(status) || self.expired {
            return ClockEvent::Idle;
        }
        let slot = match active {
            Color::White => &mut self.white,
            Color::Black => &mut self.black,
        };
        match self.control {
            TimeControl::Untimed => ClockEvent::Idle,
            TimeControl::Stopwatch => {
                *slot += 1;
                ClockEvent::Ticked
            }
            TimeControl::Countdown { .. } => {
                *slot = slot.saturating_sub(1);
                if *slot == 0 {
                    self.expired = true;
                    ClockEvent::Expired { loser: active }
                } else {
                    ClockEvent::Ticked
                }
            }
        }
    }

    /// Credits the Fischer increment to the side that just moved.
    pub fn credit_move(&mut self, mover: Color) {
        if let TimeControl::Countdown {
            increment_seconds, ..
        } = self.control
        {
            if self.expired || increment_seconds == 0 {
                return;
            }
            match mover {
                Color::White => self.white += increment_seconds,
                Color::Black => self.black += increment_seconds,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_page_time_values() {
        assert_eq!(TimeControl::parse(None), TimeControl::Untimed);
        assert_eq!(TimeControl::parse(Some("stopwatch")), TimeControl::Stopwatch);
        assert_eq!(
            TimeControl::parse(Some("300")),
            TimeControl::Countdown {
                seconds: 300,
                increment_seconds: 0
            }
        );
        assert_eq!(TimeControl::parse(Some("soon")), TimeControl::Untimed);
    }

    #[test]
    fn countdown_only_moves_the_active_side() {
        let mut clock = ClockState::new(TimeControl::parse(Some("3")));
        assert_eq!(clock.tick(Color::White, Status::InProgress), ClockEvent::Ticked);
        assert_eq!(clock.white, 2);
        assert_eq!(clock.black, 3);
        assert_eq!(clock.tick(Color::Black, Status::Check), ClockEvent::Ticked);
        assert_eq!(clock.black, 2);
        assert_eq!(clock.white, 2);
    }

    #[test]
    fn countdown_expires_once() {
        let mut clock = ClockState::new(TimeControl::parse(Some("2")));
        assert_eq!(clock.tick(Color::Black, Status::InProgress), ClockEvent::Ticked);
        assert_eq!(
            clock.tick(Color::Black, Status::InProgress),
            ClockEvent::Expired {
                loser: Color::Black
            }
        );
        assert_eq!(clock.tick(Color::Black, Status::InProgress), ClockEvent::Idle);
        assert_eq!(clock.black, 0);
    }

    #[test]
    fn stopwatch_counts_up_and_never_expires() {
        let mut clock = ClockState::new(TimeControl::Stopwatch);
        for _ in 0..5 {
            assert_eq!(clock.tick(Color::White, Status::InProgress), ClockEvent::Ticked);
        }
        assert_eq!(clock.white, 5);
        assert_eq!(clock.black, 0);
    }

    #[test]
    fn untimed_and_terminal_are_inert() {
        let mut clock = ClockState::new(TimeControl::Untimed);
        assert_eq!(clock.tick(Color::White, Status::InProgress), ClockEvent::Idle);

        let mut clock = ClockState::new(TimeControl::parse(Some("10")));
        let over = Status::Resigned {
            loser: Color::White,
        };
        assert_eq!(clock.tick(Color::White, over), ClockEvent::Idle);
        assert_eq!(clock.white, 10);
    }

    #[test]
    fn increment_is_credited_to_the_mover() {
        let mut clock = ClockState::new(TimeControl::parse(Some("60")).with_increment(2));
        clock.tick(Color::White, Status::InProgress);
        clock.credit_move(Color::White);
        assert_eq!(clock.white, 61);
        assert_eq!(clock.black, 60);
    }
}
