pub mod clock;
pub mod engine;
pub mod finalizer;
pub mod oracle;
pub mod state_machine;
pub mod sync;
pub mod utils;

pub use engine::{CandidateMove, MoveRecord, Position};
pub use state_machine::{MatchStateMachine, MoveRejected, Status};
pub use sync::{MatchSync, OracleSettings, Outbound};
