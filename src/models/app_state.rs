use std::sync::Arc;

use actix::Addr;

use crate::config::ServerConfig;
use crate::game::finalizer::ResultStore;
use crate::relay::RelayHub;

/// Application state shared between connections
pub struct AppState {
    pub relay: Addr<RelayHub>,
    pub store: Arc<dyn ResultStore>,
    pub config: ServerConfig,
}
