use std::sync::Arc;

use actix::Actor;
use actix_web::{web, App, HttpServer};
use log::{error, info};

use chess_match_host::config::ServerConfig;
use chess_match_host::game::finalizer::HttpResultStore;
use chess_match_host::models::AppState;
use chess_match_host::relay::RelayHub;
use chess_match_host::routes::configure_routes;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Initialize logger
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let config = match ServerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            return Err(std::io::Error::new(std::io::ErrorKind::InvalidInput, e));
        }
    };
    match &config.engine_path {
        Some(path) => info!("Bot matches use the engine at {}", path.display()),
        None => info!("No engine configured; bot matches use the built-in oracle"),
    }
    info!("Finished local matches are saved to {}", config.result_url);
    info!("Starting chess match host at http://{}", config.bind_addr);

    // Create shared application state
    let bind_addr = config.bind_addr.clone();
    let static_dir = config.static_dir.clone();
    let app_state = web::Data::new(AppState {
        relay: RelayHub::new().start(),
        store: Arc::new(HttpResultStore::new(config.result_url.clone())),
        config,
    });

    HttpServer::new(move || {
        App::new()
            .app_data(app_state.clone())
            .configure(|cfg| configure_routes(cfg, &static_dir))
    })
    .bind(bind_addr)?
    .run()
    .await
}
