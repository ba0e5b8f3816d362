use actix_files as fs;
use actix_web::{web, HttpResponse, Responder};

use crate::models::AppState;

/// HTTP handler for the index page
pub async fn index(app_state: web::Data<AppState>) -> actix_web::Result<fs::NamedFile> {
    let path = app_state.config.static_dir.join("index.html");
    Ok(fs::NamedFile::open_async(path).await?)
}

pub async fn health() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({ "status": "ok" }))
}

/// Configure the HTTP routes
pub fn configure_routes(cfg: &mut web::ServiceConfig, static_dir: &std::path::Path) {
    cfg.service(web::resource("/ws").route(web::get().to(crate::websocket::ws_index)))
        .service(web::resource("/health").route(web::get().to(health)))
        .service(web::resource("/").route(web::get().to(index)))
        .service(fs::Files::new("/static", static_dir));
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{test, App};

    #[actix_rt::test]
    async fn health_reports_ok() {
        let app = test::init_service(
            App::new().service(web::resource("/health").route(web::get().to(health))),
        )
        .await;
        let req = test::TestRequest::get().uri("/health").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["status"], "ok");
    }
}
