// relay-server/src/routing.rs
use actix_web::{web, Error, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use std::collections::HashMap;

use common::Config;

use crate::actors::page_session_actor::PageSessionActor;

/// Configure routes for the relay server
pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/ws/page").route(web::get().to(page_ws_route)));
}

/// WebSocket route for page connections. The page declares its origin; the
/// worker enforces its allow-list when the relay's upstream link connects.
async fn page_ws_route(
    req: HttpRequest,
    stream: web::Payload,
    query: web::Query<HashMap<String, String>>,
    config: web::Data<Config>,
) -> Result<HttpResponse, Error> {
    let origin = match query.get("origin") {
        Some(origin) => origin.clone(),
        None => {
            tracing::warn!("Page connection attempt without origin");
            return Ok(HttpResponse::BadRequest().finish());
        }
    };

    let worker_url = format!("ws://{}/ws/relay", config.worker_addr);
    let session = PageSessionActor::new(origin, worker_url, config.timing.clone());

    ws::start(session, &req, stream)
}
