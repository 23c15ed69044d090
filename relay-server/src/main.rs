// relay-server/src/main.rs

use actix_web::{web, App, HttpServer};

use common::{setup_tracing, Config};
use relay_server::routing::routes;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    setup_tracing();

    let config = Config::from_env();
    let server_addr = config.relay_addr.clone();

    tracing::info!("Starting MATA relay on {}", server_addr);
    tracing::info!("Worker endpoint: ws://{}/ws/relay", config.worker_addr);

    let config_data = web::Data::new(config);

    HttpServer::new(move || {
        App::new()
            .app_data(config_data.clone())
            .configure(routes)
    })
    .bind(&server_addr)?
    .run()
    .await
}
