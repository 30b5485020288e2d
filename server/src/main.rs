use actix_web::middleware::Logger;
use actix_web::{web, App, HttpServer};

use shared_canvas_server::config::ServerConfig;
use shared_canvas_server::handlers::{cors, root};
use shared_canvas_server::server::spawn_server;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = ServerConfig::from_env();
    let srv_tx = spawn_server(&config);
    let bind_addr = config.bind_addr.clone();

    log::info!("Server started on {}", bind_addr);
    HttpServer::new(move || {
        App::new()
            .wrap(cors(&config))
            .wrap(Logger::default())
            .app_data(web::Data::new(srv_tx.clone()))
            .app_data(web::Data::new(config.clone()))
            .configure(root)
    })
    .bind(bind_addr)?
    .run()
    .await
}
