use actix_files as fs;
use actix_web::{web::Data, App, HttpServer};
use dotenv::dotenv;
use log::{error, info, warn};
use std::sync::Arc;
use tera::Tera;

use sitechat::config::Config;
use sitechat::shutdown;
use sitechat::upstream::{HttpUpstream, UpstreamClient};
use sitechat::web::{routes, AppState};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Initialize environment
    dotenv().ok();
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    info!("Starting website chat relay");

    let config = match Config::from_env() {
        Ok(config) => Arc::new(config),
        Err(e) => {
            error!("Invalid configuration: {:#}", e);
            std::process::exit(1);
        }
    };

    if config.api_configured() {
        info!("Upstream credential configured (environment: {})", config.environment);
    } else {
        warn!("OPENAI_API_KEY is not set; chat is disabled and /api/health reports degraded");
    }

    let upstream: Arc<dyn UpstreamClient> = match HttpUpstream::new(&config) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            error!("Failed to build upstream HTTP client: {}", e);
            std::process::exit(1);
        }
    };

    // Initialize template engine
    let mut tera = match Tera::new(&format!("{}/**/*", config.template_dir)) {
        Ok(t) => t,
        Err(e) => {
            error!("Template parsing error: {}", e);
            std::process::exit(1);
        }
    };
    tera.autoescape_on(vec![".html"]);
    let tera = Data::new(tera);

    let state = Data::new(AppState {
        config: config.clone(),
        upstream,
    });

    let static_dir = config.static_dir.clone();
    let server = HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .app_data(tera.clone())
            .configure(routes::configure)
            .service(fs::Files::new("/static", &static_dir))
    })
    .shutdown_timeout(config.shutdown_grace.as_secs())
    .bind((config.host.as_str(), config.port))?
    .run();

    info!("Listening on http://{}:{}", config.host, config.port);
    shutdown::stop_on_panic(server.handle());

    server.await
}
