use actix_web::web;
use crate::web::handlers;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api")
            .route("/health", web::get().to(handlers::health))
            .route("/chat", web::post().to(handlers::chat))
            .route("/models", web::get().to(handlers::models))
    )
    .route("/", web::get().to(handlers::index));
}
