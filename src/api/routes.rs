use actix_web::web;

use super::handlers;

/// Configures the API routes
///
/// # Arguments
///
/// * `cfg` - The service configuration
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .route("/status", web::get().to(handlers::get_status))
            .route("/chain", web::get().to(handlers::get_chain))
            .route("/validate", web::get().to(handlers::validate_chain))
            .route("/wallet/addresses", web::get().to(handlers::list_addresses))
            .route("/wallet/create", web::post().to(handlers::create_address))
            .route("/wallet/sign", web::post().to(handlers::sign_message))
            .route("/balance/{address}", web::get().to(handlers::get_balance))
            .route("/send", web::post().to(handlers::send))
            .route("/mine", web::post().to(handlers::mine_block))
            .route("/mining/start", web::post().to(handlers::start_mining))
            .route("/mining/stop", web::post().to(handlers::stop_mining))
    );
}
