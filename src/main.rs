use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpServer};
use anyhow::Context;
use log::{info, warn};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use bitscoin::api;
use bitscoin::blockchain::{self, Node};
use bitscoin::config::NodeConfig;

#[derive(OpenApi)]
#[openapi(
    paths(
        api::handlers::get_status,
        api::handlers::get_chain,
        api::handlers::validate_chain,
        api::handlers::list_addresses,
        api::handlers::create_address,
        api::handlers::sign_message,
        api::handlers::get_balance,
        api::handlers::send,
        api::handlers::mine_block,
        api::handlers::start_mining,
        api::handlers::stop_mining
    ),
    components(
        schemas(
            blockchain::Block,
            blockchain::LedgerEvent,
            blockchain::NodeStatus,
            blockchain::AddressInfo,
            blockchain::crypto::Address,
            blockchain::crypto::DigitalSignature,
            api::handlers::ChainResponse,
            api::handlers::ValidationResponse,
            api::handlers::AddressBalance,
            api::handlers::CreateAddressRequest,
            api::handlers::CreateAddressResponse,
            api::handlers::SignRequest,
            api::handlers::SignResponse,
            api::handlers::BalanceResponse,
            api::handlers::SendRequest,
            api::handlers::SendResponse,
            api::handlers::MineRequest,
            api::handlers::MineResponse,
            api::handlers::StartMiningRequest,
            api::handlers::MiningResponse
        )
    ),
    tags(
        (name = "bitscoin", description = "BitsCoin node API endpoints")
    ),
    info(
        title = "BitsCoin API",
        version = "1.0.0",
        description = "A single-node proof-of-work ledger",
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    )
)]
struct ApiDoc;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env file is fine
    dotenvy::dotenv().ok();

    // Initialize logger
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let config = NodeConfig::from_env().context("invalid configuration")?;
    info!("Starting node with {:?}", config);

    let node = web::Data::new(Node::open(&config).context("failed to open node")?);
    let status = node.status().context("failed to read node status")?;
    info!(
        "Chain height {} at difficulty {}, tip {}",
        status.blocks.saturating_sub(1),
        status.difficulty,
        status.tip_hash
    );

    if let Some(address) = config.miner_address.clone() {
        let handle = node.clone().into_inner();
        if let Err(err) = handle.start_mining(address) {
            warn!("Background miner not started: {}", err);
        }
    }

    info!("Starting HTTP server at http://{}:{}", config.host, config.port);

    let server_node = node.clone();
    let result = HttpServer::new(move || {
        // Configure CORS
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        // Configure OpenAPI documentation
        let openapi = ApiDoc::openapi();

        App::new()
            .wrap(middleware::Logger::default())
            .wrap(cors)
            .app_data(server_node.clone())
            // API routes
            .configure(api::configure_routes)
            // Swagger UI
            .service(
                SwaggerUi::new("/swagger-ui/{_:.*}")
                    .url("/api-docs/openapi.json", openapi.clone())
            )
    })
    .bind((config.host.as_str(), config.port))
    .with_context(|| format!("failed to bind {}:{}", config.host, config.port))?
    .run()
    .await;

    node.shutdown();
    result.context("HTTP server failed")
}
