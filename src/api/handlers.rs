use actix_web::{web, HttpResponse};
use log::error;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::blockchain::{Address, Amount, Block, DigitalSignature, Node, NodeError, NodeStatus};

/// Shared node handle
pub type NodeData = web::Data<Node>;

/// Response for the chain endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct ChainResponse {
    /// The length of the chain
    pub length: usize,

    /// The blocks in the chain
    pub chain: Vec<Block>,

    /// Whether the chain is valid
    pub is_valid: bool,
}

/// Response for the validate endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct ValidationResponse {
    pub valid: bool,

    /// First violation found, if any
    pub error: Option<String>,
}

/// A wallet address with its current balance
#[derive(Serialize, Deserialize, ToSchema)]
pub struct AddressBalance {
    pub address: Address,
    pub label: String,
    #[schema(example = "2025-01-01T12:00:00Z")]
    pub created_at: String,
    #[schema(value_type = String, example = "50.00000000")]
    pub balance: Amount,
}

/// Request for the create address endpoint
#[derive(Serialize, Deserialize, ToSchema, Default)]
pub struct CreateAddressRequest {
    /// Label stored with the address; defaults to "Address <n>"
    #[serde(default)]
    pub label: Option<String>,
}

/// Response for the create address endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct CreateAddressResponse {
    pub address: Address,
}

/// Request for the sign endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct SignRequest {
    /// A wallet address
    pub address: String,

    /// The message to sign (UTF-8)
    pub message: String,
}

/// Response for the sign endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct SignResponse {
    pub address: Address,
    pub signature: DigitalSignature,
}

/// Response for the balance endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct BalanceResponse {
    pub address: Address,
    #[schema(value_type = String, example = "50.00000000")]
    pub balance: Amount,
}

/// Request for the send endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct SendRequest {
    /// The sender's address; must belong to this node's wallet
    pub from: String,

    /// The recipient's address
    pub to: String,

    /// The amount to transfer, e.g. "40" or "0.5"
    #[schema(example = "40.00000000")]
    pub amount: String,

    /// Signature over "{from}->{to}:{amount}"; the node signs with the wallet key
    /// when omitted
    #[serde(default)]
    pub signature: Option<String>,
}

/// Response for the send endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct SendResponse {
    /// The message
    pub message: String,

    /// The block recording the transfer
    pub block: Block,
}

/// Request for the mine endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct MineRequest {
    /// The miner's address
    pub miner_address: String,
}

/// Response for the mine endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct MineResponse {
    /// The message
    pub message: String,

    /// The newly mined block
    pub block: Block,
}

/// Request for the start mining endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct StartMiningRequest {
    /// Wallet address receiving the rewards
    pub address: String,
}

/// Response for the mining control endpoints
#[derive(Serialize, Deserialize, ToSchema)]
pub struct MiningResponse {
    pub mining: bool,
    pub address: Option<Address>,

    /// Blocks mined by the stopped miner
    pub blocks_mined: Option<u64>,
}

fn bad_request(message: String) -> HttpResponse {
    HttpResponse::BadRequest().json(serde_json::json!({ "error": message }))
}

fn parse_address(value: &str) -> Result<Address, HttpResponse> {
    value
        .parse::<Address>()
        .map_err(|err| bad_request(format!("Invalid address {}: {}", value, err)))
}

/// Maps a node error onto an HTTP response
fn error_response(err: &NodeError) -> HttpResponse {
    let body = serde_json::json!({ "error": err.to_string() });

    match err {
        NodeError::UnknownAddress(_) => HttpResponse::NotFound().json(body),
        NodeError::InsufficientFunds { required, available } => {
            HttpResponse::BadRequest().json(serde_json::json!({
                "error": err.to_string(),
                "required": required,
                "available": available
            }))
        }
        NodeError::InvalidAddress(_) | NodeError::InvalidSignature | NodeError::InvalidAmount => {
            HttpResponse::BadRequest().json(body)
        }
        NodeError::MiningActive | NodeError::MiningInactive | NodeError::SupplyExhausted { .. } => {
            HttpResponse::Conflict().json(body)
        }
        NodeError::ShuttingDown => HttpResponse::ServiceUnavailable().json(body),
        NodeError::Integrity(_)
        | NodeError::Ledger(_)
        | NodeError::Wallet(_)
        | NodeError::Storage(_)
        | NodeError::MinerSpawn(_) => {
            error!("Request failed: {}", err);
            HttpResponse::InternalServerError().json(body)
        }
    }
}

/// Runs a node operation on the blocking thread pool
async fn run_blocking<T, F>(operation: F) -> Result<T, HttpResponse>
where
    F: FnOnce() -> Result<T, NodeError> + Send + 'static,
    T: Send + 'static,
{
    match web::block(operation).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(error_response(&err)),
        Err(err) => {
            error!("Blocking task failed: {}", err);
            Err(HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "Internal server error"
            })))
        }
    }
}

/// Get node status
///
/// Returns chain height, difficulty, reward, wallet size and miner state
#[utoipa::path(
    get,
    path = "/api/v1/status",
    responses(
        (status = 200, description = "Node status retrieved successfully", body = NodeStatus)
    )
)]
pub async fn get_status(node: NodeData) -> HttpResponse {
    let node = node.into_inner();

    match run_blocking(move || node.status()).await {
        Ok(status) => HttpResponse::Ok().json(status),
        Err(response) => response,
    }
}

/// Get the full blockchain
///
/// Returns the entire blockchain and its validity status
#[utoipa::path(
    get,
    path = "/api/v1/chain",
    responses(
        (status = 200, description = "Blockchain retrieved successfully", body = ChainResponse)
    )
)]
pub async fn get_chain(node: NodeData) -> HttpResponse {
    let node = node.into_inner();
    let result = run_blocking(move || {
        let chain = node.chain();
        let is_valid = node.validate().is_ok();
        Ok(ChainResponse {
            length: chain.len(),
            chain,
            is_valid,
        })
    })
    .await;

    match result {
        Ok(response) => HttpResponse::Ok().json(response),
        Err(response) => response,
    }
}

/// Check if the blockchain is valid
///
/// Re-verifies every link, hash and proof of work
#[utoipa::path(
    get,
    path = "/api/v1/validate",
    responses(
        (status = 200, description = "Blockchain validation status", body = ValidationResponse)
    )
)]
pub async fn validate_chain(node: NodeData) -> HttpResponse {
    let node = node.into_inner();
    let result = run_blocking(move || {
        let response = match node.validate() {
            Ok(()) => ValidationResponse {
                valid: true,
                error: None,
            },
            Err(err) => ValidationResponse {
                valid: false,
                error: Some(err.to_string()),
            },
        };
        Ok(response)
    })
    .await;

    match result {
        Ok(response) => HttpResponse::Ok().json(response),
        Err(response) => response,
    }
}

/// List wallet addresses
///
/// Returns every address in the node's wallet with its balance
#[utoipa::path(
    get,
    path = "/api/v1/wallet/addresses",
    responses(
        (status = 200, description = "Addresses retrieved successfully", body = Vec<AddressBalance>)
    )
)]
pub async fn list_addresses(node: NodeData) -> HttpResponse {
    let node = node.into_inner();
    let result = run_blocking(move || {
        let addresses: Vec<AddressBalance> = node
            .wallet_balances()?
            .into_iter()
            .map(|(info, balance)| AddressBalance {
                address: info.address,
                label: info.label,
                created_at: info.created_at.to_rfc3339(),
                balance,
            })
            .collect();
        Ok(addresses)
    })
    .await;

    match result {
        Ok(addresses) => HttpResponse::Ok().json(addresses),
        Err(response) => response,
    }
}

/// Create a new address
///
/// Generates a keypair, stores it in the wallet file and returns its address
#[utoipa::path(
    post,
    path = "/api/v1/wallet/create",
    request_body = CreateAddressRequest,
    responses(
        (status = 201, description = "Address created successfully", body = CreateAddressResponse),
        (status = 500, description = "Wallet could not be saved")
    )
)]
pub async fn create_address(
    node: NodeData,
    request: Option<web::Json<CreateAddressRequest>>,
) -> HttpResponse {
    let label = request
        .map(web::Json::into_inner)
        .unwrap_or_default()
        .label
        .unwrap_or_default();
    let node = node.into_inner();

    let result = run_blocking(move || node.create_address(&label)).await;

    match result {
        Ok(address) => HttpResponse::Created().json(CreateAddressResponse { address }),
        Err(response) => response,
    }
}

/// Sign a message
///
/// Signs a UTF-8 message with the key of a wallet address
#[utoipa::path(
    post,
    path = "/api/v1/wallet/sign",
    request_body = SignRequest,
    responses(
        (status = 200, description = "Message signed", body = SignResponse),
        (status = 400, description = "Invalid address"),
        (status = 404, description = "Address not in wallet")
    )
)]
pub async fn sign_message(node: NodeData, request: web::Json<SignRequest>) -> HttpResponse {
    let address = match parse_address(&request.address) {
        Ok(address) => address,
        Err(response) => return response,
    };

    let message = request.into_inner().message;

    let node = node.into_inner();
    let result = run_blocking(move || {
        let signature = node.sign(&address, message.as_bytes())?;
        Ok(SignResponse { address, signature })
    })
    .await;

    match result {
        Ok(response) => HttpResponse::Ok().json(response),
        Err(response) => response,
    }
}

/// Get address balance
///
/// Returns the balance of any address, replayed from the chain
#[utoipa::path(
    get,
    path = "/api/v1/balance/{address}",
    params(
        ("address" = String, Path, description = "Address to query")
    ),
    responses(
        (status = 200, description = "Balance retrieved successfully", body = BalanceResponse),
        (status = 400, description = "Invalid address")
    )
)]
pub async fn get_balance(node: NodeData, address: web::Path<String>) -> HttpResponse {
    let address = match parse_address(&address) {
        Ok(address) => address,
        Err(response) => return response,
    };

    let node = node.into_inner();
    let result = run_blocking(move || {
        let balance = node.balance(&address)?;
        Ok(BalanceResponse { address, balance })
    })
    .await;

    match result {
        Ok(response) => HttpResponse::Ok().json(response),
        Err(response) => response,
    }
}

/// Send coins
///
/// Records a signed transfer from a wallet address in a newly sealed block
#[utoipa::path(
    post,
    path = "/api/v1/send",
    request_body = SendRequest,
    responses(
        (status = 201, description = "Transfer recorded", body = SendResponse),
        (status = 400, description = "Invalid transfer or insufficient funds"),
        (status = 404, description = "Sender not in wallet"),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn send(node: NodeData, request: web::Json<SendRequest>) -> HttpResponse {
    let request = request.into_inner();

    let from = match parse_address(&request.from) {
        Ok(address) => address,
        Err(response) => return response,
    };
    let to = match parse_address(&request.to) {
        Ok(address) => address,
        Err(response) => return response,
    };
    let amount = match request.amount.parse::<Amount>() {
        Ok(amount) => amount,
        Err(err) => return bad_request(format!("Invalid amount {}: {}", request.amount, err)),
    };
    let signature = request.signature.map(DigitalSignature);

    let node = node.into_inner();
    let result = run_blocking(move || {
        let signature = match signature {
            Some(signature) => signature,
            None => node.sign_transfer(&from, &to, amount)?,
        };
        node.submit_transfer(&from, &to, amount, &signature)
    })
    .await;

    match result {
        Ok(block) => HttpResponse::Created().json(SendResponse {
            message: format!("Transfer recorded in block {}", block.index),
            block,
        }),
        Err(response) => response,
    }
}

/// Mine a new block
///
/// Mines one block paying the reward to the given address
#[utoipa::path(
    post,
    path = "/api/v1/mine",
    request_body = MineRequest,
    responses(
        (status = 200, description = "Block mined successfully", body = MineResponse),
        (status = 400, description = "Invalid mining request"),
        (status = 409, description = "Reward would exceed the largest total supply"),
        (status = 503, description = "Node is shutting down")
    )
)]
pub async fn mine_block(node: NodeData, request: web::Json<MineRequest>) -> HttpResponse {
    let miner = match parse_address(&request.miner_address) {
        Ok(address) => address,
        Err(response) => return response,
    };

    let node = node.into_inner();
    let result = run_blocking(move || {
        let cancel = node.shutdown_token();
        node.mine_one(&miner, &cancel)?
            .into_block()
            .ok_or(NodeError::ShuttingDown)
    })
    .await;

    match result {
        Ok(block) => HttpResponse::Ok().json(MineResponse {
            message: "New Block Mined".to_string(),
            block,
        }),
        Err(response) => response,
    }
}

/// Start the background miner
#[utoipa::path(
    post,
    path = "/api/v1/mining/start",
    request_body = StartMiningRequest,
    responses(
        (status = 200, description = "Miner started", body = MiningResponse),
        (status = 404, description = "Address not in wallet"),
        (status = 409, description = "Miner already running")
    )
)]
pub async fn start_mining(node: NodeData, request: web::Json<StartMiningRequest>) -> HttpResponse {
    let address = match parse_address(&request.address) {
        Ok(address) => address,
        Err(response) => return response,
    };

    let node = node.into_inner();
    let miner = address.clone();

    match run_blocking(move || node.start_mining(miner)).await {
        Ok(()) => HttpResponse::Ok().json(MiningResponse {
            mining: true,
            address: Some(address),
            blocks_mined: None,
        }),
        Err(response) => response,
    }
}

/// Stop the background miner
#[utoipa::path(
    post,
    path = "/api/v1/mining/stop",
    responses(
        (status = 200, description = "Miner stopped", body = MiningResponse),
        (status = 409, description = "Miner not running")
    )
)]
pub async fn stop_mining(node: NodeData) -> HttpResponse {
    let node = node.into_inner();

    match run_blocking(move || node.stop_mining()).await {
        Ok(blocks_mined) => HttpResponse::Ok().json(MiningResponse {
            mining: false,
            address: None,
            blocks_mined: Some(blocks_mined),
        }),
        Err(response) => response,
    }
}
