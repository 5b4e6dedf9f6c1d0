// API module
//
// HTTP surface of the node: wallet, balance, transfer and mining endpoints

pub mod handlers;
pub mod routes;

// Re-export main components for easier access
pub use routes::configure_routes;
