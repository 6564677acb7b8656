//! REST API module
//!
//! Thin HTTP shell over [`SharedLedger`](crate::core::SharedLedger).
//!
//! # Endpoints
//!
//! ## Products
//! - `POST /api/products` - Register a product (queued as pending)
//! - `GET /api/products` - List registered products
//! - `GET /api/verify/{product_id}` - Authenticity lookup
//!
//! ## Chain
//! - `GET /api/chain` - All blocks plus stats
//! - `GET /api/chain/blocks/{index}` - Get block by index
//! - `GET /api/chain/validate` - Validate chain
//! - `GET /api/stats` - Ledger statistics
//!
//! ## Mining
//! - `POST /api/mine` - Mine pending records
//! - `GET /api/pending` - List pending records
//!
//! ## Manufacturers
//! - `GET /api/manufacturers` - Names and public keys
//!
//! ## WebSocket
//! - `GET /ws` - Real-time updates (RecordRegistered, BlockMined)

pub mod handlers;
pub mod routes;
pub mod websocket;

pub use handlers::ApiState;
pub use routes::create_router;
pub use websocket::{WsBroadcaster, WsEvent};
