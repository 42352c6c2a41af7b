//! # pay-api
//!
//! HTTP API layer for litecart-pay-rs.
//!
//! ## Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | GET | `/health` | Health check |
//! | GET | `/cart/payment` | Registered providers |
//! | POST | `/cart/payment` | Price a cart and open a checkout |
//! | POST | `/cart/payment/callback` | Provider notification |
//! | GET | `/cart/payment/success` | Success return leg |
//! | GET | `/cart/payment/cancel` | Cancel return leg |
//! | GET | `/api/products` | List products |
//! | GET | `/api/products/{id}` | Get product |
//! | GET | `/api/_/carts` | Admin: list carts |
//! | POST | `/api/_/carts/{id}/mail` | Admin: re-send receipt |

pub mod handlers;
pub mod routes;
pub mod state;
pub mod views;

pub use routes::create_router;
pub use state::{AppConfig, AppState};
