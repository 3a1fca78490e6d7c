//! HTTP integration: configuration, request-locals middleware, handlers,
//! and the server lifecycle.

pub mod config;
pub mod handlers;
pub mod middleware;
pub mod module;
pub mod request_locals;

pub use config::*;
pub use handlers::AppState;
pub use middleware::build_http_layers;
pub use module::{build_router, NetworkModule};
pub use request_locals::{
    ExtractStoreId, GenerateStoreId, HeaderStoreId, RequestLocalsLayer, RequestLocalsService,
    StoreIdPolicy,
};
