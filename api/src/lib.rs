mod error;
mod handlers;
mod orchestrator;
mod server;

#[cfg(test)]
mod testing;

pub use error::{ApiError, ApiResult};
pub use orchestrator::{Orchestrator, OrchestratorConfig};
pub use server::{front_router, store_router, Server, TlsFiles, SHUTDOWN_GRACE};
