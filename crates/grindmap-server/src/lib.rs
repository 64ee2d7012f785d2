//! HTTP boundary and service wiring: routes, DTOs, configuration, stats
//! cache, housekeeping jobs, and OpenAPI documentation.

pub mod app;
pub mod cache;
pub mod config;
pub mod dto;
pub mod error;
pub mod jobs;
pub mod openapi;
pub mod routes;
pub mod shutdown;
pub mod state;

pub use app::GrindMap;
pub use config::ServerConfig;
pub use shutdown::ShutdownSignal;
