//! HTTP API handlers for photomesh-gen

pub mod demo;
pub mod download;
pub mod generate;
pub mod health;
pub mod sse;

pub use demo::demo_routes;
pub use download::download_routes;
pub use generate::generate_routes;
pub use health::health_routes;
pub use sse::event_stream;
