//! Tabula server: bounded request queue, worker pool and blocking bridge
//! over a [`tabula_core::Store`].

pub mod bridge;
pub mod client;
pub mod config;
pub mod entity;
pub mod executor;
pub mod lifecycle;
pub mod operation;
pub mod pool;
pub mod server;
pub mod telemetry;

pub use bridge::BlockingClient;
pub use client::Client;
pub use config::ServerConfig;
pub use entity::{EntityDef, EntityRegistry, Repository};
pub use lifecycle::{PoolState, WorkerState};
pub use operation::{Envelope, Inbound, Operation, OperationError, Outcome, Payload};
pub use pool::{PoolHandle, WorkerPool};
pub use server::TabulaServer;
pub use telemetry::{init_tracing, LogFormat};
