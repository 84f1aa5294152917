//! Starts a store server and runs a concurrent save/get workload against it.

use std::thread;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::Parser;
use tabula_core::{content, Filters};
use tabula_server::{
    init_tracing, EntityDef, EntityRegistry, LogFormat, OperationError, ServerConfig,
    TabulaServer,
};
use tracing::{info, warn};

/// Tabula smoke workload
#[derive(Parser, Debug)]
#[command(name = "tabula-smoke", version, about, long_about = None)]
struct Args {
    /// Number of pool workers
    #[arg(long, env = "TABULA_WORKERS", default_value_t = 4)]
    workers: usize,

    /// Threads of the pool runtime
    #[arg(long, env = "TABULA_RUNTIME_THREADS", default_value_t = 2)]
    runtime_threads: usize,

    /// Capacity of the inbound request channel
    #[arg(long, env = "TABULA_INBOUND_CAPACITY", default_value_t = 100)]
    inbound_capacity: usize,

    /// Capacity of the dispatcher-to-worker queue
    #[arg(long, env = "TABULA_TASK_QUEUE_CAPACITY", default_value_t = 100)]
    task_queue_capacity: usize,

    /// Request timeout in milliseconds; 0 waits forever
    #[arg(long, env = "TABULA_TIMEOUT_MS", default_value_t = 30_000)]
    timeout_ms: u64,

    /// Number of client threads
    #[arg(long, default_value_t = 8)]
    clients: usize,

    /// Records each client saves
    #[arg(long, default_value_t = 50)]
    records: usize,

    /// Log output format
    #[arg(long, env = "TABULA_LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
    log_format: LogFormat,
}

impl Args {
    fn server_config(&self) -> ServerConfig {
        ServerConfig {
            workers: self.workers,
            runtime_threads: self.runtime_threads,
            inbound_capacity: self.inbound_capacity,
            task_queue_capacity: self.task_queue_capacity,
            request_timeout: (self.timeout_ms > 0).then(|| Duration::from_millis(self.timeout_ms)),
            ..ServerConfig::default()
        }
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_format)?;

    let server = TabulaServer::start(args.server_config())?;
    let registry = EntityRegistry::new();
    registry.register(
        EntityDef::new("car")
            .table("cars")
            .index("reg_no", true)
            .index("client", false)
            .validator(|content| {
                if content.contains_key("reg_no") {
                    Ok(())
                } else {
                    Err("reg_no is required".to_string())
                }
            }),
    );

    let started = Instant::now();
    let handles: Vec<_> = (0..args.clients)
        .map(|client| {
            let cars = registry
                .repository("car", server.client())
                .context("car entity is not registered");
            let records = args.records;
            thread::spawn(move || -> anyhow::Result<(usize, usize)> {
                let cars = cars?;
                let (mut saved, mut duplicates) = (0, 0);
                for i in 0..records {
                    // Half of the plates are shared between all clients.
                    let reg_no = if i % 2 == 0 {
                        format!("SHARED-{i}")
                    } else {
                        format!("C{client}-{i}")
                    };
                    match cars.save(content! { "reg_no" => reg_no, "client" => client.to_string() }) {
                        Ok(_) => saved += 1,
                        Err(OperationError::DuplicateEntity { .. }) => duplicates += 1,
                        Err(e) => return Err(e).context("save failed"),
                    }
                }
                Ok((saved, duplicates))
            })
        })
        .collect();

    let (mut saved, mut duplicates) = (0, 0);
    for handle in handles {
        match handle.join() {
            Ok(result) => {
                let (s, d) = result?;
                saved += s;
                duplicates += d;
            }
            Err(_) => warn!("client thread panicked"),
        }
    }

    let cars = registry
        .repository("car", server.client())
        .context("car entity is not registered")?;
    let stored = cars.get(Filters::new())?.len();
    info!(
        saved,
        duplicates,
        stored,
        elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        "smoke workload finished"
    );
    anyhow::ensure!(saved == stored, "saved {saved} records but store holds {stored}");

    if !server.shutdown() {
        warn!("pool did not drain within the drain timeout");
    }
    Ok(())
}
