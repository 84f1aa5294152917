use std::time::Duration;

/// Configuration of a store server and its worker pool.
///
/// Controls pool sizing, queue bounds and the bridge's blocking limits.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Store name; also used to name runtime threads.
    pub name: String,
    /// Number of workers requested in the sizing handshake. Clamped to 1.
    pub workers: usize,
    /// Threads of the runtime the pool runs on.
    pub runtime_threads: usize,
    /// Capacity of the inbound channel. Submitters wait when it is full.
    pub inbound_capacity: usize,
    /// Capacity of the internal queue between dispatcher and workers.
    pub task_queue_capacity: usize,
    /// How long a blocking call waits for its result. `None` waits forever.
    pub request_timeout: Option<Duration>,
    /// How long shutdown waits for in-flight requests.
    pub drain_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: "tabula".to_string(),
            workers: 4,
            runtime_threads: 2,
            inbound_capacity: 100,
            task_queue_capacity: 100,
            request_timeout: Some(Duration::from_secs(30)),
            drain_timeout: Duration::from_secs(5),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_config_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.name, "tabula");
        assert_eq!(config.workers, 4);
        assert_eq!(config.inbound_capacity, 100);
        assert_eq!(config.task_queue_capacity, 100);
        assert_eq!(config.request_timeout, Some(Duration::from_secs(30)));
        assert_eq!(config.drain_timeout, Duration::from_secs(5));
    }
}
