use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Settings for the sync service process itself.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct General {
    /// The IP address the view syncer binds to listen for client connections.
    ///
    /// _Default:_ `0.0.0.0`
    #[serde(default = "General::host")]
    pub host: String,

    /// The TCP port the view syncer listens on.
    ///
    /// _Default:_ `4848`
    #[serde(default = "General::port")]
    pub port: u16,

    /// Number of Tokio worker threads to spawn at startup. The value `0`
    /// means to use the current-thread runtime.
    ///
    /// _Default:_ `2`
    #[serde(default = "General::workers")]
    pub workers: usize,

    /// How long to wait for in-flight client work during shutdown, in
    /// milliseconds.
    ///
    /// _Default:_ `15000`
    #[serde(default = "General::shutdown_timeout")]
    pub shutdown_timeout: u64,
}

impl General {
    fn host() -> String {
        "0.0.0.0".into()
    }

    fn port() -> u16 {
        4848
    }

    fn workers() -> usize {
        2
    }

    fn shutdown_timeout() -> u64 {
        15_000
    }

    pub fn shutdown_timeout_duration(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout)
    }
}

impl Default for General {
    fn default() -> Self {
        Self {
            host: Self::host(),
            port: Self::port(),
            workers: Self::workers(),
            shutdown_timeout: Self::shutdown_timeout(),
        }
    }
}
