//! Configuration for the SQLite queue backend.
use serde::Deserialize;
use serde::Serialize;

/// SQLite specific configuration for the queue backend.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Conf {
    /// Path to the SQLite DB file.
    pub path: String,

    /// Delay between DB queries when a read-range poll finds nothing new.
    #[serde(default = "Conf::default_poll_delay_ms")]
    pub poll_delay_ms: u64,
}

impl Conf {
    fn default_poll_delay_ms() -> u64 {
        1_000
    }

    /// Initialise queue configuration with a SQLite path and defaults.
    pub fn new<S>(path: S) -> Conf
    where
        S: Into<String>,
    {
        Conf {
            path: path.into(),
            poll_delay_ms: Conf::default_poll_delay_ms(),
        }
    }
}

/// The SQLite queue backend configuration is not valid.
#[derive(Debug, thiserror::Error)]
#[error("the SQLite queue backend configuration is not valid")]
pub struct ConfError;
