//! Error kinds specific to the replication pipeline.

/// The caller named a source cluster this process has no peer configuration for.
#[derive(Debug, thiserror::Error)]
#[error("unknown source cluster '{cluster}'")]
pub struct InvalidCluster {
    pub cluster: String,
}

impl InvalidCluster {
    pub fn new<S: Into<String>>(cluster: S) -> Self {
        Self {
            cluster: cluster.into(),
        }
    }
}
