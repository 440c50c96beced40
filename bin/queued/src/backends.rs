//! Lookup of compiled-in backend implementations, mirroring the teacher's `Backends` registry
//! but reduced to what this process actually ships: one persistence backend (SQLite) and zero
//! peer-admin RPC transports (the wire protocol is a detail this core does not provide).
use std::sync::Arc;

use queuecore_replication::PeerAdminClient;

/// Resolve the configured peer-admin RPC backend.
///
/// Always returns `None`: no transport (gRPC/HTTP/...) is compiled into this binary. Callers
/// log and fall back to running without replication/DLQ support rather than failing startup,
/// since a shard with no configured peers is a legitimate deployment.
pub fn peer_admin_client(backend: &str) -> Option<Arc<dyn PeerAdminClient>> {
    let _ = backend;
    None
}
