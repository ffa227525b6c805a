//! The dispatch fabric: rate gating, the session registry, the capture
//! bridge, and the tier-cascade batch executor.

pub mod bootstrap;
pub mod capture;
pub mod dispatch;
pub mod rate_gate;
pub mod registry;

use std::sync::Arc;

use botpool_gateway::ShardManager;
use botpool_store::Store;

/// Sentinel under which the capture tier shares the identity rate-limit
/// namespace. Deliberately not hex, so it can never collide with a real
/// identity-hash.
pub const CAPTURE_IDENTITY: &str = "capture-worker";

/// Default per-batch worker pool size.
pub const DEFAULT_MAX_WORKERS: usize = 8;

#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub registry: Arc<registry::SessionRegistry>,
    pub rate_gate: rate_gate::RateGate,
    pub capture: capture::CaptureBridge,
    pub primary: Arc<ShardManager>,
    pub max_workers: usize,
}
