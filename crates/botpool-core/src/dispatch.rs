use std::sync::Arc;

use botpool_gateway::VoiceBackend;
use botpool_models::{identity, DispatchCounts, UserModify};
use botpool_store::{keys, Store};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;

use crate::capture::CaptureBridge;
use crate::rate_gate::RateGate;
use crate::registry::SessionRegistry;
use crate::AppState;

/// Which tier ended up applying a user's change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Worker,
    Capture,
    Official,
}

/// Result of one user's cascade: at most one tier, plus any chat-service
/// rate limits surfaced along the way.
#[derive(Debug, Clone, Copy)]
pub struct DispatchOutcome {
    pub tier: Option<Tier>,
    pub rate_limit_hits: u64,
}

/// Everything fixed for the lifetime of one batch. The secondary token
/// snapshot is taken once so every worker iterates the same sequence.
pub struct BatchContext {
    pub guild_id: u64,
    pub connect_code: String,
    pub secondary_tokens: Vec<String>,
    pub limit: usize,
    pub primary: Arc<dyn VoiceBackend>,
}

/// The per-user tier cascade: secondary sessions, then the capture
/// worker, then the primary bot.
#[derive(Clone)]
pub struct Dispatcher {
    store: Store,
    rate_gate: RateGate,
    registry: Arc<SessionRegistry>,
    capture: CaptureBridge,
}

impl Dispatcher {
    pub fn new(
        store: Store,
        rate_gate: RateGate,
        registry: Arc<SessionRegistry>,
        capture: CaptureBridge,
    ) -> Self {
        Self {
            store,
            rate_gate,
            registry,
            capture,
        }
    }

    pub fn from_state(state: &AppState) -> Self {
        Self::new(
            state.store.clone(),
            state.rate_gate.clone(),
            state.registry.clone(),
            state.capture.clone(),
        )
    }

    pub async fn dispatch(&self, ctx: &BatchContext, request: UserModify) -> DispatchOutcome {
        let mut rate_limit_hits = 0;

        if let Some(tier) = self
            .try_secondary(ctx, request, &mut rate_limit_hits)
            .await
        {
            return DispatchOutcome {
                tier: Some(tier),
                rate_limit_hits,
            };
        }

        if self
            .capture
            .apply(ctx.guild_id, &ctx.connect_code, request)
            .await
        {
            return DispatchOutcome {
                tier: Some(Tier::Capture),
                rate_limit_hits,
            };
        }

        tracing::debug!(
            guild_id = ctx.guild_id,
            user_id = request.user_id,
            mute = request.mute,
            deaf = request.deaf,
            "applying change with the primary bot"
        );
        match ctx
            .primary
            .apply_voice_state(ctx.guild_id, request.user_id, request.mute, request.deaf)
            .await
        {
            Ok(()) => DispatchOutcome {
                tier: Some(Tier::Official),
                rate_limit_hits,
            },
            Err(e) => {
                tracing::warn!(
                    guild_id = ctx.guild_id,
                    user_id = request.user_id,
                    "primary bot apply failed: {e}"
                );
                DispatchOutcome {
                    tier: None,
                    rate_limit_hits,
                }
            }
        }
    }

    /// Tier A: walk at most `limit` entries of the snapshot. Stale hashes
    /// (no live session) are pruned from the store set; identities the
    /// chat service rate-limits are blacklisted for its advertised
    /// cooldown and skipped.
    async fn try_secondary(
        &self,
        ctx: &BatchContext,
        request: UserModify,
        rate_limit_hits: &mut u64,
    ) -> Option<Tier> {
        for hash in ctx.secondary_tokens.iter().take(ctx.limit) {
            if !self.rate_gate.admit(ctx.guild_id, hash).await {
                tracing::debug!(
                    guild_id = ctx.guild_id,
                    identity = identity::short(hash),
                    "secondary identity near quota, skipping"
                );
                continue;
            }

            let Some(session) = self.registry.get(hash).await else {
                tracing::info!(
                    guild_id = ctx.guild_id,
                    identity = identity::short(hash),
                    "pruning stale guild membership"
                );
                if let Err(e) = self
                    .store
                    .set_remove(&keys::guild_tokens(ctx.guild_id), hash)
                    .await
                {
                    tracing::warn!(guild_id = ctx.guild_id, "membership prune failed: {e}");
                }
                continue;
            };

            match session
                .apply_voice_state(ctx.guild_id, request.user_id, request.mute, request.deaf)
                .await
            {
                Ok(()) => return Some(Tier::Worker),
                Err(e) => {
                    if let Some(retry_after) = e.retry_after() {
                        *rate_limit_hits += 1;
                        self.rate_gate.blacklist(ctx.guild_id, hash, retry_after).await;
                    } else {
                        tracing::warn!(
                            guild_id = ctx.guild_id,
                            identity = identity::short(hash),
                            "secondary apply failed: {e}"
                        );
                    }
                }
            }
        }
        None
    }
}

/// Fan a batch across a bounded worker pool and aggregate per-tier counts.
///
/// Workers live in a [`JoinSet`] owned by this future: if the HTTP request
/// is dropped mid-batch, the set drops with it and in-flight dispatches
/// abort instead of running detached.
pub async fn run_batch(
    dispatcher: &Dispatcher,
    ctx: BatchContext,
    users: Vec<UserModify>,
    max_workers: usize,
) -> DispatchCounts {
    if users.is_empty() {
        return DispatchCounts::default();
    }
    let batch_len = users.len();

    let (tx, rx) = mpsc::channel(batch_len);
    for user in users {
        // Capacity equals the batch length; these sends never block.
        let _ = tx.send(user).await;
    }
    drop(tx);

    let rx = Arc::new(Mutex::new(rx));
    let ctx = Arc::new(ctx);
    let counts = Arc::new(Mutex::new(DispatchCounts::default()));
    let worker_count = max_workers.max(1).min(batch_len);

    let mut workers = JoinSet::new();
    for _ in 0..worker_count {
        let rx = Arc::clone(&rx);
        let ctx = Arc::clone(&ctx);
        let counts = Arc::clone(&counts);
        let dispatcher = dispatcher.clone();
        workers.spawn(async move {
            loop {
                let request = { rx.lock().await.recv().await };
                let Some(request) = request else { break };
                let outcome = dispatcher.dispatch(&ctx, request).await;
                let mut counts = counts.lock().await;
                match outcome.tier {
                    Some(Tier::Worker) => counts.worker += 1,
                    Some(Tier::Capture) => counts.capture += 1,
                    Some(Tier::Official) => counts.official += 1,
                    None => {}
                }
                counts.rate_limit += outcome.rate_limit_hits;
            }
        });
    }
    while workers.join_next().await.is_some() {}

    let counts = counts.lock().await;
    *counts
}
