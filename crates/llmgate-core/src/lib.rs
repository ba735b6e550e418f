//! The Orchestrator (spec.md §4.4): wraps one Router call with a single
//! global deadline `T_max`, owning the outer cancellation scope.
//!
//! Cancellation — both `T_max` expiry and caller disconnect — is carried by
//! the `mpsc` channel itself rather than a separate token: dropping the
//! receiver makes every downstream `send` fail, and each forwarding loop
//! (adapter → Router::commit → Orchestrator) returns on a failed send, which
//! cascades down to the adapter's HTTP body being dropped.

use std::time::Duration;

use llmgate_domain::{ChatRequest, ChatResponse, ErrorCode, ProviderError};
use llmgate_provider::ChunkStream;
use llmgate_router::Router;
use tokio::sync::mpsc;
use tokio::time::Instant;

pub struct Orchestrator {
    router: Router,
    global_timeout: Duration,
}

impl Orchestrator {
    pub fn new(router: Router, global_timeout: Duration) -> Self {
        Self { router, global_timeout }
    }

    /// Races `generate` against `T_max`. `ProviderError` passes through
    /// unchanged; a `T_max` expiry surfaces as `GLOBAL_TIMEOUT`.
    pub async fn generate(&self, request: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        match tokio::time::timeout(self.global_timeout, self.router.choose_and_generate(request)).await {
            Ok(result) => result,
            Err(_elapsed) => Err(global_timeout_error()),
        }
    }

    /// Starts the wall clock at entry, obtains the Router's committed (or
    /// failed-over) stream, then forwards chunks while racing each one
    /// against the remaining `T_max` budget (spec.md §4.4, P6).
    pub async fn stream(&self, request: &ChatRequest) -> Result<ChunkStream, ProviderError> {
        let deadline = Instant::now() + self.global_timeout;

        let inner = match tokio::time::timeout_at(deadline, self.router.choose_and_stream(request)).await {
            Ok(Ok(inner)) => inner,
            Ok(Err(err)) => return Err(err),
            Err(_elapsed) => return Err(global_timeout_error()),
        };

        Ok(bound_by_deadline(inner, deadline))
    }
}

fn global_timeout_error() -> ProviderError {
    ProviderError::new("orchestrator", ErrorCode::GlobalTimeout, "request exceeded the global timeout", false)
}

/// Spawns the forwarding task that checks `T_max` before relaying every
/// chunk. Dropping `inner` on expiry (by returning, ending the select loop)
/// closes the adapter's send side, which is how the upstream socket release
/// in spec.md §4.4 is actually achieved in this runtime.
fn bound_by_deadline(mut inner: ChunkStream, deadline: Instant) -> ChunkStream {
    let (tx, rx) = mpsc::channel(32);

    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                _ = tokio::time::sleep_until(deadline) => {
                    let _ = tx.send(Err(global_timeout_error())).await;
                    return;
                }
                chunk = inner.recv() => {
                    match chunk {
                        Some(item) => {
                            if tx.send(item).await.is_err() {
                                return;
                            }
                        }
                        None => return,
                    }
                }
            }
        }
    });

    rx
}
