//! Notify Listener (§4.B): subscribes to the `gateway_invalidated` push
//! channel, debounces bursts of events per `debounce_key`, and invokes a
//! refresh callback. Reconnects with the same exponential-backoff schedule
//! [`crate::database`] uses for pool creation, and always queues a
//! synthetic refresh immediately after a successful reconnect so the cache
//! is never left stale after an outage.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use sqlx::postgres::PgListener;
use sqlx::PgPool;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

const CHANNEL: &str = "gateway_invalidated";
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// An opaque invalidation event. The listener never interprets the payload
/// beyond extracting a debounce key; `None` means "use the single global
/// key" (the default).
#[derive(Debug, Clone)]
pub struct InvalidationEvent {
    pub debounce_key: Option<String>,
    pub synthetic: bool,
}

/// Subscribes to `gateway_invalidated` and calls back at most once per
/// `debounce` window per key.
pub struct NotifyListener {
    pool: PgPool,
    debounce: Duration,
    cancel: CancellationToken,
}

impl NotifyListener {
    pub fn new(pool: PgPool, debounce: Duration) -> Self {
        Self {
            pool,
            debounce,
            cancel: CancellationToken::new(),
        }
    }

    /// Start listening in the background. `callback` is invoked (at most
    /// once per debounce window per key) whenever a rebuild should happen.
    pub fn connect<F, Fut>(&self, callback: F) -> tokio::task::JoinHandle<()>
    where
        F: Fn(InvalidationEvent) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let pool = self.pool.clone();
        let debounce = self.debounce;
        let cancel = self.cancel.clone();

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(debounce_loop(rx, debounce, callback));

        tokio::spawn(async move {
            let mut backoff = Duration::from_millis(500);

            loop {
                if cancel.is_cancelled() {
                    return;
                }

                match PgListener::connect_with(&pool).await {
                    Ok(mut listener) => {
                        if let Err(e) = listener.listen(CHANNEL).await {
                            tracing::warn!(error = %e, "failed to LISTEN on gateway_invalidated, retrying");
                        } else {
                            backoff = Duration::from_millis(500);
                            // A reconnect always triggers a rebuild so we never
                            // serve a stale cache after an outage.
                            let _ = tx.send(InvalidationEvent {
                                debounce_key: None,
                                synthetic: true,
                            });

                            loop {
                                tokio::select! {
                                    _ = cancel.cancelled() => return,
                                    notification = listener.recv() => {
                                        match notification {
                                            Ok(_payload) => {
                                                let _ = tx.send(InvalidationEvent {
                                                    debounce_key: None,
                                                    synthetic: false,
                                                });
                                            }
                                            Err(e) => {
                                                tracing::warn!(error = %e, "listener connection lost, reconnecting");
                                                break;
                                            }
                                        }
                                    }
                                }
                            }
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, backoff = ?backoff, "failed to connect listener, retrying");
                    }
                }

                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(backoff) => {}
                }
                backoff = (backoff * 2).min(MAX_BACKOFF);
            }
        })
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

/// Collapses a burst of events sharing a debounce key into a single
/// callback invocation per window.
async fn debounce_loop<F, Fut>(
    mut rx: mpsc::UnboundedReceiver<InvalidationEvent>,
    debounce: Duration,
    callback: F,
) where
    F: Fn(InvalidationEvent) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    let pending: Arc<Mutex<HashMap<String, InvalidationEvent>>> = Arc::new(Mutex::new(HashMap::new()));
    let callback = Arc::new(callback);

    while let Some(event) = rx.recv().await {
        let key = event.debounce_key.clone().unwrap_or_else(|| "__global__".to_string());

        let mut guard = pending.lock().await;
        let already_scheduled = guard.contains_key(&key);
        guard.insert(key.clone(), event);
        drop(guard);

        if already_scheduled {
            continue;
        }

        let pending = pending.clone();
        let callback = callback.clone();
        tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            let event = {
                let mut guard = pending.lock().await;
                guard.remove(&key)
            };
            if let Some(event) = event {
                callback(event).await;
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn debounce_collapses_burst_into_single_callback() {
        let (tx, rx) = mpsc::unbounded_channel();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();

        tokio::spawn(debounce_loop(rx, Duration::from_millis(20), move |_event| {
            let calls = calls_clone.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
            }
        }));

        for _ in 0..5 {
            tx.send(InvalidationEvent { debounce_key: None, synthetic: false }).unwrap();
        }

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn debounce_keys_fire_independently() {
        let (tx, rx) = mpsc::unbounded_channel();
        let calls = Arc::new(Mutex::new(Vec::new()));
        let calls_clone = calls.clone();

        tokio::spawn(debounce_loop(rx, Duration::from_millis(10), move |event| {
            let calls = calls_clone.clone();
            async move {
                calls.lock().await.push(event.debounce_key);
            }
        }));

        tx.send(InvalidationEvent { debounce_key: Some("a".into()), synthetic: false }).unwrap();
        tx.send(InvalidationEvent { debounce_key: Some("b".into()), synthetic: false }).unwrap();

        tokio::time::sleep(Duration::from_millis(40)).await;
        let seen = calls.lock().await;
        assert_eq!(seen.len(), 2);
    }
}
