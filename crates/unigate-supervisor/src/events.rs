use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{broadcast, RwLock};

/// One Worker lifecycle event. Subscribers register a listener;
/// publication never blocks on a slow or failing subscriber.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerEvent {
    pub worker_id: String,
    pub kind: String,
    pub detail: String,
}

pub trait EventSink: Send + Sync {
    fn write<'a>(&'a self, event: &'a WorkerEvent) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>>;
}

/// Broadcast channel plus pluggable sinks, grounded on the corpus's
/// `EventHub` shape: each sink runs on its own spawned task, so a slow or
/// panicking sink cannot block `emit` or wedge the bus. Delivery is
/// best-effort; there is no persistent queue.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Inner>,
}

struct Inner {
    tx: broadcast::Sender<WorkerEvent>,
    sinks: RwLock<Vec<Arc<dyn EventSink>>>,
}

impl EventBus {
    pub fn new(buffer: usize) -> Self {
        let (tx, _) = broadcast::channel(buffer);
        Self {
            inner: Arc::new(Inner {
                tx,
                sinks: RwLock::new(Vec::new()),
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WorkerEvent> {
        self.inner.tx.subscribe()
    }

    pub async fn add_sink(&self, sink: Arc<dyn EventSink>) {
        self.inner.sinks.write().await.push(sink);
    }

    pub async fn emit(&self, event: WorkerEvent) {
        let _ = self.inner.tx.send(event.clone());
        let sinks = self.inner.sinks.read().await.clone();
        for sink in sinks {
            let event = event.clone();
            tokio::spawn(async move {
                sink.write(&event).await;
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSink {
        count: Arc<AtomicUsize>,
    }

    impl EventSink for CountingSink {
        fn write<'a>(&'a self, _event: &'a WorkerEvent) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
            Box::pin(async move {
                self.count.fetch_add(1, Ordering::SeqCst);
            })
        }
    }

    #[tokio::test]
    async fn subscribers_receive_emitted_events() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        bus.emit(WorkerEvent {
            worker_id: "1".to_string(),
            kind: "spawned".to_string(),
            detail: "port 8766".to_string(),
        })
        .await;
        let event = rx.recv().await.unwrap();
        assert_eq!(event.worker_id, "1");
    }

    #[tokio::test]
    async fn sinks_are_delivered_to_best_effort() {
        let count = Arc::new(AtomicUsize::new(0));
        let bus = EventBus::new(16);
        bus.add_sink(Arc::new(CountingSink {
            count: count.clone(),
        }))
        .await;
        bus.emit(WorkerEvent {
            worker_id: "1".to_string(),
            kind: "spawned".to_string(),
            detail: "".to_string(),
        })
        .await;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
