//! Event fan-out from the session to rendering and telemetry collaborators.

use futures::{stream::BoxStream, StreamExt};
use spectro_types::events::SystemEvent;
use tokio::sync::broadcast;
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};
use tracing::{debug, warn};

/// Publish/subscribe surface for [`SystemEvent`]s.
///
/// Publishing never blocks and never fails: a session must not stall because
/// nobody is listening.
pub trait EventHub: Send + Sync + 'static {
    fn publish(&self, event: SystemEvent);
    fn subscribe(&self) -> BoxStream<'static, SystemEvent>;
}

/// In-process hub backed by a broadcast channel.
#[derive(Clone)]
pub struct LocalHub {
    tx: broadcast::Sender<SystemEvent>,
}

impl LocalHub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl EventHub for LocalHub {
    fn publish(&self, event: SystemEvent) {
        if self.tx.send(event).is_err() {
            debug!("event dropped: no subscribers");
        }
    }

    fn subscribe(&self) -> BoxStream<'static, SystemEvent> {
        BroadcastStream::new(self.tx.subscribe())
            .filter_map(|event| async move {
                match event {
                    Ok(event) => Some(event),
                    Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                        warn!("event subscriber lagged; {skipped} events skipped");
                        None
                    }
                }
            })
            .boxed()
    }
}

/// Hub that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullHub;

impl EventHub for NullHub {
    fn publish(&self, _event: SystemEvent) {}

    fn subscribe(&self) -> BoxStream<'static, SystemEvent> {
        futures::stream::empty().boxed()
    }
}
