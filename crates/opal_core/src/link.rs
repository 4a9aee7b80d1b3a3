use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use tracing::{debug, warn};

use crate::command::decode_message;
use crate::queue::QueueHandle;
use crate::telemetry::{OutboundMessage, GOT_MESSAGE_ACK};

static HANDLER_LOCK_POISON_WARNED: AtomicBool = AtomicBool::new(false);

fn warn_handler_lock_poison_once(operation: &'static str) {
    if HANDLER_LOCK_POISON_WARNED
        .compare_exchange(false, true, Ordering::Relaxed, Ordering::Relaxed)
        .is_ok()
    {
        warn!(operation, "handler lock poisoned; recovered inner value");
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// Receives raw inbound lines on the link's listener thread. Whatever it
/// returns is sent back over the link.
pub trait MessageHandler: Send + Sync {
    fn on_message(&self, raw: &str) -> Vec<OutboundMessage>;
}

pub trait RemoteLink {
    fn subscribe(&mut self, handler: Arc<dyn MessageHandler>) -> SubscriptionId;
    fn unsubscribe(&mut self, id: SubscriptionId) -> bool;
    fn close(&mut self);
}

/// Unsubscribes first so no handler runs against a half-closed link.
pub fn shutdown_link(link: &mut dyn RemoteLink, subscription: SubscriptionId) {
    if !link.unsubscribe(subscription) {
        debug!(subscription = subscription.0, "link_unsubscribe_unknown_id");
    }
    link.close();
}

type HandlerEntry = (SubscriptionId, Arc<dyn MessageHandler>);

/// Thread-safe handler list a link implementation can share with its
/// listener threads.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: Arc<RwLock<Vec<HandlerEntry>>>,
    next_id: Arc<AtomicU64>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, handler: Arc<dyn MessageHandler>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        match self.handlers.write() {
            Ok(mut guard) => guard.push((id, handler)),
            Err(poisoned) => {
                warn_handler_lock_poison_once("subscribe");
                poisoned.into_inner().push((id, handler));
            }
        }
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut guard = match self.handlers.write() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn_handler_lock_poison_once("unsubscribe");
                poisoned.into_inner()
            }
        };
        let before = guard.len();
        guard.retain(|(existing, _)| *existing != id);
        guard.len() != before
    }

    pub fn len(&self) -> usize {
        match self.handlers.read() {
            Ok(guard) => guard.len(),
            Err(poisoned) => {
                warn_handler_lock_poison_once("len");
                poisoned.into_inner().len()
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Runs every subscribed handler on `raw` and collects their replies.
    pub fn dispatch(&self, raw: &str) -> Vec<OutboundMessage> {
        let handlers = match self.handlers.read() {
            Ok(guard) => guard.iter().map(|(_, h)| Arc::clone(h)).collect::<Vec<_>>(),
            Err(poisoned) => {
                warn_handler_lock_poison_once("dispatch");
                poisoned
                    .into_inner()
                    .iter()
                    .map(|(_, h)| Arc::clone(h))
                    .collect::<Vec<_>>()
            }
        };
        if handlers.is_empty() {
            debug!("link_message_without_subscriber_dropped");
        }
        handlers
            .iter()
            .flat_map(|handler| handler.on_message(raw))
            .collect()
    }
}

/// Decodes inbound command messages and hands them to the scene queue.
/// Every message is acknowledged; malformed ones are dropped with a log
/// reply and never reach the queue.
#[derive(Debug, Clone)]
pub struct CommandInbox {
    queue: QueueHandle,
}

impl CommandInbox {
    pub fn new(queue: QueueHandle) -> Self {
        Self { queue }
    }
}

impl MessageHandler for CommandInbox {
    fn on_message(&self, raw: &str) -> Vec<OutboundMessage> {
        let mut replies = vec![OutboundMessage::log(GOT_MESSAGE_ACK)];
        match decode_message(raw) {
            Ok(command) => {
                debug!(command = %command.kind(), "command_received");
                self.queue.enqueue_command(command);
            }
            Err(error) => {
                warn!(error = %error, "command_decode_failed_dropped");
                replies.push(OutboundMessage::log(format!("dropped command: {error}")));
            }
        }
        replies
    }
}
