use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender, TryRecvError};
use tracing::{debug, warn};

use crate::command::Command;
use crate::controller::SceneController;

pub const DEFAULT_QUEUE_WARN_DEPTH: usize = 1024;

/// Deferred action run on the controller's thread. The controller is handed
/// in at execution time rather than captured.
pub type WorkItem = Box<dyn FnOnce(&mut SceneController) + Send + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueConfig {
    /// Pending depth at which a warning is logged. Nothing is dropped.
    pub warn_depth: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            warn_depth: DEFAULT_QUEUE_WARN_DEPTH,
        }
    }
}

/// Unbounded multi-producer FIFO of work items. The consumer side stays with
/// the controller; producers get cloned [`QueueHandle`]s.
pub struct CommandQueue {
    sender: Sender<WorkItem>,
    receiver: Receiver<WorkItem>,
    config: QueueConfig,
    depth_warned: Arc<AtomicBool>,
}

impl CommandQueue {
    pub fn new(config: QueueConfig) -> Self {
        let (sender, receiver) = crossbeam_channel::unbounded();
        Self {
            sender,
            receiver,
            config,
            depth_warned: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn handle(&self) -> QueueHandle {
        QueueHandle {
            sender: self.sender.clone(),
            warn_depth: self.config.warn_depth,
            depth_warned: Arc::clone(&self.depth_warned),
        }
    }

    pub(crate) fn pop(&self) -> Option<WorkItem> {
        match self.receiver.try_recv() {
            Ok(item) => Some(item),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => {
                // Re-arm the depth warning once the backlog is gone.
                self.depth_warned.store(false, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }
}

impl Default for CommandQueue {
    fn default() -> Self {
        Self::new(QueueConfig::default())
    }
}

impl fmt::Debug for CommandQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandQueue")
            .field("pending", &self.len())
            .field("config", &self.config)
            .finish()
    }
}

/// Producer end of a [`CommandQueue`]. Cheap to clone and safe to use from
/// any thread; enqueueing never blocks.
#[derive(Clone)]
pub struct QueueHandle {
    sender: Sender<WorkItem>,
    warn_depth: usize,
    depth_warned: Arc<AtomicBool>,
}

impl QueueHandle {
    pub fn enqueue<F>(&self, work: F)
    where
        F: FnOnce(&mut SceneController) + Send + 'static,
    {
        self.enqueue_boxed(Box::new(work));
    }

    fn enqueue_boxed(&self, work: WorkItem) {
        if self.sender.send(work).is_err() {
            debug!("command_queue_consumer_gone_item_dropped");
            return;
        }
        let depth = self.sender.len();
        if self.warn_depth > 0
            && depth >= self.warn_depth
            && !self.depth_warned.swap(true, Ordering::Relaxed)
        {
            warn!(depth, "command_queue_depth_high");
        }
    }

    pub fn enqueue_command(&self, command: Command) {
        self.enqueue(move |controller| controller.apply(command));
    }

    pub fn len(&self) -> usize {
        self.sender.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sender.is_empty()
    }
}

impl fmt::Debug for QueueHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueHandle")
            .field("pending", &self.len())
            .finish()
    }
}
