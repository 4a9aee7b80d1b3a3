pub mod collaborators;
pub mod command;
pub mod controller;
pub mod link;
pub mod queue;
pub mod scene;
pub mod telemetry;

#[cfg(test)]
mod testing;

pub use collaborators::{
    Easing, GestureLayer, Presentation, ResourceError, SpriteDesc, TelemetrySink,
    AUDIO_FILE_PATH, DEFAULT_ENTITY_SCALE, GRAPHICS_FILE_PATH,
};
pub use command::{decode, decode_message, Command, CommandKind, DecodeError};
pub use controller::{
    ApplyError, ControllerConfig, ControllerState, SceneController, DEFAULT_BACKGROUND_NAME,
    DEFAULT_BACKGROUND_POSITION, MOVE_DURATION,
};
pub use link::{
    shutdown_link, CommandInbox, HandlerRegistry, MessageHandler, RemoteLink, SubscriptionId,
};
pub use queue::{CommandQueue, QueueConfig, QueueHandle, WorkItem, DEFAULT_QUEUE_WARN_DEPTH};
pub use scene::{
    EntityId, EntityKind, EntitySpec, ObjectProperties, PlayObjectState, SceneEntity,
    SceneSnapshot, SceneStore, SnapshotObject, Tag, Vec3,
};
pub use telemetry::{
    emit, emit_metrics, handshake_lines, ActionEvent, Channel, LogEvent, MetricsReport,
    ObjectMetric, OutboundMessage, CHECK_IN_MESSAGE, GOT_MESSAGE_ACK,
};
