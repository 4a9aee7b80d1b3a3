//! Boundaries to the layers this crate drives but does not implement:
//! drawing and audio, gesture recognition, and the outbound message path.

use std::time::Duration;

use thiserror::Error;

use crate::scene::{EntityId, Tag, Vec3};
use crate::telemetry::{LogEvent, OutboundMessage};

pub const GRAPHICS_FILE_PATH: &str = "graphics/base-images/";
pub const AUDIO_FILE_PATH: &str = "audio/";
pub const DEFAULT_ENTITY_SCALE: Vec3 = Vec3::new(100.0, 100.0, 100.0);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Easing {
    EaseOutSine,
}

impl Easing {
    /// Maps normalized time `t` in `[0, 1]` to normalized progress.
    pub fn apply(self, t: f32) -> f32 {
        let t = t.clamp(0.0, 1.0);
        match self {
            Easing::EaseOutSine => (t * std::f32::consts::FRAC_PI_2).sin(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpriteDesc {
    pub entity: EntityId,
    pub name: String,
    pub resource_path: String,
    pub position: Vec3,
    pub scale: Vec3,
    pub tag: Tag,
}

impl SpriteDesc {
    pub fn for_entity(entity: EntityId, name: &str, position: Vec3, tag: Tag) -> Self {
        Self {
            entity,
            name: name.to_string(),
            resource_path: format!("{GRAPHICS_FILE_PATH}{name}"),
            position,
            scale: DEFAULT_ENTITY_SCALE,
            tag,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResourceError {
    #[error("could not load sprite: {path}")]
    SpriteNotFound { path: String },
    #[error("could not load audio: {path}")]
    AudioNotFound { path: String },
}

/// Drawing, audio and animation. Every call returns immediately; animations
/// run on the presentation side and report nothing back.
pub trait Presentation {
    /// The visual is created even when this returns an error.
    fn spawn_sprite(&mut self, sprite: &SpriteDesc) -> Result<(), ResourceError>;
    fn attach_audio(&mut self, entity: EntityId, clip_path: &str) -> Result<(), ResourceError>;
    fn despawn(&mut self, entity: EntityId);
    fn set_position(&mut self, entity: EntityId, position: Vec3);
    fn animate_move(
        &mut self,
        entity: EntityId,
        from: Vec3,
        to: Vec3,
        duration: Duration,
        easing: Easing,
    );
    fn sidekick_do(&mut self, action: &str);
    fn sidekick_say(&mut self, speech: &str);
}

/// Touch handling layer. Interaction events it recognizes are queued on its
/// side and pulled once per tick.
pub trait GestureLayer {
    fn set_allow_touch(&mut self, allow: bool);
    fn register_entity(&mut self, entity: EntityId, name: &str, draggable: bool);
    /// Called for every despawned entity, registered or not.
    fn unregister_entity(&mut self, entity: EntityId);
    fn light_on(&mut self, position: Vec3);
    fn light_off(&mut self);
    fn drain_log_events(&mut self, out: &mut Vec<LogEvent>);
}

/// Send half of the network link. Fire-and-forget.
pub trait TelemetrySink {
    fn send(&mut self, message: &OutboundMessage);
}
