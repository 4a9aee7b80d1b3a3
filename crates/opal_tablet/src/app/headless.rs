use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};
use opal_core::{
    Easing, EntityId, GestureLayer, LogEvent, Presentation, ResourceError, SpriteDesc, Vec3,
};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq)]
struct Tween {
    from: Vec3,
    to: Vec3,
    started_at: Instant,
    duration: Duration,
    easing: Easing,
}

impl Tween {
    fn sample(&self, now: Instant) -> Vec3 {
        let elapsed = now.saturating_duration_since(self.started_at);
        let t = if self.duration.is_zero() {
            1.0
        } else {
            elapsed.as_secs_f32() / self.duration.as_secs_f32()
        };
        let progress = self.easing.apply(t);
        Vec3::new(
            self.from.x + (self.to.x - self.from.x) * progress,
            self.from.y + (self.to.y - self.from.y) * progress,
            self.from.z + (self.to.z - self.from.z) * progress,
        )
    }

    fn finished(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.started_at) >= self.duration
    }
}

#[derive(Debug, Clone, PartialEq)]
struct SpriteState {
    name: String,
    position: Vec3,
}

/// Presentation without a display. Resources are resolved against the asset
/// root so missing art surfaces the same way it would on a device.
#[derive(Debug)]
pub(crate) struct HeadlessPresentation {
    asset_root: PathBuf,
    sprites: HashMap<EntityId, SpriteState>,
    tweens: HashMap<EntityId, Tween>,
}

impl HeadlessPresentation {
    pub(crate) fn new(asset_root: impl Into<PathBuf>) -> Self {
        Self {
            asset_root: asset_root.into(),
            sprites: HashMap::new(),
            tweens: HashMap::new(),
        }
    }

    fn retire_finished_tweens(&mut self, now: Instant) {
        let sprites = &mut self.sprites;
        self.tweens.retain(|entity, tween| {
            if !tween.finished(now) {
                return true;
            }
            if let Some(sprite) = sprites.get_mut(entity) {
                sprite.position = tween.to;
                debug!(name = %sprite.name, position = %tween.to, "entity_move_finished");
            }
            false
        });
    }

    #[cfg(test)]
    fn position_at(&self, entity: EntityId, now: Instant) -> Option<Vec3> {
        match self.tweens.get(&entity) {
            Some(tween) => Some(tween.sample(now)),
            None => self.sprites.get(&entity).map(|sprite| sprite.position),
        }
    }
}

impl Presentation for HeadlessPresentation {
    fn spawn_sprite(&mut self, sprite: &SpriteDesc) -> Result<(), ResourceError> {
        self.retire_finished_tweens(Instant::now());
        self.sprites.insert(
            sprite.entity,
            SpriteState {
                name: sprite.name.clone(),
                position: sprite.position,
            },
        );
        debug!(
            name = %sprite.name,
            tag = %sprite.tag,
            position = %sprite.position,
            scale = %sprite.scale,
            "sprite_spawned"
        );
        match resolve_resource(&self.asset_root, &sprite.resource_path) {
            Some(_) => Ok(()),
            None => Err(ResourceError::SpriteNotFound {
                path: sprite.resource_path.clone(),
            }),
        }
    }

    fn attach_audio(&mut self, entity: EntityId, clip_path: &str) -> Result<(), ResourceError> {
        if !self.sprites.contains_key(&entity) {
            warn!(entity = entity.0, clip_path, "audio_attach_unknown_entity");
        }
        match resolve_resource(&self.asset_root, clip_path) {
            Some(_) => Ok(()),
            None => Err(ResourceError::AudioNotFound {
                path: clip_path.to_string(),
            }),
        }
    }

    fn despawn(&mut self, entity: EntityId) {
        self.tweens.remove(&entity);
        if let Some(sprite) = self.sprites.remove(&entity) {
            debug!(name = %sprite.name, "sprite_despawned");
        }
    }

    fn set_position(&mut self, entity: EntityId, position: Vec3) {
        if self.tweens.remove(&entity).is_some() {
            debug!(entity = entity.0, "entity_move_interrupted");
        }
        if let Some(sprite) = self.sprites.get_mut(&entity) {
            sprite.position = position;
        }
    }

    fn animate_move(
        &mut self,
        entity: EntityId,
        from: Vec3,
        to: Vec3,
        duration: Duration,
        easing: Easing,
    ) {
        let now = Instant::now();
        self.retire_finished_tweens(now);
        // A new move starts from wherever an unfinished one has got to.
        let from = self
            .tweens
            .get(&entity)
            .map(|running| running.sample(now))
            .unwrap_or(from);
        self.tweens.insert(
            entity,
            Tween {
                from,
                to,
                started_at: now,
                duration,
                easing,
            },
        );
    }

    fn sidekick_do(&mut self, action: &str) {
        info!(action, "sidekick_do");
    }

    fn sidekick_say(&mut self, speech: &str) {
        info!(speech, "sidekick_say");
    }
}

/// Finds `relative` under `root`, with or without a file extension.
fn resolve_resource(root: &Path, relative: &str) -> Option<PathBuf> {
    let exact = root.join(relative);
    if exact.is_file() {
        return Some(exact);
    }
    let stem = exact.file_name()?.to_owned();
    let parent = exact.parent()?;
    fs::read_dir(parent)
        .ok()?
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .find(|path| path.is_file() && path.file_stem() == Some(stem.as_os_str()))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SimulatedTouch {
    Tap(String),
    Drag(String),
}

#[derive(Debug, Clone, PartialEq)]
struct TouchTarget {
    name: String,
    draggable: bool,
}

/// Gesture layer fed from the operator console instead of a touch screen.
#[derive(Debug)]
pub(crate) struct HeadlessGestures {
    touches: Receiver<SimulatedTouch>,
    allow_touch: bool,
    targets: BTreeMap<EntityId, TouchTarget>,
    light: Option<Vec3>,
}

impl HeadlessGestures {
    pub(crate) fn new() -> (Self, Sender<SimulatedTouch>) {
        let (sender, touches) = crossbeam_channel::unbounded();
        (
            Self {
                touches,
                allow_touch: true,
                targets: BTreeMap::new(),
                light: None,
            },
            sender,
        )
    }

    fn interpret(&self, touch: SimulatedTouch) -> Option<LogEvent> {
        if !self.allow_touch {
            debug!(?touch, "touch_ignored_while_disabled");
            return None;
        }
        let (name, action_type) = match &touch {
            SimulatedTouch::Tap(name) => (name, "tap"),
            SimulatedTouch::Drag(name) => (name, "drag"),
        };
        // Lowest id first, so duplicate names resolve to the earliest entity.
        let Some(target) = self.targets.values().find(|target| target.name == *name) else {
            debug!(name = %name, "touch_missed_no_entity");
            return None;
        };
        if action_type == "drag" && !target.draggable {
            debug!(name = %name, "drag_ignored_not_draggable");
            return None;
        }
        Some(LogEvent::action(name.as_str(), action_type, None))
    }
}

impl GestureLayer for HeadlessGestures {
    fn set_allow_touch(&mut self, allow: bool) {
        self.allow_touch = allow;
    }

    fn register_entity(&mut self, entity: EntityId, name: &str, draggable: bool) {
        self.targets.insert(
            entity,
            TouchTarget {
                name: name.to_string(),
                draggable,
            },
        );
    }

    fn unregister_entity(&mut self, entity: EntityId) {
        if let Some(target) = self.targets.remove(&entity) {
            debug!(name = %target.name, "touch_target_removed");
        }
    }

    fn light_on(&mut self, position: Vec3) {
        self.light = Some(position);
        info!(position = %position, "highlight_on");
    }

    fn light_off(&mut self) {
        if self.light.take().is_some() {
            info!("highlight_off");
        }
    }

    fn drain_log_events(&mut self, out: &mut Vec<LogEvent>) {
        while let Ok(touch) = self.touches.try_recv() {
            if let Some(event) = self.interpret(touch) {
                out.push(event);
            }
        }
    }
}
