use std::time::Duration;

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::collaborators::{
    Easing, GestureLayer, Presentation, ResourceError, SpriteDesc, TelemetrySink,
    AUDIO_FILE_PATH,
};
use crate::command::{Command, CommandKind};
use crate::queue::{CommandQueue, QueueHandle};
use crate::scene::{EntityId, EntityKind, EntitySpec, ObjectProperties, SceneStore, Tag, Vec3};
use crate::telemetry::{self, LogEvent};

pub const MOVE_DURATION: Duration = Duration::from_secs(2);
pub const DEFAULT_BACKGROUND_NAME: &str = "playground";
pub const DEFAULT_BACKGROUND_POSITION: Vec3 = Vec3::new(0.0, 0.0, 2.0);

#[derive(Debug, Clone, PartialEq)]
pub struct ControllerConfig {
    pub move_duration: Duration,
    pub move_easing: Easing,
    pub default_background: Option<ObjectProperties>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            move_duration: MOVE_DURATION,
            move_easing: Easing::EaseOutSine,
            default_background: Some(ObjectProperties {
                name: DEFAULT_BACKGROUND_NAME.to_string(),
                init_position: DEFAULT_BACKGROUND_POSITION,
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Idle,
    Applying,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApplyError {
    #[error("{command}: no entity named '{name}'")]
    StaleReference { command: CommandKind, name: String },
    #[error(transparent)]
    ResourceMissing(#[from] ResourceError),
}

/// Owns the scene and applies queued commands to it, one tick at a time.
pub struct SceneController {
    store: SceneStore,
    queue: CommandQueue,
    presentation: Box<dyn Presentation>,
    gestures: Option<Box<dyn GestureLayer>>,
    telemetry: Box<dyn TelemetrySink>,
    config: ControllerConfig,
    state: ControllerState,
    touch_enabled: bool,
    highlight: Option<Vec3>,
    interaction_buffer: Vec<LogEvent>,
}

impl SceneController {
    pub fn new(
        queue: CommandQueue,
        presentation: Box<dyn Presentation>,
        gestures: Option<Box<dyn GestureLayer>>,
        telemetry: Box<dyn TelemetrySink>,
        config: ControllerConfig,
    ) -> Self {
        if gestures.is_none() {
            error!("gesture_layer_missing_touch_and_highlight_inert");
        }
        Self {
            store: SceneStore::new(),
            queue,
            presentation,
            gestures,
            telemetry,
            config,
            state: ControllerState::Idle,
            touch_enabled: true,
            highlight: None,
            interaction_buffer: Vec::new(),
        }
    }

    pub fn queue_handle(&self) -> QueueHandle {
        self.queue.handle()
    }

    pub fn pending_commands(&self) -> usize {
        self.queue.len()
    }

    pub fn store(&self) -> &SceneStore {
        &self.store
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    pub fn touch_enabled(&self) -> bool {
        self.touch_enabled
    }

    pub fn highlight(&self) -> Option<Vec3> {
        self.highlight
    }

    pub fn load_default_scene(&mut self) {
        if let Some(background) = self.config.default_background.clone() {
            self.load_object(EntitySpec::Background(background));
        }
    }

    /// One iteration of the scene loop: run every queued work item, then
    /// forward interaction events recorded by the gesture layer.
    pub fn tick(&mut self) -> usize {
        let applied = self.drain_and_run_all();
        self.flush_interaction_events();
        applied
    }

    /// Runs queued work until the queue is observed empty, including work
    /// enqueued while draining.
    pub fn drain_and_run_all(&mut self) -> usize {
        let mut applied = 0usize;
        while let Some(work) = self.queue.pop() {
            self.state = ControllerState::Applying;
            work(self);
            self.state = ControllerState::Idle;
            applied += 1;
        }
        if applied > 0 {
            debug!(applied, "command_queue_drained");
        }
        applied
    }

    pub fn apply(&mut self, command: Command) {
        let kind = command.kind();
        debug!(command = %kind, "command_applying");
        let result = match command {
            Command::DisableTouch => {
                self.set_touch_enabled(false);
                Ok(())
            }
            Command::EnableTouch => {
                self.set_touch_enabled(true);
                Ok(())
            }
            Command::Reset => {
                self.reload_scene();
                Ok(())
            }
            Command::SidekickDo(action) => {
                self.presentation.sidekick_do(&action);
                Ok(())
            }
            Command::SidekickSay(speech) => {
                self.presentation.sidekick_say(&speech);
                Ok(())
            }
            Command::LoadObject(spec) => {
                self.load_object(spec);
                Ok(())
            }
            Command::Clear => {
                self.clear_scene();
                Ok(())
            }
            Command::MoveObject { name, destination } => self.move_object(&name, destination),
            Command::HighlightObject(name) => self.highlight_object(&name),
            Command::RequestKeyframe | Command::GotToGoal => {
                warn!(command = %kind, "command_reserved_not_implemented");
                Ok(())
            }
        };

        if let Err(error) = result {
            self.report_apply_error(kind, error);
        }
    }

    pub fn handle_log_event(&mut self, event: &LogEvent) {
        let message = telemetry::emit(event);
        self.telemetry.send(&message);
    }

    pub fn scene_snapshot(&self) -> LogEvent {
        LogEvent::SceneSnapshot(self.store.snapshot())
    }

    pub fn publish_scene_snapshot(&mut self) {
        let event = self.scene_snapshot();
        self.handle_log_event(&event);
    }

    fn set_touch_enabled(&mut self, allow: bool) {
        self.touch_enabled = allow;
        info!(allow, "touch_toggled");
        if let Some(gestures) = self.gesture_layer("set_allow_touch") {
            gestures.set_allow_touch(allow);
        }
    }

    fn reload_scene(&mut self) {
        info!("scene_reloading");
        self.light_off();
        for entity in self.store.all_with_tag_mut(Tag::PlayObject) {
            let Some(initial) = entity.initial_position() else {
                continue;
            };
            debug!(name = %entity.name, position = %initial, "entity_reset");
            entity.position = initial;
            self.presentation.set_position(entity.id, initial);
        }
    }

    fn clear_scene(&mut self) {
        info!("scene_clearing");
        self.light_off();
        for removed in self
            .store
            .destroy_all_with_tag(&[Tag::Background, Tag::PlayObject])
        {
            self.despawn_entity(removed.id);
        }
    }

    fn load_object(&mut self, spec: EntitySpec) {
        if spec.tag() == Tag::Background {
            for removed in self.store.destroy_all_with_tag(&[Tag::Background]) {
                self.despawn_entity(removed.id);
            }
        }

        let id = self.store.create(&spec);
        let Some(entity) = self.store.find_by_id(id).cloned() else {
            return;
        };

        let sprite = SpriteDesc::for_entity(id, &entity.name, entity.position, entity.tag());
        if let Err(error) = self.presentation.spawn_sprite(&sprite) {
            self.report_apply_error(CommandKind::LoadObject, error.into());
        }

        if let EntityKind::PlayObject(state) = &entity.kind {
            if let Some(audio_file) = &state.audio_file {
                let clip_path = format!("{AUDIO_FILE_PATH}{audio_file}");
                if let Err(error) = self.presentation.attach_audio(id, &clip_path) {
                    self.report_apply_error(CommandKind::LoadObject, error.into());
                }
            }
            if let Some(gestures) = self.gesture_layer("register_entity") {
                gestures.register_entity(id, &entity.name, state.draggable);
            }
        }
    }

    fn despawn_entity(&mut self, id: EntityId) {
        self.presentation.despawn(id);
        if let Some(gestures) = self.gesture_layer("unregister_entity") {
            gestures.unregister_entity(id);
        }
    }

    fn move_object(&mut self, name: &str, destination: Vec3) -> Result<(), ApplyError> {
        let entity = self
            .store
            .find_mut(name)
            .ok_or_else(|| ApplyError::StaleReference {
                command: CommandKind::MoveObject,
                name: name.to_string(),
            })?;
        let from = entity.position;
        entity.position = destination;
        info!(name, from = %from, to = %destination, "entity_move_started");
        self.presentation.animate_move(
            entity.id,
            from,
            destination,
            self.config.move_duration,
            self.config.move_easing,
        );
        Ok(())
    }

    fn highlight_object(&mut self, name: &str) -> Result<(), ApplyError> {
        let position = self
            .store
            .find(name)
            .map(|entity| entity.position)
            .ok_or_else(|| ApplyError::StaleReference {
                command: CommandKind::HighlightObject,
                name: name.to_string(),
            })?;
        self.highlight = Some(position);
        if let Some(gestures) = self.gesture_layer("light_on") {
            gestures.light_on(position);
        }
        Ok(())
    }

    fn light_off(&mut self) {
        self.highlight = None;
        if let Some(gestures) = self.gesture_layer("light_off") {
            gestures.light_off();
        }
    }

    fn flush_interaction_events(&mut self) {
        let Some(gestures) = self.gestures.as_mut() else {
            return;
        };
        let mut events = std::mem::take(&mut self.interaction_buffer);
        gestures.drain_log_events(&mut events);
        for event in events.drain(..) {
            self.handle_log_event(&event);
        }
        self.interaction_buffer = events;
    }

    fn gesture_layer(&mut self, operation: &'static str) -> Option<&mut Box<dyn GestureLayer>> {
        if self.gestures.is_none() {
            debug!(operation, "gesture_layer_missing_skipped");
        }
        self.gestures.as_mut()
    }

    /// Stale references are echoed back to the remote as a log message;
    /// missing resources only reach the local log.
    fn report_apply_error(&mut self, command: CommandKind, error: ApplyError) {
        match &error {
            ApplyError::StaleReference { name, .. } => {
                warn!(command = %command, name = %name, "stale_reference_ignored");
                self.handle_log_event(&LogEvent::message(error.to_string()));
            }
            ApplyError::ResourceMissing(source) => {
                error!(command = %command, error = %source, "entity_resource_missing");
            }
        }
    }
}
