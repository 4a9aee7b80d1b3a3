//! Recording fakes for the collaborator traits, shared by unit tests.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use crate::collaborators::{
    Easing, GestureLayer, Presentation, ResourceError, SpriteDesc, TelemetrySink,
};
use crate::scene::{EntityId, Vec3};
use crate::telemetry::{LogEvent, OutboundMessage};

#[derive(Debug, Clone, PartialEq)]
pub enum PresentationCall {
    Spawn(SpriteDesc),
    AttachAudio(String),
    Despawn(EntityId),
    SetPosition(EntityId, Vec3),
    AnimateMove {
        entity: EntityId,
        from: Vec3,
        to: Vec3,
        duration: Duration,
        easing: Easing,
    },
    SidekickDo(String),
    SidekickSay(String),
}

#[derive(Debug, Default)]
struct PresentationLog {
    calls: Vec<PresentationCall>,
    missing_resources: bool,
}

#[derive(Debug, Clone, Default)]
pub struct RecordingPresentation {
    inner: Rc<RefCell<PresentationLog>>,
}

impl RecordingPresentation {
    pub fn calls(&self) -> Vec<PresentationCall> {
        self.inner.borrow().calls.clone()
    }

    pub fn despawn_count(&self) -> usize {
        self.inner
            .borrow()
            .calls
            .iter()
            .filter(|call| matches!(call, PresentationCall::Despawn(_)))
            .count()
    }

    pub fn set_missing_resources(&self, missing: bool) {
        self.inner.borrow_mut().missing_resources = missing;
    }
}

impl Presentation for RecordingPresentation {
    fn spawn_sprite(&mut self, sprite: &SpriteDesc) -> Result<(), ResourceError> {
        let mut log = self.inner.borrow_mut();
        log.calls.push(PresentationCall::Spawn(sprite.clone()));
        if log.missing_resources {
            return Err(ResourceError::SpriteNotFound {
                path: sprite.resource_path.clone(),
            });
        }
        Ok(())
    }

    fn attach_audio(&mut self, _entity: EntityId, clip_path: &str) -> Result<(), ResourceError> {
        let mut log = self.inner.borrow_mut();
        log.calls
            .push(PresentationCall::AttachAudio(clip_path.to_string()));
        if log.missing_resources {
            return Err(ResourceError::AudioNotFound {
                path: clip_path.to_string(),
            });
        }
        Ok(())
    }

    fn despawn(&mut self, entity: EntityId) {
        self.inner
            .borrow_mut()
            .calls
            .push(PresentationCall::Despawn(entity));
    }

    fn set_position(&mut self, entity: EntityId, position: Vec3) {
        self.inner
            .borrow_mut()
            .calls
            .push(PresentationCall::SetPosition(entity, position));
    }

    fn animate_move(
        &mut self,
        entity: EntityId,
        from: Vec3,
        to: Vec3,
        duration: Duration,
        easing: Easing,
    ) {
        self.inner
            .borrow_mut()
            .calls
            .push(PresentationCall::AnimateMove {
                entity,
                from,
                to,
                duration,
                easing,
            });
    }

    fn sidekick_do(&mut self, action: &str) {
        self.inner
            .borrow_mut()
            .calls
            .push(PresentationCall::SidekickDo(action.to_string()));
    }

    fn sidekick_say(&mut self, speech: &str) {
        self.inner
            .borrow_mut()
            .calls
            .push(PresentationCall::SidekickSay(speech.to_string()));
    }
}

#[derive(Debug, Default)]
struct GestureLog {
    allow_touch: Option<bool>,
    light: Option<Vec3>,
    registered: Vec<(EntityId, String, bool)>,
    pending: Vec<LogEvent>,
}

#[derive(Debug, Clone, Default)]
pub struct RecordingGestures {
    inner: Rc<RefCell<GestureLog>>,
}

impl RecordingGestures {
    pub fn allow_touch(&self) -> Option<bool> {
        self.inner.borrow().allow_touch
    }

    pub fn light(&self) -> Option<Vec3> {
        self.inner.borrow().light
    }

    pub fn registered(&self) -> Vec<(String, bool)> {
        self.inner
            .borrow()
            .registered
            .iter()
            .map(|(_, name, draggable)| (name.clone(), *draggable))
            .collect()
    }

    pub fn push_event(&self, event: LogEvent) {
        self.inner.borrow_mut().pending.push(event);
    }
}

impl GestureLayer for RecordingGestures {
    fn set_allow_touch(&mut self, allow: bool) {
        self.inner.borrow_mut().allow_touch = Some(allow);
    }

    fn register_entity(&mut self, entity: EntityId, name: &str, draggable: bool) {
        self.inner
            .borrow_mut()
            .registered
            .push((entity, name.to_string(), draggable));
    }

    fn unregister_entity(&mut self, entity: EntityId) {
        self.inner
            .borrow_mut()
            .registered
            .retain(|(id, _, _)| *id != entity);
    }

    fn light_on(&mut self, position: Vec3) {
        self.inner.borrow_mut().light = Some(position);
    }

    fn light_off(&mut self) {
        self.inner.borrow_mut().light = None;
    }

    fn drain_log_events(&mut self, out: &mut Vec<LogEvent>) {
        out.append(&mut self.inner.borrow_mut().pending);
    }
}

#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    sent: Rc<RefCell<Vec<OutboundMessage>>>,
}

impl RecordingSink {
    pub fn messages(&self) -> Vec<OutboundMessage> {
        self.sent.borrow().clone()
    }
}

impl TelemetrySink for RecordingSink {
    fn send(&mut self, message: &OutboundMessage) {
        self.sent.borrow_mut().push(message.clone());
    }
}
