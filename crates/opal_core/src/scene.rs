use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f32; 3]", into = "[f32; 3]")]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const ZERO: Vec3 = Vec3 {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

impl From<[f32; 3]> for Vec3 {
    fn from(value: [f32; 3]) -> Self {
        Self::new(value[0], value[1], value[2])
    }
}

impl From<Vec3> for [f32; 3] {
    fn from(value: Vec3) -> Self {
        [value.x, value.y, value.z]
    }
}

impl fmt::Display for Vec3 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId(pub u64);

#[derive(Debug, Default)]
pub struct EntityIdAllocator {
    next: u64,
}

impl EntityIdAllocator {
    pub fn allocate(&mut self) -> EntityId {
        let id = EntityId(self.next);
        self.next = self.next.saturating_add(1);
        id
    }
}

/// Category tag used for bulk lookups and destruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Tag {
    Background,
    PlayObject,
}

impl Tag {
    pub fn as_str(self) -> &'static str {
        match self {
            Tag::Background => "Background",
            Tag::PlayObject => "PlayObject",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "Background" => Some(Tag::Background),
            "PlayObject" => Some(Tag::PlayObject),
            _ => None,
        }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fields shared by every loadable scene object.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectProperties {
    pub name: String,
    pub init_position: Vec3,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EntitySpec {
    Background(ObjectProperties),
    PlayObject {
        properties: ObjectProperties,
        draggable: bool,
        audio_file: Option<String>,
    },
}

impl EntitySpec {
    pub fn tag(&self) -> Tag {
        match self {
            EntitySpec::Background(_) => Tag::Background,
            EntitySpec::PlayObject { .. } => Tag::PlayObject,
        }
    }

    pub fn properties(&self) -> &ObjectProperties {
        match self {
            EntitySpec::Background(properties) => properties,
            EntitySpec::PlayObject { properties, .. } => properties,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlayObjectState {
    initial_position: Vec3,
    pub draggable: bool,
    pub audio_file: Option<String>,
}

impl PlayObjectState {
    pub fn initial_position(&self) -> Vec3 {
        self.initial_position
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EntityKind {
    Background,
    PlayObject(PlayObjectState),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SceneEntity {
    pub id: EntityId,
    pub name: String,
    pub position: Vec3,
    pub kind: EntityKind,
}

impl SceneEntity {
    pub fn tag(&self) -> Tag {
        match self.kind {
            EntityKind::Background => Tag::Background,
            EntityKind::PlayObject(_) => Tag::PlayObject,
        }
    }

    pub fn initial_position(&self) -> Option<Vec3> {
        match &self.kind {
            EntityKind::Background => None,
            EntityKind::PlayObject(state) => Some(state.initial_position),
        }
    }

    pub fn draggable(&self) -> bool {
        match &self.kind {
            EntityKind::Background => false,
            EntityKind::PlayObject(state) => state.draggable,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SnapshotObject {
    pub name: String,
    pub position: Vec3,
    pub tag: Tag,
}

/// Read-only view of the scene: background name (empty when there is none)
/// plus every play object in creation order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SceneSnapshot {
    pub background: String,
    pub objects: Vec<SnapshotObject>,
}

#[derive(Debug, Default)]
pub struct SceneStore {
    allocator: EntityIdAllocator,
    entities: Vec<SceneEntity>,
    generated_names: u64,
}

impl SceneStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the current background, if any.
    pub fn create_background(&mut self, properties: &ObjectProperties) -> EntityId {
        self.destroy_all_with_tag(&[Tag::Background]);
        let name = self.resolve_name(&properties.name);
        let id = self.allocator.allocate();
        info!(
            entity_id = id.0,
            name = %name,
            position = %properties.init_position,
            "background_created"
        );
        self.entities.push(SceneEntity {
            id,
            name,
            position: properties.init_position,
            kind: EntityKind::Background,
        });
        id
    }

    /// Name collisions are allowed; both entities stay live.
    pub fn create_play_object(
        &mut self,
        properties: &ObjectProperties,
        draggable: bool,
        audio_file: Option<String>,
    ) -> EntityId {
        let name = self.resolve_name(&properties.name);
        let id = self.allocator.allocate();
        info!(
            entity_id = id.0,
            name = %name,
            position = %properties.init_position,
            draggable,
            "play_object_created"
        );
        self.entities.push(SceneEntity {
            id,
            name,
            position: properties.init_position,
            kind: EntityKind::PlayObject(PlayObjectState {
                initial_position: properties.init_position,
                draggable,
                audio_file,
            }),
        });
        id
    }

    pub fn create(&mut self, spec: &EntitySpec) -> EntityId {
        match spec {
            EntitySpec::Background(properties) => self.create_background(properties),
            EntitySpec::PlayObject {
                properties,
                draggable,
                audio_file,
            } => self.create_play_object(properties, *draggable, audio_file.clone()),
        }
    }

    /// Removes every entity carrying one of `tags` and returns them in
    /// creation order.
    pub fn destroy_all_with_tag(&mut self, tags: &[Tag]) -> Vec<SceneEntity> {
        let mut removed = Vec::new();
        let mut kept = Vec::with_capacity(self.entities.len());
        for entity in self.entities.drain(..) {
            if tags.contains(&entity.tag()) {
                debug!(entity_id = entity.id.0, name = %entity.name, "entity_destroyed");
                removed.push(entity);
            } else {
                kept.push(entity);
            }
        }
        self.entities = kept;
        removed
    }

    pub fn find(&self, name: &str) -> Option<&SceneEntity> {
        self.entities.iter().find(|entity| entity.name == name)
    }

    pub fn find_mut(&mut self, name: &str) -> Option<&mut SceneEntity> {
        self.entities.iter_mut().find(|entity| entity.name == name)
    }

    pub fn find_by_id(&self, id: EntityId) -> Option<&SceneEntity> {
        self.entities.iter().find(|entity| entity.id == id)
    }

    pub fn all_with_tag(&self, tag: Tag) -> impl Iterator<Item = &SceneEntity> {
        self.entities
            .iter()
            .filter(move |entity| entity.tag() == tag)
    }

    pub fn all_with_tag_mut(&mut self, tag: Tag) -> impl Iterator<Item = &mut SceneEntity> {
        self.entities
            .iter_mut()
            .filter(move |entity| entity.tag() == tag)
    }

    pub fn background(&self) -> Option<&SceneEntity> {
        self.all_with_tag(Tag::Background).next()
    }

    pub fn snapshot(&self) -> SceneSnapshot {
        SceneSnapshot {
            background: self
                .background()
                .map(|entity| entity.name.clone())
                .unwrap_or_default(),
            objects: self
                .all_with_tag(Tag::PlayObject)
                .map(|entity| SnapshotObject {
                    name: entity.name.clone(),
                    position: entity.position,
                    tag: entity.tag(),
                })
                .collect(),
        }
    }

    pub fn entities(&self) -> &[SceneEntity] {
        &self.entities
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    fn resolve_name(&mut self, raw: &str) -> String {
        if !raw.is_empty() {
            return raw.to_string();
        }
        let name = format!("object-{}", self.generated_names);
        self.generated_names = self.generated_names.saturating_add(1);
        debug!(name = %name, "entity_name_generated");
        name
    }
}
