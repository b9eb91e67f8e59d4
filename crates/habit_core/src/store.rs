use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::StoreError;
use crate::habit::Habit;
use crate::record::HabitRecord;
use crate::reminder::Reminder;
use crate::user::User;

/// Field/value mapping of one stored entity.
pub type Fields = Map<String, Value>;

/// Field every stored entity is looked up by.
pub const ID_FIELD: &str = "id";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Users,
    Habits,
    HabitRecords,
    Reminders,
}

impl EntityKind {
    pub const ALL: [EntityKind; 4] = [
        EntityKind::Users,
        EntityKind::Habits,
        EntityKind::HabitRecords,
        EntityKind::Reminders,
    ];

    /// Top-level key of the collection in the store document.
    pub fn key(self) -> &'static str {
        match self {
            EntityKind::Users => "users",
            EntityKind::Habits => "habits",
            EntityKind::HabitRecords => "habit_records",
            EntityKind::Reminders => "reminders",
        }
    }
}

/// A value that can be persisted in a [`Store`].
pub trait Entity: Serialize + DeserializeOwned {
    const KIND: EntityKind;

    fn id(&self) -> String;
}

/// Attaches the owning user's email to a per-user entity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Owned<T> {
    pub owner: String,
    #[serde(flatten)]
    pub value: T,
}

impl<T> Owned<T> {
    pub fn new(owner: impl Into<String>, value: T) -> Self {
        Self {
            owner: owner.into(),
            value,
        }
    }

    pub fn into_inner(self) -> T {
        self.value
    }
}

/// Id of a per-user entity attached to `habit_name`.
///
/// Encoded as the JSON array `[owner, habit_name]`, so distinct pairs never
/// share an id whatever characters the email or habit name contain.
pub fn owned_id(owner: &str, habit_name: &str) -> String {
    Value::Array(vec![Value::from(owner), Value::from(habit_name)]).to_string()
}

impl Entity for User {
    const KIND: EntityKind = EntityKind::Users;

    fn id(&self) -> String {
        self.email.clone()
    }
}

impl Entity for Owned<Habit> {
    const KIND: EntityKind = EntityKind::Habits;

    fn id(&self) -> String {
        owned_id(&self.owner, &self.value.name)
    }
}

impl Entity for Owned<HabitRecord> {
    const KIND: EntityKind = EntityKind::HabitRecords;

    fn id(&self) -> String {
        owned_id(&self.owner, &self.value.habit_name)
    }
}

impl Entity for Owned<Reminder> {
    const KIND: EntityKind = EntityKind::Reminders;

    fn id(&self) -> String {
        owned_id(&self.owner, &self.value.habit_name)
    }
}

/// Flattens an entity into its stored field mapping, including the id.
pub fn to_fields<E: Entity>(entity: &E) -> Result<Fields, StoreError> {
    match serde_json::to_value(entity)? {
        Value::Object(mut fields) => {
            fields.insert(ID_FIELD.to_string(), Value::String(entity.id()));
            Ok(fields)
        }
        other => Err(StoreError::Layout(format!(
            "{} entity serialized to a non-object value: {other}",
            E::KIND.key()
        ))),
    }
}

pub fn from_fields<E: Entity>(fields: Fields) -> Result<E, StoreError> {
    Ok(serde_json::from_value(Value::Object(fields))?)
}

/// Generic persistence keyed by entity kind.
///
/// Lookups by an unknown id are not errors: `read` yields `None`, and
/// `update`/`delete` return `false` without touching the backing medium.
pub trait Store {
    /// Appends `fields` to the `kind` collection. Fails with
    /// [`StoreError::DuplicateId`] when an entity with the same id exists.
    fn create(&self, kind: EntityKind, fields: Fields) -> Result<(), StoreError>;

    /// The whole collection for `kind`, in storage order.
    fn read_all(&self, kind: EntityKind) -> Result<Vec<Fields>, StoreError>;

    fn read(&self, kind: EntityKind, id: &str) -> Result<Option<Fields>, StoreError>;

    /// Merges `fields` into the entity with `id`. The id itself is never
    /// rewritten.
    fn update(&self, kind: EntityKind, id: &str, fields: Fields) -> Result<bool, StoreError>;

    fn delete(&self, kind: EntityKind, id: &str) -> Result<bool, StoreError>;

    fn create_entity<E: Entity>(&self, entity: &E) -> Result<(), StoreError>
    where
        Self: Sized,
    {
        self.create(E::KIND, to_fields(entity)?)
    }

    fn load_entity<E: Entity>(&self, id: &str) -> Result<Option<E>, StoreError>
    where
        Self: Sized,
    {
        self.read(E::KIND, id)?.map(from_fields::<E>).transpose()
    }

    fn load_all<E: Entity>(&self) -> Result<Vec<E>, StoreError>
    where
        Self: Sized,
    {
        self.read_all(E::KIND)?
            .into_iter()
            .map(from_fields::<E>)
            .collect()
    }

    fn replace_entity<E: Entity>(&self, entity: &E) -> Result<bool, StoreError>
    where
        Self: Sized,
    {
        self.update(E::KIND, &entity.id(), to_fields(entity)?)
    }

    /// Updates the entity if it is already stored, creates it otherwise.
    fn upsert_entity<E: Entity>(&self, entity: &E) -> Result<(), StoreError>
    where
        Self: Sized,
    {
        if !self.replace_entity(entity)? {
            self.create_entity(entity)?;
        }
        Ok(())
    }

    fn delete_entity<E: Entity>(&self, id: &str) -> Result<bool, StoreError>
    where
        Self: Sized,
    {
        self.delete(E::KIND, id)
    }
}

/// In-memory layout of the store file: one array per entity kind.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StoreDocument {
    #[serde(default)]
    pub users: Vec<Fields>,
    #[serde(default)]
    pub habits: Vec<Fields>,
    #[serde(default)]
    pub habit_records: Vec<Fields>,
    #[serde(default)]
    pub reminders: Vec<Fields>,
}

impl StoreDocument {
    pub fn collection(&self, kind: EntityKind) -> &[Fields] {
        match kind {
            EntityKind::Users => &self.users,
            EntityKind::Habits => &self.habits,
            EntityKind::HabitRecords => &self.habit_records,
            EntityKind::Reminders => &self.reminders,
        }
    }

    fn collection_mut(&mut self, kind: EntityKind) -> &mut Vec<Fields> {
        match kind {
            EntityKind::Users => &mut self.users,
            EntityKind::Habits => &mut self.habits,
            EntityKind::HabitRecords => &mut self.habit_records,
            EntityKind::Reminders => &mut self.reminders,
        }
    }

    fn position(&self, kind: EntityKind, id: &str) -> Option<usize> {
        self.collection(kind)
            .iter()
            .position(|fields| fields.get(ID_FIELD).and_then(Value::as_str) == Some(id))
    }

    fn insert(&mut self, kind: EntityKind, fields: Fields) -> Result<(), StoreError> {
        if let Some(id) = fields.get(ID_FIELD).and_then(Value::as_str) {
            if self.position(kind, id).is_some() {
                return Err(StoreError::DuplicateId {
                    kind: kind.key(),
                    id: id.to_string(),
                });
            }
        }
        self.collection_mut(kind).push(fields);
        Ok(())
    }

    fn get(&self, kind: EntityKind, id: &str) -> Option<Fields> {
        self.position(kind, id)
            .map(|idx| self.collection(kind)[idx].clone())
    }

    fn merge(&mut self, kind: EntityKind, id: &str, fields: Fields) -> bool {
        let Some(idx) = self.position(kind, id) else {
            return false;
        };
        let entity = &mut self.collection_mut(kind)[idx];
        for (key, value) in fields {
            if key != ID_FIELD {
                entity.insert(key, value);
            }
        }
        true
    }

    fn remove(&mut self, kind: EntityKind, id: &str) -> bool {
        let Some(idx) = self.position(kind, id) else {
            return false;
        };
        self.collection_mut(kind).remove(idx);
        true
    }
}

/// Store backed by a single JSON document on disk.
///
/// Every mutation rewrites the whole file. There is no protection against a
/// second process writing the same file; the last writer wins.
pub struct JsonFileStore {
    path: PathBuf,
    document: RwLock<StoreDocument>,
}

impl JsonFileStore {
    /// Opens the store at `path`, creating an empty skeleton when the file is
    /// missing.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let document = if path.exists() {
            Self::load(&path)?
        } else {
            tracing::info!(path = %path.display(), "creating empty habit store");
            let document = StoreDocument::default();
            Self::write(&path, &document)?;
            document
        };
        Ok(Self {
            path,
            document: RwLock::new(document),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Discards in-memory state and re-reads the file.
    pub fn reload(&self) -> Result<(), StoreError> {
        let document = Self::load(&self.path)?;
        *self.document.write() = document;
        Ok(())
    }

    pub fn snapshot(&self) -> StoreDocument {
        self.document.read().clone()
    }

    fn load(path: &Path) -> Result<StoreDocument, StoreError> {
        let raw = fs::read_to_string(path).map_err(|err| StoreError::io(path, err))?;
        if raw.trim().is_empty() {
            return Ok(StoreDocument::default());
        }
        let document: StoreDocument = serde_json::from_str(&raw)?;
        tracing::debug!(
            path = %path.display(),
            users = document.users.len(),
            habits = document.habits.len(),
            "loaded habit store"
        );
        Ok(document)
    }

    fn write(path: &Path, document: &StoreDocument) -> Result<(), StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|err| StoreError::io(parent, err))?;
            }
        }
        let payload = serde_json::to_vec_pretty(document)?;
        let staging = path.with_extension("json.tmp");
        fs::write(&staging, payload).map_err(|err| StoreError::io(&staging, err))?;
        fs::rename(&staging, path).map_err(|err| StoreError::io(path, err))?;
        Ok(())
    }

    fn mutate(
        &self,
        apply: impl FnOnce(&mut StoreDocument) -> Result<bool, StoreError>,
    ) -> Result<bool, StoreError> {
        let mut document = self.document.write();
        let mut next = document.clone();
        if !apply(&mut next)? {
            return Ok(false);
        }
        Self::write(&self.path, &next)?;
        *document = next;
        Ok(true)
    }
}

impl Store for JsonFileStore {
    fn create(&self, kind: EntityKind, fields: Fields) -> Result<(), StoreError> {
        self.mutate(|doc| doc.insert(kind, fields).map(|()| true))?;
        Ok(())
    }

    fn read_all(&self, kind: EntityKind) -> Result<Vec<Fields>, StoreError> {
        Ok(self.document.read().collection(kind).to_vec())
    }

    fn read(&self, kind: EntityKind, id: &str) -> Result<Option<Fields>, StoreError> {
        Ok(self.document.read().get(kind, id))
    }

    fn update(&self, kind: EntityKind, id: &str, fields: Fields) -> Result<bool, StoreError> {
        self.mutate(|doc| Ok(doc.merge(kind, id, fields)))
    }

    fn delete(&self, kind: EntityKind, id: &str) -> Result<bool, StoreError> {
        self.mutate(|doc| Ok(doc.remove(kind, id)))
    }
}

/// Store that keeps everything in memory.
#[derive(Default)]
pub struct MemoryStore {
    document: RwLock<StoreDocument>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> StoreDocument {
        self.document.read().clone()
    }
}

impl Store for MemoryStore {
    fn create(&self, kind: EntityKind, fields: Fields) -> Result<(), StoreError> {
        self.document.write().insert(kind, fields)
    }

    fn read_all(&self, kind: EntityKind) -> Result<Vec<Fields>, StoreError> {
        Ok(self.document.read().collection(kind).to_vec())
    }

    fn read(&self, kind: EntityKind, id: &str) -> Result<Option<Fields>, StoreError> {
        Ok(self.document.read().get(kind, id))
    }

    fn update(&self, kind: EntityKind, id: &str, fields: Fields) -> Result<bool, StoreError> {
        Ok(self.document.write().merge(kind, id, fields))
    }

    fn delete(&self, kind: EntityKind, id: &str) -> Result<bool, StoreError> {
        Ok(self.document.write().remove(kind, id))
    }
}
