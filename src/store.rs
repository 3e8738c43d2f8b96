use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast::{Receiver, Sender};

use crate::error::{BridgeError, BridgeResult};
use crate::model::{StateValue, ValueKind};

/// Metadata shape of a persisted entity.
///
/// `min`/`max` are either both sourced from the device or absent; a
/// stale zero left over from a historically defective write is exactly
/// what the reconciler's patch logic removes.
#[derive(Clone, Debug, PartialEq)]
pub struct ObjectMeta {
    pub name: String,
    pub kind: ValueKind,
    pub read: bool,
    pub write: bool,
    pub unit: String,
    pub role: String,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub states: Option<BTreeMap<String, String>>,
    /// Device-side form field name, for routing user writes back into
    /// the command batch. Absent on read-only entities.
    pub source_name: Option<String>,
}

/// A user-issued (non-acknowledged) write to a subscribed state.
#[derive(Clone, Debug)]
pub struct WriteEvent {
    pub path: String,
    pub value: StateValue,
}

/// Host persistence/object-store interface.
///
/// The reconciler is the sole writer; the store is the sole long-term
/// owner. `update_meta` patches metadata in place — implementations
/// must preserve the entity's identity and accumulated history.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Idempotent create-if-absent.
    async fn ensure_object(&self, path: &str, meta: ObjectMeta) -> BridgeResult<()>;

    async fn get_meta(&self, path: &str) -> BridgeResult<Option<ObjectMeta>>;

    /// Replace the metadata of an existing entity, keeping its identity
    /// and current value. Fails if the entity does not exist.
    async fn update_meta(&self, path: &str, meta: ObjectMeta) -> BridgeResult<()>;

    async fn set_value(
        &self,
        path: &str,
        value: StateValue,
        ack: bool,
        expire: Option<Duration>,
    ) -> BridgeResult<()>;

    /// Subscribe to user (non-acknowledged) writes.
    fn subscribe_writes(&self) -> Receiver<WriteEvent>;

    /// Connectivity flag, reflecting the most recent fetch outcome.
    async fn set_connected(&self, connected: bool);
}

/// Translation-table lookup for group labels (external collaborator).
pub trait Translator: Send + Sync {
    fn translate(&self, label: &str) -> Option<String>;
}

/// Identity translation.
pub struct NoTranslation;

impl Translator for NoTranslation {
    fn translate(&self, _label: &str) -> Option<String> {
        None
    }
}

#[derive(Clone, Debug)]
struct StoredObject {
    meta: ObjectMeta,
    value: Option<StoredValue>,
}

#[derive(Clone, Debug)]
pub struct StoredValue {
    pub value: StateValue,
    pub ack: bool,
    pub expire: Option<Duration>,
}

/// In-process store used for standalone runs and tests.
pub struct MemoryStore {
    objects: Mutex<HashMap<String, StoredObject>>,
    connected: Mutex<bool>,
    writes: Sender<WriteEvent>,
}

impl MemoryStore {
    const WRITE_BUFFER: usize = 64;

    #[must_use]
    pub fn new() -> Self {
        Self {
            objects: Mutex::new(HashMap::new()),
            connected: Mutex::new(false),
            writes: Sender::new(Self::WRITE_BUFFER),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, StoredObject>> {
        self.objects.lock().expect("memory store lock poisoned")
    }

    #[must_use]
    pub fn connected(&self) -> bool {
        *self.connected.lock().expect("memory store lock poisoned")
    }

    #[must_use]
    pub fn value(&self, path: &str) -> Option<StoredValue> {
        self.lock().get(path).and_then(|obj| obj.value.clone())
    }

    /// Inject a user write, as the host UI would.
    pub fn user_write(&self, path: &str, value: StateValue) {
        let _ = self.writes.send(WriteEvent {
            path: path.to_string(),
            value,
        });
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn ensure_object(&self, path: &str, meta: ObjectMeta) -> BridgeResult<()> {
        self.lock()
            .entry(path.to_string())
            .or_insert(StoredObject { meta, value: None });
        Ok(())
    }

    async fn get_meta(&self, path: &str) -> BridgeResult<Option<ObjectMeta>> {
        Ok(self.lock().get(path).map(|obj| obj.meta.clone()))
    }

    async fn update_meta(&self, path: &str, meta: ObjectMeta) -> BridgeResult<()> {
        match self.lock().get_mut(path) {
            Some(obj) => {
                obj.meta = meta;
                Ok(())
            }
            None => Err(BridgeError::Store(format!(
                "update_meta on missing object {path}"
            ))),
        }
    }

    async fn set_value(
        &self,
        path: &str,
        value: StateValue,
        ack: bool,
        expire: Option<Duration>,
    ) -> BridgeResult<()> {
        match self.lock().get_mut(path) {
            Some(obj) => {
                obj.value = Some(StoredValue {
                    value: value.clone(),
                    ack,
                    expire,
                });
            }
            None => {
                return Err(BridgeError::Store(format!(
                    "set_value on missing object {path}"
                )));
            }
        }

        if !ack {
            // Only user writes are broadcast; bridge writes are ack'ed.
            let _ = self.writes.send(WriteEvent {
                path: path.to_string(),
                value,
            });
        }
        Ok(())
    }

    fn subscribe_writes(&self) -> Receiver<WriteEvent> {
        self.writes.subscribe()
    }

    async fn set_connected(&self, connected: bool) {
        *self.connected.lock().expect("memory store lock poisoned") = connected;
    }
}
