use std::sync::Arc;
use std::time::Duration;

use itertools::Itertools;

use crate::error::BridgeResult;
use crate::model::{Command, Reading, StateValue};
use crate::store::{ObjectMeta, ObjectStore};

/// Maps extracted records onto persisted entities: create vs. patch vs.
/// no-op, plus the bounds-repair policy for historically malformed
/// metadata. Idempotent — reconciling identical derived data twice only
/// writes the value the second time.
pub struct Reconciler {
    store: Arc<dyn ObjectStore>,
    /// Expiry for `statistics.` branch values (2x value poll interval).
    value_expiry: Duration,
    /// Expiry for `settings.` branch values (2x command poll interval).
    command_expiry: Duration,
}

/// Store path for a record: branch, translated group segments, key.
#[must_use]
pub fn entity_path(branch: &str, group_path: &[String], key: &str) -> String {
    let mut segments = Vec::with_capacity(group_path.len() + 2);
    segments.push(branch);
    segments.extend(group_path.iter().map(String::as_str).filter(|s| !s.is_empty()));
    segments.push(key);
    segments.iter().join(".")
}

impl Reconciler {
    pub const SETTINGS_BRANCH: &'static str = "settings";
    pub const STATISTICS_BRANCH: &'static str = "statistics";

    #[must_use]
    pub fn new(
        store: Arc<dyn ObjectStore>,
        value_interval: Duration,
        command_interval: Duration,
    ) -> Self {
        Self {
            store,
            value_expiry: value_interval * 2,
            command_expiry: command_interval * 2,
        }
    }

    /// Expiry by path branch: entities under `settings.` age with the
    /// command poll, everything else with the value/status poll.
    fn expiry_for(&self, path: &str) -> Duration {
        if path.starts_with(Self::SETTINGS_BRANCH) {
            self.command_expiry
        } else {
            self.value_expiry
        }
    }

    /// Persist a Reading: idempotent create-if-absent, then an
    /// unconditional value write with expiry.
    pub async fn apply_reading(&self, path: &str, reading: &Reading) -> BridgeResult<()> {
        let meta = ObjectMeta {
            name: reading.display_name.clone(),
            kind: reading.kind,
            read: true,
            write: false,
            unit: reading.unit.clone(),
            role: reading.role.clone(),
            min: None,
            max: None,
            states: None,
            source_name: None,
        };
        self.store.ensure_object(path, meta).await?;
        self.store
            .set_value(path, reading.value.clone(), true, Some(self.expiry_for(path)))
            .await
    }

    /// Persist a Command: create with full metadata when absent, else
    /// field-by-field compare and patch only on difference (identity is
    /// preserved; the entity is never destroyed and recreated). A
    /// previously-present `min`/`max` the desired set no longer carries
    /// is removed by the patch — the repair for stored zero bounds.
    pub async fn apply_command(&self, path: &str, command: &Command) -> BridgeResult<()> {
        let desired = ObjectMeta {
            name: command.display_name.clone(),
            kind: command.kind,
            read: true,
            write: true,
            unit: command.unit.clone(),
            role: command.role.clone(),
            min: command.min,
            max: command.max,
            states: command.states.clone(),
            source_name: Some(command.source_name.clone()),
        };

        match self.store.get_meta(path).await? {
            None => {
                self.store.ensure_object(path, desired).await?;
            }
            Some(existing) => {
                if meta_differs(&existing, &desired) {
                    log::debug!("Patching metadata of {path}");
                    self.store.update_meta(path, desired).await?;
                }
            }
        }

        let value = self.clamped(path, command.value.clone()).await?;
        self.store
            .set_value(path, value, true, Some(self.expiry_for(path)))
            .await
    }

    /// Clamp a numeric value against the entity's declared bounds
    /// before writing. Below `min` clamps to `min`; above `max` also
    /// clamps to `min`, mirroring the device's own display widget.
    async fn clamped(&self, path: &str, value: StateValue) -> BridgeResult<StateValue> {
        let Some(number) = value.as_number() else {
            return Ok(value);
        };
        let Some(meta) = self.store.get_meta(path).await? else {
            return Ok(value);
        };

        if let Some(min) = meta.min {
            if number < min {
                log::debug!("Clamping {path} value {number} below min to {min}");
                return Ok(StateValue::Number(min));
            }
            if let Some(max) = meta.max {
                if number > max {
                    log::debug!("Clamping {path} value {number} above max to {min}");
                    return Ok(StateValue::Number(min));
                }
            }
        }
        Ok(value)
    }
}

/// Field-by-field metadata comparison: scalars by string form, the
/// states mapping structurally.
fn meta_differs(existing: &ObjectMeta, desired: &ObjectMeta) -> bool {
    fn scalar(v: Option<f64>) -> String {
        v.map(|x| x.to_string()).unwrap_or_default()
    }

    existing.name != desired.name
        || existing.kind != desired.kind
        || existing.read != desired.read
        || existing.write != desired.write
        || existing.unit != desired.unit
        || existing.role != desired.role
        || scalar(existing.min) != scalar(desired.min)
        || scalar(existing.max) != scalar(desired.max)
        || existing.states != desired.states
        || existing.source_name != desired.source_name
}
