//! The contract shared by every algorithm: identity, trained flag, reset,
//! clear, last error, telemetry and persistence.

use std::{
    fmt,
    fs::File,
    io::{BufReader, BufWriter, Read, Write},
    path::Path,
};

use parking_lot::RwLock;
use serde_json::{json, Value};
use shared_logging::LogLevel;

use crate::{
    error::{ModuleError, Result},
    persist::ModelRecord,
    telemetry::{Telemetry, TRAINING_COMPLETED, TRAINING_FAILED, TRAINING_STARTED},
};

/// Common capability set of every module.
pub trait Module: fmt::Debug + Send + Sync {
    /// Registry identifier, constant per type.
    fn id(&self) -> &'static str;

    /// Shared bookkeeping.
    fn base(&self) -> &ModuleBase;

    /// Shared bookkeeping, mutable.
    fn base_mut(&mut self) -> &mut ModuleBase;

    /// True once training succeeded and until `clear`.
    fn trained(&self) -> bool;

    /// Reinitialises runtime buffers and counters, keeping hyperparameters
    /// and trained state.
    fn reset(&mut self) -> Result<()> {
        Ok(())
    }

    /// Discards trained state.
    fn clear(&mut self);

    /// Hyperparameters as a JSON block.
    fn encode_settings(&self) -> Result<Value>;

    /// Trained state as a JSON block; `None` when untrained.
    fn encode_state(&self) -> Result<Option<Value>>;

    /// Replaces hyperparameters and trained state.
    ///
    /// Implementations parse every block before assigning anything so a
    /// failed decode leaves the module untouched.
    fn decode(&mut self, settings: Value, state: Option<Value>) -> Result<()>;

    /// Message of the most recent failure.
    fn last_error(&self) -> Option<String> {
        self.base().last_error()
    }

    /// Attaches telemetry; records are stamped with this module's id.
    fn set_telemetry(&mut self, telemetry: &Telemetry) {
        let scoped = telemetry.scoped(self.id());
        self.base_mut().set_telemetry(scoped);
    }

    /// Overlays hyperparameters from a JSON object, discarding trained state.
    ///
    /// Keys missing from `overrides` keep their current values; unknown keys
    /// are refused.
    fn configure(&mut self, overrides: Value) -> Result<()> {
        let result = self.encode_settings().and_then(|current| {
            let merged = overlay_settings(current, overrides)?;
            self.decode(merged, None)
        });
        self.base().record(result)
    }

    /// Writes a model record.
    fn save(&self, writer: &mut dyn Write) -> Result<()> {
        let result = ModelRecord::from_module(self)
            .and_then(|record| record.write_to(writer).map_err(ModuleError::from));
        self.base().record(result)
    }

    /// Reads a model record written by a module of the same type.
    fn load(&mut self, reader: &mut dyn Read) -> Result<()> {
        let result = ModelRecord::read_from(reader)
            .map_err(ModuleError::from)
            .and_then(|record| record.apply_to(self));
        self.base().record(result)
    }

    /// Writes a model record to `path`.
    fn save_to_file(&self, path: &Path) -> Result<()> {
        let result = File::create(path)
            .map_err(|err| ModuleError::from(crate::error::PersistError::Io(err)))
            .and_then(|file| {
                let mut writer = BufWriter::new(file);
                ModelRecord::from_module(self)?.write_to(&mut writer)?;
                writer
                    .flush()
                    .map_err(|err| crate::error::PersistError::Io(err).into())
            });
        self.base().record(result)
    }

    /// Reads a model record from `path`.
    fn load_from_file(&mut self, path: &Path) -> Result<()> {
        let result = File::open(path)
            .map_err(|err| ModuleError::from(crate::error::PersistError::Io(err)))
            .and_then(|file| {
                let record = ModelRecord::read_from(&mut BufReader::new(file))?;
                record.apply_to(self)
            });
        self.base().record(result)
    }
}

/// State every module embeds: id, telemetry and the last error message.
#[derive(Debug)]
pub struct ModuleBase {
    id: &'static str,
    telemetry: Telemetry,
    last_error: RwLock<Option<String>>,
}

impl Clone for ModuleBase {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            telemetry: self.telemetry.clone(),
            last_error: RwLock::new(self.last_error.read().clone()),
        }
    }
}

impl ModuleBase {
    /// Creates the base for a module type.
    #[must_use]
    pub fn new(id: &'static str) -> Self {
        Self {
            id,
            telemetry: Telemetry::detached(),
            last_error: RwLock::new(None),
        }
    }

    /// Owning module's id.
    #[must_use]
    pub const fn id(&self) -> &'static str {
        self.id
    }

    /// Attached telemetry.
    #[must_use]
    pub const fn telemetry(&self) -> &Telemetry {
        &self.telemetry
    }

    /// Replaces the telemetry handle.
    pub fn set_telemetry(&mut self, telemetry: Telemetry) {
        self.telemetry = telemetry;
    }

    /// Message of the most recent failure.
    #[must_use]
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    /// Stores the message of a failed result and passes the result through.
    pub fn record<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(err) = &result {
            let message = err.to_string();
            self.log(
                LogLevel::Error,
                "operation.failed",
                json!({ "error": message }),
            );
            *self.last_error.write() = Some(message);
        }
        result
    }

    /// Best-effort structured log.
    pub fn log(&self, level: LogLevel, message: &str, metadata: Value) {
        if let Err(err) = self.telemetry.log(level, message, metadata) {
            eprintln!("{} telemetry log failed: {err:?}", self.id);
        }
    }

    /// Best-effort event emission.
    pub fn event(&self, event_type: &str, payload: Value) {
        if let Err(err) = self.telemetry.event(event_type, payload) {
            eprintln!("{} telemetry event failed: {err:?}", self.id);
        }
    }

    /// Announces a training run.
    pub fn training_started(&self, num_samples: usize, num_dimensions: usize) {
        let payload = json!({ "samples": num_samples, "dimensions": num_dimensions });
        self.log(LogLevel::Info, TRAINING_STARTED, payload.clone());
        self.event(TRAINING_STARTED, payload);
    }

    /// Reports the outcome of a training run and records any failure.
    pub fn training_finished<T>(&self, outcome: Result<T>) -> Result<T> {
        match &outcome {
            Ok(_) => {
                self.log(LogLevel::Info, TRAINING_COMPLETED, Value::Null);
                self.event(TRAINING_COMPLETED, json!({ "trained": true }));
            }
            Err(err) => self.event(TRAINING_FAILED, json!({ "error": err.to_string() })),
        }
        self.record(outcome)
    }
}

/// Overlays the keys of `overrides` onto a settings object.
fn overlay_settings(current: Value, overrides: Value) -> Result<Value> {
    let Value::Object(mut settings) = current else {
        return Err(ModuleError::InvalidData(
            "module settings are not a JSON object".into(),
        ));
    };
    match overrides {
        Value::Null => {}
        Value::Object(values) => {
            for (key, value) in values {
                match settings.get_mut(&key) {
                    Some(Value::Object(nested)) if value.is_object() => {
                        let merged = overlay_settings(Value::Object(nested.clone()), value)?;
                        settings.insert(key, merged);
                    }
                    Some(slot) => *slot = value,
                    None => {
                        return Err(ModuleError::InvalidData(format!(
                            "unknown setting `{key}`"
                        )))
                    }
                }
            }
        }
        other => {
            return Err(ModuleError::InvalidData(format!(
                "settings must be a table, got {other}"
            )))
        }
    }
    Ok(Value::Object(settings))
}

/// Fails unless `input` has `expected` dimensions.
pub fn check_dimensions(expected: usize, input: &[f64]) -> Result<()> {
    if input.len() == expected {
        Ok(())
    } else {
        Err(ModuleError::DimensionMismatch {
            expected,
            actual: input.len(),
        })
    }
}

/// Implements `clone_box` and `Clone for Box<dyn Trait>` for a capability trait.
macro_rules! boxed_clone {
    ($capability:ident) => {
        impl Clone for Box<dyn $capability> {
            fn clone(&self) -> Self {
                self.clone_box()
            }
        }
    };
}
pub(crate) use boxed_clone;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overlay_keeps_missing_keys_and_refuses_unknown() {
        let current = json!({ "k": 3, "null_rejection": { "enabled": false, "coeff": 5.0 } });
        let merged =
            overlay_settings(current.clone(), json!({ "null_rejection": { "enabled": true } }))
                .unwrap();
        assert_eq!(merged["k"], 3);
        assert_eq!(merged["null_rejection"]["enabled"], true);
        assert_eq!(merged["null_rejection"]["coeff"], 5.0);
        assert!(overlay_settings(current.clone(), json!({ "bogus": 1 })).is_err());
        assert!(overlay_settings(current, json!(4)).is_err());
    }

    #[test]
    fn base_records_failures() {
        let base = ModuleBase::new("KNN");
        assert!(base.last_error().is_none());
        let outcome: Result<()> = base.record(Err(ModuleError::EmptyDataset));
        assert!(outcome.is_err());
        assert_eq!(base.last_error().as_deref(), Some("dataset has no samples"));
        let copy = base.clone();
        assert_eq!(copy.last_error(), base.last_error());
    }

    #[test]
    fn dimension_check() {
        assert!(check_dimensions(2, &[1.0, 2.0]).is_ok());
        assert!(matches!(
            check_dimensions(3, &[1.0]),
            Err(ModuleError::DimensionMismatch { expected: 3, actual: 1 })
        ));
    }
}
