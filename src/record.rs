use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A schema-shaped research record: one value per field name.
///
/// Used both for a single pass's notes and for the information accumulated
/// across passes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(Map<String, Value>);

impl Record {
    pub fn new() -> Self {
        Self(Map::new())
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn set(&mut self, field: &str, value: Value) {
        self.0.insert(field.to_string(), value);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.0.values()
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone())
    }

    /// Folds one pass's notes into the accumulated record.
    ///
    /// The first pass replaces everything. Later passes overwrite only the
    /// fields in `focus`; everything else keeps its accumulated value.
    pub fn merge_focus(&mut self, notes: &Record, focus: &[String], first_pass: bool) {
        if first_pass {
            *self = notes.clone();
            return;
        }

        for field in focus {
            if let Some(value) = notes.get(field) {
                self.set(field, value.clone());
            }
        }
    }
}

impl From<Map<String, Value>> for Record {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl From<Record> for Value {
    fn from(record: Record) -> Self {
        Value::Object(record.0)
    }
}
