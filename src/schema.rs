//! Extraction schemas: the per-kind field sets that queries, notes and
//! reviews are all shaped by.
//!
//! The registry is static. Narrowing to a search focus always produces a
//! new schema value; the canonical schemas are never touched.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;
use tracing::warn;

use crate::error::GenerationError;
use crate::record::Record;
use crate::target::TargetKind;

/// Placeholder for scalar fields the sources say nothing about.
pub const NOT_AVAILABLE: &str = "Not Available";

pub fn is_sentinel_str(s: &str) -> bool {
    s.trim().eq_ignore_ascii_case(NOT_AVAILABLE)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    String,
    Number,
    Integer,
    Boolean,
    StringList,
}

impl FieldKind {
    /// Value recorded when nothing is known: "Not Available" for scalars,
    /// an empty list for lists.
    pub fn sentinel(&self) -> Value {
        match self {
            FieldKind::StringList => Value::Array(Vec::new()),
            FieldKind::String | FieldKind::Number | FieldKind::Integer | FieldKind::Boolean => {
                Value::String(NOT_AVAILABLE.to_string())
            }
        }
    }

    pub fn is_sentinel(&self, value: &Value) -> bool {
        match (self, value) {
            (FieldKind::StringList, Value::Array(items)) => items.is_empty(),
            (_, Value::String(s)) => is_sentinel_str(s),
            _ => false,
        }
    }

    // Non-string scalars also admit a string so the model can emit the sentinel.
    fn json_schema(&self) -> Value {
        match self {
            FieldKind::String => json!({ "type": "string" }),
            FieldKind::Number => json!({ "type": ["number", "string"] }),
            FieldKind::Integer => json!({ "type": ["integer", "string"] }),
            FieldKind::Boolean => json!({ "type": ["boolean", "string"] }),
            FieldKind::StringList => json!({ "type": "array", "items": { "type": "string" } }),
        }
    }

    fn coerce(&self, value: Value) -> Value {
        match (self, value) {
            (FieldKind::Number | FieldKind::Integer, Value::String(s)) if !is_sentinel_str(&s) => {
                let trimmed = s.trim();
                if let Ok(n) = trimmed.parse::<i64>() {
                    Value::Number(n.into())
                } else if let Some(n) = trimmed.parse::<f64>().ok().and_then(serde_json::Number::from_f64) {
                    Value::Number(n)
                } else {
                    Value::String(s)
                }
            }
            (FieldKind::Boolean, Value::String(s)) if !is_sentinel_str(&s) => {
                match s.trim().to_lowercase().as_str() {
                    "true" | "yes" => Value::Bool(true),
                    "false" | "no" => Value::Bool(false),
                    _ => Value::String(s),
                }
            }
            (FieldKind::StringList, Value::String(s)) if is_sentinel_str(&s) => Value::Array(Vec::new()),
            (_, other) => other,
        }
    }

    fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (FieldKind::String, Value::String(_)) => true,
            (FieldKind::Number, Value::Number(_)) => true,
            (FieldKind::Integer, Value::Number(n)) => {
                n.is_i64() || n.is_u64() || n.as_f64().map(|f| f.fract() == 0.0).unwrap_or(false)
            }
            (FieldKind::Boolean, Value::Bool(_)) => true,
            (FieldKind::StringList, Value::Array(items)) => items.iter().all(Value::is_string),
            (FieldKind::Number | FieldKind::Integer | FieldKind::Boolean, Value::String(s)) => is_sentinel_str(s),
            _ => false,
        }
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FieldKind::String => "string",
            FieldKind::Number => "number",
            FieldKind::Integer => "integer",
            FieldKind::Boolean => "boolean",
            FieldKind::StringList => "list of strings",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub kind: FieldKind,
    pub description: String,
    pub required: bool,
}

impl FieldSpec {
    fn required(name: &str, kind: FieldKind, description: &str) -> Self {
        Self {
            name: name.to_string(),
            kind,
            description: description.to_string(),
            required: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionSchema {
    pub title: String,
    pub description: String,
    pub fields: Vec<FieldSpec>,
}

impl ExtractionSchema {
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn field_names(&self) -> Vec<String> {
        self.fields.iter().map(|f| f.name.clone()).collect()
    }

    pub fn required_fields(&self) -> Vec<String> {
        self.fields
            .iter()
            .filter(|f| f.required)
            .map(|f| f.name.clone())
            .collect()
    }

    pub fn narrow(&self, focus: &[String]) -> ExtractionSchema {
        narrow(self, focus)
    }

    /// Keeps only known field names, drops duplicates and orders them as the
    /// schema does.
    pub fn canonical_fields<'a, I>(&self, names: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'a String>,
    {
        let wanted: Vec<&String> = names.into_iter().collect();
        self.fields
            .iter()
            .filter(|f| wanted.iter().any(|w| w.as_str() == f.name))
            .map(|f| f.name.clone())
            .collect()
    }

    /// JSON Schema handed to constrained generation.
    pub fn to_json_schema(&self) -> Value {
        let mut properties = Map::new();
        for field in &self.fields {
            let mut property = field.kind.json_schema();
            if let Value::Object(obj) = &mut property {
                obj.insert("description".to_string(), Value::String(field.description.clone()));
            }
            properties.insert(field.name.clone(), property);
        }

        json!({
            "title": self.title,
            "description": self.description,
            "type": "object",
            "properties": properties,
            "required": self.required_fields(),
            "additionalProperties": false,
        })
    }

    /// A record with every field set to its sentinel.
    pub fn empty_record(&self) -> Record {
        let mut record = Record::new();
        for field in &self.fields {
            record.set(&field.name, field.kind.sentinel());
        }
        record
    }

    /// Validates a generated object against the field set.
    ///
    /// Unknown keys and values of the wrong JSON type are rejected. Fields
    /// the provider left out (or sent as null) are filled with their
    /// sentinel so the reviewer sees them as missing.
    pub fn conform(&self, value: Value) -> Result<Record, GenerationError> {
        let Value::Object(mut object) = value else {
            return Err(GenerationError::SchemaViolation(format!(
                "expected a JSON object for {}",
                self.title
            )));
        };

        if let Some(extra) = object.keys().find(|k| self.field(k.as_str()).is_none()) {
            return Err(GenerationError::SchemaViolation(format!(
                "unexpected field '{}' for {}",
                extra, self.title
            )));
        }

        let mut record = Record::new();
        for field in &self.fields {
            let value = match object.remove(&field.name) {
                None | Some(Value::Null) => {
                    warn!(field = %field.name, schema = %self.title, "model omitted field, recording sentinel");
                    field.kind.sentinel()
                }
                Some(value) => field.kind.coerce(value),
            };

            if !field.kind.accepts(&value) {
                return Err(GenerationError::SchemaViolation(format!(
                    "field '{}' expected {}, got {}",
                    field.name, field.kind, value
                )));
            }
            record.set(&field.name, value);
        }

        Ok(record)
    }
}

/// Restricts `schema` to the fields named in `focus`, all of them required.
/// An empty focus means "everything" and yields the full schema.
pub fn narrow(schema: &ExtractionSchema, focus: &[String]) -> ExtractionSchema {
    if focus.is_empty() {
        return schema.clone();
    }

    let fields = schema
        .fields
        .iter()
        .filter(|f| focus.iter().any(|name| name == &f.name))
        .map(|f| FieldSpec { required: true, ..f.clone() })
        .collect();

    ExtractionSchema {
        title: schema.title.clone(),
        description: schema.description.clone(),
        fields,
    }
}

static PERSON_SCHEMA: Lazy<ExtractionSchema> = Lazy::new(|| ExtractionSchema {
    title: "Person".to_string(),
    description: "Professional information about a person".to_string(),
    fields: vec![
        FieldSpec::required(
            "linkedin_profile",
            FieldKind::String,
            "URL of the person's LinkedIn profile.",
        ),
        FieldSpec::required("role", FieldKind::String, "The person's current job title."),
        FieldSpec::required("work_email", FieldKind::String, "The person's work email address."),
        FieldSpec::required(
            "current_company",
            FieldKind::String,
            "Name of the company the person currently works for.",
        ),
        FieldSpec::required(
            "companies",
            FieldKind::StringList,
            "Every company the person has worked for, the current one included.",
        ),
        FieldSpec::required(
            "years_experience",
            FieldKind::Number,
            "Total years of full-time work experience, internships excluded.",
        ),
    ],
});

static COMPANY_SCHEMA: Lazy<ExtractionSchema> = Lazy::new(|| ExtractionSchema {
    title: "CompanyInfo".to_string(),
    description: "Basic information about a company".to_string(),
    fields: vec![
        FieldSpec::required("name", FieldKind::String, "Official name of the company."),
        FieldSpec::required(
            "description",
            FieldKind::String,
            "Short overview of what the company does.",
        ),
        FieldSpec::required("website", FieldKind::String, "The company's website."),
        FieldSpec::required(
            "linkedin_url",
            FieldKind::String,
            "URL of the company's LinkedIn page.",
        ),
        FieldSpec::required(
            "crunchbase_profile",
            FieldKind::String,
            "URL of the company's Crunchbase profile.",
        ),
        FieldSpec::required("year_founded", FieldKind::Integer, "Year the company was founded."),
        FieldSpec::required("ceo", FieldKind::String, "Current CEO of the company."),
        FieldSpec::required(
            "founder_names",
            FieldKind::StringList,
            "Names of the founding team members.",
        ),
        FieldSpec::required(
            "product_description",
            FieldKind::String,
            "Short description of the main product or service.",
        ),
        FieldSpec::required(
            "funding_summary",
            FieldKind::String,
            "Summary of the company's funding history, latest round first.",
        ),
    ],
});

/// The canonical schema for a target kind.
pub fn for_kind(kind: TargetKind) -> &'static ExtractionSchema {
    match kind {
        TargetKind::Person => &PERSON_SCHEMA,
        TargetKind::Company => &COMPANY_SCHEMA,
    }
}
