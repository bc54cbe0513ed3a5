//! Visual payload schema types and edit-time validation.
//!
//! A visual payload is an ordered list of [`FieldSpec`]s. Field names must be
//! unique; that is checked here when the schema is saved, never during
//! generation.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CoreError, FieldError};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Maximum number of decimal places a `random_float` generator may request.
pub const MAX_FLOAT_DECIMALS: u32 = 10;

/// Maximum number of fields in one visual schema.
pub const MAX_SCHEMA_FIELDS: usize = 200;

/// Decimals used when a `random_float` generator omits the value.
pub const DEFAULT_FLOAT_DECIMALS: u32 = 2;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// The declared output type of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    String,
    Number,
    Boolean,
    Uuid,
    Timestamp,
}

fn default_decimals() -> u32 {
    DEFAULT_FLOAT_DECIMALS
}

fn default_step() -> i64 {
    1
}

/// How a field's value is produced on each generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GeneratorSpec {
    /// Always the same literal.
    Fixed { value: Value },
    /// Uniform integer in `[min, max]`.
    RandomInt { min: i64, max: i64 },
    /// Uniform float in `[min, max]` rounded to `decimals` places.
    RandomFloat {
        min: f64,
        max: f64,
        #[serde(default = "default_decimals")]
        decimals: u32,
    },
    /// One element of `choices`, picked uniformly.
    RandomChoice { choices: Vec<Value> },
    RandomBool,
    /// Fresh v4 UUID.
    Uuid,
    /// Current UTC time in RFC 3339.
    Timestamp,
    /// Counter starting at `start`, advanced by `step` per generation.
    Sequence {
        #[serde(default)]
        start: i64,
        #[serde(default = "default_step")]
        step: i64,
    },
    /// String with `{{key}}` placeholders filled from device metadata.
    Template { template: String },
}

impl GeneratorSpec {
    /// Short name used in messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Fixed { .. } => "fixed",
            Self::RandomInt { .. } => "random_int",
            Self::RandomFloat { .. } => "random_float",
            Self::RandomChoice { .. } => "random_choice",
            Self::RandomBool => "random_bool",
            Self::Uuid => "uuid",
            Self::Timestamp => "timestamp",
            Self::Sequence { .. } => "sequence",
            Self::Template { .. } => "template",
        }
    }

    /// Whether the generator naturally produces values of `field_type`.
    fn natural_for(&self, field_type: FieldType) -> bool {
        match self {
            Self::Fixed { .. } | Self::RandomChoice { .. } | Self::Template { .. } => true,
            Self::RandomInt { .. } | Self::RandomFloat { .. } | Self::Sequence { .. } => {
                field_type == FieldType::Number
            }
            Self::RandomBool => field_type == FieldType::Boolean,
            Self::Uuid => matches!(field_type, FieldType::Uuid | FieldType::String),
            Self::Timestamp => matches!(field_type, FieldType::Timestamp | FieldType::String),
        }
    }
}

/// One field of a visual payload schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    pub generator: GeneratorSpec,
}

/// Outcome of checking a schema before it is saved.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SchemaReport {
    pub errors: Vec<FieldError>,
    pub warnings: Vec<FieldError>,
}

impl SchemaReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Parse a raw JSON value into an ordered field list.
pub fn parse_schema(raw: &Value) -> Result<Vec<FieldSpec>, CoreError> {
    serde_json::from_value(raw.clone())
        .map_err(|e| CoreError::Validation(format!("Invalid payload schema: {e}")))
}

/// Check a schema for structural errors and soft warnings.
pub fn check_schema(fields: &[FieldSpec]) -> SchemaReport {
    let mut report = SchemaReport::default();

    if fields.is_empty() {
        report
            .warnings
            .push(FieldError::new("schema", "Schema has no fields"));
    }
    if fields.len() > MAX_SCHEMA_FIELDS {
        report.errors.push(FieldError::new(
            "schema",
            format!("Schema has {} fields, maximum is {MAX_SCHEMA_FIELDS}", fields.len()),
        ));
    }

    let mut seen = HashSet::new();
    for (i, field) in fields.iter().enumerate() {
        let label = if field.name.is_empty() {
            format!("fields[{i}]")
        } else {
            field.name.clone()
        };

        if field.name.trim().is_empty() {
            report
                .errors
                .push(FieldError::new(&label, "Field name must not be empty"));
        } else if !seen.insert(field.name.as_str()) {
            report.errors.push(FieldError::new(
                &label,
                format!("Duplicate field name '{}'", field.name),
            ));
        }

        match &field.generator {
            GeneratorSpec::RandomInt { min, max } if min > max => {
                report.errors.push(FieldError::new(
                    &label,
                    format!("random_int min ({min}) must not exceed max ({max})"),
                ));
            }
            GeneratorSpec::RandomFloat { min, max, decimals } => {
                if !min.is_finite() || !max.is_finite() {
                    report
                        .errors
                        .push(FieldError::new(&label, "random_float bounds must be finite"));
                } else if !(max - min).is_finite() {
                    report.errors.push(FieldError::new(
                        &label,
                        "random_float range (max - min) is too large",
                    ));
                } else if min > max {
                    report.errors.push(FieldError::new(
                        &label,
                        format!("random_float min ({min}) must not exceed max ({max})"),
                    ));
                }
                if *decimals > MAX_FLOAT_DECIMALS {
                    report.errors.push(FieldError::new(
                        &label,
                        format!("decimals must be at most {MAX_FLOAT_DECIMALS} (got {decimals})"),
                    ));
                }
            }
            GeneratorSpec::RandomChoice { choices } if choices.is_empty() => {
                report
                    .errors
                    .push(FieldError::new(&label, "random_choice needs at least one choice"));
            }
            GeneratorSpec::Sequence { step: 0, .. } => {
                report
                    .warnings
                    .push(FieldError::new(&label, "sequence step is 0, value never changes"));
            }
            GeneratorSpec::Template { template } if template.is_empty() => {
                report
                    .errors
                    .push(FieldError::new(&label, "template must not be empty"));
            }
            _ => {}
        }

        if !field.generator.natural_for(field.field_type) {
            report.warnings.push(FieldError::new(
                &label,
                format!(
                    "{} generator output will be converted to {:?}",
                    field.generator.kind(),
                    field.field_type
                ),
            ));
        }
    }

    report
}

/// Validate a schema, failing on the first set of structural errors.
pub fn validate_schema(fields: &[FieldSpec]) -> Result<(), CoreError> {
    let report = check_schema(fields);
    if report.is_valid() {
        Ok(())
    } else {
        Err(CoreError::InvalidFields(report.errors))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
