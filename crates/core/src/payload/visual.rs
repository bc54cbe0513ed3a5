//! Visual (schema-driven) payload generation.

use std::sync::LazyLock;

use rand::seq::IndexedRandom;
use rand::Rng;
use regex::Regex;
use serde_json::{Map, Number, Value};

use super::schema::{FieldSpec, FieldType, GeneratorSpec};
use super::{GenerationContext, GeneratorError};

/// Matches `{{ key }}` placeholders inside template generators.
static TEMPLATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_.]*)\s*\}\}").expect("valid regex")
});

/// Generates payloads from an ordered field schema.
///
/// Holds per-field counters for `sequence` generators, so each Device Runner
/// owns its own instance.
#[derive(Debug, Clone)]
pub struct VisualGenerator {
    fields: Vec<FieldSpec>,
    counters: Vec<i64>,
}

impl VisualGenerator {
    pub fn new(fields: Vec<FieldSpec>) -> Self {
        let counters = fields
            .iter()
            .map(|f| match f.generator {
                GeneratorSpec::Sequence { start, .. } => start,
                _ => 0,
            })
            .collect();
        Self { fields, counters }
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    /// Produce one JSON object. Keys follow schema order.
    pub fn generate(&mut self, ctx: &GenerationContext) -> Result<Value, GeneratorError> {
        let mut rng = rand::rng();
        let mut out = Map::with_capacity(self.fields.len());

        for (idx, field) in self.fields.iter().enumerate() {
            let raw = match &field.generator {
                GeneratorSpec::Fixed { value } => value.clone(),
                GeneratorSpec::RandomInt { min, max } => {
                    if min > max {
                        return Err(invalid_range(&field.name));
                    }
                    Value::from(rng.random_range(*min..=*max))
                }
                GeneratorSpec::RandomFloat { min, max, decimals } => {
                    if min > max || !(max - min).is_finite() {
                        return Err(invalid_range(&field.name));
                    }
                    let v = if min == max {
                        *min
                    } else {
                        rng.random_range(*min..=*max)
                    };
                    float_value(round_to(v, *decimals).clamp(*min, *max), &field.name)?
                }
                GeneratorSpec::RandomChoice { choices } => choices
                    .choose(&mut rng)
                    .cloned()
                    .ok_or_else(|| GeneratorError::InvalidSchema(format!(
                        "field '{}' has no choices",
                        field.name
                    )))?,
                GeneratorSpec::RandomBool => Value::Bool(rng.random_bool(0.5)),
                GeneratorSpec::Uuid => Value::String(uuid::Uuid::new_v4().to_string()),
                GeneratorSpec::Timestamp => Value::String(ctx.now().to_rfc3339()),
                GeneratorSpec::Sequence { step, .. } => {
                    let current = self.counters[idx];
                    self.counters[idx] = current.wrapping_add(*step);
                    Value::from(current)
                }
                GeneratorSpec::Template { template } => {
                    Value::String(render_template(template, ctx))
                }
            };
            out.insert(field.name.clone(), coerce(raw, field.field_type));
        }

        Ok(Value::Object(out))
    }
}

/// One-shot generation without sequence state.
pub fn generate_visual(
    fields: &[FieldSpec],
    ctx: &GenerationContext,
) -> Result<Value, GeneratorError> {
    VisualGenerator::new(fields.to_vec()).generate(ctx)
}

/// Fill `{{key}}` placeholders from the generation context.
///
/// `device_id` and `device_name` are always available; other keys come from
/// device metadata. Unknown keys are left untouched.
pub fn render_template(template: &str, ctx: &GenerationContext) -> String {
    TEMPLATE_RE
        .replace_all(template, |caps: &regex::Captures<'_>| {
            let key = &caps[1];
            match ctx.lookup(key) {
                Some(Value::String(s)) => s,
                Some(other) => other.to_string(),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

fn invalid_range(field: &str) -> GeneratorError {
    GeneratorError::InvalidSchema(format!("field '{field}' has an invalid range"))
}

fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() / factor
}

fn float_value(v: f64, field: &str) -> Result<Value, GeneratorError> {
    Number::from_f64(v).map(Value::Number).ok_or_else(|| {
        GeneratorError::SerializationError(format!("field '{field}' produced a non-finite number"))
    })
}

/// Convert a generated value to the field's declared type.
fn coerce(value: Value, field_type: FieldType) -> Value {
    match (field_type, value) {
        (FieldType::Number, Value::String(s)) => {
            if let Ok(i) = s.parse::<i64>() {
                Value::from(i)
            } else if let Some(n) = s.parse::<f64>().ok().and_then(Number::from_f64) {
                Value::Number(n)
            } else {
                Value::String(s)
            }
        }
        (FieldType::Number, Value::Bool(b)) => Value::from(u8::from(b)),
        (FieldType::Boolean, Value::Number(n)) => Value::Bool(n.as_f64().is_some_and(|f| f != 0.0)),
        (FieldType::Boolean, Value::String(s)) => match s.to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Value::Bool(true),
            "false" | "0" | "no" | "off" => Value::Bool(false),
            _ => Value::String(s),
        },
        (FieldType::String | FieldType::Uuid | FieldType::Timestamp, v @ (Value::Number(_) | Value::Bool(_))) => {
            Value::String(v.to_string())
        }
        (_, v) => v,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
