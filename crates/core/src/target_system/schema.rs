//! Per-type configuration schemas.
//!
//! The schema returned by [`config_schema`] is what clients render forms
//! from. [`normalize_config`] checks a raw map against the same property
//! table, fills defaults and coerces form-style strings (`"1883"`, `"true"`)
//! into their declared types.

use serde_json::{json, Map, Value};

use super::TargetSystemType;
use crate::error::FieldError;

/// Placeholder shown in place of secret values.
pub const MASKED_VALUE: &str = "********";

// ---------------------------------------------------------------------------
// Property table
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropKind {
    String,
    Integer,
    Boolean,
    Object,
}

impl PropKind {
    fn json_type(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::Object => "object",
        }
    }
}

/// One configurable property of a target system type.
#[derive(Debug, Clone)]
pub struct PropertySpec {
    pub name: &'static str,
    pub kind: PropKind,
    pub title: &'static str,
    pub description: Option<&'static str>,
    pub required: bool,
    pub default: Option<Value>,
    pub enum_values: Vec<Value>,
    pub format: Option<&'static str>,
    /// Accepted URI schemes when `format` is `uri`.
    pub schemes: &'static [&'static str],
    pub minimum: Option<i64>,
    pub maximum: Option<i64>,
    pub secret: bool,
}

impl PropertySpec {
    fn new(name: &'static str, kind: PropKind, title: &'static str) -> Self {
        Self {
            name,
            kind,
            title,
            description: None,
            required: false,
            default: None,
            enum_values: Vec::new(),
            format: None,
            schemes: &[],
            minimum: None,
            maximum: None,
            secret: false,
        }
    }

    fn string(name: &'static str, title: &'static str) -> Self {
        Self::new(name, PropKind::String, title)
    }

    fn integer(name: &'static str, title: &'static str) -> Self {
        Self::new(name, PropKind::Integer, title)
    }

    fn boolean(name: &'static str, title: &'static str) -> Self {
        Self::new(name, PropKind::Boolean, title).default(json!(false))
    }

    fn object(name: &'static str, title: &'static str) -> Self {
        Self::new(name, PropKind::Object, title)
    }

    fn required(mut self) -> Self {
        self.required = true;
        self
    }

    fn describe(mut self, text: &'static str) -> Self {
        self.description = Some(text);
        self
    }

    fn default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    fn one_of(mut self, values: Vec<Value>) -> Self {
        self.enum_values = values;
        self
    }

    fn uri(mut self, schemes: &'static [&'static str]) -> Self {
        self.format = Some("uri");
        self.schemes = schemes;
        self
    }

    fn hostname(mut self) -> Self {
        self.format = Some("hostname");
        self
    }

    fn range(mut self, min: i64, max: i64) -> Self {
        self.minimum = Some(min);
        self.maximum = Some(max);
        self
    }

    fn secret(mut self) -> Self {
        self.secret = true;
        self.format = Some("password");
        self
    }

    fn to_json(&self) -> Value {
        let mut prop = Map::new();
        prop.insert("type".into(), json!(self.kind.json_type()));
        prop.insert("title".into(), json!(self.title));
        if let Some(d) = self.description {
            prop.insert("description".into(), json!(d));
        }
        if let Some(d) = &self.default {
            prop.insert("default".into(), d.clone());
        }
        if !self.enum_values.is_empty() {
            prop.insert("enum".into(), Value::Array(self.enum_values.clone()));
        }
        if let Some(f) = self.format {
            prop.insert("format".into(), json!(f));
        }
        if let Some(m) = self.minimum {
            prop.insert("minimum".into(), json!(m));
        }
        if let Some(m) = self.maximum {
            prop.insert("maximum".into(), json!(m));
        }
        Value::Object(prop)
    }
}

fn timeout_prop() -> PropertySpec {
    PropertySpec::integer("timeout", "Timeout (seconds)")
        .default(json!(30))
        .range(1, 300)
}

/// The property table for a target system type, in display order.
pub fn properties_for(system_type: TargetSystemType) -> Vec<PropertySpec> {
    match system_type {
        TargetSystemType::Http => vec![
            PropertySpec::string("url", "URL").required().uri(&["http", "https"]),
            PropertySpec::string("method", "HTTP method")
                .default(json!("POST"))
                .one_of(vec![json!("POST"), json!("PUT"), json!("PATCH"), json!("GET")]),
            PropertySpec::object("headers", "Headers")
                .describe("Extra request headers")
                .default(json!({})),
            timeout_prop(),
            PropertySpec::string("auth_token", "Bearer token").secret(),
        ],
        TargetSystemType::Mqtt => vec![
            PropertySpec::string("host", "Broker host").required().hostname(),
            PropertySpec::integer("port", "Broker port")
                .default(json!(1883))
                .range(1, 65535),
            PropertySpec::string("topic", "Topic").required(),
            PropertySpec::integer("qos", "QoS")
                .default(json!(0))
                .one_of(vec![json!(0), json!(1), json!(2)]),
            PropertySpec::boolean("retain", "Retain"),
            PropertySpec::boolean("use_tls", "Use TLS"),
            PropertySpec::string("username", "Username"),
            PropertySpec::string("password", "Password").secret(),
            PropertySpec::string("client_id", "Client ID")
                .describe("Generated per device when empty"),
            PropertySpec::integer("keep_alive", "Keep-alive (seconds)")
                .default(json!(60))
                .range(5, 3600),
        ],
        TargetSystemType::Kafka => vec![
            PropertySpec::string("bootstrap_servers", "Bootstrap servers")
                .required()
                .describe("Comma-separated host:port list"),
            PropertySpec::string("topic", "Topic").required(),
            PropertySpec::integer("partition", "Partition")
                .default(json!(0))
                .range(0, 10_000),
            PropertySpec::string("key_field", "Key field")
                .describe("Payload field used as the record key"),
            timeout_prop(),
        ],
        TargetSystemType::WebSocket => vec![
            PropertySpec::string("url", "URL").required().uri(&["ws", "wss"]),
            timeout_prop(),
        ],
        TargetSystemType::Ftp => vec![
            PropertySpec::string("host", "Host").required().hostname(),
            PropertySpec::integer("port", "Port")
                .default(json!(21))
                .range(1, 65535),
            PropertySpec::string("username", "Username").default(json!("anonymous")),
            PropertySpec::string("password", "Password").secret(),
            PropertySpec::string("directory", "Remote directory").default(json!("/")),
            PropertySpec::string("file_prefix", "File prefix").default(json!("payload")),
            timeout_prop(),
        ],
        TargetSystemType::PubSub => vec![
            PropertySpec::string("provider", "Provider")
                .required()
                .default(json!("gcp"))
                .one_of(vec![json!("gcp"), json!("generic")]),
            PropertySpec::string("topic", "Topic").required(),
            PropertySpec::string("project_id", "Cloud project ID")
                .describe("Required for the gcp provider"),
            PropertySpec::string("access_token", "Access token").secret(),
            PropertySpec::string("endpoint", "Publish endpoint")
                .uri(&["http", "https"])
                .describe("Required for the generic provider; overrides the gcp endpoint"),
            timeout_prop(),
        ],
    }
}

/// JSON-Schema-like description of a type's config map.
pub fn config_schema(system_type: TargetSystemType) -> Value {
    let props = properties_for(system_type);
    let properties: Map<String, Value> = props
        .iter()
        .map(|p| (p.name.to_string(), p.to_json()))
        .collect();
    let required: Vec<&str> = props.iter().filter(|p| p.required).map(|p| p.name).collect();

    json!({
        "type": "object",
        "title": system_type.label(),
        "description": system_type.description(),
        "properties": properties,
        "required": required,
    })
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Check `config` against the type's schema, returning the normalized map.
///
/// Unknown keys are preserved. All field problems are collected rather than
/// stopping at the first one.
pub fn normalize_config(
    system_type: TargetSystemType,
    config: &Value,
) -> Result<Map<String, Value>, Vec<FieldError>> {
    let Some(input) = config.as_object() else {
        return Err(vec![FieldError::new("config", "must be a JSON object")]);
    };

    let mut out = input.clone();
    let mut errors = Vec::new();

    for prop in properties_for(system_type) {
        let present = input
            .get(prop.name)
            .filter(|v| !v.is_null() && v.as_str() != Some(""));

        let value = match present {
            Some(v) => match coerce(v, prop.kind) {
                Some(v) => v,
                None => {
                    errors.push(FieldError::new(
                        prop.name,
                        format!("must be of type {}", prop.kind.json_type()),
                    ));
                    continue;
                }
            },
            None => match &prop.default {
                Some(d) => d.clone(),
                None => {
                    if prop.required {
                        errors.push(FieldError::new(prop.name, "is required"));
                    }
                    out.remove(prop.name);
                    continue;
                }
            },
        };

        if let Some(message) = check_constraints(&prop, &value) {
            errors.push(FieldError::new(prop.name, message));
            continue;
        }
        out.insert(prop.name.to_string(), value);
    }

    errors.extend(cross_field_errors(system_type, &out));

    if errors.is_empty() {
        Ok(out)
    } else {
        Err(errors)
    }
}

/// Validate without keeping the normalized map.
pub fn validate_config(system_type: TargetSystemType, config: &Value) -> Vec<FieldError> {
    normalize_config(system_type, config).err().unwrap_or_default()
}

/// Replace secret values with [`MASKED_VALUE`].
pub fn mask_secrets(system_type: TargetSystemType, config: &Value) -> Value {
    let mut masked = config.clone();
    if let Some(map) = masked.as_object_mut() {
        for prop in properties_for(system_type).into_iter().filter(|p| p.secret) {
            if let Some(v) = map.get_mut(prop.name) {
                if !v.is_null() {
                    *v = json!(MASKED_VALUE);
                }
            }
        }
        if let Some(Value::Object(headers)) = map.get_mut("headers") {
            for (name, v) in headers.iter_mut() {
                if name.eq_ignore_ascii_case("authorization") {
                    *v = json!(MASKED_VALUE);
                }
            }
        }
    }
    masked
}

fn coerce(value: &Value, kind: PropKind) -> Option<Value> {
    match (kind, value) {
        (PropKind::String, Value::String(_)) => Some(value.clone()),
        (PropKind::String, Value::Number(n)) => Some(json!(n.to_string())),
        (PropKind::Integer, Value::Number(n)) => n.as_i64().map(Value::from),
        (PropKind::Integer, Value::String(s)) => s.trim().parse::<i64>().ok().map(Value::from),
        (PropKind::Boolean, Value::Bool(_)) => Some(value.clone()),
        (PropKind::Boolean, Value::String(s)) => match s.as_str() {
            "true" => Some(json!(true)),
            "false" => Some(json!(false)),
            _ => None,
        },
        (PropKind::Object, Value::Object(map)) => Some(Value::Object(
            map.iter()
                .map(|(k, v)| {
                    let v = match v {
                        Value::String(_) => v.clone(),
                        other => json!(other.to_string()),
                    };
                    (k.clone(), v)
                })
                .collect(),
        )),
        _ => None,
    }
}

fn check_constraints(prop: &PropertySpec, value: &Value) -> Option<String> {
    if !prop.enum_values.is_empty() && !prop.enum_values.contains(value) {
        let allowed: Vec<String> = prop.enum_values.iter().map(Value::to_string).collect();
        return Some(format!("must be one of: {}", allowed.join(", ")));
    }
    if let Some(n) = value.as_i64() {
        if let Some(min) = prop.minimum {
            if n < min {
                return Some(format!("must be at least {min}"));
            }
        }
        if let Some(max) = prop.maximum {
            if n > max {
                return Some(format!("must be at most {max}"));
            }
        }
    }
    match (prop.format, value.as_str()) {
        (Some("uri"), Some(s)) => check_uri(s, prop.schemes),
        (Some("hostname"), Some(s)) if s.trim().is_empty() || s.contains(char::is_whitespace) || s.contains("://") => {
            Some("must be a bare host name without scheme or spaces".to_string())
        }
        _ => None,
    }
}

fn check_uri(s: &str, schemes: &[&str]) -> Option<String> {
    let Some((scheme, rest)) = s.split_once("://") else {
        return Some("must be an absolute URL".to_string());
    };
    if !schemes.is_empty() && !schemes.contains(&scheme.to_ascii_lowercase().as_str()) {
        return Some(format!("scheme must be one of: {}", schemes.join(", ")));
    }
    let host = rest.split(['/', '?', '#']).next().unwrap_or_default();
    if host.is_empty() || host.contains(char::is_whitespace) {
        return Some("must include a host".to_string());
    }
    None
}

fn cross_field_errors(system_type: TargetSystemType, config: &Map<String, Value>) -> Vec<FieldError> {
    let mut errors = Vec::new();
    let has = |key: &str| config.get(key).and_then(Value::as_str).is_some_and(|s| !s.is_empty());

    match system_type {
        TargetSystemType::PubSub => match config.get("provider").and_then(Value::as_str) {
            Some("gcp") if !has("project_id") => {
                errors.push(FieldError::new("project_id", "is required for the gcp provider"));
            }
            Some("generic") if !has("endpoint") => {
                errors.push(FieldError::new("endpoint", "is required for the generic provider"));
            }
            _ => {}
        },
        TargetSystemType::Mqtt if has("password") && !has("username") => {
            errors.push(FieldError::new("username", "is required when a password is set"));
        }
        TargetSystemType::Kafka => {
            if let Some(servers) = config.get("bootstrap_servers").and_then(Value::as_str) {
                for server in servers.split(',').map(str::trim) {
                    let valid = server
                        .rsplit_once(':')
                        .is_some_and(|(host, port)| !host.is_empty() && port.parse::<u16>().is_ok());
                    if !valid {
                        errors.push(FieldError::new(
                            "bootstrap_servers",
                            format!("'{server}' is not a host:port pair"),
                        ));
                    }
                }
            }
        }
        _ => {}
    }
    errors
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
