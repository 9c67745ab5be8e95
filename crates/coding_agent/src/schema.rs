//! Structural parameter schemas for tools.
//!
//! A [`Schema`] is rendered to JSON Schema for the backend tool declaration and
//! is also used to check model-supplied arguments before a tool runs.

use serde_json::{json, Map, Value};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    #[error("{path}: expected {expected}, got {found}")]
    TypeMismatch {
        path: String,
        expected: &'static str,
        found: &'static str,
    },
    #[error("{path}: missing required field `{field}`")]
    MissingField { path: String, field: String },
    #[error("{path}: must be at least {minimum}")]
    BelowMinimum { path: String, minimum: i64 },
}

#[derive(Debug, Clone, PartialEq)]
pub enum SchemaKind {
    String,
    Integer { minimum: Option<i64> },
    Number,
    Boolean,
    Array(Box<Schema>),
    Object(Vec<Property>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    pub kind: SchemaKind,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Property {
    pub name: String,
    pub schema: Schema,
    pub required: bool,
}

impl Property {
    pub fn required(name: impl Into<String>, schema: Schema) -> Self {
        Self {
            name: name.into(),
            schema,
            required: true,
        }
    }

    pub fn optional(name: impl Into<String>, schema: Schema) -> Self {
        Self {
            name: name.into(),
            schema,
            required: false,
        }
    }
}

impl Schema {
    fn of(kind: SchemaKind) -> Self {
        Self {
            kind,
            description: None,
        }
    }

    pub fn string() -> Self {
        Self::of(SchemaKind::String)
    }

    pub fn integer() -> Self {
        Self::of(SchemaKind::Integer { minimum: None })
    }

    /// Integer with an inclusive lower bound.
    pub fn integer_at_least(minimum: i64) -> Self {
        Self::of(SchemaKind::Integer {
            minimum: Some(minimum),
        })
    }

    pub fn number() -> Self {
        Self::of(SchemaKind::Number)
    }

    pub fn boolean() -> Self {
        Self::of(SchemaKind::Boolean)
    }

    pub fn array(items: Schema) -> Self {
        Self::of(SchemaKind::Array(Box::new(items)))
    }

    pub fn object(properties: impl IntoIterator<Item = Property>) -> Self {
        Self::of(SchemaKind::Object(properties.into_iter().collect()))
    }

    #[must_use]
    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn to_json_schema(&self) -> Value {
        let mut out = Map::new();
        match &self.kind {
            SchemaKind::String => {
                out.insert("type".into(), json!("string"));
            }
            SchemaKind::Integer { minimum } => {
                out.insert("type".into(), json!("integer"));
                if let Some(minimum) = minimum {
                    out.insert("minimum".into(), json!(minimum));
                }
            }
            SchemaKind::Number => {
                out.insert("type".into(), json!("number"));
            }
            SchemaKind::Boolean => {
                out.insert("type".into(), json!("boolean"));
            }
            SchemaKind::Array(items) => {
                out.insert("type".into(), json!("array"));
                out.insert("items".into(), items.to_json_schema());
            }
            SchemaKind::Object(properties) => {
                let rendered: Map<String, Value> = properties
                    .iter()
                    .map(|property| (property.name.clone(), property.schema.to_json_schema()))
                    .collect();
                let required: Vec<&str> = properties
                    .iter()
                    .filter(|property| property.required)
                    .map(|property| property.name.as_str())
                    .collect();
                out.insert("type".into(), json!("object"));
                out.insert("properties".into(), Value::Object(rendered));
                out.insert("required".into(), json!(required));
                out.insert("additionalProperties".into(), json!(false));
            }
        }
        if let Some(description) = &self.description {
            out.insert("description".into(), json!(description));
        }
        Value::Object(out)
    }

    /// Checks `value` structurally. Unknown object fields are tolerated and
    /// `null` stands in for an absent optional field.
    pub fn validate(&self, value: &Value) -> Result<(), SchemaError> {
        self.validate_at(value, "$")
    }

    fn validate_at(&self, value: &Value, path: &str) -> Result<(), SchemaError> {
        let mismatch = |expected: &'static str| SchemaError::TypeMismatch {
            path: path.to_owned(),
            expected,
            found: json_type_name(value),
        };

        match &self.kind {
            SchemaKind::String => value.is_string().then_some(()).ok_or_else(|| mismatch("string")),
            SchemaKind::Boolean => value.is_boolean().then_some(()).ok_or_else(|| mismatch("boolean")),
            SchemaKind::Number => value.is_number().then_some(()).ok_or_else(|| mismatch("number")),
            SchemaKind::Integer { minimum } => {
                let number = value
                    .as_i64()
                    .or_else(|| {
                        value
                            .as_f64()
                            .filter(|float| float.fract() == 0.0)
                            .map(|float| float as i64)
                    })
                    .ok_or_else(|| mismatch("integer"))?;
                match minimum {
                    Some(minimum) if number < *minimum => Err(SchemaError::BelowMinimum {
                        path: path.to_owned(),
                        minimum: *minimum,
                    }),
                    _ => Ok(()),
                }
            }
            SchemaKind::Array(items) => {
                let elements = value.as_array().ok_or_else(|| mismatch("array"))?;
                elements
                    .iter()
                    .enumerate()
                    .try_for_each(|(index, element)| {
                        items.validate_at(element, &format!("{path}[{index}]"))
                    })
            }
            SchemaKind::Object(properties) => {
                let fields = value.as_object().ok_or_else(|| mismatch("object"))?;
                for property in properties {
                    match fields.get(&property.name) {
                        None | Some(Value::Null) if property.required => {
                            return Err(SchemaError::MissingField {
                                path: path.to_owned(),
                                field: property.name.clone(),
                            });
                        }
                        None | Some(Value::Null) => {}
                        Some(field) => property
                            .schema
                            .validate_at(field, &format!("{path}.{}", property.name))?,
                    }
                }
                Ok(())
            }
        }
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn read_schema() -> Schema {
        Schema::object([
            Property::required("file_path", Schema::string().describe("Path to read")),
            Property::optional("offset", Schema::integer_at_least(0)),
            Property::optional("tags", Schema::array(Schema::string())),
        ])
    }

    #[test]
    fn renders_json_schema_with_required_list() {
        assert_eq!(
            read_schema().to_json_schema(),
            json!({
                "type": "object",
                "properties": {
                    "file_path": {"type": "string", "description": "Path to read"},
                    "offset": {"type": "integer", "minimum": 0},
                    "tags": {"type": "array", "items": {"type": "string"}},
                },
                "required": ["file_path"],
                "additionalProperties": false,
            })
        );
    }

    #[test]
    fn validation_reports_the_failing_path() {
        let schema = read_schema();
        assert_eq!(schema.validate(&json!({"file_path": "a", "offset": null})), Ok(()));
        assert_eq!(
            schema.validate(&json!({"offset": 1})),
            Err(SchemaError::MissingField {
                path: "$".to_owned(),
                field: "file_path".to_owned()
            })
        );
        assert_eq!(
            schema.validate(&json!({"file_path": "a", "offset": -1})),
            Err(SchemaError::BelowMinimum {
                path: "$.offset".to_owned(),
                minimum: 0
            })
        );
        assert_eq!(
            schema.validate(&json!({"file_path": "a", "tags": ["x", 2]})),
            Err(SchemaError::TypeMismatch {
                path: "$.tags[1]".to_owned(),
                expected: "string",
                found: "number"
            })
        );
        assert!(schema.validate(&json!("nope")).is_err());
    }

    #[test]
    fn integral_floats_count_as_integers() {
        assert_eq!(Schema::integer().validate(&json!(3.0)), Ok(()));
        assert!(Schema::integer().validate(&json!(3.5)).is_err());
    }
}
