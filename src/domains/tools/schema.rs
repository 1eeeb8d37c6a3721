//! Structural schemas for tool inputs and outputs.
//!
//! A [`Schema`] is what the validator checks arguments and results against.
//! Schemas are either written by hand with the builder constructors or
//! derived from Rust types through `schemars` and [`Schema::for_type`].

use indexmap::IndexMap;
use schemars::JsonSchema;
use serde_json::{Map, Value, json};
use thiserror::Error;

/// Maximum `$ref` nesting followed while importing a JSON Schema.
const MAX_REF_DEPTH: usize = 32;

/// Errors raised while importing a JSON Schema document.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("Unsupported schema type: {0}")]
    UnsupportedType(String),

    #[error("Unresolved reference: {0}")]
    UnresolvedRef(String),

    #[error("Invalid '{keyword}' keyword: {reason}")]
    InvalidKeyword { keyword: String, reason: String },

    #[error("Schema references nest deeper than {MAX_REF_DEPTH} levels")]
    RecursionLimit,

    #[error("Failed to serialize generated schema: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl SchemaError {
    fn keyword(keyword: &str, reason: impl Into<String>) -> Self {
        Self::InvalidKeyword {
            keyword: keyword.to_string(),
            reason: reason.into(),
        }
    }
}

/// Numeric bounds shared by integer and number schemas.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NumberBounds {
    pub minimum: Option<f64>,
    pub maximum: Option<f64>,
    pub exclusive_minimum: Option<f64>,
    pub exclusive_maximum: Option<f64>,
}

impl NumberBounds {
    /// Inclusive bounds on both ends.
    pub fn between(minimum: f64, maximum: f64) -> Self {
        Self {
            minimum: Some(minimum),
            maximum: Some(maximum),
            ..Self::default()
        }
    }
}

/// Length bounds for strings, counted in characters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StringRules {
    pub min_length: Option<usize>,
    pub max_length: Option<usize>,
}

/// Item schema and count bounds for arrays.
#[derive(Debug, Clone, PartialEq)]
pub struct ArrayRules {
    pub items: Box<Schema>,
    pub min_items: Option<usize>,
    pub max_items: Option<usize>,
}

/// How an object treats properties it does not declare.
#[derive(Debug, Clone, PartialEq)]
pub enum AdditionalProperties {
    /// Undeclared properties are violations (strict mode).
    Reject,
    /// Undeclared properties are accepted without checks.
    Allow,
    /// Undeclared properties must match the given schema (maps).
    Schema(Box<Schema>),
}

/// A declared object property.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub schema: Schema,
    pub required: bool,
    pub description: Option<String>,
}

/// Object schema with declared fields in declaration order.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectSchema {
    pub fields: IndexMap<String, Field>,
    pub additional: AdditionalProperties,
}

impl ObjectSchema {
    /// An empty, strict object schema.
    pub fn new() -> Self {
        Self {
            fields: IndexMap::new(),
            additional: AdditionalProperties::Reject,
        }
    }

    /// Declare a required field.
    #[must_use]
    pub fn required(mut self, name: impl Into<String>, schema: Schema) -> Self {
        self.fields.insert(
            name.into(),
            Field {
                schema,
                required: true,
                description: None,
            },
        );
        self
    }

    /// Declare an optional field.
    #[must_use]
    pub fn optional(mut self, name: impl Into<String>, schema: Schema) -> Self {
        self.fields.insert(
            name.into(),
            Field {
                schema,
                required: false,
                description: None,
            },
        );
        self
    }

    /// Attach a description to an already declared field.
    #[must_use]
    pub fn describe(mut self, name: &str, description: impl Into<String>) -> Self {
        if let Some(field) = self.fields.get_mut(name) {
            field.description = Some(description.into());
        }
        self
    }

    /// Accept undeclared properties.
    #[must_use]
    pub fn allow_additional(mut self) -> Self {
        self.additional = AdditionalProperties::Allow;
        self
    }

    /// Names of the required fields, in declaration order.
    pub fn required_fields(&self) -> impl Iterator<Item = &str> {
        self.fields
            .iter()
            .filter(|(_, f)| f.required)
            .map(|(name, _)| name.as_str())
    }
}

impl Default for ObjectSchema {
    fn default() -> Self {
        Self::new()
    }
}

/// A structural schema.
#[derive(Debug, Clone, PartialEq)]
pub enum Schema {
    /// Any value is accepted.
    Any,
    /// No value is accepted.
    Never,
    Null,
    Boolean,
    Integer(NumberBounds),
    Number(NumberBounds),
    String(StringRules),
    Array(ArrayRules),
    Object(ObjectSchema),
    /// The value must equal one of the listed literals.
    Enum(Vec<Value>),
    /// The inner schema, or `null`.
    Nullable(Box<Schema>),
    /// The value must match at least one alternative.
    AnyOf(Vec<Schema>),
}

impl Schema {
    pub fn string() -> Self {
        Self::String(StringRules::default())
    }

    /// A string whose character count lies within the given bounds.
    pub fn bounded_string(min_length: Option<usize>, max_length: Option<usize>) -> Self {
        Self::String(StringRules {
            min_length,
            max_length,
        })
    }

    pub fn integer() -> Self {
        Self::Integer(NumberBounds::default())
    }

    /// An integer within the inclusive range.
    pub fn integer_range(minimum: i64, maximum: i64) -> Self {
        Self::Integer(NumberBounds::between(minimum as f64, maximum as f64))
    }

    pub fn number() -> Self {
        Self::Number(NumberBounds::default())
    }

    pub fn boolean() -> Self {
        Self::Boolean
    }

    pub fn array(items: Schema) -> Self {
        Self::Array(ArrayRules {
            items: Box::new(items),
            min_items: None,
            max_items: None,
        })
    }

    pub fn object(object: ObjectSchema) -> Self {
        Self::Object(object)
    }

    /// A closed set of literal values.
    pub fn enumeration<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self::Enum(values.into_iter().map(Into::into).collect())
    }

    /// Wrap this schema so `null` is accepted too.
    #[must_use]
    pub fn nullable(self) -> Self {
        match self {
            Self::Nullable(_) | Self::Null | Self::Any => self,
            other => Self::Nullable(Box::new(other)),
        }
    }

    /// The object schema at the root, if this is an object.
    pub fn as_object(&self) -> Option<&ObjectSchema> {
        match self {
            Self::Object(object) => Some(object),
            _ => None,
        }
    }

    /// Derive a schema from a Rust type through `schemars`.
    pub fn for_type<T: JsonSchema>() -> Result<Self, SchemaError> {
        let generated = schemars::schema_for!(T);
        let document = serde_json::to_value(&generated)?;
        Self::from_json_schema(&document)
    }

    /// Import a JSON Schema document.
    ///
    /// Only the structural subset is understood; annotation keywords such as
    /// `title`, `format` or `default` are ignored. Objects that do not state
    /// `additionalProperties` are strict.
    pub fn from_json_schema(document: &Value) -> Result<Self, SchemaError> {
        let importer = Importer { root: document };
        importer.import(document, 0)
    }

    /// Render this schema as a self-contained JSON Schema document.
    pub fn to_json_schema(&self) -> Value {
        match self {
            Self::Any => json!({}),
            Self::Never => json!({ "not": {} }),
            Self::Null => json!({ "type": "null" }),
            Self::Boolean => json!({ "type": "boolean" }),
            Self::Integer(bounds) => bounds_json("integer", bounds),
            Self::Number(bounds) => bounds_json("number", bounds),
            Self::String(rules) => {
                let mut out = Map::new();
                out.insert("type".into(), "string".into());
                if let Some(min) = rules.min_length {
                    out.insert("minLength".into(), min.into());
                }
                if let Some(max) = rules.max_length {
                    out.insert("maxLength".into(), max.into());
                }
                Value::Object(out)
            }
            Self::Array(rules) => {
                let mut out = Map::new();
                out.insert("type".into(), "array".into());
                out.insert("items".into(), rules.items.to_json_schema());
                if let Some(min) = rules.min_items {
                    out.insert("minItems".into(), min.into());
                }
                if let Some(max) = rules.max_items {
                    out.insert("maxItems".into(), max.into());
                }
                Value::Object(out)
            }
            Self::Object(object) => {
                let mut properties = Map::new();
                for (name, field) in &object.fields {
                    let mut property = field.schema.to_json_schema();
                    if let (Some(description), Value::Object(map)) =
                        (&field.description, &mut property)
                    {
                        map.insert("description".into(), description.clone().into());
                    }
                    properties.insert(name.clone(), property);
                }
                let required: Vec<Value> = object.required_fields().map(Value::from).collect();
                let additional = match &object.additional {
                    AdditionalProperties::Reject => Value::Bool(false),
                    AdditionalProperties::Allow => Value::Bool(true),
                    AdditionalProperties::Schema(schema) => schema.to_json_schema(),
                };
                let mut out = Map::new();
                out.insert("type".into(), "object".into());
                out.insert("properties".into(), Value::Object(properties));
                if !required.is_empty() {
                    out.insert("required".into(), Value::Array(required));
                }
                out.insert("additionalProperties".into(), additional);
                Value::Object(out)
            }
            Self::Enum(values) => json!({ "enum": values }),
            Self::Nullable(inner) => {
                let mut rendered = inner.to_json_schema();
                if let Value::Object(map) = &mut rendered {
                    if let Some(Value::String(ty)) = map.get("type").cloned() {
                        map.insert("type".into(), json!([ty, "null"]));
                        return rendered;
                    }
                }
                json!({ "anyOf": [rendered, { "type": "null" }] })
            }
            Self::AnyOf(alternatives) => {
                let rendered: Vec<Value> = alternatives.iter().map(Self::to_json_schema).collect();
                json!({ "anyOf": rendered })
            }
        }
    }
}

fn bounds_json(ty: &str, bounds: &NumberBounds) -> Value {
    let mut out = Map::new();
    out.insert("type".into(), ty.into());
    let keywords = [
        ("minimum", bounds.minimum),
        ("maximum", bounds.maximum),
        ("exclusiveMinimum", bounds.exclusive_minimum),
        ("exclusiveMaximum", bounds.exclusive_maximum),
    ];
    for (keyword, bound) in keywords {
        if let Some(bound) = bound {
            out.insert(keyword.into(), number_value(bound));
        }
    }
    Value::Object(out)
}

/// Render integral bounds as JSON integers so published schemas read naturally.
fn number_value(bound: f64) -> Value {
    if bound.fract() == 0.0 && bound.abs() < 9.0e15 {
        Value::from(bound as i64)
    } else {
        Value::from(bound)
    }
}

struct Importer<'a> {
    root: &'a Value,
}

impl Importer<'_> {
    fn import(&self, node: &Value, depth: usize) -> Result<Schema, SchemaError> {
        if depth > MAX_REF_DEPTH {
            return Err(SchemaError::RecursionLimit);
        }

        let map = match node {
            Value::Bool(true) => return Ok(Schema::Any),
            Value::Bool(false) => return Ok(Schema::Never),
            Value::Object(map) => map,
            other => {
                return Err(SchemaError::UnsupportedType(format!(
                    "schema node must be an object or boolean, found {other}"
                )));
            }
        };

        if let Some(reference) = map.get("$ref") {
            let reference = reference
                .as_str()
                .ok_or_else(|| SchemaError::keyword("$ref", "must be a string"))?;
            let target = self.resolve(reference)?;
            return self.import(target, depth + 1);
        }

        if let Some(all_of) = map.get("allOf") {
            return match all_of.as_array().map(Vec::as_slice) {
                Some([single]) => self.import(single, depth + 1),
                _ => Err(SchemaError::keyword(
                    "allOf",
                    "only single-element allOf is supported",
                )),
            };
        }

        if let Some(value) = map.get("const") {
            return Ok(Schema::Enum(vec![value.clone()]));
        }

        if let Some(values) = map.get("enum") {
            let values = values
                .as_array()
                .ok_or_else(|| SchemaError::keyword("enum", "must be an array"))?;
            let literals: Vec<Value> = values.iter().filter(|v| !v.is_null()).cloned().collect();
            let schema = Schema::Enum(literals);
            return Ok(if values.iter().any(Value::is_null) {
                schema.nullable()
            } else {
                schema
            });
        }

        for keyword in ["anyOf", "oneOf"] {
            if let Some(alternatives) = map.get(keyword) {
                let alternatives = alternatives
                    .as_array()
                    .ok_or_else(|| SchemaError::keyword(keyword, "must be an array"))?;
                return self.import_alternatives(alternatives, depth);
            }
        }

        match map.get("type") {
            None if map.contains_key("properties") => self.import_typed("object", map, depth),
            None if map.contains_key("items") => self.import_typed("array", map, depth),
            None => Ok(Schema::Any),
            Some(Value::String(ty)) => self.import_typed(ty, map, depth),
            Some(Value::Array(types)) => {
                let mut names: Vec<&str> = Vec::with_capacity(types.len());
                for ty in types {
                    names.push(
                        ty.as_str()
                            .ok_or_else(|| SchemaError::keyword("type", "entries must be strings"))?,
                    );
                }
                let nullable = names.contains(&"null");
                let mut alternatives: Vec<Schema> = names
                    .iter()
                    .filter(|ty| **ty != "null")
                    .map(|ty| self.import_typed(ty, map, depth))
                    .collect::<Result<_, _>>()?;
                let schema = match alternatives.len() {
                    0 => return Ok(Schema::Null),
                    1 => alternatives.remove(0),
                    _ => Schema::AnyOf(alternatives),
                };
                Ok(if nullable { schema.nullable() } else { schema })
            }
            Some(_) => Err(SchemaError::keyword("type", "must be a string or an array")),
        }
    }

    fn import_alternatives(&self, alternatives: &[Value], depth: usize) -> Result<Schema, SchemaError> {
        let mut schemas = Vec::with_capacity(alternatives.len());
        let mut nullable = false;
        for alternative in alternatives {
            match self.import(alternative, depth + 1)? {
                Schema::Null => nullable = true,
                Schema::Nullable(inner) => {
                    nullable = true;
                    schemas.push(*inner);
                }
                other => schemas.push(other),
            }
        }

        // A set of literal alternatives collapses into one enumeration.
        let schema = if !schemas.is_empty() && schemas.iter().all(|s| matches!(s, Schema::Enum(_))) {
            Schema::Enum(
                schemas
                    .into_iter()
                    .flat_map(|s| match s {
                        Schema::Enum(values) => values,
                        _ => Vec::new(),
                    })
                    .collect(),
            )
        } else if schemas.len() == 1 {
            schemas.remove(0)
        } else if schemas.is_empty() {
            return Ok(Schema::Null);
        } else {
            Schema::AnyOf(schemas)
        };

        Ok(if nullable { schema.nullable() } else { schema })
    }

    fn import_typed(
        &self,
        ty: &str,
        map: &Map<String, Value>,
        depth: usize,
    ) -> Result<Schema, SchemaError> {
        match ty {
            "null" => Ok(Schema::Null),
            "boolean" => Ok(Schema::Boolean),
            "integer" => Ok(Schema::Integer(read_bounds(map)?)),
            "number" => Ok(Schema::Number(read_bounds(map)?)),
            "string" => Ok(Schema::String(StringRules {
                min_length: read_usize(map, "minLength")?,
                max_length: read_usize(map, "maxLength")?,
            })),
            "array" => {
                let items = match map.get("items") {
                    Some(items) => self.import(items, depth + 1)?,
                    None => Schema::Any,
                };
                Ok(Schema::Array(ArrayRules {
                    items: Box::new(items),
                    min_items: read_usize(map, "minItems")?,
                    max_items: read_usize(map, "maxItems")?,
                }))
            }
            "object" => self.import_object(map, depth),
            other => Err(SchemaError::UnsupportedType(other.to_string())),
        }
    }

    fn import_object(&self, map: &Map<String, Value>, depth: usize) -> Result<Schema, SchemaError> {
        let required: Vec<&str> = match map.get("required") {
            None => Vec::new(),
            Some(Value::Array(names)) => names.iter().filter_map(Value::as_str).collect(),
            Some(_) => return Err(SchemaError::keyword("required", "must be an array")),
        };

        let mut object = ObjectSchema::new();
        if let Some(properties) = map.get("properties") {
            let properties = properties
                .as_object()
                .ok_or_else(|| SchemaError::keyword("properties", "must be an object"))?;
            for (name, node) in properties {
                let schema = self.import(node, depth + 1)?;
                let description = node
                    .get("description")
                    .and_then(Value::as_str)
                    .map(str::to_string);
                object.fields.insert(
                    name.clone(),
                    Field {
                        schema,
                        required: required.contains(&name.as_str()),
                        description,
                    },
                );
            }
        }

        object.additional = match map.get("additionalProperties") {
            None | Some(Value::Bool(false)) => AdditionalProperties::Reject,
            Some(Value::Bool(true)) => AdditionalProperties::Allow,
            Some(node) => match self.import(node, depth + 1)? {
                Schema::Any => AdditionalProperties::Allow,
                schema => AdditionalProperties::Schema(Box::new(schema)),
            },
        };

        Ok(Schema::Object(object))
    }

    fn resolve(&self, reference: &str) -> Result<&Value, SchemaError> {
        let pointer = reference
            .strip_prefix('#')
            .ok_or_else(|| SchemaError::UnresolvedRef(reference.to_string()))?;
        self.root
            .pointer(pointer)
            .ok_or_else(|| SchemaError::UnresolvedRef(reference.to_string()))
    }
}

fn read_bounds(map: &Map<String, Value>) -> Result<NumberBounds, SchemaError> {
    Ok(NumberBounds {
        minimum: read_f64(map, "minimum")?,
        maximum: read_f64(map, "maximum")?,
        exclusive_minimum: read_f64(map, "exclusiveMinimum")?,
        exclusive_maximum: read_f64(map, "exclusiveMaximum")?,
    })
}

fn read_f64(map: &Map<String, Value>, keyword: &str) -> Result<Option<f64>, SchemaError> {
    match map.get(keyword) {
        None => Ok(None),
        Some(value) => value
            .as_f64()
            .map(Some)
            .ok_or_else(|| SchemaError::keyword(keyword, "must be a number")),
    }
}

fn read_usize(map: &Map<String, Value>, keyword: &str) -> Result<Option<usize>, SchemaError> {
    match map.get(keyword) {
        None => Ok(None),
        Some(value) => value
            .as_u64()
            .map(|n| Some(n as usize))
            .ok_or_else(|| SchemaError::keyword(keyword, "must be a non-negative integer")),
    }
}
