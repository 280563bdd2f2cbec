//! Purpose: Build and normalize search-matrix patterns.
//! Exports: `SearchPattern`, `Column`, `LayerMatch`, `normalize_pattern`.
//! Role: Turns the abbreviated pattern shapes users write into the full matrix the server expects.
//! Invariants: Normalized output is always `{"columns": [{"layers": {id: {..}}, ..}, ..]}`.
//! Invariants: A pattern without any layer condition is rejected before it reaches the server.
use crate::core::error::{Error, ErrorKind};
use serde::Serialize;
use serde_json::{Map, Value};

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct SearchPattern {
    pub columns: Vec<Column>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Column {
    pub layers: Map<String, Value>,
    /// Maximum token distance to the next column; the server assumes 1 when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub adj: Option<u32>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerMatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<String>,
    #[serde(skip_serializing_if = "is_false")]
    pub not: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub anchor_start: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub anchor_end: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub target: bool,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl SearchPattern {
    pub fn new() -> Self {
        Self::default()
    }

    /// One-column pattern matching a single layer against a regular expression.
    pub fn single(layer_id: impl Into<String>, regex: impl Into<String>) -> Self {
        Self::new().column(Column::new().layer(layer_id, LayerMatch::pattern(regex)))
    }

    pub fn column(mut self, column: Column) -> Self {
        self.columns.push(column);
        self
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

impl Column {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn layer(mut self, layer_id: impl Into<String>, condition: LayerMatch) -> Self {
        let value = serde_json::to_value(condition).unwrap_or(Value::Null);
        self.layers.insert(layer_id.into(), value);
        self
    }

    pub fn adj(mut self, distance: u32) -> Self {
        self.adj = Some(distance);
        self
    }
}

impl LayerMatch {
    pub fn pattern(regex: impl Into<String>) -> Self {
        Self {
            pattern: Some(regex.into()),
            ..Self::default()
        }
    }

    /// Numeric range match; `min` is inclusive and `max` exclusive.
    pub fn range(min: Option<f64>, max: Option<f64>) -> Self {
        Self {
            min: min.map(|value| value.to_string()),
            max: max.map(|value| value.to_string()),
            ..Self::default()
        }
    }

    pub fn negated(mut self) -> Self {
        self.not = true;
        self
    }

    pub fn anchored_start(mut self) -> Self {
        self.anchor_start = true;
        self
    }

    pub fn anchored_end(mut self) -> Self {
        self.anchor_end = true;
        self
    }

    pub fn as_target(mut self) -> Self {
        self.target = true;
        self
    }
}

/// Expands abbreviated pattern shapes into the full search matrix.
///
/// Accepted shorthands: a bare `{layer: condition}` map is one column; a list is a
/// list of columns; a column without `layers` is a layer map; a non-object condition
/// is a regular expression.
pub fn normalize_pattern(pattern: &Value) -> Result<Value, Error> {
    let columns = match pattern {
        Value::Object(map) if map.contains_key("columns") => map
            .get("columns")
            .cloned()
            .unwrap_or(Value::Null),
        Value::Object(_) | Value::Array(_) => pattern.clone(),
        _ => {
            return Err(invalid_pattern("pattern must be an object or a list of columns"));
        }
    };
    let columns = match columns {
        Value::Array(columns) => columns,
        other => vec![other],
    };

    let mut normalized = Vec::with_capacity(columns.len());
    let mut conditions = 0usize;
    for (index, column) in columns.into_iter().enumerate() {
        let Value::Object(mut column) = column else {
            return Err(invalid_pattern(format!("column {index} must be an object")));
        };
        if !column.contains_key("layers") {
            let layers = std::mem::take(&mut column);
            column.insert("layers".to_string(), Value::Object(layers));
        }
        let layers = match column.get_mut("layers") {
            Some(Value::Object(layers)) => layers,
            _ => {
                return Err(invalid_pattern(format!(
                    "column {index} layers must be an object"
                )));
            }
        };
        for condition in layers.values_mut() {
            if !condition.is_object() {
                let regex = match condition.take() {
                    Value::String(text) => text,
                    other => other.to_string(),
                };
                let mut wrapped = Map::new();
                wrapped.insert("pattern".to_string(), Value::String(regex));
                *condition = Value::Object(wrapped);
            }
            conditions += 1;
        }
        normalized.push(Value::Object(column));
    }

    if conditions == 0 {
        return Err(invalid_pattern("pattern has no layer conditions")
            .with_hint("Provide at least one layer, e.g. {\"orthography\": \"the\"}."));
    }

    let mut out = Map::new();
    out.insert("columns".to_string(), Value::Array(normalized));
    Ok(Value::Object(out))
}

fn invalid_pattern(message: impl Into<String>) -> Error {
    Error::new(ErrorKind::Usage).with_message(message)
}
