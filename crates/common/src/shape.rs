//! Drawable shape schema and validation.
//!
//! Field names on the wire follow the browser client: the kind travels as
//! `type` and the stroke width as `lineWidth`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Kind of a drawable shape.
///
/// The tag is open-ended: anything the known variants don't cover is kept
/// verbatim in [`ShapeKind::Other`] so newer clients can introduce kinds
/// without a server release.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(from = "String", into = "String")]
pub enum ShapeKind {
    Rectangle,
    Circle,
    Triangle,
    Arrow,
    Other(String),
}

impl ShapeKind {
    /// Canonical wire tag
    pub fn as_str(&self) -> &str {
        match self {
            ShapeKind::Rectangle => "rect",
            ShapeKind::Circle => "circle",
            ShapeKind::Triangle => "triangle",
            ShapeKind::Arrow => "arrow",
            ShapeKind::Other(tag) => tag,
        }
    }
}

impl From<String> for ShapeKind {
    fn from(tag: String) -> Self {
        match tag.as_str() {
            "rect" | "rectangle" => ShapeKind::Rectangle,
            "circle" | "ellipse" => ShapeKind::Circle,
            "triangle" => ShapeKind::Triangle,
            "arrow" => ShapeKind::Arrow,
            _ => ShapeKind::Other(tag),
        }
    }
}

impl From<ShapeKind> for String {
    fn from(kind: ShapeKind) -> Self {
        match kind {
            ShapeKind::Other(tag) => tag,
            known => known.as_str().to_string(),
        }
    }
}

/// Why a JSON payload is not a valid [`Shape`]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ShapeError {
    #[error("shape must be a JSON object")]
    NotAnObject,

    #[error("shape is missing 'type' property")]
    MissingKind,

    #[error("invalid shape: {0}")]
    InvalidField(String),
}

/// A single drawable primitive.
///
/// `width` and `height` may be negative; the sign records the drag direction.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Shape {
    #[serde(rename = "type")]
    pub kind: ShapeKind,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub color: String,
    #[serde(rename = "lineWidth")]
    pub stroke_width: f64,
}

impl Shape {
    /// The shape substituted for stored records that fail validation.
    pub fn fallback() -> Self {
        Shape {
            kind: ShapeKind::Rectangle,
            x: 0.0,
            y: 0.0,
            width: 10.0,
            height: 10.0,
            color: "black".to_string(),
            stroke_width: 1.0,
        }
    }

    /// Validate an untyped payload.
    ///
    /// Every field must be present with the right JSON type: numbers for the
    /// geometry and `lineWidth`, strings for `type` and `color`. Unknown
    /// fields are ignored.
    pub fn from_value(value: &Value) -> Result<Self, ShapeError> {
        let Some(object) = value.as_object() else {
            return Err(ShapeError::NotAnObject);
        };

        match object.get("type") {
            Some(Value::String(tag)) if !tag.is_empty() => {},
            _ => return Err(ShapeError::MissingKind),
        }

        Shape::deserialize(value).map_err(|e| ShapeError::InvalidField(e.to_string()))
    }

    /// Validate, substituting [`Shape::fallback`] when the payload is invalid.
    pub fn from_value_or_fallback(value: &Value) -> Self {
        Self::from_value(value).unwrap_or_else(|_| Self::fallback())
    }

    /// JSON representation as stored and sent on the wire
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}
