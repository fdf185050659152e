use std::fmt;

use crate::geometry::Color;
use crate::geometry::Point;
use crate::geometry::Rect;
use crate::geometry::Size;
use crate::node::same_node;
use crate::node::NodeRef;

/// Declared type of a property value as named on the wire.
///
/// The well-known variants cover everything the built-in serializers handle.
/// Anything else round-trips as `Custom` so applications can register their
/// own serializers for it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ValueType {
    Bool,
    Int,
    Float,
    Text,
    Color,
    Point,
    Size,
    Rect,
    Element,
    TextList,
    Custom(String),
}

impl ValueType {
    pub fn as_str(&self) -> &str {
        match self {
            ValueType::Bool => "bool",
            ValueType::Int => "int",
            ValueType::Float => "float",
            ValueType::Text => "string",
            ValueType::Color => "color",
            ValueType::Point => "point",
            ValueType::Size => "size",
            ValueType::Rect => "rect",
            ValueType::Element => "element",
            ValueType::TextList => "string-list",
            ValueType::Custom(name) => name,
        }
    }

    pub fn from_name(name: &str) -> ValueType {
        match name {
            "bool" => ValueType::Bool,
            "int" => ValueType::Int,
            "float" => ValueType::Float,
            "string" => ValueType::Text,
            "color" => ValueType::Color,
            "point" => ValueType::Point,
            "size" => ValueType::Size,
            "rect" => ValueType::Rect,
            "element" => ValueType::Element,
            "string-list" => ValueType::TextList,
            other => ValueType::Custom(other.to_string()),
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Runtime value of a UI property or event argument.
///
/// `Element` carries a live reference into the UI tree; equality for that
/// variant is object identity, not structure.
#[derive(Clone)]
pub enum UiValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Color(Color),
    Point(Point),
    Size(Size),
    Rect(Rect),
    Element(NodeRef),
    TextList(Vec<String>),
}

impl UiValue {
    pub fn value_type(&self) -> ValueType {
        match self {
            UiValue::Bool(_) => ValueType::Bool,
            UiValue::Int(_) => ValueType::Int,
            UiValue::Float(_) => ValueType::Float,
            UiValue::Text(_) => ValueType::Text,
            UiValue::Color(_) => ValueType::Color,
            UiValue::Point(_) => ValueType::Point,
            UiValue::Size(_) => ValueType::Size,
            UiValue::Rect(_) => ValueType::Rect,
            UiValue::Element(_) => ValueType::Element,
            UiValue::TextList(_) => ValueType::TextList,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            UiValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_color(&self) -> Option<Color> {
        match self {
            UiValue::Color(c) => Some(*c),
            _ => None,
        }
    }

    pub fn as_element(&self) -> Option<&NodeRef> {
        match self {
            UiValue::Element(node) => Some(node),
            _ => None,
        }
    }
}

impl fmt::Debug for UiValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UiValue::Bool(v) => f.debug_tuple("Bool").field(v).finish(),
            UiValue::Int(v) => f.debug_tuple("Int").field(v).finish(),
            UiValue::Float(v) => f.debug_tuple("Float").field(v).finish(),
            UiValue::Text(v) => f.debug_tuple("Text").field(v).finish(),
            UiValue::Color(v) => f.debug_tuple("Color").field(v).finish(),
            UiValue::Point(v) => f.debug_tuple("Point").field(v).finish(),
            UiValue::Size(v) => f.debug_tuple("Size").field(v).finish(),
            UiValue::Rect(v) => f.debug_tuple("Rect").field(v).finish(),
            UiValue::Element(node) => f
                .debug_tuple("Element")
                .field(&node.type_name())
                .field(&node.identity_slot().get())
                .finish(),
            UiValue::TextList(v) => f.debug_tuple("TextList").field(v).finish(),
        }
    }
}

impl PartialEq for UiValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (UiValue::Bool(a), UiValue::Bool(b)) => a == b,
            (UiValue::Int(a), UiValue::Int(b)) => a == b,
            (UiValue::Float(a), UiValue::Float(b)) => a == b,
            (UiValue::Text(a), UiValue::Text(b)) => a == b,
            (UiValue::Color(a), UiValue::Color(b)) => a == b,
            (UiValue::Point(a), UiValue::Point(b)) => a == b,
            (UiValue::Size(a), UiValue::Size(b)) => a == b,
            (UiValue::Rect(a), UiValue::Rect(b)) => a == b,
            (UiValue::Element(a), UiValue::Element(b)) => same_node(a, b),
            (UiValue::TextList(a), UiValue::TextList(b)) => a == b,
            _ => false,
        }
    }
}

impl From<bool> for UiValue {
    fn from(v: bool) -> Self {
        UiValue::Bool(v)
    }
}

impl From<i64> for UiValue {
    fn from(v: i64) -> Self {
        UiValue::Int(v)
    }
}

impl From<f64> for UiValue {
    fn from(v: f64) -> Self {
        UiValue::Float(v)
    }
}

impl From<&str> for UiValue {
    fn from(v: &str) -> Self {
        UiValue::Text(v.to_string())
    }
}

impl From<String> for UiValue {
    fn from(v: String) -> Self {
        UiValue::Text(v)
    }
}

impl From<Color> for UiValue {
    fn from(v: Color) -> Self {
        UiValue::Color(v)
    }
}

impl From<Point> for UiValue {
    fn from(v: Point) -> Self {
        UiValue::Point(v)
    }
}

impl From<Size> for UiValue {
    fn from(v: Size) -> Self {
        UiValue::Size(v)
    }
}

impl From<Rect> for UiValue {
    fn from(v: Rect) -> Self {
        UiValue::Rect(v)
    }
}

impl From<NodeRef> for UiValue {
    fn from(v: NodeRef) -> Self {
        UiValue::Element(v)
    }
}

impl From<Vec<String>> for UiValue {
    fn from(v: Vec<String>) -> Self {
        UiValue::TextList(v)
    }
}
