use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;

use uipilot_common::mutex_lock_or_recover;
use uipilot_model::Color;
use uipilot_model::Point;
use uipilot_model::Rect;
use uipilot_model::Size;
use uipilot_model::UiValue;
use uipilot_model::ValueType;

use crate::error::ServiceError;
use crate::registry::ElementRegistry;

/// Converts property values to and from their wire form.
///
/// Selection is by `handles` alone: the first entry in the chain that
/// claims a type answers for it, and a `None` from that entry is the
/// chain's answer. An override inserted in front of a built-in fully
/// replaces it for the types it claims, including the right to reject.
pub trait ValueSerializer: Send + Sync {
    fn handles(&self, ty: &ValueType) -> bool;
    fn serialize(&self, value: &UiValue) -> Option<String>;
    fn deserialize(&self, ty: &ValueType, raw: &str) -> Option<UiValue>;
}

/// Ordered serializer list consulted front to back. The built-ins sit at
/// the tail; anything inserted in front of them takes priority.
pub struct SerializerChain {
    serializers: Mutex<Vec<Arc<dyn ValueSerializer>>>,
}

impl SerializerChain {
    pub fn with_builtins(registry: &Arc<ElementRegistry>) -> Self {
        let serializers = builtin_serializers(registry)
            .into_iter()
            .map(|(_, serializer)| serializer)
            .collect();
        Self {
            serializers: Mutex::new(serializers),
        }
    }

    /// Inserts a serializer at `index`, counted from the front of the
    /// chain. An out-of-range index appends.
    pub fn insert(&self, index: usize, serializer: Arc<dyn ValueSerializer>) {
        let mut serializers = mutex_lock_or_recover(&self.serializers);
        let index = index.min(serializers.len());
        serializers.insert(index, serializer);
    }

    pub fn has_serializer(&self, ty: &ValueType) -> bool {
        let serializers = mutex_lock_or_recover(&self.serializers);
        serializers.iter().any(|s| s.handles(ty))
    }

    pub fn serialize(&self, value: &UiValue) -> Option<String> {
        let ty = value.value_type();
        let serializers = mutex_lock_or_recover(&self.serializers);
        serializers
            .iter()
            .find(|s| s.handles(&ty))
            .and_then(|s| s.serialize(value))
    }

    pub fn deserialize(&self, ty: &ValueType, raw: &str) -> Option<UiValue> {
        let serializers = mutex_lock_or_recover(&self.serializers);
        serializers
            .iter()
            .find(|s| s.handles(ty))
            .and_then(|s| s.deserialize(ty, raw))
    }

    pub fn len(&self) -> usize {
        mutex_lock_or_recover(&self.serializers).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Named serializer instances available for (re-)insertion into the chain.
/// Seeded with the built-ins so a remote caller can bump one of them to the
/// front; applications add their own under custom type names.
pub struct SerializerCatalog {
    entries: Mutex<HashMap<String, Arc<dyn ValueSerializer>>>,
}

impl SerializerCatalog {
    pub fn with_builtins(registry: &Arc<ElementRegistry>) -> Self {
        let entries = builtin_serializers(registry)
            .into_iter()
            .map(|(name, serializer)| (name.to_string(), serializer))
            .collect();
        Self {
            entries: Mutex::new(entries),
        }
    }

    /// Registers a serializer under `name`, replacing any previous entry.
    pub fn register(&self, name: impl Into<String>, serializer: Arc<dyn ValueSerializer>) {
        let mut entries = mutex_lock_or_recover(&self.entries);
        entries.insert(name.into(), serializer);
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn ValueSerializer>, ServiceError> {
        let entries = mutex_lock_or_recover(&self.entries);
        entries
            .get(name)
            .cloned()
            .ok_or_else(|| ServiceError::UnknownSerializer(name.to_string()))
    }
}

fn builtin_serializers(
    registry: &Arc<ElementRegistry>,
) -> Vec<(&'static str, Arc<dyn ValueSerializer>)> {
    vec![
        ("bool", Arc::new(BoolSerializer)),
        ("int", Arc::new(IntSerializer)),
        ("float", Arc::new(FloatSerializer)),
        ("string", Arc::new(TextSerializer)),
        ("color", Arc::new(ColorSerializer)),
        ("point", Arc::new(PointSerializer)),
        ("size", Arc::new(SizeSerializer)),
        ("rect", Arc::new(RectSerializer)),
        (
            "element",
            Arc::new(ElementSerializer {
                registry: Arc::clone(registry),
            }),
        ),
        ("string-list", Arc::new(TextListSerializer)),
    ]
}

struct BoolSerializer;

impl ValueSerializer for BoolSerializer {
    fn handles(&self, ty: &ValueType) -> bool {
        matches!(ty, ValueType::Bool)
    }

    fn serialize(&self, value: &UiValue) -> Option<String> {
        match value {
            UiValue::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    fn deserialize(&self, _ty: &ValueType, raw: &str) -> Option<UiValue> {
        raw.parse::<bool>().ok().map(UiValue::Bool)
    }
}

struct IntSerializer;

impl ValueSerializer for IntSerializer {
    fn handles(&self, ty: &ValueType) -> bool {
        matches!(ty, ValueType::Int)
    }

    fn serialize(&self, value: &UiValue) -> Option<String> {
        match value {
            UiValue::Int(i) => Some(i.to_string()),
            _ => None,
        }
    }

    fn deserialize(&self, _ty: &ValueType, raw: &str) -> Option<UiValue> {
        raw.parse::<i64>().ok().map(UiValue::Int)
    }
}

struct FloatSerializer;

impl ValueSerializer for FloatSerializer {
    fn handles(&self, ty: &ValueType) -> bool {
        matches!(ty, ValueType::Float)
    }

    fn serialize(&self, value: &UiValue) -> Option<String> {
        match value {
            UiValue::Float(f) => Some(f.to_string()),
            _ => None,
        }
    }

    fn deserialize(&self, _ty: &ValueType, raw: &str) -> Option<UiValue> {
        raw.parse::<f64>().ok().map(UiValue::Float)
    }
}

struct TextSerializer;

impl ValueSerializer for TextSerializer {
    fn handles(&self, ty: &ValueType) -> bool {
        matches!(ty, ValueType::Text)
    }

    fn serialize(&self, value: &UiValue) -> Option<String> {
        match value {
            UiValue::Text(s) => Some(s.clone()),
            _ => None,
        }
    }

    fn deserialize(&self, _ty: &ValueType, raw: &str) -> Option<UiValue> {
        Some(UiValue::Text(raw.to_string()))
    }
}

struct ColorSerializer;

impl ValueSerializer for ColorSerializer {
    fn handles(&self, ty: &ValueType) -> bool {
        matches!(ty, ValueType::Color)
    }

    fn serialize(&self, value: &UiValue) -> Option<String> {
        match value {
            UiValue::Color(c) => Some(c.to_hex()),
            _ => None,
        }
    }

    fn deserialize(&self, _ty: &ValueType, raw: &str) -> Option<UiValue> {
        Color::from_hex(raw).map(UiValue::Color)
    }
}

struct PointSerializer;

impl ValueSerializer for PointSerializer {
    fn handles(&self, ty: &ValueType) -> bool {
        matches!(ty, ValueType::Point)
    }

    fn serialize(&self, value: &UiValue) -> Option<String> {
        match value {
            UiValue::Point(p) => Some(format!("{},{}", p.x, p.y)),
            _ => None,
        }
    }

    fn deserialize(&self, _ty: &ValueType, raw: &str) -> Option<UiValue> {
        let (x, y) = parse_pair(raw)?;
        Some(UiValue::Point(Point::new(x, y)))
    }
}

struct SizeSerializer;

impl ValueSerializer for SizeSerializer {
    fn handles(&self, ty: &ValueType) -> bool {
        matches!(ty, ValueType::Size)
    }

    fn serialize(&self, value: &UiValue) -> Option<String> {
        match value {
            UiValue::Size(s) => Some(format!("{},{}", s.width, s.height)),
            _ => None,
        }
    }

    fn deserialize(&self, _ty: &ValueType, raw: &str) -> Option<UiValue> {
        let (width, height) = parse_pair(raw)?;
        Some(UiValue::Size(Size::new(width, height)))
    }
}

struct RectSerializer;

impl ValueSerializer for RectSerializer {
    fn handles(&self, ty: &ValueType) -> bool {
        matches!(ty, ValueType::Rect)
    }

    fn serialize(&self, value: &UiValue) -> Option<String> {
        match value {
            UiValue::Rect(r) => Some(format!("{},{},{},{}", r.x, r.y, r.width, r.height)),
            _ => None,
        }
    }

    fn deserialize(&self, _ty: &ValueType, raw: &str) -> Option<UiValue> {
        let parts: Vec<f64> = raw
            .split(',')
            .map(|part| part.trim().parse::<f64>())
            .collect::<Result<_, _>>()
            .ok()?;
        match parts.as_slice() {
            [x, y, width, height] => Some(UiValue::Rect(Rect::new(*x, *y, *width, *height))),
            _ => None,
        }
    }
}

/// Serializes elements as registry identities, minting one when the
/// element has never crossed the wire before.
struct ElementSerializer {
    registry: Arc<ElementRegistry>,
}

impl ValueSerializer for ElementSerializer {
    fn handles(&self, ty: &ValueType) -> bool {
        matches!(ty, ValueType::Element)
    }

    fn serialize(&self, value: &UiValue) -> Option<String> {
        match value {
            UiValue::Element(node) => Some(self.registry.get_or_assign(node)),
            _ => None,
        }
    }

    fn deserialize(&self, _ty: &ValueType, raw: &str) -> Option<UiValue> {
        self.registry.resolve(raw).ok().map(UiValue::Element)
    }
}

struct TextListSerializer;

impl ValueSerializer for TextListSerializer {
    fn handles(&self, ty: &ValueType) -> bool {
        matches!(ty, ValueType::TextList)
    }

    fn serialize(&self, value: &UiValue) -> Option<String> {
        match value {
            UiValue::TextList(items) => serde_json::to_string(items).ok(),
            _ => None,
        }
    }

    fn deserialize(&self, _ty: &ValueType, raw: &str) -> Option<UiValue> {
        serde_json::from_str::<Vec<String>>(raw)
            .ok()
            .map(UiValue::TextList)
    }
}

fn parse_pair(raw: &str) -> Option<(f64, f64)> {
    let (a, b) = raw.split_once(',')?;
    let a = a.trim().parse::<f64>().ok()?;
    let b = b.trim().parse::<f64>().ok()?;
    Some((a, b))
}
