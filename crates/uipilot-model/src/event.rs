use std::fmt;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Mutex;

use uipilot_common::mutex_lock_or_recover;

use crate::value::UiValue;

/// Kind of a single event parameter, as declared by the event's shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamKind {
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
    /// Parameter the application cannot describe. Events carrying one
    /// cannot be observed remotely.
    Opaque,
}

impl ParamKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParamKind::Bool => "bool",
            ParamKind::Int => "int",
            ParamKind::Float => "float",
            ParamKind::Text => "string",
            ParamKind::Color => "color",
            ParamKind::Point => "point",
            ParamKind::Size => "size",
            ParamKind::Rect => "rect",
            ParamKind::Element => "element",
            ParamKind::TextList => "string-list",
            ParamKind::Opaque => "opaque",
        }
    }
}

/// Declared signature of an event: the kinds of the values it emits.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EventShape {
    params: Vec<ParamKind>,
}

impl EventShape {
    /// Remote observation supports at most this many parameters.
    pub const MAX_ARITY: usize = 4;

    pub fn new(params: Vec<ParamKind>) -> Self {
        EventShape { params }
    }

    pub fn empty() -> Self {
        EventShape::default()
    }

    pub fn arity(&self) -> usize {
        self.params.len()
    }

    pub fn params(&self) -> &[ParamKind] {
        &self.params
    }

    /// `None` when remote observation can handle this shape, otherwise the
    /// reason it cannot.
    pub fn unsupported_reason(&self) -> Option<String> {
        if self.params.len() > Self::MAX_ARITY {
            return Some(format!(
                "arity {} exceeds the supported maximum of {}",
                self.params.len(),
                Self::MAX_ARITY
            ));
        }
        self.params
            .iter()
            .position(|p| *p == ParamKind::Opaque)
            .map(|index| format!("parameter {index} has an opaque type"))
    }
}

/// Token returned by [`EventSource::subscribe`]; needed to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subscription(u64);

pub type HandlerFn = Box<dyn Fn(&[UiValue]) + Send + Sync>;

/// An observable event on a UI node.
///
/// The application fires it from the UI thread via [`EventSource::emit`].
/// Handlers run synchronously on the emitting thread in subscription order,
/// while the internal lock is held: subscribing or unsubscribing from inside
/// a handler deadlocks.
pub struct EventSource {
    shape: EventShape,
    next_token: AtomicU64,
    handlers: Mutex<Vec<(u64, HandlerFn)>>,
}

impl EventSource {
    pub fn new(shape: EventShape) -> Self {
        EventSource {
            shape,
            next_token: AtomicU64::new(1),
            handlers: Mutex::new(Vec::new()),
        }
    }

    pub fn shape(&self) -> &EventShape {
        &self.shape
    }

    pub fn subscribe(&self, handler: HandlerFn) -> Subscription {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        mutex_lock_or_recover(&self.handlers).push((token, handler));
        Subscription(token)
    }

    /// Removes a handler. Returns false when the token is unknown, which
    /// happens on double unsubscription.
    pub fn unsubscribe(&self, token: Subscription) -> bool {
        let mut handlers = mutex_lock_or_recover(&self.handlers);
        let before = handlers.len();
        handlers.retain(|(t, _)| *t != token.0);
        handlers.len() < before
    }

    pub fn handler_count(&self) -> usize {
        mutex_lock_or_recover(&self.handlers).len()
    }

    pub fn emit(&self, args: &[UiValue]) {
        let handlers = mutex_lock_or_recover(&self.handlers);
        for (_, handler) in handlers.iter() {
            handler(args);
        }
    }
}

impl fmt::Debug for EventSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSource")
            .field("shape", &self.shape)
            .field("handlers", &self.handler_count())
            .finish()
    }
}
