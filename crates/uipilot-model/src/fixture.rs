//! In-memory widget tree for exercising the control host without a real
//! toolkit. Used by tests throughout the workspace and usable by
//! applications as a reference `UiNode` implementation.

use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::OnceLock;
use std::sync::RwLock;
use std::sync::Weak;

use uipilot_common::mutex_lock_or_recover;
use uipilot_common::rwlock_read_or_recover;
use uipilot_common::rwlock_write_or_recover;

use crate::event::EventShape;
use crate::event::EventSource;
use crate::geometry::Point;
use crate::geometry::Rect;
use crate::node::same_node;
use crate::node::NodeRef;
use crate::node::UiNode;
use crate::scene::CaptureFailed;
use crate::scene::EncodedImage;
use crate::scene::InputAction;
use crate::scene::InputInjector;
use crate::scene::InputRejected;
use crate::scene::Scene;
use crate::scene::ScreenshotSource;
use crate::value::UiValue;

/// A concrete [`UiNode`] backed by plain maps.
///
/// Properties keep the type they were declared with: writes of a different
/// kind are rejected, which mirrors how real toolkits refuse mistyped
/// assignments.
#[derive(Debug)]
pub struct Widget {
    type_name: String,
    name: Option<String>,
    focusable: bool,
    bounds: Rect,
    identity: OnceLock<String>,
    parent: RwLock<Weak<Widget>>,
    children: RwLock<Vec<Arc<Widget>>>,
    properties: RwLock<HashMap<String, UiValue>>,
    events: HashMap<String, Arc<EventSource>>,
}

impl Widget {
    pub fn build(type_name: &str) -> WidgetBuilder {
        WidgetBuilder {
            type_name: type_name.to_string(),
            name: None,
            focusable: false,
            bounds: Rect::default(),
            properties: HashMap::new(),
            events: HashMap::new(),
        }
    }

    /// Appends `child` under `parent` and records the back-reference.
    pub fn add_child(parent: &Arc<Widget>, child: Arc<Widget>) {
        *rwlock_write_or_recover(&child.parent) = Arc::downgrade(parent);
        rwlock_write_or_recover(&parent.children).push(child);
    }

    /// Emits a declared event. Returns false when no such event exists.
    pub fn fire(&self, event: &str, args: &[UiValue]) -> bool {
        match self.events.get(event) {
            Some(source) => {
                source.emit(args);
                true
            }
            None => false,
        }
    }
}

impl UiNode for Widget {
    fn type_name(&self) -> &str {
        &self.type_name
    }

    fn assigned_name(&self) -> Option<String> {
        self.name.clone()
    }

    fn identity_slot(&self) -> &OnceLock<String> {
        &self.identity
    }

    fn parent(&self) -> Option<NodeRef> {
        let parent = rwlock_read_or_recover(&self.parent).upgrade()?;
        Some(parent as NodeRef)
    }

    fn children(&self) -> Vec<NodeRef> {
        rwlock_read_or_recover(&self.children)
            .iter()
            .map(|child| Arc::clone(child) as NodeRef)
            .collect()
    }

    fn property(&self, key: &str) -> Option<UiValue> {
        rwlock_read_or_recover(&self.properties).get(key).cloned()
    }

    fn set_property(&self, key: &str, value: UiValue) -> bool {
        let mut properties = rwlock_write_or_recover(&self.properties);
        match properties.get(key) {
            Some(current) if current.value_type() == value.value_type() => {
                properties.insert(key.to_string(), value);
                true
            }
            _ => false,
        }
    }

    fn event(&self, name: &str) -> Option<Arc<EventSource>> {
        self.events.get(name).map(Arc::clone)
    }

    fn bounds(&self) -> Rect {
        self.bounds
    }

    fn focusable(&self) -> bool {
        self.focusable
    }
}

pub struct WidgetBuilder {
    type_name: String,
    name: Option<String>,
    focusable: bool,
    bounds: Rect,
    properties: HashMap<String, UiValue>,
    events: HashMap<String, Arc<EventSource>>,
}

impl WidgetBuilder {
    pub fn name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    pub fn focusable(mut self) -> Self {
        self.focusable = true;
        self
    }

    pub fn bounds(mut self, bounds: Rect) -> Self {
        self.bounds = bounds;
        self
    }

    pub fn prop(mut self, key: &str, value: impl Into<UiValue>) -> Self {
        self.properties.insert(key.to_string(), value.into());
        self
    }

    pub fn event(mut self, name: &str, shape: EventShape) -> Self {
        self.events
            .insert(name.to_string(), Arc::new(EventSource::new(shape)));
        self
    }

    pub fn finish(self) -> Arc<Widget> {
        Arc::new(Widget {
            type_name: self.type_name,
            name: self.name,
            focusable: self.focusable,
            bounds: self.bounds,
            identity: OnceLock::new(),
            parent: RwLock::new(Weak::new()),
            children: RwLock::new(Vec::new()),
            properties: RwLock::new(self.properties),
            events: self.events,
        })
    }
}

/// [`Scene`] over a fixed set of fixture windows. The first window passed in
/// is the main window.
pub struct FixtureScene {
    windows: Vec<Arc<Widget>>,
    focused: Mutex<Option<NodeRef>>,
    shutdown: AtomicBool,
}

impl FixtureScene {
    pub fn new(windows: Vec<Arc<Widget>>) -> Self {
        FixtureScene {
            windows,
            focused: Mutex::new(None),
            shutdown: AtomicBool::new(false),
        }
    }

    pub fn focused(&self) -> Option<NodeRef> {
        mutex_lock_or_recover(&self.focused).clone()
    }

    pub fn shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }
}

impl Scene for FixtureScene {
    fn windows(&self) -> Vec<NodeRef> {
        self.windows
            .iter()
            .map(|window| Arc::clone(window) as NodeRef)
            .collect()
    }

    fn main_window(&self) -> Option<NodeRef> {
        self.windows.first().map(|window| Arc::clone(window) as NodeRef)
    }

    fn move_keyboard_focus(&self, target: &NodeRef) -> bool {
        if !target.focusable() {
            return false;
        }
        let mut focused = mutex_lock_or_recover(&self.focused);
        if let Some(previous) = focused.as_ref() {
            if same_node(previous, target) {
                return true;
            }
            previous.set_property("Focused", UiValue::Bool(false));
        }
        target.set_property("Focused", UiValue::Bool(true));
        *focused = Some(Arc::clone(target));
        true
    }

    fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }
}

/// [`InputInjector`] that records every action and tracks the pointer.
#[derive(Default)]
pub struct RecordingInjector {
    deny_keys: bool,
    actions: Mutex<Vec<InputAction>>,
    cursor: Mutex<Point>,
}

impl RecordingInjector {
    pub fn new() -> Self {
        RecordingInjector::default()
    }

    /// Makes key actions fail, for exercising rejection paths.
    pub fn deny_keys(mut self) -> Self {
        self.deny_keys = true;
        self
    }

    pub fn actions(&self) -> Vec<InputAction> {
        mutex_lock_or_recover(&self.actions).clone()
    }
}

impl InputInjector for RecordingInjector {
    fn perform(&self, action: &InputAction) -> Result<(), InputRejected> {
        match action {
            InputAction::KeyDown { key } | InputAction::KeyUp { key } if self.deny_keys => {
                return Err(InputRejected(format!("key '{key}' is not injectable")));
            }
            InputAction::MouseMove { x, y } => {
                *mutex_lock_or_recover(&self.cursor) = Point::new(*x, *y);
            }
            _ => {}
        }
        mutex_lock_or_recover(&self.actions).push(action.clone());
        Ok(())
    }

    fn cursor_position(&self) -> Point {
        *mutex_lock_or_recover(&self.cursor)
    }
}

/// [`ScreenshotSource`] that hands back a canned image and remembers the
/// last requested region.
pub struct StaticScreenshot {
    format: String,
    bytes: Vec<u8>,
    last_region: Mutex<Option<Rect>>,
}

impl StaticScreenshot {
    pub fn new(format: &str, bytes: Vec<u8>) -> Self {
        StaticScreenshot {
            format: format.to_string(),
            bytes,
            last_region: Mutex::new(None),
        }
    }

    pub fn last_region(&self) -> Option<Rect> {
        *mutex_lock_or_recover(&self.last_region)
    }
}

impl ScreenshotSource for StaticScreenshot {
    fn capture(&self, region: Option<Rect>) -> Result<EncodedImage, CaptureFailed> {
        *mutex_lock_or_recover(&self.last_region) = region;
        Ok(EncodedImage {
            format: self.format.clone(),
            bytes: self.bytes.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::ParamKind;
    use crate::geometry::Color;
    use crate::scene::MouseButton;

    fn sample_window() -> Arc<Widget> {
        let window = Widget::build("Window")
            .name("Main")
            .bounds(Rect::new(0.0, 0.0, 800.0, 600.0))
            .prop("Background", Color::opaque(30, 30, 30))
            .finish();
        let button = Widget::build("Button")
            .name("Ok")
            .focusable()
            .bounds(Rect::new(10.0, 20.0, 80.0, 24.0))
            .prop("Text", "OK")
            .event("Click", EventShape::new(vec![ParamKind::Point]))
            .finish();
        Widget::add_child(&window, button);
        window
    }

    fn only_child(window: &Arc<Widget>) -> Arc<Widget> {
        rwlock_read_or_recover(&window.children)[0].clone()
    }

    #[test]
    fn test_parent_links_are_weak_back_references() {
        let window = sample_window();
        let window_ref: NodeRef = Arc::clone(&window) as NodeRef;
        let button = window.children().remove(0);
        let parent = button.parent().expect("button should have a parent");
        assert!(same_node(&parent, &window_ref));
    }

    #[test]
    fn test_property_writes_keep_declared_type() {
        let window = sample_window();
        let button = only_child(&window);

        assert!(button.set_property("Text", UiValue::Text("Go".into())));
        assert_eq!(button.property("Text"), Some(UiValue::Text("Go".into())));

        assert!(!button.set_property("Text", UiValue::Bool(true)));
        assert!(!button.set_property("Missing", UiValue::Bool(true)));
    }

    #[test]
    fn test_fire_reaches_subscribed_handler() {
        let window = sample_window();
        let button = only_child(&window);
        let click = button.event("Click").expect("click event");

        let hits = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&hits);
        click.subscribe(Box::new(move |args| {
            sink.lock().unwrap().push(args.to_vec());
        }));

        assert!(button.fire("Click", &[UiValue::Point(Point::new(1.0, 2.0))]));
        assert!(!button.fire("DoubleClick", &[]));

        let hits = hits.lock().unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0], vec![UiValue::Point(Point::new(1.0, 2.0))]);
    }

    #[test]
    fn test_focus_moves_between_focusable_widgets() {
        let window = sample_window();
        let label = Widget::build("Label").name("Hint").finish();
        Widget::add_child(&window, label);
        let scene = FixtureScene::new(vec![Arc::clone(&window)]);

        let children = window.children();
        let button = &children[0];
        let label = &children[1];

        assert!(scene.move_keyboard_focus(button));
        assert!(same_node(&scene.focused().unwrap(), button));

        assert!(!scene.move_keyboard_focus(label));
        assert!(same_node(&scene.focused().unwrap(), button));
    }

    #[test]
    fn test_shutdown_request_is_latched() {
        let scene = FixtureScene::new(vec![sample_window()]);
        assert!(!scene.shutdown_requested());
        scene.request_shutdown();
        assert!(scene.shutdown_requested());
    }

    #[test]
    fn test_recording_injector_tracks_cursor() {
        let injector = RecordingInjector::new();
        injector
            .perform(&InputAction::MouseMove { x: 42.0, y: 7.0 })
            .unwrap();
        injector
            .perform(&InputAction::MouseDown {
                button: MouseButton::Left,
            })
            .unwrap();

        assert_eq!(injector.cursor_position(), Point::new(42.0, 7.0));
        assert_eq!(injector.actions().len(), 2);
    }

    #[test]
    fn test_deny_keys_rejects_key_actions_only() {
        let injector = RecordingInjector::new().deny_keys();
        assert!(injector
            .perform(&InputAction::KeyDown { key: "a".into() })
            .is_err());
        assert!(injector
            .perform(&InputAction::Text { text: "a".into() })
            .is_ok());
    }

    #[test]
    fn test_static_screenshot_remembers_region() {
        let source = StaticScreenshot::new("png", vec![1, 2, 3]);
        let region = Rect::new(5.0, 5.0, 10.0, 10.0);
        let image = source.capture(Some(region)).unwrap();

        assert_eq!(image.format, "png");
        assert_eq!(image.bytes, vec![1, 2, 3]);
        assert_eq!(source.last_region(), Some(region));
    }
}
