use std::panic::catch_unwind;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use tracing::debug;
use tracing::info;

use uipilot_model::Color;
use uipilot_model::EncodedImage;
use uipilot_model::InputAction;
use uipilot_model::InputInjector;
use uipilot_model::NodeRef;
use uipilot_model::Point;
use uipilot_model::Rect;
use uipilot_model::Scene;
use uipilot_model::ScreenshotSource;
use uipilot_model::UiValue;
use uipilot_model::ValueType;
use uipilot_wire::Ack;
use uipilot_wire::ColorResult;
use uipilot_wire::ControlRequest;
use uipilot_wire::CursorResult;
use uipilot_wire::ElementHandle;
use uipilot_wire::ElementListResult;
use uipilot_wire::ElementResult;
use uipilot_wire::EventIdResult;
use uipilot_wire::InvocationsResult;
use uipilot_wire::OpResult;
use uipilot_wire::PropertyResult;
use uipilot_wire::RectResult;
use uipilot_wire::ScreenshotResult;
use uipilot_wire::VersionResult;
use uipilot_wire::WireRequest;
use uipilot_wire::WireResponse;
use uipilot_wire::PROTOCOL_VERSION;

use crate::dispatch::panic_text;
use crate::dispatch::UiDispatcher;
use crate::error::ServiceError;
use crate::events::EventRegistrar;
use crate::query;
use crate::registry::ElementRegistry;
use crate::serialize::SerializerCatalog;
use crate::serialize::SerializerChain;
use crate::serialize::ValueSerializer;

/// Executes the control operation catalog against a live scene.
///
/// Every operation that touches an element is marshaled onto the UI thread
/// through the dispatcher and blocks the calling request until the
/// marshaled work finishes. Failures never escape [`ControlService::handle`]:
/// they come back as `error_messages` on the operation's result object,
/// including panics from application code.
pub struct ControlService {
    scene: Arc<dyn Scene>,
    dispatcher: UiDispatcher,
    registry: Arc<ElementRegistry>,
    serializers: Arc<SerializerChain>,
    catalog: Arc<SerializerCatalog>,
    registrar: Arc<EventRegistrar>,
    input: Option<Arc<dyn InputInjector>>,
    screenshot: Option<Arc<dyn ScreenshotSource>>,
    app_version: String,
    shutdown: Arc<AtomicBool>,
}

impl ControlService {
    pub fn new(
        scene: Arc<dyn Scene>,
        dispatcher: UiDispatcher,
        app_version: impl Into<String>,
    ) -> Self {
        let registry = Arc::new(ElementRegistry::new());
        let serializers = Arc::new(SerializerChain::with_builtins(&registry));
        let catalog = Arc::new(SerializerCatalog::with_builtins(&registry));
        ControlService {
            scene,
            dispatcher,
            registry,
            serializers,
            catalog,
            registrar: Arc::new(EventRegistrar::new()),
            input: None,
            screenshot: None,
            app_version: app_version.into(),
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_input(mut self, injector: Arc<dyn InputInjector>) -> Self {
        self.input = Some(injector);
        self
    }

    pub fn with_screenshot(mut self, source: Arc<dyn ScreenshotSource>) -> Self {
        self.screenshot = Some(source);
        self
    }

    /// Adds an application serializer under `name`, active immediately at
    /// the front of the chain and available for remote re-prioritization.
    pub fn with_serializer(
        self,
        name: impl Into<String>,
        serializer: Arc<dyn ValueSerializer>,
    ) -> Self {
        self.catalog.register(name, Arc::clone(&serializer));
        self.serializers.insert(0, serializer);
        self
    }

    /// Set once a remote Shutdown arrives; the accept loop polls it.
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    pub fn shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    pub fn handle(&self, request: WireRequest) -> WireResponse {
        let id = request.id;
        match request.op {
            ControlRequest::Ping => WireResponse::new(id, &Ack::default()),
            ControlRequest::GetVersion => WireResponse::new(id, &self.version()),
            ControlRequest::GetWindows => WireResponse::new(id, &self.guard(|| self.windows())),
            ControlRequest::GetMainWindow => {
                WireResponse::new(id, &self.guard(|| self.main_window()))
            }
            ControlRequest::GetElement { query, scope_id } => {
                WireResponse::new(id, &self.guard(|| self.element(query, scope_id)))
            }
            ControlRequest::GetProperty {
                element_id,
                name,
                owner_type,
            } => WireResponse::new(id, &self.guard(|| self.property(element_id, name, owner_type))),
            ControlRequest::SetProperty {
                element_id,
                name,
                value,
                value_type,
                owner_type,
            } => WireResponse::new(
                id,
                &self.guard(|| self.set_property(element_id, name, value, value_type, owner_type)),
            ),
            ControlRequest::GetEffectiveBackground { element_id } => {
                WireResponse::new(id, &self.guard(|| self.effective_background(element_id)))
            }
            ControlRequest::GetCoordinates { element_id } => {
                WireResponse::new(id, &self.guard(|| self.coordinates(element_id)))
            }
            ControlRequest::RegisterSerializer {
                type_name,
                insert_index,
            } => WireResponse::new(
                id,
                &self.guard(|| self.register_serializer(type_name, insert_index)),
            ),
            ControlRequest::RegisterForEvent {
                event_id,
                element_id,
                event_name,
            } => WireResponse::new(
                id,
                &self.guard(|| self.register_for_event(event_id, element_id, event_name)),
            ),
            ControlRequest::UnregisterForEvent { event_id } => {
                WireResponse::new(id, &self.guard(|| self.unregister_for_event(event_id)))
            }
            ControlRequest::GetEventInvocations { event_id } => {
                WireResponse::new(id, &self.guard(|| self.event_invocations(event_id)))
            }
            ControlRequest::SendInput { actions } => {
                WireResponse::new(id, &self.guard(|| self.send_input(actions)))
            }
            ControlRequest::MoveKeyboardFocus { element_id } => {
                WireResponse::new(id, &self.guard(|| self.move_keyboard_focus(element_id)))
            }
            ControlRequest::CaptureScreen { element_id } => {
                WireResponse::new(id, &self.guard(|| self.capture_screen(element_id)))
            }
            ControlRequest::Shutdown => {
                info!("remote shutdown requested");
                self.shutdown.store(true, Ordering::SeqCst);
                // Not marshaled: the UI loop may already be winding down,
                // and Scene documents this call as thread-agnostic.
                self.scene.request_shutdown();
                WireResponse::new(id, &Ack::default())
            }
        }
    }

    /// Converts operation failures, including panics in application code
    /// reached without a dispatch hop, into error-bearing results.
    fn guard<T, F>(&self, f: F) -> T
    where
        T: OpResult,
        F: FnOnce() -> Result<T, ServiceError>,
    {
        match catch_unwind(AssertUnwindSafe(f)) {
            Ok(Ok(result)) => result,
            Ok(Err(err)) => T::from_errors(vec![err.to_string()]),
            Err(payload) => T::from_errors(vec![format!(
                "operation panicked: {}",
                panic_text(payload.as_ref())
            )]),
        }
    }

    fn version(&self) -> VersionResult {
        VersionResult {
            app_version: self.app_version.clone(),
            protocol_version: PROTOCOL_VERSION.to_string(),
            ..Default::default()
        }
    }

    fn windows(&self) -> Result<ElementListResult, ServiceError> {
        let scene = Arc::clone(&self.scene);
        let registry = Arc::clone(&self.registry);
        let elements = self.dispatcher.run(move || {
            scene
                .windows()
                .iter()
                .map(|window| handle_for(&registry, window))
                .collect::<Vec<_>>()
        })?;
        Ok(ElementListResult {
            elements,
            ..Default::default()
        })
    }

    fn main_window(&self) -> Result<ElementResult, ServiceError> {
        let scene = Arc::clone(&self.scene);
        let registry = Arc::clone(&self.registry);
        let element = self.dispatcher.run(move || {
            scene
                .main_window()
                .map(|window| handle_for(&registry, &window))
                .ok_or(ServiceError::NoMainWindow)
        })??;
        Ok(ElementResult {
            element: Some(element),
            ..Default::default()
        })
    }

    fn element(
        &self,
        query: String,
        scope_id: Option<String>,
    ) -> Result<ElementResult, ServiceError> {
        let scene = Arc::clone(&self.scene);
        let registry = Arc::clone(&self.registry);
        let serializers = Arc::clone(&self.serializers);
        let element = self
            .dispatcher
            .run(move || -> Result<ElementHandle, ServiceError> {
                let root = match scope_id {
                    Some(scope) => registry.resolve(&scope)?,
                    None => scene.main_window().ok_or(ServiceError::NoMainWindow)?,
                };
                let node = query::resolve(&root, &query, &serializers)?;
                Ok(handle_for(&registry, &node))
            })??;
        Ok(ElementResult {
            element: Some(element),
            ..Default::default()
        })
    }

    fn property(
        &self,
        element_id: String,
        name: String,
        owner_type: Option<String>,
    ) -> Result<PropertyResult, ServiceError> {
        let registry = Arc::clone(&self.registry);
        let serializers = Arc::clone(&self.serializers);
        let (value, value_type) = self
            .dispatcher
            .run(move || -> Result<_, ServiceError> {
                let node = registry.resolve(&element_id)?;
                let current = lookup_property(&node, &name, owner_type.as_deref())
                    .ok_or_else(|| ServiceError::UnknownProperty(name))?;
                Ok(serialized_pair(&serializers, &current))
            })??;
        Ok(PropertyResult {
            value,
            value_type,
            ..Default::default()
        })
    }

    fn set_property(
        &self,
        element_id: String,
        name: String,
        value: String,
        value_type: String,
        owner_type: Option<String>,
    ) -> Result<PropertyResult, ServiceError> {
        let declared = ValueType::from_name(&value_type);
        if !self.serializers.has_serializer(&declared) {
            // Writes fail loudly on a serializer miss; dropping the value
            // silently would be indistinguishable from setting it to null.
            return Err(ServiceError::SerializationUnavailable(value_type));
        }
        let parsed = self
            .serializers
            .deserialize(&declared, &value)
            .ok_or_else(|| ServiceError::MalformedValue {
                type_name: value_type,
                value,
            })?;

        let registry = Arc::clone(&self.registry);
        let serializers = Arc::clone(&self.serializers);
        let (value, value_type) = self
            .dispatcher
            .run(move || -> Result<_, ServiceError> {
                let node = registry.resolve(&element_id)?;
                let key = write_key(&node, &name, owner_type.as_deref());
                if !node.set_property(&key, parsed) {
                    return Err(ServiceError::PropertyRejected(key));
                }
                // Read back on the same hop for read-after-write echo.
                let current = node
                    .property(&key)
                    .ok_or_else(|| ServiceError::UnknownProperty(key))?;
                Ok(serialized_pair(&serializers, &current))
            })??;
        Ok(PropertyResult {
            value,
            value_type,
            ..Default::default()
        })
    }

    fn effective_background(&self, element_id: String) -> Result<ColorResult, ServiceError> {
        let registry = Arc::clone(&self.registry);
        let color = self
            .dispatcher
            .run(move || -> Result<Color, ServiceError> {
                let mut current = Some(registry.resolve(&element_id)?);
                while let Some(node) = current {
                    if let Some(UiValue::Color(color)) = node.property("Background") {
                        if !color.is_transparent() {
                            return Ok(color);
                        }
                    }
                    current = node.parent();
                }
                Err(ServiceError::NoBackground)
            })??;
        Ok(ColorResult {
            color: Some(color),
            ..Default::default()
        })
    }

    fn coordinates(&self, element_id: String) -> Result<RectResult, ServiceError> {
        let registry = Arc::clone(&self.registry);
        let rect = self
            .dispatcher
            .run(move || -> Result<Rect, ServiceError> {
                Ok(registry.resolve(&element_id)?.bounds())
            })??;
        Ok(RectResult {
            rect: Some(rect),
            ..Default::default()
        })
    }

    fn register_serializer(
        &self,
        type_name: String,
        insert_index: usize,
    ) -> Result<Ack, ServiceError> {
        let serializer = self.catalog.get(&type_name)?;
        self.serializers.insert(insert_index, serializer);
        debug!(
            type_name = type_name.as_str(),
            index = insert_index,
            "serializer inserted"
        );
        Ok(Ack::default())
    }

    fn register_for_event(
        &self,
        event_id: String,
        element_id: String,
        event_name: String,
    ) -> Result<EventIdResult, ServiceError> {
        let registry = Arc::clone(&self.registry);
        let registrar = Arc::clone(&self.registrar);
        let event_id = self
            .dispatcher
            .run(move || -> Result<String, ServiceError> {
                let node = registry.resolve(&element_id)?;
                registrar.register(&event_id, &node, &event_name)?;
                Ok(event_id)
            })??;
        Ok(EventIdResult {
            event_id: Some(event_id),
            ..Default::default()
        })
    }

    fn unregister_for_event(&self, event_id: String) -> Result<Ack, ServiceError> {
        let registrar = Arc::clone(&self.registrar);
        self.dispatcher.run(move || registrar.unregister(&event_id))??;
        Ok(Ack::default())
    }

    fn event_invocations(&self, event_id: String) -> Result<InvocationsResult, ServiceError> {
        let registrar = Arc::clone(&self.registrar);
        let serializers = Arc::clone(&self.serializers);
        let invocations = self
            .dispatcher
            .run(move || -> Result<Vec<Vec<String>>, ServiceError> {
                let log = registrar.invocations(&event_id)?;
                Ok(log
                    .iter()
                    .map(|args| stringify_args(&serializers, args))
                    .collect())
            })??;
        Ok(InvocationsResult {
            invocations,
            ..Default::default()
        })
    }

    fn send_input(&self, actions: Vec<InputAction>) -> Result<CursorResult, ServiceError> {
        let injector = self
            .input
            .clone()
            .ok_or(ServiceError::NoInputInjector)?;
        let cursor = self
            .dispatcher
            .run(move || -> Result<Point, ServiceError> {
                for action in &actions {
                    injector.perform(action)?;
                }
                Ok(injector.cursor_position())
            })??;
        Ok(CursorResult {
            cursor: Some(cursor),
            ..Default::default()
        })
    }

    fn move_keyboard_focus(&self, element_id: String) -> Result<Ack, ServiceError> {
        let scene = Arc::clone(&self.scene);
        let registry = Arc::clone(&self.registry);
        self.dispatcher
            .run(move || -> Result<(), ServiceError> {
                let node = registry.resolve(&element_id)?;
                if scene.move_keyboard_focus(&node) {
                    Ok(())
                } else {
                    Err(ServiceError::NotFocusable(element_id))
                }
            })??;
        Ok(Ack::default())
    }

    fn capture_screen(&self, element_id: Option<String>) -> Result<ScreenshotResult, ServiceError> {
        let source = self
            .screenshot
            .clone()
            .ok_or(ServiceError::NoScreenshotSource)?;
        let registry = Arc::clone(&self.registry);
        let image = self
            .dispatcher
            .run(move || -> Result<EncodedImage, ServiceError> {
                let region = match element_id {
                    Some(id) => Some(registry.resolve(&id)?.bounds()),
                    None => None,
                };
                Ok(source.capture(region)?)
            })??;
        Ok(ScreenshotResult {
            format: Some(image.format),
            data_base64: Some(STANDARD.encode(&image.bytes)),
            ..Default::default()
        })
    }
}

fn handle_for(registry: &ElementRegistry, node: &NodeRef) -> ElementHandle {
    ElementHandle {
        identity: registry.get_or_assign(node),
        declared_type: node.type_name().to_string(),
    }
}

fn lookup_property(node: &NodeRef, name: &str, owner_type: Option<&str>) -> Option<UiValue> {
    // An owner hint addresses attached properties stored under an
    // "Owner.Name" key; the plain key remains the fallback.
    if let Some(owner) = owner_type {
        if let Some(value) = node.property(&format!("{owner}.{name}")) {
            return Some(value);
        }
    }
    node.property(name)
}

fn write_key(node: &NodeRef, name: &str, owner_type: Option<&str>) -> String {
    if let Some(owner) = owner_type {
        let qualified = format!("{owner}.{name}");
        if node.property(&qualified).is_some() {
            return qualified;
        }
    }
    name.to_string()
}

/// A value with no matching serializer reads back as absent, which is a
/// distinct outcome from an error and from an empty string.
fn serialized_pair(
    serializers: &SerializerChain,
    value: &UiValue,
) -> (Option<String>, Option<String>) {
    match serializers.serialize(value) {
        Some(text) => (Some(text), Some(value.value_type().to_string())),
        None => (None, None),
    }
}

fn stringify_args(serializers: &SerializerChain, args: &[UiValue]) -> Vec<String> {
    args.iter()
        .map(|arg| {
            serializers
                .serialize(arg)
                .unwrap_or_else(|| format!("<unserialized {}>", arg.value_type()))
        })
        .collect()
}
