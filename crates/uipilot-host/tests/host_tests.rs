//! End-to-end flows against a live host: fixture scene, UI work queue on
//! its own thread, a bound socket, and the wire client talking across it.
//! This is the loop a driving test process actually runs.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use std::time::Instant;

use proptest::prelude::*;
use tempfile::TempDir;

use uipilot_host::ControlHost;
use uipilot_host::ControlHostBuilder;
use uipilot_host::ElementRegistry;
use uipilot_host::HostConfig;
use uipilot_host::SerializerChain;
use uipilot_host::UiDispatcher;
use uipilot_host::ValueSerializer;
use uipilot_model::fixture::FixtureScene;
use uipilot_model::fixture::RecordingInjector;
use uipilot_model::fixture::StaticScreenshot;
use uipilot_model::fixture::Widget;
use uipilot_model::same_node;
use uipilot_model::Color;
use uipilot_model::EventShape;
use uipilot_model::InputAction;
use uipilot_model::InputInjector;
use uipilot_model::MouseButton;
use uipilot_model::NodeRef;
use uipilot_model::ParamKind;
use uipilot_model::Point;
use uipilot_model::Rect;
use uipilot_model::Scene;
use uipilot_model::ScreenshotSource;
use uipilot_model::Size;
use uipilot_model::UiNode;
use uipilot_model::UiValue;
use uipilot_model::ValueType;
use uipilot_wire::Ack;
use uipilot_wire::ControlChannel;
use uipilot_wire::ControlRequest;
use uipilot_wire::ElementResult;
use uipilot_wire::EventIdResult;
use uipilot_wire::InvocationsResult;
use uipilot_wire::PropertyResult;
use uipilot_wire::Session;
use uipilot_wire::PROTOCOL_VERSION;

fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A fixture application with its control host running: a window holding a
/// grid with two buttons, a UI thread draining the work queue, and canned
/// input and screenshot capabilities.
struct App {
    host: ControlHost,
    scene: Arc<FixtureScene>,
    ok_button: Arc<Widget>,
    injector: Arc<RecordingInjector>,
    screenshot: Arc<StaticScreenshot>,
    _dir: TempDir,
}

impl App {
    fn start() -> App {
        App::start_with(|builder| builder)
    }

    fn start_with(customize: impl FnOnce(ControlHostBuilder) -> ControlHostBuilder) -> App {
        let dir = tempfile::tempdir().expect("tempdir");
        let socket = dir.path().join("uipilot-e2e.sock");
        App::boot(dir, Some(socket), customize)
    }

    /// Binds at the pid-derived default path; callers must point
    /// `UIPILOT_SOCKET_DIR` at a private directory beforehand.
    fn start_on_pid_socket(dir: TempDir) -> App {
        App::boot(dir, None, |builder| builder)
    }

    fn boot(
        dir: TempDir,
        socket: Option<PathBuf>,
        customize: impl FnOnce(ControlHostBuilder) -> ControlHostBuilder,
    ) -> App {
        init_tracing();

        let window = Widget::build("Window")
            .name("Main")
            .bounds(Rect::new(0.0, 0.0, 800.0, 600.0))
            .prop("Background", Color::opaque(0x33, 0x66, 0x99))
            .finish();
        let grid = Widget::build("Grid").name("MyGrid").finish();
        let ok_button = Widget::build("Button")
            .name("Ok")
            .focusable()
            .bounds(Rect::new(10.0, 20.0, 80.0, 24.0))
            .prop("Title", "OK")
            .prop("Count", 42i64)
            .event("Click", EventShape::new(vec![ParamKind::Text]))
            .finish();
        let cancel = Widget::build("Button")
            .name("Cancel")
            .prop("Title", "Cancel")
            .finish();
        Widget::add_child(&window, Arc::clone(&grid));
        Widget::add_child(&grid, Arc::clone(&ok_button));
        Widget::add_child(&grid, cancel);

        let scene = Arc::new(FixtureScene::new(vec![window]));
        let (dispatcher, queue) = UiDispatcher::channel();
        thread::spawn(move || queue.run());

        let injector = Arc::new(RecordingInjector::new());
        let screenshot = Arc::new(StaticScreenshot::new("png", vec![0x89, b'P', b'N', b'G']));

        let mut config = HostConfig::default()
            .with_app_version("2.7.0")
            .with_max_connections(4)
            .with_idle_timeout(Duration::from_secs(2));
        if let Some(path) = socket {
            config = config.with_socket_path(path);
        }

        let builder = ControlHostBuilder::new(Arc::clone(&scene) as Arc<dyn Scene>, dispatcher)
            .config(config)
            .input(Arc::clone(&injector) as Arc<dyn InputInjector>)
            .screenshot(Arc::clone(&screenshot) as Arc<dyn ScreenshotSource>);
        let host = customize(builder).start().expect("host start");

        App {
            host,
            scene,
            ok_button,
            injector,
            screenshot,
            _dir: dir,
        }
    }

    fn client(&self) -> ControlChannel {
        ControlChannel::connect_path(self.host.socket_path(), Duration::from_secs(2))
            .expect("connect to host")
    }

    fn resolve(&self, channel: &ControlChannel, query: &str) -> String {
        let result: ElementResult = channel
            .call(ControlRequest::GetElement {
                query: query.to_string(),
                scope_id: None,
            })
            .expect("transport");
        assert_eq!(
            result.error_messages,
            Vec::<String>::new(),
            "query '{query}' failed"
        );
        result.element.expect("element payload").identity
    }
}

#[test]
fn test_session_drives_a_live_application() {
    let dir = tempfile::tempdir().expect("tempdir");
    std::env::set_var("UIPILOT_SOCKET_DIR", dir.path());
    let app = App::start_on_pid_socket(dir);

    let session = Session::attach(std::process::id(), Duration::from_secs(2)).expect("attach");
    session.ping().expect("ping");

    let version = session.version().expect("version");
    assert_eq!(version.app_version, "2.7.0");
    assert_eq!(version.protocol_version, PROTOCOL_VERSION);

    let windows = session.windows().expect("windows");
    assert_eq!(windows.len(), 1);
    let main = session.main_window().expect("main window");
    assert_eq!(windows[0].identity, main.identity);
    assert_eq!(main.declared_type, "Window");

    let ok = session.element("/Button~Ok").expect("resolve ok button");
    assert!(ok.identity.starts_with("Button#"), "got {}", ok.identity);

    // The same button through a scoped query lands on the same identity.
    let grid = session.element("/Grid").expect("resolve grid");
    let ok_again = session.element_in(&grid, "/Button~Ok").expect("scoped resolve");
    assert_eq!(ok.identity, ok_again.identity);

    let title = session
        .property(&ok, "Title")
        .expect("get Title")
        .expect("serialized");
    assert_eq!(title.value_type, "string");
    assert_eq!(title.value, "OK");

    let count = session
        .set_property(&ok, "Count", "68", "int")
        .expect("set Count")
        .expect("read back");
    assert_eq!(count.value, "68");
    assert_eq!(app.ok_button.property("Count"), Some(UiValue::Int(68)));

    let bounds = session.coordinates(&ok).expect("coordinates");
    assert_eq!(bounds, Rect::new(10.0, 20.0, 80.0, 24.0));

    // The grid paints nothing, so the window background shows through.
    let background = session.effective_background(&ok).expect("background");
    assert_eq!(background, Color::opaque(0x33, 0x66, 0x99));

    session.move_keyboard_focus(&ok).expect("focus");
    let focused = app.scene.focused().expect("something focused");
    let ok_node: NodeRef = Arc::clone(&app.ok_button) as NodeRef;
    assert!(same_node(&focused, &ok_node));

    let cursor = session
        .send_input(&[
            InputAction::MouseMove { x: 40.0, y: 50.0 },
            InputAction::MouseDown {
                button: MouseButton::Left,
            },
            InputAction::MouseUp {
                button: MouseButton::Left,
            },
        ])
        .expect("send input");
    assert_eq!(cursor, Point::new(40.0, 50.0));
    assert_eq!(app.injector.actions().len(), 3);

    let frame = session.capture_screen(None).expect("full capture");
    assert_eq!(frame.format, "png");
    assert_eq!(frame.bytes, vec![0x89, b'P', b'N', b'G']);
    assert_eq!(app.screenshot.last_region(), None);

    let scoped = session.capture_screen(Some(&ok)).expect("scoped capture");
    assert_eq!(scoped.bytes, frame.bytes);
    assert_eq!(
        app.screenshot.last_region(),
        Some(Rect::new(10.0, 20.0, 80.0, 24.0))
    );

    let socket = app.host.socket_path().to_path_buf();
    session.shutdown().expect("shutdown");

    let deadline = Instant::now() + Duration::from_secs(2);
    while socket.exists() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(10));
    }
    assert!(!socket.exists(), "socket not removed after shutdown");
    assert!(app.scene.shutdown_requested());

    std::env::remove_var("UIPILOT_SOCKET_DIR");
}

#[test]
fn test_query_failures_surface_in_error_messages() {
    let app = App::start();
    let channel = app.client();

    let cases = [
        ("/Slider", "no element matches"),
        ("/Button", "is ambiguous"),
        ("Ok", "parse error at byte 0"),
    ];
    for (query, needle) in cases {
        let result: ElementResult = channel
            .call(ControlRequest::GetElement {
                query: query.to_string(),
                scope_id: None,
            })
            .expect("transport");
        assert!(result.element.is_none());
        assert!(
            result.error_messages.iter().any(|m| m.contains(needle)),
            "query {query}: {:?}",
            result.error_messages
        );
    }

    let stale_scope: ElementResult = channel
        .call(ControlRequest::GetElement {
            query: "/Button".to_string(),
            scope_id: Some("Window#000000000000".to_string()),
        })
        .expect("transport");
    assert!(stale_scope
        .error_messages
        .iter()
        .any(|m| m.contains("no live element")));
}

#[test]
fn test_event_log_lifecycle_over_the_wire() {
    let app = App::start();
    let channel = app.client();
    let ok = app.resolve(&channel, "/Button~Ok");

    let registered: EventIdResult = channel
        .call(ControlRequest::RegisterForEvent {
            event_id: "clicks".to_string(),
            element_id: ok.clone(),
            event_name: "Click".to_string(),
        })
        .expect("transport");
    assert_eq!(registered.event_id.as_deref(), Some("clicks"));

    // The application fires; the recorder appends without draining.
    assert!(app.ok_button.fire("Click", &[UiValue::Text("first".into())]));
    assert!(app.ok_button.fire("Click", &[UiValue::Text("second".into())]));

    let log: InvocationsResult = channel
        .call(ControlRequest::GetEventInvocations {
            event_id: "clicks".to_string(),
        })
        .expect("transport");
    assert_eq!(
        log.invocations,
        vec![vec!["first".to_string()], vec!["second".to_string()]]
    );

    let ack: Ack = channel
        .call(ControlRequest::UnregisterForEvent {
            event_id: "clicks".to_string(),
        })
        .expect("transport");
    assert_eq!(ack.error_messages, Vec::<String>::new());

    // Firings after unregistration go nowhere and the log is forgotten.
    app.ok_button.fire("Click", &[UiValue::Text("late".into())]);
    let gone: InvocationsResult = channel
        .call(ControlRequest::GetEventInvocations {
            event_id: "clicks".to_string(),
        })
        .expect("transport");
    assert!(gone.invocations.is_empty());
    assert!(gone
        .error_messages
        .iter()
        .any(|m| m.contains("no event registration")));
}

struct HexInt;

impl ValueSerializer for HexInt {
    fn handles(&self, ty: &ValueType) -> bool {
        matches!(ty, ValueType::Int)
    }

    fn serialize(&self, value: &UiValue) -> Option<String> {
        match value {
            UiValue::Int(i) => Some(format!("{i:#x}")),
            _ => None,
        }
    }

    fn deserialize(&self, _ty: &ValueType, raw: &str) -> Option<UiValue> {
        let digits = raw.strip_prefix("0x")?;
        i64::from_str_radix(digits, 16).ok().map(UiValue::Int)
    }
}

#[test]
fn test_remote_serializer_swap_changes_encoding() {
    let app = App::start_with(|builder| builder.serializer("hex-int", Arc::new(HexInt)));
    let channel = app.client();
    let ok = app.resolve(&channel, "/Button~Ok");

    let read_count = |channel: &ControlChannel| -> PropertyResult {
        channel
            .call(ControlRequest::GetProperty {
                element_id: ok.clone(),
                name: "Count".to_string(),
                owner_type: None,
            })
            .expect("transport")
    };

    // The application-installed serializer sits at the front of the chain.
    let hex = read_count(&channel);
    assert_eq!(hex.value.as_deref(), Some("0x2a"));
    assert_eq!(hex.value_type.as_deref(), Some("int"));

    // Splice the stock integer serializer back in front of it.
    let ack: Ack = channel
        .call(ControlRequest::RegisterSerializer {
            type_name: "int".to_string(),
            insert_index: 0,
        })
        .expect("transport");
    assert_eq!(ack.error_messages, Vec::<String>::new());

    let decimal = read_count(&channel);
    assert_eq!(decimal.value.as_deref(), Some("42"));

    // Writes run through the reordered chain as well.
    let written: PropertyResult = channel
        .call(ControlRequest::SetProperty {
            element_id: ok.clone(),
            name: "Count".to_string(),
            value: "97".to_string(),
            value_type: "int".to_string(),
            owner_type: None,
        })
        .expect("transport");
    assert_eq!(written.value.as_deref(), Some("97"));
}

#[test]
fn test_focus_denial_names_the_element() {
    let app = App::start();
    let channel = app.client();
    let cancel = app.resolve(&channel, "/Button~Cancel");

    let ack: Ack = channel
        .call(ControlRequest::MoveKeyboardFocus {
            element_id: cancel.clone(),
        })
        .expect("transport");
    assert!(
        ack.error_messages
            .iter()
            .any(|m| m.contains("cannot take keyboard focus") && m.contains(&cancel)),
        "got {:?}",
        ack.error_messages
    );
    assert!(app.scene.focused().is_none());
}

fn finite_f64() -> impl Strategy<Value = f64> {
    any::<f64>().prop_filter("finite values only", |v| v.is_finite())
}

fn serializable_value() -> impl Strategy<Value = UiValue> {
    prop_oneof![
        any::<bool>().prop_map(UiValue::Bool),
        any::<i64>().prop_map(UiValue::Int),
        finite_f64().prop_map(UiValue::Float),
        ".*".prop_map(UiValue::Text),
        (any::<u8>(), any::<u8>(), any::<u8>(), any::<u8>())
            .prop_map(|(a, r, g, b)| UiValue::Color(Color::new(a, r, g, b))),
        (finite_f64(), finite_f64()).prop_map(|(x, y)| UiValue::Point(Point::new(x, y))),
        (finite_f64(), finite_f64())
            .prop_map(|(width, height)| UiValue::Size(Size::new(width, height))),
        (finite_f64(), finite_f64(), finite_f64(), finite_f64())
            .prop_map(|(x, y, w, h)| UiValue::Rect(Rect::new(x, y, w, h))),
        proptest::collection::vec(".*", 0..4).prop_map(UiValue::TextList),
    ]
}

proptest! {
    /// Every value a builtin serializer claims must survive its own
    /// encode/decode. Floats ride on the shortest-round-trip guarantee of
    /// the standard formatter.
    #[test]
    fn prop_builtin_chain_round_trips(value in serializable_value()) {
        let registry = Arc::new(ElementRegistry::new());
        let chain = SerializerChain::with_builtins(&registry);

        let text = chain.serialize(&value).expect("covered by a builtin");
        let back = chain
            .deserialize(&value.value_type(), &text)
            .expect("parses its own output");
        prop_assert!(back == value, "'{}' decoded to {:?}", text, back);
    }
}
