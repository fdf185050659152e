use std::io::BufRead;
use std::io::BufReader;
use std::io::ErrorKind;
use std::io::Read;
use std::io::Write;
use std::os::unix::net::UnixListener;
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::mpsc;
use std::sync::mpsc::SyncSender;
use std::sync::Arc;
use std::sync::Mutex;
use std::thread;
use std::time::Duration;
use std::time::Instant;

use tracing::debug;
use tracing::info;
use tracing::warn;

use uipilot_common::mutex_lock_or_recover;
use uipilot_common::process_alive;
use uipilot_model::InputInjector;
use uipilot_model::Scene;
use uipilot_model::ScreenshotSource;
use uipilot_wire::socket_path_for_pid;
use uipilot_wire::WireRequest;
use uipilot_wire::WireResponse;

use crate::config::HostConfig;
use crate::dispatch::UiDispatcher;
use crate::error::HostError;
use crate::serialize::ValueSerializer;
use crate::service::ControlService;

const CHANNEL_CAPACITY: usize = 32;
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(10);
const WORKER_POLL_INTERVAL: Duration = Duration::from_millis(100);
const PARENT_POLL_INTERVAL: Duration = Duration::from_millis(500);
const SHUTDOWN_DRAIN: Duration = Duration::from_secs(5);
const WRITE_TIMEOUT: Duration = Duration::from_secs(30);

/// Configures and starts the in-process control host.
pub struct ControlHostBuilder {
    scene: Arc<dyn Scene>,
    dispatcher: UiDispatcher,
    config: HostConfig,
    input: Option<Arc<dyn InputInjector>>,
    screenshot: Option<Arc<dyn ScreenshotSource>>,
    serializers: Vec<(String, Arc<dyn ValueSerializer>)>,
}

impl ControlHostBuilder {
    pub fn new(scene: Arc<dyn Scene>, dispatcher: UiDispatcher) -> Self {
        ControlHostBuilder {
            scene,
            dispatcher,
            config: HostConfig::default(),
            input: None,
            screenshot: None,
            serializers: Vec::new(),
        }
    }

    pub fn config(mut self, config: HostConfig) -> Self {
        self.config = config;
        self
    }

    pub fn input(mut self, injector: Arc<dyn InputInjector>) -> Self {
        self.input = Some(injector);
        self
    }

    pub fn screenshot(mut self, source: Arc<dyn ScreenshotSource>) -> Self {
        self.screenshot = Some(source);
        self
    }

    pub fn serializer(
        mut self,
        name: impl Into<String>,
        serializer: Arc<dyn ValueSerializer>,
    ) -> Self {
        self.serializers.push((name.into(), serializer));
        self
    }

    /// Binds the control socket and spawns the accept loop plus worker
    /// pool. The calling thread is not blocked; the application's UI loop
    /// keeps running and only services marshaled jobs.
    pub fn start(self) -> Result<ControlHost, HostError> {
        let socket_path = self
            .config
            .socket_path
            .clone()
            .unwrap_or_else(|| socket_path_for_pid(std::process::id()));

        // A leftover socket from a crashed predecessor under a recycled
        // pid would make the bind fail.
        if socket_path.exists() {
            let _ = std::fs::remove_file(&socket_path);
        }

        let listener = UnixListener::bind(&socket_path).map_err(|source| HostError::Bind {
            path: socket_path.clone(),
            source,
        })?;
        listener
            .set_nonblocking(true)
            .map_err(|source| HostError::Bind {
                path: socket_path.clone(),
                source,
            })?;

        let mut service = ControlService::new(
            Arc::clone(&self.scene),
            self.dispatcher,
            self.config.app_version.clone(),
        );
        if let Some(injector) = self.input {
            service = service.with_input(injector);
        }
        if let Some(source) = self.screenshot {
            service = service.with_screenshot(source);
        }
        for (name, serializer) in self.serializers {
            service = service.with_serializer(name, serializer);
        }

        let shutdown = service.shutdown_flag();
        let runtime = Arc::new(HostRuntime {
            service,
            config: self.config.clone(),
            active_connections: AtomicUsize::new(0),
        });

        if let Some(parent_pid) = self.config.parent_pid {
            spawn_parent_watchdog(parent_pid, Arc::clone(&self.scene), Arc::clone(&shutdown))?;
        }

        let pool = ThreadPool::new(
            self.config.max_connections,
            Arc::clone(&runtime),
            Arc::clone(&shutdown),
        )?;

        info!(path = %socket_path.display(), "control host listening");

        let accept_shutdown = Arc::clone(&shutdown);
        let accept_path = socket_path.clone();
        let accept_thread = thread::Builder::new()
            .name("uipilot-accept".to_string())
            .spawn(move || {
                accept_loop(&listener, pool, &runtime, &accept_shutdown);
                let _ = std::fs::remove_file(&accept_path);
                debug!("control host stopped");
            })
            .map_err(HostError::WorkerSpawn)?;

        Ok(ControlHost {
            socket_path,
            shutdown,
            accept_thread: Some(accept_thread),
        })
    }
}

/// Handle on a running control host.
///
/// Dropping it signals shutdown without waiting; [`ControlHost::stop`]
/// additionally waits for the accept loop and workers to wind down.
pub struct ControlHost {
    socket_path: PathBuf,
    shutdown: Arc<AtomicBool>,
    accept_thread: Option<thread::JoinHandle<()>>,
}

impl ControlHost {
    /// Starts with defaults; see [`ControlHostBuilder`] for the long form.
    pub fn start(scene: Arc<dyn Scene>, dispatcher: UiDispatcher) -> Result<ControlHost, HostError> {
        ControlHostBuilder::new(scene, dispatcher).start()
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    pub fn shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Application-initiated stop signal, e.g. from a window-close handler.
    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    /// Stops the host and waits for in-flight connections to drain.
    pub fn stop(mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.accept_thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for ControlHost {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }
}

struct HostRuntime {
    service: ControlService,
    config: HostConfig,
    active_connections: AtomicUsize,
}

impl HostRuntime {
    fn handle_client(&self, stream: UnixStream) {
        if let Err(e) = stream.set_read_timeout(Some(self.config.idle_timeout)) {
            warn!("failed to set read timeout: {e}");
            return;
        }
        if let Err(e) = stream.set_write_timeout(Some(WRITE_TIMEOUT)) {
            warn!("failed to set write timeout: {e}");
            return;
        }
        let mut reader = match stream.try_clone() {
            Ok(clone) => BufReader::new(clone),
            Err(e) => {
                warn!("failed to clone client stream: {e}");
                return;
            }
        };
        let mut writer = stream;

        loop {
            let mut line = Vec::new();
            let limit = self.config.max_request_bytes;
            match (&mut reader)
                .take(limit as u64 + 1)
                .read_until(b'\n', &mut line)
            {
                Ok(0) => break,
                Ok(n) if n > limit => {
                    let response =
                        WireResponse::failure(0, format!("request exceeds {limit} bytes"));
                    let _ = write_response(&mut writer, &response);
                    break;
                }
                Ok(_) => {}
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    debug!("client idle, closing");
                    break;
                }
                Err(e) => {
                    debug!("client read error: {e}");
                    break;
                }
            }

            let text = String::from_utf8_lossy(&line);
            let text = text.trim();
            if text.is_empty() {
                continue;
            }

            let request: WireRequest = match serde_json::from_str(text) {
                Ok(request) => request,
                Err(e) => {
                    let response = WireResponse::failure(0, format!("request parse error: {e}"));
                    if write_response(&mut writer, &response).is_err() {
                        break;
                    }
                    continue;
                }
            };

            let response = self.service.handle(request);
            if write_response(&mut writer, &response).is_err() {
                break;
            }
            if self.service.shutdown_requested() {
                break;
            }
        }
    }
}

fn write_response(stream: &mut UnixStream, response: &WireResponse) -> std::io::Result<()> {
    let mut payload = serde_json::to_vec(response).map_err(std::io::Error::other)?;
    payload.push(b'\n');
    stream.write_all(&payload)?;
    stream.flush()
}

struct ThreadPool {
    workers: Vec<thread::JoinHandle<()>>,
    sender: SyncSender<UnixStream>,
}

impl ThreadPool {
    fn new(
        size: usize,
        runtime: Arc<HostRuntime>,
        shutdown: Arc<AtomicBool>,
    ) -> Result<Self, HostError> {
        let (sender, receiver) = mpsc::sync_channel::<UnixStream>(CHANNEL_CAPACITY);
        let receiver = Arc::new(Mutex::new(receiver));

        let mut workers = Vec::with_capacity(size);
        for id in 0..size {
            let receiver = Arc::clone(&receiver);
            let runtime = Arc::clone(&runtime);
            let shutdown = Arc::clone(&shutdown);

            let handle = thread::Builder::new()
                .name(format!("uipilot-worker-{id}"))
                .spawn(move || loop {
                    if shutdown.load(Ordering::Relaxed) {
                        break;
                    }
                    let stream = {
                        let receiver = mutex_lock_or_recover(&receiver);
                        match receiver.recv_timeout(WORKER_POLL_INTERVAL) {
                            Ok(stream) => stream,
                            Err(mpsc::RecvTimeoutError::Timeout) => continue,
                            Err(mpsc::RecvTimeoutError::Disconnected) => break,
                        }
                    };
                    runtime.active_connections.fetch_add(1, Ordering::Relaxed);
                    runtime.handle_client(stream);
                    runtime.active_connections.fetch_sub(1, Ordering::Relaxed);
                })
                .map_err(HostError::WorkerSpawn)?;
            workers.push(handle);
        }

        Ok(ThreadPool { workers, sender })
    }

    /// Hands the connection to a worker; gives it back when the pool is
    /// saturated or gone so the caller can drop it explicitly.
    fn execute(&self, stream: UnixStream) -> Result<(), UnixStream> {
        self.sender.try_send(stream).map_err(|e| match e {
            mpsc::TrySendError::Full(stream) | mpsc::TrySendError::Disconnected(stream) => stream,
        })
    }

    fn shutdown(self) {
        drop(self.sender);
        for worker in self.workers {
            let _ = worker.join();
        }
    }
}

fn accept_loop(
    listener: &UnixListener,
    pool: ThreadPool,
    runtime: &HostRuntime,
    shutdown: &AtomicBool,
) {
    while !shutdown.load(Ordering::Relaxed) {
        match listener.accept() {
            Ok((stream, _)) => {
                if let Err(stream) = pool.execute(stream) {
                    warn!("worker queue unavailable, dropping connection");
                    drop(stream);
                }
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                thread::sleep(ACCEPT_POLL_INTERVAL);
            }
            Err(e) => {
                if !shutdown.load(Ordering::Relaxed) {
                    warn!("accept failed: {e}");
                }
            }
        }
    }

    let deadline = Instant::now() + SHUTDOWN_DRAIN;
    while runtime.active_connections.load(Ordering::Relaxed) > 0 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(50));
    }
    pool.shutdown();
}

fn spawn_parent_watchdog(
    parent_pid: u32,
    scene: Arc<dyn Scene>,
    shutdown: Arc<AtomicBool>,
) -> Result<(), HostError> {
    thread::Builder::new()
        .name("uipilot-parent-watch".to_string())
        .spawn(move || {
            while !shutdown.load(Ordering::Relaxed) {
                if !process_alive(parent_pid) {
                    warn!(parent_pid, "controlling process exited, shutting down");
                    shutdown.store(true, Ordering::SeqCst);
                    scene.request_shutdown();
                    break;
                }
                thread::sleep(PARENT_POLL_INTERVAL);
            }
        })
        .map_err(HostError::WorkerSpawn)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::BufRead;

    use serde_json::json;
    use serde_json::Value;

    use uipilot_model::fixture::FixtureScene;
    use uipilot_model::fixture::Widget;

    struct RawClient {
        stream: UnixStream,
        reader: BufReader<UnixStream>,
    }

    impl RawClient {
        fn connect(path: &Path) -> RawClient {
            let stream = UnixStream::connect(path).expect("connect");
            stream
                .set_read_timeout(Some(Duration::from_secs(5)))
                .expect("read timeout");
            let reader = BufReader::new(stream.try_clone().expect("clone"));
            RawClient { stream, reader }
        }

        fn send_line(&mut self, line: &str) {
            writeln!(self.stream, "{line}").expect("write");
        }

        fn read_json(&mut self) -> Value {
            let mut line = String::new();
            self.reader.read_line(&mut line).expect("read");
            serde_json::from_str(&line).expect("json")
        }
    }

    fn make_host(config: HostConfig) -> (ControlHost, Arc<FixtureScene>, tempfile::TempDir) {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("host.sock");

        let window = Widget::build("Window").name("Main").finish();
        let scene = Arc::new(FixtureScene::new(vec![window]));
        let (dispatcher, queue) = UiDispatcher::channel();
        std::thread::spawn(move || queue.run());

        let host = ControlHostBuilder::new(scene.clone(), dispatcher)
            .config(config.with_socket_path(&path))
            .start()
            .expect("host start");
        (host, scene, dir)
    }

    fn quick_config() -> HostConfig {
        HostConfig::default()
            .with_max_connections(2)
            .with_idle_timeout(Duration::from_secs(2))
    }

    #[test]
    fn test_host_answers_and_cleans_up_its_socket() {
        let (host, _scene, _dir) = make_host(quick_config());
        let path = host.socket_path().to_path_buf();
        assert!(path.exists());

        let mut client = RawClient::connect(&path);
        client.send_line(&json!({ "id": 1, "op": "ping" }).to_string());
        let response = client.read_json();
        assert_eq!(response["id"], 1);
        assert_eq!(response["result"]["error_messages"], json!([]));

        host.stop();
        assert!(!path.exists());
    }

    #[test]
    fn test_parse_error_answers_but_keeps_the_connection() {
        let (host, _scene, _dir) = make_host(quick_config());
        let mut client = RawClient::connect(host.socket_path());

        client.send_line("this is not json");
        let failure = client.read_json();
        assert_eq!(failure["id"], 0);
        let message = failure["result"]["error_messages"][0]
            .as_str()
            .expect("message");
        assert!(message.contains("parse error"), "got: {message}");

        // Same connection still serves valid requests.
        client.send_line(&json!({ "id": 2, "op": "get_version" }).to_string());
        let version = client.read_json();
        assert_eq!(version["id"], 2);
        assert!(version["result"]["protocol_version"].is_string());

        host.stop();
    }

    #[test]
    fn test_oversize_request_is_rejected_and_closes() {
        let (host, _scene, _dir) = make_host(quick_config().with_max_request_bytes(64));
        let mut client = RawClient::connect(host.socket_path());

        let huge = format!(
            "{{\"id\":3,\"op\":\"get_element\",\"params\":{{\"query\":\"{}\"}}}}",
            "x".repeat(256)
        );
        client.send_line(&huge);
        let failure = client.read_json();
        let message = failure["result"]["error_messages"][0]
            .as_str()
            .expect("message");
        assert!(message.contains("exceeds"), "got: {message}");

        // The server hangs up after an oversize line.
        let mut rest = String::new();
        let outcome = client.reader.read_line(&mut rest);
        assert!(matches!(outcome, Ok(0)), "expected EOF, got {outcome:?}");

        host.stop();
    }

    #[test]
    fn test_remote_shutdown_stops_the_host() {
        let (host, scene, _dir) = make_host(quick_config());
        let path = host.socket_path().to_path_buf();

        let mut client = RawClient::connect(&path);
        client.send_line(&json!({ "id": 4, "op": "shutdown" }).to_string());
        let ack = client.read_json();
        assert_eq!(ack["result"]["error_messages"], json!([]));

        let deadline = Instant::now() + Duration::from_secs(2);
        while path.exists() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert!(!path.exists(), "socket not removed after shutdown");
        assert!(host.shutdown_requested());
        assert!(scene.shutdown_requested());

        host.stop();
    }
}
