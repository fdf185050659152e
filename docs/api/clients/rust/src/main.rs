//! Minimal control-socket client written against the wire protocol alone,
//! for integrations that cannot depend on the uipilot crates. One JSON
//! request per line, one JSON response per line, ids matched by the caller.

use anyhow::{bail, Context, Result};
use base64::Engine;
use serde_json::{json, Value};
use std::env;
use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;

fn main() -> Result<()> {
    let mut pid = None;
    let mut query = None;
    let mut screenshot = None;

    for arg in env::args().skip(1) {
        if let Some(value) = arg.strip_prefix("--pid=") {
            pid = Some(value.parse::<u32>().context("invalid pid")?);
        } else if let Some(value) = arg.strip_prefix("--query=") {
            query = Some(value.to_string());
        } else if let Some(value) = arg.strip_prefix("--screenshot=") {
            screenshot = Some(PathBuf::from(value));
        }
    }

    let pid = pid.context("missing --pid=<target process id>")?;
    let path = socket_path(pid);
    let stream = UnixStream::connect(&path)
        .with_context(|| format!("failed to connect to {}", path.display()))?;
    eprintln!("connected {}", path.display());

    let mut client = Client {
        reader: BufReader::new(stream.try_clone().context("failed to clone socket")?),
        stream,
        next_id: 0,
    };

    let version = client.call("get_version", None)?;
    println!("{version}");

    let window = client.call("get_main_window", None)?;
    println!("{window}");

    if let Some(query) = query.as_deref() {
        let element = client.call("get_element", Some(json!({ "query": query })))?;
        println!("{element}");
    }

    if let Some(target) = screenshot {
        let capture = client.call("capture_screen", None)?;
        let encoded = capture
            .get("data_base64")
            .and_then(|v| v.as_str())
            .context("capture result carried no image data")?;
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .context("invalid base64 image data")?;
        fs::write(&target, bytes)
            .with_context(|| format!("failed to write {}", target.display()))?;
        eprintln!("wrote {}", target.display());
    }

    Ok(())
}

/// Mirrors the host's socket placement: `UIPILOT_SOCKET_DIR`, then
/// `XDG_RUNTIME_DIR`, then the system temp directory.
fn socket_path(pid: u32) -> PathBuf {
    let dir = env::var("UIPILOT_SOCKET_DIR")
        .or_else(|_| env::var("XDG_RUNTIME_DIR"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| env::temp_dir());
    dir.join(format!("uipilot-{pid}.sock"))
}

struct Client {
    stream: UnixStream,
    reader: BufReader<UnixStream>,
    next_id: u64,
}

impl Client {
    fn call(&mut self, op: &str, params: Option<Value>) -> Result<Value> {
        self.next_id += 1;
        let id = self.next_id;
        let mut request = json!({ "id": id, "op": op });
        if let Some(params) = params {
            request["params"] = params;
        }
        let mut line = serde_json::to_string(&request)?;
        line.push('\n');
        self.stream.write_all(line.as_bytes())?;

        let mut response = String::new();
        let read = self.reader.read_line(&mut response)?;
        if read == 0 {
            bail!("host closed the connection during {op}");
        }
        let value: Value = serde_json::from_str(response.trim_end())?;
        if value.get("id").and_then(|v| v.as_u64()) != Some(id) {
            bail!("response id did not match request {id}");
        }
        let result = value
            .get("result")
            .cloned()
            .context("response carried no result object")?;

        let errors: Vec<&str> = result
            .get("error_messages")
            .and_then(|v| v.as_array())
            .map(|list| list.iter().filter_map(|v| v.as_str()).collect())
            .unwrap_or_default();
        if !errors.is_empty() {
            bail!("{op} failed: {}", errors.join("; "));
        }
        Ok(result)
    }
}
