//! In-process scripted peer for exercising the client against a real socket.
//!
//! The peer binds a loopback listener, serves exactly one connection,
//! records every request it receives, and answers each one through a
//! responder closure. It speaks the same ndjson framing as the client.

use std::io::{BufRead, BufReader, Write};
use std::net::{Shutdown, TcpListener, TcpStream};
use std::sync::{Arc, Mutex, Once};

use serde_json::Value;

static LOG_INIT: Once = Once::new();

/// Route client tracing output through the test harness; enable with
/// `RUST_LOG=simlink=trace`.
fn init_logging() {
    LOG_INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Reply the responder produces for one request.
#[allow(dead_code)] // not every test binary uses every variant
pub enum PeerReply {
    /// `{"result": ...}`
    Result(Value),
    /// `{"error": "..."}`
    Error(String),
    /// Send an arbitrary line, bypassing the reply framing.
    Raw(String),
    /// Sever the connection without answering.
    Hangup,
}

/// One recorded request: command name plus arguments.
pub type RecordedRequest = (String, Value);

pub struct ScriptedPeer {
    port: u32,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl ScriptedPeer {
    /// Bind a listener and serve a single connection with `respond`.
    pub fn spawn<F>(mut respond: F) -> Self
    where
        F: FnMut(&str, &Value) -> PeerReply + Send + 'static,
    {
        init_logging();
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind scripted peer");
        let port = u32::from(listener.local_addr().expect("peer local addr").port());
        let requests = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&requests);
        std::thread::spawn(move || {
            let Ok((stream, _)) = listener.accept() else {
                return;
            };
            serve(stream, &recorded, &mut respond);
        });
        Self { port, requests }
    }

    /// A peer that answers every request with an echo of what it received.
    #[allow(dead_code)]
    pub fn echo() -> Self {
        Self::spawn(|command, arguments| {
            PeerReply::Result(serde_json::json!({
                "echo": command,
                "arguments": arguments,
            }))
        })
    }

    pub fn port(&self) -> u32 {
        self.port
    }

    /// Command names in the order the peer received them.
    pub fn commands(&self) -> Vec<String> {
        self.requests
            .lock()
            .expect("requests lock")
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Full recorded requests in arrival order.
    #[allow(dead_code)]
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().expect("requests lock").clone()
    }
}

fn serve<F>(stream: TcpStream, requests: &Mutex<Vec<RecordedRequest>>, respond: &mut F)
where
    F: FnMut(&str, &Value) -> PeerReply,
{
    let mut writer = stream.try_clone().expect("clone peer stream");
    let reader = BufReader::new(stream);
    for line in reader.lines() {
        let Ok(line) = line else {
            return;
        };
        let frame: Value = serde_json::from_str(&line).expect("request is valid json");
        let command = frame
            .get("command")
            .and_then(Value::as_str)
            .expect("request has a command field")
            .to_string();
        let arguments = frame.get("arguments").cloned().unwrap_or(Value::Null);
        requests
            .lock()
            .expect("requests lock")
            .push((command.clone(), arguments.clone()));

        let line = match respond(&command, &arguments) {
            PeerReply::Result(value) => serde_json::json!({"result": value}).to_string(),
            PeerReply::Error(message) => serde_json::json!({"error": message}).to_string(),
            PeerReply::Raw(raw) => raw,
            PeerReply::Hangup => {
                let _ = writer.shutdown(Shutdown::Both);
                return;
            }
        };
        if writer.write_all(format!("{line}\n").as_bytes()).is_err() {
            return;
        }
    }
}
