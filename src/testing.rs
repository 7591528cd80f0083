//! In-process stand-ins for the hosting provider and the game server's FTP.

use axum::extract::{Path as UrlPath, State};
use axum::http::{header, HeaderMap, StatusCode, Uri};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use std::io::{Read, Write};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use tokio::net::TcpListener;

use crate::config::{Config, FtpConfig, HostingConfig, RestoreConfig};
use crate::services::transfer::{RemoteConnector, RemoteEntry, RemoteFs, TransferError};

#[derive(Default)]
struct HostState {
    running: AtomicBool,
    failing: AtomicBool,
    ignore_commands: AtomicBool,
    /// Non-zero: lifecycle commands are answered with this status and not acted on.
    reject_commands: AtomicU16,
    calls: Mutex<Vec<String>>,
    tokens: Mutex<Vec<String>>,
    feed_requests: Mutex<Vec<String>>,
}

/// Fake hosting API plus telemetry feed on an ephemeral local port.
///
/// Lifecycle commands flip the running flag immediately unless
/// `ignore_commands` is set.
pub struct FakeHost {
    addr: SocketAddr,
    state: Arc<HostState>,
}

impl FakeHost {
    pub const TOKEN: &'static str = "test-token";
    pub const SERVER_ID: u64 = 42;

    pub async fn spawn() -> Self {
        let state = Arc::new(HostState::default());
        let app = Router::new()
            .route("/servers/:id/:endpoint", get(server_endpoint))
            .route("/feed/:name", get(feed))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { addr, state }
    }

    pub fn hosting_config(&self) -> HostingConfig {
        HostingConfig {
            api_url: format!("http://{}/servers", self.addr),
            server_id: Self::SERVER_ID,
            api_token: Self::TOKEN.to_string(),
            feed_url: format!("http://{}/feed/{{server_ip}}{{port}}.feed", self.addr),
        }
    }

    /// Full configuration wired to this host, with no restore settle delay.
    pub fn config(&self, backups_dir: &Path) -> Config {
        Config {
            hosting: self.hosting_config(),
            ftp: FtpConfig {
                dir: "/Saves".into(),
                blacklist: vec!["/Backup".into()],
                ..FtpConfig::default()
            },
            backups_dir: backups_dir.to_path_buf(),
            restore: RestoreConfig {
                settle_secs: 0,
                timeout_secs: 5,
            },
            poll_interval_ms: 20,
            ..Config::default()
        }
    }

    pub fn set_running(&self, running: bool) {
        self.state.running.store(running, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.state.running.load(Ordering::SeqCst)
    }

    /// `false` makes the status document come back without its success marker.
    pub fn set_result(&self, ok: bool) {
        self.state.failing.store(!ok, Ordering::SeqCst);
    }

    pub fn ignore_commands(&self, ignore: bool) {
        self.state.ignore_commands.store(ignore, Ordering::SeqCst);
    }

    pub fn reject_commands(&self, status: u16) {
        self.state.reject_commands.store(status, Ordering::SeqCst);
    }

    /// Lifecycle endpoints hit so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.state.calls.lock().unwrap().clone()
    }

    pub fn feed_requests(&self) -> Vec<String> {
        self.state.feed_requests.lock().unwrap().clone()
    }

    pub fn saw_only_token(&self, token: &str) -> bool {
        let tokens = self.state.tokens.lock().unwrap();
        !tokens.is_empty() && tokens.iter().all(|t| t == token)
    }
}

async fn server_endpoint(
    State(state): State<Arc<HostState>>,
    UrlPath((_id, endpoint)): UrlPath<(u64, String)>,
    headers: HeaderMap,
) -> (StatusCode, Json<Value>) {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or_default()
        .to_string();
    state.tokens.lock().unwrap().push(token);

    if endpoint == "status" {
        return (StatusCode::OK, Json(json!({
            "result": !state.failing.load(Ordering::SeqCst),
            "hostname": "fake-host",
            "is_running": state.running.load(Ordering::SeqCst),
            "players": 0,
            "slots": 16,
            "ip": "127.0.0.1",
            "port": 27016,
            "payed_till": "2030-01-01",
        })));
    }

    state.calls.lock().unwrap().push(endpoint.clone());
    let rejected = state.reject_commands.load(Ordering::SeqCst);
    if rejected != 0 {
        let status = StatusCode::from_u16(rejected).unwrap();
        return (status, Json(json!({ "result": false, "error": "rejected" })));
    }
    if !state.ignore_commands.load(Ordering::SeqCst) {
        match endpoint.as_str() {
            "start_async" | "restart_async" => state.running.store(true, Ordering::SeqCst),
            "stop_async" => state.running.store(false, Ordering::SeqCst),
            _ => {}
        }
    }
    (StatusCode::OK, Json(json!({ "result": true })))
}

async fn feed(State(state): State<Arc<HostState>>, uri: Uri) -> Json<Value> {
    state
        .feed_requests
        .lock()
        .unwrap()
        .push(uri.path().to_string());
    Json(json!({
        "players": 2,
        "map": "Alien Planet",
        "players_list": [
            { "name": "Engineer", "score": 5, "time": 120.0 },
            { "name": "Miner", "time": 30.5 },
        ],
    }))
}

/// Blocks connections until opened.
#[derive(Clone, Default)]
pub struct Gate(Arc<(Mutex<bool>, Condvar)>);

impl Gate {
    pub fn open(&self) {
        let (open, cvar) = &*self.0;
        *open.lock().unwrap() = true;
        cvar.notify_all();
    }

    fn wait(&self) {
        let (open, cvar) = &*self.0;
        let mut guard = open.lock().unwrap();
        while !*guard {
            guard = cvar.wait(guard).unwrap();
        }
    }
}

type Hook = Arc<dyn Fn(&str) + Send + Sync>;

/// `RemoteFs` over a local directory that stands in for the FTP root.
pub struct LocalRemote {
    root: PathBuf,
    fail_after: Option<usize>,
    completed: Arc<AtomicUsize>,
    on_upload: Option<Hook>,
}

impl LocalRemote {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            fail_after: None,
            completed: Arc::new(AtomicUsize::new(0)),
            on_upload: None,
        }
    }

    /// Drops the "connection" once `n` file transfers have completed.
    pub fn failing_after(mut self, n: usize) -> Self {
        self.fail_after = Some(n);
        self
    }

    fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(path.trim_start_matches('/'))
    }

    fn check_connection(&self) -> Result<(), TransferError> {
        match self.fail_after {
            Some(n) if self.completed.load(Ordering::SeqCst) >= n => {
                Err(TransferError::Connection("connection reset by peer".into()))
            }
            _ => Ok(()),
        }
    }

    fn rejected(path: &str, e: std::io::Error) -> TransferError {
        TransferError::Rejected {
            path: path.to_string(),
            message: format!("550 {}", e),
        }
    }
}

impl RemoteFs for LocalRemote {
    fn list(&mut self, dir: &str) -> Result<Vec<RemoteEntry>, TransferError> {
        let mut entries = Vec::new();
        for entry in std::fs::read_dir(self.resolve(dir)).map_err(|e| Self::rejected(dir, e))? {
            let entry = entry.map_err(|e| Self::rejected(dir, e))?;
            let meta = entry.metadata().map_err(|e| Self::rejected(dir, e))?;
            entries.push(RemoteEntry {
                name: entry.file_name().to_string_lossy().to_string(),
                is_dir: meta.is_dir(),
                size: if meta.is_dir() { 0 } else { meta.len() },
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    fn download(
        &mut self,
        path: &str,
        sink: &mut dyn Write,
        on_chunk: &mut dyn FnMut(u64),
    ) -> Result<u64, TransferError> {
        self.check_connection()?;
        let mut file =
            std::fs::File::open(self.resolve(path)).map_err(|e| Self::rejected(path, e))?;
        let copied = copy_chunks(&mut file, sink, on_chunk, path)?;
        self.completed.fetch_add(1, Ordering::SeqCst);
        Ok(copied)
    }

    fn upload(
        &mut self,
        path: &str,
        source: &mut dyn Read,
        on_chunk: &mut dyn FnMut(u64),
    ) -> Result<u64, TransferError> {
        self.check_connection()?;
        if let Some(hook) = &self.on_upload {
            hook(path);
        }
        let mut file =
            std::fs::File::create(self.resolve(path)).map_err(|e| Self::rejected(path, e))?;
        let copied = copy_chunks(source, &mut file, on_chunk, path)?;
        self.completed.fetch_add(1, Ordering::SeqCst);
        Ok(copied)
    }

    fn mkdir(&mut self, path: &str) -> Result<(), TransferError> {
        std::fs::create_dir(self.resolve(path)).map_err(|e| Self::rejected(path, e))
    }
}

fn copy_chunks(
    from: &mut dyn Read,
    to: &mut dyn Write,
    on_chunk: &mut dyn FnMut(u64),
    path: &str,
) -> Result<u64, TransferError> {
    let io = |source| TransferError::Io {
        path: path.to_string(),
        source,
    };
    let mut buf = [0u8; 1024];
    let mut total = 0;
    loop {
        let n = from.read(&mut buf).map_err(io)?;
        if n == 0 {
            return Ok(total);
        }
        to.write_all(&buf[..n]).map_err(io)?;
        total += n as u64;
        on_chunk(n as u64);
    }
}

/// Hands out `LocalRemote` sessions rooted at one directory.
pub struct LocalConnector {
    root: PathBuf,
    unreachable: bool,
    gate: Option<Gate>,
    fail_after: Option<usize>,
    on_upload: Option<Hook>,
}

impl LocalConnector {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            unreachable: false,
            gate: None,
            fail_after: None,
            on_upload: None,
        }
    }

    pub fn unreachable() -> Self {
        Self {
            unreachable: true,
            ..Self::new(Path::new("/nonexistent"))
        }
    }

    /// Sessions don't open until `gate().open()` is called.
    pub fn gated(mut self) -> Self {
        self.gate = Some(Gate::default());
        self
    }

    pub fn gate(&self) -> Gate {
        self.gate.clone().unwrap_or_default()
    }

    pub fn failing_after(mut self, n: usize) -> Self {
        self.fail_after = Some(n);
        self
    }

    /// Runs `hook` with the remote path before every file upload.
    pub fn on_upload(mut self, hook: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_upload = Some(Arc::new(hook));
        self
    }
}

impl RemoteConnector for LocalConnector {
    fn connect(&self) -> Result<Box<dyn RemoteFs>, TransferError> {
        if self.unreachable {
            return Err(TransferError::Connect {
                address: "unreachable:21".into(),
                message: "connection refused".into(),
            });
        }
        if let Some(gate) = &self.gate {
            gate.wait();
        }
        let mut remote = LocalRemote::new(&self.root);
        remote.fail_after = self.fail_after;
        remote.on_upload = self.on_upload.clone();
        Ok(Box::new(remote))
    }
}

/// Populates `<root>/Saves` with a small save tree, including a blacklisted
/// `Backup` directory.
pub fn seed_saves(root: &Path) {
    let saves = root.join("Saves");
    std::fs::create_dir_all(saves.join("World/Storage")).unwrap();
    std::fs::create_dir_all(saves.join("Backup/old")).unwrap();
    std::fs::write(saves.join("World/Sandbox.sbc"), vec![7u8; 4_000]).unwrap();
    std::fs::write(saves.join("World/thumb.jpg"), vec![1u8; 200]).unwrap();
    std::fs::write(saves.join("World/Storage/grid.bin"), vec![3u8; 800]).unwrap();
    std::fs::write(saves.join("Backup/old/Sandbox.sbc"), vec![9u8; 1_000]).unwrap();
}
