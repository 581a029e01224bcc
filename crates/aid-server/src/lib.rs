//! HTTP daemon for the aid lifecycle verbs.
//!
//! Every route is a thin translation of one [`Engine`] call: path segments and
//! JSON bodies become arguments, records become JSON, and [`CoreError`] kinds
//! become status codes. All responses carry permissive CORS headers and the
//! `aid-version` header.
//!
//! The [`TestServer`] helper starts a daemon on a random port for integration
//! testing.

use aid_core::{
    shutdown_requested, CoreError, DaemonConfig, Engine, ErrorKind, PackageRef, ALL_ENVIRONMENTS,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use thiserror::Error;
use tiny_http::{Header, Method, Request, Response, Server, StatusCode};
use tracing::{debug, error, info, warn};

pub const API_VERSION: &str = env!("CARGO_PKG_VERSION");

const POLL_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("cannot bind {addr}: {message}")]
    Bind { addr: String, message: String },
    #[error("failed to spawn worker: {0}")]
    Spawn(#[from] std::io::Error),
}

/// A parsed request target. Borrowed segments point into the request URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route<'a> {
    Health,
    ListImages,
    ListContainers,
    ListSolvers,
    ListPackages,
    PackageMeta {
        vendor: &'a str,
        package: &'a str,
    },
    RemovePackage {
        vendor: &'a str,
        package: &'a str,
    },
    ListEnvs {
        vendor: &'a str,
        package: &'a str,
        environment: &'a str,
    },
    SetEnv {
        vendor: &'a str,
        package: &'a str,
        environment: &'a str,
    },
    UnsetEnv {
        vendor: &'a str,
        package: &'a str,
        environment: &'a str,
        key: &'a str,
    },
    Build {
        vendor: &'a str,
        package: &'a str,
        solver: &'a str,
        rebuild: bool,
    },
    GetDockerfile {
        vendor: &'a str,
        package: &'a str,
        solver: &'a str,
    },
    SetDockerfile {
        vendor: &'a str,
        package: &'a str,
        solver: &'a str,
    },
    CreateContainer {
        image: &'a str,
    },
    Start {
        container: &'a str,
    },
    Stop {
        container: &'a str,
    },
    RemoveContainer {
        container: &'a str,
    },
    RemoveImage {
        image: &'a str,
    },
    Infer {
        container: &'a str,
    },
    Preflight,
}

/// Map a method and URL onto a route, or `None` if nothing matches.
pub fn parse_route<'a>(method: &Method, url: &'a str) -> Option<Route<'a>> {
    let (path, query) = match url.split_once('?') {
        Some((path, query)) => (path, query),
        None => (url, ""),
    };
    if *method == Method::Options {
        return Some(Route::Preflight);
    }

    let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
    let route = match (method, segments.as_slice()) {
        (Method::Get, &["health"]) => Route::Health,
        (Method::Get, &["images"]) => Route::ListImages,
        (Method::Get, &["containers"]) => Route::ListContainers,
        (Method::Get, &["solvers"]) => Route::ListSolvers,
        (Method::Get, &["packages"]) => Route::ListPackages,
        (Method::Get, &["packages", vendor, package, "meta"]) => {
            Route::PackageMeta { vendor, package }
        }
        (Method::Delete, &["packages", vendor, package]) => {
            Route::RemovePackage { vendor, package }
        }
        (Method::Get, &["packages", vendor, package, "envs"]) => Route::ListEnvs {
            vendor,
            package,
            environment: query_value(query, "env").unwrap_or(ALL_ENVIRONMENTS),
        },
        (Method::Put, &["packages", vendor, package, "envs", environment]) => Route::SetEnv {
            vendor,
            package,
            environment,
        },
        (Method::Delete, &["packages", vendor, package, "envs", environment, key]) => {
            Route::UnsetEnv {
                vendor,
                package,
                environment,
                key,
            }
        }
        (Method::Put, &["packages", vendor, package, solver, "images"]) => Route::Build {
            vendor,
            package,
            solver,
            rebuild: query_flag(query, "rebuild"),
        },
        (Method::Get, &["packages", vendor, package, solver, "dockerfile"]) => {
            Route::GetDockerfile {
                vendor,
                package,
                solver,
            }
        }
        (Method::Post, &["packages", vendor, package, solver, "dockerfile"]) => {
            Route::SetDockerfile {
                vendor,
                package,
                solver,
            }
        }
        (Method::Put, &["images", image, "containers"]) => Route::CreateContainer { image },
        (Method::Put, &["containers", container, "run"]) => Route::Start { container },
        (Method::Put, &["containers", container, "stop"]) => Route::Stop { container },
        (Method::Delete, &["containers", container]) => Route::RemoveContainer { container },
        (Method::Delete, &["images", image]) => Route::RemoveImage { image },
        (Method::Post, &["containers", container, "infer"]) => Route::Infer { container },
        _ => return None,
    };
    Some(route)
}

fn query_value<'a>(query: &'a str, name: &str) -> Option<&'a str> {
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value)
}

fn query_flag(query: &str, name: &str) -> bool {
    query.split('&').any(|pair| match pair.split_once('=') {
        Some((key, value)) => key == name && matches!(value, "true" | "1" | "yes"),
        None => pair == name,
    })
}

/// HTTP status for an error class.
pub fn status_for(kind: ErrorKind) -> u16 {
    match kind {
        ErrorKind::NotFound => 404,
        ErrorKind::InvalidTransition => 409,
        ErrorKind::MalformedDescriptor | ErrorKind::InvalidArgument => 400,
        ErrorKind::Runtime | ErrorKind::Internal => 500,
    }
}

#[derive(Debug)]
struct ApiError {
    status: u16,
    msg: String,
}

impl ApiError {
    fn new(status: u16, msg: impl Into<String>) -> Self {
        Self {
            status,
            msg: msg.into(),
        }
    }
}

impl From<CoreError> for ApiError {
    fn from(e: CoreError) -> Self {
        Self::new(status_for(e.kind()), e.to_string())
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(e: serde_json::Error) -> Self {
        Self::new(500, format!("serialization error: {e}"))
    }
}

enum Reply {
    Json(Value),
    Text(String),
    Empty,
}

#[derive(Deserialize)]
struct DockerfileBody {
    content: String,
}

#[derive(Deserialize)]
struct EnvBody {
    key: String,
    value: String,
}

fn standard_headers(content_type: &str) -> Vec<Header> {
    [
        ("Content-Type", content_type),
        ("Access-Control-Allow-Origin", "*"),
        ("Access-Control-Allow-Methods", "GET, POST, PUT, DELETE, OPTIONS"),
        ("Access-Control-Allow-Headers", "Content-Type"),
        ("aid-version", API_VERSION),
    ]
    .into_iter()
    .filter_map(|(name, value)| Header::from_bytes(name, value).ok())
    .collect()
}

fn respond(req: Request, status: u16, body: Vec<u8>, content_type: &str) {
    let mut response = Response::from_data(body).with_status_code(StatusCode(status));
    for header in standard_headers(content_type) {
        response.add_header(header);
    }
    if let Err(e) = req.respond(response) {
        debug!("client went away: {e}");
    }
}

fn respond_json(req: Request, status: u16, value: &Value) {
    respond(req, status, value.to_string().into_bytes(), "application/json");
}

fn respond_err(req: Request, err: &ApiError) {
    respond_json(req, err.status, &json!({"code": err.status, "msg": err.msg}));
}

fn read_body(req: &mut Request) -> Result<Vec<u8>, ApiError> {
    let mut body = Vec::new();
    req.as_reader()
        .read_to_end(&mut body)
        .map_err(|e| ApiError::new(400, format!("cannot read request body: {e}")))?;
    Ok(body)
}

fn parse_body<T: for<'de> Deserialize<'de>>(body: &[u8]) -> Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|e| ApiError::new(400, format!("invalid JSON body: {e}")))
}

/// The host port named by a create body, or `default` when none is given.
fn requested_port(body: &[u8], default: &str) -> Result<String, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(default.to_owned());
    }
    let value: Value = parse_body(body)?;
    match value.get("port") {
        None | Some(Value::Null) => Ok(default.to_owned()),
        Some(Value::String(port)) => Ok(port.clone()),
        Some(Value::Number(port)) => Ok(port.to_string()),
        Some(other) => Err(ApiError::new(400, format!("invalid port: {other}"))),
    }
}

fn infer_params(body: &[u8]) -> Result<BTreeMap<String, String>, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(BTreeMap::new());
    }
    parse_body(body)
}

fn dispatch(
    engine: &Engine,
    default_port: &str,
    route: Route<'_>,
    req: &mut Request,
) -> Result<Reply, ApiError> {
    let reply = match route {
        Route::Health => Reply::Json(json!({"status": "ok"})),
        Route::ListImages => Reply::Json(serde_json::to_value(engine.list_images()?)?),
        Route::ListContainers => Reply::Json(serde_json::to_value(engine.list_containers()?)?),
        Route::ListSolvers => Reply::Json(serde_json::to_value(engine.list_solvers()?)?),
        Route::ListPackages => Reply::Json(serde_json::to_value(engine.list_packages()?)?),
        Route::PackageMeta { vendor, package } => {
            let pkg = PackageRef::new(vendor, package, None)?;
            Reply::Json(serde_json::to_value(engine.package_meta(&pkg)?)?)
        }
        Route::RemovePackage { vendor, package } => {
            let pkg = PackageRef::new(vendor, package, None)?;
            engine.remove_package(&pkg)?;
            Reply::Json(json!({"code": 200, "msg": format!("removed package {pkg}")}))
        }
        Route::ListEnvs {
            vendor,
            package,
            environment,
        } => {
            let pkg = PackageRef::new(vendor, package, None)?;
            let vars = engine.env_vars(&pkg, environment)?;
            Reply::Json(json!({"code": 200, "results": serde_json::to_value(vars)?}))
        }
        Route::SetEnv {
            vendor,
            package,
            environment,
        } => {
            let pkg = PackageRef::new(vendor, package, None)?;
            let body: EnvBody = parse_body(&read_body(req)?)?;
            let var = engine.set_env_var(&pkg, environment, &body.key, &body.value)?;
            Reply::Json(serde_json::to_value(var)?)
        }
        Route::UnsetEnv {
            vendor,
            package,
            environment,
            key,
        } => {
            let pkg = PackageRef::new(vendor, package, None)?;
            engine.unset_env_var(&pkg, environment, key)?;
            Reply::Json(json!({"code": 200, "msg": format!("unset {key}")}))
        }
        Route::Build {
            vendor,
            package,
            solver,
            rebuild,
        } => {
            let pkg = PackageRef::new(vendor, package, Some(solver))?;
            let result = engine.build(&pkg, rebuild)?;
            Reply::Json(json!({
                "code": 200,
                "image": serde_json::to_value(&result.image)?,
                "logid": result.log_id.as_str(),
                "reused": result.reused,
            }))
        }
        Route::GetDockerfile {
            vendor,
            package,
            solver,
        } => {
            let pkg = PackageRef::new(vendor, package, Some(solver))?;
            Reply::Json(json!({"content": engine.read_dockerfile(&pkg)?}))
        }
        Route::SetDockerfile {
            vendor,
            package,
            solver,
        } => {
            let pkg = PackageRef::new(vendor, package, Some(solver))?;
            let body: DockerfileBody = parse_body(&read_body(req)?)?;
            let path = engine.write_dockerfile(&pkg, &body.content)?;
            Reply::Json(json!({"code": 200, "path": path.display().to_string()}))
        }
        Route::CreateContainer { image } => {
            let port = requested_port(&read_body(req)?, default_port)?;
            Reply::Json(serde_json::to_value(engine.create(image, &port)?)?)
        }
        Route::Start { container } => Reply::Json(serde_json::to_value(engine.start(container)?)?),
        Route::Stop { container } => Reply::Json(serde_json::to_value(engine.stop(container)?)?),
        Route::RemoveContainer { container } => {
            engine.remove_container(container)?;
            Reply::Json(json!({"code": 200, "msg": format!("removed container {container}")}))
        }
        Route::RemoveImage { image } => {
            engine.remove_image(image)?;
            Reply::Json(json!({"code": 200, "msg": format!("removed image {image}")}))
        }
        Route::Infer { container } => {
            let params = infer_params(&read_body(req)?)?;
            let body = engine.infer(container, &params)?;
            match serde_json::from_str::<Value>(&body) {
                Ok(value) => Reply::Json(value),
                Err(_) => Reply::Text(body),
            }
        }
        Route::Preflight => Reply::Empty,
    };
    Ok(reply)
}

/// Handle a single HTTP request against `engine`.
///
/// `default_port` is the host port used when a create request names none.
pub fn handle_request(engine: &Engine, default_port: &str, mut req: Request) {
    let method = req.method().clone();
    let url = req.url().to_owned();
    debug!("{method} {url}");

    let Some(route) = parse_route(&method, &url) else {
        respond_err(req, &ApiError::new(404, format!("no route for {method} {url}")));
        return;
    };
    let mutating = !matches!(method, Method::Get | Method::Options);

    match dispatch(engine, default_port, route, &mut req) {
        Ok(Reply::Json(value)) => {
            if mutating {
                info!("{method} {url} -> 200");
            }
            respond_json(req, 200, &value);
        }
        Ok(Reply::Text(text)) => respond(req, 200, text.into_bytes(), "text/plain; charset=utf-8"),
        Ok(Reply::Empty) => respond(req, 200, Vec::new(), "text/plain; charset=utf-8"),
        Err(err) => {
            if err.status >= 500 {
                error!("{method} {url} -> {}: {}", err.status, err.msg);
            } else {
                warn!("{method} {url} -> {}: {}", err.status, err.msg);
            }
            respond_err(req, &err);
        }
    }
}

fn serve(server: &Server, engine: &Engine, default_port: &str, stop: &AtomicBool) {
    while !stop.load(Ordering::SeqCst) && !shutdown_requested() {
        match server.recv_timeout(POLL_INTERVAL) {
            Ok(Some(request)) => handle_request(engine, default_port, request),
            Ok(None) => {}
            Err(e) => {
                error!("accept failed: {e}");
                break;
            }
        }
    }
}

fn spawn_workers(
    server: &Arc<Server>,
    engine: &Arc<Engine>,
    default_port: &str,
    workers: usize,
    stop: &Arc<AtomicBool>,
) -> Result<Vec<JoinHandle<()>>, ServerError> {
    (0..workers.max(1))
        .map(|i| {
            let server = Arc::clone(server);
            let engine = Arc::clone(engine);
            let stop = Arc::clone(stop);
            let default_port = default_port.to_owned();
            std::thread::Builder::new()
                .name(format!("aid-worker-{i}"))
                .spawn(move || serve(&server, &engine, &default_port, &stop))
                .map_err(ServerError::from)
        })
        .collect()
}

fn bind(addr: &str) -> Result<Server, ServerError> {
    Server::http(addr).map_err(|e| ServerError::Bind {
        addr: addr.to_owned(),
        message: e.to_string(),
    })
}

/// Serve until the process receives Ctrl-C. Blocks the current thread.
pub fn run_server(engine: Arc<Engine>, config: &DaemonConfig) -> Result<(), ServerError> {
    let addr = format!("{}:{}", config.bind, config.port);
    let server = Arc::new(bind(&addr)?);
    info!(
        "aid daemon {API_VERSION} listening on {addr} with {} workers",
        config.workers
    );

    let stop = Arc::new(AtomicBool::new(false));
    let handles = spawn_workers(
        &server,
        &engine,
        &config.default_container_port,
        config.workers,
        &stop,
    )?;
    for handle in handles {
        if handle.join().is_err() {
            error!("worker thread panicked");
        }
    }
    info!("aid daemon stopped");
    Ok(())
}

/// A daemon on `127.0.0.1:<random port>` serving `engine` from background
/// threads. Dropping it stops the workers.
pub struct TestServer {
    pub url: String,
    pub port: u16,
    server: Arc<Server>,
    stop: Arc<AtomicBool>,
    handles: Vec<JoinHandle<()>>,
}

impl TestServer {
    pub fn start(engine: Engine) -> Result<Self, ServerError> {
        let server = Arc::new(bind("127.0.0.1:0")?);
        let port = server
            .server_addr()
            .to_ip()
            .map(|addr| addr.port())
            .ok_or_else(|| ServerError::Bind {
                addr: "127.0.0.1:0".to_owned(),
                message: "not an IP listener".to_owned(),
            })?;
        let default_port = engine.config().daemon.default_container_port.clone();
        let stop = Arc::new(AtomicBool::new(false));
        let handles = spawn_workers(&server, &Arc::new(engine), &default_port, 2, &stop)?;
        Ok(Self {
            url: format!("http://127.0.0.1:{port}"),
            port,
            server,
            stop,
            handles,
        })
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        self.server.unblock();
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}
