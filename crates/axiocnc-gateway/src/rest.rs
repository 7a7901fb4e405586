//! REST surface: the stateless request/response counterpart to the Session
//! Hub's persistent WebSocket connections, for clients that just want to
//! poll status, upload a program, or manage the Configuration Store's
//! persisted collections without holding a socket open.
//!
//! Grounded on `dennisss-dacha/pkg/haystack/http.rs`'s `json_response`
//! helper and route-per-handler shape, rebuilt on hyper 1.0 (the teacher's
//! `hyper`/`http` deps were aspirational under `gcodekit4-communication`;
//! hyper 1.0 dropped the `Server::bind` convenience the 0.12-era teacher
//! code used, so the accept loop here is written against
//! `hyper::server::conn::http1` + `hyper_util::rt::TokioIo` instead).

use crate::auth::AuthService;
use crate::hub::SessionHub;
use axiocnc_core::data::ReadyState;
use axiocnc_core::error::Error;
use axiocnc_core::ids::{ControllerFamily, ControllerId};
use axiocnc_core::modal::ModalState;
use axiocnc_core::workflow::WorkflowState;
use axiocnc_runtime::{AggregatedStatus, Command, FeederCounters, SenderCounters};
use axiocnc_store::{Macro, MdiEntry, Record, RecordStore, Role, Tool, User, WatchFolder};
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use percent_encoding::percent_decode_str;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

const DEFAULT_BAUD_RATE: u32 = 115_200;

pub struct RestApi {
    hub: Arc<SessionHub>,
    auth: Arc<AuthService>,
    macros: Arc<RecordStore<Macro>>,
    mdi: Arc<RecordStore<MdiEntry>>,
    tools: Arc<RecordStore<Tool>>,
    watch_folders: Arc<RecordStore<WatchFolder>>,
    users: Arc<RecordStore<User>>,
}

impl RestApi {
    pub fn new(
        hub: Arc<SessionHub>,
        auth: Arc<AuthService>,
        macros: Arc<RecordStore<Macro>>,
        mdi: Arc<RecordStore<MdiEntry>>,
        tools: Arc<RecordStore<Tool>>,
        watch_folders: Arc<RecordStore<WatchFolder>>,
        users: Arc<RecordStore<User>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            hub,
            auth,
            macros,
            mdi,
            tools,
            watch_folders,
            users,
        })
    }

    pub async fn serve(self: Arc<Self>, addr: SocketAddr) -> std::io::Result<()> {
        let listener = TcpListener::bind(addr).await?;
        tracing::info!(%addr, "rest api listening");
        loop {
            let (stream, peer) = listener.accept().await?;
            let api = self.clone();
            tokio::spawn(async move {
                let io = TokioIo::new(stream);
                let service = service_fn(move |req| {
                    let api = api.clone();
                    async move { Ok::<_, Infallible>(api.route(req).await) }
                });
                if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                    tracing::debug!(%peer, "rest connection error: {err}");
                }
            });
        }
    }

    async fn route(&self, req: Request<Incoming>) -> Response<Full<Bytes>> {
        let method = req.method().clone();
        let path = req.uri().path().to_string();
        let query = parse_query(req.uri().query().unwrap_or(""));
        let segments: Vec<String> = path
            .split('/')
            .filter(|s| !s.is_empty())
            .map(|s| percent_decode_str(s).decode_utf8_lossy().into_owned())
            .collect();

        if path != "/auth/login" {
            if let Err(err) = self.authenticate(&req).await {
                return error_response(StatusCode::UNAUTHORIZED, err.to_string());
            }
        }

        let body = match Self::read_body(req).await {
            Ok(bytes) => bytes,
            Err(err) => return error_response(StatusCode::BAD_REQUEST, err.to_string()),
        };

        match (method.clone(), segments.iter().map(String::as_str).collect::<Vec<_>>().as_slice()) {
            (Method::POST, ["auth", "login"]) => self.handle_login(&body).await,
            (Method::POST, ["auth", "logout"]) => self.handle_logout(&req_token(&body)).await,
            (Method::GET, ["controllers"]) => self.handle_list_controllers().await,
            (Method::GET, ["machine", "status"]) => self.handle_machine_status(&query).await,
            (Method::POST, ["gcode"]) => self.handle_gcode_load(&body).await,
            (Method::GET, ["gcode"]) => self.handle_gcode_status(&query).await,
            (Method::POST, ["controllers", port, "open"]) => self.handle_open(port, &query).await,
            (Method::POST, ["controllers", port, "close"]) => self.handle_close(port).await,
            (m, ["macros", rest @ ..]) => {
                crud_collection(&self.macros, &m, rest.first().copied(), &body, make_macro).await
            }
            (m, ["mdi", rest @ ..]) => {
                crud_collection(&self.mdi, &m, rest.first().copied(), &body, make_mdi_entry).await
            }
            (m, ["tools", rest @ ..]) => {
                crud_collection(&self.tools, &m, rest.first().copied(), &body, make_tool).await
            }
            (m, ["watch-folders", rest @ ..]) => {
                crud_collection(&self.watch_folders, &m, rest.first().copied(), &body, make_watch_folder)
                    .await
            }
            (m, ["users", rest @ ..]) => {
                crud_collection(&self.users, &m, rest.first().copied(), &body, |new, id| {
                    make_user(new, id)
                })
                .await
            }
            _ => error_response(StatusCode::NOT_FOUND, "no such route"),
        }
    }

    async fn authenticate(&self, req: &Request<Incoming>) -> Result<(), Error> {
        let token = req
            .headers()
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(crate::auth::extract_bearer_token);
        self.auth.verify(token).await?;
        Ok(())
    }

    async fn read_body(req: Request<Incoming>) -> Result<Vec<u8>, String> {
        req.into_body()
            .collect()
            .await
            .map(|collected| collected.to_bytes().to_vec())
            .map_err(|e| e.to_string())
    }

    async fn handle_login(&self, body: &[u8]) -> Response<Full<Bytes>> {
        #[derive(Deserialize)]
        struct LoginRequest {
            username: String,
            password: String,
        }
        let request: LoginRequest = match serde_json::from_slice(body) {
            Ok(r) => r,
            Err(err) => return error_response(StatusCode::BAD_REQUEST, err.to_string()),
        };
        match self.auth.login(&request.username, &request.password).await {
            Ok(token) => json_response(StatusCode::OK, &serde_json::json!({ "token": token })),
            Err(err) => error_response(StatusCode::UNAUTHORIZED, err.to_string()),
        }
    }

    async fn handle_logout(&self, token: &Option<String>) -> Response<Full<Bytes>> {
        if let Some(token) = token {
            self.auth.logout(token).await;
        }
        empty_response(StatusCode::NO_CONTENT)
    }

    async fn handle_list_controllers(&self) -> Response<Full<Bytes>> {
        let mut summaries = Vec::new();
        for id in self.hub.list_ports().await {
            let status = self.hub.status_snapshot(&id).await;
            summaries.push(ControllerSummary::new(&id, status));
        }
        json_response(StatusCode::OK, &summaries)
    }

    async fn handle_machine_status(&self, query: &HashMap<String, String>) -> Response<Full<Bytes>> {
        let Some(port) = query.get("port") else {
            return error_response(StatusCode::BAD_REQUEST, "missing 'port' query parameter");
        };
        match self.resolve_open_id(port).await {
            Some(id) => match self.hub.status_snapshot(&id).await {
                Some(status) => json_response(StatusCode::OK, &status),
                None => error_response(StatusCode::NOT_FOUND, "no status reported yet"),
            },
            None => error_response(StatusCode::NOT_FOUND, format!("port not open: {port}")),
        }
    }

    async fn handle_gcode_load(&self, body: &[u8]) -> Response<Full<Bytes>> {
        #[derive(Deserialize)]
        struct GcodeLoadRequest {
            port: String,
            #[serde(default = "default_baud_rate")]
            baud_rate: u32,
            name: String,
            text: String,
            #[serde(default)]
            context: Value,
        }
        let request: GcodeLoadRequest = match serde_json::from_slice(body) {
            Ok(r) => r,
            Err(err) => return error_response(StatusCode::BAD_REQUEST, err.to_string()),
        };
        let id = ControllerId::new(request.port.clone(), request.baud_rate);
        let command = Command::GcodeLoad {
            name: request.name,
            text: request.text,
            context: request.context,
        };
        match self.hub.rest_command(&id, command).await {
            Ok(()) => empty_response(StatusCode::ACCEPTED),
            Err(err) => error_response(error_status(&err), err.to_string()),
        }
    }

    async fn handle_gcode_status(&self, query: &HashMap<String, String>) -> Response<Full<Bytes>> {
        let Some(port) = query.get("port") else {
            return error_response(StatusCode::BAD_REQUEST, "missing 'port' query parameter");
        };
        match self.resolve_open_id(port).await {
            Some(id) => match self.hub.status_snapshot(&id).await {
                Some(status) => json_response(
                    StatusCode::OK,
                    &serde_json::json!({
                        "workflowState": status.workflow_state,
                        "sender": status.sender,
                        "feeder": status.feeder,
                    }),
                ),
                None => error_response(StatusCode::NOT_FOUND, "no status reported yet"),
            },
            None => error_response(StatusCode::NOT_FOUND, format!("port not open: {port}")),
        }
    }

    async fn handle_open(&self, port: &str, query: &HashMap<String, String>) -> Response<Full<Bytes>> {
        let baud_rate = query
            .get("baud_rate")
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(DEFAULT_BAUD_RATE);
        let family = query
            .get("controller_type")
            .and_then(|v| controller_family_from_str(v))
            .unwrap_or_default();
        let id = ControllerId::new(port.to_string(), baud_rate);
        let snapshot = self.hub.rest_open(id, family).await;
        json_response(StatusCode::OK, &serde_json::json!({ "port": port, "snapshot": snapshot }))
    }

    async fn handle_close(&self, port: &str) -> Response<Full<Bytes>> {
        match self.resolve_open_id(port).await {
            Some(id) => {
                self.hub.rest_close(&id).await;
                empty_response(StatusCode::NO_CONTENT)
            }
            None => error_response(StatusCode::NOT_FOUND, format!("port not open: {port}")),
        }
    }

    /// REST requests address a port by its path string alone, not the full
    /// `(port, baud_rate)` identity the Session Hub keys Controllers by — a
    /// client polling `/machine/status?port=…` has no reason to know the
    /// baud rate a WebSocket session already opened it at.
    async fn resolve_open_id(&self, port: &str) -> Option<ControllerId> {
        self.hub.list_ports().await.into_iter().find(|id| id.port == port)
    }
}

fn default_baud_rate() -> u32 {
    DEFAULT_BAUD_RATE
}

fn controller_family_from_str(value: &str) -> Option<ControllerFamily> {
    match value {
        "grbl" => Some(ControllerFamily::Grbl),
        "marlin" => Some(ControllerFamily::Marlin),
        "smoothieware" => Some(ControllerFamily::Smoothieware),
        "tinyg" => Some(ControllerFamily::TinyG),
        "g2core" => Some(ControllerFamily::G2core),
        _ => None,
    }
}

fn req_token(body: &[u8]) -> Option<String> {
    serde_json::from_slice::<Value>(body)
        .ok()
        .and_then(|v| v.get("token").and_then(Value::as_str).map(str::to_string))
}

#[derive(Serialize)]
struct ControllerSummary {
    port: String,
    baud_rate: u32,
    controller_type: Option<String>,
    ready: bool,
    homed: bool,
    controller_state: Option<ModalState>,
    sender_state: Option<SenderCounters>,
    feeder_state: Option<FeederCounters>,
    workflow_state: Option<WorkflowState>,
}

impl ControllerSummary {
    fn new(id: &ControllerId, status: Option<AggregatedStatus>) -> Self {
        let Some(status) = status else {
            return Self {
                port: id.port.clone(),
                baud_rate: id.baud_rate,
                controller_type: None,
                ready: false,
                homed: false,
                controller_state: None,
                sender_state: None,
                feeder_state: None,
                workflow_state: None,
            };
        };
        Self {
            port: id.port.clone(),
            baud_rate: id.baud_rate,
            controller_type: Some(status.machine_status.controller_type.clone()),
            ready: status.machine_status.ready_state != ReadyState::NotConnected,
            homed: status.machine_status.is_homed,
            controller_state: Some(status.modal),
            sender_state: Some(status.sender),
            feeder_state: Some(status.feeder),
            workflow_state: Some(status.workflow_state),
        }
    }
}

fn parse_query(raw: &str) -> HashMap<String, String> {
    raw.split('&')
        .filter(|pair| !pair.is_empty())
        .filter_map(|pair| {
            let mut parts = pair.splitn(2, '=');
            let key = parts.next()?;
            let value = parts.next().unwrap_or("");
            Some((
                percent_decode_str(key).decode_utf8_lossy().into_owned(),
                percent_decode_str(value).decode_utf8_lossy().into_owned(),
            ))
        })
        .collect()
}

fn error_status(err: &Error) -> StatusCode {
    match err {
        Error::Auth(_) => StatusCode::UNAUTHORIZED,
        Error::Validation(_) => StatusCode::BAD_REQUEST,
        Error::Port(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn json_response<T: Serialize>(status: StatusCode, value: &T) -> Response<Full<Bytes>> {
    let body = serde_json::to_vec(value).unwrap_or_else(|_| b"{}".to_vec());
    Response::builder()
        .status(status)
        .header("content-type", "application/json")
        .body(Full::new(Bytes::from(body)))
        .expect("response assembled from static parts")
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response<Full<Bytes>> {
    json_response(status, &serde_json::json!({ "error": message.into() }))
}

fn empty_response(status: StatusCode) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .body(Full::new(Bytes::new()))
        .expect("response assembled from static parts")
}

/// Shared GET/POST/PUT/DELETE shape for the five `axiocnc-store` collections.
/// `make(payload, existing_id)` builds the full record: `existing_id` is
/// `None` on create (a fresh id is minted) and `Some` on update (the path id
/// is preserved).
async fn crud_collection<T, New>(
    store: &RecordStore<T>,
    method: &Method,
    id: Option<&str>,
    body: &[u8],
    make: impl Fn(New, Option<&str>) -> T,
) -> Response<Full<Bytes>>
where
    T: Record,
    New: DeserializeOwned,
{
    match (method, id) {
        (&Method::GET, None) => json_response(StatusCode::OK, &store.list()),
        (&Method::GET, Some(id)) => match store.get(id) {
            Some(record) => json_response(StatusCode::OK, &record),
            None => error_response(StatusCode::NOT_FOUND, "not found"),
        },
        (&Method::POST, None) => {
            let payload: New = match serde_json::from_slice(body) {
                Ok(p) => p,
                Err(err) => return error_response(StatusCode::BAD_REQUEST, err.to_string()),
            };
            let record = make(payload, None);
            match store.upsert(record.clone()) {
                Ok(()) => json_response(StatusCode::CREATED, &record),
                Err(err) => error_response(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
            }
        }
        (&Method::PUT, Some(id)) => {
            let payload: New = match serde_json::from_slice(body) {
                Ok(p) => p,
                Err(err) => return error_response(StatusCode::BAD_REQUEST, err.to_string()),
            };
            let record = make(payload, Some(id));
            match store.upsert(record.clone()) {
                Ok(()) => json_response(StatusCode::OK, &record),
                Err(err) => error_response(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
            }
        }
        (&Method::DELETE, Some(id)) => match store.remove(id) {
            Ok(()) => empty_response(StatusCode::NO_CONTENT),
            Err(err) => error_response(StatusCode::NOT_FOUND, err.to_string()),
        },
        _ => error_response(StatusCode::METHOD_NOT_ALLOWED, "method not allowed"),
    }
}

#[derive(Deserialize)]
struct NewMacroRequest {
    name: String,
    body: String,
    #[serde(default)]
    context_defaults: serde_json::Map<String, Value>,
}

fn make_macro(new: NewMacroRequest, existing_id: Option<&str>) -> Macro {
    Macro {
        id: parse_or_new_uuid(existing_id),
        name: new.name,
        body: new.body,
        context_defaults: new.context_defaults,
    }
}

#[derive(Deserialize)]
struct NewMdiRequest {
    label: String,
    gcode: String,
}

fn make_mdi_entry(new: NewMdiRequest, existing_id: Option<&str>) -> MdiEntry {
    MdiEntry {
        id: parse_or_new_uuid(existing_id),
        label: new.label,
        gcode: new.gcode,
    }
}

#[derive(Deserialize)]
struct NewToolRequest {
    number: u32,
    name: String,
    description: String,
}

fn make_tool(new: NewToolRequest, existing_id: Option<&str>) -> Tool {
    Tool {
        id: parse_or_new_uuid(existing_id),
        number: new.number,
        name: new.name,
        description: new.description,
    }
}

#[derive(Deserialize)]
struct NewWatchFolderRequest {
    path: std::path::PathBuf,
    #[serde(default)]
    port: Option<String>,
    #[serde(default)]
    auto_load: bool,
}

fn make_watch_folder(new: NewWatchFolderRequest, existing_id: Option<&str>) -> WatchFolder {
    WatchFolder {
        id: parse_or_new_uuid(existing_id),
        path: new.path,
        port: new.port,
        auto_load: new.auto_load,
    }
}

#[derive(Deserialize)]
struct NewUserRequest {
    username: String,
    password: String,
    #[serde(default = "default_role")]
    role: Role,
}

fn default_role() -> Role {
    Role::Operator
}

fn make_user(new: NewUserRequest, existing_id: Option<&str>) -> User {
    User {
        id: parse_or_new_uuid(existing_id),
        username: new.username,
        password_hash: AuthService::hash_password(&new.password),
        role: new.role,
    }
}

fn parse_or_new_uuid(existing_id: Option<&str>) -> uuid::Uuid {
    existing_id
        .and_then(|s| uuid::Uuid::parse_str(s).ok())
        .unwrap_or_else(uuid::Uuid::new_v4)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn parses_multi_key_query_string() {
        let query = parse_query("port=%2Fdev%2FttyUSB0&baud_rate=9600");
        assert_eq!(query.get("port").unwrap(), "/dev/ttyUSB0");
        assert_eq!(query.get("baud_rate").unwrap(), "9600");
    }

    #[test]
    fn empty_query_string_yields_no_entries() {
        assert!(parse_query("").is_empty());
    }

    #[test]
    fn validation_error_maps_to_bad_request() {
        let err: Error = axiocnc_core::error::ValidationError::UnknownPort {
            port: "/dev/ttyUSB0".to_string(),
        }
        .into();
        assert_eq!(error_status(&err), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn crud_collection_round_trips_through_create_get_update_delete() {
        let dir = tempdir().unwrap();
        let store: RecordStore<Macro> = RecordStore::new(dir.path().join("macros.json"));

        let created = crud_collection(
            &store,
            &Method::POST,
            None,
            br#"{"name":"home","body":"$H"}"#,
            make_macro,
        )
        .await;
        assert_eq!(created.status(), StatusCode::CREATED);
        assert_eq!(store.list().len(), 1);
        let id = store.list()[0].id();

        let fetched = crud_collection(&store, &Method::GET, Some(&id), b"", make_macro).await;
        assert_eq!(fetched.status(), StatusCode::OK);

        let updated = crud_collection(
            &store,
            &Method::PUT,
            Some(&id),
            br#"{"name":"home-all","body":"$H"}"#,
            make_macro,
        )
        .await;
        assert_eq!(updated.status(), StatusCode::OK);
        assert_eq!(store.get(&id).unwrap().name, "home-all");

        let deleted = crud_collection(&store, &Method::DELETE, Some(&id), b"", make_macro).await;
        assert_eq!(deleted.status(), StatusCode::NO_CONTENT);
        assert!(store.list().is_empty());
    }

    #[tokio::test]
    async fn unknown_macro_id_returns_not_found() {
        let dir = tempdir().unwrap();
        let store: RecordStore<Macro> = RecordStore::new(dir.path().join("macros.json"));
        let response = crud_collection(&store, &Method::GET, Some("missing"), b"", make_macro).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn new_user_request_hashes_the_password_not_store_it_raw() {
        let record = make_user(
            NewUserRequest {
                username: "admin".to_string(),
                password: "hunter2".to_string(),
                role: Role::Admin,
            },
            None,
        );
        assert_ne!(record.password_hash, "hunter2");
        assert_eq!(record.password_hash, AuthService::hash_password("hunter2"));
    }
}
