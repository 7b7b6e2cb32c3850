use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, PoisonError};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, Mutex, RwLock};
use uuid::Uuid;

use crate::agent::{AgentEvent, ConversationHistory, Turn};
use crate::assistant::Assistant;
use crate::runtime::AssistantRuntime;
use crate::tools::{ToolDef, ToolRegistry};

const CHAT_PAGE: &str = include_str!("../assets/chat.html");

pub const DEFAULT_SESSION_IDLE_TTL: Duration = Duration::from_secs(60 * 60);

/// One web conversation. The history lock is held for a whole turn.
struct Session {
    id: Uuid,
    history: Mutex<ConversationHistory>,
    last_active: std::sync::Mutex<Instant>,
}

impl Session {
    fn new(id: Uuid, history: ConversationHistory) -> Self {
        Self {
            id,
            history: Mutex::new(history),
            last_active: std::sync::Mutex::new(Instant::now()),
        }
    }

    fn touch(&self) {
        *self
            .last_active
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    fn idle_for(&self) -> Duration {
        self.last_active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .elapsed()
    }

    /// A turn is running when the history lock is taken.
    fn is_busy(&self) -> bool {
        self.history.try_lock().is_err()
    }
}

pub struct ServerState {
    pub assistant: Arc<Assistant>,
    pub tools: Arc<ToolRegistry>,
    pub auth: AuthConfig,
    pub ws_events: broadcast::Sender<ApiEventEnvelope>,
    sessions: RwLock<HashMap<Uuid, Arc<Session>>>,
    idle_ttl: Duration,
}

impl ServerState {
    pub fn new(
        assistant: Arc<Assistant>,
        tools: Arc<ToolRegistry>,
        auth: AuthConfig,
        ws_events: broadcast::Sender<ApiEventEnvelope>,
    ) -> Self {
        Self {
            assistant,
            tools,
            auth,
            ws_events,
            sessions: RwLock::new(HashMap::new()),
            idle_ttl: DEFAULT_SESSION_IDLE_TTL,
        }
    }

    pub fn with_idle_ttl(mut self, idle_ttl: Duration) -> Self {
        self.idle_ttl = idle_ttl;
        self
    }

    async fn session(&self, raw_id: &str) -> Result<Arc<Session>, (StatusCode, String)> {
        let missing = || not_found(format!("session '{}' not found", raw_id));
        let id = Uuid::parse_str(raw_id).map_err(|_| missing())?;
        self.sessions.read().await.get(&id).cloned().ok_or_else(missing)
    }

    /// Drop sessions idle longer than the TTL, sparing any with a turn in flight.
    async fn evict_idle_sessions(&self) {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, session| session.is_busy() || session.idle_for() < self.idle_ttl);
        let evicted = before - sessions.len();
        if evicted > 0 {
            tracing::info!("Evicted {} idle chat session(s)", evicted);
        }
    }
}

#[derive(Debug, Clone)]
pub struct AuthConfig {
    mode: AuthMode,
    token: Option<String>,
}

impl AuthConfig {
    pub fn disabled() -> Self {
        Self {
            mode: AuthMode::Disabled,
            token: None,
        }
    }

    pub fn bearer(token: impl Into<String>) -> Self {
        Self {
            mode: AuthMode::Required,
            token: Some(token.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AuthMode {
    Required,
    Disabled,
}

#[derive(Debug, Clone, Serialize)]
pub struct ApiEventEnvelope {
    pub session_id: String,
    pub event_type: String,
    pub emitted_at: DateTime<Utc>,
    pub payload: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Debug, Serialize, Deserialize)]
struct SessionResponse {
    id: Uuid,
}

#[derive(Debug, Deserialize)]
struct SendMessageRequest {
    content: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct SendMessageResponse {
    reply: String,
}

/// Browsers cannot set headers on a websocket handshake, so the token may
/// also ride in the query string.
#[derive(Debug, Deserialize)]
struct EventStreamQuery {
    session: String,
    token: Option<String>,
}

pub async fn serve(runtime: AssistantRuntime) -> Result<()> {
    let bind_addr = runtime
        .config
        .bind_addr
        .parse::<SocketAddr>()
        .with_context(|| {
            format!(
                "Invalid bind address '{}' (expected host:port)",
                runtime.config.bind_addr
            )
        })?;

    let auth = load_auth_config()?;
    let (ws_events, _) = broadcast::channel(512);
    spawn_event_bridge(runtime.events.clone(), ws_events.clone());

    let idle_ttl = Duration::from_secs(runtime.config.session_idle_minutes.saturating_mul(60));
    let state = Arc::new(
        ServerState::new(
            runtime.assistant.clone(),
            runtime.tools.clone(),
            auth,
            ws_events,
        )
        .with_idle_ttl(idle_ttl),
    );
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("Failed to bind web server to {}", bind_addr))?;
    tracing::info!("Assistant web chat listening on http://{}", bind_addr);
    axum::serve(listener, app)
        .await
        .context("Web server failed")?;
    Ok(())
}

pub fn build_router(state: Arc<ServerState>) -> Router {
    let protected = Router::new()
        .route("/health", get(health))
        .route("/skills", get(list_skills))
        .route("/sessions", post(create_session))
        .route("/sessions/:id", delete(delete_session))
        .route(
            "/sessions/:id/messages",
            get(list_messages).post(send_message),
        )
        .with_state(state.clone())
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    // Authorised in the handler: header or `?token=`.
    let events = Router::new()
        .route("/ws/events", get(ws_events_route))
        .with_state(state);

    Router::new()
        .route("/", get(chat_page))
        .nest("/v1", protected.merge(events))
}

fn spawn_event_bridge(
    event_rx: flume::Receiver<AgentEvent>,
    ws_events: broadcast::Sender<ApiEventEnvelope>,
) {
    tokio::spawn(async move {
        while let Ok(event) = event_rx.recv_async().await {
            let envelope = map_agent_event(event);
            let _ = ws_events.send(envelope);
        }
    });
}

fn map_agent_event(event: AgentEvent) -> ApiEventEnvelope {
    match event {
        AgentEvent::ToolCalled {
            session_id,
            tool_name,
            arguments,
            output_preview,
        } => envelope(
            session_id,
            "tool_called",
            serde_json::json!({
                "tool_name": tool_name,
                "arguments": arguments,
                "output_preview": output_preview
            }),
        ),
        AgentEvent::RetryScheduled {
            session_id,
            attempt,
            delay_ms,
        } => envelope(
            session_id,
            "retry_scheduled",
            serde_json::json!({ "attempt": attempt, "delay_ms": delay_ms }),
        ),
        AgentEvent::Error {
            session_id,
            message,
        } => envelope(session_id, "error", serde_json::json!({ "error": message })),
    }
}

fn envelope(session_id: String, event_type: &str, payload: serde_json::Value) -> ApiEventEnvelope {
    ApiEventEnvelope {
        session_id,
        event_type: event_type.to_string(),
        emitted_at: Utc::now(),
        payload,
    }
}

fn load_auth_config() -> Result<AuthConfig> {
    let mode = parse_auth_mode(std::env::var("ASSISTANT_AUTH_MODE").ok())?;
    let token = std::env::var("ASSISTANT_TOKEN")
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty());

    if mode == AuthMode::Required && token.is_none() {
        return Err(anyhow!(
            "ASSISTANT_TOKEN is required when auth mode is 'required' \
             (set ASSISTANT_AUTH_MODE=disabled for local use)"
        ));
    }
    if mode == AuthMode::Disabled {
        tracing::warn!("Web auth mode is disabled; all API routes are unauthenticated");
    }

    Ok(AuthConfig { mode, token })
}

fn parse_auth_mode(raw: Option<String>) -> Result<AuthMode> {
    let normalized = raw
        .unwrap_or_else(|| "required".to_string())
        .trim()
        .to_ascii_lowercase();
    match normalized.as_str() {
        "" | "required" | "on" | "enabled" | "true" => Ok(AuthMode::Required),
        "disabled" | "off" | "false" => Ok(AuthMode::Disabled),
        other => Err(anyhow!(
            "Invalid ASSISTANT_AUTH_MODE '{}'. Expected 'required' or 'disabled'",
            other
        )),
    }
}

async fn auth_middleware(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    request: axum::extract::Request,
    next: Next,
) -> Result<Response, StatusCode> {
    authorize(&headers, &state.auth)?;
    Ok(next.run(request).await)
}

fn authorize(headers: &HeaderMap, auth: &AuthConfig) -> Result<(), StatusCode> {
    if auth.mode == AuthMode::Disabled {
        return Ok(());
    }
    let Some(token) = auth.token.as_deref() else {
        return Err(StatusCode::UNAUTHORIZED);
    };

    let Some(raw_header) = headers.get(header::AUTHORIZATION) else {
        return Err(StatusCode::UNAUTHORIZED);
    };
    let Ok(auth_value) = raw_header.to_str() else {
        return Err(StatusCode::UNAUTHORIZED);
    };
    let expected = format!("Bearer {}", token);
    if auth_value.trim() != expected {
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(())
}

/// Header auth, falling back to a `token` query parameter.
fn authorize_event_stream(
    headers: &HeaderMap,
    query_token: Option<&str>,
    auth: &AuthConfig,
) -> Result<(), StatusCode> {
    if authorize(headers, auth).is_ok() {
        return Ok(());
    }
    match (auth.token.as_deref(), query_token) {
        (Some(expected), Some(given)) if given.trim() == expected => Ok(()),
        _ => Err(StatusCode::UNAUTHORIZED),
    }
}

async fn chat_page() -> Html<&'static str> {
    Html(CHAT_PAGE)
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

async fn list_skills(State(state): State<Arc<ServerState>>) -> Json<Vec<ToolDef>> {
    Json(state.tools.tool_definitions())
}

async fn create_session(State(state): State<Arc<ServerState>>) -> Json<SessionResponse> {
    state.evict_idle_sessions().await;

    let id = Uuid::new_v4();
    let history = state.assistant.history_for(id.to_string());
    state
        .sessions
        .write()
        .await
        .insert(id, Arc::new(Session::new(id, history)));
    tracing::info!("Created chat session {}", id);
    Json(SessionResponse { id })
}

async fn delete_session(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, (StatusCode, String)> {
    let session = state.session(&id).await?;
    state.sessions.write().await.remove(&session.id);
    tracing::info!("Deleted chat session {}", session.id);
    Ok(StatusCode::NO_CONTENT)
}

async fn list_messages(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Turn>>, (StatusCode, String)> {
    let session = state.session(&id).await?;
    session.touch();
    let history = session.history.lock().await;
    Ok(Json(history.visible().to_vec()))
}

async fn send_message(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
    Json(request): Json<SendMessageRequest>,
) -> Result<Json<SendMessageResponse>, (StatusCode, String)> {
    let content = request.content.trim();
    if content.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "content must not be empty".to_string()));
    }

    let session = state.session(&id).await?;
    session.touch();
    // One turn at a time per session; other sessions proceed independently.
    let mut history = session.history.lock().await;
    tracing::debug!("Session {} input: {}", session.id, content);
    let reply = state.assistant.chat(content, &mut history).await;
    tracing::debug!("Session {} reply: {}", session.id, reply);
    session.touch();
    Ok(Json(SendMessageResponse { reply }))
}

async fn ws_events_route(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<EventStreamQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Result<Response, (StatusCode, String)> {
    authorize_event_stream(&headers, query.token.as_deref(), &state.auth)
        .map_err(|status| (status, "unauthorized".to_string()))?;
    let session = state.session(&query.session).await?;
    let session_id = session.id.to_string();
    tracing::debug!("Event stream opened for session {}", session_id);
    Ok(ws
        .on_upgrade(move |socket| handle_events_socket(state, socket, session_id))
        .into_response())
}

/// Forward only the events raised while answering `session_id`.
async fn handle_events_socket(state: Arc<ServerState>, mut socket: WebSocket, session_id: String) {
    let mut rx = state.ws_events.subscribe();

    loop {
        tokio::select! {
            result = rx.recv() => {
                match result {
                    Ok(event) => {
                        if event.session_id != session_id {
                            continue;
                        }
                        let payload = match serde_json::to_string(&event) {
                            Ok(serialized) => serialized,
                            Err(error) => {
                                tracing::warn!("Failed to serialize websocket event: {}", error);
                                continue;
                            }
                        };
                        if socket.send(Message::Text(payload)).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => {
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            incoming = socket.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {}
                }
            }
        }
    }
}

fn not_found(message: String) -> (StatusCode, String) {
    (StatusCode::NOT_FOUND, message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::test_executors::ScriptedExecutor;
    use crate::agent::{AgentDispatcher, RetryPolicy, Role};
    use crate::http_client::{build_http_client, SKILL_REQUEST_TIMEOUT};
    use crate::skills::greeting::GreetingSkill;
    use crate::test_support::spawn_mock_server;
    use crate::tools::skill_bridge::SkillTool;
    use axum::http::HeaderValue;
    use serde_json::json;

    #[test]
    fn authorize_accepts_matching_bearer_token() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("Bearer token-123"),
        );
        assert!(authorize(&headers, &AuthConfig::bearer("token-123")).is_ok());
    }

    #[test]
    fn authorize_rejects_missing_or_invalid_token() {
        let headers = HeaderMap::new();
        assert!(authorize(&headers, &AuthConfig::bearer("token-123")).is_err());

        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("Bearer wrong"),
        );
        assert!(authorize(&headers, &AuthConfig::bearer("token-123")).is_err());
    }

    #[test]
    fn authorize_allows_when_auth_mode_disabled() {
        assert!(authorize(&HeaderMap::new(), &AuthConfig::disabled()).is_ok());
    }

    #[test]
    fn parse_auth_mode_defaults_to_required() {
        assert!(matches!(parse_auth_mode(None).unwrap(), AuthMode::Required));
        assert!(matches!(
            parse_auth_mode(Some("disabled".to_string())).unwrap(),
            AuthMode::Disabled
        ));
        assert!(parse_auth_mode(Some("nope".to_string())).is_err());
    }

    #[test]
    fn map_agent_event_includes_event_type_and_timestamp() {
        let envelope = map_agent_event(AgentEvent::ToolCalled {
            session_id: "s-1".to_string(),
            tool_name: "Greeting".to_string(),
            arguments: json!({"name": "Ada"}),
            output_preview: "Hello, Ada!".to_string(),
        });
        assert_eq!(envelope.event_type, "tool_called");
        assert_eq!(envelope.session_id, "s-1");
        assert_eq!(envelope.payload["tool_name"], "Greeting");
        assert!(envelope.emitted_at <= Utc::now());

        let envelope = map_agent_event(AgentEvent::RetryScheduled {
            session_id: "s-2".to_string(),
            attempt: 2,
            delay_ms: 4000,
        });
        assert_eq!(envelope.event_type, "retry_scheduled");
        assert_eq!(envelope.payload["delay_ms"], 4000);
        assert_eq!(envelope.session_id, "s-2");

        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["session_id"], "s-2");
    }

    #[test]
    fn event_stream_accepts_query_token() {
        let auth = AuthConfig::bearer("token-123");
        let headers = HeaderMap::new();
        assert!(authorize_event_stream(&headers, Some("token-123"), &auth).is_ok());
        assert!(authorize_event_stream(&headers, Some("wrong"), &auth).is_err());
        assert!(authorize_event_stream(&headers, None, &auth).is_err());

        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("Bearer token-123"),
        );
        assert!(authorize_event_stream(&headers, None, &auth).is_ok());
        assert!(authorize_event_stream(&HeaderMap::new(), None, &AuthConfig::disabled()).is_ok());
    }

    async fn serve_with(auth: AuthConfig) -> String {
        serve_state(auth, DEFAULT_SESSION_IDLE_TTL).await.0
    }

    async fn serve_state(auth: AuthConfig, idle_ttl: Duration) -> (String, Arc<ServerState>) {
        let mut tools = ToolRegistry::new();
        tools
            .register(Arc::new(SkillTool::new(Arc::new(GreetingSkill::new()))))
            .unwrap();
        let dispatcher = AgentDispatcher::new(
            Arc::new(ScriptedExecutor::failing(0)),
            RetryPolicy::default(),
        );
        let assistant = Arc::new(Assistant::new(dispatcher, "sys"));
        let (ws_events, _) = broadcast::channel(16);
        let state = Arc::new(
            ServerState::new(assistant, Arc::new(tools), auth, ws_events).with_idle_ttl(idle_ttl),
        );
        let base = spawn_mock_server(build_router(state.clone())).await;
        (base, state)
    }

    async fn create(client: &reqwest::Client, base: &str) -> Uuid {
        let session: SessionResponse = client
            .post(format!("{}/v1/sessions", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        session.id
    }

    #[tokio::test]
    async fn session_round_trip_keeps_per_session_history() {
        let base = serve_with(AuthConfig::disabled()).await;
        let client = build_http_client(SKILL_REQUEST_TIMEOUT).unwrap();

        let session: SessionResponse = client
            .post(format!("{}/v1/sessions", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        let other: SessionResponse = client
            .post(format!("{}/v1/sessions", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();

        let reply: SendMessageResponse = client
            .post(format!("{}/v1/sessions/{}/messages", base, session.id))
            .json(&json!({"content": "hello"}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(reply.reply, "echo: hello");

        let turns: Vec<Turn> = client
            .get(format!("{}/v1/sessions/{}/messages", base, session.id))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(
            turns,
            vec![
                Turn::new(Role::Human, "hello"),
                Turn::new(Role::Assistant, "echo: hello")
            ]
        );

        let other_turns: Vec<Turn> = client
            .get(format!("{}/v1/sessions/{}/messages", base, other.id))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert!(other_turns.is_empty());
    }

    #[tokio::test]
    async fn empty_content_and_unknown_session_are_rejected() {
        let base = serve_with(AuthConfig::disabled()).await;
        let client = build_http_client(SKILL_REQUEST_TIMEOUT).unwrap();
        let session: SessionResponse = client
            .post(format!("{}/v1/sessions", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();

        let empty = client
            .post(format!("{}/v1/sessions/{}/messages", base, session.id))
            .json(&json!({"content": "   "}))
            .send()
            .await
            .unwrap();
        assert_eq!(empty.status(), reqwest::StatusCode::BAD_REQUEST);

        let unknown = client
            .post(format!("{}/v1/sessions/{}/messages", base, Uuid::new_v4()))
            .json(&json!({"content": "hi"}))
            .send()
            .await
            .unwrap();
        assert_eq!(unknown.status(), reqwest::StatusCode::NOT_FOUND);

        let garbage = client
            .get(format!("{}/v1/sessions/not-a-uuid/messages", base))
            .send()
            .await
            .unwrap();
        assert_eq!(garbage.status(), reqwest::StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn protected_routes_require_token_but_page_does_not() {
        let base = serve_with(AuthConfig::bearer("s3cret")).await;
        let client = build_http_client(SKILL_REQUEST_TIMEOUT).unwrap();

        let denied = client
            .get(format!("{}/v1/skills", base))
            .send()
            .await
            .unwrap();
        assert_eq!(denied.status(), reqwest::StatusCode::UNAUTHORIZED);

        let skills: Vec<serde_json::Value> = client
            .get(format!("{}/v1/skills", base))
            .bearer_auth("s3cret")
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(skills[0]["function"]["name"], "Greeting");
        assert_eq!(skills[0]["type"], "function");

        let page = client.get(format!("{}/", base)).send().await.unwrap();
        assert_eq!(page.status(), reqwest::StatusCode::OK);
        let page = page.text().await.unwrap();
        assert!(page.contains("<html"));
        assert!(page.contains("/v1/ws/events?"));
        assert!(page.contains("tool_called"));
        assert!(page.contains("retry_scheduled"));
    }

    #[tokio::test]
    async fn deleted_session_is_gone() {
        let base = serve_with(AuthConfig::disabled()).await;
        let client = build_http_client(SKILL_REQUEST_TIMEOUT).unwrap();
        let id = create(&client, &base).await;

        let deleted = client
            .delete(format!("{}/v1/sessions/{}", base, id))
            .send()
            .await
            .unwrap();
        assert_eq!(deleted.status(), reqwest::StatusCode::NO_CONTENT);

        let messages = client
            .get(format!("{}/v1/sessions/{}/messages", base, id))
            .send()
            .await
            .unwrap();
        assert_eq!(messages.status(), reqwest::StatusCode::NOT_FOUND);

        let again = client
            .delete(format!("{}/v1/sessions/{}", base, id))
            .send()
            .await
            .unwrap();
        assert_eq!(again.status(), reqwest::StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn idle_sessions_are_evicted_when_new_ones_open() {
        let (base, state) = serve_state(AuthConfig::disabled(), Duration::ZERO).await;
        let client = build_http_client(SKILL_REQUEST_TIMEOUT).unwrap();

        let stale = create(&client, &base).await;
        let fresh = create(&client, &base).await;

        let sessions = state.sessions.read().await;
        assert_eq!(sessions.len(), 1);
        assert!(sessions.contains_key(&fresh));
        assert!(!sessions.contains_key(&stale));
    }

    #[tokio::test]
    async fn busy_sessions_survive_eviction() {
        let (base, state) = serve_state(AuthConfig::disabled(), Duration::ZERO).await;
        let client = build_http_client(SKILL_REQUEST_TIMEOUT).unwrap();

        let busy = create(&client, &base).await;
        let handle = state.session(&busy.to_string()).await.unwrap();
        let _turn = handle.history.lock().await;

        create(&client, &base).await;
        assert!(state.sessions.read().await.contains_key(&busy));
    }

    fn ws_url(base: &str, query: &str) -> String {
        format!("{}/v1/ws/events?{}", base.replacen("http", "ws", 1), query)
    }

    #[tokio::test]
    async fn event_stream_only_carries_its_own_session() {
        use tokio_tungstenite::connect_async;

        let (base, state) = serve_state(AuthConfig::bearer("s3cret"), DEFAULT_SESSION_IDLE_TTL).await;
        let client = build_http_client(SKILL_REQUEST_TIMEOUT).unwrap();
        let mine: SessionResponse = client
            .post(format!("{}/v1/sessions", base))
            .bearer_auth("s3cret")
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        let theirs = Uuid::new_v4();

        let (mut stream, _) = connect_async(ws_url(
            &base,
            &format!("session={}&token=s3cret", mine.id),
        ))
        .await
        .unwrap();
        while state.ws_events.receiver_count() == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        state
            .ws_events
            .send(map_agent_event(AgentEvent::ToolCalled {
                session_id: theirs.to_string(),
                tool_name: "Greeting".to_string(),
                arguments: json!({"name": "Alice-secret"}),
                output_preview: "Hello, Alice-secret!".to_string(),
            }))
            .unwrap();
        state
            .ws_events
            .send(map_agent_event(AgentEvent::RetryScheduled {
                session_id: mine.id.to_string(),
                attempt: 2,
                delay_ms: 4000,
            }))
            .unwrap();

        let frame = tokio::time::timeout(Duration::from_secs(5), stream.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        let text = frame.into_text().unwrap();
        assert!(!text.contains("Alice-secret"), "{}", text);
        let event: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(event["event_type"], "retry_scheduled");
        assert_eq!(event["session_id"], mine.id.to_string());
    }

    #[tokio::test]
    async fn event_stream_rejects_bad_token_and_unknown_session() {
        use tokio_tungstenite::connect_async;

        let base = serve_with(AuthConfig::bearer("s3cret")).await;
        let client = build_http_client(SKILL_REQUEST_TIMEOUT).unwrap();
        let session: SessionResponse = client
            .post(format!("{}/v1/sessions", base))
            .bearer_auth("s3cret")
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();

        let no_token = connect_async(ws_url(&base, &format!("session={}", session.id))).await;
        assert!(no_token.is_err());

        let unknown = connect_async(ws_url(
            &base,
            &format!("session={}&token=s3cret", Uuid::new_v4()),
        ))
        .await;
        assert!(unknown.is_err());
    }
}
