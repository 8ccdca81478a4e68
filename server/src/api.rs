use crate::auth::{Authenticator, Identity, LoginRateLimiter};
use crate::broadcast::Broadcaster;
use crate::config::Config;
use crate::db::Db;
use crate::error::ChatError;
use crate::hub::ChatHub;
use crate::notify::LogNotifier;
use crate::ws::ws_handler;
use crate::{conversations, users};
use anyhow::{Context, Result};
use axum::{
    extract::{Extension, Path, Query, State},
    http::{header, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chat_protocol::{Conversation, ReadRequest, SendMessage, UserProfile};
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, sync::Arc};
use time::Duration;
use tracing::info;
use uuid::Uuid;

#[derive(Clone)]
pub struct AppState {
    pub db: Db,
    pub hub: Arc<ChatHub>,
    pub auth: Authenticator,
    pub config: Config,
    pub login_limiter: LoginRateLimiter,
}

impl AppState {
    pub async fn new(config: Config) -> Result<Self> {
        tokio::fs::create_dir_all(&config.data_dir)
            .await
            .context("create data dir")?;
        let db = Db::open(config.db_path()).context("open database")?;
        let secret = config.signing_secret()?;
        let auth = Authenticator::new(db.clone(), secret, Duration::hours(config.token_ttl_hours));
        let hub = Arc::new(ChatHub::new(db.clone(), config.presence, Arc::new(LogNotifier)));
        Ok(Self {
            db,
            hub,
            auth,
            config,
            login_limiter: LoginRateLimiter::default(),
        })
    }
}

/// Build the HTTP application router.
pub fn build_router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/api/me", get(me))
        .route(
            "/api/conversations",
            get(list_conversations).post(create_direct),
        )
        .route("/api/conversations/group", post(create_group))
        .route("/api/conversations/:id", get(conversation_detail))
        .route("/api/conversations/:id/read", post(mark_read))
        .route("/api/messages", post(send_message))
        .route("/api/messages/:id", get(history).delete(delete_message))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));
    Router::new()
        .route("/api/health", get(health))
        .route("/api/auth/register", post(register))
        .route("/api/auth/login", post(login))
        .route("/ws", get(ws_handler))
        .merge(protected)
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

async fn auth_middleware<B>(
    State(state): State<AppState>,
    mut req: Request<B>,
    next: Next<B>,
) -> Result<Response, ChatError> {
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_owned);
    let who = state.auth.authenticate(token.as_deref()).await?;
    req.extensions_mut().insert(who);
    Ok(next.run(req).await)
}

#[derive(Serialize)]
struct ErrorResp {
    error: String,
}

fn err(status: StatusCode, msg: &str) -> Response {
    (status, Json(ErrorResp { error: msg.into() })).into_response()
}

#[derive(Deserialize)]
struct RegisterReq {
    name: String,
    email: String,
    password: String,
}

#[derive(Serialize)]
struct TokenResp {
    token: String,
    user: UserProfile,
}

async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterReq>,
) -> Result<Response, ChatError> {
    let (token, user) = state.auth.register(req.name, req.email, req.password).await?;
    info!(user_id = %user.id, "user registered");
    Ok((StatusCode::CREATED, Json(TokenResp { token, user })).into_response())
}

#[derive(Deserialize)]
struct LoginReq {
    email: String,
    password: String,
}

async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginReq>,
) -> Result<Response, ChatError> {
    if !state.login_limiter.check(&req.email).await {
        return Ok(err(StatusCode::TOO_MANY_REQUESTS, "rate_limited"));
    }
    let (token, user) = state.auth.login(req.email, req.password).await?;
    Ok(Json(TokenResp { token, user }).into_response())
}

async fn me(
    State(state): State<AppState>,
    Extension(who): Extension<Identity>,
) -> Result<Json<UserProfile>, ChatError> {
    let profile = state
        .db
        .run(move |conn| users::find_profile(conn, &who.user_id))
        .await?
        .ok_or(ChatError::NotFound("user"))?;
    Ok(Json(profile))
}

async fn list_conversations(
    State(state): State<AppState>,
    Extension(who): Extension<Identity>,
) -> Result<Json<Vec<Conversation>>, ChatError> {
    let list = state
        .db
        .run(move |conn| conversations::list_for_user(conn, &who.user_id))
        .await?;
    Ok(Json(list))
}

async fn conversation_detail(
    State(state): State<AppState>,
    Extension(who): Extension<Identity>,
    Path(id): Path<Uuid>,
) -> Result<Json<Conversation>, ChatError> {
    let conversation = state
        .db
        .run(move |conn| conversations::load_for_viewer(conn, &id, &who.user_id))
        .await?;
    Ok(Json(conversation))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DirectReq {
    user_id: Uuid,
}

async fn create_direct(
    State(state): State<AppState>,
    Extension(who): Extension<Identity>,
    Json(req): Json<DirectReq>,
) -> Result<Response, ChatError> {
    let me = who.user_id;
    let (conversation, created) = state
        .db
        .run(move |conn| {
            let (id, created) = conversations::get_or_create_direct(conn, &me, &req.user_id)?;
            Ok((conversations::load_for_viewer(conn, &id, &me)?, created))
        })
        .await?;
    if created {
        for p in &conversation.participants {
            state.hub.broadcaster().subscribe_user(&p.id, &conversation.id);
        }
        return Ok((StatusCode::CREATED, Json(conversation)).into_response());
    }
    Ok(Json(conversation).into_response())
}

#[derive(Deserialize)]
struct GroupReq {
    name: String,
    participants: Vec<Uuid>,
}

async fn create_group(
    State(state): State<AppState>,
    Extension(who): Extension<Identity>,
    Json(req): Json<GroupReq>,
) -> Result<Response, ChatError> {
    let me = who.user_id;
    let conversation = state
        .db
        .run(move |conn| {
            let id = conversations::create_group(conn, &me, &req.name, &req.participants)?;
            conversations::load_for_viewer(conn, &id, &me)
        })
        .await?;
    for p in &conversation.participants {
        state.hub.broadcaster().subscribe_user(&p.id, &conversation.id);
    }
    info!(conversation_id = %conversation.id, members = conversation.participants.len(), "group created");
    Ok((StatusCode::CREATED, Json(conversation)).into_response())
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReadBody {
    #[serde(default)]
    message_id: Option<Uuid>,
}

async fn mark_read(
    State(state): State<AppState>,
    Extension(who): Extension<Identity>,
    Path(id): Path<Uuid>,
    body: Option<Json<ReadBody>>,
) -> Result<StatusCode, ChatError> {
    let message_id = body.and_then(|Json(b)| b.message_id);
    state
        .hub
        .receipts()
        .mark_read(
            &who,
            ReadRequest {
                conversation_id: id,
                message_id,
            },
        )
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn send_message(
    State(state): State<AppState>,
    Extension(who): Extension<Identity>,
    Json(req): Json<SendMessage>,
) -> Result<Response, ChatError> {
    let message = state.hub.pipeline().send(&who, req).await?;
    Ok((StatusCode::CREATED, Json(message)).into_response())
}

#[derive(Deserialize)]
struct HistoryQuery {
    page: Option<usize>,
    limit: Option<usize>,
}

async fn history(
    State(state): State<AppState>,
    Extension(who): Extension<Identity>,
    Path(conversation_id): Path<Uuid>,
    Query(q): Query<HistoryQuery>,
) -> Result<Json<Vec<chat_protocol::Message>>, ChatError> {
    let page = q.page.unwrap_or(1).max(1);
    let limit = q
        .limit
        .unwrap_or(state.config.history_default_limit)
        .clamp(1, state.config.history_max_limit);
    let messages = state
        .hub
        .receipts()
        .fetch_history(&who, conversation_id, page, limit)
        .await?;
    Ok(Json(messages))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DeletedResp {
    message_id: Uuid,
    conversation_id: Uuid,
}

async fn delete_message(
    State(state): State<AppState>,
    Extension(who): Extension<Identity>,
    Path(id): Path<Uuid>,
) -> Result<Json<DeletedResp>, ChatError> {
    let deleted = state.hub.pipeline().delete(&who, id).await?;
    Ok(Json(DeletedResp {
        message_id: id,
        conversation_id: deleted.conversation_id,
    }))
}

/// Run the HTTP server with the resolved configuration.
pub async fn run_http_server(config: Config) -> Result<()> {
    let addr: SocketAddr = config.bind.parse().context("invalid bind address")?;
    let state = AppState::new(config).await?;
    info!(%addr, policy = state.config.presence.as_str(), "listening");
    axum::Server::bind(&addr)
        .serve(build_router(state).into_make_service())
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    Ok(())
}
