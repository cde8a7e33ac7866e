use std::sync::Arc;

use axum::{
    extract::{FromRequestParts, Path, Query, State},
    http::{request::Parts, Method},
    routing::{delete, get, patch, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use murmur_shared::protocol::{
    HiddenNotice, MessagePayload, ReactionNotice, ReactionSummary, RecallNotice, ServerEvent,
};
use murmur_shared::{ChannelId, ChannelKind, ChatError, MessageId, MessageStatus, Role, UserId};
use murmur_store::Channel;

use crate::auth::{bearer_token, Authenticator};
use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::history::{ChatSummary, HistoryService};
use crate::hub::Hub;
use crate::ingress::ws_handler;
use crate::membership::{ChannelService, MemberView, NewChannel};
use crate::messaging::{MessageChange, MessageService};

#[derive(Clone)]
pub struct AppState {
    pub channels: ChannelService,
    pub messages: MessageService,
    pub history: HistoryService,
    pub hub: Hub,
    pub auth: Arc<dyn Authenticator>,
    pub config: Arc<ServerConfig>,
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/ws/messages", get(ws_handler))
        .route("/api/channels", post(create_channel))
        .route("/api/channels/search", get(search_channels))
        .route("/api/channels/mine", get(my_channels))
        .route("/api/channels/private/:user_id", get(private_channel))
        .route("/api/channels/:id", get(get_channel).delete(dissolve_channel))
        .route("/api/channels/:id/members", get(list_members))
        .route("/api/channels/:id/blocked", get(list_blocked))
        .route(
            "/api/channels/:id/members/:member_id",
            put(add_member).delete(remove_member),
        )
        .route("/api/channels/:id/members/:member_id/role", put(set_role))
        .route("/api/channels/:id/leave", post(leave_channel))
        .route("/api/channels/:id/transfer/:member_id", post(transfer_leadership))
        .route("/api/channels/:id/block/:member_id", post(block_member))
        .route("/api/channels/:id/unblock/:member_id", post(unblock_member))
        .route("/api/channels/:id/approval", put(toggle_approval))
        .route("/api/channels/:id/messages", get(channel_messages))
        .route("/api/chats", get(chat_list))
        .route("/api/chats/:id/preview", delete(clear_preview))
        .route("/api/messages/:id", patch(edit_message))
        .route("/api/messages/:id/recall", post(recall_message))
        .route("/api/messages/:id/hide", delete(hide_message))
        .route("/api/messages/:id/reactions", post(toggle_reaction))
        .route("/api/messages/:id/status", put(update_status))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ---------------------------------------------------------------------------
// Caller identity
// ---------------------------------------------------------------------------

/// The authenticated caller of a request.
pub struct AuthUser(pub UserId);

#[axum::async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers)
            .ok_or_else(|| ServerError::Unauthorized("missing bearer token".into()))?;
        state
            .auth
            .authenticate(token)
            .map(AuthUser)
            .ok_or_else(|| ServerError::Unauthorized("unknown token".into()))
    }
}

// ---------------------------------------------------------------------------
// Request / response bodies
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateChannelRequest {
    #[serde(default)]
    name: Option<String>,
    kind: String,
    member_ids: Vec<UserId>,
    #[serde(default)]
    approval_required: bool,
}

#[derive(Deserialize)]
struct SearchQuery {
    #[serde(default)]
    keyword: String,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct LeaveRequest {
    #[serde(default)]
    new_leader_id: Option<UserId>,
}

#[derive(Deserialize)]
struct RoleRequest {
    role: Role,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApprovalRequest {
    approval_required: bool,
}

#[derive(Deserialize)]
struct HistoryQuery {
    /// Oldest message id the client already holds.
    before: Option<MessageId>,
    limit: Option<usize>,
}

#[derive(Deserialize)]
struct EditRequest {
    content: String,
}

#[derive(Deserialize)]
struct ReactionRequest {
    emoji: String,
}

#[derive(Deserialize)]
struct StatusRequest {
    status: MessageStatus,
}

#[derive(Serialize)]
struct ClearedResponse {
    cleared: bool,
}

// ---------------------------------------------------------------------------
// Channels
// ---------------------------------------------------------------------------

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn create_channel(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Json(req): Json<CreateChannelRequest>,
) -> Result<Json<Channel>, ServerError> {
    let kind = req
        .kind
        .parse::<ChannelKind>()
        .map_err(ChatError::validation)?;
    let channel = state
        .channels
        .create_channel(
            &caller,
            NewChannel {
                name: req.name,
                kind,
                member_ids: req.member_ids,
                approval_required: req.approval_required,
            },
        )
        .await?;
    Ok(Json(channel))
}

async fn search_channels(
    State(state): State<AppState>,
    AuthUser(_caller): AuthUser,
    Query(q): Query<SearchQuery>,
) -> Result<Json<Vec<Channel>>, ServerError> {
    Ok(Json(state.channels.search_channels(&q.keyword).await?))
}

async fn my_channels(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
) -> Result<Json<Vec<Channel>>, ServerError> {
    Ok(Json(state.channels.channels_for_user(&caller).await?))
}

async fn private_channel(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Path(other): Path<UserId>,
) -> Result<Json<Channel>, ServerError> {
    let channel = state
        .channels
        .find_or_create_private_channel(&caller, &other)
        .await?;
    Ok(Json(channel))
}

async fn get_channel(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Path(id): Path<ChannelId>,
) -> Result<Json<Channel>, ServerError> {
    let channel = state.channels.get_channel(&id).await?;
    if !channel.is_member(&caller) {
        return Err(ChatError::forbidden("not a member of this channel").into());
    }
    Ok(Json(channel))
}

async fn list_members(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Path(id): Path<ChannelId>,
) -> Result<Json<Vec<MemberView>>, ServerError> {
    Ok(Json(state.channels.list_members(&id, &caller).await?))
}

async fn list_blocked(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Path(id): Path<ChannelId>,
) -> Result<Json<Vec<MemberView>>, ServerError> {
    Ok(Json(state.channels.list_blocked_members(&id, &caller).await?))
}

async fn add_member(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Path((id, member)): Path<(ChannelId, UserId)>,
) -> Result<Json<Channel>, ServerError> {
    Ok(Json(state.channels.add_member(&id, &caller, &member).await?))
}

async fn remove_member(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Path((id, member)): Path<(ChannelId, UserId)>,
) -> Result<Json<Channel>, ServerError> {
    Ok(Json(state.channels.remove_member(&id, &caller, &member).await?))
}

async fn set_role(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Path((id, member)): Path<(ChannelId, UserId)>,
    Json(req): Json<RoleRequest>,
) -> Result<Json<Channel>, ServerError> {
    let channel = state
        .channels
        .set_member_role(&id, &caller, &member, req.role)
        .await?;
    Ok(Json(channel))
}

async fn leave_channel(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Path(id): Path<ChannelId>,
    body: Option<Json<LeaveRequest>>,
) -> Result<Json<Channel>, ServerError> {
    let req = body.map(|Json(req)| req).unwrap_or_default();
    let channel = state
        .channels
        .leave_channel(&id, &caller, req.new_leader_id.as_ref())
        .await?;
    Ok(Json(channel))
}

async fn transfer_leadership(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Path((id, member)): Path<(ChannelId, UserId)>,
) -> Result<Json<Channel>, ServerError> {
    let channel = state
        .channels
        .transfer_leadership(&id, &caller, &member)
        .await?;
    Ok(Json(channel))
}

async fn dissolve_channel(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Path(id): Path<ChannelId>,
) -> Result<Json<Channel>, ServerError> {
    Ok(Json(state.channels.dissolve_channel(&id, &caller).await?))
}

async fn block_member(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Path((id, member)): Path<(ChannelId, UserId)>,
) -> Result<Json<Channel>, ServerError> {
    Ok(Json(state.channels.block_member(&id, &caller, &member).await?))
}

async fn unblock_member(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Path((id, member)): Path<(ChannelId, UserId)>,
) -> Result<Json<Channel>, ServerError> {
    Ok(Json(state.channels.unblock_member(&id, &caller, &member).await?))
}

async fn toggle_approval(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Path(id): Path<ChannelId>,
    Json(req): Json<ApprovalRequest>,
) -> Result<Json<Channel>, ServerError> {
    let channel = state
        .channels
        .toggle_approval(&id, &caller, req.approval_required)
        .await?;
    Ok(Json(channel))
}

// ---------------------------------------------------------------------------
// History
// ---------------------------------------------------------------------------

async fn channel_messages(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Path(id): Path<ChannelId>,
    Query(q): Query<HistoryQuery>,
) -> Result<Json<Vec<MessagePayload>>, ServerError> {
    let page = state
        .history
        .channel_messages(&id, &caller, q.before, q.limit)
        .await?;
    Ok(Json(page))
}

async fn chat_list(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
) -> Result<Json<Vec<ChatSummary>>, ServerError> {
    Ok(Json(state.history.chat_list(&caller).await?))
}

async fn clear_preview(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Path(id): Path<ChannelId>,
) -> Result<Json<ClearedResponse>, ServerError> {
    let cleared = state.history.clear_preview(&id, &caller).await?;
    Ok(Json(ClearedResponse { cleared }))
}

// ---------------------------------------------------------------------------
// Message lifecycle
// ---------------------------------------------------------------------------

async fn edit_message(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Path(id): Path<MessageId>,
    Json(req): Json<EditRequest>,
) -> Result<Json<Option<MessagePayload>>, ServerError> {
    let change = state.messages.edit_message(&id, &caller, &req.content).await?;
    Ok(Json(publish_update(&state, &change).await))
}

async fn recall_message(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Path(id): Path<MessageId>,
) -> Result<Json<Option<RecallNotice>>, ServerError> {
    let change = state.messages.recall_message(&id, &caller).await?;
    let notice = change.channel_id.map(|channel_id| RecallNotice {
        channel_id,
        message_id: id,
        by: caller,
    });
    if let Some(notice) = &notice {
        broadcast(&state, &notice.channel_id, ServerEvent::MessageRecalled(notice.clone())).await;
    }
    Ok(Json(notice))
}

/// Local to the caller: only their own connection hears about it.
async fn hide_message(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Path(id): Path<MessageId>,
) -> Result<Json<HiddenNotice>, ServerError> {
    let change = state.messages.hide_message(&id, &caller).await?;
    let notice = HiddenNotice {
        channel_id: change.channel_id,
        message_id: id,
    };
    state
        .hub
        .notify_user(&caller, &ServerEvent::MessageHidden(notice.clone()))
        .await;
    Ok(Json(notice))
}

async fn toggle_reaction(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Path(id): Path<MessageId>,
    Json(req): Json<ReactionRequest>,
) -> Result<Json<Vec<ReactionSummary>>, ServerError> {
    let change = state.messages.toggle_reaction(&id, &caller, &req.emoji).await?;
    let reactions = ReactionSummary::from_map(&change.message.reactions);
    if let Some(channel_id) = change.channel_id {
        let notice = ReactionNotice {
            channel_id,
            message_id: id,
            reactions: reactions.clone(),
        };
        broadcast(&state, &channel_id, ServerEvent::MessageReaction(notice)).await;
    }
    Ok(Json(reactions))
}

async fn update_status(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Path(id): Path<MessageId>,
    Json(req): Json<StatusRequest>,
) -> Result<Json<Option<MessagePayload>>, ServerError> {
    let (change, advanced) = state
        .messages
        .update_message_status(&id, &caller, req.status)
        .await?;
    if !advanced {
        let payload = match change.channel_id {
            Some(channel_id) => Some(state.messages.render(&change.message, channel_id).await),
            None => None,
        };
        return Ok(Json(payload));
    }
    Ok(Json(publish_update(&state, &change).await))
}

/// Render and broadcast `message_updated` when the channel is known.
async fn publish_update(state: &AppState, change: &MessageChange) -> Option<MessagePayload> {
    let channel_id = change.channel_id?;
    let payload = state.messages.render(&change.message, channel_id).await;
    broadcast(state, &channel_id, ServerEvent::MessageUpdated(payload.clone())).await;
    Some(payload)
}

/// The mutation already succeeded; a failed fan-out is only logged.
async fn broadcast(state: &AppState, channel: &ChannelId, event: ServerEvent) {
    if let Err(e) = state.hub.broadcast_to_channel(channel, &event).await {
        warn!(channel = %channel, kind = event.kind(), error = %e, "Broadcast failed");
    }
}
