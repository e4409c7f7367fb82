//! Per-connection state machine: pulls frames off the codec, dispatches
//! them, and drives storage/registry/fan-out side effects.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, instrument, warn};

use chat_common::constants::{IDLE_TIMEOUT_SECS, MESSAGE_HISTORY_LIMIT};
use chat_common::helpers::hash::{generate_session_token, hash_password, verify_password_hash};
use chat_common::protocol::{
    ChannelInfo, ChatMessage, ClientMessage, MemberInfo, PresenceStatus, ServerMessage,
};
use chat_common::validators::{
    normalize_channel_name, sanitize_content, validate_channel_name, validate_message_content,
    validate_password, validate_username,
};
use chat_db::{Inserted, MessageKind};

use crate::codec;
use crate::connections::ConnectionHandle;
use crate::rate_limiter::SlidingWindowLimiter;
use crate::state::AppState;

/// The `type` tags a client is allowed to send, open or authenticated.
/// Anything outside this set is an unrecognized message per §4.3.
const KNOWN_CLIENT_MESSAGE_TYPES: &[&str] = &[
    "auth_register",
    "auth_login",
    "channel_join",
    "channel_leave",
    "channel_create",
    "channel_list",
    "message",
    "private_message",
    "action",
    "user_list",
];

/// Drives one accepted connection end to end: reads frames until the
/// stream closes, the idle timeout elapses, a fatal framing error occurs,
/// or the server is shutting down — dispatching each frame, then
/// performing cleanup unconditionally on the way out.
#[instrument(skip_all, fields(peer = %peer_addr))]
pub async fn run_connection<R, W>(
    state: AppState,
    id: u64,
    peer_addr: SocketAddr,
    mut reader: R,
    write_half: W,
    mut shutdown: watch::Receiver<bool>,
) where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let handle = Arc::new(ConnectionHandle::new(id, peer_addr, Box::new(write_half)));
    state.connections.insert(handle.clone()).await;
    let rate_limiter = Mutex::new(SlidingWindowLimiter::default());
    let idle_timeout = Duration::from_secs(IDLE_TIMEOUT_SECS);

    info!("connection accepted");

    loop {
        let payload = tokio::select! {
            biased;
            _ = shutdown.changed() => {
                debug!("server shutting down, closing connection");
                break;
            }
            outcome = tokio::time::timeout(idle_timeout, codec::read_frame(&mut reader)) => {
                match outcome {
                    Ok(Ok(Some(payload))) => payload,
                    Ok(Ok(None)) => {
                        debug!("peer closed connection");
                        break;
                    }
                    Ok(Err(error)) => {
                        warn!(%error, "framing error, closing connection");
                        break;
                    }
                    Err(_elapsed) => {
                        debug!("connection idle, closing");
                        break;
                    }
                }
            }
        };

        let value: serde_json::Value = match serde_json::from_slice(&payload) {
            Ok(value) => value,
            Err(error) => {
                debug!(%error, "dropping malformed frame");
                continue;
            }
        };

        let outcome = match recognized_type(&value) {
            Some(tag) => match serde_json::from_value::<ClientMessage>(value) {
                Ok(msg) => dispatch(&state, &handle, &rate_limiter, msg).await,
                Err(error) => {
                    debug!(%error, tag, "malformed fields for known message type");
                    reply_malformed(&handle, tag).await
                }
            },
            None => reply_unrecognized_type(&handle).await,
        };

        if outcome.is_err() {
            break;
        }
    }

    state.cleanup_connection(&handle).await;
    info!("connection closed");
}

/// Returns the `type` field's value iff it names a known client message.
fn recognized_type(value: &serde_json::Value) -> Option<&str> {
    let tag = value.get("type")?.as_str()?;
    KNOWN_CLIENT_MESSAGE_TYPES.contains(&tag).then_some(tag)
}

/// A known type whose fields don't match its schema: auth attempts get an
/// `auth_result` failure (the state machine contract for `auth_*`), every
/// other known type gets an `invalid` error frame.
async fn reply_malformed(handle: &Arc<ConnectionHandle>, tag: &str) -> Result<(), ()> {
    if (tag == "auth_register" || tag == "auth_login") && !handle.is_authenticated().await {
        return auth_failure(handle, "Malformed request.".to_string()).await;
    }
    reply(handle, ServerMessage::error("invalid", "Malformed request.")).await
}

/// Unrecognized `type`: `not_authenticated` pre-login (any non-auth
/// message is rejected the same way regardless of whether its type is
/// known), `unknown` once authenticated (§4.3).
async fn reply_unrecognized_type(handle: &Arc<ConnectionHandle>) -> Result<(), ()> {
    if handle.is_authenticated().await {
        reply(handle, ServerMessage::error("unknown", "Unrecognized message type.")).await
    } else {
        reply(handle, ServerMessage::error("not_authenticated", "Please log in first.")).await
    }
}

/// Returns `Err(())` only when the connection must be torn down (a send
/// to this peer itself failed — every other error path degrades to an
/// `error`/`auth_result` frame and keeps the connection open).
async fn dispatch(
    state: &AppState,
    handle: &Arc<ConnectionHandle>,
    rate_limiter: &Mutex<SlidingWindowLimiter>,
    msg: ClientMessage,
) -> Result<(), ()> {
    let authenticated = handle.is_authenticated().await;

    match (&msg, authenticated) {
        (ClientMessage::AuthRegister { .. }, false) | (ClientMessage::AuthLogin { .. }, false) => {
            handle_auth(state, handle, msg).await
        }
        (ClientMessage::AuthRegister { .. }, true) | (ClientMessage::AuthLogin { .. }, true) => {
            // Already authenticated; the source protocol simply ignores a
            // stray auth attempt rather than erroring on it.
            Ok(())
        }
        (_, false) => {
            reply(handle, ServerMessage::error("not_authenticated", "Please log in first.")).await
        }
        (_, true) => handle_authenticated(state, handle, rate_limiter, msg).await,
    }
}

async fn reply(handle: &Arc<ConnectionHandle>, msg: ServerMessage) -> Result<(), ()> {
    handle.send(&msg).await.map_err(|_| ())
}

async fn handle_auth(
    state: &AppState,
    handle: &Arc<ConnectionHandle>,
    msg: ClientMessage,
) -> Result<(), ()> {
    let (username, password, is_register) = match msg {
        ClientMessage::AuthRegister { username, password } => (username, password, true),
        ClientMessage::AuthLogin { username, password } => (username, password, false),
        _ => unreachable!("handle_auth only called for auth_* messages"),
    };

    let (user_id, display_name) = if is_register {
        match register(state, &username, &password).await {
            Ok(pair) => pair,
            Err(error) => return auth_failure(handle, error).await,
        }
    } else {
        match login(state, &username, &password).await {
            Ok(pair) => pair,
            Err(error) => return auth_failure(handle, error).await,
        }
    };

    let token = generate_session_token();
    if let Err(error) = state.store.create_session(token.expose_secret(), user_id).await {
        warn!(%error, "failed to persist session");
        return auth_failure(handle, "Internal error, please try again.".into()).await;
    }

    handle.set_authenticated(display_name.clone(), user_id).await;

    reply(
        handle,
        ServerMessage::AuthResult {
            success: true,
            token: Some(token.expose_secret().clone()),
            username: Some(display_name.clone()),
            error: None,
        },
    )
    .await?;

    finalize_login(state, handle, &display_name).await
}

async fn auth_failure(handle: &Arc<ConnectionHandle>, error: String) -> Result<(), ()> {
    reply(
        handle,
        ServerMessage::AuthResult {
            success: false,
            token: None,
            username: None,
            error: Some(error),
        },
    )
    .await
}

async fn register(state: &AppState, username: &str, password: &str) -> Result<(i64, String), String> {
    validate_username(username)?;
    validate_password(password)?;

    let hash = hash_password(password);
    match state
        .store
        .create_user(username, &hash)
        .await
        .map_err(|_| "Internal error, please try again.".to_string())?
    {
        Inserted::Created(id) => Ok((id, username.to_string())),
        Inserted::Conflict => Err("Username already taken.".to_string()),
    }
}

async fn login(state: &AppState, username: &str, password: &str) -> Result<(i64, String), String> {
    let user = state
        .store
        .get_user_by_username(username)
        .await
        .map_err(|_| "Internal error, please try again.".to_string())?
        .ok_or_else(|| "Invalid username or password.".to_string())?;

    let ok = verify_password_hash(password, &user.password_hash).unwrap_or(false);
    if !ok {
        return Err("Invalid username or password.".to_string());
    }
    Ok((user.id, user.username))
}

/// Post-authentication sequence: channel list, default-channel join,
/// presence broadcast.
async fn finalize_login(
    state: &AppState,
    handle: &Arc<ConnectionHandle>,
    username: &str,
) -> Result<(), ()> {
    send_channel_info(state, handle).await?;
    join_channel(state, handle, username, chat_db::DEFAULT_CHANNEL_NAME, false).await?;

    state
        .broadcast_all(
            &ServerMessage::StatusChange {
                username: username.to_string(),
                status: PresenceStatus::Online,
            },
            Some(handle.id),
        )
        .await;
    Ok(())
}

async fn send_channel_info(state: &AppState, handle: &Arc<ConnectionHandle>) -> Result<(), ()> {
    let channels = state.store.list_channels().await.unwrap_or_default();
    let channels = channels
        .into_iter()
        .map(|c| ChannelInfo {
            id: c.id,
            name: c.name,
            description: c.description,
        })
        .collect();
    reply(handle, ServerMessage::ChannelInfo { channels }).await
}

async fn handle_authenticated(
    state: &AppState,
    handle: &Arc<ConnectionHandle>,
    rate_limiter: &Mutex<SlidingWindowLimiter>,
    msg: ClientMessage,
) -> Result<(), ()> {
    match msg {
        ClientMessage::ChannelJoin { channel } => {
            let username = handle.meta().await.username.unwrap_or_default();
            join_channel(state, handle, &username, &channel, true).await
        }
        ClientMessage::ChannelLeave { channel } => handle_channel_leave(state, handle, &channel).await,
        ClientMessage::ChannelCreate { name, description } => {
            handle_channel_create(state, handle, &name, &description).await
        }
        ClientMessage::ChannelList {} => send_channel_info(state, handle).await,
        ClientMessage::Message { channel, content } => {
            handle_chat_send(state, handle, rate_limiter, channel, content, MessageKind::Message).await
        }
        ClientMessage::Action { channel, content } => {
            handle_chat_send(state, handle, rate_limiter, channel, content, MessageKind::Action).await
        }
        ClientMessage::PrivateMessage { to, content } => {
            handle_private_message(state, handle, rate_limiter, to, content).await
        }
        ClientMessage::UserList { channel } => handle_user_list(state, handle, channel).await,
        ClientMessage::AuthRegister { .. } | ClientMessage::AuthLogin { .. } => Ok(()),
    }
}

/// Joins `channel`, first silently leaving whatever channel the
/// connection currently occupies. `announce` controls whether the
/// departure from the previous channel is broadcast (it always is for an
/// explicit `channel_join`; the synthetic post-login join has no prior
/// channel to leave, so the flag is moot there but kept for symmetry).
async fn join_channel(
    state: &AppState,
    handle: &Arc<ConnectionHandle>,
    username: &str,
    channel: &str,
    announce: bool,
) -> Result<(), ()> {
    let normalized = normalize_channel_name(channel);
    if let Err(error) = validate_channel_name(channel) {
        return reply(handle, ServerMessage::error("invalid", error)).await;
    }

    let Some(record) = state.store.get_channel_by_name(&normalized).await.ok().flatten() else {
        return reply(handle, ServerMessage::error("not_found", "No such channel.")).await;
    };

    let previous = state.channels.join(&record.name, username).await;
    handle.set_current_channel(Some(record.name.clone())).await;

    if announce {
        if let Some(previous_channel) = previous {
            state
                .broadcast_channel(
                    &previous_channel,
                    &ServerMessage::UserLeft {
                        channel: previous_channel.clone(),
                        username: username.to_string(),
                    },
                    None,
                )
                .await;
        }
    }

    let history = state
        .store
        .get_message_history(record.id, MESSAGE_HISTORY_LIMIT)
        .await
        .unwrap_or_default()
        .into_iter()
        .map(|m| ChatMessage {
            id: m.id,
            channel: record.name.clone(),
            sender: m.sender,
            content: m.content,
            timestamp: m.created_at,
        })
        .collect();

    let members = state.channels.members(&record.name).await;
    let users = members
        .into_iter()
        .map(|username| MemberInfo {
            username,
            status: PresenceStatus::Online,
        })
        .collect();

    reply(
        handle,
        ServerMessage::ChannelJoined {
            channel: record.name.clone(),
            history,
            users,
        },
    )
    .await?;

    state
        .broadcast_channel(
            &record.name,
            &ServerMessage::UserJoined {
                channel: record.name,
                username: username.to_string(),
            },
            Some(handle.id),
        )
        .await;
    Ok(())
}

/// A leave only clears the connection's `current_channel` pointer when
/// the requested channel matches it; leaving a channel the connection is
/// not currently in only mutates the registry.
async fn handle_channel_leave(
    state: &AppState,
    handle: &Arc<ConnectionHandle>,
    channel: &str,
) -> Result<(), ()> {
    let normalized = normalize_channel_name(channel);
    let meta = handle.meta().await;
    let Some(username) = meta.username else {
        return Ok(());
    };

    let removed = state.channels.leave(&normalized, &username).await;
    if !removed {
        return Ok(());
    }

    if meta.current_channel.as_deref() == Some(normalized.as_str()) {
        handle.set_current_channel(None).await;
    }

    state
        .broadcast_channel(
            &normalized,
            &ServerMessage::UserLeft {
                channel: normalized.clone(),
                username,
            },
            None,
        )
        .await;
    Ok(())
}

async fn handle_channel_create(
    state: &AppState,
    handle: &Arc<ConnectionHandle>,
    name: &str,
    description: &str,
) -> Result<(), ()> {
    if let Err(error) = validate_channel_name(name) {
        return reply(handle, ServerMessage::error("invalid", error)).await;
    }
    let normalized = normalize_channel_name(name);
    let creator_id = handle.meta().await.user_id.unwrap_or_default();

    match state
        .store
        .create_channel(&normalized, description, creator_id)
        .await
    {
        Ok(Inserted::Created(id)) => {
            let info = ChannelInfo {
                id,
                name: normalized,
                description: description.to_string(),
            };
            state
                .broadcast_all(&ServerMessage::ChannelCreated { channel: info }, None)
                .await;
            Ok(())
        }
        Ok(Inserted::Conflict) => {
            reply(handle, ServerMessage::error("exists", "A channel with that name already exists.")).await
        }
        Err(_) => reply(handle, ServerMessage::error("invalid", "Could not create channel.")).await,
    }
}

/// Resolves the target channel for an unqualified `message`/`action`:
/// the explicit field if present, otherwise the connection's current
/// channel. Distinguishes "named a channel that doesn't exist" from
/// "named nothing and has no current channel".
enum ChannelResolution {
    Resolved(chat_db::Channel),
    Unresolved,
    NoChannel,
}

async fn resolve_target_channel(
    state: &AppState,
    handle: &Arc<ConnectionHandle>,
    explicit: Option<String>,
) -> ChannelResolution {
    let name = match explicit {
        Some(name) => name,
        None => match handle.meta().await.current_channel {
            Some(current) => current,
            None => return ChannelResolution::NoChannel,
        },
    };

    match state.store.get_channel_by_name(&normalize_channel_name(&name)).await {
        Ok(Some(channel)) => ChannelResolution::Resolved(channel),
        _ => ChannelResolution::Unresolved,
    }
}

async fn handle_chat_send(
    state: &AppState,
    handle: &Arc<ConnectionHandle>,
    rate_limiter: &Mutex<SlidingWindowLimiter>,
    channel: Option<String>,
    content: String,
    kind: MessageKind,
) -> Result<(), ()> {
    if !rate_limiter.lock().await.check(Instant::now()) {
        return reply(handle, ServerMessage::error("rate_limited", "Slow down.")).await;
    }

    if let Err(error) = validate_message_content(&content) {
        return reply(handle, ServerMessage::error("invalid", error)).await;
    }
    let content = sanitize_content(content.trim());

    let resolution = resolve_target_channel(state, handle, channel).await;
    let channel_record = match resolution {
        ChannelResolution::Resolved(c) => c,
        ChannelResolution::NoChannel => {
            return reply(handle, ServerMessage::error("no_channel", "Join a channel first.")).await;
        }
        ChannelResolution::Unresolved => {
            return match kind {
                // `message` reports the failure; `action` is dropped
                // silently, mirroring the source behavior.
                MessageKind::Message => {
                    reply(handle, ServerMessage::error("not_found", "No such channel.")).await
                }
                MessageKind::Action => Ok(()),
            };
        }
    };

    let meta = handle.meta().await;
    let username = meta.username.unwrap_or_default();
    let user_id = meta.user_id.unwrap_or_default();

    let id = match state
        .store
        .save_message(channel_record.id, user_id, &content, kind)
        .await
    {
        Ok(id) => id,
        Err(_) => {
            return reply(handle, ServerMessage::error("invalid", "Could not send message.")).await;
        }
    };

    let timestamp = chrono::Utc::now();
    let frame = match kind {
        MessageKind::Message => ServerMessage::Message {
            id,
            channel: channel_record.name.clone(),
            sender: username,
            content,
            timestamp,
        },
        MessageKind::Action => ServerMessage::Action {
            channel: channel_record.name.clone(),
            sender: username,
            content,
            timestamp,
        },
    };

    state
        .broadcast_channel(&channel_record.name, &frame, None)
        .await;
    Ok(())
}

async fn handle_private_message(
    state: &AppState,
    handle: &Arc<ConnectionHandle>,
    rate_limiter: &Mutex<SlidingWindowLimiter>,
    to: String,
    content: String,
) -> Result<(), ()> {
    if !rate_limiter.lock().await.check(Instant::now()) {
        return reply(handle, ServerMessage::error("rate_limited", "Slow down.")).await;
    }

    if let Err(error) = validate_message_content(&content) {
        return reply(handle, ServerMessage::error("invalid", error)).await;
    }
    let content = sanitize_content(content.trim());

    let Some(recipient) = state.connections.find_by_username(&to).await else {
        return reply(handle, ServerMessage::error("not_found", "User not found or offline.")).await;
    };

    let from = handle.meta().await.username.unwrap_or_default();
    let timestamp = chrono::Utc::now();

    recipient
        .send(&ServerMessage::PrivateMessage {
            from: from.clone(),
            to: None,
            content: content.clone(),
            timestamp,
        })
        .await
        .ok();

    reply(
        handle,
        ServerMessage::PrivateMessage {
            from,
            to: Some(to),
            content,
            timestamp,
        },
    )
    .await
}

async fn handle_user_list(
    state: &AppState,
    handle: &Arc<ConnectionHandle>,
    channel: Option<String>,
) -> Result<(), ()> {
    let channel = match channel.or(handle.meta().await.current_channel) {
        Some(channel) => channel,
        None => {
            return reply(handle, ServerMessage::error("no_channel", "Join a channel first.")).await;
        }
    };
    let normalized = normalize_channel_name(&channel);
    let users = state
        .channels
        .members(&normalized)
        .await
        .into_iter()
        .map(|username| MemberInfo {
            username,
            status: PresenceStatus::Online,
        })
        .collect();

    reply(
        handle,
        ServerMessage::UserList {
            channel: normalized,
            users,
        },
    )
    .await
}
