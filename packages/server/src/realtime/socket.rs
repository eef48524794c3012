//! Per-connection WebSocket handling: authentication handshake, inbound
//! event dispatch, AI streaming and disconnect cleanup.

use std::net::SocketAddr;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde_json::{Map, json};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use parlay_entity::{Message, MessageKind, new_object_id};

use crate::ai::{AiEvent, AiKind, extract_ai_mentions, strip_mention};
use crate::auth::AuthenticatedUser;
use crate::cache::NewMessage;
use crate::error::messages;
use crate::realtime::hub::SessionHandle;
use crate::realtime::protocol::{
    AuthFrame, ClientEvent, OutboundFrame, ReactionAction, ServerEvent,
};
use crate::state::AppState;

const AUTH_TIMEOUT: Duration = Duration::from_secs(10);
const HISTORY_LIMIT: usize = 30;
const LOAD_MAX_RETRIES: u32 = 3;
const LOAD_TIMEOUT: Duration = Duration::from_secs(10);

/// Upgrade endpoint. Draining instances refuse new sessions.
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Response {
    if state.rejects_new_connections() {
        return (StatusCode::SERVICE_UNAVAILABLE, "draining").into_response();
    }
    let device_info = headers
        .get("user-agent")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
        .to_string();
    ws.on_upgrade(move |socket| handle_connection(socket, state, addr, device_info))
}

async fn handle_connection(
    socket: WebSocket,
    state: AppState,
    addr: SocketAddr,
    device_info: String,
) {
    let (sink, mut stream) = socket.split();
    let (tx, rx) = mpsc::unbounded_channel::<OutboundFrame>();
    let writer = tokio::spawn(write_frames(sink, rx));

    // Authentication handshake: the first frame must be {token, sessionId}.
    let user = match authenticate(&state, &mut stream, &tx).await {
        Some(user) => user,
        None => {
            let _ = tx.send(OutboundFrame::Close);
            let _ = writer.await;
            return;
        },
    };

    let connection_id = format!("conn_{}", Uuid::new_v4());
    let handle = SessionHandle {
        connection_id: connection_id.clone(),
        session_id: user.session_id.clone(),
        tx: tx.clone(),
    };
    state
        .hub
        .register_session(&user.id, handle, device_info, addr.ip().to_string())
        .await;
    info!(user_id = %user.id, connection_id = %connection_id, "realtime session opened");

    let connection = Connection { state: state.clone(), user, connection_id, tx };

    let mut reason = "transport close";
    while let Some(frame) = stream.next().await {
        match frame {
            Ok(WsMessage::Text(text)) => {
                match serde_json::from_str::<ClientEvent>(&text) {
                    Ok(event) => connection.dispatch(event).await,
                    Err(err) => {
                        debug!(error = %err, "undecodable client frame");
                        connection.send(ServerEvent::Error {
                            message: "잘못된 요청 형식입니다.".to_string(),
                        });
                    },
                }
            },
            Ok(WsMessage::Close(_)) => {
                reason = "client namespace disconnect";
                break;
            },
            Ok(_) => {},
            Err(err) => {
                debug!(error = %err, "websocket receive error");
                reason = "transport error";
                break;
            },
        }
    }

    // A takeover by a newer session means this close was forced.
    if !state.hub.owns_session(&connection.user.id, &connection.connection_id).await {
        reason = "duplicate_login";
    }
    connection.disconnect(reason).await;
    let _ = connection.tx.send(OutboundFrame::Close);
    let _ = writer.await;
}

async fn write_frames(
    mut sink: SplitSink<WebSocket, WsMessage>,
    mut rx: mpsc::UnboundedReceiver<OutboundFrame>,
) {
    while let Some(frame) = rx.recv().await {
        match frame {
            OutboundFrame::Event(event) => {
                if sink.send(WsMessage::Text(event.to_frame().into())).await.is_err() {
                    break;
                }
            },
            OutboundFrame::Raw(payload) => {
                if sink.send(WsMessage::Text(payload.into())).await.is_err() {
                    break;
                }
            },
            OutboundFrame::Close => {
                let _ = sink.send(WsMessage::Close(None)).await;
                break;
            },
        }
    }
}

/// Reads and validates the handshake frame; on failure the §6.1 error shape
/// is sent and the connection is dropped.
async fn authenticate(
    state: &AppState,
    stream: &mut SplitStream<WebSocket>,
    tx: &mpsc::UnboundedSender<OutboundFrame>,
) -> Option<AuthenticatedUser> {
    let frame = tokio::time::timeout(AUTH_TIMEOUT, stream.next()).await;
    let raw = match frame {
        Ok(Some(Ok(WsMessage::Text(text)))) => text,
        _ => {
            send_auth_error(tx, messages::AUTH_ERROR);
            return None;
        },
    };
    let auth: AuthFrame = match serde_json::from_str(&raw) {
        Ok(auth) => auth,
        Err(_) => {
            send_auth_error(tx, messages::AUTH_ERROR);
            return None;
        },
    };
    match state.session_service.authenticate(&auth.token, &auth.session_id).await {
        Ok(user) => Some(user),
        Err(err) => {
            send_auth_error(tx, &err.to_string());
            None
        },
    }
}

fn send_auth_error(tx: &mpsc::UnboundedSender<OutboundFrame>, message: &str) {
    // Handshake failures answer with the bare {error} shape, not an event
    // envelope.
    let _ = tx.send(OutboundFrame::Raw(json!({ "error": message }).to_string()));
}

struct Connection {
    state: AppState,
    user: AuthenticatedUser,
    connection_id: String,
    tx: mpsc::UnboundedSender<OutboundFrame>,
}

impl Connection {
    fn send(&self, event: ServerEvent) {
        let _ = self.tx.send(OutboundFrame::Event(event));
    }

    async fn dispatch(&self, event: ClientEvent) {
        match event {
            ClientEvent::JoinRoom { room_id } => self.handle_join_room(&room_id).await,
            ClientEvent::LeaveRoom { room_id } => self.handle_leave_room(&room_id).await,
            ClientEvent::FetchPreviousMessages { room_id, before } => {
                self.handle_fetch_previous(&room_id, before).await;
            },
            ClientEvent::ChatMessage { room, message_type, content, file_data } => {
                self.handle_chat_message(&room, &message_type, content, file_data).await;
            },
            ClientEvent::MarkMessagesAsRead { room_id, message_ids } => {
                self.handle_mark_read(&room_id, message_ids).await;
            },
            ClientEvent::MessageReaction { message_id, reaction, action } => {
                self.handle_reaction(&message_id, &reaction, action).await;
            },
            ClientEvent::ForceLogin { token } => self.handle_force_login(&token).await,
        }
    }

    async fn handle_join_room(&self, room_id: &str) {
        let hub = &self.state.hub;
        let already_joined = hub.current_room(&self.user.id).await.as_deref() == Some(room_id);

        let room = match self.state.room_cache.get_room(room_id).await {
            Ok(Some(room)) => room,
            Ok(None) => {
                self.send(ServerEvent::JoinRoomError {
                    message: "채팅방을 찾을 수 없습니다.".to_string(),
                });
                return;
            },
            Err(err) => {
                warn!(room_id, error = %err, "join failed while loading the room");
                self.send(ServerEvent::JoinRoomError {
                    message: "채팅방 입장에 실패했습니다.".to_string(),
                });
                return;
            },
        };

        let mut participants = room.participants.clone();
        if !already_joined {
            if let Some(previous) = hub.enter_room(&self.user.id, room_id).await {
                hub.emit_to_room(
                    &previous,
                    ServerEvent::UserLeft {
                        room_id: previous.clone(),
                        user_id: self.user.id.clone(),
                        name: self.user.name.clone(),
                    },
                    Some(&self.user.id),
                )
                .await;
            }

            // Durable membership, then the refreshed participant set.
            let summary = self.user.summary();
            match self.state.rooms_repo.add_participant(room_id, &summary).await {
                Ok(true) => {
                    participants.push(summary.without_image());
                    hub.evict_participants(room_id).await;
                },
                Ok(false) => {},
                Err(err) => {
                    warn!(room_id, error = %err, "could not persist room membership");
                    self.send(ServerEvent::JoinRoomError {
                        message: "채팅방 입장에 실패했습니다.".to_string(),
                    });
                    return;
                },
            }
            hub.cache_participants(room_id, participants.clone()).await;

            // Entry announcement persists like any other message.
            if let Ok(system) = self
                .create_system_message(room_id, messages::joined(&self.user.name))
                .await
            {
                hub.emit_to_room(room_id, ServerEvent::Message(Box::new(system)), Some(&self.user.id))
                    .await;
            }
            hub.emit_to_room(
                room_id,
                ServerEvent::ParticipantsUpdate {
                    room_id: room_id.to_string(),
                    participants: participants.clone(),
                },
                None,
            )
            .await;

            // Non-blocking warm-up for the rest of the room history.
            let cache = self.state.message_cache.clone();
            let warm_room = room_id.to_string();
            tokio::spawn(async move {
                let _ = cache.warm_cache_for_room(&warm_room, HISTORY_LIMIT).await;
            });
        }

        let batch = match self
            .state
            .message_cache
            .get_messages_by_room(room_id, None, HISTORY_LIMIT)
            .await
        {
            Ok(batch) => batch,
            Err(err) => {
                warn!(room_id, error = %err, "history load failed during join");
                self.send(ServerEvent::JoinRoomError {
                    message: "메시지를 불러오지 못했습니다.".to_string(),
                });
                return;
            },
        };
        let active_streams = self.state.streaming.active_for_room(room_id).await;

        self.send(ServerEvent::JoinRoomSuccess {
            room_id: room_id.to_string(),
            participants,
            has_more: batch.has_more,
            oldest_timestamp: batch.oldest_timestamp,
            messages: batch.messages,
            active_streams,
        });
    }

    async fn handle_leave_room(&self, room_id: &str) {
        let hub = &self.state.hub;
        if hub.current_room(&self.user.id).await.as_deref() != Some(room_id) {
            return;
        }
        hub.leave_current_room(&self.user.id).await;
        hub.evict_participants(room_id).await;

        let participants = match self.state.room_cache.leave_room(room_id, &self.user.id).await {
            Ok(Some(room)) => room.participants,
            Ok(None) => Vec::new(),
            Err(err) => {
                warn!(room_id, error = %err, "durable leave failed");
                Vec::new()
            },
        };

        if let Ok(system) = self
            .create_system_message(room_id, messages::left(&self.user.name))
            .await
        {
            hub.emit_to_room(room_id, ServerEvent::Message(Box::new(system)), None).await;
        }
        hub.emit_to_room(
            room_id,
            ServerEvent::ParticipantsUpdate {
                room_id: room_id.to_string(),
                participants,
            },
            None,
        )
        .await;

        self.state.streaming.remove_owned_by(&self.user.id, Some(room_id)).await;
        hub.clear_user_guards(&self.user.id).await;
    }

    async fn handle_chat_message(
        &self,
        room_id: &str,
        message_type: &str,
        content: Option<String>,
        file_data: Option<parlay_entity::FileAttachment>,
    ) {
        let hub = &self.state.hub;
        if hub.current_room(&self.user.id).await.as_deref() != Some(room_id) {
            self.send(ServerEvent::Error {
                message: "채팅방 참여자만 메시지를 보낼 수 있습니다.".to_string(),
            });
            return;
        }
        if !self
            .state
            .session_service
            .is_session_valid(&self.user.id, &self.user.session_id)
            .await
        {
            self.send(ServerEvent::SessionEnded { reason: "invalid_session".to_string() });
            let _ = self.tx.send(OutboundFrame::Close);
            return;
        }

        let (kind, content) = match message_type {
            "text" => {
                let trimmed = content.unwrap_or_default().trim().to_string();
                if trimmed.is_empty() {
                    return;
                }
                (MessageKind::Text, trimmed)
            },
            "file" => {
                let Some(file) = file_data else {
                    self.send(ServerEvent::Error {
                        message: "파일 정보가 올바르지 않습니다.".to_string(),
                    });
                    return;
                };
                (MessageKind::File(file), content.unwrap_or_default())
            },
            other => {
                debug!(message_type = other, "unsupported chat message type");
                self.send(ServerEvent::Error {
                    message: "지원하지 않는 메시지 형식입니다.".to_string(),
                });
                return;
            },
        };

        let ai_mentions = extract_ai_mentions(&content);
        let mention_handles: Vec<String> =
            ai_mentions.iter().map(|kind| kind.handle().to_string()).collect();

        let created = self
            .state
            .message_cache
            .create_message(NewMessage {
                room: room_id.to_string(),
                sender: self.user.summary(),
                kind,
                content: content.clone(),
                mentions: mention_handles,
            })
            .await;
        let message = match created {
            Ok(message) => message,
            Err(err) => {
                warn!(room_id, error = %err, "message create failed");
                self.send(ServerEvent::Error { message: err.to_string() });
                return;
            },
        };

        hub.emit_to_room(room_id, ServerEvent::Message(Box::new(message)), None).await;

        for kind in ai_mentions {
            let query = strip_mention(&content, kind);
            spawn_ai_stream(self.state.clone(), room_id.to_string(), self.user.id.clone(), kind, query);
        }
    }

    async fn handle_fetch_previous(&self, room_id: &str, before: Option<i64>) {
        let hub = &self.state.hub;
        if hub.current_room(&self.user.id).await.as_deref() != Some(room_id) {
            self.send(ServerEvent::Error {
                message: "채팅방 참여자만 조회할 수 있습니다.".to_string(),
            });
            return;
        }
        if !hub.try_begin_load(room_id, &self.user.id).await {
            self.send(ServerEvent::Error {
                message: "이전 메시지를 이미 불러오는 중입니다.".to_string(),
            });
            return;
        }

        self.send(ServerEvent::MessageLoadStart { room_id: room_id.to_string() });

        let result = tokio::time::timeout(
            LOAD_TIMEOUT,
            self.load_with_retry(room_id, before),
        )
        .await;

        match result {
            Ok(Ok(batch)) => {
                hub.end_load(room_id, &self.user.id, true).await;
                self.send(ServerEvent::PreviousMessagesLoaded {
                    room_id: room_id.to_string(),
                    has_more: batch.has_more,
                    oldest_timestamp: batch.oldest_timestamp,
                    messages: batch.messages,
                });
            },
            Ok(Err(err)) => {
                hub.end_load(room_id, &self.user.id, false).await;
                warn!(room_id, error = %err, "history load failed after retries");
                self.send(ServerEvent::Error {
                    message: "이전 메시지를 불러오지 못했습니다.".to_string(),
                });
            },
            Err(_) => {
                hub.end_load(room_id, &self.user.id, false).await;
                self.send(ServerEvent::Error {
                    message: "이전 메시지 조회가 시간 초과되었습니다.".to_string(),
                });
            },
        }
    }

    /// Exponential backoff: 2 s, 4 s, 8 s capped at 10 s, bounded overall by
    /// the caller's timeout.
    async fn load_with_retry(
        &self,
        room_id: &str,
        before: Option<i64>,
    ) -> Result<crate::cache::MessageBatch, crate::error::ApiError> {
        let mut attempt = 0u32;
        loop {
            match self
                .state
                .message_cache
                .get_messages_by_room(room_id, before, HISTORY_LIMIT)
                .await
            {
                Ok(batch) => return Ok(batch),
                Err(err) if attempt + 1 < LOAD_MAX_RETRIES => {
                    let delay = Duration::from_millis(
                        (2_000u64 * 2u64.pow(attempt)).min(10_000),
                    );
                    debug!(room_id, attempt, error = %err, "history load retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                },
                Err(err) => return Err(err),
            }
        }
    }

    async fn handle_mark_read(&self, room_id: &str, message_ids: Vec<String>) {
        if self.state.hub.current_room(&self.user.id).await.as_deref() != Some(room_id) {
            return;
        }
        match self.state.message_cache.mark_as_read(&message_ids, &self.user.id).await {
            Ok(updated) if !updated.is_empty() => {
                self.state
                    .hub
                    .emit_to_room(
                        room_id,
                        ServerEvent::MessagesRead {
                            user_id: self.user.id.clone(),
                            message_ids: updated,
                        },
                        Some(&self.user.id),
                    )
                    .await;
            },
            Ok(_) => {},
            Err(err) => {
                warn!(room_id, error = %err, "mark-as-read failed");
            },
        }
    }

    async fn handle_reaction(&self, message_id: &str, emoji: &str, action: ReactionAction) {
        let result = match action {
            ReactionAction::Add => {
                self.state.message_cache.add_reaction(message_id, emoji, &self.user.id).await
            },
            ReactionAction::Remove => {
                self.state
                    .message_cache
                    .remove_reaction(message_id, emoji, &self.user.id)
                    .await
            },
        };
        match result {
            Ok(update) => {
                self.state
                    .hub
                    .emit_to_room(
                        &update.room,
                        ServerEvent::MessageReactionUpdate {
                            message_id: update.message_id.clone(),
                            reactions: update.reactions.clone(),
                        },
                        None,
                    )
                    .await;
            },
            Err(err) => {
                debug!(message_id, error = %err, "reaction update failed");
                self.send(ServerEvent::Error {
                    message: "리액션 처리에 실패했습니다.".to_string(),
                });
            },
        }
    }

    async fn handle_force_login(&self, token: &str) {
        if !self.state.session_service.token_belongs_to(token, &self.user.id) {
            self.send(ServerEvent::Error { message: messages::INVALID_TOKEN.to_string() });
            return;
        }
        self.send(ServerEvent::SessionEnded { reason: "force_logout".to_string() });
        let _ = self.tx.send(OutboundFrame::Close);
    }

    /// Disconnect cleanup. An unexpected close (neither a client-initiated
    /// disconnect nor a duplicate-login takeover) announces the drop to the
    /// room.
    async fn disconnect(&self, reason: &str) {
        info!(user_id = %self.user.id, reason, "realtime session closed");
        let room = self
            .state
            .hub
            .unregister_session(&self.user.id, &self.connection_id)
            .await;
        self.state.streaming.remove_owned_by(&self.user.id, None).await;

        let unexpected =
            reason != "client namespace disconnect" && reason != "duplicate_login";
        if let Some(room_id) = room.filter(|_| unexpected) {
            if let Ok(system) = self
                .create_system_message(&room_id, messages::disconnected(&self.user.name))
                .await
            {
                self.state
                    .hub
                    .emit_to_room(&room_id, ServerEvent::Message(Box::new(system)), None)
                    .await;
            }
            let participants = match self.state.room_cache.get_room(&room_id).await {
                Ok(Some(room)) => room.participants,
                _ => Vec::new(),
            };
            self.state
                .hub
                .emit_to_room(
                    &room_id,
                    ServerEvent::ParticipantsUpdate { room_id: room_id.clone(), participants },
                    None,
                )
                .await;
        }
    }

    async fn create_system_message(
        &self,
        room_id: &str,
        content: String,
    ) -> Result<Message, crate::error::ApiError> {
        self.state
            .message_cache
            .create_message(NewMessage {
                room: room_id.to_string(),
                sender: self.user.summary(),
                kind: MessageKind::System,
                content,
                mentions: Vec::new(),
            })
            .await
    }
}

/// Runs one AI response stream for a room. The streaming session entry is
/// the cancellation token: removing it (leave, disconnect) turns any late
/// events into no-ops.
fn spawn_ai_stream(
    state: AppState,
    room_id: String,
    owner_user_id: String,
    kind: AiKind,
    query: String,
) {
    tokio::spawn(async move {
        let streaming = state.streaming.clone();
        let stream_id = streaming.start(&room_id, &owner_user_id, kind).await;
        let started_at = Utc::now().timestamp_millis();

        state
            .hub
            .emit_to_room(
                &room_id,
                ServerEvent::AiMessageStart {
                    message_id: stream_id.clone(),
                    ai_type: kind.handle().to_string(),
                    timestamp: started_at,
                },
                None,
            )
            .await;

        let mut rx = state.ai.stream(kind, &query);
        while let Some(event) = rx.recv().await {
            if !streaming.is_active(&stream_id).await {
                debug!(stream_id = %stream_id, "AI stream cancelled");
                return;
            }
            match event {
                AiEvent::Chunk { current_chunk, is_code_block } => {
                    let Some(full_content) =
                        streaming.append_chunk(&stream_id, &current_chunk).await
                    else {
                        return;
                    };
                    state
                        .hub
                        .emit_to_room(
                            &room_id,
                            ServerEvent::AiMessageChunk {
                                message_id: stream_id.clone(),
                                current_chunk,
                                full_content,
                                is_code_block,
                                timestamp: Utc::now().timestamp_millis(),
                                ai_type: kind.handle().to_string(),
                                is_complete: false,
                            },
                            None,
                        )
                        .await;
                },
                AiEvent::Complete { content, completion_tokens, total_tokens } => {
                    streaming.remove(&stream_id).await;
                    let now = Utc::now().timestamp_millis();
                    let mut metadata = Map::new();
                    metadata.insert("query".to_string(), json!(query));
                    metadata.insert("generationTime".to_string(), json!(now - started_at));
                    metadata.insert("completionTokens".to_string(), json!(completion_tokens));
                    metadata.insert("totalTokens".to_string(), json!(total_tokens));

                    let mut message = Message::new(
                        new_object_id(),
                        room_id.clone(),
                        ai_sender(kind),
                        MessageKind::Ai { ai_type: kind.handle().to_string() },
                        content.clone(),
                        Vec::new(),
                        now,
                    );
                    message.metadata = metadata;
                    message.instance_id = Some(state.config.instance_id.clone());

                    if let Err(err) = state.message_cache.persist_direct(&message).await {
                        warn!(error = %err, "failed to persist AI message");
                    }

                    state
                        .hub
                        .emit_to_room(
                            &room_id,
                            ServerEvent::AiMessageComplete {
                                message_id: stream_id.clone(),
                                persisted_id: message.id.clone(),
                                content,
                                ai_type: kind.handle().to_string(),
                                timestamp: now,
                                is_complete: true,
                                query: query.clone(),
                                reactions: json!({}),
                            },
                            None,
                        )
                        .await;
                    return;
                },
                AiEvent::Error { message } => {
                    streaming.remove(&stream_id).await;
                    state
                        .hub
                        .emit_to_room(
                            &room_id,
                            ServerEvent::AiMessageError {
                                message_id: stream_id.clone(),
                                error: message,
                                ai_type: kind.handle().to_string(),
                            },
                            None,
                        )
                        .await;
                    return;
                },
            }
        }

        // Provider hung up without a terminal event.
        if streaming.remove(&stream_id).await.is_some() {
            state
                .hub
                .emit_to_room(
                    &room_id,
                    ServerEvent::AiMessageError {
                        message_id: stream_id,
                        error: "AI stream ended unexpectedly".to_string(),
                        ai_type: kind.handle().to_string(),
                    },
                    None,
                )
                .await;
        }
    });
}

fn ai_sender(kind: AiKind) -> parlay_entity::UserSummary {
    parlay_entity::UserSummary {
        id: kind.handle().to_string(),
        name: kind.handle().to_string(),
        email: format!("{}@parlay.ai", kind.handle().to_lowercase()),
        profile_image: None,
    }
}
