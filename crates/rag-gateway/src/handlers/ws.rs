use crate::auth::{AuthUser, CurrentUser};
use crate::models::api::Citation;
use crate::models::ws::{ClientQuery, ServerFrame};
use crate::services::query_service::{AnswerEmitter, QueryOptions};
use crate::services::retrieval_service::SearchResult;
use crate::state::AppState;
use crate::utils::error::ApiError;
use axum::{
    extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
    extract::State,
    response::Response,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const CLOSE_POLICY: u16 = 1008;
const CLOSE_SERVER_ERROR: u16 = 1011;

/// WS /ws/query — streaming RAG. Session comes from `?token=` or the
/// Authorization header; questions on one socket run sequentially.
pub async fn ws_query_handler(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(state, user.0, socket))
}

async fn handle_socket(state: Arc<AppState>, user: AuthUser, mut socket: WebSocket) {
    if user.organization_id.is_none() {
        warn!("WS rejected for {}: no organization context", user.user_id);
        let _ = socket
            .send(Message::Close(Some(CloseFrame {
                code: CLOSE_POLICY,
                reason: "organization context required".into(),
            })))
            .await;
        return;
    }

    info!("WS session open for {}", user.user_id);
    let deadline = Duration::from_secs(state.settings.timeouts.query_seconds);

    while let Some(incoming) = socket.recv().await {
        let message = match incoming {
            Ok(m) => m,
            Err(e) => {
                debug!("WS receive error, closing: {}", e);
                break;
            }
        };

        let text = match message {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };

        let query: ClientQuery = match serde_json::from_str(&text) {
            Ok(q) => q,
            Err(e) => {
                let frame = ServerFrame::Error {
                    message: format!("malformed query: {}", e),
                    kind: "InvalidInput".to_string(),
                };
                if send_frame(&mut socket, &frame).await.is_err() {
                    break;
                }
                continue;
            }
        };

        let options = QueryOptions {
            humanize: query.humanize,
            stream: query.stream,
        };

        let outcome = {
            let mut emitter = WsEmitter {
                socket: &mut socket,
            };
            tokio::time::timeout(
                deadline,
                state
                    .query_service
                    .handle(&user, &query.question, options, &mut emitter),
            )
            .await
        };

        match outcome {
            Ok(Ok(_)) => {
                // done; await the next question on this socket
            }
            Ok(Err((error, _partial))) => {
                if matches!(error, ApiError::Cancelled) {
                    debug!("WS client went away mid-answer");
                    break;
                }

                let frame = ServerFrame::Error {
                    message: error.public_message(),
                    kind: error.kind().to_string(),
                };
                let _ = send_frame(&mut socket, &frame).await;

                let code = match &error {
                    ApiError::Unauthenticated(_)
                    | ApiError::OrganizationRequired
                    | ApiError::PermissionDenied(_) => CLOSE_POLICY,
                    _ => CLOSE_SERVER_ERROR,
                };
                let _ = socket
                    .send(Message::Close(Some(CloseFrame {
                        code,
                        reason: error.kind().into(),
                    })))
                    .await;
                break;
            }
            Err(_) => {
                let frame = ServerFrame::Error {
                    message: "query deadline exceeded".to_string(),
                    kind: "Cancelled".to_string(),
                };
                let _ = send_frame(&mut socket, &frame).await;
                let _ = socket
                    .send(Message::Close(Some(CloseFrame {
                        code: CLOSE_SERVER_ERROR,
                        reason: "deadline exceeded".into(),
                    })))
                    .await;
                break;
            }
        }
    }

    debug!("WS session closed for {}", user.user_id);
}

async fn send_frame(socket: &mut WebSocket, frame: &ServerFrame) -> Result<(), ApiError> {
    let json = serde_json::to_string(frame)
        .map_err(|e| ApiError::Internal(format!("frame serialization: {}", e)))?;
    socket
        .send(Message::Text(json.into()))
        .await
        .map_err(|_| ApiError::Cancelled)
}

/// Forwards orchestrator output as protocol frames. A failed send means the
/// peer is gone; the orchestrator sees `Cancelled` and unwinds.
struct WsEmitter<'a> {
    socket: &'a mut WebSocket,
}

impl WsEmitter<'_> {
    async fn send(&mut self, frame: ServerFrame) -> Result<(), ApiError> {
        send_frame(self.socket, &frame).await
    }
}

#[async_trait::async_trait]
impl AnswerEmitter for WsEmitter<'_> {
    async fn status(&mut self, message: &str) -> Result<(), ApiError> {
        self.send(ServerFrame::Status {
            message: message.to_string(),
        })
        .await
    }

    async fn immediate(&mut self, results: &[SearchResult]) -> Result<(), ApiError> {
        self.send(ServerFrame::immediate_from(results)).await
    }

    async fn chunks(&mut self, results: &[SearchResult]) -> Result<(), ApiError> {
        self.send(ServerFrame::Chunks {
            data: results.to_vec(),
        })
        .await
    }

    async fn stream_start(&mut self) -> Result<(), ApiError> {
        self.send(ServerFrame::StreamStart).await
    }

    async fn stream_token(&mut self, token: &str) -> Result<(), ApiError> {
        self.send(ServerFrame::StreamToken {
            token: token.to_string(),
        })
        .await
    }

    async fn stream_end(&mut self, citations: &[Citation]) -> Result<(), ApiError> {
        self.send(ServerFrame::StreamEnd {
            citations: citations.to_vec(),
        })
        .await
    }

    async fn overview(&mut self, answer: &str, citations: &[Citation]) -> Result<(), ApiError> {
        self.send(ServerFrame::Overview {
            data: answer.to_string(),
            citations: citations.to_vec(),
        })
        .await
    }
}
