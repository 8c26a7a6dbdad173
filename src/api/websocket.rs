use actix_web::{web, Error, HttpRequest, Responder};
use actix_ws::{self, Message};
use futures_util::StreamExt;
use log::{debug, info, warn};
use serde::Serialize;
use std::time::{Duration, Instant};
use tokio::sync::broadcast::error::RecvError;
use tokio::time::interval;

use crate::api::handlers::AppState;
use crate::models::event::SwitchEvent;
use crate::models::filter::FilterView;

// How often heartbeat pings are sent
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

// Close the connection when the client stays silent this long
const CLIENT_TIMEOUT: Duration = Duration::from_secs(15);

/// WebSocket message types that can be sent to clients
#[derive(Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum WsOutMessage {
    Filters { filters: Vec<FilterView> },
    Switch { event: SwitchEvent },
    Ping { timestamp: i64 },
}

async fn send(session: &mut actix_ws::Session, msg: &WsOutMessage) -> Result<(), actix_ws::Closed> {
    match serde_json::to_string(msg) {
        Ok(json) => session.text(json).await,
        Err(e) => {
            warn!("Failed to serialize WebSocket message: {}", e);
            Ok(())
        }
    }
}

/// Stream switch events to a WebSocket client
pub async fn ws_index(
    req: HttpRequest,
    body: web::Payload,
    state: web::Data<AppState>,
) -> Result<impl Responder, Error> {
    let addr = req
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|| "unknown".to_string());
    info!("WebSocket connection from: {}", addr);

    let (response, mut session, mut msg_stream) = actix_ws::handle(&req, body)?;
    let mut events = state.engine.subscribe();
    let state = state.into_inner();

    actix_web::rt::spawn(async move {
        let mut heartbeat = interval(HEARTBEAT_INTERVAL);
        let mut last_seen = Instant::now();

        let initial = WsOutMessage::Filters {
            filters: state.filters.snapshot(),
        };
        if send(&mut session, &initial).await.is_err() {
            return;
        }

        loop {
            tokio::select! {
                msg = msg_stream.next() => {
                    let Some(Ok(msg)) = msg else {
                        break;
                    };
                    last_seen = Instant::now();
                    match msg {
                        Message::Ping(bytes) => {
                            if session.pong(&bytes).await.is_err() {
                                break;
                            }
                        }
                        Message::Text(text) => {
                            debug!("Received text message: {}", text);
                            if text.trim() == "filters" {
                                let msg = WsOutMessage::Filters {
                                    filters: state.filters.snapshot(),
                                };
                                if send(&mut session, &msg).await.is_err() {
                                    break;
                                }
                            }
                        }
                        Message::Close(_) => {
                            info!("Client requested close");
                            break;
                        }
                        _ => {}
                    }
                }
                event = events.recv() => match event {
                    Ok(event) => {
                        if send(&mut session, &WsOutMessage::Switch { event }).await.is_err() {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("WebSocket client {} missed {} switch events", addr, skipped);
                    }
                    Err(RecvError::Closed) => break,
                },
                _ = heartbeat.tick() => {
                    if last_seen.elapsed() > CLIENT_TIMEOUT {
                        warn!("WebSocket client {} heartbeat timed out", addr);
                        break;
                    }
                    let ping = WsOutMessage::Ping {
                        timestamp: chrono::Utc::now().timestamp(),
                    };
                    if send(&mut session, &ping).await.is_err() {
                        break;
                    }
                }
            }
        }

        let _ = session.close(None).await;
        info!("WebSocket connection from {} closed", addr);
    });

    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::event::SwitchReason;
    use crate::models::filter::Side;

    #[test]
    fn switch_message_is_tagged() {
        let msg = WsOutMessage::Switch {
            event: SwitchEvent::new(3, Side::Master, Side::Slave, SwitchReason::Stall),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "switch");
        assert_eq!(json["event"]["filterId"], 3);
        assert_eq!(json["event"]["reason"], "stall");
    }

    #[test]
    fn ping_message_is_tagged() {
        let json = serde_json::to_value(WsOutMessage::Ping { timestamp: 42 }).unwrap();
        assert_eq!(json["type"], "ping");
        assert_eq!(json["timestamp"], 42);
    }
}
