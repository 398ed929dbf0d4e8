use crate::auth::bearer_token;
use crate::routes::{ApiError, AppState};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::HeaderMap,
    response::Response,
};
use clientdesk_core::{ClientAssignment, Session};
use clientdesk_storage::SnapshotListener;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{info, warn};

#[derive(Debug, Default, Deserialize)]
pub struct LiveQuery {
    pub token: Option<String>,
}

#[derive(Serialize)]
struct SnapshotMessage<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    records: &'a [ClientAssignment],
}

pub fn snapshot_message(records: &[ClientAssignment]) -> serde_json::Result<String> {
    serde_json::to_string(&SnapshotMessage {
        kind: "snapshot",
        records,
    })
}

/// Listener that serializes each snapshot into a latest-value slot for the
/// socket writer. A slow socket skips intermediate states but always ends on
/// the newest one.
pub fn snapshot_forwarder(tx: watch::Sender<Option<String>>) -> SnapshotListener {
    Box::new(move |records: &[ClientAssignment]| {
        match snapshot_message(records) {
            Ok(text) => {
                tx.send_replace(Some(text));
            }
            Err(err) => warn!(event = "snapshot_encode", error = %err),
        }
    })
}

/// Session for a live connection. Browsers cannot set headers on a
/// websocket handshake, so the token may also come as `?token=`.
pub fn live_session(
    state: &AppState,
    headers: &HeaderMap,
    query: LiveQuery,
) -> Result<Session, ApiError> {
    let token = bearer_token(headers).map(str::to_string).or(query.token);
    Ok(state.sessions.authenticate(token.as_deref())?)
}

/// `GET /assignments/live`
pub async fn live_assignments(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<LiveQuery>,
) -> Result<Response, ApiError> {
    let session = live_session(&state, &headers, query)?;
    Ok(ws.on_upgrade(move |socket| handle_live_socket(state, session, socket)))
}

async fn handle_live_socket(state: AppState, session: Session, socket: WebSocket) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = watch::channel::<Option<String>>(None);

    let store = state.assignments(&session);
    let subscription = match store.subscribe(snapshot_forwarder(tx)) {
        Ok(subscription) => subscription,
        Err(err) => {
            warn!(event = "live_subscribe_error", actor = %session.email, error = %err);
            let _ = ws_sender.send(Message::Close(None)).await;
            return;
        }
    };
    info!(event = "live_open", actor = %session.email);

    loop {
        tokio::select! {
            changed = rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let Some(text) = rx.borrow_and_update().clone() else { continue };
                if ws_sender.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            incoming = ws_receiver.next() => match incoming {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    warn!(event = "live_read_error", actor = %session.email, error = %err);
                    break;
                }
            },
        }
    }

    drop(subscription);
    info!(event = "live_close", actor = %session.email);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::router;
    use axum::http::{header::AUTHORIZATION, HeaderValue, StatusCode};
    use clientdesk_core::{AgentRoster, NewAssignment, SessionTable, ASSIGNMENTS_COLLECTION};
    use clientdesk_storage::DocumentStore;
    use serde_json::Value;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_tungstenite::{connect_async, tungstenite};

    const TOKEN: &str = "agent-token";

    fn state() -> AppState {
        let mut sessions = SessionTable::default();
        sessions.insert(TOKEN, Session::new("maria@desk.example", false));
        AppState::new(
            Arc::new(DocumentStore::open_in_memory().expect("open")),
            sessions,
            AgentRoster::default(),
        )
    }

    fn draft(name: &str) -> NewAssignment {
        NewAssignment {
            name: name.to_string(),
            age: "30".to_string(),
            ..Default::default()
        }
    }

    fn record_count(text: &str) -> usize {
        let value: Value = serde_json::from_str(text).expect("json");
        assert_eq!(value["type"], "snapshot");
        value["records"].as_array().map(Vec::len).unwrap_or(0)
    }

    fn snapshot_text(message: Option<Result<tungstenite::Message, tungstenite::Error>>) -> String {
        match message {
            Some(Ok(tungstenite::Message::Text(text))) => text,
            other => panic!("expected snapshot, got {other:?}"),
        }
    }

    #[test]
    fn snapshot_message_is_tagged() {
        let text = snapshot_message(&[]).expect("encode");
        let value: Value = serde_json::from_str(&text).expect("decode");
        assert_eq!(value["type"], "snapshot");
        assert_eq!(value["records"], Value::Array(Vec::new()));
    }

    #[test]
    fn slow_reader_still_sees_final_state_after_burst() {
        let state = state();
        let store = state.assignments(&Session::new("maria@desk.example", false));
        let (tx, mut rx) = watch::channel::<Option<String>>(None);
        let subscription = store.subscribe(snapshot_forwarder(tx)).expect("subscribe");

        for idx in 0..20 {
            store.create(draft(&format!("Client {idx}"))).expect("create");
        }

        assert!(rx.has_changed().expect("sender alive"));
        let latest = rx.borrow_and_update().clone().expect("snapshot");
        assert_eq!(record_count(&latest), 20);
        assert!(!rx.has_changed().expect("sender alive"));

        drop(subscription);
        assert!(rx.has_changed().is_err());
    }

    #[test]
    fn live_session_accepts_header_or_query_token() {
        let state = state();
        let err = live_session(&state, &HeaderMap::new(), LiveQuery::default())
            .expect_err("missing token");
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);

        let unknown = LiveQuery {
            token: Some("nope".to_string()),
        };
        let err = live_session(&state, &HeaderMap::new(), unknown).expect_err("unknown token");
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);

        let query = LiveQuery {
            token: Some(TOKEN.to_string()),
        };
        let session = live_session(&state, &HeaderMap::new(), query).expect("query token");
        assert_eq!(session.email, "maria@desk.example");

        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {TOKEN}")).expect("header"),
        );
        assert!(live_session(&state, &headers, LiveQuery::default()).is_ok());
    }

    #[tokio::test]
    async fn socket_streams_snapshots_and_unsubscribes_on_close() {
        let state = state();
        let documents = state.documents.clone();
        let store = state.assignments(&Session::new("leo@desk.example", false));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("addr");
        let server = tokio::spawn(async move {
            let _ = axum::serve(listener, router(state)).await;
        });

        assert!(connect_async(format!("ws://{addr}/assignments/live"))
            .await
            .is_err());

        let (mut ws, _) = connect_async(format!("ws://{addr}/assignments/live?token={TOKEN}"))
            .await
            .expect("connect");
        assert_eq!(record_count(&snapshot_text(ws.next().await)), 0);

        store.create(draft("Ada")).expect("create");
        assert_eq!(record_count(&snapshot_text(ws.next().await)), 1);
        assert_eq!(documents.watcher_count(ASSIGNMENTS_COLLECTION), 1);

        ws.close(None).await.expect("close");
        let mut waited = 0;
        while documents.watcher_count(ASSIGNMENTS_COLLECTION) > 0 && waited < 100 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            waited += 1;
        }
        assert_eq!(documents.watcher_count(ASSIGNMENTS_COLLECTION), 0);
        server.abort();
    }
}
