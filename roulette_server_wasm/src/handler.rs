//! HTTP long-polling handlers for the signaling relay
//!
//! Each route maps onto one inbound event: polling without a known id
//! connects, `POST /message` carries client requests, and `POST /disconnect`
//! ends the connection.

use crate::error::{ClientRequestError, SignalingError};
use crate::protocol::{ClientRequest, ConnectionId};
use crate::state::ServerState;
use std::str::FromStr;
use tracing::{debug, warn};
use wstd::http::{Body, Method, Request, Response};

const USAGE: &str = "Roulette WASI Signaling Relay (Long-Polling)\n\
     \n\
     Endpoints:\n\
     - GET /health - Health check\n\
     - GET /online - Number of connected peers\n\
     - GET /poll?peer_id={id} - Connect, or poll for events\n\
     - POST /message - Send Join, Leave, Signal, Chat or KeepAlive (X-Peer-Id header required)\n\
     - POST /disconnect - Close the connection (X-Peer-Id header required)\n\
     \n\
     Protocol:\n\
     1. GET /poll to connect and get peer_id + initial events\n\
     2. POST \"Join\" to /message and poll until Ready carries a partner\n\
     3. Relay negotiation with {\"Signal\":{\"data\":...}} and chat with {\"Chat\":{\"message\":\"...\"}}\n\
     \n\
     Response format: {\"peer_id\": \"uuid\", \"events\": [...]}\n";

/// Build a response with the CORS header every route carries
fn respond(status: u16, content_type: &str, body: Body) -> Result<Response<Body>, wstd::http::Error> {
    Ok(Response::builder()
        .status(status)
        .header("content-type", content_type)
        .header("access-control-allow-origin", "*")
        .body(body)
        .unwrap())
}

fn text(status: u16, body: impl Into<String>) -> Result<Response<Body>, wstd::http::Error> {
    respond(status, "text/plain", Body::from(body.into()))
}

fn json(status: u16, value: serde_json::Value) -> Result<Response<Body>, wstd::http::Error> {
    respond(status, "application/json", Body::from(value.to_string()))
}

/// Map a state failure onto a status code
fn state_error(e: SignalingError) -> Result<Response<Body>, wstd::http::Error> {
    match e {
        SignalingError::UnknownPeer => text(404, "Peer not found"),
        SignalingError::StateLocked => text(503, e.to_string()),
        e => {
            warn!("state error: {e}");
            text(500, e.to_string())
        }
    }
}

/// Get query parameter from URI
fn get_query_param<'a>(query: Option<&'a str>, key: &str) -> Option<&'a str> {
    query?.split('&').find_map(|pair| {
        let mut parts = pair.splitn(2, '=');
        let k = parts.next()?;
        let v = parts.next()?;
        if k == key { Some(v) } else { None }
    })
}

/// Parse the sender id carried in the `X-Peer-Id` header
fn parse_peer_id(raw: Option<&str>) -> Result<ConnectionId, ClientRequestError> {
    raw.and_then(|s| ConnectionId::from_str(s.trim()).ok())
        .ok_or(ClientRequestError::MissingPeerId)
}

fn sender_id(request: &Request<Body>) -> Result<ConnectionId, ClientRequestError> {
    parse_peer_id(
        request
            .headers()
            .get("x-peer-id")
            .and_then(|v| v.to_str().ok()),
    )
}

/// Connect or poll - returns peer ID and any pending events
fn handle_poll(
    peer_id: Option<ConnectionId>,
    state: &ServerState,
) -> Result<Response<Body>, wstd::http::Error> {
    let (peer_id, events) = match state.connect_or_poll(peer_id) {
        Ok(polled) => polled,
        Err(e) => return state_error(e),
    };

    json(
        200,
        serde_json::json!({
            "peer_id": peer_id.to_string(),
            "events": events,
        }),
    )
}

/// Handle a client request POST
async fn handle_message(
    request: Request<Body>,
    state: &ServerState,
) -> Result<Response<Body>, wstd::http::Error> {
    let sender = match sender_id(&request) {
        Ok(id) => id,
        Err(e) => return text(400, e.to_string()),
    };

    let mut body = request.into_body();
    let body_str = match body.str_contents().await {
        Ok(s) => s.to_string(),
        Err(e) => return text(400, format!("Failed to read body: {:?}", e)),
    };

    let client_request = match ClientRequest::from_str(&body_str) {
        Ok(req) => req,
        Err(e) => {
            let e = ClientRequestError::from(e);
            warn!(%sender, "rejected request: {e}");
            return text(400, format!("Invalid request: {e}"));
        }
    };

    debug!(%sender, ?client_request, "client request");
    match state.submit(sender, client_request) {
        Ok(()) => text(200, "OK"),
        Err(e) => state_error(e),
    }
}

/// Handle a disconnect POST
fn handle_disconnect(
    request: &Request<Body>,
    state: &ServerState,
) -> Result<Response<Body>, wstd::http::Error> {
    match sender_id(request) {
        Ok(id) => match state.disconnect(id) {
            Ok(()) => text(200, "OK"),
            Err(e) => state_error(e),
        },
        Err(e) => text(400, e.to_string()),
    }
}

/// Handle CORS preflight
fn handle_cors_preflight() -> Result<Response<Body>, wstd::http::Error> {
    Ok(Response::builder()
        .status(204)
        .header("access-control-allow-origin", "*")
        .header("access-control-allow-methods", "GET, POST, OPTIONS")
        .header("access-control-allow-headers", "content-type, x-peer-id")
        .header("access-control-max-age", "86400")
        .body(Body::empty())
        .unwrap())
}

/// Handle an HTTP request - main router
pub async fn handle_request(
    request: Request<Body>,
    state: &ServerState,
) -> Result<Response<Body>, wstd::http::Error> {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let path = uri.path();

    if method == Method::OPTIONS {
        return handle_cors_preflight();
    }

    match (&method, path) {
        (&Method::GET, "/health") => text(200, "OK"),
        (&Method::GET, "/online") => match state.online_count() {
            Ok(online) => json(200, serde_json::json!({ "online": online })),
            Err(e) => state_error(e),
        },
        (&Method::GET, "/poll") => {
            // An absent or malformed id connects a new peer
            let peer_id = get_query_param(uri.query(), "peer_id")
                .and_then(|s| ConnectionId::from_str(s).ok());
            handle_poll(peer_id, state)
        }
        (&Method::POST, "/message") => handle_message(request, state).await,
        (&Method::POST, "/disconnect") => handle_disconnect(&request, state),
        (&Method::GET, "/") => text(200, USAGE),
        _ => text(404, "Not Found"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RelayConfig;
    use serde_json::{Value, json};

    struct Reply {
        status: u16,
        allow_origin: Option<String>,
        body: String,
    }

    async fn send(
        state: &ServerState,
        method: Method,
        uri: &str,
        peer_id: Option<&str>,
        body: &str,
    ) -> Reply {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(peer_id) = peer_id {
            builder = builder.header("x-peer-id", peer_id);
        }
        let request = builder.body(Body::from(body.to_string())).unwrap();

        let response = handle_request(request, state).await.unwrap();
        let status = response.status().as_u16();
        let allow_origin = response
            .headers()
            .get("access-control-allow-origin")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let mut body = response.into_body();
        let body = body.str_contents().await.unwrap().to_string();
        Reply {
            status,
            allow_origin,
            body,
        }
    }

    async fn connect(state: &ServerState) -> String {
        let reply = send(state, Method::GET, "/poll", None, "").await;
        let body: Value = serde_json::from_str(&reply.body).unwrap();
        body["peer_id"].as_str().unwrap().to_string()
    }

    fn memory_state() -> ServerState {
        ServerState::new(&RelayConfig::in_memory())
    }

    #[tokio::test]
    async fn preflight_and_cors_headers() {
        let state = memory_state();

        let reply = send(&state, Method::OPTIONS, "/message", None, "").await;
        assert_eq!(reply.status, 204);
        assert_eq!(reply.allow_origin.as_deref(), Some("*"));

        for uri in ["/health", "/online", "/poll", "/", "/nowhere"] {
            let reply = send(&state, Method::GET, uri, None, "").await;
            assert_eq!(reply.allow_origin.as_deref(), Some("*"), "{uri}");
        }
        assert_eq!(send(&state, Method::GET, "/nowhere", None, "").await.status, 404);
        assert_eq!(send(&state, Method::GET, "/health", None, "").await.body, "OK");
    }

    #[tokio::test]
    async fn poll_connects_then_drains() {
        let state = memory_state();

        let reply = send(&state, Method::GET, "/poll", None, "").await;
        assert_eq!(reply.status, 200);
        let body: Value = serde_json::from_str(&reply.body).unwrap();
        let peer_id = body["peer_id"].as_str().unwrap();
        assert_eq!(
            body["events"],
            json!([{ "IdAssigned": peer_id }, { "OnlineCount": 1 }])
        );

        let uri = format!("/poll?peer_id={peer_id}");
        let reply = send(&state, Method::GET, &uri, None, "").await;
        let body: Value = serde_json::from_str(&reply.body).unwrap();
        assert_eq!(body, json!({ "peer_id": peer_id, "events": [] }));

        let reply = send(&state, Method::GET, "/online", None, "").await;
        assert_eq!(reply.status, 200);
        assert_eq!(serde_json::from_str::<Value>(&reply.body).unwrap(), json!({ "online": 1 }));
    }

    #[tokio::test]
    async fn message_status_codes() {
        let state = memory_state();
        let peer_id = connect(&state).await;

        let missing = send(&state, Method::POST, "/message", None, "\"Join\"").await;
        assert_eq!(missing.status, 400);
        let malformed = send(&state, Method::POST, "/message", Some("nobody"), "\"Join\"").await;
        assert_eq!(malformed.status, 400);

        let bad_body = send(&state, Method::POST, "/message", Some(&peer_id), "{ nope").await;
        assert_eq!(bad_body.status, 400);

        let stranger = ConnectionId::new().to_string();
        let unknown = send(&state, Method::POST, "/message", Some(&stranger), "\"Join\"").await;
        assert_eq!(unknown.status, 404);

        // no partner yet, so the chat is dropped but still accepted
        let chat = r#"{"Chat":{"message":"anyone?"}}"#;
        let dropped = send(&state, Method::POST, "/message", Some(&peer_id), chat).await;
        assert_eq!(dropped.status, 200);

        let join = send(&state, Method::POST, "/message", Some(&peer_id), "\"Join\"").await;
        assert_eq!(join.status, 200);
        assert_eq!(join.allow_origin.as_deref(), Some("*"));
    }

    #[tokio::test]
    async fn disconnect_is_idempotent_over_http() {
        let state = memory_state();
        let peer_id = connect(&state).await;

        for _ in 0..2 {
            let reply = send(&state, Method::POST, "/disconnect", Some(&peer_id), "").await;
            assert_eq!(reply.status, 200);
        }
        assert_eq!(send(&state, Method::POST, "/disconnect", None, "").await.status, 400);

        let reply = send(&state, Method::GET, "/online", None, "").await;
        assert_eq!(serde_json::from_str::<Value>(&reply.body).unwrap(), json!({ "online": 0 }));
    }

    #[tokio::test]
    async fn paired_peers_exchange_signals() {
        let state = memory_state();
        let a = connect(&state).await;
        let b = connect(&state).await;
        for peer in [&a, &b] {
            send(&state, Method::POST, "/message", Some(peer), "\"Join\"").await;
        }

        let offer = r#"{"Signal":{"data":{"type":"offer"}}}"#;
        assert_eq!(send(&state, Method::POST, "/message", Some(&a), offer).await.status, 200);

        let reply = send(&state, Method::GET, &format!("/poll?peer_id={b}"), None, "").await;
        let body: Value = serde_json::from_str(&reply.body).unwrap();
        assert_eq!(
            body["events"],
            json!([
                { "Ready": a },
                { "Signal": { "sender": a, "data": { "type": "offer" } } },
            ])
        );
    }

    #[test]
    fn finds_query_params() {
        let query = Some("lang=en&peer_id=abc&flag");
        assert_eq!(get_query_param(query, "peer_id"), Some("abc"));
        assert_eq!(get_query_param(query, "lang"), Some("en"));
        assert_eq!(get_query_param(query, "flag"), None);
        assert_eq!(get_query_param(None, "peer_id"), None);
    }

    #[test]
    fn peer_id_header_must_be_a_uuid() {
        let id = ConnectionId::new();
        assert_eq!(parse_peer_id(Some(&id.to_string())).unwrap(), id);
        assert_eq!(parse_peer_id(Some(&format!(" {id} "))).unwrap(), id);
        assert!(matches!(
            parse_peer_id(Some("nobody")),
            Err(ClientRequestError::MissingPeerId)
        ));
        assert!(matches!(
            parse_peer_id(None),
            Err(ClientRequestError::MissingPeerId)
        ));
    }
}
