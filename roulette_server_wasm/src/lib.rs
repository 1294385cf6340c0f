//! WASI-compatible signaling relay for one-to-one video chat
//!
//! Anonymous clients connect, ask to be paired, and the relay matches them
//! first come, first served. Once paired, the two clients exchange WebRTC
//! negotiation payloads and chat text through the relay; media then flows
//! peer-to-peer. Payloads are forwarded verbatim and never inspected.
//!
//! # Protocol
//!
//! The relay speaks HTTP long-polling:
//!
//! - **GET /poll?peer_id={id}** - Connect (no/unknown id) or poll for events
//! - **POST /message** - Send a request (X-Peer-Id header required)
//! - **POST /disconnect** - Close the connection (X-Peer-Id header required)
//! - **GET /online** - Number of connected peers
//! - **GET /health** - Health check
//!
//! ## Events (server → client)
//!
//! - `{"IdAssigned": "<uuid>"}` - Your connection ID
//! - `{"Ready": null}` - You are waiting for a partner
//! - `{"Ready": "<uuid>"}` - You are paired; the smaller ID sends the offer
//! - `"PartnerLeft"` / `"PartnerDisconnected"` - The session ended
//! - `{"Signal": {"sender": "<uuid>", "data": ...}}` - Negotiation payload
//! - `{"Chat": {"message": "..."}}` - Chat text
//! - `{"OnlineCount": 3}` - Sent to everyone whenever a peer connects or leaves
//!
//! ## Requests (client → server)
//!
//! - `"Join"`, `"Leave"`, `"KeepAlive"`
//! - `{"Signal": {"target": "<uuid>", "data": ...}}` (`target` optional)
//! - `{"Chat": {"target": "<uuid>", "message": "..."}}` (`target` optional)
//!
//! # Example
//!
//! ```bash
//! wasmtime serve -S common --addr 127.0.0.1:3536 roulette-signaling-wasm.wasm
//!
//! curl http://127.0.0.1:3536/poll
//! curl -X POST -H "X-Peer-Id: <your-id>" -d '"Join"' http://127.0.0.1:3536/message
//! curl "http://127.0.0.1:3536/poll?peer_id=<your-id>"
//! ```

#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod handler;
pub mod matchmaker;
pub mod protocol;
pub mod registry;
pub mod state;

pub use config::RelayConfig;
pub use error::{ClientRequestError, SignalingError};
pub use handler::handle_request;
pub use matchmaker::{Inbound, Matchmaker};
pub use protocol::{ClientRequest, ConnectionId, Envelope, Recipient, ServerEvent};
pub use registry::Registry;
pub use state::ServerState;
