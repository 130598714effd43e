//! WebSocket Event Streaming
//!
//! Delivers control-plane events to connected viewers in real time.
//!
//! ## Architecture
//!
//! - **Broker**: actor owning the session registry; fans events out
//! - **ClientSession**: one viewer's connection, filter and permissions
//! - **Filter**: permission-aware delivery predicate
//! - **Handler**: upgrade, registration and inbound filter updates
//! - **Messages**: server frame format
//!
//! ## Usage
//!
//! Clients connect to `/ws` with `Authorization: Bearer <token>` and send
//! filter updates; every field is optional:
//!
//! ```javascript
//! const ws = new WebSocket('ws://localhost:8081/ws');
//!
//! ws.onopen = () => {
//!   ws.send(JSON.stringify({project_key: 'PROJ', workflow_name: 'build'}));
//! };
//!
//! ws.onmessage = (event) => {
//!   const frame = JSON.parse(event.data); // {status: 'OK', event: {...}}
//!   console.log('Received:', frame);
//! };
//! ```

mod broker;
mod filter;
mod handler;
mod messages;
mod session;

pub use broker::{Broker, BrokerError, BrokerHandle};
pub use filter::{accepts, is_visible, FilterError, SubscriptionFilter};
pub use handler::websocket_handler;
pub use messages::{FrameStatus, ServerFrame};
pub use session::{ClientSession, Connection, Delivery, Liveness, SessionError, SessionId};
