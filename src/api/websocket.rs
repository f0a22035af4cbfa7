//! WebSocket connection task.
//!
//! One task per connection. Its `select!` loop serialises the client's
//! inbound frames, the connection's outbound queue and the debounce deadline,
//! so a session is only ever touched from here.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tracing::{debug, warn};

use crate::core::app_state::AppState;
use crate::relay::debounce;
use crate::relay::session::Session;

/// Drive one upgraded socket until either side closes it
pub async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut session, mut outbound) = Session::open(&state);
    let (mut ws_tx, mut ws_rx) = socket.split();

    loop {
        let deadline = session.deadline();

        tokio::select! {
            Some(frame) = outbound.recv() => {
                if let Err(e) = ws_tx.send(Message::Text(frame.to_string())).await {
                    session.transport_error(&e);
                    break;
                }
            }

            _ = debounce::wait_for(deadline) => {
                if let Err(e) = session.flush_due() {
                    warn!(conn_id = %session.id(), error = %e, "broadcast failed");
                }
            }

            incoming = ws_rx.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => session.handle_frame(&text),
                    Some(Ok(Message::Binary(_))) => {
                        debug!(conn_id = %session.id(), "binary frame ignored");
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        session.transport_error(&e);
                        break;
                    }
                }
            }
        }
    }

    session.close();
}
