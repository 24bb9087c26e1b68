// SPDX-FileCopyrightText: Copyright © 2025 APM Developers
//
// SPDX-License-Identifier: MPL-2.0

//! WebSocket event stream.
//!
//! The socket is write-mostly: frames flow from the event plane to the
//! client; the read side only refreshes liveness and detects disconnect.

use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use log::debug;
use tokio::time::{interval, timeout, Instant};

use crate::events::Hub;

const PING_INTERVAL: Duration = Duration::from_secs(54);
const WRITE_DEADLINE: Duration = Duration::from_secs(10);
const READ_DEADLINE: Duration = Duration::from_secs(60);

/// Drive one connected client until it disconnects or stalls
pub async fn client_loop(socket: WebSocket, hub: Hub) {
    let (id, mut outbound) = hub.register();
    let (mut sink, mut stream) = socket.split();

    let mut ping = interval(PING_INTERVAL);
    ping.tick().await; // immediate first tick
    let mut last_read = Instant::now();

    loop {
        tokio::select! {
            frame = outbound.recv() => {
                let Some(frame) = frame else { break };
                let write = timeout(WRITE_DEADLINE, sink.send(Message::Text(frame.into())));
                if write.await.map(|result| result.is_err()).unwrap_or(true) {
                    debug!("websocket client {id} write stalled");
                    break;
                }
            }
            _ = ping.tick() => {
                if last_read.elapsed() > READ_DEADLINE {
                    debug!("websocket client {id} read deadline exceeded");
                    break;
                }
                let write = timeout(WRITE_DEADLINE, sink.send(Message::Ping(vec![].into())));
                if write.await.map(|result| result.is_err()).unwrap_or(true) {
                    break;
                }
            }
            message = stream.next() => {
                match message {
                    // pong and any client chatter refresh the deadline
                    Some(Ok(_)) => last_read = Instant::now(),
                    _ => break,
                }
            }
        }
    }

    hub.unregister(id);
}
