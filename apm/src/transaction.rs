// SPDX-FileCopyrightText: Copyright © 2025 APM Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Transaction identifiers and background promotion.
//!
//! Every request carries a transaction id; background callers get one
//! generated, receive an accepted envelope immediately and collect the
//! result as a terminal event on the same id.

use std::time::{SystemTime, UNIX_EPOCH};

use futures_util::future::BoxFuture;
use rand::RngCore;

use crate::events::{Events, Phase, TaskName};
use crate::response::{Data, Response};

/// `<monotonic-nanos>-<8-random-bytes-hex>`
pub fn generate_id() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();

    let mut random = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut random);

    format!("{nanos}-{}", hex::encode(random))
}

/// Run the already-prepared operation future in its own task; its outcome
/// is delivered as the single terminal event for `transaction`.
pub fn spawn_background(
    events: Events,
    name: TaskName,
    transaction: String,
    operation: BoxFuture<'static, Result<Response, crate::actions::Error>>,
) -> Response {
    let accepted = Response::accepted(transaction.clone());

    tokio::spawn(async move {
        let view = match operation.await {
            Ok(response) => serde_json::to_string(&response.data).unwrap_or_default(),
            Err(err) => {
                let failure = Response {
                    data: Data::message(err.to_string()),
                    error: true,
                    transaction: Some(transaction.clone()),
                };
                serde_json::to_string(&failure).unwrap_or_default()
            }
        };
        events.notify(name, view, Phase::After, Some(transaction));
    });

    accepted
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn id_shape() {
        let id = generate_id();
        let (nanos, random) = id.split_once('-').unwrap();
        assert!(nanos.chars().all(|c| c.is_ascii_digit()));
        assert_eq!(random.len(), 16);
        assert!(random.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn ids_unique() {
        let a = generate_id();
        let b = generate_id();
        assert_ne!(a, b);
    }
}
