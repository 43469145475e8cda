//! `_tid` synthesis — minting and decoding the v1-UUID revision timestamps
//! that drive index maintenance.

use std::sync::OnceLock;

use rand::RngCore;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::error::{Result, StoreError};

/// A process-wide, randomly chosen 6-byte node id, generated once. Real
/// v1 UUIDs derive this from a MAC address; a random id is sufficient to
/// keep `_tid`s distinct across processes without depending on host
/// networking.
fn node_id() -> &'static [u8; 6] {
    static NODE_ID: OnceLock<[u8; 6]> = OnceLock::new();
    NODE_ID.get_or_init(|| {
        let mut bytes = [0u8; 6];
        rand::thread_rng().fill_bytes(&mut bytes);
        bytes[0] |= 0x01; // multicast bit, matching the "no real MAC" convention
        bytes
    })
}

/// Mint a fresh, monotonically-increasing-enough `_tid`.
pub fn new_tid() -> Uuid {
    let now = uuid::timestamp::Timestamp::now(uuid::NoContext);
    Uuid::new_v1(now, node_id())
}

/// Parse a `_tid` attribute value (stored as its string encoding) back
/// into a `Uuid`.
pub fn parse_tid(value: &JsonValue) -> Result<Uuid> {
    let text = value
        .as_str()
        .ok_or_else(|| StoreError::InvalidQuery("_tid must be a uuid string".to_string()))?;
    Uuid::parse_str(text).map_err(|e| StoreError::InvalidQuery(format!("malformed _tid: {e}")))
}

/// The store-side write timestamp (microseconds since the Unix epoch)
/// carried by a v1 UUID, used as the batch timestamp for idempotent
/// repair writes.
pub fn timestamp_micros(tid: Uuid) -> i64 {
    match tid.get_timestamp() {
        Some(ts) => {
            let (secs, nanos) = ts.to_unix();
            secs as i64 * 1_000_000 + nanos as i64 / 1_000
        }
        None => 0,
    }
}
