//! Binance futures wire types for the depth stream and REST snapshots.
//!
//! These types match the JSON emitted by Binance's API and are deserialized
//! directly from the wire. Prices and quantities stay as the exchange's
//! decimal strings; parsing to `f64` happens level by level at apply time so
//! a single malformed number never discards its whole diff.

use std::time::Duration;

use serde::Deserialize;

/// One incremental depth event from the `{symbol}@depth@{period}ms` stream.
///
/// A diff is contiguous with its predecessor iff `prev_update_id` equals the
/// predecessor's `final_update_id`.
#[derive(Debug, Clone, Deserialize)]
pub struct DepthDiff {
    /// First update ID in event.
    #[serde(rename = "U")]
    pub first_update_id: u64,
    /// Final update ID in event.
    #[serde(rename = "u")]
    pub final_update_id: u64,
    /// Final update ID of the previous event.
    #[serde(rename = "pu", default)]
    pub prev_update_id: u64,
    /// Bid levels as `[price, quantity]` string pairs.
    #[serde(rename = "b", default)]
    pub bids: Vec<[String; 2]>,
    /// Ask levels as `[price, quantity]` string pairs.
    #[serde(rename = "a", default)]
    pub asks: Vec<[String; 2]>,
    /// Time spent between starting the socket read and finishing the decode.
    /// Stamped by the stream, never on the wire.
    #[serde(skip)]
    pub receive_latency: Duration,
}

/// REST response for `/fapi/v1/depth`.
#[derive(Debug, Clone, Deserialize)]
pub struct DepthSnapshot {
    /// Last update ID included in the snapshot.
    #[serde(rename = "lastUpdateId")]
    pub last_update_id: u64,
    /// Bid levels as `[price, quantity]` string pairs.
    pub bids: Vec<[String; 2]>,
    /// Ask levels as `[price, quantity]` string pairs.
    pub asks: Vec<[String; 2]>,
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Sample futures depth diff taken from the Binance API docs.
    const DIFF_JSON: &str = r#"{
        "e": "depthUpdate",
        "E": 1706000000000,
        "T": 1706000000000,
        "s": "BTCUSDT",
        "U": 157,
        "u": 160,
        "pu": 149,
        "b": [
            ["50000.50", "1.500"],
            ["49999.00", "0.200"]
        ],
        "a": [
            ["50001.00", "0.800"]
        ]
    }"#;

    /// Sample REST depth snapshot.
    const SNAPSHOT_JSON: &str = r#"{
        "lastUpdateId": 1027024,
        "E": 1589436922972,
        "T": 1589436922959,
        "bids": [
            ["4.00000000", "431.00000000"]
        ],
        "asks": [
            ["4.00000200", "12.00000000"]
        ]
    }"#;

    #[test]
    fn test_deserialize_depth_diff() {
        let diff: DepthDiff = serde_json::from_str(DIFF_JSON).expect("deserialize diff");

        assert_eq!(diff.first_update_id, 157);
        assert_eq!(diff.final_update_id, 160);
        assert_eq!(diff.prev_update_id, 149);
        assert_eq!(diff.bids.len(), 2);
        assert_eq!(diff.asks.len(), 1);
        assert_eq!(diff.bids[0][0], "50000.50");
        assert_eq!(diff.bids[0][1], "1.500");
        assert_eq!(diff.receive_latency, Duration::ZERO);
    }

    #[test]
    fn test_deserialize_snapshot() {
        let snap: DepthSnapshot =
            serde_json::from_str(SNAPSHOT_JSON).expect("deserialize snapshot");

        assert_eq!(snap.last_update_id, 1027024);
        assert_eq!(snap.bids.len(), 1);
        assert_eq!(snap.asks.len(), 1);
        assert_eq!(snap.bids[0][0], "4.00000000");
        assert_eq!(snap.asks[0][1], "12.00000000");
    }

    #[test]
    fn test_missing_sides_default_to_empty() {
        // A frame with no level arrays still decodes; the manager decides
        // what to do with empty sides.
        let json = r#"{"U": 1, "u": 2, "pu": 0}"#;
        let diff: DepthDiff = serde_json::from_str(json).expect("deserialize minimal diff");
        assert!(diff.bids.is_empty());
        assert!(diff.asks.is_empty());
    }

    #[test]
    fn test_non_diff_frame_rejected() {
        // Subscription confirmations lack the update id fields entirely.
        let json = r#"{"result": null, "id": 1}"#;
        assert!(serde_json::from_str::<DepthDiff>(json).is_err());
    }
}
