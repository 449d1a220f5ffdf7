// ── Tagged event bodies ──
//
// Inbound and outbound bodies for list and map lanes. The outer tag selects
// the operation; `clear` is a bare string. Value lanes need no wrapper: the
// body is the new value.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::DownlinkError;

/// One list lane operation.
///
/// Entries are addressed by index, optionally disambiguated by key so a
/// concurrent reordering on the remote side still resolves to the entry the
/// sender meant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListOp {
    Update {
        index: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        key: Option<String>,
        value: Value,
    },
    Move {
        from: usize,
        to: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        key: Option<String>,
    },
    Remove {
        index: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        key: Option<String>,
    },
    Drop {
        lower: usize,
    },
    Take {
        upper: usize,
    },
    Clear,
}

/// One map lane operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MapOp {
    Update { key: Value, value: Value },
    Remove { key: Value },
    Drop { lower: usize },
    Take { upper: usize },
    Clear,
}

impl ListOp {
    pub fn decode(body: Value) -> Result<Self, DownlinkError> {
        serde_json::from_value(body).map_err(|e| DownlinkError::decode("list", &e))
    }

    pub fn tag(&self) -> &'static str {
        match self {
            Self::Update { .. } => "update",
            Self::Move { .. } => "move",
            Self::Remove { .. } => "remove",
            Self::Drop { .. } => "drop",
            Self::Take { .. } => "take",
            Self::Clear => "clear",
        }
    }
}

impl MapOp {
    pub fn decode(body: Value) -> Result<Self, DownlinkError> {
        serde_json::from_value(body).map_err(|e| DownlinkError::decode("map", &e))
    }

    pub fn tag(&self) -> &'static str {
        match self {
            Self::Update { .. } => "update",
            Self::Remove { .. } => "remove",
            Self::Drop { .. } => "drop",
            Self::Take { .. } => "take",
            Self::Clear => "clear",
        }
    }
}

/// Encode an op for the command path. Serializing these enums cannot fail
/// (string keys, JSON values only), so a failure degrades to `null`.
pub(crate) fn encode<T: Serialize>(op: &T) -> Value {
    serde_json::to_value(op).unwrap_or_default()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn list_update_decodes_with_optional_key() {
        let op = ListOp::decode(json!({"update": {"index": 0, "value": "x"}})).unwrap();
        assert_eq!(
            op,
            ListOp::Update {
                index: 0,
                key: None,
                value: json!("x")
            }
        );

        let op = ListOp::decode(json!({"move": {"from": 0, "to": 2, "key": "k1"}})).unwrap();
        assert_eq!(op.tag(), "move");
    }

    #[test]
    fn clear_is_a_bare_tag() {
        assert_eq!(ListOp::decode(json!("clear")).unwrap(), ListOp::Clear);
        assert_eq!(MapOp::decode(json!("clear")).unwrap(), MapOp::Clear);
        assert_eq!(encode(&MapOp::Clear), json!("clear"));
    }

    #[test]
    fn map_ops_key_by_payload_value() {
        let op = MapOp::decode(json!({"update": {"key": {"id": 7}, "value": 1}})).unwrap();
        assert_eq!(
            op,
            MapOp::Update {
                key: json!({"id": 7}),
                value: json!(1)
            }
        );
    }

    #[test]
    fn unknown_tag_is_a_decode_error() {
        let err = MapOp::decode(json!({"upsert": {}})).unwrap_err();
        assert!(matches!(err, DownlinkError::Decode { ref operation, .. } if operation == "map"));
    }
}
