// ── Protocol envelopes ──
//
// Typed link-protocol messages exchanged with the transport. Encoding is the
// transport's concern; these only carry the fields the link state machine
// reads or writes.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::{Display, IntoStaticStr};

use super::address::LinkAddress;

/// Header of a Link/Sync request or a Linked response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkHeader {
    pub node: String,
    pub lane: String,
    #[serde(default)]
    pub prio: f32,
    #[serde(default)]
    pub rate: f32,
    #[serde(default)]
    pub body: Value,
}

/// Header shared by every other envelope kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaneHeader {
    pub node: String,
    pub lane: String,
    #[serde(default)]
    pub body: Value,
}

/// A link-protocol message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Display, IntoStaticStr)]
#[serde(tag = "kind", rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Envelope {
    // ── Outbound control ─────────────────────────────────────────────
    LinkRequest(LinkHeader),
    SyncRequest(LinkHeader),
    UnlinkRequest(LaneHeader),

    // ── Inbound control ──────────────────────────────────────────────
    Linked(LinkHeader),
    Synced(LaneHeader),
    Unlinked(LaneHeader),

    // ── Data ─────────────────────────────────────────────────────────
    Event(LaneHeader),
    Command(LaneHeader),
}

impl Envelope {
    pub fn link_request(address: &LinkAddress) -> Self {
        Self::LinkRequest(LinkHeader::from_address(address))
    }

    pub fn sync_request(address: &LinkAddress) -> Self {
        Self::SyncRequest(LinkHeader::from_address(address))
    }

    pub fn unlink_request(address: &LinkAddress) -> Self {
        Self::UnlinkRequest(LaneHeader::new(address, Value::Null))
    }

    pub fn command(address: &LinkAddress, body: Value) -> Self {
        Self::Command(LaneHeader::new(address, body))
    }

    pub fn event(address: &LinkAddress, body: Value) -> Self {
        Self::Event(LaneHeader::new(address, body))
    }

    pub fn linked(address: &LinkAddress) -> Self {
        Self::Linked(LinkHeader::from_address(address))
    }

    pub fn synced(address: &LinkAddress) -> Self {
        Self::Synced(LaneHeader::new(address, Value::Null))
    }

    pub fn unlinked(address: &LinkAddress) -> Self {
        Self::Unlinked(LaneHeader::new(address, Value::Null))
    }

    pub fn node(&self) -> &str {
        match self {
            Self::LinkRequest(h) | Self::SyncRequest(h) | Self::Linked(h) => &h.node,
            Self::UnlinkRequest(h)
            | Self::Synced(h)
            | Self::Unlinked(h)
            | Self::Event(h)
            | Self::Command(h) => &h.node,
        }
    }

    pub fn lane(&self) -> &str {
        match self {
            Self::LinkRequest(h) | Self::SyncRequest(h) | Self::Linked(h) => &h.lane,
            Self::UnlinkRequest(h)
            | Self::Synced(h)
            | Self::Unlinked(h)
            | Self::Event(h)
            | Self::Command(h) => &h.lane,
        }
    }

    pub fn body(&self) -> &Value {
        match self {
            Self::LinkRequest(h) | Self::SyncRequest(h) | Self::Linked(h) => &h.body,
            Self::UnlinkRequest(h)
            | Self::Synced(h)
            | Self::Unlinked(h)
            | Self::Event(h)
            | Self::Command(h) => &h.body,
        }
    }
}

impl LinkHeader {
    pub fn from_address(address: &LinkAddress) -> Self {
        Self {
            node: address.node.clone(),
            lane: address.lane.clone(),
            prio: address.prio,
            rate: address.rate,
            body: address.body.clone(),
        }
    }
}

impl LaneHeader {
    pub fn new(address: &LinkAddress, body: Value) -> Self {
        Self {
            node: address.node.clone(),
            lane: address.lane.clone(),
            body,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn link_request_carries_address_parameters() {
        let addr = LinkAddress::new("/house", "lights")
            .with_prio(2.0)
            .with_rate(10.0)
            .with_body(json!({"since": 5}));
        let Envelope::LinkRequest(header) = Envelope::link_request(&addr) else {
            panic!("expected link request");
        };
        assert_eq!(header.node, "/house");
        assert_eq!(header.lane, "lights");
        assert!((header.prio - 2.0).abs() < f32::EPSILON);
        assert!((header.rate - 10.0).abs() < f32::EPSILON);
        assert_eq!(header.body, json!({"since": 5}));
    }

    #[test]
    fn kind_names_are_snake_case() {
        let addr = LinkAddress::new("/house", "lights");
        assert_eq!(Envelope::unlink_request(&addr).to_string(), "unlink_request");
        let name: &'static str = (&Envelope::command(&addr, json!(1))).into();
        assert_eq!(name, "command");
    }

    #[test]
    fn accessors_cover_every_header() {
        let addr = LinkAddress::new("/house", "lights");
        let event = Envelope::event(&addr, json!("on"));
        assert_eq!(event.node(), "/house");
        assert_eq!(event.lane(), "lights");
        assert_eq!(event.body(), &json!("on"));
    }
}
