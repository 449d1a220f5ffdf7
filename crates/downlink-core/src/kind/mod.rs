// ── Downlink kinds ──
//
// A kind fixes the observer capability set, the typed state held by the link
// model, and how an inbound event body is decoded and relayed.

pub mod event;
pub mod list;
pub mod map;
pub mod value;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::{Display, EnumString};

use crate::error::{DownlinkError, ObserverError};
use crate::link::LinkModel;
use crate::observer::LinkObserver;
use crate::relay::DispatchOutcome;

pub use event::{EventKind, EventObserver};
pub use list::{ListChange, ListEntry, ListKind, ListObserver, ListState};
pub use map::{MapChange, MapEntries, MapEntry, MapKind, MapObserver, MapState};
pub use value::{ValueKind, ValueObserver, ValueState};

/// Runtime tag of a downlink kind, checked when a view binds to an existing
/// link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DownlinkType {
    Value,
    List,
    Map,
    Event,
}

/// A decoded operation together with the body it was decoded from, which
/// `will_receive`/`did_receive` observers see untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct Received<T> {
    pub body: Value,
    pub op: T,
}

/// Static description of a downlink kind.
pub trait DownlinkKind: Sized + Send + Sync + 'static {
    type Observer: ?Sized + LinkObserver + 'static;
    type State: Send + Sync + 'static;
    type Event: Send + 'static;

    const TYPE: DownlinkType;

    fn new_state() -> Self::State;

    fn decode(body: Value) -> Result<Self::Event, DownlinkError>;

    /// Relay a decoded inbound event. The relay must cue the link down once
    /// it completes or aborts.
    fn dispatch_event(
        link: &Arc<LinkModel<Self>>,
        event: Self::Event,
    ) -> Result<DispatchOutcome, ObserverError>;
}
