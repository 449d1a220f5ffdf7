//! Client-side runtime for streaming downlinks to remote lanes.
//!
//! A downlink mirrors the state of a remote lane and relays every change to
//! local observers. The pieces:
//!
//! - **[`LinkModel`]**: one per remote lane. Runs the link/sync/unlink
//!   handshake as a lock-free state machine over an atomic status word and
//!   performs demand-driven flow control with the transport in both
//!   directions (`feed_up`/`pull_up`, `feed_down`/`pull_down`).
//!
//! - **[`DownlinkView`]**: the caller's handle. Many views share one link
//!   through the [`DownlinkHost`] registry; each has its own observers,
//!   keep-linked/keep-synced flags and optional [`Stage`].
//!
//! - **[`Dispatcher`]**: delivers one event through a multi-phase
//!   [`Relay`] across every view. Preemptive observers run inline; deferred
//!   observers run on their view's stage, and dispatch suspends and resumes
//!   there when it has to hop.
//!
//! - **Kinds** ([`kind`]): value, list, map and event downlinks, each with its
//!   own observer trait and typed mirror published through [`StateStream`]s.
//!
//! - **Reconciliation** ([`reconcile`]): bound inputs drive local writes and
//!   bound outputs are told when to drop and re-read their view of the state.

pub mod config;
pub mod error;
pub mod fanout;
pub mod host;
pub mod kind;
pub mod link;
pub mod model;
pub mod observer;
pub mod reconcile;
pub mod relay;
pub mod stage;
pub mod state;
pub mod view;

// ── Primary re-exports ──────────────────────────────────────────────
pub use config::DownlinkConfig;
pub use error::{DownlinkError, ObserverError, ObserverResult};
pub use fanout::Fanout;
pub use host::{DownlinkHost, Transport};
pub use kind::{
    DownlinkKind, DownlinkType, EventKind, EventObserver, ListChange, ListEntry, ListKind,
    ListObserver, MapChange, MapEntry, MapKind, MapObserver, Received, ValueKind, ValueObserver,
};
pub use link::{CommandAck, LinkBinding, LinkContext, LinkModel, LinkStatus, UpFrame};
pub use model::{Envelope, LinkAddress, LinkKey, ListOp, MapOp};
pub use observer::{Dispatch, LinkObserver, ObserverSet};
pub use reconcile::{KeyEffect, KeyedInput, Output, ValueInput};
pub use relay::{DispatchOutcome, Dispatcher, LinkEvent, Relay};
pub use stage::{QueueStage, Stage, Task, TaskStage};
pub use state::{Snapshot, StateStream};
pub use view::DownlinkView;

pub type ValueDownlink = DownlinkView<ValueKind>;
pub type ListDownlink = DownlinkView<ListKind>;
pub type MapDownlink = DownlinkView<MapKind>;
pub type EventDownlink = DownlinkView<EventKind>;
