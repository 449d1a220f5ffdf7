// ── Link addressing ──
//
// A LinkAddress names one remote lane and carries the link parameters sent
// with every Link/Sync request. It is fixed at construction.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

// ── LinkAddress ─────────────────────────────────────────────────────

/// Immutable address of a downlink: where the lane lives plus the request
/// parameters (priority, rate, initial body).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkAddress {
    /// Mesh the host belongs to, if the host participates in one.
    #[serde(default)]
    pub mesh: Option<String>,
    /// Host endpoint (e.g. `warp://localhost:9001`).
    #[serde(default)]
    pub host: Option<Url>,
    /// Node URI on the host.
    pub node: String,
    /// Lane URI on the node.
    pub lane: String,
    #[serde(default)]
    pub prio: f32,
    #[serde(default)]
    pub rate: f32,
    /// Opaque body sent with the initial Link/Sync request.
    #[serde(default)]
    pub body: Value,
}

impl LinkAddress {
    pub fn new(node: impl Into<String>, lane: impl Into<String>) -> Self {
        Self {
            mesh: None,
            host: None,
            node: node.into(),
            lane: lane.into(),
            prio: 0.0,
            rate: 0.0,
            body: Value::Null,
        }
    }

    pub fn with_host(mut self, host: Url) -> Self {
        self.host = Some(host);
        self
    }

    pub fn with_mesh(mut self, mesh: impl Into<String>) -> Self {
        self.mesh = Some(mesh.into());
        self
    }

    pub fn with_prio(mut self, prio: f32) -> Self {
        self.prio = prio;
        self
    }

    pub fn with_rate(mut self, rate: f32) -> Self {
        self.rate = rate;
        self
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = body;
        self
    }

    /// Identity used to share one link between views. Request parameters are
    /// not part of it: views that differ only in prio/rate share the link
    /// opened by whichever bound first.
    pub fn key(&self) -> LinkKey {
        LinkKey {
            mesh: self.mesh.clone(),
            host: self.host.as_ref().map(Url::to_string),
            node: self.node.clone(),
            lane: self.lane.clone(),
        }
    }
}

impl fmt::Display for LinkAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ref host) = self.host {
            write!(f, "{host} ")?;
        }
        write!(f, "{}#{}", self.node, self.lane)
    }
}

// ── LinkKey ─────────────────────────────────────────────────────────

/// Hashable `(mesh, host, node, lane)` tuple identifying a shared link.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LinkKey {
    pub mesh: Option<String>,
    pub host: Option<String>,
    pub node: String,
    pub lane: String,
}
