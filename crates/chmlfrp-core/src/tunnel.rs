//! Tunnel identifiers and groups.
//!
//! Tunnels are owned by the remote ChmlFrp API; the supervisor only uses
//! their identifiers as registry keys and to build the frpc command line.

use crate::config::FrpcConfig;
use crate::error::{Result, TunnelError};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Stable identifier of a tunnel, as assigned by the remote API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TunnelId(pub u64);

impl fmt::Display for TunnelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for TunnelId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// A tunnel record as returned by the remote API.
///
/// Only the fields the supervisor needs are kept; everything else in the
/// API payload is ignored on deserialization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tunnel {
    pub id: TunnelId,
    #[serde(default)]
    pub name: String,
}

impl Tunnel {
    pub fn new(id: impl Into<TunnelId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }

    /// Decode a bare JSON array of tunnel records. Callers holding a full
    /// API response pass its `data` array.
    pub fn list_from_json(json: &str) -> Result<Vec<Tunnel>> {
        Ok(serde_json::from_str(json)?)
    }
}

/// One or more tunnels served by a single frpc process.
///
/// Never empty. Ids keep the caller's order with duplicates dropped; the
/// order only shows up in the command line and in logs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelGroup {
    ids: Vec<TunnelId>,
}

impl TunnelGroup {
    /// Build a group from tunnel ids.
    ///
    /// # Errors
    /// Returns [`TunnelError::EmptyGroup`] if `ids` yields nothing.
    pub fn new(ids: impl IntoIterator<Item = TunnelId>) -> Result<Self> {
        let mut seen = HashSet::new();
        let ids: Vec<TunnelId> = ids.into_iter().filter(|id| seen.insert(*id)).collect();
        if ids.is_empty() {
            return Err(TunnelError::EmptyGroup);
        }
        Ok(Self { ids })
    }

    /// Build a group from tunnel records.
    pub fn from_tunnels<'a>(tunnels: impl IntoIterator<Item = &'a Tunnel>) -> Result<Self> {
        Self::new(tunnels.into_iter().map(|t| t.id))
    }

    pub fn ids(&self) -> &[TunnelId] {
        &self.ids
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Always false; kept for API symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn contains(&self, id: TunnelId) -> bool {
        self.ids.contains(&id)
    }

    /// Comma-joined id list, as frpc's `-p` flag expects it.
    pub fn joined(&self) -> String {
        self.joined_with(FrpcConfig::ID_SEPARATOR)
    }

    pub(crate) fn joined_with(&self, separator: &str) -> String {
        self.ids
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(separator)
    }
}

impl From<TunnelId> for TunnelGroup {
    fn from(id: TunnelId) -> Self {
        Self { ids: vec![id] }
    }
}

impl From<&Tunnel> for TunnelGroup {
    fn from(tunnel: &Tunnel) -> Self {
        Self::from(tunnel.id)
    }
}

impl fmt::Display for TunnelGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.joined())
    }
}
