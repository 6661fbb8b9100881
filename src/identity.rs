//! Node, actor, and call identifiers
//!
//! A `NodeId` names a process for its lifetime; an `ActorId` names an
//! actor and, when routed, its home node. Both travel in every envelope,
//! so the serde forms match the wire format exactly.

use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable per-process identifier, exchanged during the connection handshake.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct NodeId(Uuid);

impl NodeId {
    /// Mint a fresh random node id. Called once at system startup.
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Fresh 128-bit identifier minted per outgoing invocation.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct CallId(Uuid);

impl CallId {
    /// Mint a fresh call id.
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Identity of an actor: an opaque token, an optional type tag, and the
/// owning node.
///
/// Equality and hashing consider `id` and `node` only; the type tag is
/// diagnostic metadata. An id without a `node` refers to a local actor on
/// the node that created it and cannot be routed outbound.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActorId {
    /// Unique opaque token, typically a UUID string.
    pub id: String,
    /// Declared actor type, for diagnostics and on-demand construction.
    #[serde(rename = "type", default)]
    pub type_tag: Option<String>,
    /// The owning node. Required for outbound routing.
    #[serde(default)]
    pub node: Option<NodeId>,
}

impl ActorId {
    /// An id with the given opaque token and no type or node.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            type_tag: None,
            node: None,
        }
    }

    /// A fresh random id with no type tag.
    pub fn random() -> Self {
        Self::new(Uuid::new_v4().to_string())
    }

    /// A fresh random id tagged with the short type name of `A`.
    pub fn random_for<A: ?Sized>() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            type_tag: Some(short_type_name::<A>().to_string()),
            node: None,
        }
    }

    /// A copy of this id with `node` set.
    pub fn with_node(mut self, node: NodeId) -> Self {
        self.node = Some(node);
        self
    }

    /// Whether the type tag matches the short type name of `A`.
    pub fn has_type_of<A: ?Sized>(&self) -> bool {
        self.type_tag.as_deref() == Some(short_type_name::<A>())
    }

    /// An id homes on `node` when it names that node or names none.
    pub(crate) fn is_local_to(&self, node: NodeId) -> bool {
        match self.node {
            Some(n) => n == node,
            None => true,
        }
    }
}

impl PartialEq for ActorId {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.node == other.node
    }
}

impl Eq for ActorId {}

impl Hash for ActorId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
        self.node.hash(state);
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.node {
            Some(node) => write!(f, "{}@{}", self.id, node),
            None => f.write_str(&self.id),
        }
    }
}

/// Last path segment of a full type name, e.g. `my_app::Person` → `Person`.
fn short_type_name<A: ?Sized>() -> &'static str {
    let full = std::any::type_name::<A>();
    full.rsplit("::").next().unwrap_or(full)
}
