use std::sync::Arc;

/// Where a handle was minted. Client-minted handles have no meaning on the
/// server and must never be sent there.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Origin {
    Client,
    Server,
}

impl Origin {
    pub fn as_str(self) -> &'static str {
        match self {
            Origin::Client => "client",
            Origin::Server => "server",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "client" => Some(Origin::Client),
            "server" => Some(Origin::Server),
            _ => None,
        }
    }
}

/// Opaque pointer to a process, port or reference of the remote runtime.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Handle {
    origin: Origin,
    node: Arc<str>,
    segments: Arc<[u64]>,
}

impl Handle {
    pub fn new(origin: Origin, node: impl AsRef<str>, segments: impl Into<Vec<u64>>) -> Self {
        Self {
            origin,
            node: Arc::from(node.as_ref()),
            segments: segments.into().into(),
        }
    }

    pub fn origin(&self) -> Origin {
        self.origin
    }

    pub fn node(&self) -> &str {
        &self.node
    }

    pub fn segments(&self) -> &[u64] {
        &self.segments
    }
}
