/// Structural errors raised while loading or saving a flow definition

use thiserror::Error;

/// Reasons a flow definition cannot be compiled into an executable graph
#[derive(Debug, Error)]
pub enum FlowError {
    #[error("flow '{0}' has no nodes")]
    Empty(String),

    #[error("duplicate node id '{0}'")]
    DuplicateNode(String),

    #[error("edge {from} -> {to} references unknown node '{missing}'")]
    UnknownEdgeEndpoint {
        from: String,
        to: String,
        missing: String,
    },

    #[error("flow '{0}' has no start node: every node has an incoming edge")]
    NoStartNode(String),

    #[error("node '{node_id}' has an invalid config: {reason}")]
    InvalidNodeConfig { node_id: String, reason: String },
}
