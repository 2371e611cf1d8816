/// Flow management layer
///
/// Flow definitions, their SQLite storage and the compiled flow registry.

pub mod error;
pub mod registry;
pub mod storage;
pub mod types;

pub use error::FlowError;
pub use registry::{CompiledFlow, FlowRegistry};
pub use storage::{FlowStorage, FlowSummary, StoredFlow};
pub use types::{Edge, Flow, FlowNode, NodeConfig, NodeType};
