/// External collaborators reached by flow nodes
///
/// - DataStore: generic table query/update for database nodes
/// - TextGenerator: LLM text generation for ai_analysis nodes

pub mod data_store;
pub mod text_generation;

pub use data_store::{DataStore, SqliteDataStore, TableQuery, TableUpdate};
pub use text_generation::{Generation, GenerationRequest, OpenAiCompatibleGenerator, TextGenerator};
