//! Query Guard
//!
//! A self-correcting natural-language-to-SQL pipeline that:
//! - Drafts SQL from a question and a schema description
//! - Feeds literal database errors back into the next draft (bounded retries)
//! - Hands raw results across a compliance boundary exactly once
//! - Redacts emails deterministically and person names contextually, failing closed
//! - Records every step in an ordered, correlation-tagged event log
//!
//! UNIFIED LOOP:
//! QUESTION → DRAFT → EXECUTE → (ERROR → DRAFT)* → HANDOFF → REDACT → ANSWER

pub mod analyst;
pub mod api;
pub mod audit;
pub mod compliance;
pub mod config;
pub mod error;
pub mod gemini;
pub mod generation;
pub mod handoff;
pub mod models;
pub mod pipeline;
pub mod store;

pub use error::Result;

// Re-export common types
pub use models::*;
pub use pipeline::QueryPipeline;
