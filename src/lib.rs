//! infra-memory: a searchable, self-refreshing memory of a project's
//! infrastructure configuration, queried in natural language.

pub mod config;
pub mod error;
pub mod llm;
pub mod memory;
pub mod telemetry;

pub use config::{Credentials, MemoryConfig};
pub use error::{Error, Result};
pub use memory::ProjectMemory;
