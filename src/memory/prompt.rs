//! Question-answering prompt rendering.

use crate::error::{ConfigError, Result};

use minijinja::{Environment, context};

/// A validated minijinja template with `question` and `context` variables.
#[derive(Debug, Clone)]
pub struct PromptTemplate {
    source: String,
}

impl PromptTemplate {
    /// Parse `source` up front so a broken template fails at startup rather
    /// than on the first question.
    pub fn new(source: impl Into<String>) -> std::result::Result<Self, ConfigError> {
        let source = source.into();
        let env = Environment::new();
        env.render_str(&source, context! { question => "", context => "" })?;
        Ok(Self { source })
    }

    pub fn render(&self, question: &str, context: &str) -> Result<String> {
        let env = Environment::new();
        let rendered = env
            .render_str(&self.source, context! { question => question, context => context })
            .map_err(ConfigError::from)?;
        Ok(rendered)
    }
}
