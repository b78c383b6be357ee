//! Prompt templating.
//!
//! Templates use `{{$name}}` slots. Rendering is plain substitution: no
//! loops, conditionals or nesting, and every slot must have a value.


use fancy_regex::Regex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::LazyLock;

use crate::{RagError, Result};

pub const DB_RECORD: &str = "db_record";
pub const QUERY_TERM: &str = "query_term";

pub const DEFAULT_TEMPLATE: &str = "\
You are an intelligent assistant for movies. You are designed to provide helpful answers to user questions about movies in your database.
You are friendly, helpful, and informative and can be humorous.
Keep your answers short and base them only on the information from the database below.
If the database record does not answer the question, say that you do not know.

Information from the database:
{{$db_record}}

User question:
{{$query_term}}
";

static SLOT_PATTERN: LazyLock<std::result::Result<Regex, fancy_regex::Error>> =
    LazyLock::new(|| Regex::new(r"\{\{\s*\$([A-Za-z_][A-Za-z0-9_]*)\s*\}\}"));

/// Values for one grounded query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptContext {
    pub db_record: String,
    pub query_term: String,
}

impl PromptContext {
    #[inline]
    pub fn variables(&self) -> HashMap<&str, &str> {
        HashMap::from([
            (DB_RECORD, self.db_record.as_str()),
            (QUERY_TERM, self.query_term.as_str()),
        ])
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    template: String,
}

impl Default for PromptTemplate {
    fn default() -> Self {
        Self::new(DEFAULT_TEMPLATE)
    }
}

impl PromptTemplate {
    #[inline]
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
        }
    }

    /// Read a template from a UTF-8 file
    #[inline]
    pub fn from_file(path: &Path) -> Result<Self> {
        let template = std::fs::read_to_string(path)?;
        Ok(Self::new(template))
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.template
    }

    /// Names of all slots, in order of appearance
    #[inline]
    pub fn slots(&self) -> Result<Vec<String>> {
        let pattern = slot_pattern()?;
        pattern
            .captures_iter(&self.template)
            .map(|caps| {
                let caps = caps.map_err(|e| RagError::Other(e.into()))?;
                Ok(caps
                    .get(1)
                    .map(|m| m.as_str().to_string())
                    .unwrap_or_default())
            })
            .collect()
    }

    /// Substitute every slot. Fails with [`RagError::MissingVariable`] naming
    /// the first slot without a value.
    #[inline]
    pub fn render(&self, variables: &HashMap<&str, &str>) -> Result<String> {
        let pattern = slot_pattern()?;
        let mut rendered = String::with_capacity(self.template.len());
        let mut last_end = 0;

        for caps in pattern.captures_iter(&self.template) {
            let caps = caps.map_err(|e| RagError::Other(e.into()))?;
            let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
                continue;
            };

            let value = variables
                .get(name.as_str())
                .ok_or_else(|| RagError::MissingVariable(name.as_str().to_string()))?;

            rendered.push_str(&self.template[last_end..whole.start()]);
            rendered.push_str(value);
            last_end = whole.end();
        }

        rendered.push_str(&self.template[last_end..]);
        Ok(rendered)
    }

    #[inline]
    pub fn render_context(&self, context: &PromptContext) -> Result<String> {
        self.render(&context.variables())
    }
}

fn slot_pattern() -> Result<&'static Regex> {
    SLOT_PATTERN
        .as_ref()
        .map_err(|e| RagError::Other(anyhow::anyhow!("Invalid slot pattern: {}", e)))
}
