//! Prompt assembly.
//!
//! A template is plain text containing the `$CONTEXT` and `$QUERY`
//! placeholders. Rendering is single-pass: substituted text is never
//! re-scanned, so a chunk that happens to contain `$QUERY` is copied
//! through verbatim instead of being expanded.

use thiserror::Error;

use crate::models::RetrievedContext;

pub const CONTEXT_PLACEHOLDER: &str = "$CONTEXT";
pub const QUERY_PLACEHOLDER: &str = "$QUERY";

/// Template used when the configuration does not supply one.
pub const DEFAULT_TEMPLATE: &str = "You are a helpful assistant that answers questions \
using only the context below. If the context does not contain the answer, say that you \
do not know.\n\nContext:\n$CONTEXT\n\nQuestion: $QUERY\n\nAnswer:";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PromptError {
    #[error("prompt template must contain the {0} placeholder")]
    MissingPlaceholder(&'static str),
}

#[derive(Debug, Clone)]
pub struct PromptTemplate {
    template: String,
}

impl Default for PromptTemplate {
    fn default() -> Self {
        Self {
            template: DEFAULT_TEMPLATE.to_string(),
        }
    }
}

impl PromptTemplate {
    pub fn new(template: impl Into<String>) -> Result<Self, PromptError> {
        let template = template.into();
        if !template.contains(CONTEXT_PLACEHOLDER) {
            return Err(PromptError::MissingPlaceholder(CONTEXT_PLACEHOLDER));
        }
        if !template.contains(QUERY_PLACEHOLDER) {
            return Err(PromptError::MissingPlaceholder(QUERY_PLACEHOLDER));
        }
        Ok(Self { template })
    }

    pub fn as_str(&self) -> &str {
        &self.template
    }

    /// Substitute the joined context texts and the query.
    pub fn render(&self, contexts: &[RetrievedContext], query: &str) -> String {
        let joined = join_contexts(contexts);
        let mut out = String::with_capacity(self.template.len() + joined.len() + query.len());
        let mut rest = self.template.as_str();

        while let Some(pos) = rest.find('$') {
            out.push_str(&rest[..pos]);
            let tail = &rest[pos..];
            if let Some(after) = tail.strip_prefix(CONTEXT_PLACEHOLDER) {
                out.push_str(&joined);
                rest = after;
            } else if let Some(after) = tail.strip_prefix(QUERY_PLACEHOLDER) {
                out.push_str(query);
                rest = after;
            } else {
                out.push('$');
                rest = &tail[1..];
            }
        }
        out.push_str(rest);
        out
    }
}

/// Context chunks separated by blank lines, in rank order.
pub fn join_contexts(contexts: &[RetrievedContext]) -> String {
    contexts
        .iter()
        .map(|c| c.text.trim())
        .collect::<Vec<_>>()
        .join("\n\n")
}
