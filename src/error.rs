//! Error types with fix suggestions

use thiserror::Error;

/// Trait for errors that provide fix suggestions
pub trait FixSuggestion {
    fn fix_suggestion(&self) -> Option<&str>;
}

/// Structural errors: anything that prevents a document from compiling or a
/// run from starting. Runtime action failures never appear here; they flow
/// through the [`Status`](crate::runner::Status) channel instead.
#[derive(Error, Debug)]
pub enum RigorError {
    #[error("document not found: {path}")]
    NotFound { path: String },

    #[error("compile error in '{path}': {detail}")]
    Compile { path: String, detail: String },

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("expression parse error in '{source_text}': {detail}")]
    ExprParse { source_text: String, detail: String },

    #[error("expression '{source_text}' failed: {detail}")]
    Eval { source_text: String, detail: String },
}

impl RigorError {
    /// Wrap a nested error as a compile error for the given document path.
    pub fn compile(path: impl Into<String>, detail: impl ToString) -> Self {
        RigorError::Compile {
            path: path.into(),
            detail: detail.to_string(),
        }
    }
}

impl FixSuggestion for RigorError {
    fn fix_suggestion(&self) -> Option<&str> {
        match self {
            RigorError::NotFound { .. } => {
                Some("Check the document path and -I search directories")
            }
            RigorError::Compile { .. } => {
                Some("Check node tags and field names against the document schema")
            }
            RigorError::Yaml(_) => Some("Check YAML syntax: indentation and quoting"),
            RigorError::Io(_) => Some("Check file path and permissions"),
            RigorError::ExprParse { .. } => {
                Some("Expressions support literals, names, arithmetic, comparison and 'in'")
            }
            RigorError::Eval { .. } => {
                Some("Verify every name in the expression exists in the parameter scope")
            }
        }
    }
}
