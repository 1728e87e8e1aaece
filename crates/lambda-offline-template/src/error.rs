use thiserror::Error;

/// Errors produced while parsing or rendering a mapping template.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateRenderError {
    /// A directive, reference, string or comment was never closed.
    #[error("unterminated {what} starting at offset {offset}")]
    Unterminated { what: &'static str, offset: usize },

    /// The parser found something it did not expect.
    #[error("unexpected {found} at offset {offset}, expected {expected}")]
    Unexpected {
        found: String,
        expected: &'static str,
        offset: usize,
    },

    /// `#end`, `#else` or `#elseif` without an opening directive.
    #[error("#{0} without a matching opening directive")]
    Unmatched(&'static str),

    /// A non-quiet reference to a variable that does not exist.
    #[error("undefined variable {0}")]
    UndefinedVariable(String),

    /// A method that the renderer does not provide.
    #[error("unknown method '{method}' on {target}")]
    UnknownMethod { target: String, method: String },

    /// A helper failed at render time (bad base64, bad JSON, ...).
    #[error("{0}")]
    Evaluation(String),

    /// Macro expansion recursed too deeply.
    #[error("macro expansion exceeded depth {0}")]
    MacroDepth(usize),
}
