// Template Errors
// Lexing, parsing and evaluation failures raised while rendering a template

use std::fmt;

/// Error raised while rendering a template
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateError {
    pub message: String,
    /// Byte offset into the template source, when known
    pub position: Option<usize>,
    pub kind: TemplateErrorKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateErrorKind {
    /// Malformed tag or expression
    Syntax,
    /// Block tags that do not pair up
    UnbalancedBlock,
    /// Function not known to the renderer
    UnknownFunction,
    /// Filter not known to the renderer
    UnknownFilter,
    /// Type or value failure while evaluating
    Evaluation,
}

impl TemplateError {
    pub fn new(message: impl Into<String>, kind: TemplateErrorKind) -> Self {
        Self {
            message: message.into(),
            position: None,
            kind,
        }
    }

    pub fn evaluation(message: impl Into<String>) -> Self {
        Self::new(message, TemplateErrorKind::Evaluation)
    }

    /// Attach a source position if none was recorded yet
    pub fn at(mut self, position: usize) -> Self {
        if self.position.is_none() {
            self.position = Some(position);
        }
        self
    }

    /// Shift an expression-relative position to a template offset
    pub fn offset_by(mut self, base: usize) -> Self {
        self.position = Some(self.position.map_or(base, |p| base + p));
        self
    }
}

impl fmt::Display for TemplateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(position) = self.position {
            write!(f, " at offset {}", position)?;
        }
        Ok(())
    }
}

impl std::error::Error for TemplateError {}
