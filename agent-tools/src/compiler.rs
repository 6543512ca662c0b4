//! Turning reviewed tool source into callables.

use std::fmt;
use std::sync::Arc;

use crate::registry::Tool;

/// Source rejected before it could become a callable.
///
/// `line` and `column` are 1-based; both are `0` when the error is not tied
/// to a position in the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntaxError {
    /// Human-readable description of the problem.
    pub message: String,
    /// Line of the offending token.
    pub line: usize,
    /// Column of the offending token.
    pub column: usize,
}

impl SyntaxError {
    /// Creates an error at the given position.
    #[must_use]
    pub fn new(message: impl Into<String>, line: usize, column: usize) -> Self {
        Self {
            message: message.into(),
            line,
            column,
        }
    }

    /// Creates an error not tied to a source position.
    #[must_use]
    pub fn general(message: impl Into<String>) -> Self {
        Self::new(message, 0, 0)
    }

    /// Creates an error located at the start of `span`.
    #[must_use]
    pub fn at(message: impl Into<String>, span: proc_macro2::Span) -> Self {
        let start = span.start();
        Self::new(message, start.line, start.column + 1)
    }
}

impl fmt::Display for SyntaxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.line == 0 {
            f.write_str(&self.message)
        } else {
            write!(f, "{} (line {}, column {})", self.message, self.line, self.column)
        }
    }
}

impl std::error::Error for SyntaxError {}

impl From<syn::Error> for SyntaxError {
    fn from(err: syn::Error) -> Self {
        Self::at(err.to_string(), err.span())
    }
}

/// Shape of a tool entry point, reported by [`ToolCompiler::check`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolSignature {
    /// Tool name, equal to the entry function name.
    pub name: String,
    /// Parameter names of the entry function, in order.
    pub params: Vec<String>,
}

/// Compiles tool source into callables sharing one execution namespace.
///
/// Every tool materialized by a compiler can call every other tool
/// materialized into the same namespace by name.
pub trait ToolCompiler: Send + Sync {
    /// Validates source without side effects.
    ///
    /// # Errors
    ///
    /// Returns [`SyntaxError`] when the source is malformed or does not
    /// define an entry function called `name`.
    fn check(&self, name: &str, source: &str) -> Result<ToolSignature, SyntaxError>;

    /// Compiles source into the current namespace, replacing any previous
    /// definition of `name`, and returns the resulting callable.
    ///
    /// # Errors
    ///
    /// Returns [`SyntaxError`] under the same conditions as
    /// [`ToolCompiler::check`].
    fn materialize(&self, name: &str, source: &str) -> Result<Arc<dyn Tool>, SyntaxError>;

    /// Starts a fresh namespace. Callables materialized earlier keep the
    /// namespace they were built in.
    fn reset(&self);

    /// Removes `name` from the current namespace.
    fn forget(&self, name: &str);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_position_when_known() {
        let located = SyntaxError::new("unexpected token", 3, 7);
        assert_eq!(located.to_string(), "unexpected token (line 3, column 7)");

        let general = SyntaxError::general("invalid tool name");
        assert_eq!(general.to_string(), "invalid tool name");
    }

    #[test]
    fn converts_parse_errors_with_location() {
        let err = syn::parse_file("fn broken( {").unwrap_err();
        let syntax = SyntaxError::from(err);
        assert_eq!(syntax.line, 1);
        assert!(syntax.column >= 1);
    }
}
