//! Compiler for logic-less mustache templates.
//!
//! [`compile`] turns template text into a [`Node`] tree of static text and
//! tag directives. Rendering, context lookup, escaping and partial loading
//! are left to whoever consumes the tree.

pub mod args;
pub mod ast;
pub mod cursor;
pub mod error;
mod inspect;
pub mod parser;

pub use ast::{Argument, Delimiters, Escape, Fetch, HashArgs, HashValue, Node, Section};
pub use error::{InvalidDelimiters, SyntaxError};
pub use parser::Parser;

/// Compile `template` with the default `{{ }}` delimiters.
pub fn compile(template: &str) -> Result<Node<'_>, SyntaxError> {
    Parser::new().compile(template)
}
