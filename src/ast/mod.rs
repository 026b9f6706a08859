// Carbon AST Module
// Nodes produced by the parser and rewritten in place by the analyzer

mod decl;
mod expr;
mod stmt;

pub use decl::*;
pub use expr::*;
pub use stmt::*;
