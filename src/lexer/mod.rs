// Carbon Lexer Module
// Source text to token stream

mod scanner;
mod token;

pub use scanner::Scanner;
pub use token::{Token, TokenKind};
