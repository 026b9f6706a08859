// Carbon Programming Language
// A class-based scripting language: analyzer, bytecode compiler and VM

pub mod analyzer;
pub mod ast;
pub mod builtins;
pub mod compiler;
pub mod config;
pub mod error;
pub mod lexer;
pub mod native;
pub mod parser;
pub mod vm;

pub use config::Config;
