pub mod codegen;
pub mod expr;
pub mod ir;
pub mod lexer;
pub mod parser;
pub mod span;
pub mod strategy;
pub mod token;
