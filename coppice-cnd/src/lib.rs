mod compiler;
mod lexer;
mod parser;
mod topo;

pub use compiler::Compiler;
pub use lexer::{Lexer, Token};
pub use parser::{NodeInfo, ParsedData, Parser, PropertyInfo, TypeDefInfo};
pub use topo::topological_sort;
