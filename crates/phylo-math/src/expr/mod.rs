//! Rate-expression IR.
//!
//! User-written rate equations (`beta0 * S * I0 / N`, …) are tokenised,
//! parsed into an AST, and compiled once against a fixed environment layout
//! into a flat instruction stream over a scratch-register file. Evaluation
//! is a linear interpreter pass with no allocation and no string lookups,
//! so it can run millions of times inside the ODE right-hand side.
//!
//! Grammar: numeric literals; identifiers; binary `+ - * / ^` (with `^`
//! right-associative); unary `-`; parentheses; the functions `exp`, `log`,
//! `sqrt`, `pow`, `min`, `max`, `abs`, `mod`, `if(cond, a, b)`; comparison
//! operators `< > <= >= == !=` yielding 0/1.

mod lexer;
mod parser;
mod program;

pub use parser::{parse, Ast, BinOp, Func};
pub use program::{compile, Program, Scope};

use phylo_core::Result;

/// Parse and compile `src` against `scope` in one step.
pub fn compile_str(src: &str, scope: &Scope) -> Result<Program> {
    let ast = parse(src)?;
    compile(&ast, scope)
}
