//! Compilation of expression ASTs to a linear instruction stream.
//!
//! Identifiers are resolved at compile time against a [`Scope`] — an
//! ordered name table whose positions double as slots into the flat
//! environment vector handed to [`Program::eval`]. Sub-expressions with
//! constant operands are folded during compilation.

use super::parser::{Ast, BinOp, Func};
use phylo_core::{Error, Real, Result};

/// Ordered identifier table; the position of a name is its environment slot.
#[derive(Debug, Clone, Default)]
pub struct Scope {
    names: Vec<String>,
}

impl Scope {
    /// Create an empty scope.
    pub fn new() -> Self {
        Self { names: Vec::new() }
    }

    /// Append a name, returning its slot. Duplicates are rejected.
    pub fn push(&mut self, name: &str) -> Result<u16> {
        if self.names.iter().any(|n| n == name) {
            return Err(Error::Model(format!("duplicate variable `{name}`")));
        }
        let slot = self.names.len() as u16;
        self.names.push(name.to_string());
        Ok(slot)
    }

    /// Resolve a name to its slot.
    pub fn slot(&self, name: &str) -> Option<u16> {
        self.names.iter().position(|n| n == name).map(|i| i as u16)
    }

    /// Number of names in scope (== required environment length).
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Whether the scope is empty.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Operand of an instruction.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Src {
    /// Inline constant.
    Const(Real),
    /// Environment slot.
    Env(u16),
    /// Scratch register.
    Reg(u16),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UnCode {
    Neg,
    Exp,
    Log,
    Sqrt,
    Abs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BinCode {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Min,
    Max,
    Rem,
    Lt,
    Gt,
    Le,
    Ge,
    Eq,
    Ne,
}

impl From<BinOp> for BinCode {
    fn from(op: BinOp) -> Self {
        match op {
            BinOp::Add => Self::Add,
            BinOp::Sub => Self::Sub,
            BinOp::Mul => Self::Mul,
            BinOp::Div => Self::Div,
            BinOp::Pow => Self::Pow,
            BinOp::Lt => Self::Lt,
            BinOp::Gt => Self::Gt,
            BinOp::Le => Self::Le,
            BinOp::Ge => Self::Ge,
            BinOp::Eq => Self::Eq,
            BinOp::Ne => Self::Ne,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Instr {
    Un { op: UnCode, a: Src, dst: u16 },
    Bin { op: BinCode, a: Src, b: Src, dst: u16 },
    // if(cond, a, b) — all three operands evaluated, then selected.
    Sel { cond: Src, a: Src, b: Src, dst: u16 },
}

/// A compiled expression: a linear schedule over a scratch-register file.
#[derive(Debug, Clone)]
pub struct Program {
    instrs: Vec<Instr>,
    n_regs: u16,
    result: Src,
    env_reads: Vec<u16>,
}

impl Program {
    /// Number of scratch registers an evaluation needs.
    pub fn n_regs(&self) -> usize {
        self.n_regs as usize
    }

    /// Sorted, deduplicated environment slots this program reads.
    pub fn env_reads(&self) -> &[u16] {
        &self.env_reads
    }

    /// Return `true` if the program reads any slot in `[from, to)`.
    pub fn reads_in(&self, from: u16, to: u16) -> bool {
        self.env_reads.iter().any(|&s| s >= from && s < to)
    }

    /// Evaluate against `env`, growing `regs` as needed.
    ///
    /// Deterministic, allocation-free once `regs` has reached the program's
    /// register count, no I/O.
    pub fn eval(&self, env: &[Real], regs: &mut Vec<Real>) -> Real {
        if regs.len() < self.n_regs as usize {
            regs.resize(self.n_regs as usize, 0.0);
        }
        #[inline]
        fn fetch(src: Src, env: &[Real], regs: &[Real]) -> Real {
            match src {
                Src::Const(v) => v,
                Src::Env(i) => env[i as usize],
                Src::Reg(i) => regs[i as usize],
            }
        }
        for instr in &self.instrs {
            match *instr {
                Instr::Un { op, a, dst } => {
                    let x = fetch(a, env, regs);
                    regs[dst as usize] = apply_un(op, x);
                }
                Instr::Bin { op, a, b, dst } => {
                    let x = fetch(a, env, regs);
                    let y = fetch(b, env, regs);
                    regs[dst as usize] = apply_bin(op, x, y);
                }
                Instr::Sel { cond, a, b, dst } => {
                    let c = fetch(cond, env, regs);
                    regs[dst as usize] = if c != 0.0 {
                        fetch(a, env, regs)
                    } else {
                        fetch(b, env, regs)
                    };
                }
            }
        }
        fetch(self.result, env, regs)
    }
}

#[inline]
fn apply_un(op: UnCode, x: Real) -> Real {
    match op {
        UnCode::Neg => -x,
        UnCode::Exp => x.exp(),
        UnCode::Log => x.ln(),
        UnCode::Sqrt => x.sqrt(),
        UnCode::Abs => x.abs(),
    }
}

#[inline]
fn apply_bin(op: BinCode, x: Real, y: Real) -> Real {
    match op {
        BinCode::Add => x + y,
        BinCode::Sub => x - y,
        BinCode::Mul => x * y,
        BinCode::Div => x / y,
        BinCode::Pow => x.powf(y),
        BinCode::Min => x.min(y),
        BinCode::Max => x.max(y),
        BinCode::Rem => x % y,
        BinCode::Lt => (x < y) as u8 as Real,
        BinCode::Gt => (x > y) as u8 as Real,
        BinCode::Le => (x <= y) as u8 as Real,
        BinCode::Ge => (x >= y) as u8 as Real,
        BinCode::Eq => (x == y) as u8 as Real,
        BinCode::Ne => (x != y) as u8 as Real,
    }
}

/// Compile an AST against `scope`.
pub fn compile(ast: &Ast, scope: &Scope) -> Result<Program> {
    let mut c = Compiler {
        scope,
        instrs: Vec::new(),
        next_reg: 0,
        env_reads: Vec::new(),
    };
    let result = c.emit(ast)?;
    let mut env_reads = c.env_reads;
    env_reads.sort_unstable();
    env_reads.dedup();
    Ok(Program {
        instrs: c.instrs,
        n_regs: c.next_reg,
        result,
        env_reads,
    })
}

struct Compiler<'a> {
    scope: &'a Scope,
    instrs: Vec<Instr>,
    next_reg: u16,
    env_reads: Vec<u16>,
}

impl Compiler<'_> {
    fn alloc(&mut self) -> u16 {
        let r = self.next_reg;
        self.next_reg += 1;
        r
    }

    fn emit_un(&mut self, op: UnCode, a: Src) -> Src {
        if let Src::Const(v) = a {
            return Src::Const(apply_un(op, v));
        }
        let dst = self.alloc();
        self.instrs.push(Instr::Un { op, a, dst });
        Src::Reg(dst)
    }

    fn emit_bin(&mut self, op: BinCode, a: Src, b: Src) -> Src {
        if let (Src::Const(x), Src::Const(y)) = (a, b) {
            return Src::Const(apply_bin(op, x, y));
        }
        let dst = self.alloc();
        self.instrs.push(Instr::Bin { op, a, b, dst });
        Src::Reg(dst)
    }

    fn emit(&mut self, ast: &Ast) -> Result<Src> {
        match ast {
            Ast::Num(v) => Ok(Src::Const(*v)),
            Ast::Ident(name) => {
                let slot = self.scope.slot(name).ok_or_else(|| Error::Name {
                    ident: name.clone(),
                })?;
                self.env_reads.push(slot);
                Ok(Src::Env(slot))
            }
            Ast::Neg(inner) => {
                let a = self.emit(inner)?;
                Ok(self.emit_un(UnCode::Neg, a))
            }
            Ast::Bin(op, lhs, rhs) => {
                let a = self.emit(lhs)?;
                let b = self.emit(rhs)?;
                Ok(self.emit_bin((*op).into(), a, b))
            }
            Ast::Call(func, args) => {
                let un = match func {
                    Func::Exp => Some(UnCode::Exp),
                    Func::Log => Some(UnCode::Log),
                    Func::Sqrt => Some(UnCode::Sqrt),
                    Func::Abs => Some(UnCode::Abs),
                    _ => None,
                };
                if let Some(op) = un {
                    let a = self.emit(&args[0])?;
                    return Ok(self.emit_un(op, a));
                }
                let bin = match func {
                    Func::Pow => Some(BinCode::Pow),
                    Func::Min => Some(BinCode::Min),
                    Func::Max => Some(BinCode::Max),
                    Func::Mod => Some(BinCode::Rem),
                    _ => None,
                };
                if let Some(op) = bin {
                    let a = self.emit(&args[0])?;
                    let b = self.emit(&args[1])?;
                    return Ok(self.emit_bin(op, a, b));
                }
                // if(cond, a, b)
                let cond = self.emit(&args[0])?;
                let a = self.emit(&args[1])?;
                let b = self.emit(&args[2])?;
                if let Src::Const(c) = cond {
                    return Ok(if c != 0.0 { a } else { b });
                }
                let dst = self.alloc();
                self.instrs.push(Instr::Sel { cond, a, b, dst });
                Ok(Src::Reg(dst))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::parser::parse;
    use super::*;

    fn scope_of(names: &[&str]) -> Scope {
        let mut s = Scope::new();
        for n in names {
            s.push(n).unwrap();
        }
        s
    }

    #[test]
    fn constant_folding() {
        let prog = compile(&parse("2 * 3 + exp(0)").unwrap(), &Scope::new()).unwrap();
        assert_eq!(prog.n_regs(), 0);
        let mut regs = Vec::new();
        assert_eq!(prog.eval(&[], &mut regs), 7.0);
    }

    #[test]
    fn env_reads_tracked() {
        let scope = scope_of(&["t", "beta", "I"]);
        let prog = compile(&parse("beta * I").unwrap(), &scope).unwrap();
        assert_eq!(prog.env_reads(), &[1, 2]);
        assert!(prog.reads_in(2, 3));
        assert!(!prog.reads_in(0, 1));
    }

    #[test]
    fn repeated_variable() {
        let scope = scope_of(&["x"]);
        let prog = compile(&parse("x + x * x - x / x").unwrap(), &scope).unwrap();
        let mut regs = Vec::new();
        assert_eq!(prog.eval(&[2.0], &mut regs), 2.0 + 4.0 - 1.0);
    }

    #[test]
    fn mod_matches_rust_remainder() {
        let scope = scope_of(&["x", "y"]);
        let prog = compile(&parse("mod(x, y)").unwrap(), &scope).unwrap();
        let mut regs = Vec::new();
        for (x, y) in [(7.0, 3.0), (-7.0, 3.0), (7.5, 2.0), (-7.5, 2.0)] {
            let got = prog.eval(&[x, y], &mut regs);
            assert!((got - x % y).abs() < 1e-12, "mod({x},{y}) = {got}");
        }
    }

    #[test]
    fn select_branches() {
        let scope = scope_of(&["t"]);
        let prog = compile(&parse("if(t >= 1, t * 2, 0 - t)").unwrap(), &scope).unwrap();
        let mut regs = Vec::new();
        assert_eq!(prog.eval(&[2.0], &mut regs), 4.0);
        assert_eq!(prog.eval(&[0.5], &mut regs), -0.5);
    }

    #[test]
    fn constant_condition_folds_select() {
        let scope = scope_of(&["x"]);
        let prog = compile(&parse("if(1 > 0, x, x * 100)").unwrap(), &scope).unwrap();
        let mut regs = Vec::new();
        assert_eq!(prog.eval(&[3.0], &mut regs), 3.0);
    }
}
