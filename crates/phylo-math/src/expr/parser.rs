//! Recursive-descent parser for rate expressions.
//!
//! Precedence, loosest first: comparisons, additive, multiplicative, unary
//! minus, power (right-associative), atoms.

use super::lexer::{tokenize, SpannedTok, Tok};
use phylo_core::{Error, Real, Result};

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    Div,
    /// `^`
    Pow,
    /// `<`
    Lt,
    /// `>`
    Gt,
    /// `<=`
    Le,
    /// `>=`
    Ge,
    /// `==`
    Eq,
    /// `!=`
    Ne,
}

/// Built-in functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Func {
    /// `exp(x)`
    Exp,
    /// `log(x)` — natural logarithm
    Log,
    /// `sqrt(x)`
    Sqrt,
    /// `abs(x)`
    Abs,
    /// `pow(x, y)`
    Pow,
    /// `min(x, y)`
    Min,
    /// `max(x, y)`
    Max,
    /// `mod(x, y)` — remainder with the sign of `x`
    Mod,
    /// `if(cond, a, b)` — `a` when `cond ≠ 0`, else `b`
    If,
}

impl Func {
    fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "exp" => Self::Exp,
            "log" => Self::Log,
            "sqrt" => Self::Sqrt,
            "abs" => Self::Abs,
            "pow" => Self::Pow,
            "min" => Self::Min,
            "max" => Self::Max,
            "mod" => Self::Mod,
            "if" => Self::If,
            _ => return None,
        })
    }

    /// Number of arguments the function takes.
    pub fn arity(self) -> usize {
        match self {
            Self::Exp | Self::Log | Self::Sqrt | Self::Abs => 1,
            Self::Pow | Self::Min | Self::Max | Self::Mod => 2,
            Self::If => 3,
        }
    }
}

/// Abstract syntax tree of a rate expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Ast {
    /// Numeric literal.
    Num(Real),
    /// Identifier, unresolved until compilation.
    Ident(String),
    /// Unary negation.
    Neg(Box<Ast>),
    /// Binary operation.
    Bin(BinOp, Box<Ast>, Box<Ast>),
    /// Function call.
    Call(Func, Vec<Ast>),
}

/// Parse `src` into an AST.
pub fn parse(src: &str) -> Result<Ast> {
    let toks = tokenize(src)?;
    let mut p = Parser {
        toks,
        i: 0,
        end: src.len(),
    };
    let ast = p.comparison()?;
    if p.i < p.toks.len() {
        return Err(p.err_here("unexpected trailing input"));
    }
    Ok(ast)
}

struct Parser {
    toks: Vec<SpannedTok>,
    i: usize,
    end: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Tok> {
        self.toks.get(self.i).map(|s| &s.tok)
    }

    fn pos(&self) -> usize {
        self.toks.get(self.i).map_or(self.end, |s| s.pos)
    }

    fn bump(&mut self) -> Option<Tok> {
        let t = self.toks.get(self.i).map(|s| s.tok.clone());
        if t.is_some() {
            self.i += 1;
        }
        t
    }

    fn err_here(&self, msg: impl Into<String>) -> Error {
        Error::Parse {
            position: self.pos(),
            msg: msg.into(),
        }
    }

    fn expect(&mut self, want: &Tok, what: &str) -> Result<()> {
        if self.peek() == Some(want) {
            self.i += 1;
            Ok(())
        } else {
            Err(self.err_here(format!("expected {what}")))
        }
    }

    fn comparison(&mut self) -> Result<Ast> {
        let mut lhs = self.additive()?;
        loop {
            let op = match self.peek() {
                Some(Tok::Lt) => BinOp::Lt,
                Some(Tok::Gt) => BinOp::Gt,
                Some(Tok::Le) => BinOp::Le,
                Some(Tok::Ge) => BinOp::Ge,
                Some(Tok::EqEq) => BinOp::Eq,
                Some(Tok::Ne) => BinOp::Ne,
                _ => break,
            };
            self.i += 1;
            let rhs = self.additive()?;
            lhs = Ast::Bin(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn additive(&mut self) -> Result<Ast> {
        let mut lhs = self.multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(Tok::Plus) => BinOp::Add,
                Some(Tok::Minus) => BinOp::Sub,
                _ => break,
            };
            self.i += 1;
            let rhs = self.multiplicative()?;
            lhs = Ast::Bin(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn multiplicative(&mut self) -> Result<Ast> {
        let mut lhs = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Tok::Star) => BinOp::Mul,
                Some(Tok::Slash) => BinOp::Div,
                _ => break,
            };
            self.i += 1;
            let rhs = self.unary()?;
            lhs = Ast::Bin(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Ast> {
        if self.peek() == Some(&Tok::Minus) {
            self.i += 1;
            let inner = self.unary()?;
            return Ok(Ast::Neg(Box::new(inner)));
        }
        self.power()
    }

    fn power(&mut self) -> Result<Ast> {
        let base = self.atom()?;
        if self.peek() == Some(&Tok::Caret) {
            self.i += 1;
            // Right-associative; the exponent may carry its own unary minus.
            let exponent = self.unary()?;
            return Ok(Ast::Bin(BinOp::Pow, Box::new(base), Box::new(exponent)));
        }
        Ok(base)
    }

    fn atom(&mut self) -> Result<Ast> {
        match self.bump() {
            Some(Tok::Num(v)) => Ok(Ast::Num(v)),
            Some(Tok::Ident(name)) => {
                if self.peek() == Some(&Tok::LParen) {
                    self.call(&name)
                } else {
                    Ok(Ast::Ident(name))
                }
            }
            Some(Tok::LParen) => {
                let inner = self.comparison()?;
                self.expect(&Tok::RParen, "`)`")?;
                Ok(inner)
            }
            Some(other) => Err(Error::Parse {
                position: self.toks[self.i - 1].pos,
                msg: format!("unexpected token {other:?}"),
            }),
            None => Err(self.err_here("unexpected end of expression")),
        }
    }

    fn call(&mut self, name: &str) -> Result<Ast> {
        let func = Func::from_name(name)
            .ok_or_else(|| self.err_here(format!("unknown function `{name}`")))?;
        self.expect(&Tok::LParen, "`(`")?;
        let mut args = Vec::with_capacity(func.arity());
        if self.peek() != Some(&Tok::RParen) {
            loop {
                args.push(self.comparison()?);
                if self.peek() == Some(&Tok::Comma) {
                    self.i += 1;
                } else {
                    break;
                }
            }
        }
        self.expect(&Tok::RParen, "`)`")?;
        if args.len() != func.arity() {
            return Err(self.err_here(format!(
                "`{name}` takes {} argument(s), got {}",
                func.arity(),
                args.len()
            )));
        }
        Ok(Ast::Call(func, args))
    }
}
