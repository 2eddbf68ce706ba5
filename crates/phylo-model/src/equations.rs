//! Parsing of `matrixeqs` and `definitions` blocks.
//!
//! A `matrixeqs` block is a sequence of semicolon-terminated assignments,
//! one per line in the configuration document:
//!
//! ```text
//! F(I0, I0) = beta0 * S * I0 / N;
//! G(I0, I1) = m01 * I0;
//! D(I0)     = gamma0 * I0;
//! dot(S)    = b - beta0 * S * (I0 + I1) / N;
//! ```
//!
//! The left-hand side names the equation kind and its deme (or auxiliary
//! variable); the right-hand side is kept as raw expression source and
//! compiled later against the model's full scope.

use phylo_core::{Error, Result};

/// Left-hand side of one matrix-equation assignment.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum EquationLhs {
    /// `F(origin, destination)` — birth of a `destination` lineage from an
    /// `origin` parent.
    Birth(String, String),
    /// `G(origin, destination)` — migration from `origin` to `destination`.
    Migration(String, String),
    /// `D(deme)` — death rate in `deme`.
    Death(String),
    /// `dot(name)` — auxiliary (non-demic) state variable.
    NonDeme(String),
}

/// One parsed assignment, expression still in source form.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RawEquation {
    /// What is being assigned.
    pub lhs: EquationLhs,
    /// Right-hand-side expression source.
    pub expr: String,
}

fn config_err(msg: impl Into<String>) -> Error {
    Error::Config(msg.into())
}

fn ident(s: &str) -> Result<String> {
    let s = s.trim();
    let mut chars = s.chars();
    let head_ok = chars.next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    if !head_ok || !s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(config_err(format!("`{s}` is not a valid identifier")));
    }
    Ok(s.to_string())
}

fn parse_lhs(lhs: &str) -> Result<EquationLhs> {
    let lhs = lhs.trim();
    let open = lhs
        .find('(')
        .ok_or_else(|| config_err(format!("malformed equation target `{lhs}`")))?;
    if !lhs.ends_with(')') {
        return Err(config_err(format!("malformed equation target `{lhs}`")));
    }
    let head = lhs[..open].trim();
    let args: Vec<&str> = lhs[open + 1..lhs.len() - 1].split(',').collect();

    let two = |args: &[&str]| -> Result<(String, String)> {
        if args.len() != 2 {
            return Err(config_err(format!(
                "`{head}(...)` takes two demes, got {}",
                args.len()
            )));
        }
        Ok((ident(args[0])?, ident(args[1])?))
    };
    let one = |args: &[&str]| -> Result<String> {
        if args.len() != 1 {
            return Err(config_err(format!(
                "`{head}(...)` takes one name, got {}",
                args.len()
            )));
        }
        ident(args[0])
    };

    match head {
        "F" => two(&args).map(|(a, b)| EquationLhs::Birth(a, b)),
        "G" => two(&args).map(|(a, b)| EquationLhs::Migration(a, b)),
        "D" => one(&args).map(EquationLhs::Death),
        "dot" => one(&args).map(EquationLhs::NonDeme),
        other => Err(config_err(format!(
            "unknown equation target `{other}` (expected F, G, D, or dot)"
        ))),
    }
}

/// Parse a `matrixeqs` block into raw equations.
///
/// Assignments are semicolon-terminated; whitespace and empty statements
/// are ignored.
pub fn parse_equations(block: &str) -> Result<Vec<RawEquation>> {
    let mut out = Vec::new();
    for stmt in block.split(';') {
        let stmt = stmt.trim();
        if stmt.is_empty() {
            continue;
        }
        let eq = stmt
            .find('=')
            .ok_or_else(|| config_err(format!("missing `=` in `{stmt}`")))?;
        let lhs = parse_lhs(&stmt[..eq])?;
        let expr = stmt[eq + 1..].trim();
        if expr.is_empty() {
            return Err(config_err(format!("empty right-hand side in `{stmt}`")));
        }
        out.push(RawEquation {
            lhs,
            expr: expr.to_string(),
        });
    }
    if out.is_empty() {
        return Err(config_err("matrixeqs block contains no equations"));
    }
    Ok(out)
}

/// Parse a `definitions` block of `name = expr;` statements, order kept.
pub fn parse_definitions(block: &str) -> Result<Vec<(String, String)>> {
    let mut out = Vec::new();
    for stmt in block.split(';') {
        let stmt = stmt.trim();
        if stmt.is_empty() {
            continue;
        }
        let eq = stmt
            .find('=')
            .ok_or_else(|| config_err(format!("missing `=` in definition `{stmt}`")))?;
        let name = ident(&stmt[..eq])?;
        let expr = stmt[eq + 1..].trim();
        if expr.is_empty() {
            return Err(config_err(format!("empty definition for `{name}`")));
        }
        out.push((name, expr.to_string()));
    }
    Ok(out)
}
