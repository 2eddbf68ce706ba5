//! Error types for phylodyn.
//!
//! All structural failures — malformed configuration, unparsable rate
//! expressions, inconsistent models, malformed trees — are reported through
//! a single `thiserror`-derived enum. Purely numerical failures inside a
//! likelihood evaluation never reach this enum: the engine maps them to a
//! `-∞` log-density and lets the enclosing sampler reject the move.

use thiserror::Error;

/// The top-level error type used throughout phylodyn.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum Error {
    /// Malformed declaration, missing value, or out-of-range option in the
    /// configuration document.
    #[error("configuration error: {0}")]
    Config(String),

    /// A rate expression failed to parse.
    #[error("parse error at position {position}: {msg}")]
    Parse {
        /// Byte offset into the expression source.
        position: usize,
        /// Description of what went wrong.
        msg: String,
    },

    /// An identifier in a rate expression could not be resolved against the
    /// parameters and state variables in scope.
    #[error("unresolved identifier `{ident}`")]
    Name {
        /// The offending identifier.
        ident: String,
    },

    /// The population model is internally inconsistent (deme set mismatch,
    /// duplicated matrix entry, aux variable shadowing a deme, ...).
    #[error("model error: {0}")]
    Model(String),

    /// The ODE solve produced a NaN or infinite value.
    #[error("integration error: {0}")]
    Integration(String),

    /// The caller handed the engine a structurally malformed tree.
    #[error("invariant violation: {0}")]
    Invariant(String),

    /// Index out of range.
    #[error("index ({index}) out of range [0, {size})")]
    IndexOutOfRange {
        /// The index that was out of range.
        index: usize,
        /// The size of the container.
        size: usize,
    },
}

/// Shorthand `Result` type used throughout phylodyn.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Return `Err(Error::Invariant(...))` if `$cond` is false.
///
/// # Example
/// ```
/// use phylo_core::ensure;
/// fn bifurcating(n_children: usize) -> phylo_core::Result<()> {
///     ensure!(n_children == 2, "expected 2 children, got {n_children}");
///     Ok(())
/// }
/// assert!(bifurcating(2).is_ok());
/// assert!(bifurcating(3).is_err());
/// ```
#[macro_export]
macro_rules! ensure {
    ($cond:expr, $($msg:tt)*) => {
        if !$cond {
            return Err($crate::errors::Error::Invariant(
                format!($($msg)*)
            ));
        }
    };
}

/// Return `Err(Error::Config(...))` if `$cond` is false.
///
/// # Example
/// ```
/// use phylo_core::ensure_config;
/// fn check_min_p(min_p: f64) -> phylo_core::Result<()> {
///     ensure_config!(min_p > 0.0 && min_p <= 0.1, "minP must lie in (0, 0.1], got {min_p}");
///     Ok(())
/// }
/// assert!(check_min_p(0.0001).is_ok());
/// assert!(check_min_p(0.5).is_err());
/// ```
#[macro_export]
macro_rules! ensure_config {
    ($cond:expr, $($msg:tt)*) => {
        if !$cond {
            return Err($crate::errors::Error::Config(
                format!($($msg)*)
            ));
        }
    };
}

/// Return `Err(Error::Model(...))` immediately.
///
/// # Example
/// ```
/// use phylo_core::fail_model;
/// fn reject() -> phylo_core::Result<()> {
///     fail_model!("deme set mismatch");
/// }
/// assert!(reject().is_err());
/// ```
#[macro_export]
macro_rules! fail_model {
    ($($msg:tt)*) => {
        return Err($crate::errors::Error::Model(format!($($msg)*)))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_formats() {
        let e = Error::Parse {
            position: 7,
            msg: "unexpected `)`".into(),
        };
        assert_eq!(e.to_string(), "parse error at position 7: unexpected `)`");

        let e = Error::Name {
            ident: "beta2".into(),
        };
        assert_eq!(e.to_string(), "unresolved identifier `beta2`");

        let e = Error::IndexOutOfRange { index: 5, size: 3 };
        assert_eq!(e.to_string(), "index (5) out of range [0, 3)");
    }

    #[test]
    fn ensure_macro_paths() {
        fn guarded(x: i32) -> crate::Result<i32> {
            ensure!(x >= 0, "negative: {x}");
            Ok(x)
        }
        assert_eq!(guarded(3), Ok(3));
        assert!(matches!(guarded(-1), Err(Error::Invariant(_))));
    }
}
