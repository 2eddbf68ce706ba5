//! Root-probabilities logger.
//!
//! Per MCMC sample, emits one tab-separated row of the root lineage's
//! state probabilities; when the engine has no surviving root lineage the
//! row is all zeros.

use phylo_math::Array;
use std::io::{self, Write};

/// Writes `sample\tstate0\t…\tstate{m−1}` rows to any sink.
#[derive(Debug)]
pub struct RootProbsLogger<W: Write> {
    out: W,
    n_states: usize,
}

impl<W: Write> RootProbsLogger<W> {
    /// Create a logger for `n_states` demes.
    pub fn new(out: W, n_states: usize) -> Self {
        Self { out, n_states }
    }

    /// Write the header row.
    pub fn write_header(&mut self) -> io::Result<()> {
        write!(self.out, "sample")?;
        for i in 0..self.n_states {
            write!(self.out, "\tstate{i}")?;
        }
        writeln!(self.out)
    }

    /// Write one sample row; `None` logs `0.0` for every state.
    pub fn log_sample(&mut self, sample: u64, probs: Option<&Array>) -> io::Result<()> {
        write!(self.out, "{sample}")?;
        match probs {
            Some(p) => {
                for i in 0..self.n_states {
                    write!(self.out, "\t{}", p[i])?;
                }
            }
            None => {
                for _ in 0..self.n_states {
                    write!(self.out, "\t0.0")?;
                }
            }
        }
        writeln!(self.out)
    }

    /// Flush and hand back the sink.
    pub fn into_inner(mut self) -> io::Result<W> {
        self.out.flush()?;
        Ok(self.out)
    }
}
