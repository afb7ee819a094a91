use std::io::{BufRead, Write};

use anyhow::{Context, anyhow};
use tracing::debug;

use super::elbow::InertiaCurve;
use super::model::ClusterCount;
use crate::error::{PipelineError, Result};

/// The decision point between the elbow curve and the final clustering.
/// Whatever sits behind it, the pipeline only ever sees a validated k.
pub trait KOracle {
    /// Choose k for `available` tickets after looking at `curve`.
    fn choose_k(&mut self, curve: &InertiaCurve, available: usize) -> anyhow::Result<ClusterCount>;
}

/// Parse a user-supplied k: a whole number, at least 2, at most `available`
/// (the number of distinct tickets).
pub fn parse_k(input: &str, available: usize) -> Result<ClusterCount> {
    let input = input.trim();
    let k = input.parse::<usize>().map_err(|_| {
        PipelineError::invalid("k", format!("'{}' is not a whole number", input))
    })?;
    validate_k(k, available)
}

/// Check a k against `[2, available]`.
pub fn validate_k(k: usize, available: usize) -> Result<ClusterCount> {
    let k = ClusterCount::try_new(k)?;
    if k.get() > available {
        return Err(PipelineError::invalid(
            "k",
            format!("{} is more than the {} distinct tickets available", k, available),
        ));
    }
    Ok(k)
}

/// A k fixed up front (e.g. from the command line). An invalid value is fatal.
#[derive(Debug, Clone, Copy)]
pub struct FixedK(pub usize);

impl KOracle for FixedK {
    fn choose_k(&mut self, _curve: &InertiaCurve, available: usize) -> anyhow::Result<ClusterCount> {
        Ok(validate_k(self.0, available)?)
    }
}

/// Asks on `output` and reads from `input` until a valid k arrives.
#[derive(Debug)]
pub struct PromptOracle<R, W> {
    input: R,
    output: W,
}

impl<R: BufRead, W: Write> PromptOracle<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }
}

impl<R: BufRead, W: Write> KOracle for PromptOracle<R, W> {
    fn choose_k(&mut self, curve: &InertiaCurve, available: usize) -> anyhow::Result<ClusterCount> {
        write!(self.output, "\n{}", curve).with_context(|| "PromptOracle: write curve")?;
        loop {
            write!(
                self.output,
                "\nEnter the desired number of clusters (2..={}): ",
                available
            )
            .and_then(|_| self.output.flush())
            .with_context(|| "PromptOracle: write prompt")?;

            let mut line = String::new();
            let read = self
                .input
                .read_line(&mut line)
                .with_context(|| "PromptOracle: read answer")?;
            if read == 0 {
                return Err(anyhow!(PipelineError::MissingInput {
                    source_name: "k prompt".into(),
                    missing: vec!["k".into()],
                }));
            }

            match parse_k(&line, available) {
                Ok(k) => {
                    writeln!(self.output, "Proceeding with {} clusters.", k)?;
                    return Ok(k);
                }
                Err(e) if e.is_recoverable() => {
                    debug!(answer = line.trim(), "rejected k");
                    writeln!(self.output, "{}", e)?;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}
