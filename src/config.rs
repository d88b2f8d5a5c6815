//! Buffer capacity validation and interactive prompting.

use crate::error::{PipelineError, Result};
use std::io::{self, BufRead, Write};
use std::num::NonZeroUsize;

/// Parse a buffer capacity, rejecting anything that is not a positive integer
pub fn parse_capacity(text: &str) -> Result<NonZeroUsize> {
    let trimmed = text.trim();
    let value: i64 = trimmed
        .parse()
        .map_err(|_| PipelineError::Config(format!("'{}' is not an integer", trimmed)))?;
    usize::try_from(value)
        .ok()
        .and_then(NonZeroUsize::new)
        .ok_or_else(|| {
            PipelineError::Config(format!(
                "buffer capacity must be greater than 0, got {}",
                value
            ))
        })
}

/// Ask for a capacity until a valid one is entered
///
/// Invalid answers are reported on `output` and the question is repeated.
/// Running out of input is an error.
pub fn prompt_capacity<R, W>(label: &str, input: &mut R, output: &mut W) -> Result<NonZeroUsize>
where
    R: BufRead,
    W: Write,
{
    let mut line = String::new();
    loop {
        write!(output, "Enter buffer size for the {}: ", label)?;
        output.flush()?;

        line.clear();
        if input.read_line(&mut line)? == 0 {
            return Err(PipelineError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("no {} buffer size given", label),
            )));
        }

        match parse_capacity(&line) {
            Ok(capacity) => return Ok(capacity),
            Err(e) => writeln!(output, "\nInvalid buffer, must be greater than 0 ({})", e)?,
        }
    }
}

/// Use the capacity given on the command line when it is valid, otherwise
/// prompt for it
///
/// An invalid value is reported the same way an invalid answer is.
pub fn capacity_or_prompt<R, W>(
    given: Option<&str>,
    label: &str,
    input: &mut R,
    output: &mut W,
) -> Result<NonZeroUsize>
where
    R: BufRead,
    W: Write,
{
    if let Some(text) = given {
        match parse_capacity(text) {
            Ok(capacity) => return Ok(capacity),
            Err(e) => writeln!(output, "Invalid buffer, must be greater than 0 ({})", e)?,
        }
    }
    prompt_capacity(label, input, output)
}
