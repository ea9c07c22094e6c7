//! # Checkpoint Text Format
//!
//! Line-oriented stream shared by model checkpoints and hyperparameter files.
//!
//! ```text
//! segtag-checkpoint 1
//! @variant 1
//! char-neural
//! @word-alphabet 4
//! 3
//! -unknown-
//! ...
//! @word-table 4
//! 3 2
//! 0.1 -0.4
//! ...
//! ```
//!
//! Every field is a section headed `@<name> <payload-lines>`. The reader names
//! the section it expects next, so a writer/reader drift is reported as a
//! [`SegtagError::CheckpointMismatch`] instead of silently misreading values.
//! A section with zero payload lines marks a block the variant does not own.
//! Floats are written with Rust's shortest round-trip formatting, which makes
//! a text round-trip exact.

use std::fmt::Display;
use std::io::{BufRead, Lines, Write};
use std::str::FromStr;

use crate::error::{Result, SegtagError};

/// Current version of the model checkpoint layout.
pub const CHECKPOINT_VERSION: u32 = 1;

/// Magic word of a model checkpoint stream.
pub const CHECKPOINT_KIND: &str = "segtag-checkpoint";

/// Dense row-major matrix as stored in a checkpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct Matrix {
    pub rows: usize,
    pub cols: usize,
    pub data: Vec<f32>,
}

/// Sequential section writer.
pub struct CheckpointWriter<W: Write> {
    out: W,
}

impl<W: Write> CheckpointWriter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    /// Write the stream header line.
    pub fn header(&mut self, kind: &str, version: u32) -> Result<()> {
        writeln!(self.out, "{kind} {version}")?;
        Ok(())
    }

    /// Write a one-line section.
    pub fn scalar<T: Display>(&mut self, name: &str, value: T) -> Result<()> {
        writeln!(self.out, "@{name} 1")?;
        writeln!(self.out, "{value}")?;
        Ok(())
    }

    /// Write one value per line, count-prefixed.
    pub fn list<T: Display>(&mut self, name: &str, values: &[T]) -> Result<()> {
        writeln!(self.out, "@{name} {}", values.len() + 1)?;
        writeln!(self.out, "{}", values.len())?;
        for value in values {
            writeln!(self.out, "{value}")?;
        }
        Ok(())
    }

    /// Write string entries, one per line. Entries may not contain line breaks.
    pub fn strings(&mut self, name: &str, entries: &[String]) -> Result<()> {
        if let Some(bad) = entries.iter().find(|e| e.contains(['\n', '\r'])) {
            return Err(SegtagError::Checkpoint(format!(
                "entry {bad:?} of {name} contains a line break"
            )));
        }
        self.list(name, entries)
    }

    /// Write a row-major matrix: a `rows cols` line then one line per row.
    pub fn matrix(&mut self, name: &str, rows: usize, cols: usize, data: &[f32]) -> Result<()> {
        if data.len() != rows * cols {
            return Err(SegtagError::Checkpoint(format!(
                "{name}: {} values do not fill a {rows}x{cols} matrix",
                data.len()
            )));
        }
        writeln!(self.out, "@{name} {}", rows + 1)?;
        writeln!(self.out, "{rows} {cols}")?;
        for r in 0..rows {
            let row = &data[r * cols..(r + 1) * cols];
            let line: Vec<String> = row.iter().map(|v| v.to_string()).collect();
            writeln!(self.out, "{}", line.join(" "))?;
        }
        Ok(())
    }

    /// Mark a block the current variant does not carry.
    pub fn absent(&mut self, name: &str) -> Result<()> {
        writeln!(self.out, "@{name} 0")?;
        Ok(())
    }

    /// Flush and hand back the underlying writer.
    pub fn finish(mut self) -> Result<W> {
        self.out.flush()?;
        Ok(self.out)
    }
}

/// Sequential section reader; the mirror image of [`CheckpointWriter`].
pub struct CheckpointReader<R: BufRead> {
    lines: Lines<R>,
    line_no: usize,
}

impl<R: BufRead> CheckpointReader<R> {
    pub fn new(input: R) -> Self {
        Self {
            lines: input.lines(),
            line_no: 0,
        }
    }

    fn next_line(&mut self) -> Result<String> {
        self.line_no += 1;
        match self.lines.next() {
            Some(line) => Ok(line?.trim_end_matches('\r').to_string()),
            None => Err(SegtagError::Checkpoint(format!(
                "unexpected end of stream at line {}",
                self.line_no
            ))),
        }
    }

    fn parse<T: FromStr>(&self, text: &str, what: &str) -> Result<T> {
        text.trim().parse().map_err(|_| {
            SegtagError::Checkpoint(format!(
                "line {}: cannot parse {what} from {text:?}",
                self.line_no
            ))
        })
    }

    /// Read the header line and return its version.
    pub fn header(&mut self, kind: &str, max_version: u32) -> Result<u32> {
        let line = self.next_line()?;
        let mut parts = line.split_whitespace();
        let found = parts.next().unwrap_or_default();
        if found != kind {
            return Err(SegtagError::CheckpointMismatch {
                expected: kind.to_string(),
                found: line.clone(),
            });
        }
        let version: u32 = self.parse(parts.next().unwrap_or_default(), "version")?;
        if version == 0 || version > max_version {
            return Err(SegtagError::Checkpoint(format!(
                "unsupported {kind} version {version} (supported up to {max_version})"
            )));
        }
        Ok(version)
    }

    /// Read a section header and return its payload line count.
    fn section(&mut self, name: &str) -> Result<usize> {
        let line = self.next_line()?;
        let mismatch = || SegtagError::CheckpointMismatch {
            expected: name.to_string(),
            found: line.clone(),
        };
        let rest = line.strip_prefix('@').ok_or_else(mismatch)?;
        let (found, count) = rest.split_once(' ').ok_or_else(mismatch)?;
        if found != name {
            return Err(mismatch());
        }
        self.parse(count, "section length")
    }

    fn expect_len(&self, name: &str, expected: usize, found: usize) -> Result<()> {
        if expected != found {
            return Err(SegtagError::Checkpoint(format!(
                "section {name} declares {found} lines, its content needs {expected}"
            )));
        }
        Ok(())
    }

    /// Read a one-line section.
    pub fn scalar<T: FromStr>(&mut self, name: &str) -> Result<T> {
        let len = self.section(name)?;
        self.expect_len(name, 1, len)?;
        let line = self.next_line()?;
        self.parse(&line, name)
    }

    /// Read a count-prefixed list of values.
    pub fn list<T: FromStr>(&mut self, name: &str) -> Result<Vec<T>> {
        let len = self.section(name)?;
        if len == 0 {
            return Err(SegtagError::Checkpoint(format!("section {name} is empty")));
        }
        let count: usize = {
            let line = self.next_line()?;
            self.parse(&line, "list length")?
        };
        self.expect_len(name, count + 1, len)?;
        let mut values = Vec::with_capacity(count);
        for _ in 0..count {
            let line = self.next_line()?;
            values.push(self.parse(&line, name)?);
        }
        Ok(values)
    }

    /// Read string entries written by [`CheckpointWriter::strings`].
    pub fn strings(&mut self, name: &str) -> Result<Vec<String>> {
        let len = self.section(name)?;
        if len == 0 {
            return Err(SegtagError::Checkpoint(format!("section {name} is empty")));
        }
        let count: usize = {
            let line = self.next_line()?;
            self.parse(&line, "entry count")?
        };
        self.expect_len(name, count + 1, len)?;
        (0..count).map(|_| self.next_line()).collect()
    }

    /// Read a matrix section. Returns `None` for an absent block.
    pub fn matrix(&mut self, name: &str) -> Result<Option<Matrix>> {
        let len = self.section(name)?;
        if len == 0 {
            return Ok(None);
        }
        let dims = self.next_line()?;
        let (rows, cols) = dims.split_once(' ').ok_or_else(|| {
            SegtagError::Checkpoint(format!("{name}: malformed dimensions {dims:?}"))
        })?;
        let rows: usize = self.parse(rows, "row count")?;
        let cols: usize = self.parse(cols, "column count")?;
        self.expect_len(name, rows + 1, len)?;

        let mut data = Vec::with_capacity(rows * cols);
        for _ in 0..rows {
            let line = self.next_line()?;
            let before = data.len();
            for token in line.split_whitespace() {
                data.push(self.parse::<f32>(token, name)?);
            }
            if data.len() - before != cols {
                return Err(SegtagError::Checkpoint(format!(
                    "{name}: line {} has {} values, expected {cols}",
                    self.line_no,
                    data.len() - before
                )));
            }
        }
        Ok(Some(Matrix { rows, cols, data }))
    }

    /// Read a matrix section that must be present.
    pub fn required_matrix(&mut self, name: &str) -> Result<Matrix> {
        self.matrix(name)?
            .ok_or_else(|| SegtagError::Checkpoint(format!("required block {name} is absent")))
    }
}
