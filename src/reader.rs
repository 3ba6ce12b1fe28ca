//! Streaming readers producing [`Feature`] records from files, in-memory
//! text, or existing feature sequences.
//!
//! The reader peeks a bounded window of data lines so the attribute dialect
//! can be inferred once per batch (see [`crate::attributes::choose_dialect`]);
//! the peeked records are re-spliced to the front of the output so nothing
//! is lost. `##` directives are collected as they stream by, and a
//! `##FASTA` directive (or a `>` sequence header) terminates iteration.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufRead, BufReader, Cursor};
use std::path::Path;

use crate::attributes::{choose_dialect, Dialect};
use crate::error::Result;
use crate::feature::Feature;

/// Default number of data lines peeked for dialect inference.
pub const DEFAULT_CHECKLINES: usize = 10;

/// Per-feature hook applied before emission. Returning `None` drops the
/// feature; mutating-and-returning it supports custom IDs and renames.
pub type Transform = Box<dyn FnMut(Feature) -> Option<Feature>>;

enum Source {
    Lines(Box<dyn BufRead>),
    Features(Box<dyn Iterator<Item = Feature>>),
}

/// A lazy, single-pass reader of annotation records.
pub struct GffReader {
    source: Source,
    dialect: Option<Dialect>,
    force_dialect_check: bool,
    checklines: usize,
    transform: Option<Transform>,
    directives: Vec<String>,
    pending: VecDeque<Feature>,
    line_number: usize,
    primed: bool,
    finished: bool,
}

impl GffReader {
    fn new(source: Source) -> Self {
        Self {
            source,
            dialect: None,
            force_dialect_check: false,
            checklines: DEFAULT_CHECKLINES,
            transform: None,
            directives: Vec::new(),
            pending: VecDeque::new(),
            line_number: 0,
            primed: false,
            finished: false,
        }
    }

    /// Read records from a file on disk.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        Ok(Self::new(Source::Lines(Box::new(BufReader::new(file)))))
    }

    /// Read records from an in-memory text blob.
    pub fn from_text(text: impl Into<String>) -> Self {
        Self::new(Source::Lines(Box::new(BufReader::new(Cursor::new(
            text.into(),
        )))))
    }

    /// Pass through an existing sequence of features.
    ///
    /// Used for composing pipelines and database-to-database transfer. A
    /// batch dialect is still chosen (from the features' own dialects) and
    /// stamped onto every emitted feature, but attributes are not re-split.
    pub fn from_features<I>(features: I) -> Self
    where
        I: IntoIterator<Item = Feature>,
        I::IntoIter: 'static,
    {
        Self::new(Source::Features(Box::new(features.into_iter())))
    }

    /// Use `dialect` for every record instead of inferring one.
    pub fn with_dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = Some(dialect);
        self
    }

    /// Infer the dialect independently for every line. Slow, but tolerant
    /// of internally inconsistent files.
    pub fn with_dialect_check(mut self, per_line: bool) -> Self {
        self.force_dialect_check = per_line;
        self
    }

    /// Number of lines peeked for batch dialect inference (default 10).
    pub fn with_checklines(mut self, n: usize) -> Self {
        self.checklines = n;
        self
    }

    /// Apply a per-feature transform before emission.
    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.transform = Some(transform);
        self
    }

    /// Header directives (`##`-prefixed lines, stored without the prefix)
    /// encountered so far. Complete once iteration has passed the header.
    pub fn directives(&self) -> &[String] {
        &self.directives
    }

    /// The dialect applied to emitted features, once determined.
    pub fn dialect(&self) -> Option<&Dialect> {
        self.dialect.as_ref()
    }

    /// Next non-comment annotation line, with directive bookkeeping.
    /// Returns `Ok(None)` at end of input or at the start of FASTA data.
    fn next_data_line(&mut self) -> Result<Option<(String, usize)>> {
        let Source::Lines(reader) = &mut self.source else {
            return Ok(None);
        };
        let mut buf = String::new();
        loop {
            buf.clear();
            if reader.read_line(&mut buf)? == 0 {
                return Ok(None);
            }
            self.line_number += 1;
            let line = buf.trim_end_matches(['\n', '\r']);
            if line == "##FASTA" || line.starts_with('>') {
                return Ok(None);
            }
            if let Some(directive) = line.strip_prefix("##") {
                self.directives.push(directive.trim().to_string());
                continue;
            }
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            return Ok(Some((line.to_string(), self.line_number)));
        }
    }

    /// Peek the lookahead window, choose the batch dialect, and park the
    /// already-read records so they are emitted first.
    fn prime(&mut self) -> Result<()> {
        self.primed = true;
        if self.dialect.is_some() || self.force_dialect_check {
            return Ok(());
        }

        match &mut self.source {
            Source::Lines(_) => {
                let mut window: Vec<(String, usize)> = Vec::new();
                while window.len() < self.checklines {
                    match self.next_data_line()? {
                        Some(item) => window.push(item),
                        None => {
                            self.finished = true;
                            break;
                        }
                    }
                }
                let mut candidates = Vec::with_capacity(window.len());
                for (line, n) in &window {
                    let f = Feature::from_line(line, None).map_err(|e| e.at_line(*n))?;
                    candidates.push((f.attributes.len(), f.dialect));
                }
                let dialect = choose_dialect(candidates);
                for (line, n) in &window {
                    let mut f =
                        Feature::from_line(line, Some(&dialect)).map_err(|e| e.at_line(*n))?;
                    f.dialect = dialect.clone();
                    self.pending.push_back(f);
                }
                self.dialect = Some(dialect);
            }
            Source::Features(features) => {
                let mut window: Vec<Feature> = Vec::new();
                for f in features.by_ref().take(self.checklines) {
                    window.push(f);
                }
                if window.len() < self.checklines {
                    self.finished = true;
                }
                let dialect = choose_dialect(
                    window
                        .iter()
                        .map(|f| (f.attributes.len(), f.dialect.clone())),
                );
                for mut f in window {
                    f.dialect = dialect.clone();
                    self.pending.push_back(f);
                }
                self.dialect = Some(dialect);
            }
        }
        Ok(())
    }

    fn next_raw(&mut self) -> Result<Option<Feature>> {
        if !self.primed {
            self.prime()?;
        }
        if let Some(f) = self.pending.pop_front() {
            return Ok(Some(f));
        }
        if self.finished {
            return Ok(None);
        }
        match &mut self.source {
            Source::Features(features) => match features.next() {
                Some(mut f) => {
                    if let Some(d) = &self.dialect {
                        f.dialect = d.clone();
                    }
                    Ok(Some(f))
                }
                None => {
                    self.finished = true;
                    Ok(None)
                }
            },
            Source::Lines(_) => match self.next_data_line()? {
                Some((line, n)) => {
                    let dialect = if self.force_dialect_check {
                        None
                    } else {
                        self.dialect.as_ref()
                    };
                    let mut f = Feature::from_line(&line, dialect).map_err(|e| e.at_line(n))?;
                    if let Some(d) = &self.dialect {
                        if !self.force_dialect_check {
                            f.dialect = d.clone();
                        }
                    }
                    Ok(Some(f))
                }
                None => {
                    self.finished = true;
                    Ok(None)
                }
            },
        }
    }

    /// Pull the next feature, applying the transform hook.
    pub fn next_feature(&mut self) -> Option<Result<Feature>> {
        loop {
            match self.next_raw() {
                Err(e) => return Some(Err(e)),
                Ok(None) => return None,
                Ok(Some(feature)) => match &mut self.transform {
                    None => return Some(Ok(feature)),
                    Some(t) => match t(feature) {
                        Some(f) => return Some(Ok(f)),
                        None => continue,
                    },
                },
            }
        }
    }
}

impl Iterator for GffReader {
    type Item = Result<Feature>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_feature()
    }
}
