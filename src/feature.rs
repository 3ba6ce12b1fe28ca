//! The normalized in-memory representation of one annotation record.

use std::fmt;

use crate::attributes::{self, Attributes, Dialect};
use crate::bins::{self, Coords};
use crate::error::{GffError, Result};

/// Placeholder used for absent coordinates, scores and frames.
const PLACEHOLDER: &str = ".";

/// One annotation record: a single line of a GFF3/GTF file, or a feature
/// synthesized by derived-feature logic (extent inference, interfeature
/// construction, merging).
///
/// Coordinates are 1-based closed intervals; either end may be absent, in
/// which case no spatial bin is assigned. The attached [`Dialect`] governs
/// how the attribute column is rendered when the record is printed.
#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    /// Primary key within a database. Assigned at import time; features
    /// parsed straight from a file have no ID until then.
    pub id: Option<String>,
    pub seqid: String,
    pub source: String,
    pub featuretype: String,
    pub start: Option<i64>,
    pub end: Option<i64>,
    pub score: String,
    pub strand: String,
    pub frame: String,
    pub attributes: Attributes,
    /// Trailing unparsed fields beyond the canonical nine.
    pub extra: Vec<String>,
    /// Spatial bin derived from `start`/`end`; `None` when either is absent.
    pub bin: Option<u32>,
    pub dialect: Dialect,
}

fn parse_coord(field: &str, name: &str) -> Result<Option<i64>> {
    if field == PLACEHOLDER || field.is_empty() {
        return Ok(None);
    }
    field.parse::<i64>().map(Some).map_err(|_| GffError::Parse {
        line: 0,
        message: format!("invalid {} coordinate: {:?}", name, field),
    })
}

fn compute_bin(start: Option<i64>, end: Option<i64>) -> Option<u32> {
    match (start, end) {
        (Some(s), Some(e)) => Some(bins::bin(s, e, Coords::Gff)),
        _ => None,
    }
}

impl Feature {
    /// Build a feature from explicit fields, computing its bin.
    ///
    /// Used by derived-feature logic; line input goes through
    /// [`Feature::from_line`] instead.
    pub fn new(
        seqid: impl Into<String>,
        source: impl Into<String>,
        featuretype: impl Into<String>,
        start: Option<i64>,
        end: Option<i64>,
        strand: impl Into<String>,
        attributes: Attributes,
        dialect: Dialect,
    ) -> Result<Self> {
        if let (Some(s), Some(e)) = (start, end) {
            if s > e {
                return Err(GffError::Parse {
                    line: 0,
                    message: format!("start ({}) > end ({})", s, e),
                });
            }
        }
        Ok(Self {
            id: None,
            seqid: seqid.into(),
            source: source.into(),
            featuretype: featuretype.into(),
            start,
            end,
            score: PLACEHOLDER.to_string(),
            strand: strand.into(),
            frame: PLACEHOLDER.to_string(),
            attributes,
            extra: Vec::new(),
            bin: compute_bin(start, end),
            dialect,
        })
    }

    /// Parse one tab-delimited annotation line.
    ///
    /// With `dialect = None` the attribute dialect is inferred from this
    /// line alone; batch-level inference lives in the reader. The attribute
    /// column accepts either the compact database encoding or a raw
    /// attribute string (tried in that order); in the raw case the original
    /// text is retained for exact reproduction until mutated.
    pub fn from_line(line: &str, dialect: Option<&Dialect>) -> Result<Self> {
        let fields: Vec<&str> = line.trim_end_matches(['\n', '\r']).split('\t').collect();
        if fields.len() < 9 {
            return Err(GffError::Parse {
                line: 0,
                message: format!("expected at least 9 tab-separated fields, got {}", fields.len()),
            });
        }

        let start = parse_coord(fields[3], "start")?;
        let end = parse_coord(fields[4], "end")?;
        if let (Some(s), Some(e)) = (start, end) {
            if s > e {
                return Err(GffError::Parse {
                    line: 0,
                    message: format!("start ({}) > end ({})", s, e),
                });
            }
        }

        // Structured decode first (database round trips), raw string second.
        let (attrs, dialect) = match Attributes::decode(fields[8]) {
            Ok(attrs) => (attrs, dialect.cloned().unwrap_or_default()),
            Err(_) => {
                let (mut attrs, d) = attributes::split_keyvals(fields[8], dialect)?;
                attrs.set_raw(fields[8].to_string());
                (attrs, d)
            }
        };

        Ok(Self {
            id: None,
            seqid: fields[0].to_string(),
            source: fields[1].to_string(),
            featuretype: fields[2].to_string(),
            start,
            end,
            score: fields[5].to_string(),
            strand: fields[6].to_string(),
            frame: fields[7].to_string(),
            attributes: attrs,
            extra: fields[9..].iter().map(|s| s.to_string()).collect(),
            bin: compute_bin(start, end),
            dialect,
        })
    }

    /// Length of the closed interval, when both coordinates are known.
    pub fn len(&self) -> Option<i64> {
        match (self.start, self.end) {
            (Some(s), Some(e)) => Some(e - s + 1),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len().is_none_or(|l| l == 0)
    }

    /// All values of an attribute key, or an empty slice if absent.
    pub fn attr(&self, key: &str) -> &[String] {
        self.attributes.get(key).unwrap_or(&[])
    }

    /// First value of an attribute key, if any.
    pub fn attr_first(&self, key: &str) -> Option<&str> {
        self.attributes.first(key)
    }

    /// Recompute the spatial bin after a coordinate change.
    pub fn recompute_bin(&mut self) {
        self.bin = compute_bin(self.start, self.end);
    }

    /// The attribute column as it should appear on disk: the retained
    /// source text when unmodified, a dialect reconstruction otherwise.
    pub fn attributes_string(&self) -> String {
        match self.attributes.raw() {
            Some(raw) => raw.to_string(),
            None => attributes::reconstruct(&self.attributes, &self.dialect),
        }
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let coord = |c: Option<i64>| match c {
            Some(v) => v.to_string(),
            None => PLACEHOLDER.to_string(),
        };
        write!(
            f,
            "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
            self.seqid,
            self.source,
            self.featuretype,
            coord(self.start),
            coord(self.end),
            self.score,
            self.strand,
            self.frame,
            self.attributes_string(),
        )?;
        for extra in &self.extra {
            write!(f, "\t{}", extra)?;
        }
        Ok(())
    }
}
