//! The persisted feature database: creation entry points and the query
//! surface.
//!
//! A [`FeatureDb`] owns the underlying SQLite connection. Features handed
//! back from queries are detached copies; mutating one has no effect on
//! storage until it is re-imported through an update operation.

mod create;

use std::io;
use std::path::Path;

use rusqlite::{types::ToSql, Connection, Row};

use crate::attributes::{Attributes, Dialect};
use crate::bins::{self, Coords};
use crate::error::{GffError, Result};
use crate::feature::Feature;
use crate::ops;
use crate::reader::GffReader;

pub use create::{CreateOptions, IdResolution, IdSpec, MergeStrategy, SCHEMA_VERSION};

const FEATURE_COLUMNS: &str = "f.id, f.seqid, f.source, f.featuretype, f.start, f.end, \
     f.score, f.strand, f.frame, f.attributes, f.extra, f.bin";

/// Materialize a feature from a `SELECT` over [`FEATURE_COLUMNS`].
fn feature_from_row(row: &Row<'_>, dialect: &Dialect) -> Result<Feature> {
    let attrs_json: String = row.get(9)?;
    let extra_json: String = row.get(10)?;
    Ok(Feature {
        id: row.get(0)?,
        seqid: row.get(1)?,
        source: row.get(2)?,
        featuretype: row.get(3)?,
        start: row.get(4)?,
        end: row.get(5)?,
        score: row.get(6)?,
        strand: row.get(7)?,
        frame: row.get(8)?,
        attributes: Attributes::decode(&attrs_json)?,
        extra: serde_json::from_str(&extra_json)?,
        bin: row.get(11)?,
        dialect: dialect.clone(),
    })
}

/// Which feature anchor a nearest-feature scan measures distance from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Anchor {
    Start,
    End,
    /// Scan both anchors and keep the overall minimum.
    #[default]
    Both,
}

/// Options for [`FeatureDb::nearest`].
#[derive(Debug, Clone, Default)]
pub struct NearestOptions {
    pub strand: Option<String>,
    pub featuretype: Option<String>,
    /// Feature IDs excluded from the search (typically the query feature
    /// itself).
    pub ignore_ids: Vec<String>,
    pub anchor: Anchor,
}

/// A finalized annotation database.
pub struct FeatureDb {
    conn: Connection,
    dialect: Dialect,
    version: String,
}

impl std::fmt::Debug for FeatureDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeatureDb")
            .field("path", &self.conn.path())
            .field("dialect", &self.dialect)
            .field("version", &self.version)
            .finish()
    }
}

impl FeatureDb {
    /// Import `reader` into a new database file at `path`.
    pub fn create<P: AsRef<Path>>(
        path: P,
        reader: GffReader,
        opts: CreateOptions,
    ) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            if opts.force {
                std::fs::remove_file(path)?;
            } else {
                return Err(GffError::InvalidConfig(format!(
                    "{} already exists; enable force to overwrite",
                    path.display()
                )));
            }
        }
        let conn = Connection::open(path)?;
        match create::create_into(conn, reader, &opts) {
            Ok((conn, dialect)) => Ok(Self {
                conn,
                dialect,
                version: SCHEMA_VERSION.to_string(),
            }),
            // A failed import must not leave a half-built file blocking a
            // corrected retry.
            Err(e) => {
                let _ = std::fs::remove_file(path);
                Err(e)
            }
        }
    }

    /// Import `reader` into an in-memory database. Handy for tests and
    /// one-shot pipelines; nothing touches disk.
    pub fn create_in_memory(reader: GffReader, opts: CreateOptions) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let (conn, dialect) = create::create_into(conn, reader, &opts)?;
        Ok(Self {
            conn,
            dialect,
            version: SCHEMA_VERSION.to_string(),
        })
    }

    /// Open an existing database.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("database {} does not exist", path.display()),
            )
            .into());
        }
        let conn = Connection::open(path)?;
        let (version, dialect_json): (String, String) = conn.query_row(
            "SELECT version, dialect FROM meta LIMIT 1",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        let dialect: Dialect = serde_json::from_str(&dialect_json)?;
        Ok(Self {
            conn,
            dialect,
            version,
        })
    }

    /// Import more data, continuing persisted autoincrement sequences.
    pub fn update(&mut self, reader: GffReader, opts: CreateOptions) -> Result<()> {
        create::update_into(&self.conn, &self.dialect, reader, &opts)
    }

    /// The dialect this database reconstructs attribute strings with.
    pub fn dialect(&self) -> &Dialect {
        &self.dialect
    }

    /// Schema version recorded at creation time.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Header directives preserved from the source file, without their
    /// `##` prefix.
    pub fn directives(&self) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare("SELECT directive FROM directives")?;
        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(row.get(0)?);
        }
        Ok(out)
    }

    /// Raw connection passthrough for advanced callers.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    fn collect_features(&self, sql: &str, params: &[&dyn ToSql]) -> Result<Vec<Feature>> {
        let mut stmt = self.conn.prepare(sql)?;
        let mut rows = stmt.query(params)?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(feature_from_row(row, &self.dialect)?);
        }
        Ok(out)
    }

    /// Exact primary-key lookup. Fails with [`GffError::NotFound`] when the
    /// ID is absent.
    pub fn by_id(&self, id: &str) -> Result<Feature> {
        let sql = format!("SELECT {} FROM features f WHERE f.id = ?1", FEATURE_COLUMNS);
        self.collect_features(&sql, &[&id])?
            .pop()
            .ok_or_else(|| GffError::NotFound(id.to_string()))
    }

    fn related(
        &self,
        id: &str,
        level: i64,
        featuretype: Option<&str>,
        want_children: bool,
    ) -> Result<Vec<Feature>> {
        if !(1..=2).contains(&level) {
            return Err(GffError::InvalidConfig(format!(
                "only relation levels 1 and 2 are supported, requested {}",
                level
            )));
        }
        let (join_col, match_col) = if want_children {
            ("child", "parent")
        } else {
            ("parent", "child")
        };
        let mut sql = format!(
            "SELECT {} FROM features f JOIN relations r ON f.id = r.{} \
             WHERE r.{} = ? AND r.level = ?",
            FEATURE_COLUMNS, join_col, match_col
        );
        let mut params: Vec<&dyn ToSql> = vec![&id, &level];
        if let Some(ft) = &featuretype {
            sql.push_str(" AND f.featuretype = ?");
            params.push(ft);
        }
        sql.push_str(" GROUP BY f.id ORDER BY f.start");
        self.collect_features(&sql, &params)
    }

    /// Direct (level 1) or grandchild (level 2) features of `id`, ordered
    /// by start coordinate.
    pub fn children(
        &self,
        id: &str,
        level: i64,
        featuretype: Option<&str>,
    ) -> Result<Vec<Feature>> {
        self.related(id, level, featuretype, true)
    }

    /// Direct (level 1) or grandparent (level 2) features of `id`, ordered
    /// by start coordinate.
    pub fn parents(
        &self,
        id: &str,
        level: i64,
        featuretype: Option<&str>,
    ) -> Result<Vec<Feature>> {
        self.related(id, level, featuretype, false)
    }

    /// Features overlapping `[start, end]` on `seqid` (1-based closed
    /// coordinates).
    ///
    /// The spatial bin set is a cheap pre-filter; the coordinate predicate
    /// is the authoritative test. With `completely_within` only features
    /// fully contained in the query interval are returned.
    pub fn region(
        &self,
        seqid: &str,
        start: i64,
        end: i64,
        strand: Option<&str>,
        featuretype: Option<&str>,
        completely_within: bool,
    ) -> Result<Vec<Feature>> {
        let candidate_bins = bins::bins(start, end, Coords::Gff);
        let bin_list = candidate_bins
            .iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join(",");
        let mut sql = format!(
            "SELECT {} FROM features f WHERE f.seqid = ? AND f.bin IN ({})",
            FEATURE_COLUMNS, bin_list
        );
        if completely_within {
            sql.push_str(" AND f.start >= ? AND f.end <= ?");
        } else {
            sql.push_str(" AND f.end >= ? AND f.start <= ?");
        }
        let mut params: Vec<&dyn ToSql> = vec![&seqid, &start, &end];
        if let Some(s) = &strand {
            sql.push_str(" AND f.strand = ?");
            params.push(s);
        }
        if let Some(ft) = &featuretype {
            sql.push_str(" AND f.featuretype = ?");
            params.push(ft);
        }
        sql.push_str(" ORDER BY f.start");
        self.collect_features(&sql, &params)
    }

    /// The feature nearest to `pos` on `seqid`, with its distance.
    ///
    /// Runs one distance scan per selected anchor and keeps the overall
    /// minimum. Returns `Ok(None)` when no candidate exists; an empty
    /// neighborhood is not an error.
    pub fn nearest(
        &self,
        seqid: &str,
        pos: i64,
        opts: &NearestOptions,
    ) -> Result<Option<(Feature, i64)>> {
        let anchors: &[&str] = match opts.anchor {
            Anchor::Start => &["start"],
            Anchor::End => &["end"],
            Anchor::Both => &["start", "end"],
        };
        let mut best: Option<(Feature, i64)> = None;
        for anchor in anchors {
            let mut sql = format!(
                "SELECT {}, ABS(f.{} - ?) AS distance FROM features f \
                 WHERE f.seqid = ? AND f.{} IS NOT NULL",
                FEATURE_COLUMNS, anchor, anchor
            );
            let mut params: Vec<&dyn ToSql> = vec![&pos, &seqid];
            if let Some(s) = &opts.strand {
                sql.push_str(" AND f.strand = ?");
                params.push(s);
            }
            if let Some(ft) = &opts.featuretype {
                sql.push_str(" AND f.featuretype = ?");
                params.push(ft);
            }
            if !opts.ignore_ids.is_empty() {
                sql.push_str(" AND f.id NOT IN (");
                for (i, id) in opts.ignore_ids.iter().enumerate() {
                    if i > 0 {
                        sql.push(',');
                    }
                    sql.push('?');
                    params.push(id);
                }
                sql.push(')');
            }
            sql.push_str(" ORDER BY distance LIMIT 1");

            let mut stmt = self.conn.prepare(&sql)?;
            let mut rows = stmt.query(&params[..])?;
            if let Some(row) = rows.next()? {
                let feature = feature_from_row(row, &self.dialect)?;
                let distance: i64 = row.get(12)?;
                if best.as_ref().is_none_or(|(_, d)| distance < *d) {
                    best = Some((feature, distance));
                }
            }
        }
        Ok(best)
    }

    /// Every feature, ordered by position.
    pub fn all_features(&self) -> Result<Vec<Feature>> {
        let sql = format!(
            "SELECT {} FROM features f ORDER BY f.seqid, f.start",
            FEATURE_COLUMNS
        );
        self.collect_features(&sql, &[])
    }

    /// Every feature of one type, ordered by position.
    pub fn features_of_type(&self, featuretype: &str) -> Result<Vec<Feature>> {
        let sql = format!(
            "SELECT {} FROM features f WHERE f.featuretype = ?1 ORDER BY f.seqid, f.start",
            FEATURE_COLUMNS
        );
        self.collect_features(&sql, &[&featuretype])
    }

    /// Distinct feature types present in the database, sorted.
    pub fn featuretypes(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT DISTINCT featuretype FROM features ORDER BY featuretype")?;
        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(row.get(0)?);
        }
        Ok(out)
    }

    /// Count features, optionally restricted to one type.
    pub fn count_features_of_type(&self, featuretype: Option<&str>) -> Result<i64> {
        let count = match featuretype {
            Some(ft) => self.conn.query_row(
                "SELECT COUNT(*) FROM features WHERE featuretype = ?1",
                [ft],
                |row| row.get(0),
            )?,
            None => self
                .conn
                .query_row("SELECT COUNT(*) FROM features", [], |row| row.get(0))?,
        };
        Ok(count)
    }

    /// Synthesize intron features from the gaps between exons.
    ///
    /// Transcripts are found either through a grandparent featuretype
    /// (`gene` by default: gene -> transcript -> exon) or directly through
    /// a parent featuretype; supplying both selectors is a configuration
    /// error. Results are returned, not persisted.
    pub fn create_introns(
        &self,
        exon_featuretype: &str,
        grandparent_featuretype: Option<&str>,
        parent_featuretype: Option<&str>,
        new_featuretype: Option<&str>,
    ) -> Result<Vec<Feature>> {
        if grandparent_featuretype.is_some() && parent_featuretype.is_some() {
            return Err(GffError::InvalidConfig(
                "specify at most one of the gene-level and transcript-level grouping selectors"
                    .to_string(),
            ));
        }
        let intron_type = new_featuretype.unwrap_or("intron");

        let transcript_ids: Vec<String> = match parent_featuretype {
            Some(parent) => self
                .features_of_type(parent)?
                .into_iter()
                .filter_map(|f| f.id)
                .collect(),
            None => {
                let grandparent = grandparent_featuretype.unwrap_or("gene");
                let mut ids = Vec::new();
                for gene in self.features_of_type(grandparent)? {
                    let Some(gene_id) = &gene.id else { continue };
                    for transcript in self.children(gene_id, 1, None)? {
                        if let Some(id) = transcript.id {
                            ids.push(id);
                        }
                    }
                }
                ids
            }
        };

        let mut out = Vec::new();
        for tid in transcript_ids {
            let exons = self.children(&tid, 1, Some(exon_featuretype))?;
            out.extend(ops::interfeatures(&exons, Some(intron_type))?);
        }
        Ok(out)
    }
}
