//! Database creation and import.
//!
//! A linear pipeline turns a [`GffReader`] into a persisted database:
//! schema init, feature/relation population, a second pass that either
//! computes the level-2 relation closure (GFF) or infers missing
//! gene/transcript extents (GTF), then finalization (directives, metadata,
//! autoincrement counters, indexes). The whole import runs inside one
//! transaction so readers only ever see the pre-import or finalized state.

use std::collections::BTreeSet;
use std::fmt;
use std::io::{BufRead, BufReader, Write};

use log::{debug, info, warn};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use rustc_hash::FxHashMap;
use tempfile::NamedTempFile;

use crate::attributes::{Attributes, Dialect, GffFormat};
use crate::error::{GffError, Result};
use crate::feature::Feature;
use crate::ops::DERIVED_SOURCE;
use crate::reader::GffReader;

/// Schema version recorded in the `meta` table.
pub const SCHEMA_VERSION: &str = env!("CARGO_PKG_VERSION");

const SCHEMA: &str = "
CREATE TABLE features (
    id text,
    seqid text,
    source text,
    featuretype text,
    start int,
    end int,
    score text,
    strand text,
    frame text,
    attributes text,
    extra text,
    bin int,
    primary key (id)
);
CREATE TABLE relations (
    parent text,
    child text,
    level int,
    primary key (parent, child, level)
);
CREATE TABLE meta (version text, dialect text);
CREATE TABLE directives (directive text);
CREATE TABLE autoincrements (base text, n int, primary key (base));
CREATE TABLE duplicates (idspecid text, newid text, primary key (newid));
";

const INSERT_FEATURE: &str = "INSERT INTO features \
     (id, seqid, source, featuretype, start, end, score, strand, frame, attributes, extra, bin) \
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)";

const UPDATE_FEATURE: &str = "UPDATE features SET \
     seqid = ?2, source = ?3, featuretype = ?4, start = ?5, end = ?6, \
     score = ?7, strand = ?8, frame = ?9, attributes = ?10, extra = ?11, bin = ?12 \
     WHERE id = ?1";

const INDEXES: &str = "
CREATE INDEX IF NOT EXISTS relationsparent ON relations (parent);
CREATE INDEX IF NOT EXISTS relationschild ON relations (child);
CREATE INDEX IF NOT EXISTS featuretype ON features (featuretype);
CREATE INDEX IF NOT EXISTS seqidstartend ON features (seqid, start, end);
CREATE INDEX IF NOT EXISTS seqidstartendstrand ON features (seqid, start, end, strand);
CREATE INDEX IF NOT EXISTS featurebin ON features (bin);
ANALYZE;
";

/// The eight non-attribute feature fields that participate in merge
/// comparisons.
const MERGEABLE_FIELDS: [&str; 8] = [
    "seqid",
    "source",
    "featuretype",
    "start",
    "end",
    "score",
    "strand",
    "frame",
];

/// Outcome of a user-supplied ID function.
pub enum IdResolution {
    /// Use this string as the feature's ID.
    Literal(String),
    /// Autoincrement within the given namespace.
    Autoincrement(String),
}

/// How a feature's primary ID is derived during import.
pub enum IdSpec {
    /// Autoincrement per featuretype (`gene_1`, `gene_2`, ...).
    Auto,
    /// Look up one attribute key, falling back to autoincrement.
    Key(String),
    /// Try keys in order; first hit wins, else autoincrement.
    Keys(Vec<String>),
    /// Featuretype-specific key lists, falling back to autoincrement.
    ByType(FxHashMap<String, Vec<String>>),
    /// Arbitrary resolver; `None` falls back to per-featuretype
    /// autoincrement.
    Func(Box<dyn Fn(&Feature) -> Option<IdResolution>>),
}

impl fmt::Debug for IdSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdSpec::Auto => write!(f, "Auto"),
            IdSpec::Key(k) => write!(f, "Key({:?})", k),
            IdSpec::Keys(ks) => write!(f, "Keys({:?})", ks),
            IdSpec::ByType(m) => write!(f, "ByType({:?})", m),
            IdSpec::Func(_) => write!(f, "Func(..)"),
        }
    }
}

/// Policy applied when two records resolve to the same primary ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeStrategy {
    /// Abort the import, naming the offending ID.
    Error,
    /// Log and discard the new record; first-seen wins.
    Warning,
    /// Overwrite the stored record's non-key fields.
    Replace,
    /// Mint a fresh autoincremented ID and record it in the duplicates
    /// ledger.
    CreateUnique,
    /// Union attributes into a matching stored record, or fall back to
    /// `CreateUnique` when no stored record's non-attribute fields match.
    Merge,
}

impl MergeStrategy {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "error" => Some(MergeStrategy::Error),
            "warning" => Some(MergeStrategy::Warning),
            "replace" => Some(MergeStrategy::Replace),
            "create_unique" => Some(MergeStrategy::CreateUnique),
            "merge" => Some(MergeStrategy::Merge),
            _ => None,
        }
    }
}

/// Import configuration.
#[derive(Debug)]
pub struct CreateOptions {
    pub id_spec: IdSpec,
    pub merge_strategy: MergeStrategy,
    /// Non-attribute fields excused from merge comparisons; observed values
    /// are stored as a sorted, comma-joined union. `start`/`end` are
    /// rejected eagerly (integers cannot be comma-joined meaningfully).
    pub force_merge_fields: Vec<String>,
    /// Override the format instead of trusting the inferred dialect.
    pub format: Option<GffFormat>,
    /// GTF attribute key naming a feature's transcript.
    pub transcript_key: String,
    /// GTF attribute key naming a feature's gene.
    pub gene_key: String,
    pub disable_infer_transcripts: bool,
    pub disable_infer_genes: bool,
    /// Overwrite an existing database file.
    pub force: bool,
    /// Retain relation-closure/extent-inference scratch files for
    /// debugging instead of deleting them.
    pub keep_tempfiles: bool,
}

impl Default for CreateOptions {
    fn default() -> Self {
        Self {
            id_spec: IdSpec::Auto,
            merge_strategy: MergeStrategy::Error,
            force_merge_fields: Vec::new(),
            format: None,
            transcript_key: "transcript_id".to_string(),
            gene_key: "gene_id".to_string(),
            disable_infer_transcripts: false,
            disable_infer_genes: false,
            force: false,
            keep_tempfiles: false,
        }
    }
}

/// Pre-flight validation; all misconfiguration is caught before any row is
/// written.
fn validate(opts: &CreateOptions) -> Result<()> {
    for field in &opts.force_merge_fields {
        if !MERGEABLE_FIELDS.contains(&field.as_str()) {
            return Err(GffError::InvalidConfig(format!(
                "unknown force-merge field {:?}",
                field
            )));
        }
        if field == "start" || field == "end" {
            return Err(GffError::InvalidConfig(
                "cannot force-merge start/end: integer coordinates cannot be comma-joined"
                    .to_string(),
            ));
        }
    }
    Ok(())
}

fn field_value(f: &Feature, field: &str) -> String {
    let coord = |c: Option<i64>| c.map(|v| v.to_string()).unwrap_or_else(|| ".".to_string());
    match field {
        "seqid" => f.seqid.clone(),
        "source" => f.source.clone(),
        "featuretype" => f.featuretype.clone(),
        "start" => coord(f.start),
        "end" => coord(f.end),
        "score" => f.score.clone(),
        "strand" => f.strand.clone(),
        "frame" => f.frame.clone(),
        _ => String::new(),
    }
}

fn set_field_value(f: &mut Feature, field: &str, value: String) {
    match field {
        "seqid" => f.seqid = value,
        "source" => f.source = value,
        "featuretype" => f.featuretype = value,
        "score" => f.score = value,
        "strand" => f.strand = value,
        "frame" => f.frame = value,
        _ => {}
    }
}

/// Do two records agree on every non-attribute field not excused by
/// `skip`?
fn fields_match(a: &Feature, b: &Feature, skip: &[String]) -> bool {
    MERGEABLE_FIELDS
        .iter()
        .filter(|field| !skip.iter().any(|s| s == *field))
        .all(|field| field_value(a, field) == field_value(b, field))
}

struct DbCreator<'a> {
    conn: &'a Connection,
    opts: &'a CreateOptions,
    dialect: Dialect,
    autoincrements: FxHashMap<String, i64>,
}

impl<'a> DbCreator<'a> {
    fn new(conn: &'a Connection, opts: &'a CreateOptions) -> Self {
        Self {
            conn,
            opts,
            dialect: Dialect::default(),
            autoincrements: FxHashMap::default(),
        }
    }

    fn autoincrement(&mut self, base: &str) -> String {
        let n = self.autoincrements.entry(base.to_string()).or_insert(0);
        *n += 1;
        format!("{}_{}", base, n)
    }

    /// Resolve exactly one ID string for a feature, per the configured
    /// [`IdSpec`].
    fn resolve_id(&mut self, f: &Feature) -> String {
        enum Resolved {
            Literal(String),
            Namespace(String),
        }
        let first_hit = |keys: &[String]| -> Option<String> {
            keys.iter()
                .find_map(|k| f.attr_first(k))
                .map(str::to_string)
        };
        let resolved = match &self.opts.id_spec {
            IdSpec::Auto => Resolved::Namespace(f.featuretype.clone()),
            IdSpec::Key(key) => match f.attr_first(key) {
                Some(v) => Resolved::Literal(v.to_string()),
                None => Resolved::Namespace(f.featuretype.clone()),
            },
            IdSpec::Keys(keys) => match first_hit(keys) {
                Some(v) => Resolved::Literal(v),
                None => Resolved::Namespace(f.featuretype.clone()),
            },
            IdSpec::ByType(by_type) => {
                match by_type.get(&f.featuretype).and_then(|keys| first_hit(keys)) {
                    Some(v) => Resolved::Literal(v),
                    None => Resolved::Namespace(f.featuretype.clone()),
                }
            }
            IdSpec::Func(func) => match func(f) {
                Some(IdResolution::Literal(v)) => Resolved::Literal(v),
                Some(IdResolution::Autoincrement(ns)) => Resolved::Namespace(ns),
                None => Resolved::Namespace(f.featuretype.clone()),
            },
        };
        match resolved {
            Resolved::Literal(v) => v,
            Resolved::Namespace(ns) => self.autoincrement(&ns),
        }
    }

    /// Run an insert/update statement over a feature's columns. The outer
    /// `Result` covers serialization; the inner one is kept raw so callers
    /// can branch on constraint violations.
    fn run_feature_sql(&self, sql: &str, f: &Feature) -> Result<rusqlite::Result<usize>> {
        let attrs = f.attributes.encode()?;
        let extra = serde_json::to_string(&f.extra)?;
        Ok(self.conn.execute(
            sql,
            params![
                f.id, f.seqid, f.source, f.featuretype, f.start, f.end, f.score, f.strand,
                f.frame, attrs, extra, f.bin
            ],
        ))
    }

    fn insert_feature(&mut self, f: Feature, strategy: MergeStrategy) -> Result<()> {
        match self.run_feature_sql(INSERT_FEATURE, &f)? {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == ErrorCode::ConstraintViolation =>
            {
                self.handle_duplicate(f, strategy)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn handle_duplicate(&mut self, f: Feature, strategy: MergeStrategy) -> Result<()> {
        let id = f.id.clone().unwrap_or_default();
        match strategy {
            MergeStrategy::Error => Err(GffError::DuplicateId(id)),
            MergeStrategy::Warning => {
                warn!("duplicate ID {}: discarding new record, first-seen wins", id);
                Ok(())
            }
            MergeStrategy::Replace => {
                self.run_feature_sql(UPDATE_FEATURE, &f)??;
                Ok(())
            }
            MergeStrategy::CreateUnique => self.create_unique(f),
            MergeStrategy::Merge => self.merge(f),
        }
    }

    /// Store under a freshly autoincremented ID and remember the mapping in
    /// the duplicates ledger so later records sharing the requested ID can
    /// find every variant.
    fn create_unique(&mut self, mut f: Feature) -> Result<()> {
        let requested = f.id.take().unwrap_or_default();
        loop {
            let featuretype = f.featuretype.clone();
            let new_id = self.autoincrement(&featuretype);
            f.id = Some(new_id.clone());
            match self.run_feature_sql(INSERT_FEATURE, &f)? {
                Ok(_) => {
                    debug!("duplicate ID {} stored as {}", requested, new_id);
                    self.conn.execute(
                        "INSERT OR REPLACE INTO duplicates (idspecid, newid) VALUES (?1, ?2)",
                        params![requested, new_id],
                    )?;
                    return Ok(());
                }
                // The minted ID can itself collide with a user-supplied
                // one; keep counting.
                Err(rusqlite::Error::SqliteFailure(e, _))
                    if e.code == ErrorCode::ConstraintViolation => {}
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn load_feature(&self, id: &str) -> Result<Option<Feature>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT id, seqid, source, featuretype, start, end, score, strand, frame, \
                    attributes, extra, bin FROM features WHERE id = ?1",
        )?;
        let mut rows = stmt.query(params![id])?;
        match rows.next()? {
            Some(row) => Ok(Some(super::feature_from_row(row, &self.dialect)?)),
            None => Ok(None),
        }
    }

    /// `merge` strategy: union the new record into a stored record whose
    /// non-attribute fields match, or fall back to [`Self::create_unique`].
    fn merge(&mut self, f: Feature) -> Result<()> {
        let requested = f.id.clone().unwrap_or_default();

        let mut candidate_ids = vec![requested.clone()];
        {
            let mut stmt = self
                .conn
                .prepare_cached("SELECT newid FROM duplicates WHERE idspecid = ?1")?;
            let mut rows = stmt.query(params![requested])?;
            while let Some(row) = rows.next()? {
                candidate_ids.push(row.get(0)?);
            }
        }

        let skip = &self.opts.force_merge_fields;
        for candidate_id in candidate_ids {
            let Some(mut stored) = self.load_feature(&candidate_id)? else {
                continue;
            };
            if !fields_match(&stored, &f, skip) {
                continue;
            }
            // Union attribute value lists, deduplicated and sorted.
            for (key, values) in f.attributes.iter() {
                for v in values {
                    if !stored.attributes.get(key).is_some_and(|vs| vs.contains(v)) {
                        stored.attributes.append(key, v.clone());
                    }
                }
            }
            stored.attributes.sort_values();
            // Force-merged fields collect every observed value.
            for field in skip {
                let mut union: BTreeSet<String> = field_value(&stored, field)
                    .split(',')
                    .map(str::to_string)
                    .collect();
                union.extend(field_value(&f, field).split(',').map(str::to_string));
                let joined = union.into_iter().collect::<Vec<_>>().join(",");
                set_field_value(&mut stored, field, joined);
            }
            self.run_feature_sql(UPDATE_FEATURE, &stored)??;
            return Ok(());
        }
        self.create_unique(f)
    }

    fn insert_relation(&self, parent: &str, child: &str, level: i64) -> Result<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO relations (parent, child, level) VALUES (?1, ?2, ?3)",
            params![parent, child, level],
        )?;
        Ok(())
    }

    /// GTF relation derivation: child -> transcript (level 1), child ->
    /// gene (level 2), transcript -> gene (level 1), straight from the
    /// `transcript_id`/`gene_id` attributes. Self-edges are skipped.
    fn gtf_relations(&self, f: &Feature, id: &str) -> Result<()> {
        let tid = f.attr_first(&self.opts.transcript_key);
        let gid = f.attr_first(&self.opts.gene_key);
        if let Some(tid) = tid {
            if tid != id {
                self.insert_relation(tid, id, 1)?;
            }
        }
        if let Some(gid) = gid {
            if gid != id {
                let level = match tid {
                    Some(tid) if tid != id && tid != gid => 2,
                    _ => 1,
                };
                self.insert_relation(gid, id, level)?;
            }
            if let Some(tid) = tid {
                if tid != gid {
                    self.insert_relation(gid, tid, 1)?;
                }
            }
        }
        Ok(())
    }

    fn populate(&mut self, reader: &mut GffReader) -> Result<usize> {
        let mut count = 0usize;
        while let Some(item) = reader.next_feature() {
            let mut f = item?;
            let id = self.resolve_id(&f);
            f.id = Some(id.clone());

            let fmt = self.opts.format.unwrap_or(f.dialect.fmt);
            match fmt {
                GffFormat::Gff3 => {
                    for parent in f.attr("Parent") {
                        self.insert_relation(parent, &id, 1)?;
                    }
                }
                GffFormat::Gtf => self.gtf_relations(&f, &id)?,
            }

            self.insert_feature(f, self.opts.merge_strategy)?;
            count += 1;
            if count % 100_000 == 0 {
                info!("{} features imported", count);
            }
        }
        Ok(count)
    }

    fn finish_scratch(&self, scratch: NamedTempFile) -> Result<()> {
        if self.opts.keep_tempfiles {
            let (_, path) = scratch.keep().map_err(|e| GffError::Io(e.error))?;
            info!("retained scratch file {}", path.display());
        }
        // Otherwise the drop removes it, on success and failure alike.
        Ok(())
    }

    /// GFF second pass: level-2 edges as the transitive composition of two
    /// level-1 hops. Pairs are staged in a scratch file so reads and writes
    /// never interleave on the relations table.
    fn relation_closure(&mut self) -> Result<()> {
        let mut scratch = NamedTempFile::new()?;
        {
            let mut stmt = self.conn.prepare(
                "SELECT a.parent, b.child FROM relations a \
                 JOIN relations b ON a.child = b.parent \
                 WHERE a.level = 1 AND b.level = 1 AND a.parent != b.child",
            )?;
            let mut rows = stmt.query([])?;
            while let Some(row) = rows.next()? {
                let parent: String = row.get(0)?;
                let child: String = row.get(1)?;
                writeln!(scratch, "{}\t{}", parent, child)?;
            }
            scratch.flush()?;
        }

        let reader = BufReader::new(scratch.reopen()?);
        let mut stmt = self.conn.prepare(
            "INSERT OR IGNORE INTO relations (parent, child, level) VALUES (?1, ?2, 2)",
        )?;
        for line in reader.lines() {
            let line = line?;
            if let Some((parent, child)) = line.split_once('\t') {
                stmt.execute(params![parent, child])?;
            }
        }
        drop(stmt);
        self.finish_scratch(scratch)
    }

    /// GTF second pass: synthesize transcript/gene features for parents
    /// referenced by relations but absent from the feature table, spanning
    /// their children's extents. Children of one parent are assumed
    /// coordinate-consistent; this is not re-validated.
    fn infer_extents(&mut self) -> Result<()> {
        let mut scratch = NamedTempFile::new()?;
        {
            let mut stmt = self.conn.prepare(
                "SELECT r.parent, f.seqid, f.strand, MIN(f.start), MAX(f.end), \
                        EXISTS(SELECT 1 FROM relations up WHERE up.child = r.parent) \
                 FROM relations r JOIN features f ON r.child = f.id \
                 WHERE r.parent NOT IN (SELECT id FROM features) \
                 GROUP BY r.parent",
            )?;
            let mut rows = stmt.query([])?;
            while let Some(row) = rows.next()? {
                let parent: String = row.get(0)?;
                let seqid: String = row.get(1)?;
                let strand: String = row.get(2)?;
                let start: Option<i64> = row.get(3)?;
                let end: Option<i64> = row.get(4)?;
                let has_parent: bool = row.get(5)?;
                let (Some(start), Some(end)) = (start, end) else {
                    continue;
                };
                writeln!(
                    scratch,
                    "{}\t{}\t{}\t{}\t{}\t{}",
                    parent,
                    seqid,
                    strand,
                    start,
                    end,
                    if has_parent { 1 } else { 0 }
                )?;
            }
            scratch.flush()?;
        }

        let lines: Vec<String> = BufReader::new(scratch.reopen()?)
            .lines()
            .collect::<std::io::Result<_>>()?;
        for line in &lines {
            let fields: Vec<&str> = line.split('\t').collect();
            if fields.len() != 6 {
                continue;
            }
            let (id, seqid, strand) = (fields[0], fields[1], fields[2]);
            let start: i64 = fields[3].parse().unwrap_or(0);
            let end: i64 = fields[4].parse().unwrap_or(0);
            // A missing parent that itself has a parent is a transcript;
            // a root is a gene.
            let is_transcript = fields[5] == "1";
            if is_transcript && self.opts.disable_infer_transcripts {
                continue;
            }
            if !is_transcript && self.opts.disable_infer_genes {
                continue;
            }

            let mut attrs = Attributes::new();
            if is_transcript {
                let gene: Option<String> = self
                    .conn
                    .query_row(
                        "SELECT parent FROM relations WHERE child = ?1 AND level = 1 LIMIT 1",
                        params![id],
                        |row| row.get(0),
                    )
                    .optional()?;
                if let Some(gene) = gene {
                    attrs.set(self.opts.gene_key.clone(), vec![gene]);
                }
                attrs.set(self.opts.transcript_key.clone(), vec![id.to_string()]);
            } else {
                attrs.set(self.opts.gene_key.clone(), vec![id.to_string()]);
            }

            let mut feature = Feature::new(
                seqid,
                DERIVED_SOURCE,
                if is_transcript { "transcript" } else { "gene" },
                Some(start),
                Some(end),
                strand,
                attrs,
                self.dialect.clone(),
            )?;
            feature.id = Some(id.to_string());
            // Multiple passes may reference the same inferred ID, so the
            // configured strategy is overridden with Merge here.
            self.insert_feature(feature, MergeStrategy::Merge)?;
        }
        self.finish_scratch(scratch)
    }

    fn update_relations(&mut self, fmt: GffFormat) -> Result<()> {
        match fmt {
            GffFormat::Gff3 => self.relation_closure(),
            GffFormat::Gtf => self.infer_extents(),
        }
    }

    fn load_autoincrements(&mut self) -> Result<()> {
        let mut stmt = self
            .conn
            .prepare("SELECT base, n FROM autoincrements")?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            self.autoincrements.insert(row.get(0)?, row.get(1)?);
        }
        Ok(())
    }

    /// Mandatory: queries assume the indexes written here exist.
    fn finalize(&mut self, directives: &[String]) -> Result<()> {
        for directive in directives {
            self.conn.execute(
                "INSERT INTO directives (directive) VALUES (?1)",
                params![directive],
            )?;
        }
        self.conn.execute("DELETE FROM meta", [])?;
        self.conn.execute(
            "INSERT INTO meta (version, dialect) VALUES (?1, ?2)",
            params![SCHEMA_VERSION, serde_json::to_string(&self.dialect)?],
        )?;
        for (base, n) in &self.autoincrements {
            self.conn.execute(
                "INSERT OR REPLACE INTO autoincrements (base, n) VALUES (?1, ?2)",
                params![base, n],
            )?;
        }
        self.conn.execute_batch(INDEXES)?;
        self.conn.execute_batch("COMMIT")?;
        Ok(())
    }
}

/// Build a fresh database on `conn` from `reader`.
pub(crate) fn create_into(
    conn: Connection,
    mut reader: GffReader,
    opts: &CreateOptions,
) -> Result<(Connection, Dialect)> {
    validate(opts)?;
    conn.execute_batch("BEGIN")?;
    conn.execute_batch(SCHEMA)?;

    let mut creator = DbCreator::new(&conn, opts);
    let count = creator.populate(&mut reader)?;
    if count == 0 {
        return Err(GffError::EmptyInput);
    }
    info!("imported {} features", count);

    creator.dialect = reader.dialect().cloned().unwrap_or_default();
    let fmt = opts.format.unwrap_or(creator.dialect.fmt);
    creator.update_relations(fmt)?;
    creator.finalize(reader.directives())?;
    let dialect = creator.dialect.clone();
    drop(creator);
    Ok((conn, dialect))
}

/// Import additional data into an existing database, continuing its
/// persisted autoincrement sequences.
pub(crate) fn update_into(
    conn: &Connection,
    dialect: &Dialect,
    reader: GffReader,
    opts: &CreateOptions,
) -> Result<()> {
    validate(opts)?;
    conn.execute_batch("BEGIN")?;
    match run_update(conn, dialect, reader, opts) {
        Ok(()) => Ok(()),
        Err(e) => {
            // The caller's connection stays live after a failed update:
            // without a rollback the partial import remains visible and a
            // retry's BEGIN would nest.
            if conn.execute_batch("ROLLBACK").is_err() {
                warn!("rollback after failed update did not complete");
            }
            Err(e)
        }
    }
}

fn run_update(
    conn: &Connection,
    dialect: &Dialect,
    mut reader: GffReader,
    opts: &CreateOptions,
) -> Result<()> {
    let mut creator = DbCreator::new(conn, opts);
    creator.dialect = dialect.clone();
    creator.load_autoincrements()?;
    let count = creator.populate(&mut reader)?;
    if count == 0 {
        return Err(GffError::EmptyInput);
    }

    let fmt = opts
        .format
        .unwrap_or_else(|| reader.dialect().map(|d| d.fmt).unwrap_or(dialect.fmt));
    creator.update_relations(fmt)?;
    creator.finalize(reader.directives())
}
