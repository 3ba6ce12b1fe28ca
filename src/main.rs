//! gffdb: GFF3/GTF annotation database tool
//!
//! Usage: gffdb <COMMAND> [OPTIONS]

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;

use gffdb::db::{CreateOptions, FeatureDb, IdSpec, MergeStrategy};
use gffdb::error::{GffError, Result};
use gffdb::reader::GffReader;

#[derive(Parser)]
#[command(name = "gffdb")]
#[command(version)]
#[command(about = "gffdb: build and query GFF3/GTF annotation databases", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Import a GFF3/GTF file into a new database
    Create {
        /// Input annotation file
        input: PathBuf,

        /// Output database file
        #[arg(short, long)]
        output: PathBuf,

        /// Attribute key(s) to derive feature IDs from (comma-separated,
        /// first hit wins); autoincrement per featuretype when omitted
        #[arg(long)]
        id_spec: Option<String>,

        /// Duplicate-ID policy: error, warning, replace, create_unique, merge
        #[arg(long, default_value = "error")]
        merge_strategy: String,

        /// Fields excused from merge comparisons (comma-separated)
        #[arg(long)]
        force_merge_fields: Option<String>,

        /// Do not synthesize missing transcript features (GTF)
        #[arg(long)]
        disable_infer_transcripts: bool,

        /// Do not synthesize missing gene features (GTF)
        #[arg(long)]
        disable_infer_genes: bool,

        /// Overwrite an existing database file
        #[arg(short, long)]
        force: bool,

        /// Lines to peek for dialect inference
        #[arg(long, default_value = "10")]
        checklines: usize,
    },

    /// Print database summary: feature counts per type and directives
    Info {
        /// Database file
        db: PathBuf,
    },

    /// Print children of a feature
    Children {
        /// Database file
        db: PathBuf,

        /// Parent feature ID
        id: String,

        /// Relation level (1 = direct, 2 = grandchildren)
        #[arg(long, default_value = "1")]
        level: i64,

        /// Restrict to one featuretype
        #[arg(long)]
        featuretype: Option<String>,
    },

    /// Print parents of a feature
    Parents {
        /// Database file
        db: PathBuf,

        /// Child feature ID
        id: String,

        /// Relation level (1 = direct, 2 = grandparents)
        #[arg(long, default_value = "1")]
        level: i64,

        /// Restrict to one featuretype
        #[arg(long)]
        featuretype: Option<String>,
    },

    /// Print features overlapping a region
    Region {
        /// Database file
        db: PathBuf,

        /// Region as chrom:start-end (1-based, inclusive)
        region: String,

        /// Restrict to one strand (+, - or .)
        #[arg(long)]
        strand: Option<String>,

        /// Restrict to one featuretype
        #[arg(long)]
        featuretype: Option<String>,

        /// Only report features fully contained in the region
        #[arg(long)]
        completely_within: bool,
    },

    /// Print introns derived from the gaps between exons
    Introns {
        /// Database file
        db: PathBuf,

        /// Featuretype of the exon-level features
        #[arg(long, default_value = "exon")]
        exon_featuretype: String,

        /// Group via this gene-level featuretype (default)
        #[arg(long)]
        grandparent: Option<String>,

        /// Group via this transcript-level featuretype instead
        #[arg(long)]
        parent: Option<String>,
    },
}

/// Parse a `chrom:start-end` region string.
fn parse_region(s: &str) -> Result<(String, i64, i64)> {
    let err = || {
        GffError::InvalidConfig(format!(
            "invalid region {:?}, expected chrom:start-end",
            s
        ))
    };
    let (chrom, span) = s.rsplit_once(':').ok_or_else(err)?;
    let (start, end) = span.split_once('-').ok_or_else(err)?;
    let start: i64 = start.parse().map_err(|_| err())?;
    let end: i64 = end.parse().map_err(|_| err())?;
    Ok((chrom.to_string(), start, end))
}

fn parse_id_spec(spec: Option<String>) -> IdSpec {
    match spec {
        None => IdSpec::Auto,
        Some(s) => {
            let keys: Vec<String> = s.split(',').map(str::to_string).collect();
            if keys.len() == 1 {
                IdSpec::Key(keys.into_iter().next().unwrap_or_default())
            } else {
                IdSpec::Keys(keys)
            }
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Create {
            input,
            output,
            id_spec,
            merge_strategy,
            force_merge_fields,
            disable_infer_transcripts,
            disable_infer_genes,
            force,
            checklines,
        } => {
            let strategy = MergeStrategy::parse(&merge_strategy).ok_or_else(|| {
                GffError::InvalidConfig(format!("unknown merge strategy {:?}", merge_strategy))
            })?;
            let opts = CreateOptions {
                id_spec: parse_id_spec(id_spec),
                merge_strategy: strategy,
                force_merge_fields: force_merge_fields
                    .map(|s| s.split(',').map(str::to_string).collect())
                    .unwrap_or_default(),
                disable_infer_transcripts,
                disable_infer_genes,
                force,
                ..Default::default()
            };
            let reader = GffReader::from_path(&input)?.with_checklines(checklines);
            let db = FeatureDb::create(&output, reader, opts)?;
            eprintln!(
                "{}: {} features",
                output.display(),
                db.count_features_of_type(None)?
            );
        }

        Commands::Info { db } => {
            let db = FeatureDb::open(db)?;
            println!("schema version: {}", db.version());
            for directive in db.directives()? {
                println!("directive: {}", directive);
            }
            for featuretype in db.featuretypes()? {
                let count = db.count_features_of_type(Some(&featuretype))?;
                println!("{}\t{}", featuretype, count);
            }
        }

        Commands::Children {
            db,
            id,
            level,
            featuretype,
        } => {
            let db = FeatureDb::open(db)?;
            for f in db.children(&id, level, featuretype.as_deref())? {
                println!("{}", f);
            }
        }

        Commands::Parents {
            db,
            id,
            level,
            featuretype,
        } => {
            let db = FeatureDb::open(db)?;
            for f in db.parents(&id, level, featuretype.as_deref())? {
                println!("{}", f);
            }
        }

        Commands::Region {
            db,
            region,
            strand,
            featuretype,
            completely_within,
        } => {
            let db = FeatureDb::open(db)?;
            let (chrom, start, end) = parse_region(&region)?;
            let features = db.region(
                &chrom,
                start,
                end,
                strand.as_deref(),
                featuretype.as_deref(),
                completely_within,
            )?;
            for f in features {
                println!("{}", f);
            }
        }

        Commands::Introns {
            db,
            exon_featuretype,
            grandparent,
            parent,
        } => {
            let db = FeatureDb::open(db)?;
            let introns = db.create_introns(
                &exon_featuretype,
                grandparent.as_deref(),
                parent.as_deref(),
                None,
            )?;
            for f in introns {
                println!("{}", f);
            }
        }
    }
    Ok(())
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        eprintln!("error: {}", e);
        process::exit(1);
    }
}
