#![allow(clippy::too_many_arguments)]

//! gffdb: a dialect-preserving GFF3/GTF annotation database.
//!
//! This library parses annotation files into normalized features, stores
//! them with their parent/child relationships in an embedded SQLite
//! database, and answers hierarchy and interval queries over the result.
//!
//! # Features
//!
//! - **Dialect inference**: real-world GFF/GTF attribute formatting
//!   variants are detected and preserved, so records round-trip
//!   byte-for-byte.
//! - **Hierarchy storage**: explicit `Parent` pointers (GFF3) or
//!   `gene_id`/`transcript_id` attributes (GTF) become queryable
//!   parent/child relations, with missing gene/transcript extents inferred.
//! - **Spatial binning**: UCSC-style bins make overlap and nearest-feature
//!   queries cheap.
//!
//! # Example
//!
//! ```rust,no_run
//! use gffdb::{CreateOptions, FeatureDb, GffReader, IdSpec};
//!
//! let reader = GffReader::from_path("annotation.gff3").unwrap();
//! let opts = CreateOptions {
//!     id_spec: IdSpec::Key("ID".to_string()),
//!     ..Default::default()
//! };
//! let db = FeatureDb::create("annotation.db", reader, opts).unwrap();
//!
//! for exon in db.children("gene1", 2, Some("exon")).unwrap() {
//!     println!("{}", exon);
//! }
//! ```

pub mod attributes;
pub mod bins;
pub mod db;
pub mod error;
pub mod feature;
pub mod ops;
pub mod reader;

// Re-export commonly used types
pub use attributes::{Attributes, Dialect, GffFormat};
pub use db::{
    Anchor, CreateOptions, FeatureDb, IdResolution, IdSpec, MergeStrategy, NearestOptions,
};
pub use error::{GffError, Result};
pub use feature::Feature;
pub use reader::GffReader;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::attributes::{Attributes, Dialect, GffFormat};
    pub use crate::db::{Anchor, CreateOptions, FeatureDb, IdSpec, MergeStrategy, NearestOptions};
    pub use crate::error::{GffError, Result};
    pub use crate::feature::Feature;
    pub use crate::ops::{interfeatures, merge_overlapping, next_frame};
    pub use crate::reader::GffReader;
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_basic_workflow() {
        use crate::db::{CreateOptions, FeatureDb, IdSpec};
        use crate::reader::GffReader;

        let content = "\
chr1\thavana\tgene\t100\t500\t.\t+\t.\tID=g1\n\
chr1\thavana\tmRNA\t100\t500\t.\t+\t.\tID=t1;Parent=g1\n\
chr1\thavana\texon\t100\t200\t.\t+\t.\tID=e1;Parent=t1\n";
        let opts = CreateOptions {
            id_spec: IdSpec::Key("ID".to_string()),
            ..Default::default()
        };
        let db = FeatureDb::create_in_memory(GffReader::from_text(content), opts).unwrap();

        assert_eq!(db.count_features_of_type(None).unwrap(), 3);
        let exons = db.children("g1", 2, Some("exon")).unwrap();
        assert_eq!(exons.len(), 1);
        assert_eq!(exons[0].id.as_deref(), Some("e1"));
    }
}
