//! In-memory derived-feature operations: merging overlapping features,
//! constructing interfeature gaps, and CDS frame bookkeeping.
//!
//! These operate on fully materialized feature slices and never touch
//! storage; callers persist results explicitly if they want them kept.

use std::collections::BTreeSet;

use crate::attributes::Attributes;
use crate::error::{GffError, Result};
use crate::feature::Feature;

/// Source tag stamped onto synthesized features.
pub const DERIVED_SOURCE: &str = "gffdb_derived";

fn require_coords(f: &Feature) -> Result<(i64, i64)> {
    match (f.start, f.end) {
        (Some(s), Some(e)) => Ok((s, e)),
        _ => Err(GffError::InconsistentInput(format!(
            "feature {} has no coordinates",
            f.id.as_deref().unwrap_or(&f.featuretype)
        ))),
    }
}

/// Greedily merge overlapping or book-ended features.
///
/// Input must be fully materialized, on a single chromosome, and pre-sorted
/// by start; a running `[start, end]` window is extended while the next
/// feature starts at or before `end + 1`. Strands must agree unless
/// `ignore_strand` is set, in which case merged features carry strand `.`.
///
/// The merged featuretype is a deterministic composition of all
/// contributing types: sorted, deduplicated, underscore-joined, prefixed
/// `merged_`. Results are not persisted.
pub fn merge_overlapping(features: &[Feature], ignore_strand: bool) -> Result<Vec<Feature>> {
    let Some(first) = features.first() else {
        return Ok(Vec::new());
    };
    let seqid = &first.seqid;
    let strand = &first.strand;
    for f in features {
        if f.seqid != *seqid {
            return Err(GffError::InconsistentInput(format!(
                "cannot merge features on different chromosomes ({} vs {})",
                seqid, f.seqid
            )));
        }
        if !ignore_strand && f.strand != *strand {
            return Err(GffError::InconsistentInput(format!(
                "cannot merge features on different strands ({} vs {}); \
                 pass ignore_strand to override",
                strand, f.strand
            )));
        }
    }

    let merged_strand = if ignore_strand { "." } else { strand.as_str() };
    let mut out = Vec::new();
    let (mut cur_start, mut cur_end) = require_coords(first)?;
    let mut types: BTreeSet<String> = BTreeSet::new();
    types.insert(first.featuretype.clone());

    let flush = |start: i64, end: i64, types: &BTreeSet<String>| -> Result<Feature> {
        let name = format!(
            "merged_{}",
            types.iter().cloned().collect::<Vec<_>>().join("_")
        );
        Feature::new(
            seqid.clone(),
            DERIVED_SOURCE,
            name,
            Some(start),
            Some(end),
            merged_strand,
            Attributes::new(),
            first.dialect.clone(),
        )
    };

    for f in &features[1..] {
        let (start, end) = require_coords(f)?;
        if start < cur_start {
            return Err(GffError::InconsistentInput(
                "features must be sorted by start before merging".to_string(),
            ));
        }
        if start <= cur_end + 1 {
            cur_end = cur_end.max(end);
            types.insert(f.featuretype.clone());
        } else {
            out.push(flush(cur_start, cur_end, &types)?);
            cur_start = start;
            cur_end = end;
            types.clear();
            types.insert(f.featuretype.clone());
        }
    }
    out.push(flush(cur_start, cur_end, &types)?);
    Ok(out)
}

/// Yield the gaps between consecutive features.
///
/// For N sorted input features this produces the up-to-N-1 interfeature
/// regions, each spanning `prev.end + 1 ..= next.start - 1`. Adjacent pairs
/// must agree on chromosome and strand; a mismatch is a caller error, not
/// silently coerced. Book-ended or overlapping neighbors leave no gap and
/// are skipped. Each gap's featuretype is `inter_<prevtype>_<nexttype>`
/// unless `new_featuretype` overrides it, and its attributes are the union
/// of the flanking features' attributes.
pub fn interfeatures(
    features: &[Feature],
    new_featuretype: Option<&str>,
) -> Result<Vec<Feature>> {
    let mut out = Vec::new();
    for pair in features.windows(2) {
        let (prev, next) = (&pair[0], &pair[1]);
        if prev.seqid != next.seqid {
            return Err(GffError::InconsistentInput(format!(
                "interfeature neighbors on different chromosomes ({} vs {})",
                prev.seqid, next.seqid
            )));
        }
        if prev.strand != next.strand {
            return Err(GffError::InconsistentInput(format!(
                "interfeature neighbors on different strands ({} vs {})",
                prev.strand, next.strand
            )));
        }
        let (_, prev_end) = require_coords(prev)?;
        let (next_start, _) = require_coords(next)?;
        let (start, end) = (prev_end + 1, next_start - 1);
        if start > end {
            continue;
        }

        let featuretype = match new_featuretype {
            Some(t) => t.to_string(),
            None => format!("inter_{}_{}", prev.featuretype, next.featuretype),
        };
        let mut attrs = Attributes::new();
        for source in [prev, next] {
            for (key, values) in source.attributes.iter() {
                for v in values {
                    if !attrs.get(key).is_some_and(|vs| vs.contains(v)) {
                        attrs.append(key, v.clone());
                    }
                }
            }
        }
        out.push(Feature::new(
            prev.seqid.clone(),
            DERIVED_SOURCE,
            featuretype,
            Some(start),
            Some(end),
            prev.strand.clone(),
            attrs,
            prev.dialect.clone(),
        )?);
    }
    Ok(out)
}

/// Frame of the next coding segment given the current segment's length and
/// frame: `(3 - (len - frame) % 3) % 3`.
///
/// Traversal direction is strand-dependent; callers walk CDS segments
/// 5' to 3'.
pub fn next_frame(segment_len: i64, frame: i64) -> i64 {
    (3 - (segment_len - frame).rem_euclid(3)).rem_euclid(3)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::Dialect;

    fn feat(seqid: &str, ftype: &str, start: i64, end: i64, strand: &str) -> Feature {
        Feature::new(
            seqid,
            "test",
            ftype,
            Some(start),
            Some(end),
            strand,
            Attributes::new(),
            Dialect::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_merge_overlapping_basic() {
        let fs = vec![
            feat("chr1", "exon", 100, 200, "+"),
            feat("chr1", "exon", 150, 250, "+"),
            feat("chr1", "exon", 300, 400, "+"),
        ];
        let merged = merge_overlapping(&fs, false).unwrap();
        assert_eq!(merged.len(), 2);
        assert_eq!((merged[0].start, merged[0].end), (Some(100), Some(250)));
        assert_eq!((merged[1].start, merged[1].end), (Some(300), Some(400)));
        assert_eq!(merged[0].featuretype, "merged_exon");
        assert_eq!(merged[0].strand, "+");
    }

    #[test]
    fn test_merge_book_ended() {
        // next.start == cur.end + 1 still merges.
        let fs = vec![
            feat("chr1", "exon", 100, 200, "+"),
            feat("chr1", "exon", 201, 300, "+"),
        ];
        let merged = merge_overlapping(&fs, false).unwrap();
        assert_eq!(merged.len(), 1);
        assert_eq!((merged[0].start, merged[0].end), (Some(100), Some(300)));
    }

    #[test]
    fn test_merge_type_composition_sorted_and_deduped() {
        let fs = vec![
            feat("chr1", "exon", 100, 200, "+"),
            feat("chr1", "CDS", 150, 250, "+"),
            feat("chr1", "exon", 200, 260, "+"),
        ];
        let merged = merge_overlapping(&fs, false).unwrap();
        assert_eq!(merged[0].featuretype, "merged_CDS_exon");
    }

    #[test]
    fn test_merge_strand_mismatch_is_error() {
        let fs = vec![
            feat("chr1", "exon", 100, 200, "+"),
            feat("chr1", "exon", 150, 250, "-"),
        ];
        assert!(merge_overlapping(&fs, false).is_err());
        let merged = merge_overlapping(&fs, true).unwrap();
        assert_eq!(merged[0].strand, ".");
    }

    #[test]
    fn test_merge_chromosome_mismatch_is_error() {
        let fs = vec![
            feat("chr1", "exon", 100, 200, "+"),
            feat("chr2", "exon", 150, 250, "+"),
        ];
        assert!(merge_overlapping(&fs, false).is_err());
    }

    #[test]
    fn test_merge_unsorted_is_error() {
        let fs = vec![
            feat("chr1", "exon", 300, 400, "+"),
            feat("chr1", "exon", 100, 200, "+"),
        ];
        assert!(merge_overlapping(&fs, false).is_err());
    }

    #[test]
    fn test_merge_empty() {
        assert!(merge_overlapping(&[], false).unwrap().is_empty());
    }

    #[test]
    fn test_interfeatures_gaps() {
        let fs = vec![
            feat("chr1", "exon", 100, 200, "+"),
            feat("chr1", "exon", 301, 400, "+"),
            feat("chr1", "exon", 501, 600, "+"),
        ];
        let gaps = interfeatures(&fs, Some("intron")).unwrap();
        assert_eq!(gaps.len(), 2);
        assert_eq!((gaps[0].start, gaps[0].end), (Some(201), Some(300)));
        assert_eq!((gaps[1].start, gaps[1].end), (Some(401), Some(500)));
        assert!(gaps.iter().all(|g| g.featuretype == "intron"));
    }

    #[test]
    fn test_interfeatures_default_featuretype() {
        let fs = vec![
            feat("chr1", "gene", 100, 200, "+"),
            feat("chr1", "mRNA", 301, 400, "+"),
        ];
        let gaps = interfeatures(&fs, None).unwrap();
        assert_eq!(gaps[0].featuretype, "inter_gene_mRNA");
    }

    #[test]
    fn test_interfeatures_merges_flanking_attributes() {
        let mut a = feat("chr1", "exon", 100, 200, "+");
        a.attributes.set("Parent", vec!["t1".to_string()]);
        a.attributes.set("tag", vec!["left".to_string()]);
        let mut b = feat("chr1", "exon", 301, 400, "+");
        b.attributes.set("Parent", vec!["t1".to_string()]);
        b.attributes.set("tag", vec!["right".to_string()]);
        let gaps = interfeatures(&[a, b], Some("intron")).unwrap();
        assert_eq!(gaps[0].attr("Parent"), ["t1"]);
        assert_eq!(gaps[0].attr("tag"), ["left", "right"]);
    }

    #[test]
    fn test_interfeatures_strand_mismatch_is_error() {
        let fs = vec![
            feat("chr1", "exon", 100, 200, "+"),
            feat("chr1", "exon", 301, 400, "-"),
        ];
        assert!(interfeatures(&fs, None).is_err());
    }

    #[test]
    fn test_interfeatures_skips_book_ended_neighbors() {
        let fs = vec![
            feat("chr1", "exon", 100, 200, "+"),
            feat("chr1", "exon", 201, 300, "+"),
        ];
        assert!(interfeatures(&fs, None).unwrap().is_empty());
    }

    #[test]
    fn test_next_frame_rollover() {
        // Segment of 100 bp starting in frame 0: 100 % 3 == 1 used, so the
        // next segment starts 2 into a codon.
        assert_eq!(next_frame(100, 0), 2);
        assert_eq!(next_frame(99, 0), 0);
        assert_eq!(next_frame(98, 0), 1);
        assert_eq!(next_frame(100, 2), 1);
        // Frame state cycles with period 3 over segment length.
        for frame in 0..3 {
            assert_eq!(next_frame(30, frame), next_frame(33, frame));
        }
    }
}
