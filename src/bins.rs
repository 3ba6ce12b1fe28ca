//! UCSC-style hierarchical spatial binning.
//!
//! Maps a coordinate interval onto a fixed hierarchy of genomic bins
//! (Kent et al., "The Human Genome Browser at UCSC", Fig. 7). The finest
//! bins are 2^17 bp wide and each coarser level groups 8 bins of the level
//! below. Features are assigned the single smallest bin that contains them;
//! region queries expand a query interval into the set of bins any
//! overlapping feature could have been assigned to.

use std::collections::BTreeSet;

/// Maximum supported chromosome size. Coordinates at or beyond this fall
/// back to the whole-chromosome bin.
pub const MAX_CHROM_SIZE: i64 = 1 << 29;

/// log2 of the smallest bin size (2^17 = 131072 bp).
const FIRST_SHIFT: u32 = 17;

/// log2 of the fan-out between adjacent levels (8 bins per parent).
const NEXT_SHIFT: u32 = 3;

/// Cumulative bin-count offsets, finest level first.
const OFFSETS: [u32; 5] = [4681, 585, 73, 9, 1];

/// Coordinate convention of the interval handed to the binner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coords {
    /// 1-based, closed intervals (GFF/GTF).
    Gff,
    /// 0-based, half-open intervals (BED).
    Bed,
}

/// Shift an interval into canonical 0-based bin space, or `None` when the
/// coordinates are outside the binnable range.
fn canonical(start: i64, end: i64, coords: Coords) -> Option<(u32, u32)> {
    if start < 0 || end < 0 || start >= MAX_CHROM_SIZE || end >= MAX_CHROM_SIZE {
        return None;
    }
    let start = match coords {
        Coords::Gff => (start - 1).max(0),
        Coords::Bed => start,
    };
    Some(((start >> FIRST_SHIFT) as u32, (end >> FIRST_SHIFT) as u32))
}

/// Return the single smallest bin fully containing `[start, end]`.
///
/// Out-of-range coordinates (negative, or >= 2^29) return bin 1, the
/// whole-chromosome catch-all. That is a deliberate lossy fallback so that
/// malformed or oversized records still land somewhere queryable.
pub fn bin(start: i64, end: i64, coords: Coords) -> u32 {
    let Some((mut s, mut e)) = canonical(start, end, coords) else {
        return 1;
    };
    for offset in OFFSETS {
        if s == e {
            return offset + s;
        }
        s >>= NEXT_SHIFT;
        e >>= NEXT_SHIFT;
    }
    1
}

/// Return every bin, at every level, that `[start, end]` spans.
///
/// Always includes bin 1. This is the candidate set used as a pre-filter
/// for overlap queries: any feature overlapping the interval must carry one
/// of these bins.
pub fn bins(start: i64, end: i64, coords: Coords) -> Vec<u32> {
    let mut out = BTreeSet::new();
    out.insert(1);
    if let Some((mut s, mut e)) = canonical(start, end, coords) {
        for offset in OFFSETS {
            for b in (offset + s)..=(offset + e) {
                out.insert(b);
            }
            s >>= NEXT_SHIFT;
            e >>= NEXT_SHIFT;
        }
    }
    out.into_iter().collect()
}
