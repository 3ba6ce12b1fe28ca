//! Round-trip invariance fixtures for the attribute dialect parser.
//!
//! Every string accepted in non-ambiguous form must survive
//! `reconstruct(split(s))` byte-for-byte. The known-lossy cases are pinned
//! separately with their documented acceptable reconstructions.

use gffdb::attributes::{reconstruct, split_keyvals, GffFormat};
use gffdb::feature::Feature;

/// Attribute strings from a dozen real-world GFF/GTF variants.
const EXACT_FIXTURES: &[&str] = &[
    // GFF3, plain
    "ID=gene1",
    "ID=gene1;Name=abc",
    "ID=gene1;Name=abc;",
    // GFF3, comma multi-values
    "ID=gene1;Alias=a,b,c",
    "Parent=t1,t2,t3",
    // GFF3, bare keys
    "ID=gene1;pseudo",
    "ID=gene1;pseudo;",
    // GTF, canonical
    "gene_id \"g1\"; transcript_id \"t1\";",
    "gene_id \"g1\"; transcript_id \"t1\"",
    // GTF, spaced field separator
    "gene_id \"g1\" ; transcript_id \"t1\"",
    // GFF2, unquoted values
    "gene_id g1; transcript_id t1",
    // GFF3 with spaced separators
    "ID=g1; Name=x",
    // Leading stray semicolon
    ";gene_id \"g1\"; n \"1\"",
    // Repeated keys with free-text commas
    "tag \"a\"; tag \"b\"; note \"one, two\"",
    // Single attribute, no separator evidence
    "gene_id \"g1\"",
];

#[test]
fn attribute_strings_roundtrip_exactly() {
    for fixture in EXACT_FIXTURES {
        let (attrs, dialect) = split_keyvals(fixture, None).unwrap();
        assert_eq!(
            reconstruct(&attrs, &dialect),
            *fixture,
            "round trip of {:?}",
            fixture
        );
    }
}

/// Documented acceptable reconstructions: inputs whose regenerated form
/// differs, paired with the accepted alternate.
const LOSSY_FIXTURES: &[(&str, &str)] = &[
    // Unquoted scalar in an otherwise-quoted line comes back quoted.
    (
        "gene_id \"g1\"; exon_number 2",
        "gene_id \"g1\"; exon_number \"2\"",
    ),
    // Stray whitespace before a bare `;` separator is normalized away.
    ("ID=g1 ;Name=x", "ID=g1;Name=x"),
];

#[test]
fn lossy_fixtures_reconstruct_to_documented_alternates() {
    for (input, accepted) in LOSSY_FIXTURES {
        let (attrs, dialect) = split_keyvals(input, None).unwrap();
        assert_eq!(
            reconstruct(&attrs, &dialect),
            *accepted,
            "acceptable reconstruction of {:?}",
            input
        );
    }
}

#[test]
fn full_lines_roundtrip_unmodified() {
    let lines = [
        "chr1\thavana\tgene\t100\t200\t.\t+\t.\tID=g1;Name=abc",
        "chr1\ta\ttesting\t1\t10\t.\t+\t.\tgene_id \"fake\"; n \"2\";",
        "chr1\t.\tcontig\t.\t.\t.\t.\t.\tID=c1",
        "chr1\t.\tgene\t1\t5\t0.9\t-\t2\tID=g1\textra1\textra2",
    ];
    for line in lines {
        let f = Feature::from_line(line, None).unwrap();
        assert_eq!(f.to_string(), line, "round trip of {:?}", line);
    }
}

#[test]
fn format_detection_matches_fixture_families() {
    let (_, d) = split_keyvals("ID=gene1;Name=abc", None).unwrap();
    assert_eq!(d.fmt, GffFormat::Gff3);
    let (_, d) = split_keyvals("gene_id \"g1\"; transcript_id \"t1\";", None).unwrap();
    assert_eq!(d.fmt, GffFormat::Gtf);
}
