//! Property-based testing for ChronoVault
//!
//! Uses proptest to check the delta codec, the retention ring and slot naming
//! across randomly generated inputs.

use ::chronovault::delta::{apply_delta, apply_delta_verified, build_delta, build_signature};
use ::chronovault::ring::{next_after_resume, RetentionRing};
use ::chronovault::slot::{format_slot_name, parse_slot_name};
use ::chronovault::ArtifactCodec;
use chrono::{Local, TimeZone};
use proptest::prelude::*;
use std::path::Path;

/// Edits applied to a basis to derive a related target
#[derive(Debug, Clone)]
pub enum Edit {
    Insert { at: usize, bytes: Vec<u8> },
    Delete { at: usize, len: usize },
    Overwrite { at: usize, bytes: Vec<u8> },
}

fn edit_strategy() -> impl Strategy<Value = Edit> {
    prop_oneof![
        (any::<usize>(), prop::collection::vec(any::<u8>(), 1..300))
            .prop_map(|(at, bytes)| Edit::Insert { at, bytes }),
        (any::<usize>(), 1usize..2_000).prop_map(|(at, len)| Edit::Delete { at, len }),
        (any::<usize>(), prop::collection::vec(any::<u8>(), 1..100))
            .prop_map(|(at, bytes)| Edit::Overwrite { at, bytes }),
    ]
}

fn apply_edits(basis: &[u8], edits: &[Edit]) -> Vec<u8> {
    let mut out = basis.to_vec();
    for edit in edits {
        let pos = |at: usize, len: usize| if len == 0 { 0 } else { at % (len + 1) };
        match edit {
            Edit::Insert { at, bytes } => {
                let at = pos(*at, out.len());
                out.splice(at..at, bytes.iter().copied());
            }
            Edit::Delete { at, len } => {
                let at = pos(*at, out.len());
                let end = (at + len).min(out.len());
                out.drain(at..end);
            }
            Edit::Overwrite { at, bytes } => {
                let at = pos(*at, out.len());
                for (i, b) in bytes.iter().enumerate() {
                    match out.get_mut(at + i) {
                        Some(slot) => *slot = *b,
                        None => out.push(*b),
                    }
                }
            }
        }
    }
    out
}

/// Basis content: empty, tiny, or spanning several blocks
fn basis_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop_oneof![
        Just(Vec::new()),
        prop::collection::vec(any::<u8>(), 1..64),
        prop::collection::vec(any::<u8>(), 1_000..12_000),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_delta_reproduces_edited_target(
        basis in basis_strategy(),
        edits in prop::collection::vec(edit_strategy(), 0..6),
    ) {
        let target = apply_edits(&basis, &edits);
        let delta = build_delta(&target, &build_signature(&basis));

        prop_assert_eq!(apply_delta(&basis, &delta).unwrap(), target.clone());
        prop_assert_eq!(apply_delta_verified(&basis, &delta).unwrap(), target);
    }

    #[test]
    fn prop_delta_reproduces_unrelated_target(
        basis in basis_strategy(),
        target in basis_strategy(),
    ) {
        let delta = build_delta(&target, &build_signature(&basis));
        prop_assert_eq!(apply_delta(&basis, &delta).unwrap(), target);
    }

    #[test]
    fn prop_identical_content_needs_no_literals(
        content in prop::collection::vec(any::<u8>(), 1_000..20_000),
    ) {
        let delta = build_delta(&content, &build_signature(&content));
        prop_assert_eq!(delta.literal_bytes(), 0);
        prop_assert_eq!(delta.copy_bytes(), content.len() as u64);
    }

    #[test]
    fn prop_encoded_delta_survives_artifact_codec(
        basis in basis_strategy(),
        edits in prop::collection::vec(edit_strategy(), 1..4),
    ) {
        let codec = ArtifactCodec::default();
        let target = apply_edits(&basis, &edits);
        let delta = build_delta(&target, &build_signature(&basis));

        let bytes = codec.encode_delta(&delta).unwrap();
        let decoded = codec.decode_delta(&bytes, Path::new("p.delta")).unwrap();
        prop_assert_eq!(apply_delta(&basis, &decoded).unwrap(), target);
    }

    #[test]
    fn prop_ring_visits_every_index_in_order(max in 1u32..40, steps in 1usize..200) {
        let mut ring = RetentionRing::new(max);
        let mut seen = vec![ring.current()];
        for _ in 0..steps {
            seen.push(ring.advance());
        }
        for (i, index) in seen.iter().enumerate() {
            prop_assert_eq!(*index, (i as u32 % max) + 1);
        }
    }

    #[test]
    fn prop_resume_stays_in_range(highest in 0u32..100, max in 1u32..50) {
        let next = next_after_resume(highest.min(max), max);
        prop_assert!((1..=max).contains(&next));
    }

    #[test]
    fn prop_slot_names_parse_back(
        index in 1u32..10_000,
        day in 1u32..=28,
        month in 1u32..=12,
        hour in 0u32..24,
        minute in 0u32..60,
    ) {
        let Some(at) = Local.with_ymd_and_hms(2024, month, day, hour, minute, 0).single() else {
            return Ok(());
        };
        let name = format_slot_name(index, &at);
        let parsed = parse_slot_name(&name).unwrap();
        prop_assert_eq!(parsed.index, index);
        prop_assert_eq!(parsed.created_at, Some(at.naive_local()));
    }
}
