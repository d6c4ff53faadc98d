//! Seeded property tests for the row-key codec and the skip-scan planner.
//!
//! Every test draws random schemas, values and predicates from a fixed seed so
//! failures reproduce. The skip-scan checks compare a real scan over a
//! `MemTable` with a brute-force evaluation of the same per-slot ranges.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::ops::Bound;
use std::sync::Arc;

use holo_kv::{KvTable, MemTable, Mutation, ScanRequest};
use holo_scan::{
    ColumnType, Datum, KeyRange, RowKeySchema, ScanKind, ScanRanges, SlotDescriptor, SortOrder,
};
use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

const SEED: u64 = 0x5eed_5ca1;

fn random_slot(rng: &mut SmallRng, idx: usize) -> SlotDescriptor {
    let column_type = match rng.gen_range(0..3) {
        0 => ColumnType::Utf8,
        1 => ColumnType::Int64,
        _ => ColumnType::FixedBinary(2),
    };
    let name = format!("c{idx}");
    if rng.gen_bool(0.5) {
        SlotDescriptor::asc(name, column_type)
    } else {
        SlotDescriptor::desc(name, column_type)
    }
}

fn random_schema(rng: &mut SmallRng, max_slots: usize) -> RowKeySchema {
    let slots = rng.gen_range(1..=max_slots);
    let mut descriptors = (0..slots)
        .map(|idx| random_slot(rng, idx))
        .collect::<Vec<_>>();
    // Raw may only close the key, ascending.
    if rng.gen_bool(0.3) {
        descriptors[slots - 1] = SlotDescriptor::asc(format!("c{}", slots - 1), ColumnType::Raw);
    }
    RowKeySchema::new(descriptors).expect("schema")
}

/// Small value domain per type, in ascending value order, with embedded zero
/// and 0xFF bytes to stress escaping. Raw values extend one another since a
/// raw tail has no terminator; the empty raw value is left out because it
/// encodes the same as an absent slot.
fn domain(column_type: ColumnType) -> Vec<Datum> {
    match column_type {
        ColumnType::Raw => [
            b"\x00".to_vec(),
            b"\x00\xFF".to_vec(),
            b"a".to_vec(),
            b"a\x00".to_vec(),
            b"ab".to_vec(),
            b"abc".to_vec(),
            b"b".to_vec(),
        ]
        .into_iter()
        .map(Datum::Binary)
        .collect(),
        ColumnType::Utf8 => ["", "\u{0}", "a", "a\u{0}", "a\u{0}b", "ab", "b"]
            .iter()
            .map(|s| Datum::utf8(*s))
            .collect(),
        ColumnType::Int64 => [-5i64, -1, 0, 1, 7].iter().map(|v| Datum::Int64(*v)).collect(),
        _ => [[0u8, 0], [0, 1], [0, 0xFF], [1, 0], [0xFF, 0xFF]]
            .iter()
            .map(|v| Datum::Binary(v.to_vec()))
            .collect(),
    }
}

fn cmp_values(left: &Datum, right: &Datum) -> Ordering {
    match (left, right) {
        (Datum::Utf8(l), Datum::Utf8(r)) => l.as_bytes().cmp(r.as_bytes()),
        (Datum::Int64(l), Datum::Int64(r)) => l.cmp(r),
        (Datum::Binary(l), Datum::Binary(r)) => l.cmp(r),
        _ => panic!("mixed datum types {left:?} / {right:?}"),
    }
}

fn cmp_tuples(schema: &RowKeySchema, left: &[Datum], right: &[Datum]) -> Ordering {
    for (idx, (l, r)) in left.iter().zip(right).enumerate() {
        let mut ord = cmp_values(l, r);
        if schema.slot(idx).expect("slot").sort_order == SortOrder::Desc {
            ord = ord.reverse();
        }
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

fn random_tuple(rng: &mut SmallRng, schema: &RowKeySchema) -> Vec<Datum> {
    schema
        .descriptors()
        .iter()
        .map(|slot| {
            domain(slot.column_type)
                .choose(rng)
                .cloned()
                .expect("non-empty domain")
        })
        .collect()
}

/// Every key over the cross product of the slot domains, together with each
/// of its prefixes that leaves trailing slots absent.
fn universe(schema: &RowKeySchema) -> Vec<Vec<u8>> {
    let mut tuples: Vec<Vec<Datum>> = vec![Vec::new()];
    for slot in schema.descriptors() {
        let values = domain(slot.column_type);
        tuples = tuples
            .into_iter()
            .flat_map(|prefix| {
                values.iter().map(move |value| {
                    let mut tuple = prefix.clone();
                    tuple.push(value.clone());
                    tuple
                })
            })
            .collect();
    }
    let mut keys = BTreeSet::new();
    for tuple in tuples {
        for present in 1..=tuple.len() {
            let values = tuple
                .iter()
                .enumerate()
                .map(|(idx, value)| (idx < present).then(|| value.clone()))
                .collect::<Vec<_>>();
            keys.insert(schema.encode(&values).expect("encode"));
        }
    }
    keys.into_iter().collect()
}

fn random_bound<'a>(rng: &mut SmallRng, value: &'a Datum) -> Bound<&'a Datum> {
    match rng.gen_range(0..5) {
        0 => Bound::Unbounded,
        1 | 2 => Bound::Included(value),
        _ => Bound::Excluded(value),
    }
}

fn random_slot_ranges(rng: &mut SmallRng, schema: &RowKeySchema, idx: usize) -> Vec<KeyRange> {
    let values = domain(schema.slot(idx).expect("slot").column_type);
    let points = |rng: &mut SmallRng, count: usize| {
        values
            .choose_multiple(rng, count)
            .map(|value| schema.point(idx, value).expect("point"))
            .collect::<Vec<_>>()
    };
    let range = |rng: &mut SmallRng| {
        let mut a = rng.gen_range(0..values.len());
        let mut b = rng.gen_range(0..values.len());
        if a > b {
            std::mem::swap(&mut a, &mut b);
        }
        let lower = random_bound(rng, &values[a]);
        let upper = random_bound(rng, &values[b]);
        schema.slot_range(idx, lower, upper).expect("range")
    };
    match rng.gen_range(0..10) {
        0 => vec![KeyRange::EVERYTHING],
        1..=4 => {
            let count = rng.gen_range(1..=3);
            points(rng, count)
        }
        5..=7 => vec![range(rng)],
        _ => {
            let mut mixed = points(rng, 1);
            mixed.push(range(rng));
            mixed
        }
    }
}

fn brute_force(schema: &RowKeySchema, keys: &[Vec<u8>], slots: &[Vec<KeyRange>]) -> Vec<Vec<u8>> {
    if slots.iter().any(|slot| slot.iter().all(KeyRange::is_empty)) {
        return Vec::new();
    }
    let effective = slots
        .iter()
        .position(|slot| slot.iter().any(KeyRange::is_everything))
        .map_or(slots, |idx| &slots[..idx]);
    let mut matches = keys
        .iter()
        .filter(|key| {
            let spans = schema
                .slots(key)
                .collect::<Result<Vec<_>, _>>()
                .expect("spans");
            effective.iter().enumerate().all(|(idx, ranges)| {
                let span = spans.get(idx).map_or(&[][..], |span| span.bytes(key));
                ranges.iter().any(|range| range.contains(span))
            })
        })
        .cloned()
        .collect::<Vec<_>>();
    matches.sort();
    matches
}

async fn scan_with_plan(table: &MemTable, plan: &ScanRanges) -> Vec<Vec<u8>> {
    let mut request = ScanRequest::default();
    if !plan.install_on(&mut request).expect("install") {
        return Vec::new();
    }
    table
        .scan(request)
        .await
        .expect("scan")
        .into_iter()
        .map(|row| row.key)
        .collect()
}

#[test]
fn encode_decode_round_trips_with_trailing_nulls() {
    let mut rng = SmallRng::seed_from_u64(SEED);
    for _ in 0..300 {
        let schema = random_schema(&mut rng, 4);
        let tuple = random_tuple(&mut rng, &schema);
        let present = rng.gen_range(0..=tuple.len());
        let values = tuple
            .into_iter()
            .enumerate()
            .map(|(idx, value)| (idx < present).then_some(value))
            .collect::<Vec<_>>();
        let key = schema.encode(&values).expect("encode");
        assert_eq!(schema.decode(&key).expect("decode"), values, "schema {schema:?}");
    }
}

#[test]
fn encoded_order_matches_value_order() {
    let mut rng = SmallRng::seed_from_u64(SEED ^ 1);
    for _ in 0..40 {
        let schema = random_schema(&mut rng, 3);
        for _ in 0..50 {
            let left = random_tuple(&mut rng, &schema);
            let right = random_tuple(&mut rng, &schema);
            let encode = |tuple: &[Datum]| {
                let values = tuple.iter().cloned().map(Some).collect::<Vec<_>>();
                schema.encode(&values).expect("encode")
            };
            assert_eq!(
                encode(&left).cmp(&encode(&right)),
                cmp_tuples(&schema, &left, &right),
                "{left:?} vs {right:?} under {schema:?}"
            );
        }
    }
}

#[tokio::test]
async fn skip_scan_matches_brute_force() {
    let mut rng = SmallRng::seed_from_u64(SEED ^ 2);
    for _ in 0..25 {
        let schema = Arc::new(random_schema(&mut rng, 3));
        let keys = universe(&schema);
        let table = MemTable::new("universe");
        table
            .load(
                keys.iter()
                    .map(|key| Mutation::put(key.clone(), 1, [(b"v".to_vec(), b"1".to_vec())]))
                    .collect(),
            )
            .expect("load");

        for _ in 0..20 {
            let constrained = rng.gen_range(1..=schema.len());
            let slots = (0..constrained)
                .map(|idx| random_slot_ranges(&mut rng, &schema, idx))
                .collect::<Vec<_>>();
            let scan_maximum = if rng.gen_bool(0.2) { 2 } else { 10_000 };
            let plan =
                ScanRanges::create(slots.clone(), schema.clone(), scan_maximum).expect("plan");
            let expected = brute_force(&schema, &keys, &slots);
            let actual = scan_with_plan(&table, &plan).await;

            if plan.widened() {
                assert!(
                    expected.iter().all(|key| actual.contains(key)),
                    "widened plan dropped matches for {slots:?}"
                );
            } else {
                assert_eq!(actual, expected, "plan {plan:?}");
            }
        }
    }
}

#[test]
fn classification_is_exclusive() {
    let mut rng = SmallRng::seed_from_u64(SEED ^ 3);
    for _ in 0..300 {
        let schema = Arc::new(random_schema(&mut rng, 3));
        let constrained = rng.gen_range(0..=schema.len());
        let mut slots = (0..constrained)
            .map(|idx| random_slot_ranges(&mut rng, &schema, idx))
            .collect::<Vec<_>>();
        if constrained > 0 && rng.gen_bool(0.1) {
            slots[0] = vec![KeyRange::empty()];
        }
        let plan = ScanRanges::create(slots, schema, 10_000).expect("plan");
        let flags = [
            plan.is_degenerate(),
            plan.is_everything(),
            plan.is_point_lookup(),
            plan.is_skip_scan(),
        ];
        assert_eq!(flags.iter().filter(|flag| **flag).count(), 1, "{plan:?}");
        if plan.kind() == ScanKind::PointLookup {
            assert_eq!(plan.point_lookup_keys().len(), plan.range_count());
        }
    }
}

#[test]
fn plan_size_never_exceeds_the_maximum() {
    let schema = Arc::new(
        RowKeySchema::new(vec![
            SlotDescriptor::asc("a", ColumnType::Int64),
            SlotDescriptor::asc("b", ColumnType::Int64),
            SlotDescriptor::asc("c", ColumnType::Int64),
        ])
        .expect("schema"),
    );
    for (m, maximum) in [(4usize, 10usize), (4, 63), (4, 64), (4, 65), (12, 7), (3, 1)] {
        let slots = (0..3)
            .map(|idx| {
                (0..m)
                    .map(|v| schema.point(idx, &Datum::Int64(v as i64)).expect("point"))
                    .collect::<Vec<_>>()
            })
            .collect::<Vec<_>>();
        let plan = ScanRanges::create(slots, schema.clone(), maximum).expect("plan");
        assert!(plan.range_count() <= maximum, "m={m} max={maximum}");
        assert_eq!(plan.widened(), m * m * m > maximum, "m={m} max={maximum}");
    }
}
