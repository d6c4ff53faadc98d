use std::collections::BTreeSet;

use anyhow::Result;
use holo_index::{per_task_row_keys, StaleRegionTopology};
use holo_kv::region_index_for_key;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

fn random_key(rng: &mut SmallRng) -> Vec<u8> {
    let len = rng.gen_range(1..=4);
    (0..len).map(|_| rng.gen_range(b'a'..=b'h')).collect()
}

fn sorted_unique(rng: &mut SmallRng, count: usize) -> Vec<Vec<u8>> {
    (0..count)
        .map(|_| random_key(rng))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

#[test]
fn subsets_cover_input_in_order_and_stay_within_one_region() -> Result<()> {
    let mut rng = SmallRng::seed_from_u64(0x5eed);
    for _ in 0..500 {
        let key_count = rng.gen_range(0..40);
        let keys = sorted_unique(&mut rng, key_count);
        let boundary_count = rng.gen_range(0..6);
        let mut end_keys = sorted_unique(&mut rng, boundary_count);
        end_keys.push(Vec::new());
        let cap = rng.gen_range(1..8);

        let tasks = per_task_row_keys("t", keys.clone(), &end_keys, cap)?;

        let flattened = tasks
            .iter()
            .flat_map(|task| task.keys.iter().cloned())
            .collect::<Vec<_>>();
        assert_eq!(flattened, keys);

        let mut previous_region = 0usize;
        for task in &tasks {
            assert!(!task.keys.is_empty());
            assert!(task.keys.len() <= cap);
            assert!(task.region >= previous_region);
            previous_region = task.region;
            for key in &task.keys {
                assert_eq!(region_index_for_key(&end_keys, key), Some(task.region));
            }
        }
        // Subsets only split early when they are full.
        for pair in tasks.windows(2) {
            if pair[0].region == pair[1].region {
                assert_eq!(pair[0].keys.len(), cap);
            }
        }
    }
    Ok(())
}

#[test]
fn keys_past_bounded_regions_are_stale() {
    let mut rng = SmallRng::seed_from_u64(7);
    for _ in 0..200 {
        let boundary_count = rng.gen_range(1..5);
        let end_keys = sorted_unique(&mut rng, boundary_count);
        let Some(last) = end_keys.last().cloned() else {
            continue;
        };
        let key_count = rng.gen_range(0..10);
        let mut keys = sorted_unique(&mut rng, key_count)
            .into_iter()
            .filter(|key| key < &last)
            .collect::<Vec<_>>();
        keys.push(last.clone());

        let err = per_task_row_keys("t", keys, &end_keys, 4).expect_err("stale");
        let stale = err
            .downcast_ref::<StaleRegionTopology>()
            .expect("stale topology error");
        assert_eq!(stale.row_key, last);
        assert_eq!(stale.last_end_key, last);
    }
}
