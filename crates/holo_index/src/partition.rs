use anyhow::{bail, Result};

use crate::error::StaleRegionTopology;

/// Row keys handed to one task, all owned by region `region`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskRowKeys {
    pub region: usize,
    pub keys: Vec<Vec<u8>>,
}

/// Splits sorted row keys into per-task subsets.
///
/// Keys are walked once against `region_end_keys` (sorted exclusive ends, the
/// last possibly empty for an unbounded region) with a cursor that only moves
/// forward. A new subset starts whenever the cursor crosses a boundary or the
/// current subset holds `max_rows_per_task` keys. A key at or past the last
/// bounded end fails with [`StaleRegionTopology`].
pub fn per_task_row_keys(
    table: &str,
    keys: Vec<Vec<u8>>,
    region_end_keys: &[Vec<u8>],
    max_rows_per_task: usize,
) -> Result<Vec<TaskRowKeys>> {
    let cap = max_rows_per_task.max(1);
    let unbounded = [Vec::new()];
    let end_keys = if region_end_keys.is_empty() {
        &unbounded[..]
    } else {
        region_end_keys
    };

    let mut tasks: Vec<TaskRowKeys> = Vec::new();
    let mut cursor = 0usize;
    let mut previous: Option<&[u8]> = None;
    for key in &keys {
        if previous.is_some_and(|prev| prev > key.as_slice()) {
            bail!("row keys for '{}' are not sorted", table);
        }
        previous = Some(key.as_slice());
        while cursor < end_keys.len()
            && !end_keys[cursor].is_empty()
            && end_keys[cursor].as_slice() <= key.as_slice()
        {
            cursor += 1;
        }
        if cursor == end_keys.len() {
            return Err(StaleRegionTopology {
                table: table.to_string(),
                row_key: key.clone(),
                last_end_key: end_keys[end_keys.len() - 1].clone(),
            }
            .into());
        }
        match tasks.last_mut() {
            Some(task) if task.region == cursor && task.keys.len() < cap => {
                task.keys.push(key.clone());
            }
            _ => tasks.push(TaskRowKeys {
                region: cursor,
                keys: vec![key.clone()],
            }),
        }
    }
    Ok(tasks)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(raw: &[&[u8]]) -> Vec<Vec<u8>> {
        raw.iter().map(|key| key.to_vec()).collect()
    }

    #[test]
    fn splits_on_region_boundaries_and_row_cap() {
        let end_keys = keys(&[b"c", b"m", b""]);
        let tasks = per_task_row_keys(
            "data",
            keys(&[b"a", b"b", b"bb", b"c", b"d", b"x", b"y"]),
            &end_keys,
            2,
        )
        .expect("partition");
        let shape = tasks
            .iter()
            .map(|task| (task.region, task.keys.len()))
            .collect::<Vec<_>>();
        assert_eq!(shape, vec![(0, 2), (0, 1), (1, 2), (2, 2)]);
        assert_eq!(tasks[2].keys, keys(&[b"c", b"d"]));
    }

    #[test]
    fn empty_boundaries_mean_one_unbounded_region() {
        let tasks = per_task_row_keys("data", keys(&[b"a", b"z"]), &[], 10).expect("partition");
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].region, 0);
    }

    #[test]
    fn keys_past_the_last_bounded_end_are_stale() {
        let err = per_task_row_keys("data", keys(&[b"a", b"q"]), &keys(&[b"f", b"p"]), 10)
            .expect_err("stale");
        let stale = err
            .downcast_ref::<StaleRegionTopology>()
            .expect("stale topology error");
        assert_eq!(stale.row_key, b"q".to_vec());
        assert_eq!(stale.last_end_key, b"p".to_vec());
    }

    #[test]
    fn unsorted_input_is_rejected() {
        assert!(per_task_row_keys("data", keys(&[b"b", b"a"]), &[], 10).is_err());
    }
}
