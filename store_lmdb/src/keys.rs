//! Composite key layout.
//!
//! Every row lives in one LMDB database under
//! `table \0 partition \0 row`. Identifiers never contain `\0`, so a
//! `table \0 partition \0` prefix scan returns exactly one partition, in
//! row-key order.

const SEP: u8 = 0;

pub(crate) fn entity_key(table: &str, partition: &str, row: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(table.len() + partition.len() + row.len() + 2);
    key.extend_from_slice(table.as_bytes());
    key.push(SEP);
    key.extend_from_slice(partition.as_bytes());
    key.push(SEP);
    key.extend_from_slice(row.as_bytes());
    key
}

/// Prefix covering a whole table, or a single partition of it.
pub(crate) fn scan_prefix(table: &str, partition: Option<&str>) -> Vec<u8> {
    let mut key = Vec::with_capacity(table.len() + 2);
    key.extend_from_slice(table.as_bytes());
    key.push(SEP);
    if let Some(partition) = partition {
        key.extend_from_slice(partition.as_bytes());
        key.push(SEP);
    }
    key
}

/// Turn `prefix` into the smallest key greater than every key it prefixes.
///
/// Returns `false` if the prefix is all `0xff` and has no upper bound.
pub(crate) fn increment_prefix(prefix: &mut Vec<u8>) -> bool {
    while let Some(last) = prefix.pop() {
        if last < u8::MAX {
            prefix.push(last + 1);
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partition_prefix_does_not_match_longer_partition() {
        let prefix = scan_prefix("tokens", Some("s1"));
        assert!(entity_key("tokens", "s1", "t").starts_with(&prefix));
        assert!(!entity_key("tokens", "s10", "t").starts_with(&prefix));
    }

    #[test]
    fn increment_prefix_carries() {
        let mut p = vec![1, 0xff];
        assert!(increment_prefix(&mut p));
        assert_eq!(p, vec![2]);

        let mut all = vec![0xff, 0xff];
        assert!(!increment_prefix(&mut all));
    }
}
