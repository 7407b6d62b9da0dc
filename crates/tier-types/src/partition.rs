//! Key-space partitioning for change feeds.
//!
//! Uses FNV-1a so the assignment is stable across processes and Rust
//! releases (std's `DefaultHasher` is not).

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Partition a record id belongs to. `count` of 0 is treated as 1.
pub fn partition_for(id: &str, count: u32) -> u32 {
    let count = count.max(1);
    let mut hash = FNV_OFFSET;
    for byte in id.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    (hash % u64::from(count)) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_in_range() {
        for i in 0..500 {
            let id = format!("record-{}", i);
            assert!(partition_for(&id, 4) < 4);
        }
    }

    #[test]
    fn test_partition_stable() {
        // FNV-1a("a") = 0xaf63dc4c8601ec8c
        assert_eq!(partition_for("a", 1 << 16), 0xec8c);
        assert_eq!(partition_for("A1", 8), partition_for("A1", 8));
    }

    #[test]
    fn test_single_partition() {
        assert_eq!(partition_for("anything", 1), 0);
        assert_eq!(partition_for("anything", 0), 0);
    }

    #[test]
    fn test_spreads_keys() {
        let mut seen = [0usize; 4];
        for i in 0..400 {
            seen[partition_for(&format!("id-{}", i), 4) as usize] += 1;
        }
        assert!(seen.iter().all(|&n| n > 0));
    }
}
