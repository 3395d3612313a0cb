use std::hash::BuildHasherDefault;

use rustc_hash::FxHasher;

pub type FxHashMap<K, V> = hashbrown::HashMap<K, V, BuildHasherDefault<FxHasher>>;
pub type FxHashSet<K> = hashbrown::HashSet<K, BuildHasherDefault<FxHasher>>;

pub fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        let (c, d) = (b, a % b);
        a = c;
        b = d;
    }
    a
}

/// Rounds `offset` up to a multiple of `align`, which must be a power of two.
pub fn align_to(offset: u64, align: u64) -> Option<u64> {
    debug_assert!(align.is_power_of_two());
    Some(offset.checked_add(align - 1)? & !(align - 1))
}

#[test]
fn test() {
    assert_eq!(gcd(0, 6), 6);
    assert_eq!(gcd(132, 0), 132);
    assert_eq!(gcd(24, 36), 12);
    assert_eq!(align_to(5, 4), Some(8));
    assert_eq!(align_to(16, 16), Some(16));
    assert_eq!(align_to(u64::MAX, 2), None);
}
