/*!
 * Serde Helpers
 * Skip predicates for compact report serialization
 */

/// Skip serializing if value equals its default
#[inline]
pub fn is_default<T: Default + PartialEq>(value: &T) -> bool {
    value == &T::default()
}

/// Skip serializing if Vec is empty
#[inline]
pub fn is_empty_vec<T>(value: &Vec<T>) -> bool {
    value.is_empty()
}

/// Skip serializing if u64 is zero
#[inline]
pub fn is_zero_u64(value: &u64) -> bool {
    *value == 0
}
