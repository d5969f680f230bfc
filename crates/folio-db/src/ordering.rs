//! Fractional key helpers shared by collections, pins and stars.

use folio_core::fractional_index;
use folio_core::Result;

/// `wanted` if no key in `taken` equals it, else a key just above it and
/// below the next larger taken key.
pub(crate) fn free_key(taken: &[String], wanted: &str) -> Result<String> {
    if !taken.iter().any(|k| k == wanted) {
        return Ok(wanted.to_string());
    }
    let upper = taken
        .iter()
        .filter(|k| k.as_str() > wanted)
        .min()
        .map(String::as_str);
    fractional_index::nudge(wanted, upper)
}

/// Short keys for `n` entries in their current order.
pub(crate) fn fresh_keys(n: usize) -> Result<Vec<String>> {
    fractional_index::spread(None, None, n)
}
