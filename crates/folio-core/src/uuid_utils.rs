//! Identifier helpers.
//!
//! Entity ids are UUIDv7 so rows sort by creation time. Documents also carry a
//! short `url_id` used as the stable suffix of their public URL.

use uuid::Uuid;

/// Length of a document `url_id`.
pub const URL_ID_LEN: usize = 10;

/// Generate a new UUIDv7 identifier.
///
/// ```
/// use folio_core::uuid_utils::new_v7;
///
/// let a = new_v7();
/// let b = new_v7();
/// assert_ne!(a, b);
/// ```
#[inline]
pub fn new_v7() -> Uuid {
    Uuid::now_v7()
}

/// Generate a short random url id (lowercase hex, [`URL_ID_LEN`] chars).
pub fn new_url_id() -> String {
    Uuid::new_v4().simple().to_string()[..URL_ID_LEN].to_string()
}

/// Check whether a UUID is version 7.
pub fn is_v7(id: &Uuid) -> bool {
    id.get_version_num() == 7
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_v7_is_v7() {
        assert!(is_v7(&new_v7()));
        assert!(!is_v7(&Uuid::new_v4()));
    }

    #[test]
    fn test_url_id_shape() {
        let id = new_url_id();
        assert_eq!(id.len(), URL_ID_LEN);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
