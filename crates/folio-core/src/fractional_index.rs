//! Fractional indexing for sibling ordering.
//!
//! Keys are base-62 strings over `0-9A-Za-z` compared byte-wise (ASCII order,
//! which is also PostgreSQL's `COLLATE "C"` order). A new key can always be
//! generated strictly between two existing keys, so inserting never renumbers
//! other entries. Valid keys are non-empty and never end in `0`: a trailing
//! zero would leave no room for a key directly below it.
//!
//! Keys grow slowly when many inserts land on the same boundary. Out-of-band
//! reindexing reassigns short keys with [`spread`] without changing order.
//!
//! ```
//! use folio_core::fractional_index::next;
//!
//! let first = next(None, None).unwrap();
//! assert_eq!(first, "V");
//! let between = next(Some("a"), Some("c")).unwrap();
//! assert_eq!(between, "b");
//! ```

use crate::error::{Error, Result};

/// Digit alphabet in ascending byte order.
const DIGITS: &[u8; 62] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

const BASE: usize = DIGITS.len();

const ZERO: u8 = b'0';

fn digit_value(c: u8) -> Option<usize> {
    match c {
        b'0'..=b'9' => Some((c - b'0') as usize),
        b'A'..=b'Z' => Some((c - b'A') as usize + 10),
        b'a'..=b'z' => Some((c - b'a') as usize + 36),
        _ => None,
    }
}

/// Check that `key` is a well-formed fractional index.
pub fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(Error::InvalidInput("index key must not be empty".to_string()));
    }
    if let Some(bad) = key.bytes().find(|c| digit_value(*c).is_none()) {
        return Err(Error::InvalidInput(format!(
            "index key {:?} contains invalid character {:?}",
            key, bad as char
        )));
    }
    if key.as_bytes().last() == Some(&ZERO) {
        return Err(Error::InvalidInput(format!(
            "index key {:?} must not end in '0'",
            key
        )));
    }
    Ok(())
}

fn check_bounds(lower: Option<&str>, upper: Option<&str>) -> Result<()> {
    if let Some(lower) = lower {
        validate_key(lower)?;
    }
    if let Some(upper) = upper {
        validate_key(upper)?;
    }
    if let (Some(lower), Some(upper)) = (lower, upper) {
        if lower >= upper {
            return Err(Error::InvalidInput(format!(
                "index lower bound {:?} is not below upper bound {:?}",
                lower, upper
            )));
        }
    }
    Ok(())
}

/// Generate a key sorting strictly between `lower` and `upper`.
///
/// Either bound may be absent, meaning no limit on that side. Deterministic:
/// the same bounds always give the same key, so concurrent writers racing on
/// one boundary can collide; callers detect that and retry with
/// [`nudge`].
pub fn next(lower: Option<&str>, upper: Option<&str>) -> Result<String> {
    check_bounds(lower, upper)?;

    // Open ends step by one digit instead of bisecting, so runs of appends or
    // prepends grow keys by one character per ~60 inserts.
    let key = match (lower, upper) {
        (None, None) => vec![DIGITS[BASE / 2]],
        (Some(lower), None) => increment(lower.as_bytes()),
        (None, Some(upper)) => decrement(upper.as_bytes()),
        (Some(lower), Some(upper)) => midpoint(lower.as_bytes(), Some(upper.as_bytes())),
    };
    Ok(to_key(key))
}

fn to_key(digits: Vec<u8>) -> String {
    digits.into_iter().map(char::from).collect()
}

/// Key just above `collided` and still below `upper`, for retrying after a
/// sibling key collision.
pub fn nudge(collided: &str, upper: Option<&str>) -> Result<String> {
    next(Some(collided), upper)
}

/// Generate `n` strictly increasing keys between `lower` and `upper`,
/// distributed by repeated bisection so their lengths stay close to the
/// minimum needed.
pub fn spread(lower: Option<&str>, upper: Option<&str>, n: usize) -> Result<Vec<String>> {
    if n == 0 {
        return Ok(Vec::new());
    }
    check_bounds(lower, upper)?;
    let mid = to_key(midpoint(
        lower.unwrap_or("").as_bytes(),
        upper.map(str::as_bytes),
    ));
    let below = (n - 1) / 2;
    let above = n - 1 - below;

    let mut keys = spread(lower, Some(&mid), below)?;
    let upper_half = spread(Some(&mid), upper, above)?;
    keys.reserve(upper_half.len() + 1);
    keys.push(mid);
    keys.extend(upper_half);
    Ok(keys)
}

/// Smallest-step key above `a`: bump the first digit, or keep a leading `z`
/// and recurse into the rest.
fn increment(a: &[u8]) -> Vec<u8> {
    let Some((&first, rest)) = a.split_first() else {
        return vec![DIGITS[1]];
    };
    let digit = digit_value(first).unwrap_or(0);
    if digit + 1 < BASE {
        vec![DIGITS[digit + 1]]
    } else {
        let mut out = vec![first];
        out.extend(increment(rest));
        out
    }
}

/// Smallest-step key below `b`. `b` is a valid key, so it never ends in `0`.
fn decrement(b: &[u8]) -> Vec<u8> {
    let Some((&first, rest)) = b.split_first() else {
        return vec![DIGITS[BASE / 2]];
    };
    match digit_value(first).unwrap_or(0) {
        digit if digit > 1 => vec![DIGITS[digit - 1]],
        1 if !rest.is_empty() => vec![first],
        1 => vec![ZERO, DIGITS[BASE - 1]],
        _ => {
            let mut out = vec![first];
            out.extend(decrement(rest));
            out
        }
    }
}

/// Midpoint of two digit strings read as base-62 fractions.
///
/// `a` may be empty (no lower bound); `b == None` means no upper bound.
/// Requires `a < b` and neither ending in `0`.
fn midpoint(a: &[u8], b: Option<&[u8]>) -> Vec<u8> {
    if let Some(b) = b {
        // Skip the shared prefix, reading `a` as zero-padded.
        let mut n = 0;
        while n < b.len() && a.get(n).copied().unwrap_or(ZERO) == b[n] {
            n += 1;
        }
        if n > 0 {
            let mut out = b[..n].to_vec();
            out.extend(midpoint(a.get(n..).unwrap_or(&[]), Some(&b[n..])));
            return out;
        }
    }

    let digit_a = a.first().and_then(|c| digit_value(*c)).unwrap_or(0);
    let digit_b = b
        .and_then(|b| b.first())
        .and_then(|c| digit_value(*c))
        .unwrap_or(BASE);

    if digit_b - digit_a > 1 {
        vec![DIGITS[(digit_a + digit_b) / 2]]
    } else if let Some(b) = b.filter(|b| b.len() > 1) {
        // `b` is longer than one digit, so its first digit alone sorts between.
        vec![b[0]]
    } else {
        let mut out = vec![DIGITS[digit_a]];
        out.extend(midpoint(a.get(1..).unwrap_or(&[]), None));
        out
    }
}
