//! Zero-copy field scanning over protocol lines and packed variable records.
//!
//! The control protocol and the per-service variable buffer are both flat
//! byte sequences carved up by single-byte separators. [`next_field`] is the
//! shared cursor: it yields the prefix before the separator and advances the
//! remainder past it, without copying.

/// Longest accepted name for services and named descriptors, including the
/// implied terminator.
pub const NAME_LIMIT: usize = 64;

/// Split the next `sep`-terminated field off the front of `rest`.
///
/// Returns `None` once `rest` is empty. A trailing separator yields a final
/// empty field, matching how tab-joined argument tails parse.
pub fn next_field<'a>(rest: &mut &'a str, sep: char) -> Option<&'a str> {
    if rest.is_empty() {
        return None;
    }
    match rest.find(sep) {
        Some(idx) => {
            let field = &rest[..idx];
            *rest = &rest[idx + sep.len_utf8()..];
            Some(field)
        }
        None => {
            let field = *rest;
            *rest = "";
            Some(field)
        }
    }
}

/// Iterate the tab-separated fields of a protocol line tail.
pub fn fields(s: &str) -> impl Iterator<Item = &str> {
    let mut rest = s;
    std::iter::from_fn(move || next_field(&mut rest, '\t'))
}

/// Whether `name` is a well-formed service or descriptor name:
/// nonempty, shorter than [`NAME_LIMIT`], drawn from `[A-Za-z0-9._-]`.
pub fn check_name(name: &str) -> bool {
    if name.is_empty() || name.len() >= NAME_LIMIT {
        return false;
    }
    name.bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'.' || b == b'_' || b == b'-')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_and_advances() {
        let mut rest = "a\tbb\tc";
        assert_eq!(next_field(&mut rest, '\t'), Some("a"));
        assert_eq!(next_field(&mut rest, '\t'), Some("bb"));
        assert_eq!(next_field(&mut rest, '\t'), Some("c"));
        assert_eq!(next_field(&mut rest, '\t'), None);
    }

    #[test]
    fn trailing_separator_yields_empty_field() {
        let mut rest = "a\t";
        assert_eq!(next_field(&mut rest, '\t'), Some("a"));
        assert_eq!(next_field(&mut rest, '\t'), Some(""));
        assert_eq!(next_field(&mut rest, '\t'), None);
    }

    #[test]
    fn fields_iterates_all() {
        let got: Vec<&str> = fields("x\ty\tz").collect();
        assert_eq!(got, vec!["x", "y", "z"]);
        assert_eq!(fields("").count(), 0);
    }

    #[test]
    fn name_rules() {
        assert!(check_name("log.main"));
        assert!(check_name("svc_1-a"));
        assert!(!check_name(""));
        assert!(!check_name("has space"));
        assert!(!check_name("tab\tname"));
        assert!(!check_name(&"x".repeat(NAME_LIMIT)));
        assert!(check_name(&"x".repeat(NAME_LIMIT - 1)));
    }
}
