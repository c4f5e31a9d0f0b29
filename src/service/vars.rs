//! # Packed per-service variable buffer.
//!
//! All of a service's variables (`args`, `fds`, `tags`, `triggers`) live in
//! one contiguous buffer of `key=value\0` records. One buffer per service is
//! what makes pool mode meaningful: the byte cap is a hard bound on the
//! record's footprint, and exceeding it is an ordinary `limit` error.
//!
//! Mutation splices the record in place. That is linear in the buffer, which
//! is fine: the buffer is a couple hundred bytes and changes are rare
//! compared to reads.

use crate::error::ControlError;

#[derive(Debug)]
pub struct VarBuf {
    buf: Vec<u8>,
    cap: Option<usize>,
}

impl VarBuf {
    /// `cap` is the pool-mode byte budget; `None` grows freely.
    pub fn new(cap: Option<usize>) -> VarBuf {
        VarBuf {
            buf: Vec::new(),
            cap,
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Look up a variable's value.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.iter().find(|(k, _)| *k == key).map(|(_, v)| v)
    }

    /// Iterate `(key, value)` pairs in storage order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.buf
            .split(|b| *b == 0)
            .filter(|rec| !rec.is_empty())
            .filter_map(|rec| {
                let rec = std::str::from_utf8(rec).ok()?;
                rec.split_once('=')
            })
    }

    /// Set or delete (`None`) a variable. Fails with `limit` when the byte
    /// cap would be exceeded, leaving the buffer untouched.
    pub fn set(&mut self, key: &str, value: Option<&str>) -> Result<(), ControlError> {
        let range = self.record_range(key);
        let grown = match (&range, value) {
            (Some(r), Some(v)) => {
                self.buf.len() - (r.end - r.start) + record_len(key, v)
            }
            (Some(r), None) => self.buf.len() - (r.end - r.start),
            (None, Some(v)) => self.buf.len() + record_len(key, v),
            (None, None) => return Ok(()),
        };
        if let Some(cap) = self.cap {
            if grown > cap {
                return Err(ControlError::limit(format!(
                    "variable pool exhausted ({cap} bytes)"
                )));
            }
        }
        let replacement = value.map(|v| {
            let mut rec = Vec::with_capacity(record_len(key, v));
            rec.extend_from_slice(key.as_bytes());
            rec.push(b'=');
            rec.extend_from_slice(v.as_bytes());
            rec.push(0);
            rec
        });
        match (range, replacement) {
            (Some(r), Some(rec)) => {
                self.buf.splice(r, rec);
            }
            (Some(r), None) => {
                self.buf.splice(r, std::iter::empty());
            }
            (None, Some(rec)) => self.buf.extend_from_slice(&rec),
            (None, None) => {}
        }
        debug_assert!(self.buf.is_empty() || *self.buf.last().unwrap() == 0);
        Ok(())
    }

    /// Byte range of `key`'s record, trailing NUL included.
    fn record_range(&self, key: &str) -> Option<std::ops::Range<usize>> {
        let mut start = 0;
        while start < self.buf.len() {
            let end = self.buf[start..]
                .iter()
                .position(|b| *b == 0)
                .map(|i| start + i + 1)
                .unwrap_or(self.buf.len());
            let rec = &self.buf[start..end - 1];
            if rec.len() > key.len()
                && &rec[..key.len()] == key.as_bytes()
                && rec[key.len()] == b'='
            {
                return Some(start..end);
            }
            start = end;
        }
        None
    }
}

fn record_len(key: &str, value: &str) -> usize {
    key.len() + 1 + value.len() + 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_get_and_overwrite() {
        let mut vars = VarBuf::new(None);
        vars.set("args", Some("/bin/sh\t-c\techo hi")).unwrap();
        vars.set("tags", Some("web")).unwrap();
        assert_eq!(vars.get("args"), Some("/bin/sh\t-c\techo hi"));
        assert_eq!(vars.get("tags"), Some("web"));

        vars.set("args", Some("/bin/true")).unwrap();
        assert_eq!(vars.get("args"), Some("/bin/true"));
        assert_eq!(vars.get("tags"), Some("web"));
    }

    #[test]
    fn delete_compacts_the_buffer() {
        let mut vars = VarBuf::new(None);
        vars.set("a", Some("1")).unwrap();
        vars.set("b", Some("2")).unwrap();
        vars.set("c", Some("3")).unwrap();
        vars.set("b", None).unwrap();
        assert_eq!(vars.get("b"), None);
        assert_eq!(vars.get("a"), Some("1"));
        assert_eq!(vars.get("c"), Some("3"));
        assert_eq!(vars.len(), 2 * "a=1\0".len());
    }

    #[test]
    fn nonempty_buffer_ends_in_nul() {
        let mut vars = VarBuf::new(None);
        vars.set("k", Some("v")).unwrap();
        assert_eq!(vars.buf.last(), Some(&0));
        vars.set("k", None).unwrap();
        assert!(vars.is_empty());
    }

    #[test]
    fn empty_value_is_storable() {
        let mut vars = VarBuf::new(None);
        vars.set("fds", Some("")).unwrap();
        assert_eq!(vars.get("fds"), Some(""));
    }

    #[test]
    fn key_prefixes_do_not_collide() {
        let mut vars = VarBuf::new(None);
        vars.set("arg", Some("x")).unwrap();
        vars.set("args", Some("y")).unwrap();
        assert_eq!(vars.get("arg"), Some("x"));
        assert_eq!(vars.get("args"), Some("y"));
    }

    #[test]
    fn cap_rejects_growth_and_preserves_contents() {
        let mut vars = VarBuf::new(Some(16));
        vars.set("args", Some("abcdefghij")).unwrap(); // 16 bytes exactly
        let err = vars.set("tags", Some("x")).unwrap_err();
        assert_eq!(err.category(), "limit");
        assert_eq!(vars.get("args"), Some("abcdefghij"));
        // Shrinking and same-size rewrites still work.
        vars.set("args", Some("short")).unwrap();
        assert_eq!(vars.get("args"), Some("short"));
    }
}
