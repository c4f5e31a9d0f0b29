//! # Monotonic 32.32 fixed-point time.
//!
//! Every timestamp the supervisor stores or emits is a [`Ts`]: a signed
//! 64-bit count of 2^-32 second ticks on a monotonic clock anchored at
//! process start. The value 0 is reserved to mean "unset"; anything that
//! would legitimately be 0 is coerced to 1 tick via [`Ts::or_tick`].
//!
//! Timestamps are rendered on the wire as the decimal whole-second part;
//! fractional seconds appear only where a sub-second value is meaningful
//! (`respawn-delay`).

use std::time::{Duration, Instant};

/// Fixed-point 32.32 seconds. 0 means "unset".
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Ts(i64);

impl Ts {
    /// The reserved "unset" value.
    pub const UNSET: Ts = Ts(0);

    pub fn from_raw(raw: i64) -> Ts {
        Ts(raw)
    }

    pub fn raw(self) -> i64 {
        self.0
    }

    pub fn from_secs(secs: i64) -> Ts {
        Ts(secs.saturating_mul(1 << 32))
    }

    pub fn from_duration(d: Duration) -> Ts {
        let whole = (d.as_secs() as i64).min(i32::MAX as i64) << 32;
        let frac = ((d.subsec_nanos() as i64) << 32) / 1_000_000_000;
        Ts(whole + frac)
    }

    pub fn to_duration(self) -> Duration {
        if self.0 <= 0 {
            return Duration::ZERO;
        }
        let whole = (self.0 >> 32) as u64;
        let frac_ns = (((self.0 & 0xffff_ffff) as u64) * 1_000_000_000) >> 32;
        Duration::new(whole, frac_ns as u32)
    }

    /// Whole-second part, as emitted in events.
    pub fn whole(self) -> i64 {
        self.0 >> 32
    }

    pub fn is_set(self) -> bool {
        self.0 != 0
    }

    /// Coerce the reserved 0 to the smallest representable instant.
    pub fn or_tick(self) -> Ts {
        if self.0 == 0 {
            Ts(1)
        } else {
            self
        }
    }

    pub fn saturating_add(self, other: Ts) -> Ts {
        Ts(self.0.saturating_add(other.0))
    }

    pub fn saturating_sub(self, other: Ts) -> Ts {
        Ts(self.0.saturating_sub(other.0))
    }

    /// Parse a decimal seconds value, optionally fractional (`"2"`, `"0.5"`).
    pub fn parse_secs(s: &str) -> Option<Ts> {
        let (whole, frac) = match s.split_once('.') {
            Some((w, f)) => (w, f),
            None => (s, ""),
        };
        if whole.is_empty() && frac.is_empty() {
            return None;
        }
        let mut raw: i64 = 0;
        if !whole.is_empty() {
            let secs: i64 = whole.parse().ok()?;
            raw = secs.checked_shl(32)?;
        }
        if !frac.is_empty() {
            if frac.len() > 9 || !frac.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            let digits: i64 = frac.parse().ok()?;
            let scale = 10_i64.pow(frac.len() as u32);
            raw += (digits << 32) / scale;
        }
        Some(Ts(raw))
    }

    /// Render as decimal seconds, with three fractional digits only when
    /// the fractional part is nonzero.
    pub fn render_secs(self) -> String {
        let frac = self.0 & 0xffff_ffff;
        if frac == 0 {
            return self.whole().to_string();
        }
        let millis = (frac * 1000) >> 32;
        format!("{}.{:03}", self.whole(), millis)
    }
}

/// Monotonic time source for the whole supervisor.
#[derive(Clone, Copy, Debug)]
pub struct Clock {
    base: Instant,
}

impl Clock {
    pub fn new() -> Clock {
        Clock {
            base: Instant::now(),
        }
    }

    pub fn now(&self) -> Ts {
        Ts::from_duration(self.base.elapsed()).or_tick()
    }
}

impl Default for Clock {
    fn default() -> Self {
        Clock::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whole_and_fraction_round_trip() {
        let ts = Ts::from_duration(Duration::from_millis(2500));
        assert_eq!(ts.whole(), 2);
        let back = ts.to_duration();
        assert!(back >= Duration::from_millis(2499) && back <= Duration::from_millis(2500));
    }

    #[test]
    fn zero_is_unset_and_coerced() {
        assert!(!Ts::UNSET.is_set());
        assert_eq!(Ts::UNSET.or_tick().raw(), 1);
        assert_eq!(Ts::from_secs(3).or_tick(), Ts::from_secs(3));
    }

    #[test]
    fn parse_accepts_whole_and_fractional() {
        assert_eq!(Ts::parse_secs("2"), Some(Ts::from_secs(2)));
        let half = Ts::parse_secs("0.5").unwrap();
        assert_eq!(half.raw(), 1_i64 << 31);
        assert_eq!(Ts::parse_secs(""), None);
        assert_eq!(Ts::parse_secs("1.x"), None);
        assert_eq!(Ts::parse_secs("-1").map(|t| t.whole()), Some(-1));
    }

    #[test]
    fn render_omits_zero_fraction() {
        assert_eq!(Ts::from_secs(7).render_secs(), "7");
        assert_eq!(Ts::parse_secs("2.5").unwrap().render_secs(), "2.500");
    }

    #[test]
    fn clock_never_returns_unset() {
        let clock = Clock::new();
        assert!(clock.now().is_set());
    }
}
