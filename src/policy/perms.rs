/// File permission bitmasks used by rules, requests, and audit records.
///
/// The mask layout is closed: six ordinary access bits plus one exec
/// qualifier bit. The qualifier participates in the link subset test but is
/// never counted as an ordinary permission.
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign, Not};
use std::str::FromStr;

/// Permission bitmask over file accesses
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Perms(u32);

impl Perms {
    pub const NONE: Perms = Perms(0);
    pub const READ: Perms = Perms(0x01);
    pub const WRITE: Perms = Perms(0x02);
    pub const APPEND: Perms = Perms(0x04);
    pub const EXEC: Perms = Perms(0x08);
    pub const LOCK: Perms = Perms(0x10);
    pub const LINK: Perms = Perms(0x20);
    /// Exec qualifier: the transition scrubs no environment ("unsafe").
    /// Absence together with EXEC means a safe transition.
    pub const UNSAFE: Perms = Perms(0x40);

    /// Bits compared by the link subset rule (everything except LINK and the
    /// exec qualifier)
    const ORDINARY: Perms = Perms(0x01 | 0x02 | 0x04 | 0x08 | 0x10);

    const TABLE: [(u32, char); 7] = [
        (0x01, 'r'),
        (0x02, 'w'),
        (0x04, 'a'),
        (0x08, 'x'),
        (0x10, 'k'),
        (0x20, 'l'),
        (0x40, 'u'),
    ];

    pub const fn empty() -> Perms {
        Perms(0)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub const fn contains(self, other: Perms) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn intersects(self, other: Perms) -> bool {
        self.0 & other.0 != 0
    }

    /// True when every bit of `self` is also granted by `other`
    pub const fn is_subset_of(self, other: Perms) -> bool {
        self.0 & !other.0 == 0
    }

    /// Ordinary access bits only, for the link subset comparison
    pub const fn strip_link_exec(self) -> Perms {
        Perms(self.0 & Perms::ORDINARY.0)
    }

    /// The exec qualifier bit, for safe/unsafe agreement checks
    pub const fn exec_qualifier(self) -> Perms {
        Perms(self.0 & Perms::UNSAFE.0)
    }
}

impl BitOr for Perms {
    type Output = Perms;
    fn bitor(self, rhs: Perms) -> Perms {
        Perms(self.0 | rhs.0)
    }
}

impl BitOrAssign for Perms {
    fn bitor_assign(&mut self, rhs: Perms) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for Perms {
    type Output = Perms;
    fn bitand(self, rhs: Perms) -> Perms {
        Perms(self.0 & rhs.0)
    }
}

impl Not for Perms {
    type Output = Perms;
    fn not(self) -> Perms {
        Perms(!self.0)
    }
}

impl fmt::Display for Perms {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (bit, ch) in Perms::TABLE {
            if self.0 & bit != 0 {
                write!(f, "{}", ch)?;
            }
        }
        Ok(())
    }
}

impl FromStr for Perms {
    type Err = String;

    fn from_str(s: &str) -> Result<Perms, String> {
        let mut perms = Perms::empty();
        for ch in s.chars() {
            let bit = Perms::TABLE
                .iter()
                .find(|(_, c)| *c == ch)
                .map(|(b, _)| *b)
                .ok_or_else(|| format!("unknown permission character: {:?}", ch))?;
            perms.0 |= bit;
        }
        Ok(perms)
    }
}

impl Serialize for Perms {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

struct PermsVisitor;

impl Visitor<'_> for PermsVisitor {
    type Value = Perms;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a permission string such as \"rwx\"")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Perms, E> {
        v.parse().map_err(de::Error::custom)
    }
}

impl<'de> Deserialize<'de> for Perms {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Perms, D::Error> {
        deserializer.deserialize_str(PermsVisitor)
    }
}
