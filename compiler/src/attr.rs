// attr.rs — Variable attributes as a closed enum and a bitset
//
// Analysis discovers attributes one at a time and never removes them; the
// set only offers `insert`, so that rule holds by construction.

use std::fmt;
use std::str::FromStr;

/// A property of a variable discovered by the user or by analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Attr {
    /// Replaced by a literal at emission time.
    Constant,
    /// Recomputed on every evaluation; never stored.
    Temporary,
    /// Stored once per population rather than per instance.
    Global,
    /// Supplied by the runtime (`$t`, `$t'`, `$index`).
    Preexistent,
    /// Writes into a variable that lives in another equation set.
    Reference,
    /// Evaluated for side effect only.
    Dummy,
    /// Only changes during init.
    InitOnly,
    /// Read from another equation set.
    ExternalRead,
    /// Written from another equation set.
    ExternalWrite,
    /// Part of a dependency cycle that buffering breaks.
    Cycle,
    /// Added by the compiler rather than declared in the document.
    Special,
}

impl Attr {
    pub const ALL: [Attr; 11] = [
        Attr::Constant,
        Attr::Temporary,
        Attr::Global,
        Attr::Preexistent,
        Attr::Reference,
        Attr::Dummy,
        Attr::InitOnly,
        Attr::ExternalRead,
        Attr::ExternalWrite,
        Attr::Cycle,
        Attr::Special,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Attr::Constant => "constant",
            Attr::Temporary => "temporary",
            Attr::Global => "global",
            Attr::Preexistent => "preexistent",
            Attr::Reference => "reference",
            Attr::Dummy => "dummy",
            Attr::InitOnly => "initOnly",
            Attr::ExternalRead => "externalRead",
            Attr::ExternalWrite => "externalWrite",
            Attr::Cycle => "cycle",
            Attr::Special => "special",
        }
    }

    fn bit(self) -> u16 {
        1 << (self as u16)
    }
}

impl FromStr for Attr {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Attr::ALL
            .iter()
            .copied()
            .find(|a| a.name() == s)
            .ok_or_else(|| format!("unknown attribute '{}'", s))
    }
}

/// Fixed-size set of `Attr`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct AttrSet(u16);

impl AttrSet {
    pub fn new() -> Self {
        AttrSet(0)
    }

    pub fn contains(self, attr: Attr) -> bool {
        self.0 & attr.bit() != 0
    }

    /// Returns true if the attribute was newly added.
    pub fn insert(&mut self, attr: Attr) -> bool {
        let fresh = !self.contains(attr);
        self.0 |= attr.bit();
        fresh
    }

    pub fn contains_any(self, attrs: &[Attr]) -> bool {
        attrs.iter().any(|a| self.contains(*a))
    }

    pub fn is_superset_of(self, other: AttrSet) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn iter(self) -> impl Iterator<Item = Attr> {
        Attr::ALL.into_iter().filter(move |a| self.contains(*a))
    }
}

impl FromIterator<Attr> for AttrSet {
    fn from_iter<T: IntoIterator<Item = Attr>>(iter: T) -> Self {
        let mut set = AttrSet::new();
        for a in iter {
            set.insert(a);
        }
        set
    }
}

impl fmt::Display for AttrSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.iter().map(Attr::name).collect();
        write!(f, "{}", names.join(","))
    }
}
