//! Mode keys.
//!
//! A [`ModeKey`] names one dispatch layer (vmap mode, autograd, tracing, ...).
//! The set of keys is closed: every key is known at build time, which lets the
//! handler tables be dense arrays indexed by [`ModeKey::index`] instead of maps.
//!
//! Keys carry a total order (their declaration order). The order is used for
//! deterministic iteration of a [`ModeKeySet`] and for table dumps; it does
//! *not* decide which mode sees a call first. That is decided by the mode
//! stack, most recently entered first.

use core::fmt;
use core::str::FromStr;

/// Identifier of one dispatch layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum ModeKey {
    /// Vectorized-map mode, active for the whole extent of a vmap region.
    VmapMode = 0,
    /// Batched tensors inside a vmap region.
    Batched,
    /// Gradient recording.
    Autograd,
    /// Functionalization (mutation removal).
    Functionalize,
    /// Automatic mixed precision.
    Autocast,
    /// Graph tracing.
    Tracer,
    /// User-level mode objects.
    Python,
}

impl ModeKey {
    /// Number of mode keys.
    pub const COUNT: usize = 7;

    /// Every key, in declaration order.
    pub const ALL: [Self; Self::COUNT] = [
        Self::VmapMode,
        Self::Batched,
        Self::Autograd,
        Self::Functionalize,
        Self::Autocast,
        Self::Tracer,
        Self::Python,
    ];

    /// Dense index of this key, in `0..COUNT`.
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Stable, human readable name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::VmapMode => "VmapMode",
            Self::Batched => "Batched",
            Self::Autograd => "Autograd",
            Self::Functionalize => "Functionalize",
            Self::Autocast => "Autocast",
            Self::Tracer => "Tracer",
            Self::Python => "Python",
        }
    }
}

impl TryFrom<u8> for ModeKey {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::ALL.get(usize::from(value)).copied().ok_or(value)
    }
}

impl fmt::Display for ModeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Returned when a string does not name any [`ModeKey`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown mode key `{0}`")]
pub struct UnknownModeKey(pub String);

impl FromStr for ModeKey {
    type Err = UnknownModeKey;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|key| key.name() == s)
            .ok_or_else(|| UnknownModeKey(s.to_owned()))
    }
}

/// A set of mode keys stored as a bitmask.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ModeKeySet(u32);

impl ModeKeySet {
    /// The empty set.
    pub const EMPTY: Self = Self(0);

    /// Set holding every key.
    pub const FULL: Self = Self((1 << ModeKey::COUNT) - 1);

    /// Set holding exactly `key`.
    #[must_use]
    pub const fn single(key: ModeKey) -> Self {
        Self(1 << key.index())
    }

    /// Whether `key` is a member.
    #[must_use]
    pub const fn contains(self, key: ModeKey) -> bool {
        self.0 & (1 << key.index()) != 0
    }

    /// This set plus `key`.
    #[must_use]
    pub const fn with(self, key: ModeKey) -> Self {
        Self(self.0 | (1 << key.index()))
    }

    /// This set minus `key`.
    #[must_use]
    pub const fn without(self, key: ModeKey) -> Self {
        Self(self.0 & !(1 << key.index()))
    }

    /// Union of two sets.
    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    #[must_use]
    pub const fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    /// Members in declaration order.
    pub fn iter(self) -> impl Iterator<Item = ModeKey> {
        ModeKey::ALL.into_iter().filter(move |key| self.contains(*key))
    }
}

impl FromIterator<ModeKey> for ModeKeySet {
    fn from_iter<I: IntoIterator<Item = ModeKey>>(iter: I) -> Self {
        iter.into_iter().fold(Self::EMPTY, Self::with)
    }
}

impl fmt::Debug for ModeKeySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indices_are_dense_and_match_declaration_order() {
        for (i, key) in ModeKey::ALL.iter().enumerate() {
            assert_eq!(key.index(), i);
            assert_eq!(ModeKey::try_from(i as u8), Ok(*key));
        }
        assert_eq!(ModeKey::try_from(ModeKey::COUNT as u8), Err(7));
    }

    #[test]
    fn names_parse_back_to_keys() {
        for key in ModeKey::ALL {
            assert_eq!(key.name().parse::<ModeKey>(), Ok(key));
        }
        assert!("Cuda".parse::<ModeKey>().is_err());
    }

    #[test]
    fn key_set_membership() {
        let set = ModeKeySet::EMPTY
            .with(ModeKey::Autograd)
            .with(ModeKey::VmapMode);
        assert!(set.contains(ModeKey::Autograd));
        assert!(!set.contains(ModeKey::Python));
        assert_eq!(set.len(), 2);
        assert_eq!(
            set.iter().collect::<Vec<_>>(),
            vec![ModeKey::VmapMode, ModeKey::Autograd]
        );
        assert!(set.without(ModeKey::Autograd).without(ModeKey::VmapMode).is_empty());
        assert_eq!(ModeKeySet::FULL.len(), ModeKey::COUNT);
    }
}
