//! Typed indices into the global coordinate arrays.

use std::fmt;

macro_rules! typed_index {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(pub usize);

        impl $name {
            /// Raw array offset.
            #[inline]
            pub fn index(self) -> usize {
                self.0
            }
        }

        impl From<usize> for $name {
            fn from(i: usize) -> Self {
                Self(i)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

typed_index!(
    /// Body number in the tree; 0 is ground.
    BodyIndex
);
typed_index!(
    /// First slot of a joint in the generalized position vector `q`.
    QIndex
);
typed_index!(
    /// First slot of a joint in the generalized velocity vector `u`.
    UIndex
);
typed_index!(
    /// First slot of a joint's `nu × nu` block in the u-squared pool.
    USquaredIndex
);
typed_index!(
    /// Offset within one joint's own position coordinates.
    MobilizerQIndex
);

impl BodyIndex {
    /// The immovable ground body.
    pub const GROUND: BodyIndex = BodyIndex(0);

    /// True for the ground body.
    pub fn is_ground(self) -> bool {
        self.0 == 0
    }
}

/// Running allocation cursors used while the tree is being built.
///
/// Each node takes the next free slots when it is constructed and advances
/// the cursors by what it consumed, so the ranges of distinct nodes are
/// contiguous and never overlap.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SlotCursor {
    /// Next free `u` slot.
    pub next_u: UIndex,
    /// Next free u-squared slot.
    pub next_usq: USquaredIndex,
    /// Next free `q` slot.
    pub next_q: QIndex,
}

impl SlotCursor {
    /// Cursor for an empty tree.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve `nq` position slots, `nu` velocity slots and `nu²` u-squared
    /// slots, returning where each range starts.
    pub fn reserve(&mut self, nq: usize, nu: usize) -> (QIndex, UIndex, USquaredIndex) {
        let slots = (self.next_q, self.next_u, self.next_usq);
        self.next_q.0 += nq;
        self.next_u.0 += nu;
        self.next_usq.0 += nu * nu;
        slots
    }
}
