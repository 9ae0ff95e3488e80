//! Identity types for the event engine.
//!
//! All IDs are newtypes over `u32`. Event ids index directly into the pool;
//! station and attachment ids are the smallest integers unused at the time
//! they were handed out.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u32);

        impl $name {
            pub const INVALID: $name = $name(u32::MAX);

            #[inline]
            pub fn is_valid(self) -> bool {
                self != Self::INVALID
            }

            #[inline]
            pub fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                if *self == Self::INVALID {
                    write!(f, concat!(stringify!($name), "(INVALID)"))
                } else {
                    write!(f, concat!(stringify!($name), "({})"), self.0)
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Debug::fmt(self, f)
            }
        }
    };
}

define_id!(
    /// Index into the event pool.
    EventId
);

define_id!(
    /// Station identifier, unique across the main list and every parallel group.
    StationId
);

define_id!(
    /// Attachment identifier, unique system-wide.
    AttachmentId
);

impl StationId {
    /// GRAND_CENTRAL, the pool source and sink.
    pub const GRAND_CENTRAL: StationId = StationId(0);

    #[inline]
    pub fn is_grand_central(self) -> bool {
        self == Self::GRAND_CENTRAL
    }
}

/// Current owner of an event.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Owner {
    /// Queued in a station or being moved by a conductor
    #[default]
    System,
    Attachment(AttachmentId),
}

impl Owner {
    pub fn attachment(self) -> Option<AttachmentId> {
        match self {
            Owner::System => None,
            Owner::Attachment(id) => Some(id),
        }
    }
}

/// Smallest id not present in `used`.
pub(crate) fn smallest_unused(used: impl IntoIterator<Item = u32>) -> u32 {
    let mut taken: Vec<u32> = used.into_iter().collect();
    taken.sort_unstable();
    taken.dedup();
    let mut candidate = 0;
    for id in taken {
        if id != candidate {
            break;
        }
        candidate += 1;
    }
    candidate
}
