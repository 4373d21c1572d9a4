//! Identifier types.
//!
//! Two families of identifiers live here:
//!
//! - **Entity handles** ([`EntityKey`], [`EffectHandle`]) are slot-map keys:
//!   an index plus a generation counter. A handle to an entity that has been
//!   removed from the world fails its generation check, so a stale damage
//!   target is detected with a cheap lookup instead of keeping the entity
//!   alive.
//! - **Instance identities** ([`InstanceId`], [`SourceId`]) are UUID v7
//!   newtypes, generated once when an aggregator copy is loaded or a hazard
//!   source enters the world.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

slotmap::new_key_type! {
    /// Generation-checked handle into the world's entity table.
    pub struct EntityKey;

    /// Generation-checked handle to a live particle effect owned by the host.
    pub struct EffectHandle;
}

/// Generates a newtype wrapper around [`Uuid`] with standard derives.
macro_rules! define_id {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Create a new identifier using UUID v7 (time-ordered).
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            /// Return the inner [`Uuid`] value.
            pub const fn into_inner(self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }
    };
}

define_id! {
    /// Identity of one loaded copy of the aggregation logic.
    InstanceId
}

define_id! {
    /// Identity of one hazard source (one planet-like body).
    SourceId
}

/// Identifier of a particle effect definition in the hazard-rule table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EffectId(pub u32);

impl core::fmt::Display for EffectId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "effect#{}", self.0)
    }
}
