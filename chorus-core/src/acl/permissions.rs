//! Permission bits

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// Set of channel permissions (4 bytes)
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Permissions(pub u32);

impl Permissions {
    pub const NONE: Permissions = Permissions(0);

    pub const WRITE: Permissions = Permissions(0x001);
    pub const TRAVERSE: Permissions = Permissions(0x002);
    pub const ENTER: Permissions = Permissions(0x004);
    pub const SPEAK: Permissions = Permissions(0x008);
    pub const MUTE_DEAFEN: Permissions = Permissions(0x010);
    pub const MOVE: Permissions = Permissions(0x020);
    pub const MAKE_CHANNEL: Permissions = Permissions(0x040);
    pub const LINK_CHANNEL: Permissions = Permissions(0x080);
    pub const WHISPER: Permissions = Permissions(0x100);
    pub const TEXT_MESSAGE: Permissions = Permissions(0x200);

    pub const ALL: Permissions = Permissions(0x3ff);

    /// Granted to everyone before any ACL entry is applied
    pub const DEFAULT: Permissions = Permissions(
        Self::TRAVERSE.0 | Self::ENTER.0 | Self::SPEAK.0 | Self::WHISPER.0 | Self::TEXT_MESSAGE.0,
    );

    #[inline]
    pub fn bits(self) -> u32 {
        self.0
    }

    #[inline]
    pub fn contains(self, other: Permissions) -> bool {
        self.0 & other.0 == other.0
    }

    #[inline]
    pub fn insert(&mut self, other: Permissions) {
        self.0 |= other.0;
    }

    #[inline]
    pub fn remove(&mut self, other: Permissions) {
        self.0 &= !other.0;
    }

    #[inline]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for Permissions {
    type Output = Permissions;

    fn bitor(self, rhs: Permissions) -> Permissions {
        Permissions(self.0 | rhs.0)
    }
}

impl BitOrAssign for Permissions {
    fn bitor_assign(&mut self, rhs: Permissions) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for Permissions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#05x}", self.0)
    }
}
