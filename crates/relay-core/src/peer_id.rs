//! PeerIdentity: the identifier a peer negotiates on the shared bus.
//!
//! Identifiers are random integers in `[1, 10_000_000_000]` rendered as
//! plain decimal text, which is also their wire format on the `ROSTER`
//! channel. `0` is reserved for the collective re-announce request.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Largest identifier `generate()` can return.
pub const MAX_IDENTITY: u64 = 10_000_000_000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PeerIdError {
    #[error("Invalid peer identity: {0}")]
    InvalidNumber(#[from] std::num::ParseIntError),
    #[error("Peer identity {0} outside 1..={MAX_IDENTITY}")]
    OutOfRange(u64),
}

/// A peer's identifier, unique among live peers once negotiation settles.
///
/// # Examples
/// ```
/// use relay_core::PeerIdentity;
///
/// let identity = PeerIdentity::generate();
/// let parsed: PeerIdentity = identity.to_string().parse().unwrap();
/// assert_eq!(identity, parsed);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerIdentity(u64);

impl PeerIdentity {
    /// Sample a new identifier uniformly from `[1, MAX_IDENTITY]`.
    pub fn generate() -> Self {
        use rand::Rng;
        Self(rand::rng().random_range(1..=MAX_IDENTITY))
    }

    /// Sample a replacement identifier that differs from `self`.
    ///
    /// Used after another peer objected to our identifier.
    pub fn regenerate(self) -> Self {
        loop {
            let next = Self::generate();
            if next != self {
                return next;
            }
        }
    }

    /// Build an identity from a raw value, validating the range.
    pub fn new(value: u64) -> Result<Self, PeerIdError> {
        if (1..=MAX_IDENTITY).contains(&value) {
            Ok(Self(value))
        } else {
            Err(PeerIdError::OutOfRange(value))
        }
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// Identity-derived delay of `identity mod modulus` milliseconds.
    ///
    /// Spreads re-announces and recovery promotions so peers reacting to
    /// the same notification do not all write at once.
    pub fn jitter(&self, modulus: Duration) -> Duration {
        let modulus_ms = modulus.as_millis() as u64;
        if modulus_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(self.0 % modulus_ms)
    }
}

impl Display for PeerIdentity {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for PeerIdentity {
    type Err = PeerIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.parse::<u64>()?)
    }
}

impl TryFrom<u64> for PeerIdentity {
    type Error = PeerIdError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<PeerIdentity> for u64 {
    fn from(identity: PeerIdentity) -> u64 {
        identity.0
    }
}

// Serialize as decimal string, matching the wire format
impl serde::Serialize for PeerIdentity {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.to_string())
    }
}

impl<'de> serde::Deserialize<'de> for PeerIdentity {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
