//! Control messages carried on the `ROSTER` channel.
//!
//! Wire format is a one-character tag followed by an identifier or a
//! comma-joined identifier list:
//!
//! | Message            | Wire        |
//! |--------------------|-------------|
//! | `Announce(N)`      | `N`         |
//! | `Reannounce`       | `0`         |
//! | `Claim(N)`         | `!N`        |
//! | `Leave(N)`         | `-N`        |
//! | `Handoff([a,b,c])` | `+a,b,c`    |

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use super::ProtocolError;
use crate::peer_id::PeerIdentity;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    /// A peer introduces itself under this identifier.
    Announce(PeerIdentity),
    /// Every peer should announce itself again (sent by a leader that
    /// does not know its followers).
    Reannounce,
    /// Objection: the identifier is already held by the sender, so the
    /// announcing peer must pick another one.
    Claim(PeerIdentity),
    /// A follower is terminating.
    Leave(PeerIdentity),
    /// A leader is terminating; followers in join order. The first one
    /// takes over, an empty list means every follower renegotiates.
    Handoff(Vec<PeerIdentity>),
}

impl ControlMessage {
    /// Encode for the `ROSTER` channel.
    pub fn encode(&self) -> String {
        self.to_string()
    }

    /// Parse a `ROSTER` value.
    pub fn parse(value: &str) -> Result<Self, ProtocolError> {
        value.parse()
    }

    /// Short name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Announce(_) => "announce",
            Self::Reannounce => "reannounce",
            Self::Claim(_) => "claim",
            Self::Leave(_) => "leave",
            Self::Handoff(_) => "handoff",
        }
    }
}

impl Display for ControlMessage {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Announce(id) => write!(f, "{id}"),
            Self::Reannounce => f.write_str("0"),
            Self::Claim(id) => write!(f, "!{id}"),
            Self::Leave(id) => write!(f, "-{id}"),
            Self::Handoff(successors) => {
                f.write_str("+")?;
                for (i, id) in successors.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{id}")?;
                }
                Ok(())
            }
        }
    }
}

impl FromStr for ControlMessage {
    type Err = ProtocolError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let identity = |text: &str| {
            text.parse::<PeerIdentity>()
                .map_err(|source| ProtocolError::InvalidControl {
                    value: value.to_string(),
                    source,
                })
        };

        if let Some(rest) = value.strip_prefix('!') {
            return Ok(Self::Claim(identity(rest)?));
        }
        if let Some(rest) = value.strip_prefix('-') {
            return Ok(Self::Leave(identity(rest)?));
        }
        if let Some(rest) = value.strip_prefix('+') {
            if rest.is_empty() {
                return Ok(Self::Handoff(Vec::new()));
            }
            let successors = rest
                .split(',')
                .map(identity)
                .collect::<Result<Vec<_>, _>>()?;
            return Ok(Self::Handoff(successors));
        }
        if value == "0" {
            return Ok(Self::Reannounce);
        }
        Ok(Self::Announce(identity(value)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(value: u64) -> PeerIdentity {
        PeerIdentity::new(value).unwrap()
    }

    #[test]
    fn test_encode() {
        assert_eq!(ControlMessage::Announce(id(42)).encode(), "42");
        assert_eq!(ControlMessage::Reannounce.encode(), "0");
        assert_eq!(ControlMessage::Claim(id(42)).encode(), "!42");
        assert_eq!(ControlMessage::Leave(id(7)).encode(), "-7");
        assert_eq!(
            ControlMessage::Handoff(vec![id(3), id(1), id(2)]).encode(),
            "+3,1,2"
        );
        assert_eq!(ControlMessage::Handoff(vec![]).encode(), "+");
    }

    #[test]
    fn test_parse_each_kind() {
        assert_eq!(ControlMessage::parse("42"), Ok(ControlMessage::Announce(id(42))));
        assert_eq!(ControlMessage::parse("0"), Ok(ControlMessage::Reannounce));
        assert_eq!(ControlMessage::parse("!42"), Ok(ControlMessage::Claim(id(42))));
        assert_eq!(ControlMessage::parse("-9"), Ok(ControlMessage::Leave(id(9))));
        assert_eq!(
            ControlMessage::parse("+5,6"),
            Ok(ControlMessage::Handoff(vec![id(5), id(6)]))
        );
        assert_eq!(ControlMessage::parse("+"), Ok(ControlMessage::Handoff(vec![])));
    }

    #[test]
    fn test_handoff_preserves_order() {
        let msg = ControlMessage::Handoff(vec![id(900), id(12), id(450)]);
        assert_eq!(ControlMessage::parse(&msg.encode()), Ok(msg));
    }

    #[test]
    fn test_reject_malformed() {
        assert!(ControlMessage::parse("").is_err());
        assert!(ControlMessage::parse("!").is_err());
        assert!(ControlMessage::parse("!0").is_err());
        assert!(ControlMessage::parse("-x").is_err());
        assert!(ControlMessage::parse("+1,,2").is_err());
        assert!(ControlMessage::parse("+1,").is_err());
        assert!(ControlMessage::parse("*5").is_err());
    }

    #[test]
    fn test_error_keeps_raw_value() {
        let err = ControlMessage::parse("+1,abc").unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidControl { ref value, .. } if value == "+1,abc"));
    }
}
