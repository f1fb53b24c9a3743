use sprelay_core::error::RelayError;

/// The SP connection header is always exactly 8 bytes
pub const HEADER_SIZE: usize = 8;

const SIGNATURE: [u8; 4] = [0x00, b'S', b'P', 0x00];

/// Scalability protocol spoken on one side of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Pub,
    Sub,
}

impl Protocol {
    /// Wire identifier (16 * major + minor, as assigned by nanomsg).
    #[inline]
    pub const fn id(self) -> u16 {
        match self {
            Protocol::Pub => 0x20,
            Protocol::Sub => 0x21,
        }
    }

    /// Protocol the remote side must speak for us to accept it.
    #[inline]
    pub const fn peer(self) -> Protocol {
        match self {
            Protocol::Pub => Protocol::Sub,
            Protocol::Sub => Protocol::Pub,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Protocol::Pub => "PUB",
            Protocol::Sub => "SUB",
        }
    }
}

/// Parsed connection header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpHeader {
    pub protocol_id: u16,
}

impl SpHeader {
    pub const fn new(protocol: Protocol) -> Self {
        Self {
            protocol_id: protocol.id(),
        }
    }

    /// Encode the header
    ///
    /// Layout (SP TCP mapping):
    /// ```text
    /// [0]     0x00
    /// [1..3]  "SP"
    /// [3]     0x00 (version)
    /// [4..6]  Protocol id, big-endian
    /// [6..8]  Reserved, zero
    /// ```
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[..4].copy_from_slice(&SIGNATURE);
        out[4..6].copy_from_slice(&self.protocol_id.to_be_bytes());
        out
    }

    /// Parse an 8-byte header received from a peer.
    ///
    /// Reserved bytes are ignored, as nanomsg does.
    pub fn parse(src: &[u8]) -> sprelay_core::error::Result<Self> {
        if src.len() < HEADER_SIZE {
            return Err(RelayError::protocol(format!(
                "short header: {} bytes",
                src.len()
            )));
        }

        if src[..4] != SIGNATURE {
            return Err(RelayError::protocol("bad SP signature"));
        }

        Ok(Self {
            protocol_id: u16::from_be_bytes([src[4], src[5]]),
        })
    }

    /// Check that a peer sending this header may talk to `local`.
    pub fn check_peer_of(&self, local: Protocol) -> sprelay_core::error::Result<()> {
        let expected = local.peer().id();
        if self.protocol_id != expected {
            return Err(RelayError::IncompatiblePeer {
                expected,
                actual: self.protocol_id,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_sub_header() {
        let bytes = SpHeader::new(Protocol::Sub).encode();
        assert_eq!(bytes, [0x00, b'S', b'P', 0x00, 0x00, 0x21, 0x00, 0x00]);
    }

    #[test]
    fn test_parse_pub_header() {
        let header = SpHeader::parse(&[0x00, b'S', b'P', 0x00, 0x00, 0x20, 0x00, 0x00]).unwrap();
        assert_eq!(header.protocol_id, Protocol::Pub.id());
        assert!(header.check_peer_of(Protocol::Sub).is_ok());
    }

    #[test]
    fn test_reject_same_protocol() {
        let header = SpHeader::new(Protocol::Pub);
        let err = header.check_peer_of(Protocol::Pub).unwrap_err();
        assert!(matches!(
            err,
            RelayError::IncompatiblePeer { expected: 0x21, actual: 0x20 }
        ));
    }

    #[test]
    fn test_reject_bad_signature() {
        // A ZMTP greeting starts with 0xFF
        let zmtp = [0xFF, 0, 0, 0, 0, 0, 0, 0x01];
        assert!(matches!(SpHeader::parse(&zmtp), Err(RelayError::Protocol(_))));
    }

    #[test]
    fn test_short_header() {
        assert!(SpHeader::parse(&[0x00, b'S', b'P']).is_err());
    }
}
