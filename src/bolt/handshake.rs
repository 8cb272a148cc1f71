//! Client-side Bolt handshake.
//!
//! Immediately after the socket opens, the client sends 20 bytes: the magic
//! preamble followed by four 4-byte version proposals in descending
//! preference, zero-padded. The server answers with the 4-byte version it
//! picked (or zeros when nothing matched).

use super::error::HandshakeError;

/// Bolt magic preamble
pub const BOLT_MAGIC: [u8; 4] = [0x60, 0x60, 0xB0, 0x17];

/// Handshake request size: magic + four proposals
pub const HANDSHAKE_SIZE: usize = 20;

/// Handshake response size
pub const HANDSHAKE_RESPONSE_SIZE: usize = 4;

/// Versions this driver speaks, highest first.
pub const SUPPORTED_VERSIONS: [(u8, u8); 2] = [(5, 8), (5, 2)];

/// Build the 20-byte client handshake.
///
/// Each proposal is encoded big-endian as `[0, 0, minor, major]` on the
/// wire; unused slots stay zero.
pub fn build_handshake() -> [u8; HANDSHAKE_SIZE] {
    let mut buf = [0u8; HANDSHAKE_SIZE];
    buf[0..4].copy_from_slice(&BOLT_MAGIC);

    for (i, (major, minor)) in SUPPORTED_VERSIONS.iter().enumerate() {
        let offset = 4 + i * 4;
        buf[offset + 2] = *minor;
        buf[offset + 3] = *major;
    }

    buf
}

/// Parse and validate the 4-byte server response.
///
/// `byte[3]` is the major version, `byte[2]` the minor. The ASCII pair
/// `(80, 84)` ("HT") means the server answered with an HTTP response;
/// anything outside the proposed repertoire is rejected.
pub fn parse_handshake_response(
    response: [u8; HANDSHAKE_RESPONSE_SIZE],
) -> Result<(u8, u8), HandshakeError> {
    let major = response[3];
    let minor = response[2];

    if major == 80 && minor == 84 {
        return Err(HandshakeError::HttpEndpoint);
    }

    if !SUPPORTED_VERSIONS.contains(&(major, minor)) {
        return Err(HandshakeError::UnsupportedVersion { major, minor });
    }

    Ok((major, minor))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handshake_layout() {
        let buf = build_handshake();

        assert_eq!(&buf[0..4], &BOLT_MAGIC);
        // First proposal: 5.8
        assert_eq!(&buf[4..8], &[0, 0, 8, 5]);
        // Second proposal: 5.2
        assert_eq!(&buf[8..12], &[0, 0, 2, 5]);
        // Remaining slots zero-padded
        assert_eq!(&buf[12..16], &[0, 0, 0, 0]);
        assert_eq!(&buf[16..20], &[0, 0, 0, 0]);
    }

    #[test]
    fn test_parse_accepted_versions() {
        assert_eq!(parse_handshake_response([0, 0, 8, 5]), Ok((5, 8)));
        assert_eq!(parse_handshake_response([0, 0, 2, 5]), Ok((5, 2)));
    }

    #[test]
    fn test_parse_http_response() {
        // "HTTP" starts with 'H'=72... the version bytes land on 'T'(84),'P'(80)
        let err = parse_handshake_response([b'H', b'T', b'T', b'P']).unwrap_err();
        assert_eq!(err, HandshakeError::HttpEndpoint);
    }

    #[test]
    fn test_parse_unsupported_versions() {
        let err = parse_handshake_response([0, 0, 0, 4]).unwrap_err();
        assert_eq!(err, HandshakeError::UnsupportedVersion { major: 4, minor: 0 });

        let err = parse_handshake_response([0, 0, 4, 5]).unwrap_err();
        assert_eq!(err, HandshakeError::UnsupportedVersion { major: 5, minor: 4 });

        // All-zero response: no common version
        let err = parse_handshake_response([0, 0, 0, 0]).unwrap_err();
        assert_eq!(err, HandshakeError::UnsupportedVersion { major: 0, minor: 0 });
    }
}
