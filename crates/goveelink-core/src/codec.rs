// ── Opcode frame codec ──
//
// Every message exchanged with a device, over BLE or embedded in a cloud
// envelope, is a 20-byte frame: opcode, identifier prefix, values, zero
// padding, and a trailing XOR checksum over the first 19 bytes.

use crate::error::CodecError;

/// Total frame length on the wire.
pub const FRAME_LEN: usize = 20;

/// Bytes available before the checksum.
pub const PAYLOAD_LEN: usize = FRAME_LEN - 1;

/// Opcode of report frames (device → bridge, and state queries).
pub const REPORT_IDENTIFIER: u8 = 0xAA;

/// Opcode of command frames (bridge → device).
pub const COMMAND_IDENTIFIER: u8 = 0x33;

/// A complete, checksummed frame.
pub type Frame = [u8; FRAME_LEN];

/// Build a frame from `opcode`, `identifier` and `values`.
///
/// The bytes are laid out back to back, zero-padded to 19 bytes, then the
/// XOR of those 19 bytes is appended.
pub fn encode(opcode: u8, identifier: &[u8], values: &[u8]) -> Result<Frame, CodecError> {
    let len = 1 + identifier.len() + values.len();
    if len > PAYLOAD_LEN {
        return Err(CodecError::Overflow {
            len,
            max: PAYLOAD_LEN,
        });
    }

    let mut frame = [0_u8; FRAME_LEN];
    frame[0] = opcode;
    frame[1..=identifier.len()].copy_from_slice(identifier);
    frame[1 + identifier.len()..len].copy_from_slice(values);
    frame[PAYLOAD_LEN] = checksum(&frame[..PAYLOAD_LEN]);
    Ok(frame)
}

/// XOR-fold of `bytes`.
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0, |acc, b| acc ^ b)
}

/// Whether a 20-byte frame carries a valid trailing checksum.
pub fn verify(frame: &[u8]) -> bool {
    frame.len() == FRAME_LEN && checksum(&frame[..PAYLOAD_LEN]) == frame[PAYLOAD_LEN]
}

/// Find the first frame whose bytes after the opcode start with `prefix`
/// and return what follows the prefix.
///
/// Frames are scanned in order; the first match wins.
pub fn match_frame<'a, F>(prefix: &[u8], frames: &'a [F]) -> Option<&'a [u8]>
where
    F: AsRef<[u8]>,
{
    frames.iter().find_map(|frame| {
        let body = frame.as_ref().get(1..)?;
        body.strip_prefix(prefix)
    })
}

/// Decode a two-byte quantity the way the firmware reports it: `hi * 255 + lo`.
///
/// This is not the conventional `hi * 256 + lo`; values are kept exactly
/// as devices have always been interpreted.
pub fn decode_u16_quirk(hi: u8, lo: u8) -> u16 {
    u16::from(hi) * 255 + u16::from(lo)
}

/// Render a frame as lower-case hex for logs.
pub fn to_hex(frame: &[u8]) -> String {
    hex::encode(frame)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn encode_lays_out_bytes_and_pads() {
        let frame = encode(5, &[2, 255, 255, 255, 1], &[50, 51, 52]).unwrap();

        assert_eq!(&frame[..8], &[5, 2, 255, 255, 255, 1, 50, 51]);
        assert_eq!(frame[8], 52);
        assert!(frame[9..19].iter().all(|b| *b == 0));
        assert_eq!(frame[19], checksum(&frame[..19]));
    }

    #[test]
    fn color_temperature_command_matches_known_checksum() {
        let frame = encode(COMMAND_IDENTIFIER, &[5, 2, 255, 255, 255, 1], &[20, 80, 40]).unwrap();
        assert_eq!(frame[19], 166);
        assert!(verify(&frame));
    }

    #[test]
    fn checksum_is_xor_of_first_nineteen_bytes() {
        for (opcode, identifier, values) in [
            (REPORT_IDENTIFIER, vec![1], vec![]),
            (COMMAND_IDENTIFIER, vec![4], vec![100]),
            (COMMAND_IDENTIFIER, vec![5, 21, 1], vec![255, 0, 0, 0, 0, 0, 0, 0, 0xff, 0x7f]),
            (0x00, vec![0; 18], vec![]),
        ] {
            let frame = encode(opcode, &identifier, &values).unwrap();
            assert_eq!(frame.len(), FRAME_LEN);
            let expected = frame[..19].iter().fold(0_u8, |acc, b| acc ^ b);
            assert_eq!(frame[19], expected);
        }
    }

    #[test]
    fn encode_rejects_oversized_payload() {
        let err = encode(COMMAND_IDENTIFIER, &[1; 10], &[2; 9]).unwrap_err();
        assert_eq!(err, CodecError::Overflow { len: 20, max: 19 });

        assert!(encode(COMMAND_IDENTIFIER, &[1; 10], &[2; 8]).is_ok());
    }

    #[test]
    fn match_returns_remainder_after_prefix() {
        let frames = vec![vec![0xAA, 5, 2, 255, 255, 255, 1, 50, 51, 52]];
        let rest = match_frame(&[5, 2, 255, 255, 255, 1], &frames).unwrap();
        assert_eq!(rest, &[50, 51, 52]);
    }

    #[test]
    fn match_absent_when_nothing_matches() {
        let frames = vec![vec![0xAA, 1, 1], vec![0xAA, 4, 80]];
        assert!(match_frame(&[5], &frames).is_none());
        assert!(match_frame::<Vec<u8>>(&[1], &[]).is_none());
    }

    #[test]
    fn match_first_frame_wins() {
        let frames = vec![vec![0xAA, 4, 10], vec![0xAA, 4, 90]];
        assert_eq!(match_frame(&[4], &frames).unwrap(), &[10]);
    }

    #[test]
    fn match_skips_opcode_byte() {
        // The opcode itself never participates in matching.
        let frames = vec![vec![4, 1, 1]];
        assert!(match_frame(&[4], &frames).is_none());
        assert_eq!(match_frame(&[1], &frames).unwrap(), &[1]);
    }

    #[test]
    fn quirky_u16_uses_255_multiplier() {
        assert_eq!(decode_u16_quirk(0, 0), 0);
        assert_eq!(decode_u16_quirk(1, 0), 255);
        assert_eq!(decode_u16_quirk(2, 10), 520);
        assert_eq!(decode_u16_quirk(255, 255), 65280);
    }

    #[test]
    fn hex_rendering() {
        assert_eq!(to_hex(&[0xAA, 0x01, 0x00]), "aa0100");
    }
}
