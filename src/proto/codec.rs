// src/proto/codec.rs
use thiserror::Error;

use super::packet::{DeviceDescriptor, DeviceType, NameWidth, Packet, PacketType, ValueReport};

/// Frame sentinel.
pub const FRAME_HEADER: u8 = 0xAA;
/// Largest payload a one-byte length prefix can describe.
pub const MAX_PAYLOAD_LEN: usize = u8::MAX as usize;

const VALUE_REPORT_LEN: usize = 4;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("empty payload")]
    Empty,
    #[error("payload of {0} bytes does not fit a one-byte length")]
    PayloadTooLarge(usize),
    #[error("unknown packet type: 0x{0:02X}")]
    UnknownPacketType(u8),
    #[error("unknown device type: {0}")]
    UnknownDeviceType(u8),
    #[error("bad length for {kind:?}: expected {expected}, got {got}")]
    BadLength {
        kind: PacketType,
        expected: usize,
        got: usize,
    },
}

/// Encodes and decodes packets for one name width.
#[derive(Debug, Clone, Copy, Default)]
pub struct Codec {
    width: NameWidth,
}

impl Codec {
    pub fn new(width: NameWidth) -> Self {
        Self { width }
    }

    /// Serialize a packet to its payload (type byte first, no framing).
    pub fn encode_payload(&self, packet: &Packet) -> Result<Vec<u8>, CodecError> {
        let mut out = vec![packet.packet_type() as u8];
        match packet {
            Packet::ResetDeviceMatrix => {}
            Packet::FullSync(devices) => {
                let count = u8::try_from(devices.len())
                    .map_err(|_| CodecError::PayloadTooLarge(self.full_sync_len(devices.len())))?;
                out.push(count);
                for d in devices {
                    self.push_descriptor(&mut out, d);
                }
            }
            Packet::DeltaUpdate(device) => self.push_descriptor(&mut out, device),
            Packet::ValueReport(r) => {
                out.extend_from_slice(&[r.id, r.value, r.device_type as u8]);
            }
        }
        if out.len() > MAX_PAYLOAD_LEN {
            return Err(CodecError::PayloadTooLarge(out.len()));
        }
        Ok(out)
    }

    /// Serialize a packet to a complete `0xAA LEN payload` frame.
    pub fn encode_frame(&self, packet: &Packet) -> Result<Vec<u8>, CodecError> {
        frame(&self.encode_payload(packet)?)
    }

    /// Parse one complete payload as handed out by the receiver.
    pub fn decode(&self, payload: &[u8]) -> Result<Packet, CodecError> {
        let (&tag, body) = payload.split_first().ok_or(CodecError::Empty)?;
        let kind = PacketType::try_from(tag).map_err(CodecError::UnknownPacketType)?;
        let desc_len = self.width.descriptor_len();

        match kind {
            PacketType::ResetDeviceMatrix => {
                expect_len(kind, 1, payload.len())?;
                Ok(Packet::ResetDeviceMatrix)
            }
            PacketType::DeltaUpdate => {
                expect_len(kind, 1 + desc_len, payload.len())?;
                Ok(Packet::DeltaUpdate(self.read_descriptor(body)?))
            }
            PacketType::FullSync => {
                let (&count, rest) = body.split_first().ok_or(CodecError::BadLength {
                    kind,
                    expected: 2,
                    got: payload.len(),
                })?;
                expect_len(kind, self.full_sync_len(count as usize), payload.len())?;
                let devices = rest
                    .chunks_exact(desc_len)
                    .map(|chunk| self.read_descriptor(chunk))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Packet::FullSync(devices))
            }
            PacketType::ValueReport => {
                expect_len(kind, VALUE_REPORT_LEN, payload.len())?;
                Ok(Packet::ValueReport(ValueReport {
                    id: body[0],
                    value: body[1],
                    device_type: device_type(body[2])?,
                }))
            }
        }
    }

    fn full_sync_len(&self, count: usize) -> usize {
        2 + count * self.width.descriptor_len()
    }

    fn push_descriptor(&self, out: &mut Vec<u8>, d: &DeviceDescriptor) {
        out.extend_from_slice(&fixed_name(&d.name, self.width));
        out.extend_from_slice(&[d.id, d.value, d.device_type as u8]);
    }

    fn read_descriptor(&self, bytes: &[u8]) -> Result<DeviceDescriptor, CodecError> {
        let w = self.width.bytes();
        Ok(DeviceDescriptor {
            name: parse_name(&bytes[..w]),
            id: bytes[w],
            value: bytes[w + 1],
            device_type: device_type(bytes[w + 2])?,
        })
    }
}

/// Wrap a payload in `0xAA LEN`. Payloads over 255 bytes are rejected.
pub fn frame(payload: &[u8]) -> Result<Vec<u8>, CodecError> {
    let len = u8::try_from(payload.len()).map_err(|_| CodecError::PayloadTooLarge(payload.len()))?;
    let mut out = Vec::with_capacity(payload.len() + 2);
    out.push(FRAME_HEADER);
    out.push(len);
    out.extend_from_slice(payload);
    Ok(out)
}

/// ASCII name of exactly `width` bytes: NUL padded, or truncated with a
/// trailing NUL when it would overflow.
pub fn fixed_name(name: &str, width: NameWidth) -> Vec<u8> {
    let w = width.bytes();
    let mut out: Vec<u8> = name
        .chars()
        .map(|c| if c.is_ascii() { c as u8 } else { b'?' })
        .take(w)
        .collect();
    if out.len() >= w {
        out.truncate(w - 1);
    }
    out.resize(w, 0);
    out
}

/// Inverse of [`fixed_name`]: bytes up to the first NUL.
pub fn parse_name(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

/* ---------- helpers ---------- */

fn device_type(b: u8) -> Result<DeviceType, CodecError> {
    DeviceType::try_from(b).map_err(CodecError::UnknownDeviceType)
}

fn expect_len(kind: PacketType, expected: usize, got: usize) -> Result<(), CodecError> {
    if expected != got {
        return Err(CodecError::BadLength {
            kind,
            expected,
            got,
        });
    }
    Ok(())
}

/* ---------- tests ---------- */

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn main_display() -> DeviceDescriptor {
        DeviceDescriptor {
            name: "Main".into(),
            id: 0,
            value: 40,
            device_type: DeviceType::Brightness,
        }
    }

    #[test]
    fn reset_frame_is_three_bytes() {
        let bytes = Codec::default()
            .encode_frame(&Packet::ResetDeviceMatrix)
            .unwrap();
        assert_eq!(bytes, vec![0xAA, 0x01, 0x00]);
    }

    #[test]
    fn delta_update_layout_matches_firmware() {
        let bytes = Codec::new(NameWidth::Long)
            .encode_frame(&Packet::DeltaUpdate(DeviceDescriptor {
                name: "Innocn 34E7R".into(),
                id: 1,
                value: 0x28,
                device_type: DeviceType::Brightness,
            }))
            .unwrap();
        assert_eq!(bytes.len(), 2 + 36);
        assert_eq!(&bytes[..3], &[0xAA, 0x24, 0x02]);
        assert_eq!(&bytes[3..15], b"Innocn 34E7R");
        assert!(bytes[15..35].iter().all(|&b| b == 0));
        assert_eq!(&bytes[35..], &[0x01, 0x28, 0x01]);
    }

    #[test]
    fn short_width_descriptor() {
        let codec = Codec::new(NameWidth::Short);
        let payload = codec
            .encode_payload(&Packet::DeltaUpdate(main_display()))
            .unwrap();
        assert_eq!(payload.len(), 1 + 16 + 3);
        assert_eq!(
            codec.decode(&payload).unwrap(),
            Packet::DeltaUpdate(main_display())
        );
    }

    #[test]
    fn long_names_are_truncated_with_trailing_nul() {
        let name = fixed_name("A very long speaker name indeed", NameWidth::Short);
        assert_eq!(name.len(), 16);
        assert_eq!(&name[..15], b"A very long spe");
        assert_eq!(name[15], 0);

        let exact = fixed_name("0123456789abcdef", NameWidth::Short);
        assert_eq!(&exact[..15], b"0123456789abcde");
        assert_eq!(exact[15], 0);
    }

    #[test]
    fn non_ascii_becomes_question_mark() {
        let name = fixed_name("Lautsprecher Ü", NameWidth::Short);
        assert_eq!(parse_name(&name), "Lautsprecher ?");
    }

    #[test]
    fn value_report_decodes() {
        let packet = Codec::default().decode(&[0x10, 2, 50, 1]).unwrap();
        assert_eq!(
            packet,
            Packet::ValueReport(ValueReport {
                id: 2,
                value: 50,
                device_type: DeviceType::Brightness,
            })
        );
    }

    #[test]
    fn full_sync_roundtrip() {
        let codec = Codec::default();
        let devices = vec![
            main_display(),
            DeviceDescriptor {
                name: "Speakers".into(),
                id: 1,
                value: 75,
                device_type: DeviceType::Volume,
            },
        ];
        let payload = codec
            .encode_payload(&Packet::FullSync(devices.clone()))
            .unwrap();
        assert_eq!(payload[1], 2);
        assert_eq!(codec.decode(&payload).unwrap(), Packet::FullSync(devices));
    }

    #[test]
    fn full_sync_over_255_bytes_is_rejected() {
        let devices = vec![main_display(); 8]; // 2 + 8 * 35 = 282
        let err = Codec::default()
            .encode_payload(&Packet::FullSync(devices))
            .unwrap_err();
        assert_eq!(err, CodecError::PayloadTooLarge(282));
    }

    #[test]
    fn frame_rejects_oversized_payload() {
        assert!(frame(&[0u8; 255]).is_ok());
        assert_eq!(
            frame(&[0u8; 256]).unwrap_err(),
            CodecError::PayloadTooLarge(256)
        );
    }

    #[test]
    fn test_error_cases() {
        let codec = Codec::default();
        assert_eq!(codec.decode(&[]), Err(CodecError::Empty));
        assert_eq!(
            codec.decode(&[0x7F, 1, 2]),
            Err(CodecError::UnknownPacketType(0x7F))
        );
        assert_eq!(
            codec.decode(&[0x10, 1, 2, 9]),
            Err(CodecError::UnknownDeviceType(9))
        );
        assert!(matches!(
            codec.decode(&[0x10, 1, 2]),
            Err(CodecError::BadLength { expected: 4, got: 3, .. })
        ));
        assert!(matches!(
            codec.decode(&[0x01]),
            Err(CodecError::BadLength { .. })
        ));
        assert!(matches!(
            codec.decode(&[0x00, 0x00]),
            Err(CodecError::BadLength { .. })
        ));
    }

    fn any_device_type() -> impl Strategy<Value = DeviceType> {
        prop_oneof![Just(DeviceType::Volume), Just(DeviceType::Brightness)]
    }

    proptest! {
        #[test]
        fn descriptor_roundtrip(
            name in "[ -~]{0,31}",
            id in any::<u8>(),
            value in any::<u8>(),
            device_type in any_device_type(),
        ) {
            let codec = Codec::new(NameWidth::Long);
            let d = DeviceDescriptor { name, id, value, device_type };
            let payload = codec.encode_payload(&Packet::DeltaUpdate(d.clone())).unwrap();
            prop_assert_eq!(codec.decode(&payload).unwrap(), Packet::DeltaUpdate(d));
        }

        #[test]
        fn name_field_is_always_fixed_width(name in ".{0,64}") {
            for width in [NameWidth::Short, NameWidth::Long] {
                let bytes = fixed_name(&name, width);
                prop_assert_eq!(bytes.len(), width.bytes());
                prop_assert!(parse_name(&bytes).len() < width.bytes());
            }
        }
    }
}
