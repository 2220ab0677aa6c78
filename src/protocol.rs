//! Framing of the eBike status broadcast.
//!
//! The status characteristic notifies buffers holding zero or more
//! back-to-back messages:
//!
//! ```text
//! ┌──────┬────────┬────────────┬───────────┬─────────────┐
//! │ 0x30 │ length │ id (BE)    │ data type │ payload     │
//! │ 1    │ 1      │ 2          │ 1         │ length - 3  │
//! └──────┴────────┴────────────┴───────────┴─────────────┘
//! ```
//!
//! `length` counts everything after itself, so a frame is `length + 2`
//! bytes. Frames with `length == 2` carry only the ID.

use bytes::{BufMut, Bytes, BytesMut};
use tracing::{debug, trace};

use crate::types::PayloadFallback;

/// Byte that opens every frame
pub const START_MARKER: u8 = 0x30;

/// Smallest valid length field (ID only)
pub const MIN_MESSAGE_LENGTH: usize = 2;

/// Largest length field accepted before the marker is treated as noise
pub const MAX_MESSAGE_LENGTH: usize = 50;

/// Varints longer than this are cut off
pub const MAX_VARINT_BYTES: usize = 5;

/// Cadence, half-RPM
pub const ID_CADENCE: u16 = 0x985A;
/// Rider power, watts
pub const ID_HUMAN_POWER: u16 = 0x985B;
/// Motor power, watts
pub const ID_MOTOR_POWER: u16 = 0x985D;
/// Speed, 1/100 km/h
pub const ID_SPEED: u16 = 0x982D;
/// Battery percent on older firmware
pub const ID_BATTERY: u16 = 0x8088;
/// Battery percent on newer firmware
pub const ID_BATTERY_EXTENDED: u16 = 0x80BC;
/// Assist level
pub const ID_ASSIST_MODE: u16 = 0x9809;
/// Odometer, metres
pub const ID_TOTAL_DISTANCE: u16 = 0x9818;
/// Lifetime battery energy, Wh
pub const ID_TOTAL_BATTERY: u16 = 0x809C;

/// Payload encodings found in the data type byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DataType {
    /// Base-128 varint
    Varint = 0x08,
    /// Single raw byte
    RawByte = 0x0A,
}

impl DataType {
    /// Convert from u8
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x08 => Some(Self::Varint),
            0x0A => Some(Self::RawByte),
            _ => None,
        }
    }
}

/// One decoded protocol message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Message ID
    pub id: u16,
    /// Data type byte, 0 when the frame has no payload
    pub data_type: u8,
    /// Decoded value, 0 when absent
    pub value: i32,
    /// Frame bytes from the start marker through the end of the payload
    pub raw: Bytes,
}

impl Message {
    /// Payload encoding, if known
    #[must_use]
    pub const fn kind(&self) -> Option<DataType> {
        DataType::from_u8(self.data_type)
    }
}

/// Decode a base-128 varint starting at `start`
///
/// Returns the value and the number of bytes consumed. Groups beyond
/// [`MAX_VARINT_BYTES`] are not read; bits above 32 are dropped and the
/// result is reinterpreted as signed. An out-of-range `start` yields `(0, 0)`.
#[must_use]
#[allow(clippy::cast_possible_wrap)]
pub fn decode_varint(data: &[u8], start: usize) -> (i32, usize) {
    let Some(bytes) = data.get(start..) else {
        return (0, 0);
    };

    let mut result: u32 = 0;
    let mut consumed = 0;

    for (i, &byte) in bytes.iter().take(MAX_VARINT_BYTES).enumerate() {
        result |= u32::from(byte & 0x7F) << (7 * i);
        consumed += 1;
        if byte & 0x80 == 0 {
            break;
        }
    }

    (result as i32, consumed)
}

/// Encode a value as a base-128 varint
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn encode_varint(mut value: u32) -> Bytes {
    let mut buf = BytesMut::with_capacity(MAX_VARINT_BYTES);
    while value >= 0x80 {
        buf.put_u8((value as u8 & 0x7F) | 0x80);
        value >>= 7;
    }
    buf.put_u8(value as u8);
    buf.freeze()
}

/// Build a varint-typed frame for `id`
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn encode_frame(id: u16, value: u32) -> Bytes {
    let payload = encode_varint(value);
    let mut buf = BytesMut::with_capacity(5 + payload.len());
    buf.put_u8(START_MARKER);
    // id + data type + payload; a u32 varint is at most 5 bytes
    buf.put_u8(3 + payload.len() as u8);
    buf.put_u16(id);
    buf.put_u8(DataType::Varint as u8);
    buf.extend_from_slice(&payload);
    buf.freeze()
}

/// Splits notification buffers into messages
///
/// Decoding never fails. Leading noise and bad length fields are skipped one
/// byte at a time; a frame cut off by the end of the buffer ends the call and
/// is dropped. Frames do not carry over between calls.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameDecoder {
    fallback: PayloadFallback,
}

impl FrameDecoder {
    /// Create a decoder with the given unknown data type policy
    #[must_use]
    pub const fn new(fallback: PayloadFallback) -> Self {
        Self { fallback }
    }

    /// Decode every complete frame in `data`
    #[must_use]
    pub fn decode(&self, data: &[u8]) -> Vec<Message> {
        trace!("Decoding buffer: {:02X?}", data);

        let mut messages = Vec::new();
        let mut index = 0;

        while index < data.len() {
            if data[index] != START_MARKER {
                index += 1;
                continue;
            }

            if index + 2 >= data.len() {
                debug!("Buffer ends inside a frame header at {index}");
                break;
            }

            let length = usize::from(data[index + 1]);
            if !(MIN_MESSAGE_LENGTH..=MAX_MESSAGE_LENGTH).contains(&length) {
                debug!("Invalid message length {length} at {index}, resyncing");
                index += 1;
                continue;
            }

            let total = length + 2;
            if index + total > data.len() {
                debug!(
                    "Incomplete frame at {index}: need {total} bytes, have {}",
                    data.len() - index
                );
                break;
            }

            let frame = &data[index..index + total];
            messages.push(self.decode_frame(frame, length));
            index += total;
        }

        debug!("Decoded {} message(s)", messages.len());
        messages
    }

    fn decode_frame(&self, frame: &[u8], length: usize) -> Message {
        let id = u16::from_be_bytes([frame[2], frame[3]]);

        let (data_type, value) = if length > MIN_MESSAGE_LENGTH {
            let data_type = frame[4];
            let payload = &frame[5..];
            let first = payload.first().map_or(0, |&b| i32::from(b));
            let value = match DataType::from_u8(data_type) {
                Some(DataType::Varint) => decode_varint(payload, 0).0,
                Some(DataType::RawByte) => first,
                None => match self.fallback {
                    PayloadFallback::Zero => 0,
                    PayloadFallback::FirstByte => first,
                },
            };
            (data_type, value)
        } else {
            (0, 0)
        };

        trace!("Message 0x{id:04X}: type 0x{data_type:02X}, value {value}");

        Message {
            id,
            data_type,
            value,
            raw: Bytes::copy_from_slice(frame),
        }
    }
}

/// Decode a buffer with the default policy
#[must_use]
pub fn decode(data: &[u8]) -> Vec<Message> {
    FrameDecoder::default().decode(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_varint_single_byte() {
        assert_eq!(decode_varint(&[0x0A], 0), (10, 1));
        assert_eq!(decode_varint(&[0x7F], 0), (127, 1));
    }

    #[test]
    fn test_varint_multi_byte() {
        // 0x09F4 from a captured speed frame
        assert_eq!(decode_varint(&[0xF4, 0x09], 0), (1268, 2));
        assert_eq!(decode_varint(&[0xAF, 0xD3, 0xC0, 0x01], 0), (3_156_399, 4));
    }

    #[test]
    fn test_varint_start_offset() {
        assert_eq!(decode_varint(&[0xFF, 0x96, 0x01], 1), (150, 2));
        assert_eq!(decode_varint(&[0x01, 0x02], 2), (0, 0));
        assert_eq!(decode_varint(&[], 0), (0, 0));
        assert_eq!(decode_varint(&[0x01], 10), (0, 0));
    }

    #[test]
    fn test_varint_stops_after_five_bytes() {
        let data = [0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x01];
        let (value, consumed) = decode_varint(&data, 0);
        assert_eq!(consumed, 5);
        // 35 bits of ones truncated to 32
        assert_eq!(value, -1);
    }

    #[test]
    fn test_varint_unterminated_at_end() {
        assert_eq!(decode_varint(&[0x80, 0x80], 0), (0, 2));
    }

    #[test]
    fn test_varint_round_trip() {
        let samples = (0..28)
            .flat_map(|bit| [1u32 << bit, (1u32 << bit) - 1, (1u32 << bit) + 1])
            .chain([0, 300, 0x0FFF_FFFF]);

        for value in samples.filter(|v| *v < 1 << 28) {
            let encoded = encode_varint(value);
            let minimal = if value == 0 {
                1
            } else {
                (32 - value.leading_zeros() as usize).div_ceil(7)
            };
            assert_eq!(encoded.len(), minimal, "length for {value}");
            assert_eq!(
                decode_varint(&encoded, 0),
                (i32::try_from(value).unwrap(), minimal),
                "value {value}"
            );
        }
    }

    #[test]
    fn test_decode_cadence_frame() {
        let messages = decode(&[0x30, 0x04, 0x98, 0x5A, 0x08, 0x0A]);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].id, ID_CADENCE);
        assert_eq!(messages[0].data_type, 0x08);
        assert_eq!(messages[0].kind(), Some(DataType::Varint));
        assert_eq!(messages[0].value, 10);
        assert_eq!(&messages[0].raw[..], &[0x30, 0x04, 0x98, 0x5A, 0x08, 0x0A]);
    }

    #[test]
    fn test_decode_id_only_frame() {
        let messages = decode(&[0x30, 0x02, 0x98, 0x09]);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].id, ID_ASSIST_MODE);
        assert_eq!(messages[0].data_type, 0);
        assert_eq!(messages[0].value, 0);
        assert_eq!(messages[0].kind(), None);
    }

    #[test]
    fn test_decode_skips_leading_garbage() {
        let messages = decode(&[0xFF, 0xFF, 0x30, 0x02, 0x80, 0x88]);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].id, ID_BATTERY);
        assert_eq!(messages[0].value, 0);
    }

    #[test]
    fn test_decode_invalid_length_resyncs() {
        assert!(decode(&[0x30, 0x01, 0x98, 0x09]).is_empty());

        // length 0x33 is too large; the next marker is a real frame
        let messages = decode(&[0x30, 0x33, 0x30, 0x02, 0x98, 0x09]);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].id, ID_ASSIST_MODE);
    }

    #[test]
    fn test_decode_concatenated_frames() {
        let data = [
            0x30, 0x07, 0x98, 0x08, 0x08, 0xF4, 0x09, 0x10, 0x01, // unknown id, varint
            0x30, 0x07, 0x98, 0x2D, 0x08, 0xF4, 0x09, 0x10, 0x01, // speed 12.68
        ];
        let messages = decode(&data);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].id, 0x9808);
        assert_eq!(messages[1].id, ID_SPEED);
        assert_eq!(messages[1].value, 1268);
        assert_eq!(messages[1].raw.len(), 9);
    }

    #[test]
    fn test_decode_truncated_frame_returns_partial() {
        let data = [
            0x30, 0x04, 0x98, 0x5A, 0x08, 0x0A, // complete
            0x30, 0x07, 0x98, 0x2D, 0x08, 0xF4, // cut off
        ];
        let messages = decode(&data);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].id, ID_CADENCE);
    }

    #[test]
    fn test_decode_header_cut_off() {
        assert!(decode(&[0x30]).is_empty());
        assert!(decode(&[0x30, 0x04]).is_empty());
    }

    #[test]
    fn test_decode_split_on_frame_boundary() {
        let first = encode_frame(ID_CADENCE, 180);
        let second = encode_frame(ID_SPEED, 2550);
        let mut whole = first.to_vec();
        whole.extend_from_slice(&second);

        let joined = decode(&whole);
        let mut split = decode(&first);
        split.extend(decode(&second));
        assert_eq!(joined, split);
        assert_eq!(joined.len(), 2);
    }

    #[test]
    fn test_decode_split_mid_frame_loses_frame() {
        let mut whole = encode_frame(ID_CADENCE, 180).to_vec();
        whole.extend_from_slice(&encode_frame(ID_SPEED, 2550));
        let (head, tail) = whole.split_at(9);

        let first = decode(head);
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].id, ID_CADENCE);
        // the rest of the speed frame has no marker of its own
        assert!(decode(tail).iter().all(|m| m.id != ID_SPEED));
    }

    #[test]
    fn test_decode_raw_byte_type() {
        let messages = decode(&[0x30, 0x04, 0x80, 0x88, 0x0A, 0x55]);
        assert_eq!(messages[0].kind(), Some(DataType::RawByte));
        assert_eq!(messages[0].value, 0x55);
    }

    #[test]
    fn test_decode_unknown_type_fallback() {
        let data = [0x30, 0x05, 0xA2, 0x52, 0x12, 0x05, 0x11];

        let zero = FrameDecoder::new(PayloadFallback::Zero).decode(&data);
        assert_eq!(zero[0].data_type, 0x12);
        assert_eq!(zero[0].value, 0);

        let first = FrameDecoder::new(PayloadFallback::FirstByte).decode(&data);
        assert_eq!(first[0].value, 5);
    }

    #[test]
    fn test_decode_type_without_payload() {
        let messages = decode(&[0x30, 0x03, 0x98, 0x5A, 0x08]);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].data_type, 0x08);
        assert_eq!(messages[0].value, 0);
    }

    #[test]
    fn test_encode_frame_layout() {
        let frame = encode_frame(ID_SPEED, 1268);
        assert_eq!(&frame[..], &[0x30, 0x05, 0x98, 0x2D, 0x08, 0xF4, 0x09]);
    }
}
