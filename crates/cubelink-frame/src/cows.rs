//! Consistent Overhead Word Stuffing.
//!
//! COWS removes every all-zero 16-bit word from a buffer so that `00 00` can
//! delimit frames on the wire. Each eliminated zero word is replaced by the
//! big-endian word distance to the next eliminated zero (or to one past the
//! end of the buffer), and the first word of the buffer is reserved as the
//! overhead word holding the distance to the first eliminated zero.
//!
//! Odd-length buffers are handled by temporarily appending a `0x01` pad
//! byte. The pad must never be `0x00`, otherwise it could complete a zero
//! word that does not exist in the payload, and peers rely on the exact
//! value for wire compatibility.

use bytes::{BufMut, BytesMut};

use crate::error::{FrameError, Result};

/// Size of the overhead word at the start of every stuffed buffer.
pub const OVERHEAD_SIZE: usize = 2;

/// Largest buffer (in bytes) whose word distances fit in a u16.
pub const MAX_STUFFED_LEN: usize = 2 * u16::MAX as usize;

const PAD_BYTE: u8 = 1;

/// Stuff `buf` in place.
///
/// The first word is overwritten with the overhead. After this call no
/// word-aligned pair of bytes in `buf` is `00 00`. An empty buffer is left
/// untouched.
pub fn stuff(buf: &mut BytesMut) -> Result<()> {
    if buf.is_empty() {
        return Ok(());
    }
    check_len(buf.len())?;

    let padded = pad(buf);
    let words = buf.len() / 2;

    let mut last_zero = words;
    for index in (1..words).rev() {
        let at = index * 2;
        if buf[at] == 0 && buf[at + 1] == 0 {
            set_word(buf, at, (last_zero - index) as u16);
            last_zero = index;
        }
    }
    set_word(buf, 0, last_zero as u16);

    if padded {
        unpad(buf);
    }
    Ok(())
}

/// Reverse [`stuff`] in place.
///
/// The overhead word is zeroed along with every restored zero word; only
/// the bytes after it are meaningful. A zero distance or a chain that runs
/// past the end of the buffer is reported as [`FrameError::Corrupt`], and the
/// buffer contents are then unspecified.
pub fn unstuff(buf: &mut BytesMut) -> Result<()> {
    if buf.is_empty() {
        return Ok(());
    }
    check_len(buf.len())?;

    let padded = pad(buf);
    let result = restore_zeros(buf);
    if padded {
        unpad(buf);
    }
    result
}

fn restore_zeros(buf: &mut BytesMut) -> Result<()> {
    let len = buf.len();
    let mut at = 0usize;

    while at < len {
        let distance = get_word(buf, at) as usize;
        if distance == 0 {
            return Err(FrameError::Corrupt(format!(
                "zero distance in chain at byte {at}"
            )));
        }
        set_word(buf, at, 0);
        at += 2 * distance;
    }

    if at != len {
        return Err(FrameError::Corrupt(format!(
            "zero chain ends at byte {at}, past buffer end {len}"
        )));
    }
    Ok(())
}

fn check_len(len: usize) -> Result<()> {
    if len > MAX_STUFFED_LEN {
        return Err(FrameError::PayloadTooLarge {
            size: len,
            max: MAX_STUFFED_LEN,
        });
    }
    Ok(())
}

fn pad(buf: &mut BytesMut) -> bool {
    if buf.len() % 2 == 1 {
        buf.put_u8(PAD_BYTE);
        return true;
    }
    false
}

fn unpad(buf: &mut BytesMut) {
    buf.truncate(buf.len() - 1);
}

fn get_word(buf: &[u8], at: usize) -> u16 {
    u16::from_be_bytes([buf[at], buf[at + 1]])
}

fn set_word(buf: &mut [u8], at: usize, value: u16) {
    buf[at..at + 2].copy_from_slice(&value.to_be_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_zero_free(buf: &[u8]) {
        for (i, word) in buf.chunks(2).enumerate() {
            assert_ne!(word, [0, 0], "zero word at index {i}");
        }
    }

    /// Powers of three modulo a prime: looks random, never zero.
    fn create_buffer(len: usize) -> BytesMut {
        let mut buf = BytesMut::zeroed(len);
        if len > 0 {
            buf[0] = 1;
        }
        for i in 1..len {
            buf[i] = 3 * buf[i - 1] % 19;
        }
        buf
    }

    fn roundtrip(original: &[u8]) {
        let mut buf = BytesMut::from(original);
        stuff(&mut buf).unwrap();
        assert_eq!(buf.len(), original.len());
        assert_zero_free(&buf);

        unstuff(&mut buf).unwrap();
        let skip = OVERHEAD_SIZE.min(original.len());
        assert_eq!(&buf[skip..], &original[skip..]);
    }

    #[test]
    fn cows_generated_buffer() {
        let original = create_buffer(1024);
        roundtrip(&original);
    }

    #[test]
    fn cows_padded_buffer() {
        let original = create_buffer(1023);
        roundtrip(&original);
    }

    #[test]
    fn cows_all_zeros() {
        let mut buf = BytesMut::zeroed(1024);
        stuff(&mut buf).unwrap();
        assert_zero_free(&buf);

        let expected: Vec<u8> = [0u8, 1].repeat(512);
        assert_eq!(buf.as_ref(), expected.as_slice());

        unstuff(&mut buf).unwrap();
        assert!(buf[2..].iter().all(|&b| b == 0));
    }

    #[test]
    fn cows_padded_all_zeros() {
        let mut buf = BytesMut::zeroed(1023);
        stuff(&mut buf).unwrap();
        assert_zero_free(&buf);

        // The last full zero word points two words ahead because the pad
        // byte made the final word non-zero.
        let mut expected: Vec<u8> = [0u8, 1].repeat(510);
        expected.extend_from_slice(&[0, 2, 0]);
        assert_eq!(buf.as_ref(), expected.as_slice());

        unstuff(&mut buf).unwrap();
        assert_eq!(buf.len(), 1023);
        assert!(buf[2..].iter().all(|&b| b == 0));
    }

    #[test]
    fn cows_no_zeros() {
        let original = [1u8, 1].repeat(512);
        let mut buf = BytesMut::from(original.as_slice());
        stuff(&mut buf).unwrap();

        let mut expected = vec![2u8, 0];
        expected.extend_from_slice(&original[2..]);
        assert_eq!(buf.as_ref(), expected.as_slice());

        unstuff(&mut buf).unwrap();
        assert_eq!(&buf[2..], &original[2..]);
    }

    #[test]
    fn cows_padded_no_zeros() {
        let original = vec![1u8; 1023];
        let mut buf = BytesMut::from(original.as_slice());
        stuff(&mut buf).unwrap();

        let mut expected = vec![2u8, 0];
        expected.extend_from_slice(&original[2..]);
        assert_eq!(buf.as_ref(), expected.as_slice());

        unstuff(&mut buf).unwrap();
        assert_eq!(&buf[2..], &original[2..]);
    }

    #[test]
    fn overhead_points_at_first_zero() {
        let mut buf = BytesMut::from(&[0xAA, 0xAA, 7, 7, 0, 0, 9, 9][..]);
        stuff(&mut buf).unwrap();
        assert_eq!(buf.as_ref(), &[0, 2, 7, 7, 0, 2, 9, 9]);
    }

    #[test]
    fn short_and_empty_buffers() {
        let mut empty = BytesMut::new();
        stuff(&mut empty).unwrap();
        unstuff(&mut empty).unwrap();
        assert!(empty.is_empty());

        let mut single = BytesMut::from(&[0x42][..]);
        stuff(&mut single).unwrap();
        assert_eq!(single.as_ref(), &[0]);
        unstuff(&mut single).unwrap();
        assert_eq!(single.len(), 1);

        roundtrip(&[0, 0, 0]);
        roundtrip(&[0, 0, 0, 0, 5]);
    }

    #[test]
    fn roundtrip_sparse_payloads() {
        // Small LCG; masking keeps plenty of zero bytes and zero words.
        let mut state: u32 = 0x1234_5678;
        for len in 0..96usize {
            let mut data = vec![0u8; len];
            for byte in data.iter_mut() {
                state = state.wrapping_mul(1_103_515_245).wrapping_add(12_345);
                *byte = ((state >> 16) as u8) & 0x03;
            }
            roundtrip(&data);
        }
    }

    #[test]
    fn unstuff_rejects_zero_distance() {
        let mut buf = BytesMut::from(&[0, 0, 1, 1][..]);
        let err = unstuff(&mut buf).unwrap_err();
        assert!(matches!(err, FrameError::Corrupt(_)));
    }

    #[test]
    fn unstuff_rejects_overrunning_chain() {
        let mut buf = BytesMut::from(&[0, 5, 1, 1][..]);
        let err = unstuff(&mut buf).unwrap_err();
        assert!(matches!(err, FrameError::Corrupt(_)));
    }

    #[test]
    fn unstuff_restores_length_on_corrupt_padded_input() {
        let mut buf = BytesMut::from(&[0, 9, 1][..]);
        assert!(unstuff(&mut buf).is_err());
        assert_eq!(buf.len(), 3);
    }

    #[test]
    fn stuff_rejects_oversized_buffer() {
        let mut buf = BytesMut::zeroed(MAX_STUFFED_LEN + 1);
        let err = stuff(&mut buf).unwrap_err();
        assert!(matches!(err, FrameError::PayloadTooLarge { .. }));

        let mut max = BytesMut::zeroed(MAX_STUFFED_LEN);
        stuff(&mut max).unwrap();
        assert_zero_free(&max);
    }
}
