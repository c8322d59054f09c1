//! Single-byte checksum carried in the last byte of every over-the-air
//! frame.

/// Computes the checksum over a frame body.
///
/// The checksum is the negated sum of all body bytes, so a receiver summing
/// the whole frame including the checksum byte ends up at zero.
pub fn frame_checksum(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |sum, byte| sum.wrapping_sub(*byte))
}

/// Checks the trailing checksum byte of a complete frame.
pub fn verify_frame(frame: &[u8]) -> bool {
    match frame.split_last() {
        Some((checksum, body)) => frame_checksum(body) == *checksum,
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_cancels_sum() {
        for len in [4usize, 9, 21] {
            let mut data = [0u8; 21];
            let mut seed = 0x2fu8;
            for byte in data.iter_mut().take(len) {
                seed = seed.wrapping_mul(31).wrapping_add(7);
                *byte = seed;
            }
            let checksum = frame_checksum(&data[..len]);
            let sum = data[..len].iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
            assert_eq!(sum.wrapping_add(checksum), 0);
        }
    }

    #[test]
    fn test_checksum_of_empty_body() {
        assert_eq!(frame_checksum(&[]), 0);
    }

    #[test]
    fn test_verify_frame() {
        let mut frame = [0x12, 0x34, 0x56, 0x00];
        frame[3] = frame_checksum(&frame[..3]);
        assert!(verify_frame(&frame));

        frame[1] ^= 0x01;
        assert!(!verify_frame(&frame));
        assert!(!verify_frame(&[]));
    }
}
