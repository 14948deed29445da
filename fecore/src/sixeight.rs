/*!
6b8b line code used on the serial command link.

Every 6-bit data symbol maps to an 8-bit codeword with exactly four bits
set, so the link stays DC balanced and the receiver can recover the clock.
Of the 70 weight-4 bytes, 64 carry data, four are reserved as K (control)
symbols and `0x0F`/`0xF0` are unused.
*/

use thiserror::Error;

/// Control symbols (never produced by [`encode`])
pub const K0: u8 = 0x78;
pub const K1: u8 = 0x55;
pub const K2: u8 = 0x47;
pub const K3: u8 = 0x6A;

const ENCODE_TABLE: [u8; 64] = [
    0x59, 0x71, 0x72, 0xc3, 0x65, 0xc5, 0xc6, 0x87, 0x69, 0xc9, 0xca, 0x8b, 0xcc, 0x8d, 0x8e, 0x4b,
    0x53, 0xd1, 0xd2, 0x93, 0xd4, 0x95, 0x96, 0x17, 0xd8, 0x99, 0x9a, 0x1b, 0x9c, 0x1d, 0x1e, 0x5c,
    0x63, 0xe1, 0xe2, 0xa3, 0xe4, 0xa5, 0xa6, 0x27, 0xe8, 0xa9, 0xaa, 0x2b, 0xac, 0x2d, 0x2e, 0x6c,
    0x74, 0xb1, 0xb2, 0x33, 0xb4, 0x35, 0x36, 0x56, 0xb8, 0x39, 0x3a, 0x5a, 0x3c, 0x4d, 0x4e, 0x66,
];

const INVALID: u8 = 0xFF;

const DECODE_TABLE: [u8; 256] = build_decode_table();

const fn build_decode_table() -> [u8; 256] {
    let mut table = [INVALID; 256];
    let mut i = 0;
    while i < ENCODE_TABLE.len() {
        table[ENCODE_TABLE[i] as usize] = i as u8;
        i += 1;
    }
    table
}

/// Errors reported while decoding received symbols
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineCodeError {
    #[error("0x{0:02x} is not a 6b8b data codeword")]
    InvalidSymbol(u8),

    #[error("unexpected control symbol 0x{0:02x}")]
    UnexpectedKCode(u8),
}

/// Encode the low six bits of `value`
pub fn encode(value: u8) -> u8 {
    debug_assert!(value < 64, "6b8b input 0x{:x} wider than six bits", value);
    ENCODE_TABLE[(value & 0x3f) as usize]
}

/// Decode one received symbol
pub fn decode(symbol: u8) -> Result<u8, LineCodeError> {
    match DECODE_TABLE[symbol as usize] {
        INVALID if is_kcode(symbol) => Err(LineCodeError::UnexpectedKCode(symbol)),
        INVALID => Err(LineCodeError::InvalidSymbol(symbol)),
        value => Ok(value),
    }
}

/// True for the four reserved control symbols
pub fn is_kcode(symbol: u8) -> bool {
    matches!(symbol, K0 | K1 | K2 | K3)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codewords_are_balanced() {
        for value in 0..64u8 {
            assert_eq!(encode(value).count_ones(), 4, "value {}", value);
        }
        for k in [K0, K1, K2, K3] {
            assert_eq!(k.count_ones(), 4);
        }
    }

    #[test]
    fn test_roundtrip() {
        for value in 0..64u8 {
            assert_eq!(decode(encode(value)), Ok(value));
        }
    }

    #[test]
    fn test_invalid_symbols_are_reported() {
        let valid: Vec<u8> = (0..64u8).map(encode).collect();
        let mut rejected = 0;
        for symbol in 0..=255u8 {
            if valid.contains(&symbol) {
                continue;
            }
            assert!(decode(symbol).is_err(), "0x{:02x} decoded", symbol);
            rejected += 1;
        }
        assert_eq!(rejected, 256 - 64);
    }

    #[test]
    fn test_kcodes_are_not_data() {
        for k in [K0, K1, K2, K3] {
            assert_eq!(decode(k), Err(LineCodeError::UnexpectedKCode(k)));
        }
        assert_eq!(decode(0x00), Err(LineCodeError::InvalidSymbol(0x00)));
        assert_eq!(decode(0x0F), Err(LineCodeError::InvalidSymbol(0x0F)));
    }

    #[test]
    fn test_known_codewords() {
        assert_eq!(encode(0x0), 0x59);
        assert_eq!(encode(0x3), 0xc3);
        assert_eq!(encode(0x3f), 0x66);
    }
}
