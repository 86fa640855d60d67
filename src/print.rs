//! Numeric text encoding for the print layer.
//!
//! Converts integers and floats to the byte representation the peer expects:
//! decimal, hexadecimal (uppercase), octal or binary digits for integers,
//! fixed-point text for floats. Negative integers in a non-decimal radix
//! print the two's-complement bit pattern of the 32-bit value, matching the
//! Arduino stream family this transport interoperates with.

// ----------------------------------------------------------------------------
// Radix
// ----------------------------------------------------------------------------

/// Integer radix for the `print` overloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Radix {
    Binary,
    Octal,
    #[default]
    Decimal,
    Hexadecimal,
}

/// Fractional digits used by `print_f64`.
pub const DEFAULT_DECIMAL_PLACES: u16 = 2;

// ----------------------------------------------------------------------------
// Encoders
// ----------------------------------------------------------------------------

/// Encode an unsigned integer in the given radix.
pub fn encode_u32(value: u32, radix: Radix) -> Vec<u8> {
    let text = match radix {
        Radix::Binary => format!("{value:b}"),
        Radix::Octal => format!("{value:o}"),
        Radix::Decimal => format!("{value}"),
        Radix::Hexadecimal => format!("{value:X}"),
    };
    text.into_bytes()
}

/// Encode a signed integer in the given radix.
///
/// Decimal keeps the sign; other radices print the 32-bit two's-complement
/// pattern (`-1` in hex is `FFFFFFFF`).
pub fn encode_i32(value: i32, radix: Radix) -> Vec<u8> {
    match radix {
        Radix::Decimal => format!("{value}").into_bytes(),
        _ => encode_u32(value as u32, radix),
    }
}

/// Encode a float as fixed-point text with the requested fractional digits.
pub fn encode_f64(value: f64, decimal_places: u16) -> Vec<u8> {
    format!("{value:.precision$}", precision = decimal_places as usize).into_bytes()
}
