//! Print-layer encoding through the public API.

use ble_serial::print::{encode_f64, encode_i32, encode_u32};
use ble_serial::{Radix, DEFAULT_DECIMAL_PLACES};

#[test]
fn print_255_hex_is_two_uppercase_bytes() {
    assert_eq!(encode_u32(255, Radix::Hexadecimal), b"FF");
}

#[test]
fn print_pi_with_two_places() {
    assert_eq!(encode_f64(3.14159, 2), b"3.14");
    assert_eq!(DEFAULT_DECIMAL_PLACES, 2);
}

#[test]
fn radix_defaults_to_decimal() {
    assert_eq!(Radix::default(), Radix::Decimal);
    assert_eq!(encode_u32(1234, Radix::default()), b"1234");
}

#[test]
fn signed_values_cover_both_paths() {
    assert_eq!(encode_i32(-273, Radix::Decimal), b"-273");
    assert_eq!(encode_i32(-1, Radix::Hexadecimal), b"FFFFFFFF");
    assert_eq!(encode_i32(5, Radix::Binary), b"101");
}

#[test]
fn zero_encodes_in_every_radix() {
    for radix in [Radix::Binary, Radix::Octal, Radix::Decimal, Radix::Hexadecimal] {
        assert_eq!(encode_u32(0, radix), b"0");
    }
}
