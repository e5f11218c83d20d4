// fray-model/src/encoders.rs
//! Stateless value-to-bits encoders.
//!
//! Encoders are pure: the same value always produces the same bits, and a
//! value outside an encoder's domain is rejected with
//! [`ModelError::Encoding`] rather than coerced. Fields hold them behind
//! `Arc<dyn …>` so alternative implementations can be swapped in without
//! touching field logic.

use std::fmt;
use std::sync::Arc;

use base64::Engine as _;

use crate::bits::Bits;
use crate::error::{ModelError, Result};
use crate::value::Value;

/// Encodes an integer into bits.
///
/// `validate` runs at field construction so that an incompatible pairing
/// (e.g. a signed field with an unsigned-only encoder) fails before the model
/// is ever rendered.
pub trait IntEncoder: fmt::Debug + Send + Sync {
    /// Checks the encoder against a field's declared width and signedness.
    fn validate(&self, _width: usize, _signed: bool) -> Result<()> {
        Ok(())
    }

    fn encode(&self, value: i128, width: usize, signed: bool) -> Result<Bits>;
}

/// Encodes a text/byte value into bits.
///
/// Accepts `Value::Text` and `Value::Bytes`; every other variant is an
/// encoding-domain error.
pub trait StrEncoder: fmt::Debug + Send + Sync {
    fn encode(&self, value: &Value) -> Result<Bits>;
}

/// Extracts the byte payload of a text-like value or fails with the domain
/// contract shared by all string encoders.
fn require_bytes(value: &Value) -> Result<&[u8]> {
    value.as_bytes().ok_or_else(|| {
        ModelError::Encoding(format!(
            "string encoder requires a flat text/byte sequence, got {}",
            value.kind()
        ))
    })
}

fn mask(value: i128, width: usize) -> u64 {
    let mask = if width == 64 {
        u64::MAX as u128
    } else {
        (1u128 << width) - 1
    };
    (value as u128 & mask) as u64
}

/// Fixed-width two's-complement big-endian encoding.
#[derive(Debug, Clone, Copy, Default)]
pub struct BigEndian;

impl IntEncoder for BigEndian {
    fn encode(&self, value: i128, width: usize, _signed: bool) -> Result<Bits> {
        Bits::from_int(mask(value, width), width)
    }
}

/// Fixed-width little-endian encoding; the width must be whole bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct LittleEndian;

impl IntEncoder for LittleEndian {
    fn validate(&self, width: usize, _signed: bool) -> Result<()> {
        if width % 8 != 0 {
            return Err(ModelError::Configuration(format!(
                "little-endian encoding requires a whole-byte width, got {} bits",
                width
            )));
        }
        Ok(())
    }

    fn encode(&self, value: i128, width: usize, signed: bool) -> Result<Bits> {
        self.validate(width, signed)?;
        let be = mask(value, width);
        let mut out = Bits::new();
        for i in 0..width / 8 {
            out.push_byte((be >> (8 * i)) as u8);
        }
        Ok(out)
    }
}

/// ASCII decimal rendering of the value, sign included.
#[derive(Debug, Clone, Copy, Default)]
pub struct Decimal;

impl IntEncoder for Decimal {
    fn encode(&self, value: i128, _width: usize, _signed: bool) -> Result<Bits> {
        Ok(Bits::from_bytes(value.to_string().as_bytes()))
    }
}

/// Variable-length base-128 groups: seven value bits per 8-bit group, the
/// continuation flag (0x80) set on every group except the last, most
/// significant group first. Output length is always a whole number of bytes.
///
/// The group scheme has no sign semantics, so pairing this encoder with a
/// signed field is a construction-time error.
#[derive(Debug, Clone, Copy, Default)]
pub struct MultiByte;

impl IntEncoder for MultiByte {
    fn validate(&self, _width: usize, signed: bool) -> Result<()> {
        if signed {
            return Err(ModelError::Configuration(
                "multi-byte encoding does not support signed fields".to_string(),
            ));
        }
        Ok(())
    }

    fn encode(&self, value: i128, width: usize, signed: bool) -> Result<Bits> {
        self.validate(width, signed)?;
        if value < 0 {
            return Err(ModelError::Encoding(
                "multi-byte encoding received a negative value".to_string(),
            ));
        }
        let v = value as u128;
        let bits_needed = (128 - v.leading_zeros()).max(1) as usize;
        let groups = (bits_needed + 6) / 7;
        let mut out = Bits::new();
        for i in (0..groups).rev() {
            let mut byte = ((v >> (7 * i)) & 0x7f) as u8;
            if i > 0 {
                byte |= 0x80;
            }
            out.push_byte(byte);
        }
        Ok(out)
    }
}

/// Raw bytes of the value, unchanged. The default string encoding.
#[derive(Debug, Clone, Copy, Default)]
pub struct Identity;

impl StrEncoder for Identity {
    fn encode(&self, value: &Value) -> Result<Bits> {
        Ok(Bits::from_bytes(require_bytes(value)?))
    }
}

/// Wraps an externally supplied `bytes -> bytes` transform.
#[derive(Clone)]
pub struct Func {
    f: Arc<dyn Fn(&[u8]) -> Vec<u8> + Send + Sync>,
}

impl Func {
    pub fn new(f: impl Fn(&[u8]) -> Vec<u8> + Send + Sync + 'static) -> Self {
        Self { f: Arc::new(f) }
    }
}

impl fmt::Debug for Func {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Func(..)")
    }
}

impl StrEncoder for Func {
    fn encode(&self, value: &Value) -> Result<Bits> {
        Ok(Bits::from_bytes((self.f)(require_bytes(value)?)))
    }
}

/// A named reversible codec instead of a raw function.
#[derive(Debug, Clone, Copy)]
pub enum Codec {
    Hex,
    Base64,
}

impl Codec {
    /// Resolves a codec by name; unknown names are a configuration error.
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "hex" => Ok(Codec::Hex),
            "base64" => Ok(Codec::Base64),
            other => Err(ModelError::Configuration(format!(
                "unknown codec name: {:?}",
                other
            ))),
        }
    }
}

impl StrEncoder for Codec {
    fn encode(&self, value: &Value) -> Result<Bits> {
        let raw = require_bytes(value)?;
        let encoded = match self {
            Codec::Hex => hex::encode(raw),
            Codec::Base64 => base64::engine::general_purpose::STANDARD.encode(raw),
        };
        Ok(Bits::from_bytes(encoded.as_bytes()))
    }
}

/// Base64 transform with a single trailing line terminator stripped, if the
/// underlying transform produced one.
#[derive(Debug, Clone, Copy, Default)]
pub struct Base64NoNewline;

impl StrEncoder for Base64NoNewline {
    fn encode(&self, value: &Value) -> Result<Bits> {
        let mut encoded = base64::engine::general_purpose::STANDARD.encode(require_bytes(value)?);
        if encoded.ends_with('\n') {
            encoded.pop();
        }
        Ok(Bits::from_bytes(encoded.as_bytes()))
    }
}

/// Raw bytes followed by one terminating zero byte.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullTerminated;

impl StrEncoder for NullTerminated {
    fn encode(&self, value: &Value) -> Result<Bits> {
        let mut bytes = require_bytes(value)?.to_vec();
        bytes.push(0);
        Ok(Bits::from_bytes(bytes))
    }
}

/// Shorthand for the default integer encoding.
pub fn int_be() -> Arc<dyn IntEncoder> {
    Arc::new(BigEndian)
}

pub fn int_le() -> Arc<dyn IntEncoder> {
    Arc::new(LittleEndian)
}

pub fn int_decimal() -> Arc<dyn IntEncoder> {
    Arc::new(Decimal)
}

pub fn int_multibyte() -> Arc<dyn IntEncoder> {
    Arc::new(MultiByte)
}

/// Shorthand for the default string encoding.
pub fn str_identity() -> Arc<dyn StrEncoder> {
    Arc::new(Identity)
}

pub fn str_base64_no_newline() -> Arc<dyn StrEncoder> {
    Arc::new(Base64NoNewline)
}

pub fn str_null_terminated() -> Arc<dyn StrEncoder> {
    Arc::new(NullTerminated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn text(s: &str) -> Value {
        Value::Text(s.to_string())
    }

    #[test]
    fn big_endian_widths() {
        let bits = BigEndian.encode(3, 20, false).unwrap();
        assert_eq!(bits.len(), 20);
        assert_eq!(bits.to_bytes(), vec![0x00, 0x00, 0x30]);
    }

    #[test]
    fn big_endian_negative_two_complement() {
        let bits = BigEndian.encode(-1, 8, true).unwrap();
        assert_eq!(bits.to_bytes(), vec![0xff]);
    }

    #[test]
    fn little_endian_needs_whole_bytes() {
        assert!(LittleEndian.validate(12, false).is_err());
        let bits = LittleEndian.encode(0x0102, 16, false).unwrap();
        assert_eq!(bits.to_bytes(), vec![0x02, 0x01]);
    }

    #[test]
    fn decimal_renders_ascii() {
        assert_eq!(Decimal.encode(3, 20, false).unwrap().to_bytes(), b"3");
        assert_eq!(Decimal.encode(-12, 8, true).unwrap().to_bytes(), b"-12");
    }

    #[test]
    fn multibyte_group_layout() {
        // 0 fits one group, flag clear
        assert_eq!(MultiByte.encode(0, 8, false).unwrap().to_bytes(), vec![0x00]);
        // 300 = 0b100101100 -> two groups
        assert_eq!(
            MultiByte.encode(300, 16, false).unwrap().to_bytes(),
            vec![0x82, 0x2c]
        );
    }

    #[test]
    fn multibyte_rejects_signed_at_validation() {
        assert!(matches!(
            MultiByte.validate(8, true),
            Err(ModelError::Configuration(_))
        ));
    }

    fn multibyte_expected_len_bits(v: u64) -> usize {
        let bits = (64 - v.leading_zeros()).max(1) as usize;
        8 * ((bits + 6) / 7)
    }

    proptest! {
        // length law: 8 * ceil(bits_needed(v) / 7), always a multiple of 8
        #[test]
        fn multibyte_length_law(v in any::<u64>()) {
            let encoded = MultiByte.encode(v as i128, 64, false).unwrap();
            prop_assert_eq!(encoded.len(), multibyte_expected_len_bits(v));
            prop_assert_eq!(encoded.len() % 8, 0);
        }
    }

    #[test]
    fn str_encoders_reject_non_text_domains() {
        let cases: Vec<Box<dyn StrEncoder>> = vec![
            Box::new(Identity),
            Box::new(Func::new(|b| b.to_vec())),
            Box::new(Codec::Hex),
            Box::new(Base64NoNewline),
            Box::new(NullTerminated),
        ];
        let bad = [
            Value::Int(1),
            Value::List(vec![]),
            Value::List(vec![text("a"), text("b")]),
        ];
        for enc in &cases {
            for value in &bad {
                assert!(
                    matches!(enc.encode(value), Err(ModelError::Encoding(_))),
                    "{:?} accepted {:?}",
                    enc,
                    value
                );
            }
        }
    }

    #[test]
    fn func_applies_transform() {
        let enc = Func::new(|b| hex::encode(b).into_bytes());
        assert_eq!(enc.encode(&text("abcd")).unwrap().to_bytes(), b"61626364");
        // empty input is the transform of empty, not an error
        assert_eq!(enc.encode(&text("")).unwrap().to_bytes(), b"");
    }

    #[test]
    fn named_codec_matches_function_form() {
        let enc = Codec::from_name("hex").unwrap();
        assert_eq!(enc.encode(&text("abc")).unwrap().to_bytes(), b"616263");
        assert!(Codec::from_name("rot13").is_err());
    }

    #[test]
    fn base64_no_newline() {
        let enc = Base64NoNewline;
        let out = enc.encode(&Value::Bytes(b"\xde\xd7\xab".to_vec())).unwrap();
        assert_eq!(out.to_bytes(), b"3ter");
        assert_eq!(enc.encode(&text("")).unwrap().to_bytes(), b"");
    }

    #[test]
    fn null_terminated_appends_zero() {
        let out = NullTerminated.encode(&text("hi")).unwrap();
        assert_eq!(out.to_bytes(), b"hi\x00");
    }
}
