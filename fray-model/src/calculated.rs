// fray-model/src/calculated.rs
//! Fields whose rendered bytes derive from other fields' rendered state.
//!
//! A computed field names its target by path; at render time the resolver
//! hands it the target's current rendered bits (see
//! [`crate::template::Template::render`] for the multi-pass protocol) and the
//! field applies its compute capability. Computed fields hold no mutable
//! value of their own and never mutate.

use std::fmt;
use std::sync::Arc;

use sha2::Digest as _;

use crate::bits::Bits;
use crate::encoders::{self, IntEncoder, StrEncoder};
use crate::error::{ModelError, Result};
use crate::template::RenderCtx;
use crate::value::Value;

/// Checksum compute capability: a fixed output width and a pure function
/// over the target's bytes.
pub trait ChecksumAlgo: fmt::Debug + Send + Sync {
    fn width_bits(&self) -> usize;
    fn compute(&self, data: &[u8]) -> u64;
}

/// Byte-wise additive checksum, truncated to the configured width.
#[derive(Debug, Clone, Copy)]
pub struct Additive {
    width: usize,
}

impl Additive {
    pub fn new(width: usize) -> Result<Self> {
        if width == 0 || width > 64 {
            return Err(ModelError::Configuration(format!(
                "checksum width must be in 1..=64, got {}",
                width
            )));
        }
        Ok(Self { width })
    }
}

impl ChecksumAlgo for Additive {
    fn width_bits(&self) -> usize {
        self.width
    }

    fn compute(&self, data: &[u8]) -> u64 {
        let sum = data
            .iter()
            .fold(0u64, |acc, &b| acc.wrapping_add(b as u64));
        if self.width == 64 {
            sum
        } else {
            sum & ((1u64 << self.width) - 1)
        }
    }
}

/// Byte-wise XOR checksum, 8 bits wide.
#[derive(Debug, Clone, Copy, Default)]
pub struct Xor8;

impl ChecksumAlgo for Xor8 {
    fn width_bits(&self) -> usize {
        8
    }

    fn compute(&self, data: &[u8]) -> u64 {
        data.iter().fold(0u8, |acc, &b| acc ^ b) as u64
    }
}

/// CRC-32 (IEEE 802.3 polynomial, reflected).
#[derive(Debug, Clone, Copy, Default)]
pub struct Crc32;

impl ChecksumAlgo for Crc32 {
    fn width_bits(&self) -> usize {
        32
    }

    fn compute(&self, data: &[u8]) -> u64 {
        let mut crc = 0xFFFF_FFFFu32;
        for &byte in data {
            crc ^= byte as u32;
            for _ in 0..8 {
                crc = if crc & 1 != 0 {
                    (crc >> 1) ^ 0xEDB8_8320
                } else {
                    crc >> 1
                };
            }
        }
        (!crc) as u64
    }
}

/// Cryptographic digest capability; output length is fixed by the algorithm,
/// independent of the target length.
pub trait DigestAlgo: fmt::Debug + Send + Sync {
    fn digest(&self, data: &[u8]) -> Vec<u8>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256Digest;

impl DigestAlgo for Sha256Digest {
    fn digest(&self, data: &[u8]) -> Vec<u8> {
        sha2::Sha256::digest(data).to_vec()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Sha512Digest;

impl DigestAlgo for Sha512Digest {
    fn digest(&self, data: &[u8]) -> Vec<u8> {
        sha2::Sha512::digest(data).to_vec()
    }
}

/// Whether a size-style field measures bits or whole bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeUnit {
    Bits,
    Bytes,
}

#[derive(Clone)]
pub enum ComputedKind {
    Size {
        unit: SizeUnit,
        width: usize,
        offset: i128,
        encoder: Arc<dyn IntEncoder>,
    },
    ElementCount {
        width: usize,
        encoder: Arc<dyn IntEncoder>,
    },
    IndexOf {
        width: usize,
        encoder: Arc<dyn IntEncoder>,
    },
    Checksum {
        algo: Arc<dyn ChecksumAlgo>,
    },
    Hash {
        algo: Arc<dyn DigestAlgo>,
    },
    CalcInt {
        width: usize,
        f: Arc<dyn Fn(&Bits) -> i128 + Send + Sync>,
        encoder: Arc<dyn IntEncoder>,
    },
    CalcStr {
        f: Arc<dyn Fn(&Bits) -> Vec<u8> + Send + Sync>,
        encoder: Arc<dyn StrEncoder>,
    },
    CalcBits {
        f: Arc<dyn Fn(&Bits) -> Bits + Send + Sync>,
    },
}

impl fmt::Debug for ComputedKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ComputedKind::Size { .. } => "Size",
            ComputedKind::ElementCount { .. } => "ElementCount",
            ComputedKind::IndexOf { .. } => "IndexOf",
            ComputedKind::Checksum { .. } => "Checksum",
            ComputedKind::Hash { .. } => "Hash",
            ComputedKind::CalcInt { .. } => "CalcInt",
            ComputedKind::CalcStr { .. } => "CalcStr",
            ComputedKind::CalcBits { .. } => "CalcBits",
        };
        f.write_str(label)
    }
}

/// A dependent field: target reference plus compute capability.
#[derive(Debug, Clone)]
pub struct Computed {
    name: Option<String>,
    target: String,
    resolved: Option<String>,
    kind: ComputedKind,
}

impl Computed {
    fn new(target: impl Into<String>, kind: ComputedKind) -> Self {
        Self {
            name: None,
            target: target.into(),
            resolved: None,
            kind,
        }
    }

    /// Bit length of the target's render, plus an optional constant offset.
    pub fn size_bits(target: impl Into<String>, width: usize) -> Self {
        Self::new(
            target,
            ComputedKind::Size {
                unit: SizeUnit::Bits,
                width,
                offset: 0,
                encoder: encoders::int_be(),
            },
        )
    }

    /// Byte length of the target's render, plus an optional constant offset.
    pub fn size_bytes(target: impl Into<String>, width: usize) -> Self {
        Self::new(
            target,
            ComputedKind::Size {
                unit: SizeUnit::Bytes,
                width,
                offset: 0,
                encoder: encoders::int_be(),
            },
        )
    }

    /// Count of repeated sub-structures under the target node.
    pub fn element_count(target: impl Into<String>, width: usize) -> Self {
        Self::new(
            target,
            ComputedKind::ElementCount {
                width,
                encoder: encoders::int_be(),
            },
        )
    }

    /// Current selection index of the target selector container.
    pub fn index_of(target: impl Into<String>, width: usize) -> Self {
        Self::new(
            target,
            ComputedKind::IndexOf {
                width,
                encoder: encoders::int_be(),
            },
        )
    }

    pub fn checksum(target: impl Into<String>, algo: Arc<dyn ChecksumAlgo>) -> Self {
        Self::new(target, ComputedKind::Checksum { algo })
    }

    pub fn crc32(target: impl Into<String>) -> Self {
        Self::checksum(target, Arc::new(Crc32))
    }

    pub fn hash(target: impl Into<String>, algo: Arc<dyn DigestAlgo>) -> Self {
        Self::new(target, ComputedKind::Hash { algo })
    }

    pub fn sha256(target: impl Into<String>) -> Self {
        Self::hash(target, Arc::new(Sha256Digest))
    }

    /// A user-supplied pure function from the target's bits to an integer.
    pub fn calc_int(
        target: impl Into<String>,
        width: usize,
        f: impl Fn(&Bits) -> i128 + Send + Sync + 'static,
    ) -> Self {
        Self::new(
            target,
            ComputedKind::CalcInt {
                width,
                f: Arc::new(f),
                encoder: encoders::int_be(),
            },
        )
    }

    /// A user-supplied pure function from the target's bits to a byte string.
    pub fn calc_str(
        target: impl Into<String>,
        f: impl Fn(&Bits) -> Vec<u8> + Send + Sync + 'static,
    ) -> Self {
        Self::new(
            target,
            ComputedKind::CalcStr {
                f: Arc::new(f),
                encoder: encoders::str_identity(),
            },
        )
    }

    /// A user-supplied pure function from the target's bits to a bit buffer.
    pub fn calc_bits(
        target: impl Into<String>,
        f: impl Fn(&Bits) -> Bits + Send + Sync + 'static,
    ) -> Self {
        Self::new(target, ComputedKind::CalcBits { f: Arc::new(f) })
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Adds a constant to the measured size. Only valid for size fields.
    pub fn with_size_offset(mut self, extra: i128) -> Result<Self> {
        match &mut self.kind {
            ComputedKind::Size { offset, .. } => {
                *offset = extra;
                Ok(self)
            }
            other => Err(ModelError::Configuration(format!(
                "size offset is not applicable to a {:?} field",
                other
            ))),
        }
    }

    /// Swaps the integer encoder of a numeric computed field.
    pub fn with_int_encoder(mut self, enc: Arc<dyn IntEncoder>) -> Result<Self> {
        match &mut self.kind {
            ComputedKind::Size { width, encoder, .. }
            | ComputedKind::ElementCount { width, encoder }
            | ComputedKind::IndexOf { width, encoder }
            | ComputedKind::CalcInt { width, encoder, .. } => {
                enc.validate(*width, false)?;
                *encoder = enc;
                Ok(self)
            }
            other => Err(ModelError::Configuration(format!(
                "integer encoder is not applicable to a {:?} field",
                other
            ))),
        }
    }

    /// Swaps the string encoder of a string computed field.
    pub fn with_str_encoder(mut self, enc: Arc<dyn StrEncoder>) -> Result<Self> {
        match &mut self.kind {
            ComputedKind::CalcStr { encoder, .. } => {
                *encoder = enc;
                Ok(self)
            }
            other => Err(ModelError::Configuration(format!(
                "string encoder is not applicable to a {:?} field",
                other
            ))),
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub(crate) fn set_name(&mut self, name: String) {
        self.name = Some(name);
    }

    pub(crate) fn kind_label(&self) -> &'static str {
        match self.kind {
            ComputedKind::Size { .. } => "size",
            ComputedKind::ElementCount { .. } => "element_count",
            ComputedKind::IndexOf { .. } => "index_of",
            ComputedKind::Checksum { .. } => "checksum",
            ComputedKind::Hash { .. } => "hash",
            ComputedKind::CalcInt { .. } => "calc_int",
            ComputedKind::CalcStr { .. } => "calc_str",
            ComputedKind::CalcBits { .. } => "calc_bits",
        }
    }

    pub(crate) fn target(&self) -> &str {
        &self.target
    }

    pub(crate) fn set_resolved(&mut self, path: String) {
        self.resolved = Some(path);
    }

    /// True when the field's output depends on the *content* of its target,
    /// not just its length or structure. Content-dependent fields must not
    /// target a node that encloses them.
    pub(crate) fn content_dependent(&self) -> bool {
        matches!(
            self.kind,
            ComputedKind::Checksum { .. }
                | ComputedKind::Hash { .. }
                | ComputedKind::CalcInt { .. }
                | ComputedKind::CalcStr { .. }
                | ComputedKind::CalcBits { .. }
        )
    }

    /// True when the target must be a selector container (OneOf/TakeFrom).
    pub(crate) fn needs_selector_target(&self) -> bool {
        matches!(self.kind, ComputedKind::IndexOf { .. })
    }

    pub(crate) fn render<'a>(&'a self, ctx: &mut RenderCtx<'a>) -> Result<Bits> {
        let path = match &self.resolved {
            Some(p) => p.clone(),
            None => ctx.resolve(&self.target)?,
        };
        match &self.kind {
            ComputedKind::Size {
                unit,
                width,
                offset,
                encoder,
            } => {
                let bits = ctx.lookup(&path).unwrap_or_default();
                let measured = match unit {
                    SizeUnit::Bits => bits.len(),
                    SizeUnit::Bytes => bits.byte_len(),
                } as i128
                    + offset;
                encoder.encode(measured, *width, false)
            }
            ComputedKind::ElementCount { width, encoder } => {
                let count = ctx.element_count(&path)?;
                encoder.encode(count as i128, *width, false)
            }
            ComputedKind::IndexOf { width, encoder } => {
                let index = ctx.selected_index(&path)?;
                encoder.encode(index as i128, *width, false)
            }
            ComputedKind::Checksum { algo } => {
                let data = ctx.lookup(&path).unwrap_or_default().to_bytes();
                Bits::from_int(algo.compute(&data), algo.width_bits())
            }
            ComputedKind::Hash { algo } => {
                let data = ctx.lookup(&path).unwrap_or_default().to_bytes();
                Ok(Bits::from_bytes(algo.digest(&data)))
            }
            ComputedKind::CalcInt { width, f, encoder } => {
                let input = ctx.lookup(&path).unwrap_or_default();
                encoder.encode(f(&input), *width, false)
            }
            ComputedKind::CalcStr { f, encoder } => {
                let input = ctx.lookup(&path).unwrap_or_default();
                encoder.encode(&Value::Bytes(f(&input)))
            }
            ComputedKind::CalcBits { f } => {
                let input = ctx.lookup(&path).unwrap_or_default();
                Ok(f(&input))
            }
        }
    }
}
