// fray-model/src/field.rs
//! Leaf fields: the mutable units of a message model.
//!
//! Every leaf carries an immutable default value, a current (possibly
//! mutated) value and a deterministic mutation catalog fixed at construction.
//! `render` is pure given the current state; `mutate` advances the catalog
//! cursor one step and reverts to the default when the catalog is exhausted;
//! `reset` returns to the default unconditionally.

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::bits::Bits;
use crate::calculated::Computed;
use crate::encoders::{self, IntEncoder, StrEncoder};
use crate::error::{ModelError, Result};
use crate::mutations;
use crate::template::RenderCtx;
use crate::value::Value;

/// Default number of variants a random field steps through.
const DEFAULT_RANDOM_STEPS: usize = 25;

/// Seed-stream separation constant for per-step reseeding.
const STEP_MIX: u64 = 0x9E37_79B9_7F4A_7C15;

/// The closed set of leaf kinds.
#[derive(Debug, Clone)]
pub enum Leaf {
    Static(StaticField),
    Text(TextField),
    Num(NumField),
    Dynamic(DynamicField),
    RandomBytes(RandomBytesField),
    RandomBits(RandomBitsField),
    Item(ItemField),
    Computed(Computed),
}

impl Leaf {
    pub fn name(&self) -> Option<&str> {
        match self {
            Leaf::Static(f) => f.name.as_deref(),
            Leaf::Text(f) => f.name.as_deref(),
            Leaf::Num(f) => f.name.as_deref(),
            Leaf::Dynamic(f) => f.name.as_deref(),
            Leaf::RandomBytes(f) => f.name.as_deref(),
            Leaf::RandomBits(f) => f.name.as_deref(),
            Leaf::Item(f) => f.name.as_deref(),
            Leaf::Computed(f) => f.name(),
        }
    }

    pub(crate) fn set_name(&mut self, name: String) {
        match self {
            Leaf::Static(f) => f.name = Some(name),
            Leaf::Text(f) => f.name = Some(name),
            Leaf::Num(f) => f.name = Some(name),
            Leaf::Dynamic(f) => f.name = Some(name),
            Leaf::RandomBytes(f) => f.name = Some(name),
            Leaf::RandomBits(f) => f.name = Some(name),
            Leaf::Item(f) => f.name = Some(name),
            Leaf::Computed(f) => f.set_name(name),
        }
    }

    /// Label used when synthesizing names for anonymous fields.
    pub(crate) fn kind_label(&self) -> &'static str {
        match self {
            Leaf::Static(_) => "static",
            Leaf::Text(_) => "text",
            Leaf::Num(_) => "num",
            Leaf::Dynamic(_) => "dynamic",
            Leaf::RandomBytes(_) => "random_bytes",
            Leaf::RandomBits(_) => "random_bits",
            Leaf::Item(_) => "item",
            Leaf::Computed(f) => f.kind_label(),
        }
    }

    pub(crate) fn render<'a>(&'a self, ctx: &mut RenderCtx<'a>) -> Result<Bits> {
        match self {
            Leaf::Static(f) => Ok(f.value.clone()),
            Leaf::Text(f) => f.encoder.encode(&Value::Bytes(f.current.clone())),
            Leaf::Num(f) => f.encoder.encode(f.current, f.width, f.signed),
            Leaf::Dynamic(f) => f.encoder.encode(&Value::Bytes(f.current.clone())),
            Leaf::RandomBytes(f) => Ok(Bits::from_bytes(f.current_bytes())),
            Leaf::RandomBits(f) => Ok(f.current_bits()),
            Leaf::Item(f) => f.render(ctx),
            Leaf::Computed(f) => f.render(ctx),
        }
    }

    pub(crate) fn mutate(&mut self) -> bool {
        match self {
            Leaf::Static(_) | Leaf::Item(_) | Leaf::Computed(_) => false,
            Leaf::Text(f) => advance_catalog(&mut f.cursor, &f.catalog, &mut f.current, &f.default),
            Leaf::Dynamic(f) => {
                advance_catalog(&mut f.cursor, &f.catalog, &mut f.current, &f.default)
            }
            Leaf::Num(f) => advance_catalog(&mut f.cursor, &f.catalog, &mut f.current, &f.default),
            Leaf::RandomBytes(f) => f.mutate(),
            Leaf::RandomBits(f) => f.mutate(),
        }
    }

    pub(crate) fn reset(&mut self) {
        match self {
            Leaf::Static(_) | Leaf::Item(_) | Leaf::Computed(_) => {}
            Leaf::Text(f) => {
                f.current = f.default.clone();
                f.cursor = None;
            }
            Leaf::Dynamic(f) => {
                f.current = f.default.clone();
                f.cursor = None;
            }
            Leaf::Num(f) => {
                f.current = f.default;
                f.cursor = None;
            }
            Leaf::RandomBytes(f) => {
                f.current = None;
                f.cursor = None;
            }
            Leaf::RandomBits(f) => {
                f.current = None;
                f.cursor = None;
            }
        }
    }

    pub(crate) fn num_mutations(&self) -> usize {
        match self {
            Leaf::Static(_) | Leaf::Item(_) | Leaf::Computed(_) => 0,
            Leaf::Text(f) => f.catalog.len(),
            Leaf::Dynamic(f) => f.catalog.len(),
            Leaf::Num(f) => f.catalog.len(),
            Leaf::RandomBytes(f) => f.steps,
            Leaf::RandomBits(f) => f.steps,
        }
    }

    /// The leaf's current value, as seen by conditions. Computed fields have
    /// no current value of their own.
    pub(crate) fn current_value(&self) -> Option<Value> {
        match self {
            Leaf::Static(f) => Some(Value::Bytes(f.value.to_bytes())),
            Leaf::Text(f) => Some(Value::Bytes(f.current.clone())),
            Leaf::Dynamic(f) => Some(Value::Bytes(f.current.clone())),
            Leaf::Num(f) => Some(Value::Int(f.current)),
            Leaf::RandomBytes(f) => Some(Value::Bytes(f.current_bytes().to_vec())),
            Leaf::RandomBits(f) => Some(Value::Bytes(f.current_bits().to_bytes())),
            Leaf::Item(_) | Leaf::Computed(_) => None,
        }
    }

    pub(crate) fn as_computed_mut(&mut self) -> Option<&mut Computed> {
        match self {
            Leaf::Computed(f) => Some(f),
            _ => None,
        }
    }

    pub(crate) fn as_dynamic_mut(&mut self) -> Option<&mut DynamicField> {
        match self {
            Leaf::Dynamic(f) => Some(f),
            _ => None,
        }
    }
}

/// Shared cursor-advance used by the catalog-driven leaves.
fn advance_catalog<T: Clone + PartialEq>(
    cursor: &mut Option<usize>,
    catalog: &[T],
    current: &mut T,
    default: &T,
) -> bool {
    let next = cursor.map_or(0, |c| c + 1);
    if next >= catalog.len() {
        *current = default.clone();
        *cursor = None;
        return false;
    }
    *cursor = Some(next);
    *current = catalog[next].clone();
    true
}

/// A fixed, immutable run of bits. Never mutates.
#[derive(Debug, Clone)]
pub struct StaticField {
    name: Option<String>,
    value: Bits,
}

impl StaticField {
    pub fn new(value: impl AsRef<[u8]>) -> Self {
        Self {
            name: None,
            value: Bits::from_bytes(value),
        }
    }

    /// A static run with sub-byte precision.
    pub fn bits(value: Bits) -> Self {
        Self { name: None, value }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// A mutable text/byte field.
#[derive(Debug, Clone)]
pub struct TextField {
    name: Option<String>,
    default: Vec<u8>,
    current: Vec<u8>,
    encoder: Arc<dyn StrEncoder>,
    max_len: Option<usize>,
    catalog: Vec<Vec<u8>>,
    cursor: Option<usize>,
}

impl TextField {
    pub fn new(default: impl AsRef<[u8]>) -> Self {
        let default = default.as_ref().to_vec();
        let catalog = mutations::string_mutations(&default, None);
        Self {
            name: None,
            current: default.clone(),
            default,
            encoder: encoders::str_identity(),
            max_len: None,
            catalog,
            cursor: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_encoder(mut self, encoder: Arc<dyn StrEncoder>) -> Self {
        self.encoder = encoder;
        self
    }

    /// Declares a maximum length, adding boundary-length variants to the
    /// mutation catalog.
    pub fn with_max_len(mut self, max_len: usize) -> Self {
        self.max_len = Some(max_len);
        self.catalog = mutations::string_mutations(&self.default, self.max_len);
        self
    }
}

/// An integer field of 1..=64 bits, signed or unsigned.
#[derive(Debug, Clone)]
pub struct NumField {
    name: Option<String>,
    default: i128,
    current: i128,
    width: usize,
    signed: bool,
    encoder: Arc<dyn IntEncoder>,
    catalog: Vec<i128>,
    cursor: Option<usize>,
}

impl NumField {
    fn build(default: i128, width: usize, signed: bool) -> Result<Self> {
        if width == 0 || width > 64 {
            return Err(ModelError::Configuration(format!(
                "field width must be in 1..=64, got {}",
                width
            )));
        }
        let (min, max) = mutations::int_bounds(width, signed);
        if default < min || default > max {
            return Err(ModelError::Configuration(format!(
                "default value {} does not fit a {}-bit {} field",
                default,
                width,
                if signed { "signed" } else { "unsigned" }
            )));
        }
        Ok(Self {
            name: None,
            default,
            current: default,
            width,
            signed,
            encoder: encoders::int_be(),
            catalog: mutations::int_mutations(default, width, signed),
            cursor: None,
        })
    }

    pub fn unsigned(default: u64, width: usize) -> Result<Self> {
        Self::build(default as i128, width, false)
    }

    pub fn signed(default: i64, width: usize) -> Result<Self> {
        Self::build(default as i128, width, true)
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Swaps the encoder; incompatible pairings fail here, at construction.
    pub fn with_encoder(mut self, encoder: Arc<dyn IntEncoder>) -> Result<Self> {
        encoder.validate(self.width, self.signed)?;
        self.encoder = encoder;
        Ok(self)
    }
}

/// A field whose current value may be supplied by an outside source, keyed
/// by name; otherwise behaves like a text field over its default.
#[derive(Debug, Clone)]
pub struct DynamicField {
    name: Option<String>,
    key: String,
    default: Vec<u8>,
    current: Vec<u8>,
    encoder: Arc<dyn StrEncoder>,
    catalog: Vec<Vec<u8>>,
    cursor: Option<usize>,
}

impl DynamicField {
    pub fn new(key: impl Into<String>, default: impl AsRef<[u8]>) -> Self {
        let default = default.as_ref().to_vec();
        let catalog = mutations::string_mutations(&default, None);
        Self {
            name: None,
            key: key.into(),
            current: default.clone(),
            default,
            encoder: encoders::str_identity(),
            catalog,
            cursor: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_encoder(mut self, encoder: Arc<dyn StrEncoder>) -> Self {
        self.encoder = encoder;
        self
    }

    pub(crate) fn key(&self) -> &str {
        &self.key
    }

    pub(crate) fn set_override(&mut self, value: Vec<u8>) {
        self.current = value;
    }
}

/// Renders an explicit default literal until mutated; each mutation step
/// draws pseudo-random content with a length in the configured byte range.
/// The stream for step `k` is derived from `(seed, k)`, so identically
/// configured fields replay identical campaigns.
#[derive(Debug, Clone)]
pub struct RandomBytesField {
    name: Option<String>,
    default: Vec<u8>,
    min_len: usize,
    max_len: usize,
    steps: usize,
    seed: u64,
    current: Option<Vec<u8>>,
    cursor: Option<usize>,
}

impl RandomBytesField {
    pub fn new(default: impl AsRef<[u8]>, min_len: usize, max_len: usize) -> Result<Self> {
        if min_len > max_len {
            return Err(ModelError::Configuration(format!(
                "random field length range is inverted: {}..={}",
                min_len, max_len
            )));
        }
        Ok(Self {
            name: None,
            default: default.as_ref().to_vec(),
            min_len,
            max_len,
            steps: DEFAULT_RANDOM_STEPS,
            seed: 0,
            current: None,
            cursor: None,
        })
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_steps(mut self, steps: usize) -> Self {
        self.steps = steps;
        self
    }

    fn current_bytes(&self) -> &[u8] {
        self.current.as_deref().unwrap_or(&self.default)
    }

    fn mutate(&mut self) -> bool {
        let next = self.cursor.map_or(0, |c| c + 1);
        if next >= self.steps {
            self.current = None;
            self.cursor = None;
            return false;
        }
        let mut rng = step_rng(self.seed, next);
        let len = rng.gen_range(self.min_len..=self.max_len);
        self.current = Some((0..len).map(|_| rng.gen()).collect());
        self.cursor = Some(next);
        true
    }
}

/// Bit-granular variant of [`RandomBytesField`]: lengths are in bits.
#[derive(Debug, Clone)]
pub struct RandomBitsField {
    name: Option<String>,
    default: Bits,
    min_len: usize,
    max_len: usize,
    steps: usize,
    seed: u64,
    current: Option<Bits>,
    cursor: Option<usize>,
}

impl RandomBitsField {
    pub fn new(default: Bits, min_len: usize, max_len: usize) -> Result<Self> {
        if min_len > max_len {
            return Err(ModelError::Configuration(format!(
                "random field length range is inverted: {}..={}",
                min_len, max_len
            )));
        }
        Ok(Self {
            name: None,
            default,
            min_len,
            max_len,
            steps: DEFAULT_RANDOM_STEPS,
            seed: 0,
            current: None,
            cursor: None,
        })
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_steps(mut self, steps: usize) -> Self {
        self.steps = steps;
        self
    }

    fn current_bits(&self) -> Bits {
        self.current.clone().unwrap_or_else(|| self.default.clone())
    }

    fn mutate(&mut self) -> bool {
        let next = self.cursor.map_or(0, |c| c + 1);
        if next >= self.steps {
            self.current = None;
            self.cursor = None;
            return false;
        }
        let mut rng = step_rng(self.seed, next);
        let len = rng.gen_range(self.min_len..=self.max_len);
        let bytes: Vec<u8> = (0..(len + 7) / 8).map(|_| rng.gen()).collect();
        let mut bits = Bits::from_bytes(bytes);
        bits.truncate(len);
        self.current = Some(bits);
        self.cursor = Some(next);
        true
    }
}

fn step_rng(seed: u64, step: usize) -> StdRng {
    StdRng::seed_from_u64(seed ^ (step as u64).wrapping_mul(STEP_MIX))
}

/// Placeholder for the current item of an enclosing `ForEach`; renders the
/// item through the configured string encoder.
#[derive(Debug, Clone)]
pub struct ItemField {
    name: Option<String>,
    encoder: Arc<dyn StrEncoder>,
}

impl ItemField {
    pub fn new() -> Self {
        Self {
            name: None,
            encoder: encoders::str_identity(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_encoder(mut self, encoder: Arc<dyn StrEncoder>) -> Self {
        self.encoder = encoder;
        self
    }

    fn render<'a>(&'a self, ctx: &mut RenderCtx<'a>) -> Result<Bits> {
        let item = ctx.current_item().ok_or_else(|| {
            ModelError::Configuration("item field used outside a foreach".to_string())
        })?;
        self.encoder.encode(item)
    }
}

impl Default for ItemField {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoders::MultiByte;

    #[test]
    fn static_field_never_mutates() {
        let mut leaf = Leaf::Static(StaticField::new(" "));
        assert!(!leaf.mutate());
        assert_eq!(leaf.num_mutations(), 0);
    }

    #[test]
    fn text_field_walks_catalog_and_reverts() {
        let mut leaf = Leaf::Text(TextField::new("hi"));
        let total = leaf.num_mutations();
        assert!(total > 0);
        let mut produced = 0;
        while leaf.mutate() {
            produced += 1;
            assert!(produced <= total);
        }
        assert_eq!(produced, total);
        // exhausted: back at the default
        assert_eq!(
            leaf.current_value(),
            Some(Value::Bytes(b"hi".to_vec()))
        );
    }

    #[test]
    fn num_field_validates_construction() {
        assert!(NumField::unsigned(256, 8).is_err());
        assert!(NumField::unsigned(255, 8).is_ok());
        assert!(NumField::signed(-129, 8).is_err());
        assert!(NumField::signed(-128, 8).is_ok());
        assert!(NumField::unsigned(1, 0).is_err());
        assert!(NumField::unsigned(1, 65).is_err());
    }

    #[test]
    fn signed_field_rejects_multibyte_encoder() {
        let err = NumField::signed(-12, 8)
            .unwrap()
            .with_encoder(Arc::new(MultiByte));
        assert!(matches!(err, Err(ModelError::Configuration(_))));
    }

    #[test]
    fn num_mutations_stay_in_range() {
        let mut leaf = Leaf::Num(NumField::unsigned(0xaa, 8).unwrap());
        while leaf.mutate() {
            match leaf.current_value() {
                Some(Value::Int(v)) => assert!((0..=255).contains(&v)),
                other => panic!("unexpected value {:?}", other),
            }
        }
    }

    #[test]
    fn dynamic_override_and_reset() {
        let mut leaf = Leaf::Dynamic(DynamicField::new("session", "L3"));
        leaf.as_dynamic_mut().unwrap().set_override(b"zz".to_vec());
        assert_eq!(leaf.current_value(), Some(Value::Bytes(b"zz".to_vec())));
        leaf.reset();
        assert_eq!(leaf.current_value(), Some(Value::Bytes(b"L3".to_vec())));
    }

    #[test]
    fn random_bytes_renders_literal_until_mutated() {
        let mut field = RandomBytesField::new(" ", 1, 100).unwrap().with_seed(7);
        assert_eq!(field.current_bytes(), b" ");
        assert!(field.mutate());
        let first = field.current_bytes().to_vec();
        assert!(first.len() >= 1 && first.len() <= 100);

        // identical configuration replays the identical sequence
        let mut twin = RandomBytesField::new(" ", 1, 100).unwrap().with_seed(7);
        assert!(twin.mutate());
        assert_eq!(twin.current_bytes(), first.as_slice());
    }

    #[test]
    fn random_bytes_exhausts_after_configured_steps() {
        let mut leaf = Leaf::RandomBytes(
            RandomBytesField::new(b"x", 0, 4).unwrap().with_steps(3),
        );
        assert_eq!(leaf.num_mutations(), 3);
        assert!(leaf.mutate());
        assert!(leaf.mutate());
        assert!(leaf.mutate());
        assert!(!leaf.mutate());
        assert_eq!(leaf.current_value(), Some(Value::Bytes(b"x".to_vec())));
    }

    #[test]
    fn random_bits_length_is_bit_granular() {
        let mut field = RandomBitsField::new(Bits::from_bytes(b"d"), 3, 3).unwrap();
        assert!(field.mutate());
        assert_eq!(field.current_bits().len(), 3);
    }

    #[test]
    fn inverted_range_is_rejected() {
        assert!(RandomBytesField::new(b"x", 5, 2).is_err());
    }
}
