//! # fray-model
//!
//! Declarative models of binary protocol messages for fuzz testing.
//!
//! A message is described as a tree of typed fields — scalars, strings,
//! structural containers — rooted in a [`Template`]. The template renders
//! the tree into an exact bit sequence, steps deterministically through
//! mutated variants of one field at a time, and derives dependent fields
//! (sizes, counts, checksums, digests) from the rendered state of the rest
//! of the tree.
//!
//! ```
//! use fray_model::{Node, NumField, Template, TextField};
//!
//! let mut tpl = Template::new(
//!     "ping",
//!     vec![
//!         Node::from(TextField::new("PING").with_name("verb")),
//!         Node::from(NumField::unsigned(1, 16).unwrap().with_name("seq")),
//!     ],
//! )
//! .unwrap();
//!
//! let baseline = tpl.render().unwrap();
//! while tpl.mutate() {
//!     let variant = tpl.render().unwrap();
//!     // hand variant.to_bytes() to the target under test
//!     let _ = variant;
//! }
//! tpl.reset();
//! assert_eq!(tpl.render().unwrap(), baseline);
//! ```

pub mod bits;
pub mod calculated;
pub mod condition;
pub mod container;
pub mod encoders;
pub mod error;
pub mod field;
pub mod mutations;
pub mod template;
pub mod value;

pub use bits::Bits;
pub use calculated::{
    Additive, ChecksumAlgo, Computed, Crc32, DigestAlgo, Sha256Digest, Sha512Digest, SizeUnit,
    Xor8,
};
pub use condition::{Condition, FieldEq, FieldInSet, FnCondition};
pub use container::{Container, Node, RepeatCount};
pub use encoders::{IntEncoder, StrEncoder};
pub use error::{ModelError, Result};
pub use field::{
    DynamicField, ItemField, NumField, RandomBitsField, RandomBytesField, StaticField, TextField,
};
pub use template::{Mutations, ResolveView, Template};
pub use value::Value;
