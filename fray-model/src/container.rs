// fray-model/src/container.rs
//! Structural containers and the model tree node.
//!
//! A container is an ordered composite of fields and nested containers;
//! its structural kind decides how children are selected and combined at
//! render time. Mutation delegates depth-first: the container advances one
//! child at a time and moves on when that child's sequence is exhausted.

use std::sync::Arc;

use log::trace;

use crate::bits::Bits;
use crate::calculated::Computed;
use crate::condition::Condition;
use crate::error::{ModelError, Result};
use crate::field::{
    DynamicField, ItemField, Leaf, NumField, RandomBitsField, RandomBytesField, StaticField,
    TextField,
};
use crate::template::RenderCtx;
use crate::value::Value;

/// A node of the model tree: a leaf field or a nested container.
#[derive(Debug, Clone)]
pub enum Node {
    Leaf(Leaf),
    Container(Container),
}

impl Node {
    pub fn name(&self) -> Option<&str> {
        match self {
            Node::Leaf(leaf) => leaf.name(),
            Node::Container(c) => c.name.as_deref(),
        }
    }

    pub(crate) fn set_name(&mut self, name: String) {
        match self {
            Node::Leaf(leaf) => leaf.set_name(name),
            Node::Container(c) => c.name = Some(name),
        }
    }

    pub(crate) fn kind_label(&self) -> &'static str {
        match self {
            Node::Leaf(leaf) => leaf.kind_label(),
            Node::Container(c) => c.kind_label(),
        }
    }

    /// Deep structural copy under a new name. The copy shares the original's
    /// default shape but mutates independently. Clone before the tree is
    /// handed to a template; resolved references do not transfer.
    pub fn clone_as(&self, name: impl Into<String>) -> Node {
        let mut copy = self.clone();
        copy.set_name(name.into());
        copy
    }

    pub(crate) fn children(&self) -> Option<&[Node]> {
        match self {
            Node::Leaf(_) => None,
            Node::Container(c) => Some(&c.children),
        }
    }

    pub(crate) fn children_mut(&mut self) -> Option<&mut Vec<Node>> {
        match self {
            Node::Leaf(_) => None,
            Node::Container(c) => Some(&mut c.children),
        }
    }

    pub(crate) fn as_container(&self) -> Option<&Container> {
        match self {
            Node::Container(c) => Some(c),
            Node::Leaf(_) => None,
        }
    }

    pub(crate) fn as_container_mut(&mut self) -> Option<&mut Container> {
        match self {
            Node::Container(c) => Some(c),
            Node::Leaf(_) => None,
        }
    }

    pub(crate) fn as_leaf(&self) -> Option<&Leaf> {
        match self {
            Node::Leaf(leaf) => Some(leaf),
            Node::Container(_) => None,
        }
    }

    pub(crate) fn current_value(&self) -> Option<Value> {
        self.as_leaf().and_then(|leaf| leaf.current_value())
    }

    pub(crate) fn render<'a>(&'a self, ctx: &mut RenderCtx<'a>) -> Result<Bits> {
        match self.name() {
            Some(name) => {
                ctx.enter(name);
                let out = match self {
                    Node::Leaf(leaf) => leaf.render(ctx),
                    Node::Container(c) => c.render(ctx),
                };
                if let Ok(bits) = &out {
                    ctx.record_here(bits);
                }
                ctx.exit();
                out
            }
            // only reachable for trees rendered outside a template build
            None => match self {
                Node::Leaf(leaf) => leaf.render(ctx),
                Node::Container(c) => c.render(ctx),
            },
        }
    }

    pub(crate) fn mutate(&mut self) -> bool {
        match self {
            Node::Leaf(leaf) => leaf.mutate(),
            Node::Container(c) => c.mutate(),
        }
    }

    pub(crate) fn reset(&mut self) {
        match self {
            Node::Leaf(leaf) => leaf.reset(),
            Node::Container(c) => c.reset(),
        }
    }

    pub(crate) fn num_mutations(&self) -> usize {
        match self {
            Node::Leaf(leaf) => leaf.num_mutations(),
            Node::Container(c) => c.num_mutations(),
        }
    }
}

impl From<Container> for Node {
    fn from(c: Container) -> Self {
        Node::Container(c)
    }
}

impl From<StaticField> for Node {
    fn from(f: StaticField) -> Self {
        Node::Leaf(Leaf::Static(f))
    }
}

impl From<TextField> for Node {
    fn from(f: TextField) -> Self {
        Node::Leaf(Leaf::Text(f))
    }
}

impl From<NumField> for Node {
    fn from(f: NumField) -> Self {
        Node::Leaf(Leaf::Num(f))
    }
}

impl From<DynamicField> for Node {
    fn from(f: DynamicField) -> Self {
        Node::Leaf(Leaf::Dynamic(f))
    }
}

impl From<RandomBytesField> for Node {
    fn from(f: RandomBytesField) -> Self {
        Node::Leaf(Leaf::RandomBytes(f))
    }
}

impl From<RandomBitsField> for Node {
    fn from(f: RandomBitsField) -> Self {
        Node::Leaf(Leaf::RandomBits(f))
    }
}

impl From<ItemField> for Node {
    fn from(f: ItemField) -> Self {
        Node::Leaf(Leaf::Item(f))
    }
}

impl From<Computed> for Node {
    fn from(f: Computed) -> Self {
        Node::Leaf(Leaf::Computed(f))
    }
}

/// Where the repetition count of a `Repeat` comes from.
#[derive(Debug, Clone)]
pub enum RepeatCount {
    Fixed(usize),
    /// Read from another field's current value at render time.
    FromField(String),
}

/// How a `TakeFrom` container's mutation walks its subsequences.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TakePhase {
    /// Default: the full child sequence renders.
    Default,
    /// Rendering subsequence `takes[i]`.
    Take(usize),
    /// Subsequences exhausted; delegating to child mutations.
    Children,
}

#[derive(Debug, Clone)]
pub(crate) enum ContainerKind {
    Group,
    Meta,
    Pad {
        pad_len: usize,
        fill: Vec<u8>,
    },
    Repeat {
        count: RepeatCount,
    },
    OneOf {
        selected: usize,
    },
    TakeFrom {
        takes: Vec<(usize, usize)>,
        phase: TakePhase,
    },
    Cond {
        cond: Arc<dyn Condition>,
        negate: bool,
    },
    ForEach {
        items: Vec<Value>,
    },
    Trunc {
        max_bits: usize,
    },
}

/// An ordered composite of fields and/or nested containers.
#[derive(Debug, Clone)]
pub struct Container {
    name: Option<String>,
    kind: ContainerKind,
    children: Vec<Node>,
    cursor: usize,
}

impl Container {
    fn build(kind: ContainerKind, children: Vec<Node>) -> Self {
        Self {
            name: None,
            kind,
            children,
            cursor: 0,
        }
    }

    /// Plain concatenation of the children, in order.
    pub fn group(children: Vec<Node>) -> Self {
        Self::build(ContainerKind::Group, children)
    }

    /// Children render into the dependency namespace but contribute no bits.
    pub fn meta(children: Vec<Node>) -> Self {
        Self::build(ContainerKind::Meta, children)
    }

    /// Pads the children's render with a repeating fill pattern up to
    /// `pad_len` bits. Content longer than `pad_len` fails at render.
    pub fn pad(children: Vec<Node>, pad_len: usize, fill: impl AsRef<[u8]>) -> Result<Self> {
        let fill = fill.as_ref().to_vec();
        if fill.is_empty() {
            return Err(ModelError::Configuration(
                "pad fill pattern must not be empty".to_string(),
            ));
        }
        Ok(Self::build(ContainerKind::Pad { pad_len, fill }, children))
    }

    /// Renders the inner structure a fixed number of times.
    pub fn repeat(children: Vec<Node>, count: usize) -> Self {
        Self::build(
            ContainerKind::Repeat {
                count: RepeatCount::Fixed(count),
            },
            children,
        )
    }

    /// Renders the inner structure as many times as the referenced field's
    /// current value says.
    pub fn repeat_from(children: Vec<Node>, count_field: impl Into<String>) -> Self {
        Self::build(
            ContainerKind::Repeat {
                count: RepeatCount::FromField(count_field.into()),
            },
            children,
        )
    }

    /// Renders exactly one alternative; selection advances as part of the
    /// mutation sequence.
    pub fn one_of(children: Vec<Node>) -> Result<Self> {
        if children.is_empty() {
            return Err(ModelError::Configuration(
                "one-of requires at least one alternative".to_string(),
            ));
        }
        Ok(Self::build(ContainerKind::OneOf { selected: 0 }, children))
    }

    /// Renders a contiguous subsequence of the children. The default render
    /// is the full sequence; mutation enumerates subsequences with lengths in
    /// `min_take..=max_take`, ordered by start position then length.
    pub fn take_from(children: Vec<Node>, min_take: usize, max_take: usize) -> Result<Self> {
        let n = children.len();
        if n == 0 {
            return Err(ModelError::Configuration(
                "take-from requires at least one child".to_string(),
            ));
        }
        if min_take == 0 || min_take > max_take || max_take > n {
            return Err(ModelError::Configuration(format!(
                "take-from range {}..={} is invalid for {} children",
                min_take, max_take, n
            )));
        }
        let mut takes = Vec::new();
        for start in 0..n {
            for len in min_take..=max_take {
                if start + len <= n && !(start == 0 && len == n) {
                    takes.push((start, len));
                }
            }
        }
        Ok(Self::build(
            ContainerKind::TakeFrom {
                takes,
                phase: TakePhase::Default,
            },
            children,
        ))
    }

    /// Includes the children only while the condition holds.
    pub fn when(cond: impl Condition + 'static, children: Vec<Node>) -> Self {
        Self::build(
            ContainerKind::Cond {
                cond: Arc::new(cond),
                negate: false,
            },
            children,
        )
    }

    /// Includes the children only while the condition does *not* hold.
    pub fn unless(cond: impl Condition + 'static, children: Vec<Node>) -> Self {
        Self::build(
            ContainerKind::Cond {
                cond: Arc::new(cond),
                negate: true,
            },
            children,
        )
    }

    /// Renders the body once per item of the supplied sequence; an
    /// [`ItemField`] in the body renders the current item.
    pub fn for_each(items: Vec<Value>, children: Vec<Node>) -> Self {
        Self::build(ContainerKind::ForEach { items }, children)
    }

    /// Truncates the children's render to at most `max_bits` bits.
    pub fn trunc(children: Vec<Node>, max_bits: usize) -> Self {
        Self::build(ContainerKind::Trunc { max_bits }, children)
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub(crate) fn kind_label(&self) -> &'static str {
        match self.kind {
            ContainerKind::Group => "group",
            ContainerKind::Meta => "meta",
            ContainerKind::Pad { .. } => "pad",
            ContainerKind::Repeat { .. } => "repeat",
            ContainerKind::OneOf { .. } => "one_of",
            ContainerKind::TakeFrom { .. } => "take_from",
            ContainerKind::Cond { negate: false, .. } => "if",
            ContainerKind::Cond { negate: true, .. } => "if_not",
            ContainerKind::ForEach { .. } => "for_each",
            ContainerKind::Trunc { .. } => "trunc",
        }
    }

    pub(crate) fn kind(&self) -> &ContainerKind {
        &self.kind
    }

    pub(crate) fn conditions(&self) -> Option<&Arc<dyn Condition>> {
        match &self.kind {
            ContainerKind::Cond { cond, .. } => Some(cond),
            _ => None,
        }
    }

    fn render_children<'a>(&'a self, ctx: &mut RenderCtx<'a>) -> Result<Bits> {
        let mut out = Bits::new();
        for child in &self.children {
            out.append(&child.render(ctx)?);
        }
        Ok(out)
    }

    pub(crate) fn render<'a>(&'a self, ctx: &mut RenderCtx<'a>) -> Result<Bits> {
        match &self.kind {
            ContainerKind::Group => self.render_children(ctx),
            ContainerKind::Meta => {
                // children are recorded for dependents, bits are dropped
                self.render_children(ctx)?;
                Ok(Bits::new())
            }
            ContainerKind::Pad { pad_len, fill } => {
                let mut out = self.render_children(ctx)?;
                if out.len() > *pad_len {
                    return Err(ModelError::Configuration(format!(
                        "padded content is {} bits, exceeding the {}-bit target",
                        out.len(),
                        pad_len
                    )));
                }
                let fill = Bits::from_bytes(fill);
                let mut i = 0;
                while out.len() < *pad_len {
                    out.push_bit(fill.get(i % fill.len()));
                    i += 1;
                }
                Ok(out)
            }
            ContainerKind::Repeat { count } => {
                let inner = self.render_children(ctx)?;
                let count = self.repeat_count(ctx)?;
                let mut out = Bits::new();
                for _ in 0..count {
                    out.append(&inner);
                }
                Ok(out)
            }
            ContainerKind::OneOf { selected } => self.children[*selected].render(ctx),
            ContainerKind::TakeFrom { takes, phase } => {
                let (start, len) = match phase {
                    TakePhase::Take(i) => takes[*i],
                    TakePhase::Default | TakePhase::Children => (0, self.children.len()),
                };
                let mut out = Bits::new();
                for child in &self.children[start..start + len] {
                    out.append(&child.render(ctx)?);
                }
                Ok(out)
            }
            ContainerKind::Cond { cond, negate } => {
                let holds = cond.eval(&ctx.view())? != *negate;
                if holds {
                    self.render_children(ctx)
                } else {
                    Ok(Bits::new())
                }
            }
            ContainerKind::ForEach { items } => {
                let mut out = Bits::new();
                for item in items {
                    ctx.push_item(item);
                    let rendered = self.render_children(ctx);
                    ctx.pop_item();
                    out.append(&rendered?);
                }
                Ok(out)
            }
            ContainerKind::Trunc { max_bits } => {
                let mut out = self.render_children(ctx)?;
                out.truncate(*max_bits);
                Ok(out)
            }
        }
    }

    /// Number of repetitions the container currently renders; used by both
    /// rendering and the element-count computed field.
    pub(crate) fn repeat_count(&self, ctx: &RenderCtx<'_>) -> Result<usize> {
        match &self.kind {
            ContainerKind::Repeat {
                count: RepeatCount::Fixed(n),
            } => Ok(*n),
            ContainerKind::Repeat {
                count: RepeatCount::FromField(field),
            } => {
                let value = ctx.view().current_value(field)?;
                let n = value.as_int().ok_or_else(|| {
                    ModelError::Configuration(format!(
                        "repeat count field {:?} holds a {} value, expected an integer",
                        field,
                        value.kind()
                    ))
                })?;
                if n < 0 {
                    return Err(ModelError::Configuration(format!(
                        "repeat count field {:?} resolved to negative {}",
                        field, n
                    )));
                }
                Ok(n as usize)
            }
            _ => Ok(1),
        }
    }

    /// Count of direct child instances the container currently renders.
    pub(crate) fn element_count(&self, ctx: &RenderCtx<'_>) -> Result<usize> {
        match &self.kind {
            ContainerKind::Repeat { .. } => self.repeat_count(ctx),
            ContainerKind::ForEach { items } => Ok(items.len()),
            ContainerKind::OneOf { .. } => Ok(1),
            ContainerKind::TakeFrom { takes, phase } => Ok(match phase {
                TakePhase::Take(i) => takes[*i].1,
                _ => self.children.len(),
            }),
            ContainerKind::Cond { cond, negate } => {
                let holds = cond.eval(&ctx.view())? != *negate;
                Ok(if holds { self.children.len() } else { 0 })
            }
            _ => Ok(self.children.len()),
        }
    }

    /// Current selection of a selector container (OneOf/TakeFrom).
    pub(crate) fn selected_index(&self) -> Option<usize> {
        match &self.kind {
            ContainerKind::OneOf { selected } => Some(*selected),
            ContainerKind::TakeFrom { takes, phase } => Some(match phase {
                TakePhase::Take(i) => takes[*i].0,
                _ => 0,
            }),
            _ => None,
        }
    }

    pub(crate) fn is_selector(&self) -> bool {
        matches!(
            self.kind,
            ContainerKind::OneOf { .. } | ContainerKind::TakeFrom { .. }
        )
    }

    fn mutate_children(&mut self) -> bool {
        while self.cursor < self.children.len() {
            if self.children[self.cursor].mutate() {
                return true;
            }
            // exhausted child has already reverted to its default
            self.cursor += 1;
        }
        false
    }

    fn mutate_one_of(&mut self) -> bool {
        let selected = match &self.kind {
            ContainerKind::OneOf { selected } => *selected,
            _ => return false,
        };
        if self.children[selected].mutate() {
            return true;
        }
        let next = selected + 1;
        if next < self.children.len() {
            if let ContainerKind::OneOf { selected } = &mut self.kind {
                *selected = next;
            }
            trace!("one_of advanced selection to alternative {}", next);
            return true;
        }
        false
    }

    fn mutate_take_from(&mut self) -> bool {
        let (phase, total) = match &self.kind {
            ContainerKind::TakeFrom { takes, phase } => (*phase, takes.len()),
            _ => return false,
        };
        let next = match phase {
            TakePhase::Default if total > 0 => TakePhase::Take(0),
            TakePhase::Default => TakePhase::Children,
            TakePhase::Take(i) if i + 1 < total => TakePhase::Take(i + 1),
            TakePhase::Take(_) => TakePhase::Children,
            TakePhase::Children => TakePhase::Children,
        };
        if let ContainerKind::TakeFrom { phase, .. } = &mut self.kind {
            *phase = next;
        }
        match next {
            // advancing through the subsequence catalog is itself a mutation
            TakePhase::Take(_) => true,
            _ => self.mutate_children(),
        }
    }

    pub(crate) fn mutate(&mut self) -> bool {
        let advanced = match &self.kind {
            ContainerKind::OneOf { .. } => self.mutate_one_of(),
            ContainerKind::TakeFrom { .. } => self.mutate_take_from(),
            _ => self.mutate_children(),
        };
        if !advanced {
            self.reset();
        }
        advanced
    }

    pub(crate) fn reset(&mut self) {
        self.cursor = 0;
        match &mut self.kind {
            ContainerKind::OneOf { selected } => *selected = 0,
            ContainerKind::TakeFrom { phase, .. } => *phase = TakePhase::Default,
            _ => {}
        }
        for child in &mut self.children {
            child.reset();
        }
    }

    pub(crate) fn num_mutations(&self) -> usize {
        let inner: usize = self.children.iter().map(Node::num_mutations).sum();
        match &self.kind {
            ContainerKind::OneOf { .. } => inner + self.children.len() - 1,
            ContainerKind::TakeFrom { takes, .. } => inner + takes.len(),
            _ => inner,
        }
    }

    pub(crate) fn children(&self) -> &[Node] {
        &self.children
    }

    pub(crate) fn children_mut(&mut self) -> &mut Vec<Node> {
        &mut self.children
    }
}
