// fray-model/src/condition.rs
//! Predicates for conditional containers.
//!
//! A condition reads the *current values* of other fields (not their rendered
//! bits) through the template's resolver, so inclusion decisions track
//! mutation state without forcing extra render passes.

use std::fmt;
use std::sync::Arc;

use crate::error::Result;
use crate::template::ResolveView;
use crate::value::Value;

/// Boolean predicate over the model's current state.
pub trait Condition: fmt::Debug + Send + Sync {
    /// Field references the predicate reads; validated at template build.
    fn refs(&self) -> Vec<String>;

    fn eval(&self, view: &ResolveView<'_>) -> Result<bool>;
}

/// True when the referenced field's current value equals `value`.
#[derive(Debug, Clone)]
pub struct FieldEq {
    field: String,
    value: Value,
}

impl FieldEq {
    pub fn new(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
        }
    }
}

impl Condition for FieldEq {
    fn refs(&self) -> Vec<String> {
        vec![self.field.clone()]
    }

    fn eval(&self, view: &ResolveView<'_>) -> Result<bool> {
        Ok(view.current_value(&self.field)? == self.value)
    }
}

/// True when the referenced field's current value is one of `values`.
#[derive(Debug, Clone)]
pub struct FieldInSet {
    field: String,
    values: Vec<Value>,
}

impl FieldInSet {
    pub fn new(field: impl Into<String>, values: impl IntoIterator<Item = Value>) -> Self {
        Self {
            field: field.into(),
            values: values.into_iter().collect(),
        }
    }
}

impl Condition for FieldInSet {
    fn refs(&self) -> Vec<String> {
        vec![self.field.clone()]
    }

    fn eval(&self, view: &ResolveView<'_>) -> Result<bool> {
        let current = view.current_value(&self.field)?;
        Ok(self.values.contains(&current))
    }
}

/// Adapter for an arbitrary predicate closure.
#[derive(Clone)]
pub struct FnCondition {
    refs: Vec<String>,
    f: Arc<dyn Fn(&ResolveView<'_>) -> Result<bool> + Send + Sync>,
}

impl FnCondition {
    /// `refs` must list every field the closure reads so the template can
    /// validate them at build time.
    pub fn new(
        refs: impl IntoIterator<Item = String>,
        f: impl Fn(&ResolveView<'_>) -> Result<bool> + Send + Sync + 'static,
    ) -> Self {
        Self {
            refs: refs.into_iter().collect(),
            f: Arc::new(f),
        }
    }
}

impl fmt::Debug for FnCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FnCondition({:?})", self.refs)
    }
}

impl Condition for FnCondition {
    fn refs(&self) -> Vec<String> {
        self.refs.clone()
    }

    fn eval(&self, view: &ResolveView<'_>) -> Result<bool> {
        (self.f)(view)
    }
}
