// fray-model/src/template.rs
//! The template: root container, dependency resolver and mutation driver.
//!
//! A template owns the model tree, the name index used by dependent fields,
//! and the campaign cursor. Rendering is a pure tree walk repeated until the
//! output is stable: a dependent field whose target has not rendered yet
//! computes over the target's previous-pass bits (or over empty input on the
//! first pass), so backward references settle in one pass and forward or
//! enclosing references settle in two. A tree whose content chases its own
//! output never stabilizes and is reported as a dependency error.

use std::collections::{HashMap, HashSet};

use log::{debug, trace};

use crate::bits::Bits;
use crate::container::{Container, ContainerKind, Node, RepeatCount};
use crate::error::{ModelError, Result};
use crate::value::Value;

/// Upper bound on render passes; any model with a resolvable dependency
/// graph stabilizes well below this.
const MAX_RENDER_PASSES: usize = 8;

/// Per-pass rendering state threaded through the tree walk.
pub(crate) struct RenderCtx<'a> {
    tpl: &'a Template,
    prev: &'a HashMap<String, Bits>,
    cur: HashMap<String, Bits>,
    path: Vec<&'a str>,
    items: Vec<&'a Value>,
    pub(crate) missed: bool,
    pub(crate) used_prev: bool,
}

impl<'a> RenderCtx<'a> {
    fn new(tpl: &'a Template, prev: &'a HashMap<String, Bits>) -> Self {
        Self {
            tpl,
            prev,
            cur: HashMap::new(),
            path: Vec::new(),
            items: Vec::new(),
            missed: false,
            used_prev: false,
        }
    }

    pub(crate) fn enter(&mut self, name: &'a str) {
        self.path.push(name);
    }

    pub(crate) fn exit(&mut self) {
        self.path.pop();
    }

    pub(crate) fn record_here(&mut self, bits: &Bits) {
        self.cur.insert(self.path.join("/"), bits.clone());
    }

    /// The target's freshest rendered bits: this pass if available, else the
    /// previous pass, else `None` (first pass over a forward reference).
    pub(crate) fn lookup(&mut self, path: &str) -> Option<Bits> {
        if let Some(bits) = self.cur.get(path) {
            return Some(bits.clone());
        }
        if let Some(bits) = self.prev.get(path) {
            self.used_prev = true;
            return Some(bits.clone());
        }
        self.missed = true;
        None
    }

    pub(crate) fn resolve(&self, reference: &str) -> Result<String> {
        self.tpl.resolve_ref(reference)
    }

    pub(crate) fn view(&self) -> ResolveView<'a> {
        ResolveView { tpl: self.tpl }
    }

    pub(crate) fn push_item(&mut self, item: &'a Value) {
        self.items.push(item);
    }

    pub(crate) fn pop_item(&mut self) {
        self.items.pop();
    }

    pub(crate) fn current_item(&self) -> Option<&'a Value> {
        self.items.last().copied()
    }

    /// Count of child instances the target container currently renders.
    pub(crate) fn element_count(&self, path: &str) -> Result<usize> {
        if path == self.tpl.name {
            return Ok(self.tpl.root.children().len());
        }
        let node = self.tpl.node_at(path).ok_or_else(|| {
            ModelError::Dependency(format!("element count target {:?} not found", path))
        })?;
        match node {
            Node::Container(c) => c.element_count(self),
            Node::Leaf(_) => Err(ModelError::Configuration(format!(
                "element count target {:?} is not a container",
                path
            ))),
        }
    }

    /// Current selection index of the target selector container.
    pub(crate) fn selected_index(&self, path: &str) -> Result<usize> {
        let selector = self
            .tpl
            .node_at(path)
            .and_then(Node::as_container)
            .and_then(Container::selected_index);
        selector.ok_or_else(|| {
            ModelError::Configuration(format!(
                "index target {:?} is not a selector container",
                path
            ))
        })
    }
}

/// Read-only view used by conditions and count references to observe other
/// fields' current values.
pub struct ResolveView<'a> {
    tpl: &'a Template,
}

impl ResolveView<'_> {
    /// The referenced field's current (possibly mutated) value.
    pub fn current_value(&self, reference: &str) -> Result<Value> {
        let path = self.tpl.resolve_ref(reference)?;
        let node = self.tpl.node_at(&path).ok_or_else(|| {
            ModelError::Configuration(format!(
                "reference {:?} does not name a field",
                reference
            ))
        })?;
        node.current_value().ok_or_else(|| {
            ModelError::Configuration(format!(
                "field {:?} has no current value to observe",
                path
            ))
        })
    }
}

/// Deferred structural requirements gathered while resolving references.
enum RefCheck {
    SelectorTarget(String),
    ContainerTarget(String),
    ValueSource(String),
}

/// A named root container: the unit of render/mutate/reset driven by a
/// campaign controller, and the namespace root for dependent-field lookup.
pub struct Template {
    name: String,
    root: Container,
    paths: HashSet<String>,
    by_name: HashMap<String, Vec<String>>,
}

impl Template {
    pub fn new(name: impl Into<String>, fields: Vec<Node>) -> Result<Self> {
        let name = name.into();
        let mut root = Container::group(fields).with_name(name.clone());

        assign_names(&mut root)?;

        let mut paths = HashSet::new();
        let mut by_name: HashMap<String, Vec<String>> = HashMap::new();
        paths.insert(name.clone());
        by_name.entry(name.clone()).or_default().push(name.clone());
        for child in root.children() {
            index_node(child, &name, &mut paths, &mut by_name);
        }

        let mut checks = Vec::new();
        resolve_node_refs(&mut root, &name, &name, &paths, &by_name, &mut checks)?;

        let tpl = Self {
            name,
            root,
            paths,
            by_name,
        };
        tpl.run_checks(&checks)?;
        Ok(tpl)
    }

    /// Stable identifier for logging and reporting.
    pub fn get_name(&self) -> &str {
        &self.name
    }

    /// Renders the current state of the tree to an exact bit sequence.
    ///
    /// Pure: repeated calls without an intervening `mutate`/`reset` yield
    /// identical output.
    pub fn render(&self) -> Result<Bits> {
        let mut prev: HashMap<String, Bits> = HashMap::new();
        let mut last: Option<Bits> = None;
        for pass in 1..=MAX_RENDER_PASSES {
            let mut ctx = RenderCtx::new(self, &prev);
            ctx.enter(&self.name);
            let rendered = self.root.render(&mut ctx);
            if let Ok(bits) = &rendered {
                ctx.record_here(bits);
            }
            ctx.exit();
            let out = rendered?;
            trace!(
                "render pass {} of {:?}: {} bits (missed: {}, stale: {})",
                pass,
                self.name,
                out.len(),
                ctx.missed,
                ctx.used_prev
            );
            if !ctx.missed && !ctx.used_prev {
                return Ok(out);
            }
            if last.as_ref() == Some(&out) {
                return Ok(out);
            }
            last = Some(out);
            prev = ctx.cur;
        }
        Err(ModelError::Dependency(format!(
            "rendering of {:?} did not stabilize in {} passes; cyclic content dependency",
            self.name, MAX_RENDER_PASSES
        )))
    }

    /// Advances exactly one field to its next mutation. Returns `false` once
    /// every mutation point in the tree is exhausted; the tree is then back
    /// at its defaults.
    pub fn mutate(&mut self) -> bool {
        let advanced = self.root.mutate();
        if advanced {
            trace!("template {:?} advanced one mutation", self.name);
        } else {
            debug!("template {:?} mutation space exhausted", self.name);
        }
        advanced
    }

    /// Returns the whole tree to defaults and rewinds the campaign cursor.
    pub fn reset(&mut self) {
        debug!("template {:?} reset to defaults", self.name);
        self.root.reset();
    }

    /// Total number of mutations the campaign will produce.
    pub fn num_mutations(&self) -> usize {
        self.root.num_mutations()
    }

    /// Supplies an external value for every dynamic field registered under
    /// `key`. Fails if the key is unknown to this template.
    pub fn set_dynamic(&mut self, key: &str, value: impl AsRef<[u8]>) -> Result<()> {
        let mut found = false;
        set_dynamic_walk(self.root.children_mut(), key, value.as_ref(), &mut found);
        if found {
            Ok(())
        } else {
            Err(ModelError::DynamicKey(key.to_string()))
        }
    }

    /// The controller loop as an iterator: each step advances one mutation
    /// and yields the rendered variant.
    pub fn mutations(&mut self) -> Mutations<'_> {
        Mutations { tpl: self }
    }

    pub(crate) fn resolve_ref(&self, reference: &str) -> Result<String> {
        resolve_with(reference, &self.name, &self.paths, &self.by_name)
    }

    pub(crate) fn node_at(&self, path: &str) -> Option<&Node> {
        let mut segments = path.split('/');
        if segments.next() != Some(self.name.as_str()) {
            return None;
        }
        let mut children = self.root.children();
        let mut found: Option<&Node> = None;
        for segment in segments {
            let node = children.iter().find(|n| n.name() == Some(segment))?;
            children = node.children().unwrap_or(&[]);
            found = Some(node);
        }
        found
    }

    fn run_checks(&self, checks: &[RefCheck]) -> Result<()> {
        for check in checks {
            match check {
                RefCheck::SelectorTarget(path) => {
                    let ok = self
                        .node_at(path)
                        .and_then(Node::as_container)
                        .map(Container::is_selector)
                        .unwrap_or(false);
                    if !ok {
                        return Err(ModelError::Configuration(format!(
                            "index target {:?} is not a selector container",
                            path
                        )));
                    }
                }
                RefCheck::ContainerTarget(path) => {
                    let ok = path == &self.name
                        || self
                            .node_at(path)
                            .map(|n| n.as_container().is_some())
                            .unwrap_or(false);
                    if !ok {
                        return Err(ModelError::Configuration(format!(
                            "element count target {:?} is not a container",
                            path
                        )));
                    }
                }
                RefCheck::ValueSource(path) => {
                    let ok = self
                        .node_at(path)
                        .map(|n| n.current_value().is_some())
                        .unwrap_or(false);
                    if !ok {
                        return Err(ModelError::Configuration(format!(
                            "reference {:?} does not name an observable field",
                            path
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for Template {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Template")
            .field("name", &self.name)
            .field("fields", &self.root.children().len())
            .field("num_mutations", &self.num_mutations())
            .finish()
    }
}

/// Iterator over a template's remaining mutation campaign.
pub struct Mutations<'a> {
    tpl: &'a mut Template,
}

impl Iterator for Mutations<'_> {
    type Item = Result<Bits>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.tpl.mutate() {
            Some(self.tpl.render())
        } else {
            None
        }
    }
}

/// Gives anonymous nodes stable synthetic names and checks sibling
/// uniqueness.
fn assign_names(container: &mut Container) -> Result<()> {
    let container_name = container.name().unwrap_or("").to_string();
    let children = container.children_mut();
    for (idx, child) in children.iter_mut().enumerate() {
        if child.name().is_none() {
            child.set_name(format!("{}{}", child.kind_label(), idx));
        }
    }
    let mut seen = HashSet::new();
    for child in children.iter() {
        let name = child.name().unwrap_or_default();
        if name.contains('/') {
            return Err(ModelError::Configuration(format!(
                "field name {:?} must not contain '/'",
                name
            )));
        }
        if !seen.insert(name.to_string()) {
            return Err(ModelError::Configuration(format!(
                "duplicate field name {:?} under {:?}",
                name, container_name
            )));
        }
    }
    for child in children.iter_mut() {
        if let Some(c) = child.as_container_mut() {
            assign_names(c)?;
        }
    }
    Ok(())
}

fn index_node(
    node: &Node,
    parent_path: &str,
    paths: &mut HashSet<String>,
    by_name: &mut HashMap<String, Vec<String>>,
) {
    let name = node.name().expect("names are assigned before indexing");
    let path = format!("{}/{}", parent_path, name);
    by_name
        .entry(name.to_string())
        .or_default()
        .push(path.clone());
    paths.insert(path.clone());
    if let Some(children) = node.children() {
        for child in children {
            index_node(child, &path, paths, by_name);
        }
    }
}

fn resolve_with(
    reference: &str,
    tpl_name: &str,
    paths: &HashSet<String>,
    by_name: &HashMap<String, Vec<String>>,
) -> Result<String> {
    if paths.contains(reference) {
        return Ok(reference.to_string());
    }
    if reference.contains('/') {
        let qualified = format!("{}/{}", tpl_name, reference);
        if paths.contains(&qualified) {
            return Ok(qualified);
        }
        return Err(ModelError::Dependency(format!(
            "path {:?} does not exist in template {:?}",
            reference, tpl_name
        )));
    }
    match by_name.get(reference).map(Vec::as_slice) {
        None | Some([]) => Err(ModelError::Dependency(format!(
            "name {:?} does not exist in template {:?}",
            reference, tpl_name
        ))),
        Some([path]) => Ok(path.clone()),
        Some(matches) => Err(ModelError::Dependency(format!(
            "name {:?} is ambiguous in template {:?} ({} matches); use a path",
            reference,
            tpl_name,
            matches.len()
        ))),
    }
}

/// Resolves every computed-field target, repeat-count reference and
/// condition reference under `node`, failing fast on unknown names and on
/// content dependencies that enclose their own output.
fn resolve_node_refs(
    container: &mut Container,
    container_path: &str,
    tpl_name: &str,
    paths: &HashSet<String>,
    by_name: &HashMap<String, Vec<String>>,
    checks: &mut Vec<RefCheck>,
) -> Result<()> {
    if let ContainerKind::Repeat {
        count: RepeatCount::FromField(field),
    } = container.kind()
    {
        let resolved = resolve_with(field, tpl_name, paths, by_name)?;
        checks.push(RefCheck::ValueSource(resolved));
    }
    if let Some(cond) = container.conditions() {
        for reference in cond.refs() {
            let resolved = resolve_with(&reference, tpl_name, paths, by_name)?;
            checks.push(RefCheck::ValueSource(resolved));
        }
    }

    let children = container.children_mut();
    for child in children.iter_mut() {
        let child_path = format!(
            "{}/{}",
            container_path,
            child.name().expect("names are assigned before resolution")
        );
        match child {
            Node::Leaf(leaf) => {
                if let Some(computed) = leaf.as_computed_mut() {
                    let resolved = resolve_with(computed.target(), tpl_name, paths, by_name)?;
                    if computed.content_dependent()
                        && (child_path == resolved
                            || child_path.starts_with(&format!("{}/", resolved)))
                    {
                        return Err(ModelError::Dependency(format!(
                            "field {:?} depends on the content of {:?}, which contains its own output",
                            child_path, resolved
                        )));
                    }
                    if computed.needs_selector_target() {
                        checks.push(RefCheck::SelectorTarget(resolved.clone()));
                    }
                    if matches!(computed.kind_label(), "element_count") {
                        checks.push(RefCheck::ContainerTarget(resolved.clone()));
                    }
                    computed.set_resolved(resolved);
                }
            }
            Node::Container(c) => {
                resolve_node_refs(c, &child_path, tpl_name, paths, by_name, checks)?;
            }
        }
    }
    Ok(())
}

fn set_dynamic_walk(children: &mut Vec<Node>, key: &str, value: &[u8], found: &mut bool) {
    for child in children {
        match child {
            Node::Leaf(leaf) => {
                if let Some(dynamic) = leaf.as_dynamic_mut() {
                    if dynamic.key() == key {
                        dynamic.set_override(value.to_vec());
                        *found = true;
                    }
                }
            }
            Node::Container(_) => {
                if let Some(inner) = child.children_mut() {
                    set_dynamic_walk(inner, key, value, found);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calculated::Computed;
    use crate::condition::FieldEq;
    use crate::field::{ItemField, NumField, StaticField, TextField};

    fn static_node(value: &str) -> Node {
        StaticField::new(value).into()
    }

    #[test]
    fn duplicate_sibling_names_rejected() {
        let err = Template::new(
            "t",
            vec![
                Node::from(TextField::new("a").with_name("x")),
                Node::from(TextField::new("b").with_name("x")),
            ],
        );
        assert!(matches!(err, Err(ModelError::Configuration(_))));
    }

    #[test]
    fn unknown_target_rejected_at_build() {
        let err = Template::new(
            "t",
            vec![Node::from(Computed::size_bits("missing", 16))],
        );
        assert!(matches!(err, Err(ModelError::Dependency(_))));
    }

    #[test]
    fn ambiguous_name_rejected_at_build() {
        let err = Template::new(
            "t",
            vec![
                Node::from(Container::group(vec![static_node("a")]).with_name("g1")),
                Node::from(
                    Container::group(vec![static_node("b").clone_as("static0")])
                        .with_name("g2"),
                ),
                Node::from(Computed::size_bits("static0", 16)),
            ],
        );
        assert!(matches!(err, Err(ModelError::Dependency(_))));
    }

    #[test]
    fn path_reference_disambiguates() {
        let tpl = Template::new(
            "t",
            vec![
                Node::from(Container::group(vec![static_node("a")]).with_name("g1")),
                Node::from(Container::group(vec![static_node("bb")]).with_name("g2")),
                Node::from(Computed::size_bytes("g2/static0", 8).with_name("len")),
            ],
        )
        .unwrap();
        let out = tpl.render().unwrap().to_bytes();
        assert_eq!(out, b"abb\x02");
    }

    #[test]
    fn content_dependency_on_own_container_rejected() {
        let err = Template::new(
            "t",
            vec![
                static_node("payload"),
                Node::from(Computed::sha256("t").with_name("digest")),
            ],
        );
        assert!(matches!(err, Err(ModelError::Dependency(_))));
    }

    #[test]
    fn growing_content_cycle_fails_to_stabilize() {
        let tpl = Template::new(
            "t",
            vec![
                Node::from(
                    Computed::calc_bits("b", |bits| {
                        let mut out = bits.clone();
                        out.push_byte(0x01);
                        out
                    })
                    .with_name("a"),
                ),
                Node::from(
                    Computed::calc_bits("a", |bits| {
                        let mut out = bits.clone();
                        out.push_byte(0x02);
                        out
                    })
                    .with_name("b"),
                ),
            ],
        )
        .unwrap();
        assert!(matches!(tpl.render(), Err(ModelError::Dependency(_))));
    }

    #[test]
    fn mutation_walk_is_depth_first_and_exhausts() {
        let mut tpl = Template::new(
            "t",
            vec![
                Node::from(NumField::unsigned(1, 8).unwrap().with_name("n")),
                Node::from(TextField::new("xy").with_name("s")),
            ],
        )
        .unwrap();
        let expected = tpl.num_mutations();
        let mut produced = 0;
        while tpl.mutate() {
            produced += 1;
            assert!(produced <= expected);
        }
        assert_eq!(produced, expected);
        // exhausted template renders defaults again
        assert_eq!(tpl.render().unwrap().to_bytes(), b"\x01xy");
    }

    #[test]
    fn reset_rewinds_the_campaign() {
        let mut a = Template::new(
            "t",
            vec![Node::from(NumField::unsigned(7, 8).unwrap().with_name("n"))],
        )
        .unwrap();
        let mut b = Template::new(
            "t",
            vec![Node::from(NumField::unsigned(7, 8).unwrap().with_name("n"))],
        )
        .unwrap();

        a.mutate();
        a.mutate();
        a.reset();
        a.mutate();
        b.mutate();
        assert_eq!(a.render().unwrap(), b.render().unwrap());
    }

    #[test]
    fn campaigns_are_deterministic() {
        let build = || {
            Template::new(
                "t",
                vec![
                    Node::from(TextField::new("seed").with_name("s")),
                    Node::from(NumField::unsigned(3, 4).unwrap().with_name("n")),
                ],
            )
            .unwrap()
        };
        let mut a = build();
        let mut b = build();
        let outs_a: Vec<_> = a.mutations().collect::<Result<_>>().unwrap();
        let outs_b: Vec<_> = b.mutations().collect::<Result<_>>().unwrap();
        assert_eq!(outs_a, outs_b);
        assert_eq!(outs_a.len(), a.num_mutations());
    }

    #[test]
    fn dynamic_override_applies_and_unknown_key_errors() {
        let mut tpl = Template::new(
            "t",
            vec![Node::from(crate::field::DynamicField::new("greeting", "hi"))],
        )
        .unwrap();
        assert!(tpl.set_dynamic("nope", b"x").is_err());
        tpl.set_dynamic("greeting", b"yo").unwrap();
        assert_eq!(tpl.render().unwrap().to_bytes(), b"yo");
        tpl.reset();
        assert_eq!(tpl.render().unwrap().to_bytes(), b"hi");
    }

    #[test]
    fn repeat_from_field_value() {
        let tpl = Template::new(
            "t",
            vec![
                Node::from(NumField::unsigned(3, 8).unwrap().with_name("count")),
                Node::from(
                    Container::repeat_from(vec![static_node("ab")], "count").with_name("body"),
                ),
            ],
        )
        .unwrap();
        assert_eq!(tpl.render().unwrap().to_bytes(), b"\x03ababab");
    }

    #[test]
    fn element_count_and_index_of() {
        let tpl = Template::new(
            "t",
            vec![
                Node::from(
                    Container::one_of(vec![static_node("a"), static_node("b")])
                        .unwrap()
                        .with_name("choice"),
                ),
                Node::from(
                    Container::repeat(vec![static_node("x")], 4).with_name("xs"),
                ),
                Node::from(Computed::element_count("xs", 8).with_name("n")),
                Node::from(Computed::index_of("choice", 8).with_name("i")),
            ],
        )
        .unwrap();
        assert_eq!(tpl.render().unwrap().to_bytes(), b"axxxx\x04\x00");
    }

    #[test]
    fn index_of_requires_selector() {
        let err = Template::new(
            "t",
            vec![
                Node::from(Container::group(vec![static_node("a")]).with_name("g")),
                Node::from(Computed::index_of("g", 8)),
            ],
        );
        assert!(matches!(err, Err(ModelError::Configuration(_))));
    }

    #[test]
    fn meta_is_measurable_but_renders_nothing() {
        let tpl = Template::new(
            "t",
            vec![
                Node::from(Container::meta(vec![static_node("hidden")]).with_name("m")),
                Node::from(Computed::size_bytes("m/static0", 8).with_name("len")),
            ],
        )
        .unwrap();
        assert_eq!(tpl.render().unwrap().to_bytes(), b"\x06");
    }

    #[test]
    fn conditional_inclusion_tracks_current_values() {
        let tpl = Template::new(
            "t",
            vec![
                Node::from(NumField::unsigned(1, 8).unwrap().with_name("flag")),
                Node::from(Container::when(
                    FieldEq::new("flag", 1u32),
                    vec![static_node("yes")],
                )),
                Node::from(Container::unless(
                    FieldEq::new("flag", 1u32),
                    vec![static_node("no")],
                )),
            ],
        )
        .unwrap();
        assert_eq!(tpl.render().unwrap().to_bytes(), b"\x01yes");
    }

    #[test]
    fn for_each_binds_items() {
        let tpl = Template::new(
            "t",
            vec![Node::from(Container::for_each(
                vec![Value::from("a"), Value::from("bc")],
                vec![
                    Node::from(ItemField::new()),
                    static_node(","),
                ],
            ))],
        )
        .unwrap();
        assert_eq!(tpl.render().unwrap().to_bytes(), b"a,bc,");
    }

    #[test]
    fn trunc_cuts_the_tail() {
        let tpl = Template::new(
            "t",
            vec![Node::from(Container::trunc(
                vec![static_node("abcdef")],
                24,
            ))],
        )
        .unwrap();
        assert_eq!(tpl.render().unwrap().to_bytes(), b"abc");
    }

    #[test]
    fn pad_overflow_is_an_error() {
        let tpl = Template::new(
            "t",
            vec![Node::from(
                Container::pad(vec![static_node("toolong")], 16, b"\x00")
                    .unwrap()
                    .with_name("p"),
            )],
        )
        .unwrap();
        assert!(matches!(
            tpl.render(),
            Err(ModelError::Configuration(_))
        ));
    }
}
