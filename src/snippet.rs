//! Reusable GLSL fragments composed into shaders through hooks.
//!
//! Every snippet gets a process-unique id, and every symbol it declares
//! (globals and functions) is renamed `name_<id>` in its code, so the same
//! source can be included any number of times in one shader without
//! collisions. Declarations qualified `extern` are the exception: they name
//! a global of the host shader, are left unrenamed and are dropped from the
//! emitted code.
//!
//! Snippets compose two ways:
//!
//! - *call*: `a.call([&b])` makes `b`'s call the argument of `a`'s, so a hook
//!   bound to `a` becomes `fa_1(fb_2(args))`;
//! - *operators*: `&a + &b` (also `-`, `*`, `/`) produces a copy of `a`
//!   chained to `b`, calling as `fa_3(args) + fb_2(args)`; `&a & &b` chains
//!   `b`'s code in without calling it.
//!
//! A [`Snippet`] is a shared handle: cloning it aliases the same snippet,
//! [`Snippet::copy`] makes an independent one with a fresh id.

use std::cell::RefCell;
use std::collections::HashSet;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use crate::error::{Error, Result};
use crate::glsl::{self, Declaration, GlslType, Qualifier};
use crate::library::ShaderLibrary;
use crate::program::Program;
use crate::resource::GpuResource;
use crate::variable::{Uniform, UniformValue};

static NEXT_SNIPPET_ID: AtomicU64 = AtomicU64::new(1);

static IDENTIFIER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\.)?\b([A-Za-z_]\w*)\b(\s*\()?").expect("static identifier pattern")
});

static EXTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^[ \t]*extern\b[^;]*;[ \t]*\n?").expect("static extern pattern")
});

/// How a chained snippet joins the call of the one before it.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Operator {
    /// `a + b`.
    Add,
    /// `a - b`.
    Sub,
    /// `a * b`.
    Mul,
    /// `a / b`.
    Div,
    /// `a & b`: include `b`'s code, call only `a`.
    Join,
}

impl Operator {
    /// GLSL spelling of the operator.
    #[must_use]
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Join => "&",
        }
    }
}

/// One argument of a snippet call.
#[derive(Clone, Debug)]
pub enum Argument {
    /// Literal GLSL expression.
    Code(String),
    /// Another snippet's call.
    Snippet(Snippet),
}

impl From<&str> for Argument {
    fn from(code: &str) -> Self {
        Self::Code(code.to_owned())
    }
}

impl From<String> for Argument {
    fn from(code: String) -> Self {
        Self::Code(code)
    }
}

impl From<Snippet> for Argument {
    fn from(snippet: Snippet) -> Self {
        Self::Snippet(snippet)
    }
}

impl From<&Snippet> for Argument {
    fn from(snippet: &Snippet) -> Self {
        Self::Snippet(snippet.clone())
    }
}

struct Inner {
    id: u64,
    source: String,
    declarations: Vec<Declaration>,
    functions: Vec<String>,
    symbols: IndexMap<String, String>,
    default_call: Option<String>,
    args: Vec<Argument>,
    next: Option<(Operator, Snippet)>,
    values: IndexMap<String, UniformValue>,
    programs: Vec<u64>,
}

impl Inner {
    fn call_target(&self, function: Option<&str>) -> Option<&String> {
        let name = function
            .filter(|f| self.functions.iter().any(|n| n == f))
            .or(self.default_call.as_deref())
            .or_else(|| self.functions.first().map(String::as_str))?;
        self.symbols.get(name)
    }

    /// Bare uniform key (`name` or `name[i]`) matching `name` in either
    /// bare or mangled spelling, with its declared type.
    fn uniform_key(&self, name: &str) -> Option<(String, Option<GlslType>)> {
        self.declarations
            .iter()
            .filter(|d| d.qualifier == Qualifier::Uniform)
            .flat_map(|d| d.expand().into_iter().map(move |key| (d, key)))
            .find(|(_, key)| key == name || self.mangle_key(key) == name)
            .map(|(d, key)| (key, GlslType::parse(&d.type_name)))
    }

    fn mangle_key(&self, key: &str) -> String {
        let split = key.find('[').unwrap_or(key.len());
        let (base, suffix) = key.split_at(split);
        match self.symbols.get(base) {
            Some(mangled) => format!("{mangled}{suffix}"),
            None => key.to_owned(),
        }
    }
}

fn symbol_table(id: u64, declarations: &[Declaration], functions: &[String]) -> IndexMap<String, String> {
    declarations
        .iter()
        .filter(|d| d.qualifier != Qualifier::Extern)
        .map(|d| &d.name)
        .chain(functions)
        .map(|name| (name.clone(), format!("{name}_{id}")))
        .collect()
}

/// Concatenated code of `roots` and everything they depend on, each
/// snippet once, dependencies first.
pub(crate) fn code_of(roots: &[Snippet]) -> String {
    let mut seen = HashSet::new();
    let mut out = String::new();
    for root in roots {
        root.collect_code(&mut seen, &mut out);
    }
    out
}

/// A shared handle to a GLSL fragment.
#[derive(Clone)]
pub struct Snippet(Rc<RefCell<Inner>>);

impl Snippet {
    /// Parse a snippet. Its call target is its first function.
    ///
    /// # Errors
    ///
    /// [`Error::Parse`] for malformed declarations.
    pub fn new(source: impl Into<String>) -> Result<Self> {
        Self::build(source.into(), None)
    }

    /// Parse a snippet whose hooks call `function` by default.
    ///
    /// # Errors
    ///
    /// [`Error::Parse`] for malformed declarations,
    /// [`Error::UnknownSnippetKey`] when `function` is not defined.
    pub fn with_default(source: impl Into<String>, function: &str) -> Result<Self> {
        let snippet = Self::build(source.into(), Some(function.to_owned()))?;
        if !snippet.0.borrow().functions.iter().any(|f| f == function) {
            return Err(Error::UnknownSnippetKey(function.to_owned()));
        }
        Ok(snippet)
    }

    /// A snippet from code or a name resolved by `library`.
    ///
    /// # Errors
    ///
    /// As [`ShaderLibrary::get`] and [`Snippet::new`].
    pub fn from_library(name: &str, library: &ShaderLibrary) -> Result<Self> {
        Self::new(library.get(name)?)
    }

    fn build(source: String, default_call: Option<String>) -> Result<Self> {
        let declarations = glsl::declarations(&source)?;
        let mut functions: Vec<String> = Vec::new();
        for function in glsl::functions(&source) {
            if !functions.contains(&function.name) {
                functions.push(function.name);
            }
        }
        let id = NEXT_SNIPPET_ID.fetch_add(1, Ordering::Relaxed);
        let symbols = symbol_table(id, &declarations, &functions);
        Ok(Self(Rc::new(RefCell::new(Inner {
            id,
            source,
            declarations,
            functions,
            symbols,
            default_call,
            args: Vec::new(),
            next: None,
            values: IndexMap::new(),
            programs: Vec::new(),
        }))))
    }

    /// Process-unique id, the suffix of every mangled symbol.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.0.borrow().id
    }

    /// Source as given.
    #[must_use]
    pub fn source(&self) -> String {
        self.0.borrow().source.clone()
    }

    /// Defined function names.
    #[must_use]
    pub fn functions(&self) -> Vec<String> {
        self.0.borrow().functions.clone()
    }

    /// Declared name to mangled name.
    #[must_use]
    pub fn symbols(&self) -> IndexMap<String, String> {
        self.0.borrow().symbols.clone()
    }

    /// Mangled spelling of a declared name.
    #[must_use]
    pub fn mangled(&self, name: &str) -> Option<String> {
        self.0.borrow().symbols.get(name).cloned()
    }

    /// Current call arguments.
    #[must_use]
    pub fn args(&self) -> Vec<Argument> {
        self.0.borrow().args.clone()
    }

    /// The snippet chained after this one.
    #[must_use]
    pub fn next(&self) -> Option<(Operator, Snippet)> {
        self.0.borrow().next.clone()
    }

    /// End of the operator chain starting here.
    #[must_use]
    pub fn last(&self) -> Snippet {
        let mut current = self.clone();
        while let Some((_, next)) = current.next() {
            current = next;
        }
        current
    }

    /// This snippet and everything reachable through arguments and the
    /// chain, each once, in discovery order.
    #[must_use]
    pub fn snippets(&self) -> Vec<Snippet> {
        let mut out = Vec::new();
        self.collect(&mut out);
        out
    }

    fn collect(&self, out: &mut Vec<Snippet>) {
        if out.contains(self) {
            return;
        }
        out.push(self.clone());
        let (args, next) = {
            let inner = self.0.borrow();
            (inner.args.clone(), inner.next.clone())
        };
        for arg in &args {
            if let Argument::Snippet(s) = arg {
                s.collect(out);
            }
        }
        if let Some((_, next)) = next {
            next.collect(out);
        }
    }

    /// This snippet's source with its symbols mangled.
    #[must_use]
    pub fn mangled_code(&self) -> String {
        let inner = self.0.borrow();
        let renamed = IDENTIFIER.replace_all(&inner.source, |caps: &Captures<'_>| {
            if caps.get(1).is_some() {
                return caps[0].to_owned();
            }
            let name = &caps[2];
            let call = caps.get(3).map_or("", |m| m.as_str());
            let is_function = inner.functions.iter().any(|f| f == name);
            match inner.symbols.get(name) {
                Some(mangled) if !is_function || !call.is_empty() => format!("{mangled}{call}"),
                _ => caps[0].to_owned(),
            }
        });
        EXTERN.replace_all(&renamed, "").into_owned()
    }

    /// Mangled code of this snippet and all its dependencies.
    #[must_use]
    pub fn code(&self) -> String {
        code_of(std::slice::from_ref(self))
    }

    fn collect_code(&self, seen: &mut HashSet<u64>, out: &mut String) {
        if !seen.insert(self.id()) {
            return;
        }
        let (args, next) = {
            let inner = self.0.borrow();
            (inner.args.clone(), inner.next.clone())
        };
        for arg in &args {
            if let Argument::Snippet(s) = arg {
                s.collect_code(seen, out);
            }
        }
        let code = self.mangled_code();
        let code = code.trim();
        if !code.is_empty() {
            out.push_str(code);
            out.push('\n');
        }
        if let Some((_, next)) = next {
            next.collect_code(seen, out);
        }
    }

    /// The expression a hook bound to this snippet expands to.
    ///
    /// `function` picks the function to call when this snippet defines it;
    /// otherwise the default function, then the first one, is called.
    /// `arguments` are the hook's own arguments: they are used when the
    /// snippet has none of its own, always when `override_args` is set, and
    /// are passed down to argument snippets.
    #[must_use]
    pub fn mangled_call(
        &self,
        function: Option<&str>,
        arguments: Option<&str>,
        override_args: bool,
    ) -> String {
        let inner = self.0.borrow();
        let head = inner.call_target(function).map(|target| {
            let args = match (override_args, arguments) {
                (true, Some(args)) => args.to_owned(),
                _ if !inner.args.is_empty() => inner
                    .args
                    .iter()
                    .map(|arg| match arg {
                        Argument::Code(code) => code.clone(),
                        Argument::Snippet(s) => s.mangled_call(function, arguments, false),
                    })
                    .collect::<Vec<_>>()
                    .join(", "),
                _ => arguments.unwrap_or_default().to_owned(),
            };
            format!("{target}({args})")
        });
        match (head, &inner.next) {
            (head, None) => head.unwrap_or_default(),
            (None, Some((_, next))) => next.mangled_call(function, arguments, override_args),
            (Some(head), Some((Operator::Join, _))) => head,
            (Some(head), Some((op, next))) => format!(
                "{head} {} {}",
                op.symbol(),
                next.mangled_call(function, arguments, override_args)
            ),
        }
    }

    /// Replace the call arguments in place; returns `self` for chaining.
    ///
    /// # Errors
    ///
    /// [`Error::RecursiveComposition`] when an argument snippet reaches
    /// this snippet.
    pub fn call<I, A>(&self, args: I) -> Result<Snippet>
    where
        I: IntoIterator<Item = A>,
        A: Into<Argument>,
    {
        let args: Vec<Argument> = args.into_iter().map(Into::into).collect();
        for arg in &args {
            if let Argument::Snippet(s) = arg {
                if s.snippets().contains(self) {
                    return Err(Error::RecursiveComposition);
                }
            }
        }
        self.0.borrow_mut().args = args;
        Ok(self.clone())
    }

    /// An independent snippet with a fresh id and the same source, values
    /// and default call. The operator chain is always duplicated; argument
    /// snippets are duplicated only when `deep`.
    #[must_use]
    pub fn copy(&self, deep: bool) -> Snippet {
        let inner = self.0.borrow();
        let id = NEXT_SNIPPET_ID.fetch_add(1, Ordering::Relaxed);
        let args = inner
            .args
            .iter()
            .map(|arg| match arg {
                Argument::Snippet(s) if deep => Argument::Snippet(s.copy(true)),
                other => other.clone(),
            })
            .collect();
        Self(Rc::new(RefCell::new(Inner {
            id,
            source: inner.source.clone(),
            declarations: inner.declarations.clone(),
            functions: inner.functions.clone(),
            symbols: symbol_table(id, &inner.declarations, &inner.functions),
            default_call: inner.default_call.clone(),
            args,
            next: inner.next.as_ref().map(|(op, s)| (*op, s.copy(deep))),
            values: inner.values.clone(),
            programs: Vec::new(),
        })))
    }

    fn compose(&self, op: Operator, rhs: &Snippet) -> Snippet {
        let copy = self.copy(false);
        copy.last().0.borrow_mut().next = Some((op, rhs.clone()));
        copy
    }

    /// Set a uniform declared here or in any snippet reachable from here.
    /// `name` may be bare (`scale`) or mangled (`scale_4`).
    ///
    /// # Errors
    ///
    /// [`Error::UnknownSnippetKey`] when no reachable snippet declares it,
    /// [`Error::TypeMismatch`] when the value does not fit its type.
    pub fn set(&self, name: &str, value: impl Into<UniformValue>) -> Result<()> {
        let value = value.into();
        for snippet in self.snippets() {
            let found = snippet.0.borrow().uniform_key(name);
            if let Some((key, gtype)) = found {
                if let Some(gtype) = gtype {
                    Uniform::new(name, gtype).set(value.clone())?;
                }
                snippet.0.borrow_mut().values.insert(key, value);
                return Ok(());
            }
        }
        Err(Error::UnknownSnippetKey(name.to_owned()))
    }

    /// Value set for a uniform, looked up as in [`Snippet::set`].
    #[must_use]
    pub fn get(&self, name: &str) -> Option<UniformValue> {
        self.snippets().into_iter().find_map(|snippet| {
            let inner = snippet.0.borrow();
            let (key, _) = inner.uniform_key(name)?;
            inner.values.get(&key).cloned()
        })
    }

    /// Every value set on this snippet and its dependencies, keyed by
    /// mangled name.
    #[must_use]
    pub fn uniform_values(&self) -> Vec<(String, UniformValue)> {
        self.snippets()
            .iter()
            .flat_map(|snippet| {
                let inner = snippet.0.borrow();
                inner
                    .values
                    .iter()
                    .map(|(key, value)| (inner.mangle_key(key), value.clone()))
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    /// Whether this snippet or a dependency declares the uniform spelled
    /// `mangled` after mangling.
    #[must_use]
    pub fn owns(&self, mangled: &str) -> bool {
        self.snippets().iter().any(|s| {
            let inner = s.0.borrow();
            inner
                .declarations
                .iter()
                .filter(|d| d.qualifier == Qualifier::Uniform)
                .flat_map(Declaration::expand)
                .any(|key| inner.mangle_key(&key) == mangled)
        })
    }

    /// Register this snippet and its dependencies with `program` and let it
    /// rebuild its tables.
    ///
    /// # Errors
    ///
    /// Whatever the program's rebuild returns.
    pub fn attach(&self, program: &mut Program) -> Result<()> {
        let id = program.id();
        for snippet in self.snippets() {
            let mut inner = snippet.0.borrow_mut();
            if !inner.programs.contains(&id) {
                inner.programs.push(id);
            }
        }
        program.attach_snippet(self)
    }

    /// Undo [`Snippet::attach`].
    ///
    /// # Errors
    ///
    /// Whatever the program's rebuild returns.
    pub fn detach(&self, program: &mut Program) -> Result<()> {
        let id = program.id();
        for snippet in self.snippets() {
            snippet.0.borrow_mut().programs.retain(|&p| p != id);
        }
        program.detach_snippet(self)
    }

    /// Ids of the programs this snippet is attached to.
    #[must_use]
    pub fn programs(&self) -> Vec<u64> {
        self.0.borrow().programs.clone()
    }
}

impl PartialEq for Snippet {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Snippet {}

impl fmt::Debug for Snippet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.0.borrow();
        f.debug_struct("Snippet")
            .field("id", &inner.id)
            .field("functions", &inner.functions)
            .field("args", &inner.args.len())
            .field("next", &inner.next.as_ref().map(|(op, s)| (op.symbol(), s.id())))
            .finish_non_exhaustive()
    }
}

macro_rules! composition {
    ($($trait:ident :: $method:ident => $op:ident),* $(,)?) => {
        $(
            impl std::ops::$trait<&Snippet> for &Snippet {
                type Output = Snippet;

                fn $method(self, rhs: &Snippet) -> Snippet {
                    self.compose(Operator::$op, rhs)
                }
            }

            impl std::ops::$trait for Snippet {
                type Output = Snippet;

                fn $method(self, rhs: Snippet) -> Snippet {
                    self.compose(Operator::$op, &rhs)
                }
            }
        )*
    };
}

composition! {
    Add::add => Add,
    Sub::sub => Sub,
    Mul::mul => Mul,
    Div::div => Div,
    BitAnd::bitand => Join,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::library::{SCALE_SRC, TRANSLATE_SRC};

    fn twice() -> Snippet {
        Snippet::new("float twice(float x) { return 2.0 * x; }").unwrap()
    }

    fn offset() -> Snippet {
        Snippet::new("uniform float bias;\nfloat offset(float x) { return x + bias; }").unwrap()
    }

    #[test]
    fn symbols_are_mangled_per_instance() {
        let a = Snippet::new(TRANSLATE_SRC).unwrap();
        let b = Snippet::new(TRANSLATE_SRC).unwrap();
        assert_ne!(a.id(), b.id());
        let a_names: HashSet<_> = a.symbols().into_values().collect();
        let b_names: HashSet<_> = b.symbols().into_values().collect();
        assert!(a_names.is_disjoint(&b_names));

        let code = a.mangled_code();
        let id = a.id();
        assert!(code.contains(&format!("uniform vec2 translate_{id};")));
        assert!(code.contains(&format!("vec2 forward_{id}(vec2 position)")));
        assert!(code.contains(&format!("return position + translate_{id};")));
    }

    #[test]
    fn member_access_and_bare_function_names_are_left_alone() {
        let s = Snippet::new(
            "uniform vec4 tint;\nvec4 shade(vec4 c) { float shade = c.a; return tint.rgba * shade; }",
        )
        .unwrap();
        let id = s.id();
        let code = s.mangled_code();
        assert!(code.contains(&format!("vec4 shade_{id}(vec4 c)")));
        assert!(code.contains("float shade = c.a;"));
        assert!(code.contains(&format!("tint_{id}.rgba")));
    }

    #[test]
    fn externs_are_neither_mangled_nor_emitted() {
        let s = Snippet::new("extern vec3 light;\nfloat lit(vec3 n) { return dot(n, light); }").unwrap();
        assert_eq!(s.mangled("light"), None);
        let code = s.mangled_code();
        assert!(!code.contains("extern"));
        assert!(code.contains("dot(n, light)"));
    }

    #[test]
    fn calls_nest_and_dependencies_come_first() {
        let outer = twice();
        let inner = offset();
        outer.call([&inner]).unwrap();
        assert_eq!(
            outer.mangled_call(None, Some("v"), false),
            format!("twice_{}(offset_{}(v))", outer.id(), inner.id())
        );
        let code = outer.code();
        let inner_at = code.find(&format!("offset_{}", inner.id())).unwrap();
        let outer_at = code.find(&format!("twice_{}", outer.id())).unwrap();
        assert!(inner_at < outer_at);
    }

    #[test]
    fn shared_dependencies_are_emitted_once() {
        let sum = Snippet::new("float sum(float a, float b) { return a + b; }").unwrap();
        let inner = offset();
        sum.call([&inner, &inner]).unwrap();
        let code = sum.code();
        assert_eq!(code.matches("uniform float bias_").count(), 1);
        assert_eq!(
            sum.mangled_call(None, Some("x"), false),
            format!("sum_{0}(offset_{1}(x), offset_{1}(x))", sum.id(), inner.id())
        );
    }

    #[test]
    fn code_arguments_and_override() {
        let s = twice();
        s.call(["t"]).unwrap();
        assert_eq!(s.mangled_call(None, Some("v"), false), format!("twice_{}(t)", s.id()));
        assert_eq!(s.mangled_call(None, Some("v"), true), format!("twice_{}(v)", s.id()));
        let bare = twice();
        assert_eq!(bare.mangled_call(None, None, false), format!("twice_{}()", bare.id()));
    }

    #[test]
    fn mutual_composition_is_rejected() {
        let a = twice();
        let b = offset();
        a.call([&b]).unwrap();
        assert!(matches!(b.call([&a]), Err(Error::RecursiveComposition)));
        assert!(matches!(a.call([&a]), Err(Error::RecursiveComposition)));
        assert!(b.args().is_empty());
    }

    #[test]
    fn operators_chain_copies() {
        let translate = Snippet::new(TRANSLATE_SRC).unwrap();
        let scale = Snippet::new(SCALE_SRC).unwrap();
        let sum = &translate + &scale;
        assert_ne!(sum.id(), translate.id());
        assert!(translate.next().is_none());
        assert_eq!(sum.last(), scale);
        assert_eq!(
            sum.mangled_call(Some("inverse"), Some("p"), false),
            format!("inverse_{}(p) + inverse_{}(p)", sum.id(), scale.id())
        );

        let joined = &translate & &scale;
        assert_eq!(
            joined.mangled_call(None, Some("p"), false),
            format!("forward_{}(p)", joined.id())
        );
        assert!(joined.code().contains(&format!("forward_{}", scale.id())));
    }

    #[test]
    fn chains_append_to_the_tail() {
        let a = twice();
        let b = offset();
        let c = twice();
        let chain = (&a * &b) - c.clone();
        let ops: Vec<_> = std::iter::successors(chain.next(), |(_, s)| s.next())
            .map(|(op, _)| op)
            .collect();
        assert_eq!(ops, [Operator::Mul, Operator::Sub]);
        assert_eq!(chain.last(), c);
        assert_eq!(chain.snippets().len(), 3);
    }

    #[test]
    fn declaration_only_snippets_delegate_their_call() {
        let constants = Snippet::new("const float PI = 3.14159;").unwrap();
        let chained = &constants & &twice();
        let call = chained.mangled_call(None, Some("x"), false);
        assert!(call.starts_with("twice_") && call.ends_with("(x)"));
        assert!(chained.code().contains(&format!("PI_{}", chained.id())));
    }

    #[test]
    fn default_call_selection() {
        let s = Snippet::with_default(TRANSLATE_SRC, "inverse").unwrap();
        let id = s.id();
        assert_eq!(s.mangled_call(None, Some("p"), false), format!("inverse_{id}(p)"));
        assert_eq!(
            s.mangled_call(Some("forward"), Some("p"), false),
            format!("forward_{id}(p)")
        );
        assert_eq!(
            s.mangled_call(Some("missing"), Some("p"), false),
            format!("inverse_{id}(p)")
        );
        assert!(matches!(
            Snippet::with_default(TRANSLATE_SRC, "missing"),
            Err(Error::UnknownSnippetKey(_))
        ));
    }

    #[test]
    fn copies() {
        let outer = twice();
        let inner = offset();
        outer.call([&inner]).unwrap();
        outer.set("bias", 0.5_f32).unwrap();

        let shallow = outer.copy(false).args();
        let Argument::Snippet(shared) = &shallow[0] else {
            panic!("expected a snippet argument");
        };
        assert_eq!(*shared, inner);

        let deep = outer.copy(true).args();
        let Argument::Snippet(fresh) = &deep[0] else {
            panic!("expected a snippet argument");
        };
        assert_ne!(*fresh, inner);
        assert_eq!(fresh.get("bias"), Some(UniformValue::from(0.5_f32)));
    }

    #[test]
    fn uniforms_are_found_through_dependencies() {
        let outer = twice();
        let inner = offset();
        outer.call([&inner]).unwrap();
        outer.set("bias", 1.5_f32).unwrap();
        assert_eq!(inner.get("bias"), Some(UniformValue::from(1.5_f32)));

        let mangled = format!("bias_{}", inner.id());
        outer.set(&mangled, 2.5_f32).unwrap();
        assert_eq!(
            outer.uniform_values(),
            [(mangled.clone(), UniformValue::from(2.5_f32))]
        );
        assert!(outer.owns(&mangled));
        assert!(!outer.owns("bias"));

        assert!(matches!(outer.set("gain", 1.0_f32), Err(Error::UnknownSnippetKey(_))));
        assert!(matches!(
            outer.set("bias", [1.0_f32, 2.0]),
            Err(Error::TypeMismatch { .. })
        ));
    }

    #[test]
    fn clones_alias() {
        let a = offset();
        let alias = a.clone();
        alias.set("bias", 3.0_f32).unwrap();
        assert_eq!(a.get("bias"), Some(UniformValue::from(3.0_f32)));
        assert_eq!(a, alias);
    }
}
