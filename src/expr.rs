//! Call-Describing Expressions
//!
//! A small expression tree describing a call on a substitute, rooted at the
//! substitute target and optionally chained through intermediate members
//! (`x.Service.Lookup(5)`). This is the host-neutral form the extractor
//! consumes; it renders back to the text used in diagnostics.

use std::fmt;
use std::sync::Arc;

use crate::matcher::Matcher;
use crate::proxy::Proxy;
use crate::value::{Handler, Slot, Value};

type Reader = Arc<dyn Fn() -> Value + Send + Sync>;

/// One argument sub-expression
#[derive(Clone)]
pub enum Arg {
    Value(Value),
    /// Closed-over value, read once when the setup is created
    Capture { name: String, read: Reader },
    /// Closed-over value, read again on every match
    Lazy { name: String, read: Reader },
    /// Matcher-producing sub-call, kept symbolic
    Match(Matcher),
    /// By-reference cell, matched by identity
    Ref(Slot),
    /// Value written into the caller's out cell on every matching call
    Out(Value),
    /// Elements of a trailing parameter array
    Params(Vec<Arg>),
}

pub fn capture(name: &str, read: impl Fn() -> Value + Send + Sync + 'static) -> Arg {
    Arg::Capture {
        name: name.to_string(),
        read: Arc::new(read),
    }
}

pub fn lazy(name: &str, read: impl Fn() -> Value + Send + Sync + 'static) -> Arg {
    Arg::Lazy {
        name: name.to_string(),
        read: Arc::new(read),
    }
}

pub fn by_ref(slot: &Slot) -> Arg {
    Arg::Ref(slot.clone())
}

pub fn out(value: impl Into<Value>) -> Arg {
    Arg::Out(value.into())
}

pub fn params(elements: Vec<Arg>) -> Arg {
    Arg::Params(elements)
}

impl fmt::Display for Arg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arg::Value(v) => write!(f, "{}", v),
            Arg::Capture { read, .. } => write!(f, "{}", read()),
            Arg::Lazy { name, .. } => f.write_str(name),
            Arg::Match(m) => write!(f, "{}", m),
            Arg::Ref(slot) => write!(f, "{:?}", slot),
            Arg::Out(v) => write!(f, "out {}", v),
            Arg::Params(items) => f.write_str(&join(items)),
        }
    }
}

/// Conversion used by the [`args!`](crate::args) macro
pub trait IntoArg {
    fn into_arg(self) -> Arg;
}

macro_rules! value_args {
    ($($t:ty),*) => {
        $(impl IntoArg for $t {
            fn into_arg(self) -> Arg {
                Arg::Value(Value::from(self))
            }
        })*
    };
}

value_args!((), bool, i32, i64, u32, usize, f64, &str, String, Vec<Value>, Value, Proxy, Handler);

impl IntoArg for Matcher {
    fn into_arg(self) -> Arg {
        Arg::Match(self)
    }
}

impl IntoArg for Slot {
    fn into_arg(self) -> Arg {
        Arg::Ref(self)
    }
}

impl IntoArg for Arg {
    fn into_arg(self) -> Arg {
        self
    }
}

/// Build a `Vec<Arg>` from heterogeneous literals, matchers and captures
#[macro_export]
macro_rules! args {
    () => {
        ::std::vec::Vec::<$crate::expr::Arg>::new()
    };
    ($($arg:expr),+ $(,)?) => {
        vec![$($crate::expr::IntoArg::into_arg($arg)),+]
    };
}

#[derive(Clone)]
pub enum Expr {
    Target,
    Get {
        target: Box<Expr>,
        name: String,
    },
    Set {
        target: Box<Expr>,
        name: String,
        value: Arg,
    },
    Call {
        target: Box<Expr>,
        name: String,
        generics: Vec<String>,
        args: Vec<Arg>,
    },
    Index {
        target: Box<Expr>,
        indices: Vec<Arg>,
    },
    IndexSet {
        target: Box<Expr>,
        indices: Vec<Arg>,
        value: Arg,
    },
    Field {
        target: Box<Expr>,
        name: String,
    },
    Subscribe {
        target: Box<Expr>,
        event: String,
        handler: Arg,
    },
    Unsubscribe {
        target: Box<Expr>,
        event: String,
        handler: Arg,
    },
    /// A host node kind with no interception meaning (operators, casts, ...)
    Opaque(String),
}

impl Expr {
    pub fn target() -> Self {
        Expr::Target
    }

    pub fn get(self, name: &str) -> Self {
        Expr::Get {
            target: Box::new(self),
            name: name.to_string(),
        }
    }

    pub fn set(self, name: &str, value: impl IntoArg) -> Self {
        Expr::Set {
            target: Box::new(self),
            name: name.to_string(),
            value: value.into_arg(),
        }
    }

    pub fn call(self, name: &str, args: Vec<Arg>) -> Self {
        self.call_generic(name, &[], args)
    }

    pub fn call_generic(self, name: &str, generics: &[&str], args: Vec<Arg>) -> Self {
        Expr::Call {
            target: Box::new(self),
            name: name.to_string(),
            generics: generics.iter().map(|g| g.to_string()).collect(),
            args,
        }
    }

    pub fn index(self, indices: Vec<Arg>) -> Self {
        Expr::Index {
            target: Box::new(self),
            indices,
        }
    }

    pub fn index_set(self, indices: Vec<Arg>, value: impl IntoArg) -> Self {
        Expr::IndexSet {
            target: Box::new(self),
            indices,
            value: value.into_arg(),
        }
    }

    pub fn field(self, name: &str) -> Self {
        Expr::Field {
            target: Box::new(self),
            name: name.to_string(),
        }
    }

    pub fn subscribe(self, event: &str, handler: impl IntoArg) -> Self {
        Expr::Subscribe {
            target: Box::new(self),
            event: event.to_string(),
            handler: handler.into_arg(),
        }
    }

    pub fn unsubscribe(self, event: &str, handler: impl IntoArg) -> Self {
        Expr::Unsubscribe {
            target: Box::new(self),
            event: event.to_string(),
            handler: handler.into_arg(),
        }
    }

    pub fn opaque(text: &str) -> Self {
        Expr::Opaque(text.to_string())
    }

    /// The expression this node is applied to, if any
    pub fn inner(&self) -> Option<&Expr> {
        match self {
            Expr::Target | Expr::Opaque(_) => None,
            Expr::Get { target, .. }
            | Expr::Set { target, .. }
            | Expr::Call { target, .. }
            | Expr::Index { target, .. }
            | Expr::IndexSet { target, .. }
            | Expr::Field { target, .. }
            | Expr::Subscribe { target, .. }
            | Expr::Unsubscribe { target, .. } => Some(target),
        }
    }

    /// Full lambda-style rendering, e.g. `x => x.Foo(5)`
    pub fn render(&self) -> String {
        format!("x => {}", self)
    }
}

fn join(args: &[Arg]) -> String {
    args.iter().map(|a| a.to_string()).collect::<Vec<_>>().join(", ")
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Target => write!(f, "x"),
            Expr::Get { target, name } | Expr::Field { target, name } => write!(f, "{}.{}", target, name),
            Expr::Set { target, name, value } => write!(f, "{}.{} = {}", target, name, value),
            Expr::Call { target, name, generics, args } => {
                write!(f, "{}.{}", target, name)?;
                if !generics.is_empty() {
                    write!(f, "<{}>", generics.join(", "))?;
                }
                write!(f, "({})", join(args))
            }
            Expr::Index { target, indices } => write!(f, "{}[{}]", target, join(indices)),
            Expr::IndexSet { target, indices, value } => {
                write!(f, "{}[{}] = {}", target, join(indices), value)
            }
            Expr::Subscribe { target, event, handler } => write!(f, "{}.{} += {}", target, event, handler),
            Expr::Unsubscribe { target, event, handler } => write!(f, "{}.{} -= {}", target, event, handler),
            Expr::Opaque(text) => f.write_str(text),
        }
    }
}

impl fmt::Debug for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}
