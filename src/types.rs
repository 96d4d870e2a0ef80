use crate::environment::{Env, Formals};
use crate::evaluator::{EvalResult, Evaluator};
use std::fmt;
use std::rc::Rc;

/// A Scheme value. Expressions handed to the evaluator are values too:
/// combinations are proper lists built from [`Pair`]s.
#[derive(Debug, Clone)]
pub enum Value {
    Nil,       // The empty list '()
    Undefined, // Result of forms with no useful value, e.g. (display 1)
    Boolean(bool),
    Number(f64),
    Symbol(Rc<str>),
    String(Rc<str>),
    Pair(Rc<Pair>),
    Procedure(Procedure),
    Frame(Env), // Passed to builtins that ask for the calling environment
}

#[derive(Debug, Clone)]
pub struct Pair {
    pub first: Value,
    pub rest: Value,
}

impl PartialEq for Pair {
    fn eq(&self, other: &Self) -> bool {
        let (mut left, mut right) = (self, other);
        loop {
            if std::ptr::eq(left, right) {
                return true;
            }
            if left.first != right.first {
                return false;
            }
            match (&left.rest, &right.rest) {
                (Value::Pair(a), Value::Pair(b)) => {
                    left = &**a;
                    right = &**b;
                }
                (a, b) => return a == b,
            }
        }
    }
}

// Unlinks the spine of a list one pair at a time, so dropping a long list
// does not recurse once per element.
impl Drop for Pair {
    fn drop(&mut self) {
        let mut rest = std::mem::replace(&mut self.rest, Value::Nil);
        while let Value::Pair(pair) = rest {
            rest = match Rc::try_unwrap(pair) {
                Ok(mut pair) => std::mem::replace(&mut pair.rest, Value::Nil),
                Err(_) => Value::Nil,
            };
        }
    }
}

impl Value {
    pub fn symbol(name: &str) -> Value {
        Value::Symbol(Rc::from(name))
    }

    pub fn string(s: &str) -> Value {
        Value::String(Rc::from(s))
    }

    pub fn cons(first: Value, rest: Value) -> Value {
        Value::Pair(Rc::new(Pair { first, rest }))
    }

    /// Builds a proper list from `items`.
    pub fn list(items: impl IntoIterator<Item = Value, IntoIter: DoubleEndedIterator>) -> Value {
        Value::list_with_tail(items, Value::Nil)
    }

    /// Builds a list from `items` whose final `rest` is `tail`.
    pub fn list_with_tail(
        items: impl IntoIterator<Item = Value, IntoIter: DoubleEndedIterator>,
        tail: Value,
    ) -> Value {
        items
            .into_iter()
            .rev()
            .fold(tail, |rest, first| Value::cons(first, rest))
    }

    pub fn as_symbol(&self) -> Option<&str> {
        match self {
            Value::Symbol(name) => Some(name),
            _ => None,
        }
    }

    pub fn as_pair(&self) -> Option<&Pair> {
        match self {
            Value::Pair(pair) => Some(pair),
            _ => None,
        }
    }

    pub fn is_symbol(&self) -> bool {
        matches!(self, Value::Symbol(_))
    }

    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Boolean(false))
    }

    /// Atoms evaluate to themselves; everything but symbols and pairs.
    pub fn is_self_evaluating(&self) -> bool {
        !matches!(self, Value::Symbol(_) | Value::Pair(_))
    }

    /// True for `'()` and for pair chains terminated by `'()`.
    pub fn is_list(&self) -> bool {
        let mut current = self;
        loop {
            match current {
                Value::Nil => return true,
                Value::Pair(pair) => current = &pair.rest,
                _ => return false,
            }
        }
    }

    /// Iterates over the `first` slots of a pair chain. Stops silently at an
    /// improper tail, so callers that care must check [`Value::is_list`].
    pub fn iter(&self) -> ListIter<'_> {
        ListIter { current: self }
    }

    /// Collects a proper list into a vector, or `None` for improper chains.
    pub fn to_vec(&self) -> Option<Vec<Value>> {
        if self.is_list() {
            Some(self.iter().cloned().collect())
        } else {
            None
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Undefined => "undefined",
            Value::Boolean(_) => "boolean",
            Value::Number(_) => "number",
            Value::Symbol(_) => "symbol",
            Value::String(_) => "string",
            Value::Pair(_) => "pair",
            Value::Procedure(_) => "procedure",
            Value::Frame(_) => "environment",
        }
    }
}

pub struct ListIter<'a> {
    current: &'a Value,
}

impl<'a> Iterator for ListIter<'a> {
    type Item = &'a Value;

    fn next(&mut self) -> Option<Self::Item> {
        match self.current {
            Value::Pair(pair) => {
                self.current = &pair.rest;
                Some(&pair.first)
            }
            _ => None,
        }
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<Procedure> for Value {
    fn from(procedure: Procedure) -> Self {
        Value::Procedure(procedure)
    }
}

// Procedures and frames compare by identity, everything else structurally.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) | (Value::Undefined, Value::Undefined) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Symbol(a), Value::Symbol(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Pair(a), Value::Pair(b)) => a == b,
            (Value::Procedure(a), Value::Procedure(b)) => a == b,
            (Value::Frame(a), Value::Frame(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "()"),
            Value::Undefined => write!(f, "undefined"),
            Value::Boolean(b) => write!(f, "{}", if *b { "#t" } else { "#f" }),
            Value::Number(n) => write!(f, "{}", n),
            Value::Symbol(s) => write!(f, "{}", s),
            Value::String(s) => {
                write!(f, "\"")?;
                for c in s.chars() {
                    match c {
                        '"' => write!(f, "\\\"")?,
                        '\\' => write!(f, "\\\\")?,
                        '\n' => write!(f, "\\n")?,
                        '\r' => write!(f, "\\r")?,
                        '\t' => write!(f, "\\t")?,
                        c => write!(f, "{}", c)?,
                    }
                }
                write!(f, "\"")
            }
            Value::Pair(pair) => {
                write!(f, "({}", pair.first)?;
                let mut rest = &pair.rest;
                loop {
                    match rest {
                        Value::Nil => break,
                        Value::Pair(next) => {
                            write!(f, " {}", next.first)?;
                            rest = &next.rest;
                        }
                        tail => {
                            write!(f, " . {}", tail)?;
                            break;
                        }
                    }
                }
                write!(f, ")")
            }
            Value::Procedure(procedure) => write!(f, "{}", procedure),
            Value::Frame(_) => write!(f, "#[environment]"),
        }
    }
}

/// Native function behind a builtin. Receives the evaluated arguments, with
/// the calling environment appended as a `Value::Frame` when requested.
pub type BuiltinFunc = fn(&Evaluator, Vec<Value>) -> EvalResult;

/// Accepted argument counts for a builtin (including the environment argument).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Arity {
    Exact(usize),
    AtLeast(usize),
    Between(usize, usize),
}

impl Arity {
    pub fn accepts(self, count: usize) -> bool {
        match self {
            Arity::Exact(n) => count == n,
            Arity::AtLeast(n) => count >= n,
            Arity::Between(min, max) => (min..=max).contains(&count),
        }
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arity::Exact(n) => write!(f, "exactly {}", n),
            Arity::AtLeast(n) => write!(f, "at least {}", n),
            Arity::Between(min, max) => write!(f, "between {} and {}", min, max),
        }
    }
}

pub struct Builtin {
    pub name: &'static str,
    pub func: BuiltinFunc,
    pub arity: Arity,
    pub needs_env: bool,
}

/// Shared shape of lambda, mu and macro procedures.
pub struct Compound {
    pub formals: Formals,
    pub body: Value, // Non-empty list of expressions
}

pub struct Lambda {
    pub compound: Compound,
    pub env: Env, // Captured defining environment
}

/// The four callable shapes. Dispatch in the applier matches on this enum
/// exhaustively.
#[derive(Clone)]
pub enum Procedure {
    Builtin(Rc<Builtin>),
    Lambda(Rc<Lambda>),
    Mu(Rc<Compound>),
    Macro(Rc<Compound>),
}

impl Procedure {
    pub fn builtin(name: &'static str, func: BuiltinFunc, arity: Arity, needs_env: bool) -> Self {
        Procedure::Builtin(Rc::new(Builtin {
            name,
            func,
            arity,
            needs_env,
        }))
    }

    pub fn lambda(formals: Formals, body: Value, env: Env) -> Self {
        Procedure::Lambda(Rc::new(Lambda {
            compound: Compound { formals, body },
            env,
        }))
    }

    pub fn mu(formals: Formals, body: Value) -> Self {
        Procedure::Mu(Rc::new(Compound { formals, body }))
    }

    pub fn macro_(formals: Formals, body: Value) -> Self {
        Procedure::Macro(Rc::new(Compound { formals, body }))
    }
}

impl fmt::Display for Procedure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (keyword, compound) = match self {
            Procedure::Builtin(builtin) => return write!(f, "#[{}]", builtin.name),
            Procedure::Lambda(lambda) => ("lambda", &lambda.compound),
            Procedure::Mu(compound) => ("mu", &**compound),
            Procedure::Macro(compound) => ("macro", &**compound),
        };
        write!(f, "({} {}", keyword, compound.formals)?;
        for expr in compound.body.iter() {
            write!(f, " {}", expr)?;
        }
        write!(f, ")")
    }
}

impl fmt::Debug for Procedure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Procedure::Builtin(builtin) => write!(f, "Builtin({})", builtin.name),
            Procedure::Lambda(_) => write!(f, "Lambda({})", self),
            Procedure::Mu(_) => write!(f, "Mu({})", self),
            Procedure::Macro(_) => write!(f, "Macro({})", self),
        }
    }
}

// Function pointers and captured frames have no useful structural equality,
// so procedures are equal only when they are the same allocation.
impl PartialEq for Procedure {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Procedure::Builtin(a), Procedure::Builtin(b)) => Rc::ptr_eq(a, b),
            (Procedure::Lambda(a), Procedure::Lambda(b)) => Rc::ptr_eq(a, b),
            (Procedure::Mu(a), Procedure::Mu(b)) => Rc::ptr_eq(a, b),
            (Procedure::Macro(a), Procedure::Macro(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}
