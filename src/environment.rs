use crate::primitives;
use crate::types::Value;
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::rc::Rc;
use thiserror::Error;

// --- Environment Error ---
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EnvError {
    #[error("Unbound variable: '{0}'")]
    UnboundVariable(String),
    #[error("expected {expected} argument(s) for formals {formals}, got {given}")]
    ArityMismatch {
        formals: String,
        expected: String,
        given: usize,
    },
}

/// Shared handle to a frame. Closures keep their defining frame alive, so
/// frames are reference counted rather than owned by the call that made them.
pub type Env = Rc<RefCell<Environment>>;

/// Marker separating required from optional parameters, as in `(a #!optional b)`.
pub const OPTIONAL_MARKER: &str = "#!optional";

// --- Formal Parameters ---

/// A parsed formal-parameter list: `(a b #!optional c . rest)`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Formals {
    pub required: Vec<Rc<str>>,
    pub optional: Vec<Rc<str>>,
    pub rest: Option<Rc<str>>,
}

impl Formals {
    /// Parses a formal-parameter expression. A bare symbol binds every
    /// argument as a list, like `(lambda args ...)`.
    pub fn parse(list: &Value) -> Result<Formals, String> {
        let mut formals = Formals::default();
        let mut seen_optional = false;
        let mut current = list;
        loop {
            match current {
                Value::Nil => break,
                Value::Symbol(name) => {
                    formals.check_unique(name)?;
                    formals.rest = Some(name.clone());
                    break;
                }
                Value::Pair(pair) => {
                    let name = match &pair.first {
                        Value::Symbol(name) => name,
                        other => return Err(format!("non-symbol parameter: {}", other)),
                    };
                    if &**name == OPTIONAL_MARKER {
                        if seen_optional {
                            return Err(format!("repeated {}", OPTIONAL_MARKER));
                        }
                        seen_optional = true;
                    } else {
                        formals.check_unique(name)?;
                        if seen_optional {
                            formals.optional.push(name.clone());
                        } else {
                            formals.required.push(name.clone());
                        }
                    }
                    current = &pair.rest;
                }
                other => return Err(format!("invalid parameter list tail: {}", other)),
            }
        }
        Ok(formals)
    }

    fn check_unique(&self, name: &str) -> Result<(), String> {
        let duplicate = self
            .required
            .iter()
            .chain(&self.optional)
            .chain(&self.rest)
            .any(|existing| &**existing == name);
        if duplicate {
            Err(format!("duplicate parameter: {}", name))
        } else {
            Ok(())
        }
    }

    fn expected(&self) -> String {
        let min = self.required.len();
        let max = min + self.optional.len();
        match (&self.rest, min == max) {
            (Some(_), _) => format!("at least {}", min),
            (None, true) => format!("exactly {}", min),
            (None, false) => format!("between {} and {}", min, max),
        }
    }

    /// Pairs every formal with its argument. Missing optionals are bound to
    /// `Undefined`; surplus arguments go to the rest parameter as a list.
    fn bind(&self, args: &Value) -> Result<HashMap<Rc<str>, Value>, EnvError> {
        let mismatch = |given| EnvError::ArityMismatch {
            formals: self.to_string(),
            expected: self.expected(),
            given,
        };
        let args = args
            .to_vec()
            .ok_or_else(|| mismatch(args.iter().count()))?;
        let given = args.len();
        let max = self.required.len() + self.optional.len();
        if given < self.required.len() || (self.rest.is_none() && given > max) {
            return Err(mismatch(given));
        }

        let mut bindings = HashMap::with_capacity(max + 1);
        let mut args = args.into_iter();
        for name in &self.required {
            // checked above
            if let Some(value) = args.next() {
                bindings.insert(name.clone(), value);
            }
        }
        for name in &self.optional {
            bindings.insert(name.clone(), args.next().unwrap_or(Value::Undefined));
        }
        if let Some(rest) = &self.rest {
            bindings.insert(rest.clone(), Value::list(args.collect::<Vec<_>>()));
        }
        Ok(bindings)
    }
}

impl fmt::Display for Formals {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.required.is_empty() && self.optional.is_empty() {
            if let Some(rest) = &self.rest {
                return write!(f, "{}", rest);
            }
        }
        let mut names: Vec<&str> = self.required.iter().map(|n| &**n).collect();
        if !self.optional.is_empty() {
            names.push(OPTIONAL_MARKER);
            names.extend(self.optional.iter().map(|n| &**n));
        }
        write!(f, "({}", names.join(" "))?;
        if let Some(rest) = &self.rest {
            write!(f, " . {}", rest)?;
        }
        write!(f, ")")
    }
}

// --- Environment Definition ---

pub struct Environment {
    outer: Option<Env>,
    bindings: HashMap<Rc<str>, Value>,
}

impl Environment {
    /// Creates a new, top-level (global) environment.
    pub fn new() -> Env {
        Rc::new(RefCell::new(Environment {
            outer: None,
            bindings: HashMap::new(),
        }))
    }

    /// Creates a global environment with the standard builtins installed.
    pub fn new_global_populated() -> Env {
        let env_ptr = Environment::new();
        primitives::install(&mut env_ptr.borrow_mut());
        env_ptr
    }

    /// Creates a new, empty environment enclosed within an outer one.
    pub fn new_enclosed(outer_env: Env) -> Env {
        Rc::new(RefCell::new(Environment {
            outer: Some(outer_env),
            bindings: HashMap::new(),
        }))
    }

    /// Creates the frame for a procedure call: binds `args` against
    /// `formals` in a new frame whose parent is `parent`. The frame is only
    /// shared once every formal is bound.
    pub fn make_child_frame(parent: &Env, formals: &Formals, args: &Value) -> Result<Env, EnvError> {
        let bindings = formals.bind(args)?;
        Ok(Rc::new(RefCell::new(Environment {
            outer: Some(parent.clone()),
            bindings,
        })))
    }

    /// Defines a variable in the *current* environment frame.
    /// Replaces the value if the variable already exists in this frame.
    pub fn define(&mut self, name: &str, value: Value) {
        self.bindings.insert(Rc::from(name), value);
    }

    /// Looks up a variable's value.
    /// Checks the current environment first, then walks up the outer environment chain.
    pub fn get(&self, name: &str) -> Result<Value, EnvError> {
        if let Some(value) = self.bindings.get(name) {
            return Ok(value.clone());
        }
        let mut outer = self.outer.clone();
        while let Some(env_ptr) = outer {
            let env = env_ptr.borrow();
            if let Some(value) = env.bindings.get(name) {
                return Ok(value.clone());
            }
            outer = env.outer.clone();
        }
        Err(EnvError::UnboundVariable(name.to_string()))
    }

    /// Sets the value of an *existing* variable in the environment chain.
    /// Searches outward from the current environment and updates the first frame
    /// where the variable is found. Errors if the variable is not defined.
    pub fn set(&mut self, name: &str, value: Value) -> Result<(), EnvError> {
        if let Some(slot) = self.bindings.get_mut(name) {
            *slot = value;
            return Ok(());
        }
        let mut outer = self.outer.clone();
        while let Some(env_ptr) = outer {
            let mut env = env_ptr.borrow_mut();
            if let Some(slot) = env.bindings.get_mut(name) {
                *slot = value;
                return Ok(());
            }
            outer = env.outer.clone();
        }
        Err(EnvError::UnboundVariable(name.to_string()))
    }

    pub fn is_global(&self) -> bool {
        self.outer.is_none()
    }

    /// Gets a list of all identifiers visible from the current environment
    pub fn get_identifiers(&self) -> HashSet<String> {
        let mut identifiers: HashSet<String> =
            self.bindings.keys().map(|i| i.to_string()).collect();
        let mut outer = self.outer.clone();
        while let Some(env_ptr) = outer {
            let env = env_ptr.borrow();
            identifiers.extend(env.bindings.keys().map(|i| i.to_string()));
            outer = env.outer.clone();
        }
        identifiers
    }
}

// Mu calls chain a frame per call, so a long chain is released iteratively
// rather than through recursive drop glue.
impl Drop for Environment {
    fn drop(&mut self) {
        let mut outer = self.outer.take();
        while let Some(env_ptr) = outer {
            outer = match Rc::try_unwrap(env_ptr) {
                Ok(cell) => cell.into_inner().outer.take(),
                Err(_) => None,
            };
        }
    }
}

// Frames can be reachable from their own bindings through closures, so only
// the names are shown.
impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.bindings.keys().map(|n| &**n).collect();
        names.sort_unstable();
        f.debug_struct("Environment")
            .field("bindings", &names)
            .field("global", &self.is_global())
            .finish()
    }
}
