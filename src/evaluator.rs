use crate::environment::{Env, EnvError, Environment};
use crate::special_forms::SpecialForms;
use crate::types::{Compound, Procedure, Value};
use thiserror::Error;
use tracing::{debug, trace};

// --- Evaluation Error ---
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    #[error(transparent)]
    Env(#[from] EnvError), // Errors from environment lookup
    #[error("malformed list: {0}")]
    Malformed(String),
    #[error("cannot call: {0}")]
    NotCallable(String),
    #[error("incorrect number of arguments to {procedure}: {message}")]
    Arity { procedure: String, message: String },
    #[error("invalid special form: {0}")]
    InvalidSpecialForm(String),
    #[error("{procedure}: expected {expected}, got {found}")]
    TypeMismatch {
        procedure: String,
        expected: &'static str,
        found: String,
    },
    #[error("division by zero")]
    DivisionByZero,
    #[error("{0}")]
    User(String),
}

// Result type alias for convenience
pub type EvalResult<T = Value> = Result<T, EvalError>;

// --- Tail Calls ---

/// An expression together with the environment it must still be evaluated in.
struct Unevaluated {
    expr: Value,
    env: Env,
}

enum Step {
    Done(Value),
    Pending(Unevaluated),
}

/// The result of an evaluation that may have been left pending in tail
/// position. Only the evaluator can look inside; everything else passes it
/// back up unchanged.
pub struct Outcome(Step);

impl From<Value> for Outcome {
    fn from(value: Value) -> Self {
        Outcome(Step::Done(value))
    }
}

impl Outcome {
    fn pending(expr: Value, env: Env) -> Self {
        Outcome(Step::Pending(Unevaluated { expr, env }))
    }
}

// --- Evaluator ---

/// Evaluates expressions against a fixed table of special forms.
pub struct Evaluator {
    forms: SpecialForms,
}

impl Default for Evaluator {
    fn default() -> Self {
        Evaluator::new()
    }
}

impl Evaluator {
    pub fn new() -> Self {
        Evaluator::with_forms(SpecialForms::standard())
    }

    pub fn with_forms(forms: SpecialForms) -> Self {
        Evaluator { forms }
    }

    pub fn special_forms(&self) -> &SpecialForms {
        &self.forms
    }

    /// Evaluates `expr` in `env` to a concrete value. Tail calls made during
    /// the evaluation run in constant native stack depth.
    pub fn eval(&self, expr: &Value, env: &Env) -> EvalResult {
        self.trampoline(expr.clone(), env.clone())
    }

    /// Evaluates `expr` in tail position. Combinations are not evaluated
    /// here: they come back pending and are resumed by the innermost
    /// enclosing [`Evaluator::eval`] loop.
    pub fn eval_tail(&self, expr: &Value, env: &Env) -> EvalResult<Outcome> {
        if expr.is_symbol() || expr.is_self_evaluating() {
            self.eval(expr, env).map(Outcome::from)
        } else {
            Ok(Outcome::pending(expr.clone(), env.clone()))
        }
    }

    /// Evaluates every expression of a non-empty body in order and returns
    /// the last one's outcome, which is left pending if it is a combination.
    pub fn eval_all(&self, expressions: &Value, env: &Env) -> EvalResult<Outcome> {
        let mut current = expressions;
        loop {
            match current {
                Value::Pair(pair) if matches!(pair.rest, Value::Nil) => {
                    return self.eval_tail(&pair.first, env);
                }
                Value::Pair(pair) => {
                    self.eval(&pair.first, env)?;
                    current = &pair.rest;
                }
                other => {
                    return Err(EvalError::Malformed(format!(
                        "expected a non-empty body, got {}",
                        other
                    )));
                }
            }
        }
    }

    /// Applies `procedure` to `args` from the caller's environment `env`.
    /// Builtins, lambdas and mus receive evaluated arguments; macros receive
    /// their raw operands. The outcome may be pending.
    pub fn apply(&self, procedure: &Value, args: Value, env: &Env) -> EvalResult<Outcome> {
        let procedure = match procedure {
            Value::Procedure(procedure) => procedure,
            other => return Err(EvalError::NotCallable(other.to_string())),
        };
        trace!(%procedure, "apply");
        match procedure {
            Procedure::Builtin(builtin) => {
                let mut positional = args
                    .to_vec()
                    .ok_or_else(|| EvalError::Malformed(args.to_string()))?;
                if builtin.needs_env {
                    positional.push(Value::Frame(env.clone()));
                }
                if !builtin.arity.accepts(positional.len()) {
                    return Err(EvalError::Arity {
                        procedure: builtin.name.to_string(),
                        message: format!("expected {}, got {}", builtin.arity, positional.len()),
                    });
                }
                (builtin.func)(self, positional).map(Outcome::from)
            }
            Procedure::Lambda(lambda) => {
                self.apply_compound(procedure, &lambda.compound, &args, &lambda.env)
            }
            Procedure::Mu(compound) | Procedure::Macro(compound) => {
                self.apply_compound(procedure, compound, &args, env)
            }
        }
    }

    /// Applies `procedure` and forces the result, for callers that need a
    /// concrete value.
    pub fn complete_apply(&self, procedure: &Value, args: Value, env: &Env) -> EvalResult {
        let outcome = self.apply(procedure, args, env)?;
        self.force(outcome)
    }

    fn apply_compound(
        &self,
        procedure: &Procedure,
        compound: &Compound,
        args: &Value,
        parent: &Env,
    ) -> EvalResult<Outcome> {
        let frame = Environment::make_child_frame(parent, &compound.formals, args).map_err(
            |err| match err {
                EnvError::ArityMismatch { expected, given, .. } => EvalError::Arity {
                    procedure: procedure.to_string(),
                    message: format!("expected {}, got {}", expected, given),
                },
                other => other.into(),
            },
        )?;
        self.eval_all(&compound.body, &frame)
    }

    fn force(&self, outcome: Outcome) -> EvalResult {
        match outcome.0 {
            Step::Done(value) => Ok(value),
            Step::Pending(Unevaluated { expr, env }) => self.trampoline(expr, env),
        }
    }

    /// Runs single evaluation steps until one produces a concrete value.
    /// This is the only place a pending outcome is resumed.
    fn trampoline(&self, mut expr: Value, mut env: Env) -> EvalResult {
        let mut bounces = 0usize;
        loop {
            match self.eval_step(&expr, &env)?.0 {
                Step::Done(value) => {
                    if bounces > 0 {
                        trace!(bounces, "tail calls resolved");
                    }
                    return Ok(value);
                }
                Step::Pending(next) => {
                    bounces += 1;
                    expr = next.expr;
                    env = next.env;
                }
            }
        }
    }

    /// One evaluation step. Anything in tail position below this point is
    /// returned pending instead of being evaluated recursively.
    fn eval_step(&self, expr: &Value, env: &Env) -> EvalResult<Outcome> {
        let pair = match expr {
            Value::Symbol(name) => return Ok(env.borrow().get(name)?.into()),
            Value::Pair(pair) => pair,
            atom => return Ok(atom.clone().into()),
        };
        if !expr.is_list() {
            return Err(EvalError::Malformed(expr.to_string()));
        }

        let operator = match &pair.first {
            Value::Symbol(name) => {
                if let Some(handler) = self.forms.get(name) {
                    return handler(self, &pair.rest, env);
                }
                let operator = env.borrow().get(name)?;
                if matches!(operator, Value::Procedure(Procedure::Macro(_))) {
                    let expansion = self.complete_apply(&operator, pair.rest.clone(), env)?;
                    debug!(macro_name = %name, %expansion, "macro expanded");
                    return Ok(Outcome::pending(expansion, env.clone()));
                }
                operator
            }
            other => self.eval(other, env)?,
        };

        let mut args = Vec::new();
        for operand in pair.rest.iter() {
            args.push(self.eval(operand, env)?);
        }
        self.apply(&operator, Value::list(args), env)
    }
}
