use crate::environment::{Env, Environment, Formals};
use crate::evaluator::{EvalError, EvalResult, Evaluator, Outcome};
use crate::types::{Procedure, Value};
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Handler for a special form. Receives the unevaluated operands and the
/// current environment; expressions in tail position should go through
/// [`Evaluator::eval_tail`] or [`Evaluator::eval_all`].
pub type SpecialForm = fn(&Evaluator, &Value, &Env) -> EvalResult<Outcome>;

/// Table of reserved leading symbols, fixed once the evaluator is built.
pub struct SpecialForms {
    table: HashMap<&'static str, SpecialForm>,
}

impl SpecialForms {
    pub fn empty() -> Self {
        SpecialForms {
            table: HashMap::new(),
        }
    }

    pub fn standard() -> Self {
        let mut forms = SpecialForms::empty();
        forms.register("and", eval_and);
        forms.register("begin", eval_begin);
        forms.register("cond", eval_cond);
        forms.register("define", eval_define);
        forms.register("define-macro", eval_define_macro);
        forms.register("if", eval_if);
        forms.register("lambda", eval_lambda);
        forms.register("let", eval_let);
        forms.register("mu", eval_mu);
        forms.register("or", eval_or);
        forms.register("quasiquote", eval_quasiquote);
        forms.register("quote", eval_quote);
        forms.register("set!", eval_set);
        forms.register("unquote", eval_unquote);
        forms.register("unquote-splicing", eval_unquote);
        forms
    }

    pub fn register(&mut self, name: &'static str, handler: SpecialForm) {
        self.table.insert(name, handler);
    }

    pub fn get(&self, name: &str) -> Option<SpecialForm> {
        self.table.get(name).copied()
    }

    pub fn names(&self) -> HashSet<String> {
        self.table.keys().map(|name| name.to_string()).collect()
    }
}

// --- Operand helpers ---

fn invalid(form: &str, message: impl std::fmt::Display) -> EvalError {
    EvalError::InvalidSpecialForm(format!("{}: {}", form, message))
}

/// Checks that `operands` is a proper list with an acceptable length.
fn expect_operands(
    form: &str,
    operands: &Value,
    min: usize,
    max: Option<usize>,
) -> EvalResult<Vec<Value>> {
    let items = operands
        .to_vec()
        .ok_or_else(|| invalid(form, format!("badly formed expression: {}", operands)))?;
    if items.len() < min {
        return Err(invalid(form, format!("too few operands in form: {}", operands)));
    }
    if max.is_some_and(|max| items.len() > max) {
        return Err(invalid(form, format!("too many operands in form: {}", operands)));
    }
    Ok(items)
}

/// Splits `(formals body...)` into parsed formals and a non-empty body.
fn compound_parts(form: &str, operands: &Value) -> EvalResult<(Formals, Value)> {
    expect_operands(form, operands, 2, None)?;
    let pair = operands.as_pair().ok_or_else(|| invalid(form, "missing formals"))?;
    let formals = Formals::parse(&pair.first).map_err(|message| invalid(form, message))?;
    Ok((formals, pair.rest.clone()))
}

// --- Binding forms ---

fn eval_define(evaluator: &Evaluator, operands: &Value, env: &Env) -> EvalResult<Outcome> {
    let items = expect_operands("define", operands, 2, None)?;
    match &items[0] {
        Value::Symbol(name) => {
            if items.len() != 2 {
                return Err(invalid("define", format!("too many operands in form: {}", operands)));
            }
            let value = evaluator.eval(&items[1], env)?;
            debug!(%name, %value, "define");
            env.borrow_mut().define(name, value);
            Ok(Value::Symbol(name.clone()).into())
        }
        Value::Pair(signature) => {
            let name = signature
                .first
                .as_symbol()
                .ok_or_else(|| invalid("define", format!("non-symbol: {}", signature.first)))?;
            let formals = Formals::parse(&signature.rest).map_err(|m| invalid("define", m))?;
            let body = operands.as_pair().map(|pair| pair.rest.clone()).unwrap_or(Value::Nil);
            let procedure = Procedure::lambda(formals, body, env.clone());
            debug!(%name, "define procedure");
            env.borrow_mut().define(name, procedure.into());
            Ok(Value::symbol(name).into())
        }
        other => Err(invalid("define", format!("non-symbol: {}", other))),
    }
}

fn eval_define_macro(_: &Evaluator, operands: &Value, env: &Env) -> EvalResult<Outcome> {
    let items = expect_operands("define-macro", operands, 2, None)?;
    let signature = items[0].as_pair().ok_or_else(|| {
        invalid("define-macro", format!("improper form for define-macro: {}", operands))
    })?;
    let name = signature
        .first
        .as_symbol()
        .ok_or_else(|| invalid("define-macro", format!("non-symbol: {}", signature.first)))?;
    let formals = Formals::parse(&signature.rest).map_err(|m| invalid("define-macro", m))?;
    let body = operands.as_pair().map(|pair| pair.rest.clone()).unwrap_or(Value::Nil);
    debug!(%name, "define macro");
    env.borrow_mut()
        .define(name, Procedure::macro_(formals, body).into());
    Ok(Value::symbol(name).into())
}

fn eval_set(evaluator: &Evaluator, operands: &Value, env: &Env) -> EvalResult<Outcome> {
    let items = expect_operands("set!", operands, 2, Some(2))?;
    let name = items[0]
        .as_symbol()
        .ok_or_else(|| invalid("set!", format!("non-symbol: {}", items[0])))?;
    let value = evaluator.eval(&items[1], env)?;
    env.borrow_mut().set(name, value)?;
    Ok(Value::Undefined.into())
}

fn eval_let(evaluator: &Evaluator, operands: &Value, env: &Env) -> EvalResult<Outcome> {
    expect_operands("let", operands, 2, None)?;
    let pair = operands.as_pair().ok_or_else(|| invalid("let", "missing bindings"))?;
    let bindings = pair
        .first
        .to_vec()
        .ok_or_else(|| invalid("let", format!("bad bindings list: {}", pair.first)))?;

    let mut names = Vec::with_capacity(bindings.len());
    let mut values = Vec::with_capacity(bindings.len());
    for binding in &bindings {
        let parts = expect_operands("let", binding, 2, Some(2))?;
        if !parts[0].is_symbol() {
            return Err(invalid("let", format!("non-symbol: {}", parts[0])));
        }
        names.push(parts[0].clone());
        values.push(evaluator.eval(&parts[1], env)?);
    }
    let formals = Formals::parse(&Value::list(names)).map_err(|m| invalid("let", m))?;
    let frame = Environment::make_child_frame(env, &formals, &Value::list(values))?;
    evaluator.eval_all(&pair.rest, &frame)
}

// --- Procedure constructors ---

fn eval_lambda(_: &Evaluator, operands: &Value, env: &Env) -> EvalResult<Outcome> {
    let (formals, body) = compound_parts("lambda", operands)?;
    Ok(Value::from(Procedure::lambda(formals, body, env.clone())).into())
}

fn eval_mu(_: &Evaluator, operands: &Value, _: &Env) -> EvalResult<Outcome> {
    let (formals, body) = compound_parts("mu", operands)?;
    Ok(Value::from(Procedure::mu(formals, body)).into())
}

// --- Control flow ---

fn eval_if(evaluator: &Evaluator, operands: &Value, env: &Env) -> EvalResult<Outcome> {
    let items = expect_operands("if", operands, 2, Some(3))?;
    if evaluator.eval(&items[0], env)?.is_truthy() {
        evaluator.eval_tail(&items[1], env)
    } else if let Some(alternate) = items.get(2) {
        evaluator.eval_tail(alternate, env)
    } else {
        Ok(Value::Undefined.into())
    }
}

fn eval_cond(evaluator: &Evaluator, operands: &Value, env: &Env) -> EvalResult<Outcome> {
    let clauses = expect_operands("cond", operands, 0, None)?;
    let last = clauses.len().saturating_sub(1);
    for (index, clause) in clauses.iter().enumerate() {
        expect_operands("cond", clause, 1, None)?;
        let clause = clause.as_pair().ok_or_else(|| invalid("cond", "empty clause"))?;
        let test = if clause.first.as_symbol() == Some("else") {
            if index != last {
                return Err(invalid("cond", "else must be last"));
            }
            Value::Boolean(true)
        } else {
            evaluator.eval(&clause.first, env)?
        };
        if test.is_truthy() {
            return match clause.rest {
                Value::Nil => Ok(test.into()),
                ref body => evaluator.eval_all(body, env),
            };
        }
    }
    Ok(Value::Undefined.into())
}

fn eval_and(evaluator: &Evaluator, operands: &Value, env: &Env) -> EvalResult<Outcome> {
    let items = expect_operands("and", operands, 0, None)?;
    let Some((last, init)) = items.split_last() else {
        return Ok(Value::Boolean(true).into());
    };
    for expr in init {
        let value = evaluator.eval(expr, env)?;
        if !value.is_truthy() {
            return Ok(value.into());
        }
    }
    evaluator.eval_tail(last, env)
}

fn eval_or(evaluator: &Evaluator, operands: &Value, env: &Env) -> EvalResult<Outcome> {
    let items = expect_operands("or", operands, 0, None)?;
    let Some((last, init)) = items.split_last() else {
        return Ok(Value::Boolean(false).into());
    };
    for expr in init {
        let value = evaluator.eval(expr, env)?;
        if value.is_truthy() {
            return Ok(value.into());
        }
    }
    evaluator.eval_tail(last, env)
}

fn eval_begin(evaluator: &Evaluator, operands: &Value, env: &Env) -> EvalResult<Outcome> {
    expect_operands("begin", operands, 1, None)?;
    evaluator.eval_all(operands, env)
}

// --- Quoting ---

fn eval_quote(_: &Evaluator, operands: &Value, _: &Env) -> EvalResult<Outcome> {
    let items = expect_operands("quote", operands, 1, Some(1))?;
    Ok(items[0].clone().into())
}

fn eval_quasiquote(evaluator: &Evaluator, operands: &Value, env: &Env) -> EvalResult<Outcome> {
    let items = expect_operands("quasiquote", operands, 1, Some(1))?;
    quasiquote_item(evaluator, &items[0], env, 1).map(Outcome::from)
}

fn eval_unquote(_: &Evaluator, _: &Value, _: &Env) -> EvalResult<Outcome> {
    Err(invalid("unquote", "unquote outside of quasiquote"))
}

/// Rebuilds a quasiquoted template, evaluating unquoted parts at `level` 1.
fn quasiquote_item(evaluator: &Evaluator, value: &Value, env: &Env, level: usize) -> EvalResult {
    let pair = match value {
        Value::Pair(pair) => pair,
        other => return Ok(other.clone()),
    };
    let mut level = level;
    match pair.first.as_symbol() {
        Some("unquote") => {
            level -= 1;
            if level == 0 {
                let items = expect_operands("unquote", &pair.rest, 1, Some(1))?;
                return evaluator.eval(&items[0], env);
            }
        }
        Some("quasiquote") => level += 1,
        _ => {}
    }

    if level == 1 {
        if let Some(spliced) = pair.first.as_pair() {
            if spliced.first.as_symbol() == Some("unquote-splicing") {
                let items = expect_operands("unquote-splicing", &spliced.rest, 1, Some(1))?;
                let value = evaluator.eval(&items[0], env)?;
                let elements = value.to_vec().ok_or_else(|| EvalError::TypeMismatch {
                    procedure: "unquote-splicing".to_string(),
                    expected: "list",
                    found: value.to_string(),
                })?;
                let rest = quasiquote_item(evaluator, &pair.rest, env, level)?;
                return Ok(Value::list_with_tail(elements, rest));
            }
        }
    }

    Ok(Value::cons(
        quasiquote_item(evaluator, &pair.first, env, level)?,
        quasiquote_item(evaluator, &pair.rest, env, level)?,
    ))
}

// --- Unit Tests ---
#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_program;

    fn run(input: &str) -> EvalResult {
        let evaluator = Evaluator::new();
        let env = Environment::new_global_populated();
        let mut result = Value::Undefined;
        for expr in parse_program(input).expect("parse failed") {
            result = evaluator.eval(&expr, &env)?;
        }
        Ok(result)
    }

    fn assert_eval(input: &str, expected: &str) {
        match run(input) {
            Ok(result) => assert_eq!(result.to_string(), expected, "Input: '{}'", input),
            Err(e) => panic!("Evaluation failed for input '{}': {}", input, e),
        }
    }

    fn assert_invalid_form(input: &str) {
        match run(input) {
            Err(EvalError::InvalidSpecialForm(_)) => {}
            other => panic!("Expected invalid special form for '{}', got {:?}", input, other),
        }
    }

    #[test]
    fn test_quote() {
        assert_eval("'a", "a");
        assert_eval("'(1 2)", "(1 2)");
        assert_eval("(quote ())", "()");
        assert_invalid_form("(quote a b)");
        assert_invalid_form("(quote)");
    }

    #[test]
    fn test_define_returns_name() {
        assert_eval("(define x 10)", "x");
        assert_eval("(define (f) 1)", "f");
        assert_eval("(define x 10) (define y (+ x 1)) y", "11");
        assert_invalid_form("(define 1 2)");
        assert_invalid_form("(define x 1 2)");
        assert_invalid_form("(define (f x x) x)");
    }

    #[test]
    fn test_set() {
        assert_eval("(define x 1) (set! x 2) x", "2");
        assert!(matches!(
            run("(set! nope 1)"),
            Err(EvalError::Env(crate::environment::EnvError::UnboundVariable(_)))
        ));
    }

    #[test]
    fn test_if() {
        assert_eval("(if #t 1 2)", "1");
        assert_eval("(if 0 1 2)", "1");
        assert_eval("(if '() 1 2)", "1");
        assert_eval("(if #f 1 2)", "2");
        assert_eval("(if #f 1)", "undefined");
        assert_eval("(if #t 'good unbound-variable)", "good");
        assert_invalid_form("(if)");
        assert_invalid_form("(if #t)");
        assert_invalid_form("(if #t 1 2 3)");
    }

    #[test]
    fn test_cond() {
        assert_eval("(cond ((= 1 2) 'a) ((= 1 1) 'b) (else 'c))", "b");
        assert_eval("(cond (#f 1) (else 2 3))", "3");
        assert_eval("(cond ((+ 1 1)))", "2");
        assert_eval("(cond (#f 1))", "undefined");
        assert_invalid_form("(cond (else 1) (#t 2))");
    }

    #[test]
    fn test_and_or() {
        assert_eval("(and)", "#t");
        assert_eval("(and 1 2 3)", "3");
        assert_eval("(and 1 #f (undefined-name))", "#f");
        assert_eval("(or)", "#f");
        assert_eval("(or #f 2 (undefined-name))", "2");
        assert_eval("(or #f #f)", "#f");
    }

    #[test]
    fn test_let() {
        assert_eval("(let ((x 1) (y 2)) (+ x y))", "3");
        assert_eval("(define x 10) (let ((x 1) (y x)) y)", "10");
        assert_eval("(let () 5)", "5");
        assert_invalid_form("(let ((x 1)))");
        assert_invalid_form("(let ((x 1 2)) x)");
        assert_invalid_form("(let ((1 2)) 1)");
    }

    #[test]
    fn test_begin() {
        assert_eval("(begin 1 2 3)", "3");
        assert_eval("(begin (define z 4) (* z z))", "16");
        assert_invalid_form("(begin)");
    }

    #[test]
    fn test_lambda_and_mu_forms() {
        assert_eval("(lambda (x) (* x x))", "(lambda (x) (* x x))");
        assert_eval("(mu (x) x)", "(mu (x) x)");
        assert_eval("(define-macro (m x) x) m", "(macro (x) x)");
        assert_invalid_form("(lambda (x))");
        assert_invalid_form("(lambda (1) 1)");
        assert_invalid_form("(mu)");
    }

    #[test]
    fn test_quasiquote() {
        assert_eval("(define x 2) `(1 ,x 3)", "(1 2 3)");
        assert_eval("(define x '(a b)) `(1 ,@x 3)", "(1 a b 3)");
        assert_eval("`(1 . ,(+ 1 1))", "(1 . 2)");
        assert_eval("`(1 `(2 ,(3 ,(+ 1 3))))", "(1 (quasiquote (2 (unquote (3 4)))))");
        assert_invalid_form(",x");
    }

    #[test]
    fn test_tail_position_in_and_or_let() {
        assert_eval(
            "(define (f n) (and #t (or #f (let ((m (- n 1))) (if (= m 0) 'ok (f m))))))
             (f 100000)",
            "ok",
        );
    }

    #[test]
    fn test_standard_names() {
        let names = SpecialForms::standard().names();
        for name in ["define", "if", "lambda", "mu", "define-macro", "quote", "let"] {
            assert!(names.contains(name), "missing {}", name);
        }
    }
}
