use crate::environment::Environment;
use crate::evaluator::{EvalError, EvalResult, Evaluator};
use crate::types::{Arity, BuiltinFunc, Procedure, Value};
use std::io::Write;

/// Installs the standard builtins into `env`.
pub fn install(env: &mut Environment) {
    let mut add = |name: &'static str, func: BuiltinFunc, arity: Arity| {
        env.define(name, Procedure::builtin(name, func, arity, false).into());
    };

    // --- Arithmetic ---
    add("+", prim_add, Arity::AtLeast(0));
    add("-", prim_sub, Arity::AtLeast(1));
    add("*", prim_mul, Arity::AtLeast(0));
    add("/", prim_div, Arity::AtLeast(1));
    add("abs", prim_abs, Arity::Exact(1));
    add("quotient", prim_quotient, Arity::Exact(2));
    add("remainder", prim_remainder, Arity::Exact(2));
    add("modulo", prim_modulo, Arity::Exact(2));

    // --- Comparison ---
    add("=", prim_equals, Arity::AtLeast(2));
    add("<", prim_less_than, Arity::AtLeast(2));
    add("<=", prim_less_than_or_equals, Arity::AtLeast(2));
    add(">", prim_greater_than, Arity::AtLeast(2));
    add(">=", prim_greater_than_or_equals, Arity::AtLeast(2));
    add("eq?", prim_is_eq, Arity::Exact(2));
    add("equal?", prim_is_equal, Arity::Exact(2));
    add("not", prim_not, Arity::Exact(1));

    // --- Lists ---
    add("cons", prim_cons, Arity::Exact(2));
    add("car", prim_car, Arity::Exact(1));
    add("cdr", prim_cdr, Arity::Exact(1));
    add("list", prim_list, Arity::AtLeast(0));
    add("length", prim_length, Arity::Exact(1));
    add("append", prim_append, Arity::AtLeast(0));

    // --- Type predicates ---
    add("null?", prim_is_null, Arity::Exact(1));
    add("pair?", prim_is_pair, Arity::Exact(1));
    add("list?", prim_is_list, Arity::Exact(1));
    add("number?", prim_is_number, Arity::Exact(1));
    add("integer?", prim_is_integer, Arity::Exact(1));
    add("zero?", prim_is_zero, Arity::Exact(1));
    add("boolean?", prim_is_boolean, Arity::Exact(1));
    add("symbol?", prim_is_symbol, Arity::Exact(1));
    add("string?", prim_is_string, Arity::Exact(1));
    add("procedure?", prim_is_procedure, Arity::Exact(1));

    // --- Output and errors ---
    add("display", prim_display, Arity::Exact(1));
    add("print", prim_print, Arity::Exact(1));
    add("newline", prim_newline, Arity::Exact(0));
    add("error", prim_error, Arity::Between(0, 1));

    // --- Evaluation (receive the calling environment) ---
    env.define(
        "eval",
        Procedure::builtin("eval", prim_eval, Arity::Exact(2), true).into(),
    );
    env.define(
        "apply",
        Procedure::builtin("apply", prim_apply, Arity::Exact(3), true).into(),
    );
}

fn expect_number(value: &Value, operator: &str) -> EvalResult<f64> {
    match value {
        Value::Number(n) => Ok(*n),
        other => Err(type_mismatch(operator, "number", other)),
    }
}

fn type_mismatch(operator: &str, expected: &'static str, found: &Value) -> EvalError {
    EvalError::TypeMismatch {
        procedure: operator.to_string(),
        expected,
        found: found.to_string(),
    }
}

fn fold_numbers<F: Fn(f64, f64) -> f64>(
    args: &[Value],
    start: f64,
    func: F,
    operator: &str,
) -> EvalResult {
    let mut acc = start;
    for arg in args {
        acc = func(acc, expect_number(arg, operator)?);
    }
    Ok(Value::Number(acc))
}

fn compare_numbers<F: Fn(f64, f64) -> bool>(
    args: &[Value],
    compare: F,
    operator: &str,
) -> EvalResult {
    let numbers = args
        .iter()
        .map(|arg| expect_number(arg, operator))
        .collect::<EvalResult<Vec<f64>>>()?;
    Ok(Value::Boolean(
        numbers.windows(2).all(|pair| compare(pair[0], pair[1])),
    ))
}

fn integer_operands(args: &[Value], operator: &str) -> EvalResult<(f64, f64)> {
    let left = expect_number(&args[0], operator)?;
    let right = expect_number(&args[1], operator)?;
    if right == 0.0 {
        return Err(EvalError::DivisionByZero);
    }
    Ok((left, right))
}

pub fn prim_add(_: &Evaluator, args: Vec<Value>) -> EvalResult {
    // (+) -> 0
    fold_numbers(&args, 0.0, |acc, val| acc + val, "+")
}

pub fn prim_sub(_: &Evaluator, args: Vec<Value>) -> EvalResult {
    // (- x) -> -x
    // (- x y z) -> x - y - z
    let first = expect_number(&args[0], "-")?;
    if args.len() == 1 {
        return Ok(Value::Number(-first));
    }
    fold_numbers(&args[1..], first, |acc, val| acc - val, "-")
}

pub fn prim_mul(_: &Evaluator, args: Vec<Value>) -> EvalResult {
    // (*) -> 1
    fold_numbers(&args, 1.0, |acc, val| acc * val, "*")
}

pub fn prim_div(_: &Evaluator, args: Vec<Value>) -> EvalResult {
    // (/ x) -> 1/x
    // (/ x y z) -> x / y / z
    let first = expect_number(&args[0], "/")?;
    let (mut result, divisors) = if args.len() == 1 {
        (1.0, &args[..])
    } else {
        (first, &args[1..])
    };
    for divisor in divisors {
        let divisor = expect_number(divisor, "/")?;
        if divisor == 0.0 {
            return Err(EvalError::DivisionByZero);
        }
        result /= divisor;
    }
    Ok(Value::Number(result))
}

pub fn prim_abs(_: &Evaluator, args: Vec<Value>) -> EvalResult {
    Ok(Value::Number(expect_number(&args[0], "abs")?.abs()))
}

pub fn prim_quotient(_: &Evaluator, args: Vec<Value>) -> EvalResult {
    let (left, right) = integer_operands(&args, "quotient")?;
    Ok(Value::Number((left / right).trunc()))
}

pub fn prim_remainder(_: &Evaluator, args: Vec<Value>) -> EvalResult {
    let (left, right) = integer_operands(&args, "remainder")?;
    Ok(Value::Number(left % right))
}

pub fn prim_modulo(_: &Evaluator, args: Vec<Value>) -> EvalResult {
    let (left, right) = integer_operands(&args, "modulo")?;
    let remainder = left % right;
    // result takes the sign of the divisor
    if remainder != 0.0 && (remainder < 0.0) != (right < 0.0) {
        Ok(Value::Number(remainder + right))
    } else {
        Ok(Value::Number(remainder))
    }
}

pub fn prim_equals(_: &Evaluator, args: Vec<Value>) -> EvalResult {
    compare_numbers(&args, |left, right| left == right, "=")
}

pub fn prim_less_than(_: &Evaluator, args: Vec<Value>) -> EvalResult {
    compare_numbers(&args, |left, right| left < right, "<")
}

pub fn prim_less_than_or_equals(_: &Evaluator, args: Vec<Value>) -> EvalResult {
    compare_numbers(&args, |left, right| left <= right, "<=")
}

pub fn prim_greater_than(_: &Evaluator, args: Vec<Value>) -> EvalResult {
    compare_numbers(&args, |left, right| left > right, ">")
}

pub fn prim_greater_than_or_equals(_: &Evaluator, args: Vec<Value>) -> EvalResult {
    compare_numbers(&args, |left, right| left >= right, ">=")
}

pub fn prim_is_eq(_: &Evaluator, args: Vec<Value>) -> EvalResult {
    // Pairs are compared by identity, atoms by value.
    let same = match (&args[0], &args[1]) {
        (Value::Pair(a), Value::Pair(b)) => std::rc::Rc::ptr_eq(a, b),
        (a, b) => a == b,
    };
    Ok(Value::Boolean(same))
}

pub fn prim_is_equal(_: &Evaluator, args: Vec<Value>) -> EvalResult {
    Ok(Value::Boolean(args[0] == args[1]))
}

pub fn prim_not(_: &Evaluator, args: Vec<Value>) -> EvalResult {
    Ok(Value::Boolean(!args[0].is_truthy()))
}

// --- List Primitives ---

pub fn prim_cons(_: &Evaluator, mut args: Vec<Value>) -> EvalResult {
    let rest = args.pop().unwrap_or(Value::Nil);
    let first = args.pop().unwrap_or(Value::Nil);
    Ok(Value::cons(first, rest))
}

pub fn prim_car(_: &Evaluator, args: Vec<Value>) -> EvalResult {
    match &args[0] {
        Value::Pair(pair) => Ok(pair.first.clone()),
        other => Err(type_mismatch("car", "pair", other)),
    }
}

pub fn prim_cdr(_: &Evaluator, args: Vec<Value>) -> EvalResult {
    match &args[0] {
        Value::Pair(pair) => Ok(pair.rest.clone()),
        other => Err(type_mismatch("cdr", "pair", other)),
    }
}

pub fn prim_list(_: &Evaluator, args: Vec<Value>) -> EvalResult {
    Ok(Value::list(args))
}

pub fn prim_length(_: &Evaluator, args: Vec<Value>) -> EvalResult {
    match args[0].to_vec() {
        Some(items) => Ok(Value::Number(items.len() as f64)),
        None => Err(type_mismatch("length", "list", &args[0])),
    }
}

pub fn prim_append(_: &Evaluator, mut args: Vec<Value>) -> EvalResult {
    // (append) -> (); the last argument is shared, not copied
    let Some(mut result) = args.pop() else {
        return Ok(Value::Nil);
    };
    for arg in args.iter().rev() {
        let items = arg
            .to_vec()
            .ok_or_else(|| type_mismatch("append", "list", arg))?;
        result = Value::list_with_tail(items, result);
    }
    Ok(result)
}

// --- Type Predicates ---

macro_rules! is_type {
    ($name:ident, $pattern:pat) => {
        pub fn $name(_: &Evaluator, args: Vec<Value>) -> EvalResult {
            Ok(Value::Boolean(matches!(args[0], $pattern)))
        }
    };
}

is_type!(prim_is_null, Value::Nil);
is_type!(prim_is_pair, Value::Pair(_));
is_type!(prim_is_number, Value::Number(_));
is_type!(prim_is_boolean, Value::Boolean(_));
is_type!(prim_is_symbol, Value::Symbol(_));
is_type!(prim_is_string, Value::String(_));
is_type!(prim_is_procedure, Value::Procedure(_));

pub fn prim_is_list(_: &Evaluator, args: Vec<Value>) -> EvalResult {
    Ok(Value::Boolean(args[0].is_list()))
}

pub fn prim_is_integer(_: &Evaluator, args: Vec<Value>) -> EvalResult {
    Ok(Value::Boolean(
        matches!(args[0], Value::Number(n) if n.is_finite() && n.fract() == 0.0),
    ))
}

pub fn prim_is_zero(_: &Evaluator, args: Vec<Value>) -> EvalResult {
    Ok(Value::Boolean(expect_number(&args[0], "zero?")? == 0.0))
}

// --- Output ---

fn write_stdout(text: &str) -> EvalResult {
    let mut stdout = std::io::stdout().lock();
    stdout
        .write_all(text.as_bytes())
        .and_then(|_| stdout.flush())
        .map_err(|err| EvalError::User(format!("output error: {}", err)))?;
    Ok(Value::Undefined)
}

fn display_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.to_string(),
        other => other.to_string(),
    }
}

pub fn prim_display(_: &Evaluator, args: Vec<Value>) -> EvalResult {
    write_stdout(&display_text(&args[0]))
}

pub fn prim_print(_: &Evaluator, args: Vec<Value>) -> EvalResult {
    write_stdout(&format!("{}\n", args[0]))
}

pub fn prim_newline(_: &Evaluator, _: Vec<Value>) -> EvalResult {
    write_stdout("\n")
}

pub fn prim_error(_: &Evaluator, args: Vec<Value>) -> EvalResult {
    let message = args
        .first()
        .map(display_text)
        .unwrap_or_else(|| "error".to_string());
    Err(EvalError::User(message))
}

// --- Evaluation ---

pub fn prim_eval(evaluator: &Evaluator, args: Vec<Value>) -> EvalResult {
    match &args[1] {
        Value::Frame(env) => evaluator.eval(&args[0], env),
        other => Err(type_mismatch("eval", "environment", other)),
    }
}

pub fn prim_apply(evaluator: &Evaluator, mut args: Vec<Value>) -> EvalResult {
    let env = match args.pop() {
        Some(Value::Frame(env)) => env,
        other => {
            return Err(type_mismatch(
                "apply",
                "environment",
                &other.unwrap_or(Value::Undefined),
            ));
        }
    };
    let operands = args.pop().unwrap_or(Value::Nil);
    if !operands.is_list() {
        return Err(type_mismatch("apply", "list", &operands));
    }
    evaluator.complete_apply(&args[0], operands, &env)
}

// --- Unit Tests ---
#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_str;

    fn assert_eval(input: &str, expected: &str) {
        let evaluator = Evaluator::new();
        let env = Environment::new_global_populated();
        let expr = parse_str(input).expect("parse failed");
        match evaluator.eval(&expr, &env) {
            Ok(result) => assert_eq!(result.to_string(), expected, "Input: '{}'", input),
            Err(e) => panic!("Evaluation failed for input '{}': {}", input, e),
        }
    }

    fn assert_eval_error(input: &str, expected_error_variant: &EvalError) {
        let evaluator = Evaluator::new();
        let env = Environment::new_global_populated();
        let expr = parse_str(input).expect("parse failed");
        match evaluator.eval(&expr, &env) {
            Ok(result) => panic!(
                "Expected evaluation to fail for input '{}', but got: {}",
                input, result
            ),
            Err(e) => assert_eq!(
                std::mem::discriminant(&e),
                std::mem::discriminant(expected_error_variant),
                "Input: '{}', Expected error variant like {:?}, got: {:?}",
                input,
                expected_error_variant,
                e
            ),
        }
    }

    fn type_error() -> EvalError {
        EvalError::TypeMismatch {
            procedure: String::new(),
            expected: "",
            found: String::new(),
        }
    }

    fn arity_error() -> EvalError {
        EvalError::Arity {
            procedure: String::new(),
            message: String::new(),
        }
    }

    #[test]
    fn test_arithmetic() {
        assert_eval("(+ 1 2)", "3");
        assert_eval("(+ 10 20 30 40)", "100");
        assert_eval("(+)", "0");
        assert_eval("(- 10 3)", "7");
        assert_eval("(- 5)", "-5");
        assert_eval("(- 10 3 2)", "5");
        assert_eval("(*)", "1");
        assert_eval("(* 2 3 4)", "24");
        assert_eval("(/ 10 4)", "2.5");
        assert_eval("(/ 20 2 5)", "2");
        assert_eval("(/ 5)", "0.2");
        assert_eval("(abs -3)", "3");
        assert_eval("(quotient 7 2)", "3");
        assert_eval("(remainder -7 2)", "-1");
        assert_eval("(modulo -7 2)", "1");
    }

    #[test]
    fn test_comparison() {
        assert_eval("(= 5 5 5)", "#t");
        assert_eval("(= 5 5 6)", "#f");
        assert_eval("(< 1 2 3)", "#t");
        assert_eval("(< 5 5 6)", "#f");
        assert_eval("(<= 5 5 6)", "#t");
        assert_eval("(>= 5 5 4 4 3)", "#t");
        assert_eval("(> 6 5 5)", "#f");
    }

    #[test]
    fn test_arity_errors() {
        assert_eval_error("(/)", &arity_error());
        assert_eval_error("(=)", &arity_error());
        assert_eval_error("(= 1)", &arity_error());
        assert_eval_error("(car)", &arity_error());
        assert_eval_error("(cons 1 2 3)", &arity_error());
    }

    #[test]
    fn test_type_errors() {
        assert_eval_error("(+ 1 #t)", &type_error());
        assert_eval_error("(/ 1 \"hello\")", &type_error());
        assert_eval_error("(= 1 #f)", &type_error());
        assert_eval_error("(car 1)", &type_error());
        assert_eval_error("(length '(1 . 2))", &type_error());
    }

    #[test]
    fn test_division_by_zero() {
        assert_eval_error("(/ 1 0)", &EvalError::DivisionByZero);
        assert_eval_error("(/ 0)", &EvalError::DivisionByZero);
        assert_eval_error("(modulo 1 0)", &EvalError::DivisionByZero);
    }

    #[test]
    fn test_lists() {
        assert_eval("(cons 1 2)", "(1 . 2)");
        assert_eval("(cons 1 '(2))", "(1 2)");
        assert_eval("(car '(1 2))", "1");
        assert_eval("(cdr '(1 2))", "(2)");
        assert_eval("(list)", "()");
        assert_eval("(list 1 (+ 1 1) 'c)", "(1 2 c)");
        assert_eval("(length '(1 2 3))", "3");
        assert_eval("(append '(1) '(2 3) '() '(4))", "(1 2 3 4)");
        assert_eval("(append '(1) 2)", "(1 . 2)");
        assert_eval("(append)", "()");
    }

    #[test]
    fn test_predicates() {
        assert_eval("(null? '())", "#t");
        assert_eval("(null? '(1))", "#f");
        assert_eval("(pair? '(1))", "#t");
        assert_eval("(list? '(1 . 2))", "#f");
        assert_eval("(number? 1)", "#t");
        assert_eval("(integer? 1.5)", "#f");
        assert_eval("(zero? 0)", "#t");
        assert_eval("(boolean? #f)", "#t");
        assert_eval("(symbol? 'a)", "#t");
        assert_eval("(string? \"s\")", "#t");
        assert_eval("(procedure? car)", "#t");
        assert_eval("(procedure? (lambda (x) x))", "#t");
        assert_eval("(not #f)", "#t");
        assert_eval("(not 0)", "#f");
    }

    #[test]
    fn test_equality() {
        assert_eval("(eq? 'a 'a)", "#t");
        assert_eval("(eq? '(1) '(1))", "#f");
        assert_eval("(equal? '(1 (2)) '(1 (2)))", "#t");
        assert_eval("(eq? car car)", "#t");
    }

    #[test]
    fn test_error_builtin() {
        assert_eval_error("(error \"bad\")", &EvalError::User(String::new()));
        assert_eval_error("(error)", &EvalError::User(String::new()));
    }

    #[test]
    fn test_eval_and_apply() {
        assert_eval("(eval '(* 2 3))", "6");
        assert_eval("(apply list '(1 2))", "(1 2)");
        assert_eval("(apply (lambda (a b) (- a b)) '(10 4))", "6");
        assert_eval_error("(apply + 1)", &type_error());
        assert_eval_error("(eval)", &arity_error());
    }
}
