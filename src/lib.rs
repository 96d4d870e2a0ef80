// Declare modules publicly so they are part of the library interface
pub mod environment;
pub mod evaluator;
pub mod lexer;
pub mod logging;
pub mod parser;
pub mod pretty_print;
pub mod primitives;
pub mod source;
pub mod special_forms;
pub mod types;

pub use environment::{Env, EnvError, Environment, Formals};
pub use evaluator::{EvalError, EvalResult, Evaluator, Outcome};
pub use lexer::{LexerError, Token, TokenKind, tokenize};
pub use parser::{ParseError, Parser, parse_program, parse_str};
pub use source::Span;
pub use special_forms::{SpecialForm, SpecialForms};
pub use types::{Arity, Procedure, Value};
