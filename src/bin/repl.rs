use std::borrow::Cow;
use std::collections::HashSet;

use rustyline::error::ReadlineError;
use rustyline::highlight::{CmdKind, Highlighter};
use rustyline::validate::{ValidationContext, ValidationResult, Validator};
use rustyline::{Cmd, Completer, Context, Editor, EventHandler, KeyCode, KeyEvent, Modifiers};
use rustyline::{EditMode, Helper, Highlighter, Hinter, Validator};
use scheval::{Env, Environment, Evaluator, TokenKind, Value, logging, parse_program, tokenize};
use tracing::debug;

/// REPL settings, read from the environment.
struct ReplConfig {
    history_file: String,
    edit_mode: EditMode,
}

impl ReplConfig {
    fn from_env() -> Self {
        let history_file = std::env::var("SCHEVAL_HISTORY")
            .unwrap_or_else(|_| "scheval_history.txt".to_string());
        let edit_mode = match std::env::var("SCHEVAL_EDIT_MODE").as_deref() {
            Ok("vi") => EditMode::Vi,
            _ => EditMode::Emacs,
        };
        ReplConfig {
            history_file,
            edit_mode,
        }
    }
}

struct SchevalCompleter {
    env: Env,
    special_forms: HashSet<String>,
}

impl rustyline::completion::Completer for SchevalCompleter {
    type Candidate = String;
    fn complete(
        &self,
        line: &str,
        pos: usize,
        _ctx: &Context<'_>,
    ) -> rustyline::Result<(usize, Vec<String>)> {
        let prefix = match tokenize(&line[..pos]) {
            Ok(tokens) => match tokens.last().map(|t| t.kind.clone()) {
                Some(TokenKind::Symbol(prefix)) => prefix,
                _ => return Ok((pos, vec![])),
            },
            Err(_) => return Ok((pos, vec![])),
        };
        let mut candidates: Vec<String> = self
            .env
            .borrow()
            .get_identifiers()
            .union(&self.special_forms)
            .filter_map(|id| id.strip_prefix(prefix.as_str()).map(str::to_string))
            .collect();
        candidates.sort();
        Ok((pos, candidates))
    }
}

#[derive(Completer, Helper, Highlighter, Hinter, Validator)]
struct InputHelper {
    #[rustyline(Validator)]
    validator: SchevalValidator,
    #[rustyline(Highlighter)]
    highlighter: SchevalHighlighter,
    #[rustyline(Completer)]
    completer: SchevalCompleter,
}

fn closes(opening: char, closing: char) -> bool {
    matches!((opening, closing), ('(', ')') | ('[', ']') | ('{', '}'))
}

struct SchevalValidator;

impl Validator for SchevalValidator {
    fn validate(&self, ctx: &mut ValidationContext) -> rustyline::Result<ValidationResult> {
        let mut stack = Vec::new();
        let mut in_string = false;
        let mut escape = false;

        for (i, c) in ctx.input().chars().enumerate() {
            if in_string {
                if escape {
                    escape = false;
                } else if c == '\\' {
                    escape = true;
                } else if c == '"' {
                    in_string = false;
                }
                continue;
            }

            match c {
                '"' => in_string = true,
                '(' | '[' | '{' => stack.push(c),
                ')' | ']' | '}' => match stack.pop() {
                    Some(opening) if closes(opening, c) => {}
                    _ => {
                        return Ok(ValidationResult::Invalid(Some(format!(
                            "  - Unmatched '{}' at position {}",
                            c, i
                        ))));
                    }
                },
                _ => {}
            }
        }

        if in_string || !stack.is_empty() {
            Ok(ValidationResult::Incomplete)
        } else {
            Ok(ValidationResult::Valid(None))
        }
    }
}

struct SchevalHighlighter;

impl Highlighter for SchevalHighlighter {
    fn highlight<'l>(&self, line: &'l str, pos: usize) -> Cow<'l, str> {
        let mut stack: Vec<(char, usize)> = Vec::new();
        let mut highlighted = String::new();
        let mut in_string = false;
        let mut escape = false;

        for (i, c) in line.chars().enumerate() {
            if in_string {
                if escape {
                    escape = false;
                } else if c == '\\' {
                    escape = true;
                } else if c == '"' {
                    in_string = false;
                }
                highlighted.push_str(&format!("\x1b[32m{}\x1b[0m", c)); // Green for strings
                continue;
            }

            match c {
                '"' => {
                    in_string = true;
                    highlighted.push_str(&format!("\x1b[32m{}\x1b[0m", c));
                }
                '(' | '[' | '{' => {
                    stack.push((c, highlighted.len()));
                    highlighted.push(c);
                }
                ')' | ']' | '}' => match stack.pop() {
                    Some((opening, matching_pos)) if closes(opening, c) => {
                        if matching_pos + 1 == pos || i + 1 == pos {
                            // Blue for the bracket pair under the cursor
                            highlighted.push_str(&format!("\x1b[34m{}\x1b[0m", c));
                            highlighted.replace_range(
                                matching_pos..=matching_pos,
                                &format!("\x1b[1;34m{}\x1b[0m", opening),
                            );
                        } else {
                            highlighted.push(c);
                        }
                    }
                    Some((opening, matching_pos)) => {
                        highlighted.push_str(&format!("\x1b[31m{}\x1b[0m", c));
                        highlighted.replace_range(
                            matching_pos..=matching_pos,
                            &format!("\x1b[1;31m{}\x1b[0m", opening),
                        );
                    }
                    None => highlighted.push_str(&format!("\x1b[31m{}\x1b[0m", c)),
                },
                _ => highlighted.push(c),
            }
        }

        Cow::Owned(highlighted)
    }

    fn highlight_char(&self, _line: &str, _pos: usize, _kind: CmdKind) -> bool {
        true
    }
}

/// Evaluates every form in `input`, printing each result that has a value.
fn eval_input(evaluator: &Evaluator, env: &Env, input: &str) {
    let program = match parse_program(input) {
        Ok(program) => program,
        Err(parse_err) => {
            if parse_err.pretty_print("REPL", input).is_err() {
                eprintln!("Parse Error: {}", parse_err);
            }
            return;
        }
    };
    for expr in &program {
        match evaluator.eval(expr, env) {
            Ok(Value::Undefined) => {}
            Ok(result) => println!("{}", result),
            Err(err) => {
                debug!(%expr, "evaluation failed");
                if err.pretty_print("REPL", input).is_err() {
                    eprintln!("Error: {}", err);
                }
                return;
            }
        }
    }
}

fn main() -> rustyline::Result<()> {
    logging::init();
    println!("Scheval REPL v{}", env!("CARGO_PKG_VERSION"));
    println!("Type 'exit' or press Ctrl-D to quit.");

    let repl_config = ReplConfig::from_env();
    let evaluator = Evaluator::new();
    let global_env = Environment::new_global_populated();
    let helper = InputHelper {
        highlighter: SchevalHighlighter,
        validator: SchevalValidator,
        completer: SchevalCompleter {
            env: global_env.clone(),
            special_forms: evaluator.special_forms().names(),
        },
    };
    let config = rustyline::config::Config::builder()
        .edit_mode(repl_config.edit_mode)
        .build();
    let mut rl = Editor::with_config(config)?;
    rl.set_helper(Some(helper));
    rl.bind_sequence(
        KeyEvent(KeyCode::Char('s'), Modifiers::CTRL),
        EventHandler::Simple(Cmd::Newline),
    );
    if rl.load_history(&repl_config.history_file).is_err() {
        println!("No previous history.");
    }

    loop {
        match rl.readline("scheval> ") {
            Ok(line) => {
                rl.add_history_entry(line.as_str())?;
                let trimmed_input = line.trim();
                if trimmed_input.is_empty() {
                    continue;
                }
                if trimmed_input.eq_ignore_ascii_case("exit") {
                    break;
                }
                eval_input(&evaluator, &global_env, trimmed_input);
            }
            Err(ReadlineError::Interrupted) => {
                println!("Interrupted. Type 'exit' or Ctrl-D to quit.");
            }
            Err(ReadlineError::Eof) => {
                println!("\nExiting.");
                break;
            }
            Err(err) => {
                eprintln!("Readline Error: {:?}", err);
                break;
            }
        }
    }
    rl.save_history(&repl_config.history_file)
}
