use scheval::{Environment, Evaluator, logging, parse_program};
use std::process::ExitCode;
use tracing::info;

fn main() -> ExitCode {
    logging::init();

    let Some(path) = std::env::args().nth(1) else {
        eprintln!("usage: scheval <file.scm>");
        eprintln!("       (run `repl` for an interactive session)");
        return ExitCode::from(2);
    };
    let input = match std::fs::read_to_string(&path) {
        Ok(input) => input,
        Err(err) => {
            eprintln!("Error: cannot read {}: {}", path, err);
            return ExitCode::FAILURE;
        }
    };

    let program = match parse_program(&input) {
        Ok(program) => program,
        Err(err) => {
            if err.pretty_print(&path, &input).is_err() {
                eprintln!("Parse Error: {}", err);
            }
            return ExitCode::FAILURE;
        }
    };
    info!(forms = program.len(), %path, "running program");

    let evaluator = Evaluator::new();
    let global_env = Environment::new_global_populated();
    for expr in &program {
        if let Err(err) = evaluator.eval(expr, &global_env) {
            eprintln!("Error: {}", err);
            eprintln!("  while evaluating: {}", expr);
            return ExitCode::FAILURE;
        }
    }
    ExitCode::SUCCESS
}
