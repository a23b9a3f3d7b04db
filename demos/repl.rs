use ales::builtins::create_global_env;
use ales::compiler::{CodeChunk, Compiler, StaticType};
use ales::environment::{Binding, Environment};
use ales::evaluator::Evaluator;
use ales::reader::parse_program;
use ales::vm::VirtualMachine;
use ales::{Diagnostic, Error};
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use std::process;

/// Evaluation back end selected with `:compile`
enum Mode {
    Evaluate,
    Compile,
}

struct Session {
    mode: Mode,
    env: Environment,
    evaluator: Evaluator,
    compiler: Compiler,
    vm: VirtualMachine,
    last_chunk: CodeChunk,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .init();

    if let Err(err) = run_repl() {
        eprintln!("Error: {err}");
        process::exit(1);
    }
}

fn run_repl() -> Result<(), ReadlineError> {
    println!("Ales - tree-walking evaluator and bytecode VM");
    println!("Enter forms like: (defun inc (x) (+ x 1)) (inc 41)");
    println!("Type :help for more commands, or Ctrl+C to exit.");
    println!();

    let mut rl = DefaultEditor::new()?;
    let mut session = Session {
        mode: Mode::Evaluate,
        env: create_global_env(),
        evaluator: Evaluator::new(),
        compiler: Compiler::new(),
        vm: VirtualMachine::new(),
        last_chunk: CodeChunk::new(),
    };

    loop {
        let prompt = match session.mode {
            Mode::Evaluate => "ales> ",
            Mode::Compile => "ales[vm]> ",
        };
        match rl.readline(prompt) {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let _ = rl.add_history_entry(line);

                match line {
                    ":help" => print_help(),
                    ":env" => print_environment(&session),
                    ":chunk" => print_chunks(&session),
                    ":compile" => {
                        session.mode = match session.mode {
                            Mode::Evaluate => {
                                println!("Compile mode: forms run on the bytecode VM");
                                Mode::Compile
                            }
                            Mode::Compile => {
                                println!("Evaluate mode: forms run on the tree-walking evaluator");
                                Mode::Evaluate
                            }
                        };
                    }
                    ":quit" | ":exit" => {
                        println!("Goodbye!");
                        break;
                    }
                    _ => run_line(&mut session, line),
                }
            }
            Err(ReadlineError::Eof | ReadlineError::Interrupted) => {
                println!("Goodbye!");
                break;
            }
            Err(err) => return Err(err),
        }
    }
    Ok(())
}

fn run_line(session: &mut Session, line: &str) {
    let forms = match parse_program(line) {
        Ok(forms) => forms,
        Err(err) => {
            println!("{}", Diagnostic::from_error(&err, 1));
            return;
        }
    };

    match session.mode {
        Mode::Evaluate => {
            for result in session.evaluator.eval_forms(&session.env, &forms) {
                match result {
                    Ok(value) => println!("{value}"),
                    Err(diagnostic) => println!("{diagnostic}"),
                }
            }
        }
        Mode::Compile => {
            for form in &forms {
                if let Err(err) = compile_and_run(session, form) {
                    println!("{}", Diagnostic::from_error(&err, form.line));
                }
            }
        }
    }
}

fn compile_and_run(session: &mut Session, form: &ales::ast::SourceForm) -> Result<(), Error> {
    let ty = session.compiler.compile_form(form)?;
    let chunk = session.compiler.take_chunk();
    session.vm.clear_stack();
    let result = session.vm.run_chunk(&chunk, session.compiler.functions());
    session.last_chunk = chunk;
    result?;

    if ty != StaticType::Void
        && let Some(value) = session.vm.top()
    {
        println!("{value} : {ty}");
    }
    Ok(())
}

fn print_help() {
    println!("Commands:");
    println!("  :help     - Show this help message");
    println!("  :compile  - Toggle between the evaluator and the bytecode VM");
    println!("  :env      - Show bindings (evaluator) or globals (VM)");
    println!("  :chunk    - Show the disassembly of the last compiled form");
    println!("  :quit     - Exit the interpreter");
    println!();
    println!("Builtins: + - * < > eq not list print if set defun defmacro quote macroexpand");
    println!("The VM compiles literals, variables, +, set, defun and calls to compiled functions.");
    println!();
}

fn print_environment(session: &Session) {
    match session.mode {
        Mode::Evaluate => {
            let bindings = session.env.get_all_bindings();
            let (natives, user): (Vec<_>, Vec<_>) = bindings.iter().partition(|(_, binding)| {
                matches!(
                    binding,
                    Binding::NativeFunction { .. } | Binding::NativeMacro { .. }
                )
            });

            println!("Built-ins ({}):", natives.len());
            let names: Vec<&str> = natives.iter().map(|(name, _)| name.as_str()).collect();
            println!("  {}", names.join(" "));
            if !user.is_empty() {
                println!("User-defined ({}):", user.len());
                for (name, binding) in user {
                    println!("  {name} = {}", binding.describe());
                }
            }
        }
        Mode::Compile => {
            let globals = session.vm.globals();
            if globals.is_empty() {
                println!("No globals stored yet.");
            }
            for (name, value) in globals {
                let ty = session
                    .compiler
                    .var_type(name)
                    .map_or_else(|| "?".to_owned(), |ty| ty.to_string());
                println!("  {name} = {value} : {ty}");
            }
        }
    }
}

fn print_chunks(session: &Session) {
    println!("== last form ==");
    print!("{}", session.last_chunk);
    for (idx, function) in session.compiler.functions().iter().enumerate() {
        println!(
            "== fn {idx} {} ({}) -> {} ==",
            function.name,
            function.params.join(" "),
            function.return_type
        );
        print!("{}", function.chunk);
    }
}
