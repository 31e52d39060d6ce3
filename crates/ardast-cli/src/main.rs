use std::{env, fs, process::ExitCode, time::Instant};

use ardast::{parse, Command, CommandKind, CommandValue, Interpreter, InterpreterEvent, InterpreterOptions, Platform};

fn main() -> ExitCode {
    let args: Vec<String> = env::args().collect();
    let file_path = if args.len() > 1 { &args[1] } else { "example.ino" };
    let source = match read_file(file_path) {
        Ok(source) => source,
        Err(err) => {
            eprintln!("error: {err}");
            return ExitCode::FAILURE;
        }
    };

    let start = Instant::now();
    let ast = match parse(&source, Platform::ArduinoUno, false) {
        Ok(ast) => ast,
        Err(errors) => {
            eprintln!("error: parsing {file_path} failed:");
            for error in &errors {
                eprintln!("  {error}");
            }
            return ExitCode::FAILURE;
        }
    };
    if ast.has_errors() {
        eprintln!("warning: {file_path} parsed with recovered errors, continuing anyway");
    }

    let mut interpreter = Interpreter::new(&ast, InterpreterOptions::default());
    interpreter.start();

    let mut command_count = 0_u64;
    while let Some(event) = interpreter.step_until_event() {
        match event {
            InterpreterEvent::Command(command) => {
                command_count += 1;
                print_command(&command);
                if let Some(value) = no_op_response(&command.kind) {
                    interpreter.handle_response(value);
                }
            }
            InterpreterEvent::Complete => break,
        }
    }

    let elapsed = start.elapsed();
    eprintln!("done in {elapsed:?}, {command_count} commands emitted");
    ExitCode::SUCCESS
}

fn print_command(command: &Command) {
    match serde_json::to_string(command) {
        Ok(line) => println!("{line}"),
        Err(err) => eprintln!("error: failed to serialize command: {err}"),
    }
}

/// The no-op host this binary simulates: every `*_REQUEST` gets an
/// immediate typed zero/false answer rather than a real sensor reading, so
/// a sketch that calls `digitalRead`/`millis`/... never actually blocks.
fn no_op_response(kind: &CommandKind) -> Option<CommandValue> {
    match kind {
        CommandKind::DigitalReadRequest { .. }
        | CommandKind::AnalogReadRequest { .. }
        | CommandKind::MillisRequest { .. }
        | CommandKind::MicrosRequest { .. }
        | CommandKind::PulseInRequest { .. }
        | CommandKind::LibraryMethodRequest { .. } => Some(CommandValue::Int(0)),
        _ => None,
    }
}

fn read_file(file_path: &str) -> Result<String, String> {
    eprintln!("Reading file: {file_path}");
    match fs::metadata(file_path) {
        Ok(metadata) => {
            if !metadata.is_file() {
                return Err(format!("Error: {file_path} is not a file"));
            }
        }
        Err(err) => {
            return Err(format!("Error reading {file_path}: {err}"));
        }
    }
    match fs::read_to_string(file_path) {
        Ok(contents) => Ok(contents),
        Err(err) => Err(format!("Error reading file: {err}")),
    }
}
