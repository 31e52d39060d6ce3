use ardast::{parse, Command, CommandKind, CommandValue, Interpreter, InterpreterEvent, InterpreterOptions, Platform};

fn default_response(kind: &CommandKind) -> Option<CommandValue> {
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

fn run_to_completion(source: &str, options: InterpreterOptions) -> Vec<Command> {
    let ast = parse(source, Platform::ArduinoUno, true).expect("parses");
    let mut interpreter = Interpreter::new(&ast, options);
    interpreter.start();
    let mut commands = Vec::new();
    while let Some(event) = interpreter.step_until_event() {
        match event {
            InterpreterEvent::Command(command) => {
                if let Some(value) = default_response(&command.kind) {
                    interpreter.handle_response(value);
                }
                commands.push(command);
            }
            InterpreterEvent::Complete => break,
        }
    }
    commands
}

fn serial_lines(commands: &[Command]) -> Vec<String> {
    commands
        .iter()
        .filter_map(|c| match &c.kind {
            CommandKind::SerialPrintln { data, .. } => Some(data.clone()),
            _ => None,
        })
        .collect()
}

#[test]
fn static_locals_persist_their_value_across_calls() {
    let source = "int counter() {\n  static int n = 0;\n  n = n + 1;\n  return n;\n}\nvoid setup() {}\nvoid loop() {\n  Serial.println(counter());\n}\n";
    let mut options = InterpreterOptions::default();
    options.max_loop_iterations = 3;
    let commands = run_to_completion(source, options);
    assert_eq!(serial_lines(&commands), vec!["1", "2", "3"]);
}

#[test]
fn arguments_evaluate_left_to_right_before_the_operator_combines_them() {
    let source = "int tap(int n) {\n  Serial.println(n);\n  return n;\n}\nvoid setup() {}\nvoid loop() {\n  int total = tap(1) + tap(2);\n}\n";
    let mut options = InterpreterOptions::default();
    options.max_loop_iterations = 1;
    let commands = run_to_completion(source, options);
    assert_eq!(serial_lines(&commands), vec!["1", "2"]);
}

#[test]
fn a_pointer_write_is_visible_through_the_original_variable() {
    let source = "void setup() {}\nvoid loop() {\n  int x = 5;\n  int *p = &x;\n  *p = 10;\n  Serial.println(x);\n}\n";
    let mut options = InterpreterOptions::default();
    options.max_loop_iterations = 1;
    let commands = run_to_completion(source, options);
    assert_eq!(serial_lines(&commands), vec!["10"]);
}

#[test]
fn an_unanswered_request_times_out_into_an_io_error_and_a_zero_value() {
    let source = "void setup() {}\nvoid loop() {\n  int v = digitalRead(2);\n  digitalWrite(13, v);\n}\n";
    let mut options = InterpreterOptions::default();
    options.max_loop_iterations = 1;
    options.timeouts.default_ms = 50;

    let ast = parse(source, Platform::ArduinoUno, true).expect("parses");
    let mut interpreter = Interpreter::new(&ast, options);
    interpreter.start();

    let mut commands = Vec::new();
    while let Some(event) = interpreter.step_until_event() {
        match event {
            InterpreterEvent::Command(command) => commands.push(command),
            InterpreterEvent::Complete => break,
        }
    }

    assert!(commands.iter().any(|c| matches!(&c.kind, CommandKind::DigitalReadRequest { pin: 2, .. })));
    assert!(commands.iter().any(|c| matches!(&c.kind, CommandKind::Error { error_type, .. } if error_type == "IOError")));
    assert!(commands.iter().any(|c| matches!(&c.kind, CommandKind::DigitalWrite { pin: 13, value: 0 })));
}
