//! The six worked scenarios from the testable-properties section of the
//! sketch-execution specification, each checked against the actual
//! command stream an `Interpreter` produces.

use ardast::{parse, Command, CommandKind, CommandValue, Interpreter, InterpreterEvent, InterpreterOptions, Literal, NodeKind, Platform};

fn default_response(kind: &CommandKind) -> Option<CommandValue> {
    match kind {
        CommandKind::DigitalReadRequest { .. }
        | CommandKind::AnalogReadRequest { .. }
        | CommandKind::MillisRequest { .. }
        | CommandKind::MicrosRequest { .. }
        | CommandKind::PulseInRequest { .. }
        | CommandKind::LibraryMethodRequest { .. } => Some(CommandValue::Int(742)),
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

fn tag(kind: &CommandKind) -> &'static str {
    match kind {
        CommandKind::VersionInfo { .. } => "VERSION_INFO",
        CommandKind::ProgramStart { .. } => "PROGRAM_START",
        CommandKind::ProgramEnd { .. } => "PROGRAM_END",
        CommandKind::SetupStart { .. } => "SETUP_START",
        CommandKind::SetupEnd { .. } => "SETUP_END",
        CommandKind::LoopStart { .. } => "LOOP_START",
        CommandKind::LoopEnd { .. } => "LOOP_END",
        CommandKind::FunctionCall { .. } => "FUNCTION_CALL",
        CommandKind::PinMode { .. } => "PIN_MODE",
        CommandKind::DigitalWrite { .. } => "DIGITAL_WRITE",
        CommandKind::AnalogWrite { .. } => "ANALOG_WRITE",
        CommandKind::Delay { .. } => "DELAY",
        CommandKind::DelayMicroseconds { .. } => "DELAY_MICROSECONDS",
        CommandKind::DigitalReadRequest { .. } => "DIGITAL_READ_REQUEST",
        CommandKind::AnalogReadRequest { .. } => "ANALOG_READ_REQUEST",
        CommandKind::MillisRequest { .. } => "MILLIS_REQUEST",
        CommandKind::MicrosRequest { .. } => "MICROS_REQUEST",
        CommandKind::PulseInRequest { .. } => "PULSE_IN_REQUEST",
        CommandKind::LibraryMethodRequest { .. } => "LIBRARY_METHOD_REQUEST",
        CommandKind::SerialPrint { .. } => "SERIAL_PRINT",
        CommandKind::SerialPrintln { .. } => "SERIAL_PRINTLN",
        CommandKind::VarSet { .. } => "VAR_SET",
        CommandKind::VarGet { .. } => "VAR_GET",
        CommandKind::IfStatement { .. } => "IF_STATEMENT",
        CommandKind::SwitchStatement { .. } => "SWITCH_STATEMENT",
        CommandKind::SwitchCase { .. } => "SWITCH_CASE",
        CommandKind::LoopLimitReached { .. } => "LOOP_LIMIT_REACHED",
        CommandKind::Error { .. } => "ERROR",
    }
}

#[test]
fn scenario_1_blink() {
    let source = "void setup(){ pinMode(13,OUTPUT); }\nvoid loop(){ digitalWrite(13,HIGH); delay(1000); digitalWrite(13,LOW); delay(1000); }\n";
    let mut options = InterpreterOptions::default();
    options.max_loop_iterations = 2;
    let commands = run_to_completion(source, options);
    let tags: Vec<_> = commands.iter().map(|c| tag(&c.kind)).collect();

    let mut expected = vec!["VERSION_INFO", "VERSION_INFO", "VERSION_INFO", "PROGRAM_START", "SETUP_START", "PIN_MODE", "SETUP_END"];
    for _ in 0..2 {
        expected.extend([
            "LOOP_START",
            "FUNCTION_CALL",
            "DIGITAL_WRITE",
            "DELAY",
            "DIGITAL_WRITE",
            "DELAY",
            "FUNCTION_CALL",
            "LOOP_END",
        ]);
    }
    expected.extend(["LOOP_LIMIT_REACHED", "PROGRAM_END"]);
    assert_eq!(tags, expected);

    assert!(commands.iter().any(|c| matches!(&c.kind, CommandKind::PinMode { pin: 13, mode } if mode == "OUTPUT")));
    let writes: Vec<_> = commands.iter().filter_map(|c| match &c.kind { CommandKind::DigitalWrite { value, .. } => Some(*value), _ => None }).collect();
    assert_eq!(writes, vec![1, 0, 1, 0]);
}

#[test]
fn scenario_2_analog_read_serial() {
    let source = "void setup(){ Serial.begin(9600); }\nvoid loop(){ int v = analogRead(A0); Serial.println(v); delay(1); }\n";
    let mut options = InterpreterOptions::default();
    options.max_loop_iterations = 1;
    let commands = run_to_completion(source, options);

    assert!(commands.iter().any(|c| matches!(&c.kind, CommandKind::FunctionCall { function, .. } if function == "Serial.begin")));
    assert!(commands.iter().any(|c| matches!(&c.kind, CommandKind::AnalogReadRequest { .. })));
    assert!(commands.iter().any(|c| matches!(&c.kind, CommandKind::VarSet { name, value } if name == "v" && *value == CommandValue::Int(742))));
    assert!(commands.iter().any(|c| matches!(&c.kind, CommandKind::SerialPrintln { data, .. } if data == "742")));
    assert!(commands.iter().any(|c| matches!(&c.kind, CommandKind::Delay { duration: 1, .. })));
}

#[test]
fn scenario_3_macro_substitution_leaves_no_trace_at_runtime() {
    let ast = parse("#define LED_COUNT 60\nint n = LED_COUNT;\n", Platform::ArduinoUno, true).expect("parses");
    let var_decl = ast.get(ast.root).children.iter().copied().find(|&id| ast.kind(id) == NodeKind::VarDecl).expect("a VarDecl");
    let (_, decls) = ast.var_decl_parts(var_decl);
    let init = decls[0].1.expect("an initializer");
    assert_eq!(ast.kind(init), NodeKind::NumberLiteral);
    assert_eq!(ast.get(init).value, Some(Literal::Int32(60)));
}

#[test]
fn scenario_4_ternary_picks_the_consequent_when_true() {
    let source = "void setup(){}\nvoid loop(){ bool c = true; int x = c ? 10 : 20; }\n";
    let mut options = InterpreterOptions::default();
    options.max_loop_iterations = 1;
    let commands = run_to_completion(source, options);
    assert!(commands.iter().any(|c| matches!(&c.kind, CommandKind::VarSet { name, value } if name == "x" && *value == CommandValue::Int(10))));
}

#[test]
fn scenario_5_switch_fall_through_skips_earlier_cases_and_runs_the_rest() {
    let source = "void setup(){}\nvoid loop(){\n  switch(2){\n    case 1: Serial.print(\"A\");\n    case 2: Serial.print(\"B\");\n    case 3: Serial.print(\"C\"); break;\n    default: Serial.print(\"D\");\n  }\n}\n";
    let mut options = InterpreterOptions::default();
    options.max_loop_iterations = 1;
    let commands = run_to_completion(source, options);
    let printed: Vec<_> = commands.iter().filter_map(|c| match &c.kind { CommandKind::SerialPrint { data, .. } => Some(data.as_str()), _ => None }).collect();
    assert_eq!(printed, vec!["B", "C"]);
}

#[test]
fn scenario_6_an_unanswered_digital_read_times_out() {
    let source = "void setup(){}\nvoid loop(){ int v = digitalRead(2); }\n";
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

    assert!(commands.iter().any(|c| matches!(&c.kind, CommandKind::Error { error_type, .. } if error_type == "IOError")));
    assert!(commands.iter().any(|c| matches!(&c.kind, CommandKind::VarSet { name, value } if name == "v" && *value == CommandValue::Int(0))));
}
