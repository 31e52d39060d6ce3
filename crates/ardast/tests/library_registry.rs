use ardast::{parse, Command, CommandKind, CommandValue, Interpreter, InterpreterEvent, InterpreterOptions, Platform};

fn run_with_responses(source: &str, respond_with: CommandValue) -> Vec<Command> {
    let ast = parse(source, Platform::ArduinoUno, true).expect("parses");
    let mut interpreter = Interpreter::new(&ast, InterpreterOptions::default());
    interpreter.start();
    let mut commands = Vec::new();
    while let Some(event) = interpreter.step_until_event() {
        match event {
            InterpreterEvent::Command(command) => {
                if matches!(command.kind, CommandKind::LibraryMethodRequest { .. }) {
                    interpreter.handle_response(respond_with.clone());
                }
                commands.push(command);
            }
            InterpreterEvent::Complete => break,
        }
    }
    commands
}

#[test]
fn a_static_singleton_like_serial_is_usable_without_being_declared() {
    let source = "void setup(){ Serial.begin(9600); }\nvoid loop(){ Serial.print(\"hi\"); }\n";
    let commands = run_with_responses(source, CommandValue::Int(0));
    assert!(commands.iter().any(|c| matches!(&c.kind, CommandKind::FunctionCall { function, .. } if function == "Serial.begin")));
    assert!(commands.iter().any(|c| matches!(&c.kind, CommandKind::SerialPrint { data, .. } if data == "hi")));
}

#[test]
fn a_fire_and_forget_external_method_emits_a_plain_function_call() {
    let source = "void setup(){}\nvoid loop(){\n  Servo myServo();\n  myServo.attach(9);\n  myServo.write(90);\n}\n";
    let commands = run_with_responses(source, CommandValue::Int(0));

    let calls: Vec<_> = commands
        .iter()
        .filter_map(|c| match &c.kind {
            CommandKind::FunctionCall { function, arguments, .. } => Some((function.as_str(), arguments.clone())),
            _ => None,
        })
        .collect();
    assert!(calls.iter().any(|(f, args)| *f == "Servo.attach" && *args == vec![CommandValue::Int(9)]));
    assert!(calls.iter().any(|(f, args)| *f == "Servo.write" && *args == vec![CommandValue::Int(90)]));
    assert!(!commands.iter().any(|c| matches!(&c.kind, CommandKind::LibraryMethodRequest { .. })));
}

#[test]
fn a_response_needing_external_method_suspends_on_a_per_instance_library_method_request() {
    let source = "void setup(){}\nvoid loop(){\n  Servo myServo();\n  int pos = myServo.read();\n}\n";
    let commands = run_with_responses(source, CommandValue::Int(42));

    let request = commands
        .iter()
        .find_map(|c| match &c.kind {
            CommandKind::LibraryMethodRequest { library, object, method, .. } => Some((library.clone(), *object, method.clone())),
            _ => None,
        })
        .expect("a LIBRARY_METHOD_REQUEST for Servo.read");
    assert_eq!(request, ("Servo".to_owned(), 1, "read".to_owned()));
    assert!(commands.iter().any(|c| matches!(&c.kind, CommandKind::VarSet { name, value } if name == "pos" && *value == CommandValue::Int(42))));
}

#[test]
fn library_aliases_resolve_to_the_same_descriptor() {
    let source = "void setup(){ Serial1.begin(9600); }\nvoid loop(){}\n";
    let commands = run_with_responses(source, CommandValue::Int(0));
    assert!(commands.iter().any(|c| matches!(&c.kind, CommandKind::FunctionCall { function, .. } if function == "Serial1.begin")));
}
