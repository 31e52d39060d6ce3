//! The command stream vocabulary (spec §3.5, §6.3): the primitive-only
//! records the interpreter emits as the observable product of execution.

use serde::Serialize;

use crate::value::Value;

/// A primitive-only projection of a runtime [`Value`] suitable for a
/// command field (spec §6.3 "all field values are primitive or
/// homogeneous arrays of primitives"). Library objects, pointers, and
/// function references never appear in a command; they are summarized as
/// their display string instead.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CommandValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Array(Vec<CommandValue>),
}

impl From<&Value> for CommandValue {
    fn from(value: &Value) -> Self {
        match value {
            Value::Undefined => Self::Str("undefined".to_owned()),
            Value::Bool(b) => Self::Bool(*b),
            Value::Int32(n) => Self::Int(i64::from(*n)),
            Value::Int64(n) => Self::Int(*n),
            Value::Float32(n) => Self::Float(f64::from(*n)),
            Value::Float64(n) => Self::Float(*n),
            Value::Str(s) => Self::Str(s.to_string()),
            Value::Array(a) => Self::Array(a.borrow().iter().map(CommandValue::from).collect()),
            Value::Struct(_) | Value::Pointer(_) | Value::Function(_) | Value::Object(_) => Self::Str(value.display_string()),
        }
    }
}

impl From<Value> for CommandValue {
    fn from(value: Value) -> Self {
        Self::from(&value)
    }
}

/// The command vocabulary from spec §6.3 (non-exhaustive list there; this
/// is the closed set this crate implements).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum CommandKind {
    #[serde(rename = "VERSION_INFO")]
    VersionInfo { component: String, version: String, status: String },
    #[serde(rename = "PROGRAM_START")]
    ProgramStart { message: String },
    #[serde(rename = "PROGRAM_END")]
    ProgramEnd { message: String },
    #[serde(rename = "SETUP_START")]
    SetupStart { message: String },
    #[serde(rename = "SETUP_END")]
    SetupEnd { message: String },
    #[serde(rename = "LOOP_START")]
    LoopStart { message: String },
    #[serde(rename = "LOOP_END")]
    LoopEnd { message: String },
    #[serde(rename = "FUNCTION_CALL")]
    FunctionCall {
        function: String,
        arguments: Vec<CommandValue>,
        #[serde(skip_serializing_if = "Option::is_none")]
        iteration: Option<u32>,
        #[serde(skip_serializing_if = "is_false")]
        completed: bool,
    },
    #[serde(rename = "PIN_MODE")]
    PinMode { pin: i64, mode: String },
    #[serde(rename = "DIGITAL_WRITE")]
    DigitalWrite { pin: i64, value: u8 },
    #[serde(rename = "ANALOG_WRITE")]
    AnalogWrite { pin: i64, value: u8 },
    #[serde(rename = "DELAY")]
    Delay { duration: u64, #[serde(rename = "actualDelay")] actual_delay: u64 },
    #[serde(rename = "DELAY_MICROSECONDS")]
    DelayMicroseconds { duration: u64, #[serde(rename = "actualDelay")] actual_delay: u64 },
    #[serde(rename = "DIGITAL_READ_REQUEST")]
    DigitalReadRequest { pin: i64, #[serde(rename = "requestId")] request_id: String },
    #[serde(rename = "ANALOG_READ_REQUEST")]
    AnalogReadRequest { pin: i64, #[serde(rename = "requestId")] request_id: String },
    #[serde(rename = "MILLIS_REQUEST")]
    MillisRequest { #[serde(rename = "requestId")] request_id: String },
    #[serde(rename = "MICROS_REQUEST")]
    MicrosRequest { #[serde(rename = "requestId")] request_id: String },
    #[serde(rename = "PULSE_IN_REQUEST")]
    PulseInRequest { pin: i64, value: u8, #[serde(rename = "requestId")] request_id: String },
    #[serde(rename = "LIBRARY_METHOD_REQUEST")]
    LibraryMethodRequest {
        library: String,
        object: u64,
        method: String,
        args: Vec<CommandValue>,
        #[serde(rename = "requestId")]
        request_id: String,
    },
    #[serde(rename = "SERIAL_PRINT")]
    SerialPrint { data: String, format: String },
    #[serde(rename = "SERIAL_PRINTLN")]
    SerialPrintln { data: String, format: String },
    #[serde(rename = "VAR_SET")]
    VarSet { name: String, value: CommandValue },
    #[serde(rename = "VAR_GET")]
    VarGet { name: String, result: CommandValue },
    #[serde(rename = "IF_STATEMENT")]
    IfStatement { condition: bool, branch: String },
    #[serde(rename = "SWITCH_STATEMENT")]
    SwitchStatement { discriminant: CommandValue },
    #[serde(rename = "SWITCH_CASE")]
    SwitchCase {
        #[serde(rename = "caseValue", skip_serializing_if = "Option::is_none")]
        case_value: Option<CommandValue>,
        matched: bool,
    },
    #[serde(rename = "LOOP_LIMIT_REACHED")]
    LoopLimitReached { iteration: u32 },
    #[serde(rename = "ERROR")]
    Error { message: String, #[serde(rename = "errorType")] error_type: String },
}

/// A single emitted command: every command carries `{type, timestamp}`
/// plus the fields [`CommandKind`] adds (spec §6.3).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Command {
    pub timestamp: u64,
    #[serde(flatten)]
    pub kind: CommandKind,
}

fn is_false(b: &bool) -> bool {
    !*b
}
