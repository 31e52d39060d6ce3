//! The library registry (spec §4.7.5): a compile-time table of supported
//! Arduino libraries and their method routing.
//!
//! SPEC_FULL.md §14 generalizes the "compile-time registered table" into a
//! [`LibraryDescriptor`] trait so a host embedding this crate can add more
//! libraries without forking it — the table itself stays compile-time
//! registered (built with [`Registry::with_builtins`]); nothing here loads
//! code at runtime, so this does not reach for the "dynamically linkable
//! plugin ABI" spec §1 rules out.

use std::collections::HashMap;

use crate::value::Value;

/// Whether a library method can be computed locally or needs the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodKind {
    Computable,
    External,
}

/// One method a library instance (or the library's static surface)
/// exposes.
#[derive(Debug, Clone)]
pub struct MethodSignature {
    pub name: String,
    pub kind: MethodKind,
}

/// A registered library: its class name(s), instance methods, and a
/// factory invoked on `new Library(...)`/bare constructor-call syntax
/// (spec §4.7.5 "a factory that creates an opaque instance id").
pub trait LibraryDescriptor {
    /// The class name(s) this descriptor answers to (`Serial` also answers
    /// to `Serial1`, `Serial2`, ... via [`Registry::register_alias`]).
    fn class_name(&self) -> &str;

    fn methods(&self) -> &[MethodSignature];

    fn method_kind(&self, method: &str) -> Option<MethodKind> {
        self.methods().iter().find(|m| m.name == method).map(|m| m.kind)
    }
}

macro_rules! library_descriptor {
    ($ty:ident, $class:literal, [$(($name:literal, $kind:expr)),* $(,)?]) => {
        pub struct $ty {
            methods: Vec<MethodSignature>,
        }
        impl Default for $ty {
            fn default() -> Self {
                Self {
                    methods: vec![$(MethodSignature { name: $name.to_owned(), kind: $kind }),*],
                }
            }
        }
        impl LibraryDescriptor for $ty {
            fn class_name(&self) -> &str {
                $class
            }
            fn methods(&self) -> &[MethodSignature] {
                &self.methods
            }
        }
    };
}

use MethodKind::{Computable, External};

library_descriptor!(
    SerialLibrary,
    "Serial",
    [
        ("begin", External),
        ("print", External),
        ("println", External),
        ("write", External),
        ("available", External),
        ("read", External),
        ("readString", External),
        ("flush", External),
    ]
);

library_descriptor!(
    NeoPixelLibrary,
    "Adafruit_NeoPixel",
    [
        ("begin", External),
        ("show", External),
        ("setPixelColor", External),
        ("setBrightness", External),
        ("getPixelColor", Computable),
        ("numPixels", Computable),
        ("Color", Computable),
    ]
);

library_descriptor!(
    ServoLibrary,
    "Servo",
    [("attach", External), ("write", External), ("writeMicroseconds", External), ("read", External), ("detach", External)]
);

library_descriptor!(
    WireLibrary,
    "Wire",
    [
        ("begin", External),
        ("beginTransmission", External),
        ("endTransmission", External),
        ("write", External),
        ("requestFrom", External),
        ("available", External),
        ("read", External),
    ]
);

library_descriptor!(SpiLibrary, "SPI", [("begin", External), ("transfer", External), ("beginTransaction", External), ("endTransaction", External)]);

library_descriptor!(EepromLibrary, "EEPROM", [("read", External), ("write", External), ("update", External), ("length", Computable)]);

library_descriptor!(
    LcdLibrary,
    "LiquidCrystal",
    [
        ("begin", External),
        ("print", External),
        ("setCursor", External),
        ("clear", External),
        ("write", External),
        ("cursor", External),
        ("noCursor", External),
    ]
);

/// Opaque, library-owned instance state. The interpreter's `Value::Object`
/// is a non-owning `{library, instance_id}` handle into this table (spec
/// §3.3, §3.7 "object instances are owned by the library registry").
#[derive(Debug, Clone, Default)]
pub struct InstanceState {
    pub fields: HashMap<String, Value>,
}

/// The compile-time registered table (spec §4.7.5) plus the runtime
/// instance map it owns.
pub struct Registry {
    descriptors: HashMap<String, Box<dyn LibraryDescriptor>>,
    aliases: HashMap<String, String>,
    instances: HashMap<u64, InstanceState>,
    next_instance_id: u64,
}

impl Registry {
    /// Builds the registry with every built-in library (spec §4.7.5
    /// "Known libraries: Serial/Serial1/..., NeoPixel-like ..., Servo,
    /// Wire (I2C), SPI, EEPROM, LCD").
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut reg = Self {
            descriptors: HashMap::new(),
            aliases: HashMap::new(),
            instances: HashMap::new(),
            next_instance_id: 1,
        };
        reg.register(SerialLibrary::default());
        reg.register_alias("Serial", "Serial1");
        reg.register_alias("Serial", "Serial2");
        reg.register_alias("Serial", "Serial3");
        reg.register(NeoPixelLibrary::default());
        reg.register_alias("Adafruit_NeoPixel", "NeoPixel");
        reg.register(ServoLibrary::default());
        reg.register(WireLibrary::default());
        reg.register(SpiLibrary::default());
        reg.register(EepromLibrary::default());
        reg.register(LcdLibrary::default());
        reg.register_alias("LiquidCrystal", "LCD");
        reg
    }

    /// Registers a new library descriptor, letting a host embedding this
    /// crate extend the table without forking it (SPEC_FULL.md §14).
    pub fn register(&mut self, descriptor: impl LibraryDescriptor + 'static) {
        self.descriptors.insert(descriptor.class_name().to_owned(), Box::new(descriptor));
    }

    pub fn register_alias(&mut self, canonical: &str, alias: &str) {
        self.aliases.insert(alias.to_owned(), canonical.to_owned());
    }

    #[must_use]
    pub fn resolve(&self, class_name: &str) -> Option<&dyn LibraryDescriptor> {
        let canonical = self.aliases.get(class_name).map_or(class_name, String::as_str);
        self.descriptors.get(canonical).map(|b| b.as_ref())
    }

    #[must_use]
    pub fn is_known_library(&self, class_name: &str) -> bool {
        self.resolve(class_name).is_some()
    }

    /// Creates a new opaque instance and returns its id (spec §4.7.5's
    /// constructor factory).
    pub fn instantiate(&mut self) -> u64 {
        let id = self.next_instance_id;
        self.next_instance_id += 1;
        self.instances.insert(id, InstanceState::default());
        id
    }

    #[must_use]
    pub fn instance(&self, id: u64) -> Option<&InstanceState> {
        self.instances.get(&id)
    }

    pub fn instance_mut(&mut self, id: u64) -> Option<&mut InstanceState> {
        self.instances.get_mut(&id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_builtins_and_aliases() {
        let reg = Registry::with_builtins();
        assert!(reg.is_known_library("Serial"));
        assert!(reg.is_known_library("Serial1"));
        assert!(reg.is_known_library("NeoPixel"));
        assert!(!reg.is_known_library("Bluetooth"));
    }

    #[test]
    fn method_kind_lookup() {
        let reg = Registry::with_builtins();
        let serial = reg.resolve("Serial").unwrap();
        assert_eq!(serial.method_kind("println"), Some(MethodKind::External));
        assert_eq!(serial.method_kind("nonexistent"), None);
    }

    #[test]
    fn instantiate_assigns_increasing_ids() {
        let mut reg = Registry::with_builtins();
        let a = reg.instantiate();
        let b = reg.instantiate();
        assert_ne!(a, b);
        assert!(reg.instance(a).is_some());
    }

    #[test]
    fn host_can_register_additional_library() {
        library_descriptor!(BluetoothLibrary, "Bluetooth", [("begin", MethodKind::External)]);
        let mut reg = Registry::with_builtins();
        reg.register(BluetoothLibrary::default());
        assert!(reg.is_known_library("Bluetooth"));
    }
}
