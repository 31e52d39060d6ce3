//! Platform profiles (spec §4.5, §6.4): named, immutable bundles of macros,
//! pin tables, and library hints injected pre-parse.
//!
//! Grounded on the registry pattern `intern.rs` uses for its static string
//! table in the teacher: a `LazyLock`-backed table that ships two built-in
//! entries and lets a host register more at startup (§6.4 "extensible by
//! registering a new profile at startup").

use std::{
    collections::{HashMap, HashSet},
    sync::{LazyLock, RwLock},
};

/// A capability a pin may support, used to validate `pinMode`/`analogWrite`
/// style calls against the active profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PinCapability {
    Digital,
    Analog,
    Pwm,
    Interrupt,
}

/// An immutable, named bundle of preprocessor macros, pin bindings, and
/// pin capabilities (spec §4.5).
#[derive(Debug, Clone)]
pub struct PlatformProfile {
    pub name: String,
    pub defines: HashMap<String, String>,
    pub pins: HashMap<String, i64>,
    pub pin_capabilities: HashMap<i64, HashSet<PinCapability>>,
    pub library_hints: HashSet<String>,
}

/// The two profiles spec §4.5 requires plus the registry hosts may extend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    ArduinoUno,
    Esp32Nano,
}

impl Platform {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::ArduinoUno => "ARDUINO_UNO",
            Self::Esp32Nano => "ESP32_NANO",
        }
    }
}

fn uno_profile() -> PlatformProfile {
    let mut defines = HashMap::new();
    defines.insert("ARDUINO".to_owned(), "100".to_owned());
    defines.insert("ARDUINO_AVR_UNO".to_owned(), "1".to_owned());
    defines.insert("__AVR_ATmega328P__".to_owned(), "1".to_owned());
    defines.insert("F_CPU".to_owned(), "16000000L".to_owned());
    defines.insert("HIGH".to_owned(), "1".to_owned());
    defines.insert("LOW".to_owned(), "0".to_owned());
    defines.insert("INPUT".to_owned(), "0".to_owned());
    defines.insert("OUTPUT".to_owned(), "1".to_owned());
    defines.insert("INPUT_PULLUP".to_owned(), "2".to_owned());
    defines.insert("LED_BUILTIN".to_owned(), "13".to_owned());

    let mut pins = HashMap::new();
    pins.insert("LED_BUILTIN".to_owned(), 13);
    let mut caps = HashMap::new();
    for d in 0..=13 {
        let mut set = HashSet::from([PinCapability::Digital]);
        if matches!(d, 3 | 5 | 6 | 9 | 10 | 11) {
            set.insert(PinCapability::Pwm);
        }
        if matches!(d, 2 | 3) {
            set.insert(PinCapability::Interrupt);
        }
        caps.insert(d, set);
    }
    for (idx, name) in ["A0", "A1", "A2", "A3", "A4", "A5"].iter().enumerate() {
        let pin = 14 + i64::try_from(idx).unwrap();
        pins.insert((*name).to_owned(), pin);
        defines.insert((*name).to_owned(), pin.to_string());
        caps.insert(pin, HashSet::from([PinCapability::Digital, PinCapability::Analog]));
    }

    PlatformProfile {
        name: Platform::ArduinoUno.name().to_owned(),
        defines,
        pins,
        pin_capabilities: caps,
        library_hints: HashSet::from(["Wire".to_owned(), "SPI".to_owned(), "Servo".to_owned(), "EEPROM".to_owned()]),
    }
}

fn esp32_nano_profile() -> PlatformProfile {
    let mut defines = HashMap::new();
    defines.insert("ARDUINO".to_owned(), "10812".to_owned());
    defines.insert("ESP32".to_owned(), "1".to_owned());
    defines.insert("ARDUINO_ARCH_ESP32".to_owned(), "1".to_owned());
    defines.insert("HIGH".to_owned(), "1".to_owned());
    defines.insert("LOW".to_owned(), "0".to_owned());
    defines.insert("INPUT".to_owned(), "0x01".to_owned());
    defines.insert("OUTPUT".to_owned(), "0x03".to_owned());
    defines.insert("INPUT_PULLUP".to_owned(), "0x05".to_owned());
    defines.insert("LED_BUILTIN".to_owned(), "2".to_owned());

    let mut pins = HashMap::new();
    pins.insert("LED_BUILTIN".to_owned(), 2);
    let mut caps = HashMap::new();
    for d in 0..=39 {
        let mut set = HashSet::from([PinCapability::Digital]);
        if !matches!(d, 34..=39) {
            set.insert(PinCapability::Pwm);
        }
        if matches!(d, 32..=39) {
            set.insert(PinCapability::Analog);
        }
        caps.insert(d, set);
    }
    for (idx, name) in ["A0", "A1", "A2", "A3", "A4", "A5"].iter().enumerate() {
        let pin = 32 + i64::try_from(idx).unwrap();
        pins.insert((*name).to_owned(), pin);
        defines.insert((*name).to_owned(), pin.to_string());
    }

    PlatformProfile {
        name: Platform::Esp32Nano.name().to_owned(),
        defines,
        pins,
        pin_capabilities: caps,
        library_hints: HashSet::from([
            "Wire".to_owned(),
            "SPI".to_owned(),
            "Servo".to_owned(),
            "EEPROM".to_owned(),
            "WiFi".to_owned(),
        ]),
    }
}

static REGISTRY: LazyLock<RwLock<HashMap<String, PlatformProfile>>> = LazyLock::new(|| {
    let mut map = HashMap::new();
    map.insert(Platform::ArduinoUno.name().to_owned(), uno_profile());
    map.insert(Platform::Esp32Nano.name().to_owned(), esp32_nano_profile());
    RwLock::new(map)
});

impl PlatformProfile {
    /// Looks up a built-in or previously [`PlatformProfile::register`]ed
    /// profile by name.
    #[must_use]
    pub fn get(name: &str) -> Option<PlatformProfile> {
        REGISTRY.read().expect("platform registry poisoned").get(name).cloned()
    }

    #[must_use]
    pub fn for_platform(platform: Platform) -> PlatformProfile {
        Self::get(platform.name()).expect("built-in platform profile always registered")
    }

    /// Registers a new profile at startup (spec §6.4: "extensible by
    /// registering a new platform at startup"). Overwrites any existing
    /// profile with the same name.
    pub fn register(profile: PlatformProfile) {
        REGISTRY
            .write()
            .expect("platform registry poisoned")
            .insert(profile.name.clone(), profile);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uno_has_led_builtin_pin_13() {
        let p = PlatformProfile::for_platform(Platform::ArduinoUno);
        assert_eq!(p.pins.get("LED_BUILTIN"), Some(&13));
    }

    #[test]
    fn esp32_has_more_pins_than_uno() {
        let uno = PlatformProfile::for_platform(Platform::ArduinoUno);
        let esp = PlatformProfile::for_platform(Platform::Esp32Nano);
        assert!(esp.pin_capabilities.len() > uno.pin_capabilities.len());
    }

    #[test]
    fn custom_profile_registers_and_resolves() {
        let mut defines = HashMap::new();
        defines.insert("CUSTOM".to_owned(), "1".to_owned());
        PlatformProfile::register(PlatformProfile {
            name: "TEST_BOARD".to_owned(),
            defines,
            pins: HashMap::new(),
            pin_capabilities: HashMap::new(),
            library_hints: HashSet::new(),
        });
        assert!(PlatformProfile::get("TEST_BOARD").is_some());
    }
}
