//! Module catalogue and reading decoders
//!
//! Each input module reports positional integer tokens. A static table maps
//! the module type to a decoder producing named, scaled fields. Module types
//! without a decoder keep their raw tokens.

mod output;
mod segment;

pub use output::{Matrix, ModuleSink, Motor, NumberDisplay, Rainbow, MOTOR_SPEED_LIMIT};
pub use segment::{encode_segments, format_number, SegmentBuffer};

use crate::core::codec::CommandRecord;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Channels on a dock
pub const SLOT_COUNT: usize = 8;

/// Kind of module attached to a channel
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ModuleType {
    /// RGB colour sensor
    Colour,
    /// Accelerometer and magnetometer
    Motion,
    /// Light sensor
    Light,
    /// Rotary dial
    Dial,
    /// Linear slider
    Slider,
    /// Two-axis joystick with button
    Joystick,
    /// Temperature and pressure sensor
    Weather,
    /// Four touch buttons
    Touch,
    /// DC motor (output)
    Motor,
    /// Seven-segment display (output)
    Number,
    /// 8x8 LED matrix (output)
    Matrix,
    /// Five RGB LEDs (output)
    Rainbow,
    /// Anything else, kept by name
    Unknown(String),
}

impl ModuleType {
    /// Look up a module type by its wire name
    pub fn from_name(name: &str) -> Self {
        match name {
            "colour" => Self::Colour,
            "motion" => Self::Motion,
            "light" => Self::Light,
            "dial" => Self::Dial,
            "slider" => Self::Slider,
            "joystick" => Self::Joystick,
            "weather" => Self::Weather,
            "touch" => Self::Touch,
            "motor" => Self::Motor,
            "number" => Self::Number,
            "matrix" => Self::Matrix,
            "rainbow" => Self::Rainbow,
            other => Self::Unknown(other.to_string()),
        }
    }

    /// Wire name
    pub fn name(&self) -> &str {
        match self {
            Self::Colour => "colour",
            Self::Motion => "motion",
            Self::Light => "light",
            Self::Dial => "dial",
            Self::Slider => "slider",
            Self::Joystick => "joystick",
            Self::Weather => "weather",
            Self::Touch => "touch",
            Self::Motor => "motor",
            Self::Number => "number",
            Self::Matrix => "matrix",
            Self::Rainbow => "rainbow",
            Self::Unknown(name) => name,
        }
    }
}

impl fmt::Display for ModuleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl From<String> for ModuleType {
    fn from(name: String) -> Self {
        Self::from_name(&name)
    }
}

impl From<ModuleType> for String {
    fn from(module: ModuleType) -> Self {
        module.name().to_string()
    }
}

/// Three-axis vector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Axes {
    /// X axis
    pub x: i32,
    /// Y axis
    pub y: i32,
    /// Z axis
    pub z: i32,
}

/// Decoded fields of a module reading
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ModuleFields {
    /// Colour normalised against the clear channel
    Colour {
        /// Red, 0-255
        red: i32,
        /// Green, 0-255
        green: i32,
        /// Blue, 0-255
        blue: i32,
        /// Raw clear channel
        clear: i32,
    },
    /// Raw accelerometer and magnetometer axes
    Motion {
        /// Accelerometer
        accelerometer: Axes,
        /// Magnetometer
        magnetometer: Axes,
    },
    /// Light levels
    Light {
        /// Visible light
        visible: i32,
        /// Infrared
        ir: i32,
        /// Illuminance
        lux: i32,
    },
    /// Dial or slider position
    Position {
        /// Position
        position: i32,
    },
    /// Joystick axes and button
    Joystick {
        /// X axis
        x: i32,
        /// Y axis
        y: i32,
        /// Button pressed
        button: bool,
    },
    /// Temperature in °C and pressure in kPa
    Weather {
        /// Temperature
        temperature: f64,
        /// Pressure
        pressure: f64,
    },
    /// Touch button states
    Touch {
        /// Buttons 1-4
        buttons: [bool; 4],
    },
    /// Undecoded positional tokens
    Raw(Vec<String>),
}

/// Latest known state of one channel
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModuleReading {
    /// Channel, 1-indexed
    pub channel: u8,
    /// Module type
    pub module_type: ModuleType,
    /// Decoded fields
    pub fields: ModuleFields,
}

impl ModuleReading {
    /// Decode a command record. `None` when the channel is invalid or the
    /// arguments are too short for the module's decoder.
    pub fn from_record(record: &CommandRecord) -> Option<Self> {
        let channel = record.slot_index()? + 1;
        let module_type = ModuleType::from_name(&record.module);
        let fields = decode(&module_type, &record.args)?;
        Some(Self {
            channel: channel as u8,
            module_type,
            fields,
        })
    }

    /// Keep the record's tokens undecoded. `None` when the channel is invalid.
    pub fn raw_from_record(record: &CommandRecord) -> Option<Self> {
        let channel = record.slot_index()? + 1;
        Some(Self {
            channel: channel as u8,
            module_type: ModuleType::from_name(&record.module),
            fields: ModuleFields::Raw(record.args.clone()),
        })
    }
}

/// First occupied slot holding `module_type`, scanning slots in order
pub fn first_of_type<'a>(
    slots: &'a [Option<ModuleReading>],
    module_type: &ModuleType,
) -> Option<&'a ModuleReading> {
    slots
        .iter()
        .flatten()
        .find(|reading| &reading.module_type == module_type)
}

type DecodeFn = fn(&[String]) -> ModuleFields;

/// Decoder and minimum argument count for each decodable module type
fn decoder_for(module_type: &ModuleType) -> Option<(usize, DecodeFn)> {
    match module_type {
        ModuleType::Colour => Some((4, decode_colour as DecodeFn)),
        ModuleType::Motion => Some((6, decode_motion as DecodeFn)),
        ModuleType::Light => Some((3, decode_light as DecodeFn)),
        ModuleType::Dial | ModuleType::Slider => Some((1, decode_position as DecodeFn)),
        ModuleType::Joystick => Some((3, decode_joystick as DecodeFn)),
        ModuleType::Weather => Some((2, decode_weather as DecodeFn)),
        ModuleType::Touch => Some((4, decode_touch as DecodeFn)),
        _ => None,
    }
}

/// Decode positional arguments for `module_type`.
///
/// Types without a decoder pass their tokens through as
/// [`ModuleFields::Raw`]. Returns `None` when there are fewer tokens than
/// the decoder needs.
pub fn decode(module_type: &ModuleType, args: &[String]) -> Option<ModuleFields> {
    match decoder_for(module_type) {
        Some((needed, decoder)) if args.len() >= needed => Some(decoder(args)),
        Some(_) => None,
        None => Some(ModuleFields::Raw(args.to_vec())),
    }
}

/// Malformed tokens read as 0
fn int(token: &str) -> i32 {
    token.trim().parse().unwrap_or(0)
}

fn decode_colour(args: &[String]) -> ModuleFields {
    let clear = int(&args[3]);
    let scale = |raw: &str| {
        if clear == 0 {
            0
        } else {
            (f64::from(int(raw)) * 255.0 / f64::from(clear)).round() as i32
        }
    };
    ModuleFields::Colour {
        red: scale(&args[0]),
        green: scale(&args[1]),
        blue: scale(&args[2]),
        clear,
    }
}

fn decode_motion(args: &[String]) -> ModuleFields {
    let axes = |a: &[String]| Axes {
        x: int(&a[0]),
        y: int(&a[1]),
        z: int(&a[2]),
    };
    ModuleFields::Motion {
        accelerometer: axes(&args[0..3]),
        magnetometer: axes(&args[3..6]),
    }
}

fn decode_light(args: &[String]) -> ModuleFields {
    ModuleFields::Light {
        visible: int(&args[0]),
        ir: int(&args[1]),
        lux: int(&args[2]),
    }
}

fn decode_position(args: &[String]) -> ModuleFields {
    ModuleFields::Position {
        position: int(&args[0]),
    }
}

fn decode_joystick(args: &[String]) -> ModuleFields {
    ModuleFields::Joystick {
        x: int(&args[1]),
        y: int(&args[2]),
        button: int(&args[0]) != 0,
    }
}

fn decode_weather(args: &[String]) -> ModuleFields {
    ModuleFields::Weather {
        temperature: f64::from(int(&args[0])) / 100.0,
        pressure: f64::from(int(&args[1])) / 1000.0,
    }
}

fn decode_touch(args: &[String]) -> ModuleFields {
    ModuleFields::Touch {
        buttons: [0usize, 1, 2, 3].map(|i| int(&args[i]) != 0),
    }
}
