//! Output module command generators
//!
//! Each generator is bound to one channel and turns high level calls into
//! `s <channel> <values>` updates through a [`ModuleSink`].

use super::segment::{encode_segments, format_number, SegmentBuffer};
use crate::core::error::DockError;
use std::sync::Arc;

/// Motor speed range is `-MOTOR_SPEED_LIMIT..=MOTOR_SPEED_LIMIT`
pub const MOTOR_SPEED_LIMIT: i32 = 63;

const MATRIX_SIZE: usize = 8;
const RAINBOW_PIXELS: usize = 5;
const DEFAULT_BRIGHTNESS: u8 = 128;

/// Something that can push values to a dock channel
pub trait ModuleSink {
    /// Send `values` to `channel`
    fn update_module(&self, channel: u8, values: &[i32]) -> Result<(), DockError>;
}

impl<T: ModuleSink + ?Sized> ModuleSink for Arc<T> {
    fn update_module(&self, channel: u8, values: &[i32]) -> Result<(), DockError> {
        (**self).update_module(channel, values)
    }
}

impl<T: ModuleSink + ?Sized> ModuleSink for &T {
    fn update_module(&self, channel: u8, values: &[i32]) -> Result<(), DockError> {
        (**self).update_module(channel, values)
    }
}

/// DC motor
#[derive(Debug, Clone)]
pub struct Motor<S> {
    sink: S,
    channel: u8,
}

impl<S: ModuleSink> Motor<S> {
    /// Bind a motor on `channel`
    pub fn new(sink: S, channel: u8) -> Self {
        Self { sink, channel }
    }

    /// Set the speed, clamped to the motor range. Returns the speed sent.
    pub fn set_speed(&self, speed: i32) -> Result<i32, DockError> {
        let speed = speed.clamp(-MOTOR_SPEED_LIMIT, MOTOR_SPEED_LIMIT);
        self.sink.update_module(self.channel, &[speed])?;
        Ok(speed)
    }

    /// Stop the motor
    pub fn stop(&self) -> Result<(), DockError> {
        self.set_speed(0).map(|_| ())
    }
}

/// Four digit seven-segment display
#[derive(Debug, Clone)]
pub struct NumberDisplay<S> {
    sink: S,
    channel: u8,
    buffer: SegmentBuffer,
}

impl<S: ModuleSink> NumberDisplay<S> {
    /// Bind a display on `channel`
    pub fn new(sink: S, channel: u8) -> Self {
        Self {
            sink,
            channel,
            buffer: SegmentBuffer::default(),
        }
    }

    /// Current buffer contents
    pub fn buffer(&self) -> &SegmentBuffer {
        &self.buffer
    }

    /// Put text in the buffer
    pub fn set_text(&mut self, text: &str) {
        encode_segments(text, &mut self.buffer);
    }

    /// Put a formatted number in the buffer
    pub fn set_number(&mut self, value: f64, decimals: u8, pad: char) {
        let text = format_number(value, decimals, pad);
        self.set_text(&text);
    }

    /// Set brightness
    pub fn set_brightness(&mut self, brightness: u8) {
        self.buffer.brightness = brightness;
    }

    /// Blank every digit and flag
    pub fn clear(&mut self) {
        self.buffer = SegmentBuffer {
            brightness: self.buffer.brightness,
            ..SegmentBuffer::default()
        };
    }

    /// Send the buffer to the display
    pub fn show(&self) -> Result<(), DockError> {
        self.sink.update_module(self.channel, &self.buffer.values())
    }
}

/// 8x8 LED matrix
#[derive(Debug, Clone)]
pub struct Matrix<S> {
    sink: S,
    channel: u8,
    columns: [u8; MATRIX_SIZE],
    brightness: u8,
}

impl<S: ModuleSink> Matrix<S> {
    /// Bind a matrix on `channel`
    pub fn new(sink: S, channel: u8) -> Self {
        Self {
            sink,
            channel,
            columns: [0; MATRIX_SIZE],
            brightness: DEFAULT_BRIGHTNESS,
        }
    }

    /// Light or clear one pixel. Coordinates outside the grid are ignored.
    pub fn set_pixel(&mut self, x: usize, y: usize, on: bool) -> bool {
        if x >= MATRIX_SIZE || y >= MATRIX_SIZE {
            return false;
        }
        // Columns are wired right to left
        let column = &mut self.columns[MATRIX_SIZE - 1 - x];
        if on {
            *column |= 1 << y;
        } else {
            *column &= !(1 << y);
        }
        true
    }

    /// Set brightness, masked to 0-255
    pub fn set_brightness(&mut self, brightness: u32) {
        self.brightness = (brightness & 0xff) as u8;
    }

    /// Clear every pixel
    pub fn clear(&mut self) {
        self.columns = [0; MATRIX_SIZE];
    }

    /// Column bytes followed by brightness
    pub fn values(&self) -> Vec<i32> {
        self.columns
            .iter()
            .chain(std::iter::once(&self.brightness))
            .map(|v| i32::from(*v))
            .collect()
    }

    /// Send the frame to the matrix
    pub fn show(&self) -> Result<(), DockError> {
        self.sink.update_module(self.channel, &self.values())
    }
}

/// Strip of five RGB LEDs
#[derive(Debug, Clone)]
pub struct Rainbow<S> {
    sink: S,
    channel: u8,
    pixels: [[u8; 3]; RAINBOW_PIXELS],
}

impl<S: ModuleSink> Rainbow<S> {
    /// Bind a rainbow on `channel`
    pub fn new(sink: S, channel: u8) -> Self {
        Self {
            sink,
            channel,
            pixels: [[0; 3]; RAINBOW_PIXELS],
        }
    }

    /// Set one LED. Returns false for an index past the strip.
    pub fn set_pixel(&mut self, index: usize, red: u8, green: u8, blue: u8) -> bool {
        match self.pixels.get_mut(index) {
            Some(pixel) => {
                *pixel = [red, green, blue];
                true
            }
            None => false,
        }
    }

    /// Set every LED
    pub fn set_all(&mut self, red: u8, green: u8, blue: u8) {
        self.pixels = [[red, green, blue]; RAINBOW_PIXELS];
    }

    /// Turn every LED off
    pub fn clear(&mut self) {
        self.set_all(0, 0, 0);
    }

    /// Send the colours to the strip
    pub fn show(&self) -> Result<(), DockError> {
        let values: Vec<i32> = self.pixels.iter().flatten().map(|v| i32::from(*v)).collect();
        self.sink.update_module(self.channel, &values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        sent: Mutex<Vec<(u8, Vec<i32>)>>,
    }

    impl ModuleSink for Recorder {
        fn update_module(&self, channel: u8, values: &[i32]) -> Result<(), DockError> {
            self.sent.lock().push((channel, values.to_vec()));
            Ok(())
        }
    }

    impl Recorder {
        fn last(&self) -> (u8, Vec<i32>) {
            self.sent.lock().last().cloned().unwrap()
        }
    }

    struct Offline;

    impl ModuleSink for Offline {
        fn update_module(&self, _channel: u8, _values: &[i32]) -> Result<(), DockError> {
            Err(DockError::NotIdentified)
        }
    }

    #[test]
    fn motor_speed_is_clamped() {
        let recorder = Recorder::default();
        let motor = Motor::new(&recorder, 5);
        assert_eq!(motor.set_speed(100).unwrap(), 63);
        assert_eq!(recorder.last(), (5, vec![63]));
        assert_eq!(motor.set_speed(-80).unwrap(), -63);
        motor.stop().unwrap();
        assert_eq!(recorder.last(), (5, vec![0]));
    }

    #[test]
    fn number_display_sends_seven_values() {
        let recorder = Arc::new(Recorder::default());
        let mut display = NumberDisplay::new(recorder.clone(), 2);
        display.set_text("12:34");
        display.set_brightness(40);
        display.show().unwrap();
        assert_eq!(recorder.last(), (2, vec![0x60, 0xDA, 0xF2, 0x66, 1, 0, 40]));

        display.clear();
        assert_eq!(display.buffer().digits, [0; 4]);
        assert_eq!(display.buffer().brightness, 40);
    }

    #[test]
    fn matrix_pixels_map_to_reversed_columns() {
        let recorder = Recorder::default();
        let mut matrix = Matrix::new(&recorder, 1);
        assert!(matrix.set_pixel(0, 0, true));
        assert!(matrix.set_pixel(7, 3, true));
        assert!(!matrix.set_pixel(8, 0, true));
        matrix.set_brightness(0x1ff);
        matrix.show().unwrap();
        assert_eq!(recorder.last(), (1, vec![8, 0, 0, 0, 0, 0, 0, 1, 255]));

        matrix.set_pixel(0, 0, false);
        assert_eq!(matrix.values()[7], 0);
    }

    #[test]
    fn rainbow_flattens_pixels() {
        let recorder = Recorder::default();
        let mut rainbow = Rainbow::new(&recorder, 8);
        rainbow.set_all(1, 2, 3);
        assert!(rainbow.set_pixel(4, 255, 0, 0));
        assert!(!rainbow.set_pixel(5, 0, 0, 0));
        rainbow.show().unwrap();
        let (channel, values) = recorder.last();
        assert_eq!(channel, 8);
        assert_eq!(values.len(), 15);
        assert_eq!(&values[..3], &[1, 2, 3]);
        assert_eq!(&values[12..], &[255, 0, 0]);
    }

    #[test]
    fn sink_errors_propagate() {
        let motor = Motor::new(Offline, 1);
        assert_eq!(motor.set_speed(10), Err(DockError::NotIdentified));
    }
}
