//! Raw ADC → percent conversion and the `[frontend]` config section.

use serde::Deserialize;

/// Maximum single-ended reading from the ADS1115 (15-bit unsigned).
pub const ADS1115_MAX: i64 = 32767;

/// Full-scale voltage at PGA ±4.096 V.
const ADS1115_FULL_SCALE_V: f64 = 4.096;

/// BCM GPIO pins usable on the 40-pin header (0-1 are the ID EEPROM).
pub const VALID_GPIO_PINS: std::ops::RangeInclusive<u8> = 2..=27;

// ---------------------------------------------------------------------------
// Config section
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct FrontendConfig {
    /// I2C address of the ADS1115 (0x48 with ADDR tied to GND).
    pub i2c_address: u16,
    /// BCM pins driving the multiplexer S0..S3 lines.
    pub mux_select_pins: [u8; 4],
    /// ADS1115 input wired to the multiplexer common output.
    pub moisture_channel: usize,
    pub water_level_channel: usize,
    pub ambient_light_channel: usize,
    pub moisture: MoistureCalibration,
    pub water_level: WaterLevelCalibration,
    pub ambient_light: LightCalibration,
}

/// Capacitive soil probe: raw reading in dry air and fully submerged.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct MoistureCalibration {
    pub raw_dry: i64,
    pub raw_wet: i64,
}

/// Reservoir probe: `percent = coefficient * volts^exponent`.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct WaterLevelCalibration {
    pub coefficient: f64,
    pub exponent: f64,
}

/// Photoresistor divider: raw reading in darkness and in full sun.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct LightCalibration {
    pub raw_dark: i64,
    pub raw_bright: i64,
}

impl FrontendConfig {
    /// Append every violation found to `errors`.
    pub fn validate(&self, errors: &mut Vec<String>) {
        if !(0x48..=0x4b).contains(&self.i2c_address) {
            errors.push(format!(
                "frontend: i2c_address {:#04x} is not an ADS1115 address (0x48-0x4b)",
                self.i2c_address
            ));
        }

        for pin in self.mux_select_pins {
            if !VALID_GPIO_PINS.contains(&pin) {
                errors.push(format!(
                    "frontend: mux select pin {pin} is not a valid BCM GPIO pin (allowed: 2-27)"
                ));
            }
        }
        let mut pins = self.mux_select_pins.to_vec();
        pins.sort_unstable();
        pins.dedup();
        if pins.len() != self.mux_select_pins.len() {
            errors.push("frontend: mux_select_pins must be four distinct pins".to_string());
        }

        let channels = [
            ("moisture_channel", self.moisture_channel),
            ("water_level_channel", self.water_level_channel),
            ("ambient_light_channel", self.ambient_light_channel),
        ];
        for (name, ch) in channels {
            if ch > 3 {
                errors.push(format!("frontend: {name} {ch} out of ADS1115 range (0-3)"));
            }
        }
        if self.moisture_channel == self.water_level_channel
            || self.moisture_channel == self.ambient_light_channel
            || self.water_level_channel == self.ambient_light_channel
        {
            errors.push("frontend: ADS1115 channels must be distinct".to_string());
        }

        for (name, raw) in [
            ("moisture.raw_dry", self.moisture.raw_dry),
            ("moisture.raw_wet", self.moisture.raw_wet),
            ("ambient_light.raw_dark", self.ambient_light.raw_dark),
            ("ambient_light.raw_bright", self.ambient_light.raw_bright),
        ] {
            if !(0..=ADS1115_MAX).contains(&raw) {
                errors.push(format!(
                    "frontend: {name} {raw} out of ADS1115 range [0, {ADS1115_MAX}]"
                ));
            }
        }
        if self.moisture.raw_dry == self.moisture.raw_wet {
            errors.push(format!(
                "frontend: moisture raw_dry and raw_wet are both {}; calibration range is zero",
                self.moisture.raw_dry
            ));
        }
        if self.ambient_light.raw_dark == self.ambient_light.raw_bright {
            errors.push(format!(
                "frontend: ambient_light raw_dark and raw_bright are both {}; calibration range is zero",
                self.ambient_light.raw_dark
            ));
        }

        if self.water_level.coefficient <= 0.0 {
            errors.push(format!(
                "frontend: water_level.coefficient must be positive, got {}",
                self.water_level.coefficient
            ));
        }
        if self.water_level.exponent <= 0.0 {
            errors.push(format!(
                "frontend: water_level.exponent must be positive, got {}",
                self.water_level.exponent
            ));
        }
    }
}

// ---------------------------------------------------------------------------
// Conversions
// ---------------------------------------------------------------------------

/// Linear interpolation of `raw` between two endpoints, clamped to 0..=100.
fn linear_percent(raw: i64, at_zero: i64, at_full: i64) -> f64 {
    let range = at_full - at_zero;
    if range == 0 {
        return 0.0;
    }
    let p = (raw - at_zero) as f64 / range as f64 * 100.0;
    p.clamp(0.0, 100.0)
}

impl MoistureCalibration {
    pub fn percent(&self, raw: i64) -> f64 {
        linear_percent(raw, self.raw_dry, self.raw_wet)
    }
}

impl LightCalibration {
    pub fn percent(&self, raw: i64) -> f64 {
        linear_percent(raw, self.raw_dark, self.raw_bright)
    }
}

impl WaterLevelCalibration {
    pub fn percent(&self, raw: i64) -> f64 {
        let volts = raw_to_volts(raw);
        (self.coefficient * volts.powf(self.exponent)).clamp(0.0, 100.0)
    }
}

/// Convert a single-ended ADS1115 reading to volts at PGA ±4.096 V.
pub fn raw_to_volts(raw: i64) -> f64 {
    raw.clamp(0, ADS1115_MAX) as f64 * ADS1115_FULL_SCALE_V / (ADS1115_MAX + 1) as f64
}

// ===========================================================================
// Tests
// ===========================================================================
