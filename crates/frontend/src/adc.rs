//! ADS1115 16-bit ADC over I2C, fed by a CD74HC4067 16:1 analog multiplexer.
//!
//! All sixteen soil probes share ADS1115 input `moisture_channel` through the
//! multiplexer; the reservoir probe and the photoresistor sit on their own
//! ADS1115 inputs. Reads are single-ended at PGA ±4.096 V, 128 SPS,
//! single-shot mode.

use rppal::gpio::{Gpio, OutputPin};
use rppal::i2c::I2c;
use std::{thread, time::Duration};

use crate::calibration::FrontendConfig;
use crate::{SensorPort, POSITION_COUNT};

// ── ADS1115 register addresses ──────────────────────────────────────────────

/// Conversion result register (read-only, 16-bit signed).
const REG_CONVERSION: u8 = 0x00;
/// Configuration register (read/write).
const REG_CONFIG: u8 = 0x01;

// ── Config register bit fields ──────────────────────────────────────────────
//
// Layout (MSB first):
//   [15]    OS       : write 1 to start single-shot conversion
//   [14:12] MUX      : input multiplexer (channel selection)
//   [11:9]  PGA      : programmable gain amplifier
//   [8]     MODE     : 0 = continuous, 1 = single-shot
//   [7:5]   DR       : data rate
//   [4]     COMP_MODE
//   [3]     COMP_POL
//   [2]     COMP_LAT
//   [1:0]   COMP_QUE : 11 = disable comparator (default)

/// OS=1 (start), PGA=001 (±4.096 V), MODE=1 (single-shot),
/// DR=100 (128 SPS), COMP_QUE=11 (comparator off).
const CONFIG_BASE: u16 = 0b1_000_001_1_100_0_0_0_11;

/// MUX values for single-ended reads (AINx vs GND).
const MUX_SHIFT: u8 = 12;
const MUX_SINGLE_ENDED: [u16; 4] = [0b100, 0b101, 0b110, 0b111];

/// Conversion time at 128 SPS is ~7.8 ms.
const CONVERSION_WAIT: Duration = Duration::from_millis(9);

/// Bit 15 of the config register: conversion-ready flag when read.
const OS_READY_BIT: u16 = 1 << 15;

/// Settling time after switching the analog multiplexer.
const MUX_SETTLE: Duration = Duration::from_micros(50);

/// Build the config register value for a single-ended read on `channel`.
fn config_for_channel(channel: usize) -> u16 {
    CONFIG_BASE | (MUX_SINGLE_ENDED[channel] << MUX_SHIFT)
}

/// Logic levels of the S0..S3 select lines for `position`, S0 first.
fn select_levels(position: usize) -> [bool; 4] {
    [
        position & 0b0001 != 0,
        position & 0b0010 != 0,
        position & 0b0100 != 0,
        position & 0b1000 != 0,
    ]
}

// ── Driver ──────────────────────────────────────────────────────────────────

/// Real sensor front end backed by `rppal` I2C and GPIO.
pub struct AnalogFrontEnd {
    i2c: I2c,
    select: [OutputPin; 4],
    cfg: FrontendConfig,
    /// Last good percentage per moisture position, returned on bus errors.
    last_moisture: [f64; POSITION_COUNT],
    last_water_level: f64,
    last_ambient_light: f64,
}

impl AnalogFrontEnd {
    /// Open I2C bus 1, address the ADS1115 and claim the mux select pins.
    pub fn new(cfg: FrontendConfig) -> anyhow::Result<Self> {
        let gpio = Gpio::new()?;
        let [s0, s1, s2, s3] = cfg.mux_select_pins;
        let select = [
            gpio.get(s0)?.into_output_low(),
            gpio.get(s1)?.into_output_low(),
            gpio.get(s2)?.into_output_low(),
            gpio.get(s3)?.into_output_low(),
        ];

        let mut i2c = I2c::new()?;
        i2c.set_slave_address(cfg.i2c_address)?;

        tracing::info!(
            addr = format_args!("0x{:02x}", cfg.i2c_address),
            mux_pins = ?cfg.mux_select_pins,
            "analog front end initialised"
        );

        Ok(Self {
            i2c,
            select,
            cfg,
            last_moisture: [0.0; POSITION_COUNT],
            last_water_level: 0.0,
            last_ambient_light: 0.0,
        })
    }

    fn select_position(&mut self, position: usize) {
        for (pin, high) in self.select.iter_mut().zip(select_levels(position)) {
            if high {
                pin.set_high();
            } else {
                pin.set_low();
            }
        }
        thread::sleep(MUX_SETTLE);
    }

    /// Perform a single-shot read on `channel`, returning the raw value
    /// clamped to the single-ended range.
    fn read_channel(&mut self, channel: usize) -> anyhow::Result<i64> {
        let config_bytes = config_for_channel(channel).to_be_bytes();
        self.i2c.block_write(REG_CONFIG, &config_bytes)?;

        thread::sleep(CONVERSION_WAIT);

        for _ in 0..3 {
            let mut buf = [0u8; 2];
            self.i2c.block_read(REG_CONFIG, &mut buf)?;
            if u16::from_be_bytes(buf) & OS_READY_BIT != 0 {
                break;
            }
            thread::sleep(Duration::from_millis(2));
        }

        let mut buf = [0u8; 2];
        self.i2c.block_read(REG_CONVERSION, &mut buf)?;
        Ok((i16::from_be_bytes(buf) as i64).clamp(0, crate::calibration::ADS1115_MAX))
    }
}

impl SensorPort for AnalogFrontEnd {
    fn read_moisture(&mut self, position: usize) -> f64 {
        self.select_position(position);
        match self.read_channel(self.cfg.moisture_channel) {
            Ok(raw) => {
                let pct = self.cfg.moisture.percent(raw);
                self.last_moisture[position] = pct;
                pct
            }
            Err(e) => {
                tracing::error!(position, "moisture read failed: {e}");
                self.last_moisture[position]
            }
        }
    }

    fn read_water_level(&mut self) -> f64 {
        match self.read_channel(self.cfg.water_level_channel) {
            Ok(raw) => {
                self.last_water_level = self.cfg.water_level.percent(raw);
                self.last_water_level
            }
            Err(e) => {
                tracing::error!("water level read failed: {e}");
                self.last_water_level
            }
        }
    }

    fn read_ambient_light(&mut self) -> f64 {
        match self.read_channel(self.cfg.ambient_light_channel) {
            Ok(raw) => {
                self.last_ambient_light = self.cfg.ambient_light.percent(raw);
                self.last_ambient_light
            }
            Err(e) => {
                tracing::error!("ambient light read failed: {e}");
                self.last_ambient_light
            }
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_register_channel_a0() {
        assert_eq!(config_for_channel(0), 0xC383);
    }

    #[test]
    fn config_register_channel_a3() {
        assert_eq!(config_for_channel(3), 0xF383);
    }

    #[test]
    fn config_base_is_single_shot_at_4v() {
        assert_eq!((CONFIG_BASE >> 9) & 0b111, 0b001);
        assert_eq!((CONFIG_BASE >> 8) & 1, 1);
    }

    #[test]
    fn select_levels_position_zero() {
        assert_eq!(select_levels(0), [false, false, false, false]);
    }

    #[test]
    fn select_levels_position_eleven() {
        // 11 = 0b1011 → S0=1, S1=1, S2=0, S3=1
        assert_eq!(select_levels(11), [true, true, false, true]);
    }

    #[test]
    fn select_levels_position_fifteen() {
        assert_eq!(select_levels(15), [true, true, true, true]);
    }
}
