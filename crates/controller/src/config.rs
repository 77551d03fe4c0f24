//! TOML config file loading and validation.
//!
//! The whole file is parsed into typed sections once at startup and every
//! range/cross-field rule is checked before the engine is built. Nothing
//! downstream reads keys lazily.

use anyhow::{bail, Context, Result};
use greenhouse_frontend::calibration::VALID_GPIO_PINS;
use greenhouse_frontend::FrontendConfig;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

use crate::plant::PlantDefaults;

// ---------------------------------------------------------------------------
// Config file structures
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Hours east of UTC used for the light exposure window.
    pub time_zone_offset: f64,
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
    #[serde(default = "default_plant_refresh_sec")]
    pub plant_refresh_sec: u64,
    pub hygrometry: HygrometryConfig,
    pub irrigation: IrrigationConfig,
    pub water_level: WaterLevelConfig,
    pub luminosity: LuminosityConfig,
    pub valves: ValveConfig,
    pub pump: PumpConfig,
    pub lights: LightsConfig,
    pub frontend: FrontendConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HygrometryConfig {
    pub sample_interval_ms: u64,
    pub delta_detection: f64,
    pub max_samples_before_regulation: u32,
    pub default_moisture_goal: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IrrigationConfig {
    pub shot_duration_ms: u64,
    pub pump_speed: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WaterLevelConfig {
    pub empty_at: f64,
    pub low_at: f64,
    pub recover_at: f64,
    pub high_at: f64,
    pub high_unlatch_at: f64,
    pub high_alarm_duration_ms: u64,
    pub log_interval_sec: u64,
    /// Reservoir read cadence. Each read is a blocking ADC conversion.
    #[serde(default = "default_level_sample_ms")]
    pub sample_interval_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LuminosityConfig {
    pub interval_ms: u64,
    pub time_range_center: f64,
    pub default_light_exposure_hours: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ValveConfig {
    pub gpio_position_out: u8,
    /// S0..S3 position-select lines.
    pub gpio_selector_pins: [u8; 4],
    pub pwm_freq: f64,
    pub position_open: f64,
    pub position_close: f64,
    pub opening_time_ms: u64,
    pub closing_time_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PumpConfig {
    pub gpio_speed_out: u8,
    pub pwm_freq: f64,
    pub min_speed: f64,
    pub max_speed: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LightsConfig {
    pub led_count: usize,
    pub led_by_tile: usize,
}

fn default_tick_ms() -> u64 {
    20
}

fn default_plant_refresh_sec() -> u64 {
    60
}

fn default_level_sample_ms() -> u64 {
    1000
}

// ---------------------------------------------------------------------------
// Typed accessors
// ---------------------------------------------------------------------------

impl HygrometryConfig {
    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
    }
}

impl IrrigationConfig {
    pub fn shot_duration(&self) -> Duration {
        Duration::from_millis(self.shot_duration_ms)
    }
}

impl WaterLevelConfig {
    pub fn high_alarm_duration(&self) -> Duration {
        Duration::from_millis(self.high_alarm_duration_ms)
    }

    pub fn log_interval(&self) -> Duration {
        Duration::from_secs(self.log_interval_sec)
    }

    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
    }
}

impl LuminosityConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl Config {
    /// Goal and exposure given to plants the directory has no values for.
    pub fn plant_defaults(&self) -> PlantDefaults {
        PlantDefaults {
            moisture_goal: self.hygrometry.default_moisture_goal,
            light_exposure_hours: self.luminosity.default_light_exposure_hours,
        }
    }
}

impl ValveConfig {
    pub fn opening_time(&self) -> Duration {
        Duration::from_millis(self.opening_time_ms)
    }

    pub fn closing_time(&self) -> Duration {
        Duration::from_millis(self.closing_time_ms)
    }
}

// ---------------------------------------------------------------------------
// GPIO whitelist
// ---------------------------------------------------------------------------

/// Pins claimed by buses: I2C1 (ADS1115) and SPI0 (light strip).
const BUS_PINS: &[(u8, &str)] = &[
    (2, "I2C SDA"),
    (3, "I2C SCL"),
    (8, "SPI CE0"),
    (9, "SPI MISO"),
    (10, "SPI MOSI"),
    (11, "SPI SCLK"),
];

fn percent(v: f64) -> bool {
    (0.0..=100.0).contains(&v)
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl Config {
    /// Validate all sections. Returns `Ok(())` or an error describing every
    /// violation found (not just the first one).
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        if !(-12.0..=14.0).contains(&self.time_zone_offset) {
            errors.push(format!(
                "time_zone_offset {} out of range [-12, 14]",
                self.time_zone_offset
            ));
        }
        if self.tick_ms == 0 {
            errors.push("tick_ms must be positive".to_string());
        }
        if self.plant_refresh_sec == 0 {
            errors.push("plant_refresh_sec must be positive".to_string());
        }

        self.validate_hygrometry(&mut errors);
        self.validate_irrigation(&mut errors);
        self.validate_water_level(&mut errors);
        self.validate_luminosity(&mut errors);
        self.validate_valves(&mut errors);
        self.validate_pump(&mut errors);
        self.validate_lights(&mut errors);
        self.frontend.validate(&mut errors);
        self.validate_pins(&mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            bail!(
                "config validation failed ({} error{}):\n  - {}",
                errors.len(),
                if errors.len() == 1 { "" } else { "s" },
                errors.join("\n  - ")
            );
        }
    }

    fn validate_hygrometry(&self, errors: &mut Vec<String>) {
        let h = &self.hygrometry;
        if h.sample_interval_ms == 0 {
            errors.push("hygrometry: sample_interval_ms must be positive".to_string());
        }
        if !(h.delta_detection > 0.0 && h.delta_detection <= 100.0) {
            errors.push(format!(
                "hygrometry: delta_detection {} out of range (0, 100]",
                h.delta_detection
            ));
        }
        if h.max_samples_before_regulation < 2 {
            errors.push(format!(
                "hygrometry: max_samples_before_regulation must be at least 2, got {}",
                h.max_samples_before_regulation
            ));
        }
        if !percent(h.default_moisture_goal) {
            errors.push(format!(
                "hygrometry: default_moisture_goal {} out of range [0, 100]",
                h.default_moisture_goal
            ));
        }
    }

    fn validate_irrigation(&self, errors: &mut Vec<String>) {
        let i = &self.irrigation;
        if i.shot_duration_ms == 0 {
            errors.push("irrigation: shot_duration_ms must be positive".to_string());
        }
        if !(i.pump_speed > 0.0 && i.pump_speed <= 100.0) {
            errors.push(format!(
                "irrigation: pump_speed {} out of range (0, 100]",
                i.pump_speed
            ));
        }
    }

    fn validate_water_level(&self, errors: &mut Vec<String>) {
        let w = &self.water_level;
        for (name, v) in [
            ("empty_at", w.empty_at),
            ("low_at", w.low_at),
            ("recover_at", w.recover_at),
            ("high_at", w.high_at),
            ("high_unlatch_at", w.high_unlatch_at),
        ] {
            if !percent(v) {
                errors.push(format!("water_level: {name} {v} out of range [0, 100]"));
            }
        }
        if w.empty_at >= w.low_at {
            errors.push(format!(
                "water_level: empty_at ({}) must be below low_at ({})",
                w.empty_at, w.low_at
            ));
        }
        if w.low_at >= w.recover_at {
            errors.push(format!(
                "water_level: recover_at ({}) must be greater than low_at ({})",
                w.recover_at, w.low_at
            ));
        }
        if w.high_unlatch_at >= w.high_at {
            errors.push(format!(
                "water_level: high_unlatch_at ({}) must be below high_at ({})",
                w.high_unlatch_at, w.high_at
            ));
        }
        if w.recover_at >= w.high_unlatch_at {
            errors.push(format!(
                "water_level: recover_at ({}) must be below high_unlatch_at ({})",
                w.recover_at, w.high_unlatch_at
            ));
        }
        if w.log_interval_sec == 0 {
            errors.push("water_level: log_interval_sec must be positive".to_string());
        }
        if w.sample_interval_ms < self.tick_ms {
            errors.push(format!(
                "water_level: sample_interval_ms ({}) must be at least tick_ms ({})",
                w.sample_interval_ms, self.tick_ms
            ));
        }
    }

    fn validate_luminosity(&self, errors: &mut Vec<String>) {
        let l = &self.luminosity;
        if l.interval_ms == 0 {
            errors.push("luminosity: interval_ms must be positive".to_string());
        }
        if !(0.0..24.0).contains(&l.time_range_center) {
            errors.push(format!(
                "luminosity: time_range_center {} out of range [0, 24)",
                l.time_range_center
            ));
        }
        if !(0.0..=24.0).contains(&l.default_light_exposure_hours) {
            errors.push(format!(
                "luminosity: default_light_exposure_hours {} out of range [0, 24]",
                l.default_light_exposure_hours
            ));
        }
    }

    fn validate_valves(&self, errors: &mut Vec<String>) {
        let v = &self.valves;
        if v.pwm_freq <= 0.0 {
            errors.push(format!("valves: pwm_freq must be positive, got {}", v.pwm_freq));
        }
        for (name, duty) in [("position_open", v.position_open), ("position_close", v.position_close)] {
            if !(duty > 0.0 && duty <= 100.0) {
                errors.push(format!("valves: {name} duty {duty} out of range (0, 100]"));
            }
        }
        if v.position_open == v.position_close {
            errors.push(format!(
                "valves: position_open and position_close are both {}",
                v.position_open
            ));
        }
        if v.opening_time_ms == 0 {
            errors.push("valves: opening_time_ms must be positive".to_string());
        }
        if v.closing_time_ms == 0 {
            errors.push("valves: closing_time_ms must be positive".to_string());
        }
    }

    fn validate_pump(&self, errors: &mut Vec<String>) {
        let p = &self.pump;
        if p.pwm_freq <= 0.0 {
            errors.push(format!("pump: pwm_freq must be positive, got {}", p.pwm_freq));
        }
        if !percent(p.min_speed) || !percent(p.max_speed) {
            errors.push(format!(
                "pump: min_speed ({}) and max_speed ({}) must be within [0, 100]",
                p.min_speed, p.max_speed
            ));
        }
        if p.min_speed >= p.max_speed {
            errors.push(format!(
                "pump: max_speed ({}) must be greater than min_speed ({})",
                p.max_speed, p.min_speed
            ));
        }
    }

    fn validate_lights(&self, errors: &mut Vec<String>) {
        let l = &self.lights;
        if l.led_by_tile == 0 {
            errors.push("lights: led_by_tile must be positive".to_string());
        }
        match l.led_by_tile.checked_mul(greenhouse_frontend::POSITION_COUNT) {
            Some(needed) if l.led_count < needed => errors.push(format!(
                "lights: led_count ({}) too small for 16 tiles of {} LEDs ({needed})",
                l.led_count, l.led_by_tile
            )),
            Some(_) => {}
            None => errors.push(format!(
                "lights: led_by_tile ({}) is too large for 16 tiles",
                l.led_by_tile
            )),
        }
    }

    /// Every output pin must be on the header, off the buses, and unique.
    fn validate_pins(&self, errors: &mut Vec<String>) {
        let mut owners: HashMap<u8, &str> = HashMap::new();
        let mut claim = |pin: u8, owner: &'static str, errors: &mut Vec<String>| {
            if !VALID_GPIO_PINS.contains(&pin) {
                errors.push(format!(
                    "{owner}: pin {pin} is not a valid BCM GPIO pin (allowed: 2-27)"
                ));
                return;
            }
            if let Some((_, bus)) = BUS_PINS.iter().find(|(p, _)| *p == pin) {
                errors.push(format!("{owner}: pin {pin} is reserved for {bus}"));
                return;
            }
            if let Some(prev) = owners.insert(pin, owner) {
                errors.push(format!("{owner}: pin {pin} is already used by {prev}"));
            }
        };

        claim(self.valves.gpio_position_out, "valves.gpio_position_out", errors);
        for pin in self.valves.gpio_selector_pins {
            claim(pin, "valves.gpio_selector_pins", errors);
        }
        claim(self.pump.gpio_speed_out, "pump.gpio_speed_out", errors);
        for pin in self.frontend.mux_select_pins {
            claim(pin, "frontend.mux_select_pins", errors);
        }
    }
}

// ---------------------------------------------------------------------------
// Load
// ---------------------------------------------------------------------------

/// Read, parse, and validate a TOML config file.
pub fn load(path: &str) -> Result<Config> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("failed to read config: {path}"))?;
    let config: Config =
        toml::from_str(&contents).with_context(|| format!("failed to parse config: {path}"))?;
    config
        .validate()
        .with_context(|| format!("invalid config: {path}"))?;
    Ok(config)
}

/// The bundled `config.toml`, parsed. Shared by the tests of every module.
#[cfg(test)]
pub(crate) fn test_config() -> Config {
    toml::from_str(include_str!("../config.toml")).unwrap()
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    /// Assert validation fails and the error message contains `needle`.
    fn assert_validation_err(cfg: &Config, needle: &str) {
        let err = cfg.validate().unwrap_err();
        let msg = format!("{err:#}");
        assert!(
            msg.contains(needle),
            "expected error containing {needle:?}, got: {msg}"
        );
    }

    // -- Parsing ----------------------------------------------------------

    #[test]
    fn bundled_config_parses_and_validates() {
        let cfg = test_config();
        cfg.validate().unwrap();
        assert_eq!(cfg.hygrometry.max_samples_before_regulation, 20);
        assert_eq!(cfg.valves.gpio_selector_pins, [5, 6, 13, 19]);
        assert_eq!(cfg.frontend.i2c_address, 0x48);
    }

    #[test]
    fn missing_section_is_a_parse_error() {
        let trimmed: String = include_str!("../config.toml")
            .split("[pump]")
            .next()
            .unwrap()
            .to_string();
        assert!(toml::from_str::<Config>(&trimmed).is_err());
    }

    #[test]
    fn optional_keys_take_defaults() {
        let src = include_str!("../config.toml")
            .replace("tick_ms = 20", "")
            .replace("plant_refresh_sec = 60", "");
        let cfg: Config = toml::from_str(&src).unwrap();
        assert_eq!(cfg.tick_ms, 20);
        assert_eq!(cfg.plant_refresh_sec, 60);
    }

    #[test]
    fn durations_are_converted() {
        let cfg = test_config();
        assert_eq!(cfg.irrigation.shot_duration(), Duration::from_secs(3));
        assert_eq!(cfg.valves.opening_time(), Duration::from_millis(1200));
        assert_eq!(cfg.valves.closing_time(), Duration::from_millis(800));
        assert_eq!(cfg.water_level.high_alarm_duration(), Duration::from_secs(60));
    }

    #[test]
    fn load_missing_file_fails_with_path() {
        let err = load("/nonexistent/greenhouse.toml").unwrap_err();
        assert!(format!("{err:#}").contains("/nonexistent/greenhouse.toml"));
    }

    // -- Top level --------------------------------------------------------

    #[test]
    fn time_zone_offset_out_of_range() {
        let mut cfg = test_config();
        cfg.time_zone_offset = 20.0;
        assert_validation_err(&cfg, "time_zone_offset");
    }

    #[test]
    fn zero_tick_rejected() {
        let mut cfg = test_config();
        cfg.tick_ms = 0;
        assert_validation_err(&cfg, "tick_ms must be positive");
    }

    // -- Hygrometry -------------------------------------------------------

    #[test]
    fn delta_detection_must_be_positive() {
        let mut cfg = test_config();
        cfg.hygrometry.delta_detection = 0.0;
        assert_validation_err(&cfg, "delta_detection");
    }

    #[test]
    fn window_of_one_sample_rejected() {
        let mut cfg = test_config();
        cfg.hygrometry.max_samples_before_regulation = 1;
        assert_validation_err(&cfg, "max_samples_before_regulation must be at least 2");
    }

    #[test]
    fn moisture_goal_above_hundred_rejected() {
        let mut cfg = test_config();
        cfg.hygrometry.default_moisture_goal = 120.0;
        assert_validation_err(&cfg, "default_moisture_goal");
    }

    // -- Irrigation -------------------------------------------------------

    #[test]
    fn zero_shot_duration_rejected() {
        let mut cfg = test_config();
        cfg.irrigation.shot_duration_ms = 0;
        assert_validation_err(&cfg, "shot_duration_ms must be positive");
    }

    #[test]
    fn zero_pump_speed_rejected() {
        let mut cfg = test_config();
        cfg.irrigation.pump_speed = 0.0;
        assert_validation_err(&cfg, "pump_speed");
    }

    // -- Water level ------------------------------------------------------

    #[test]
    fn recover_must_exceed_low() {
        let mut cfg = test_config();
        cfg.water_level.recover_at = 20.0;
        assert_validation_err(&cfg, "recover_at (20) must be greater than low_at (20)");
    }

    #[test]
    fn unlatch_must_be_below_high() {
        let mut cfg = test_config();
        cfg.water_level.high_unlatch_at = 100.0;
        assert_validation_err(&cfg, "high_unlatch_at (100) must be below high_at (100)");
    }

    #[test]
    fn empty_must_be_below_low() {
        let mut cfg = test_config();
        cfg.water_level.empty_at = 30.0;
        assert_validation_err(&cfg, "empty_at (30) must be below low_at");
    }

    // -- Luminosity -------------------------------------------------------

    #[test]
    fn window_center_out_of_day_rejected() {
        let mut cfg = test_config();
        cfg.luminosity.time_range_center = 24.0;
        assert_validation_err(&cfg, "time_range_center");
    }

    #[test]
    fn exposure_longer_than_a_day_rejected() {
        let mut cfg = test_config();
        cfg.luminosity.default_light_exposure_hours = 25.0;
        assert_validation_err(&cfg, "default_light_exposure_hours");
    }

    // -- Valves / pump ----------------------------------------------------

    #[test]
    fn identical_valve_positions_rejected() {
        let mut cfg = test_config();
        cfg.valves.position_close = cfg.valves.position_open;
        assert_validation_err(&cfg, "position_open and position_close are both");
    }

    #[test]
    fn zero_closing_time_rejected() {
        let mut cfg = test_config();
        cfg.valves.closing_time_ms = 0;
        assert_validation_err(&cfg, "closing_time_ms must be positive");
    }

    #[test]
    fn pump_speed_range_inverted() {
        let mut cfg = test_config();
        cfg.pump.min_speed = 90.0;
        cfg.pump.max_speed = 50.0;
        assert_validation_err(&cfg, "max_speed (50) must be greater than min_speed (90)");
    }

    // -- Lights -----------------------------------------------------------

    #[test]
    fn led_count_too_small_for_tiles() {
        let mut cfg = test_config();
        cfg.lights.led_count = 10;
        assert_validation_err(&cfg, "too small for 16 tiles");
    }

    #[test]
    fn reservoir_sampled_no_faster_than_tick() {
        let mut cfg = test_config();
        cfg.water_level.sample_interval_ms = 5;
        assert_validation_err(&cfg, "sample_interval_ms (5) must be at least tick_ms (20)");
    }

    #[test]
    fn huge_led_by_tile_reported_not_overflowed() {
        let mut cfg = test_config();
        cfg.lights.led_by_tile = usize::MAX / 2;
        assert_validation_err(&cfg, "led_by_tile (");
        assert_validation_err(&cfg, "is too large for 16 tiles");
    }

    // -- GPIO -------------------------------------------------------------

    #[test]
    fn gpio_pin_0_rejected() {
        let mut cfg = test_config();
        cfg.valves.gpio_position_out = 0;
        assert_validation_err(&cfg, "not a valid BCM GPIO pin");
    }

    #[test]
    fn gpio_pin_28_rejected() {
        let mut cfg = test_config();
        cfg.pump.gpio_speed_out = 28;
        assert_validation_err(&cfg, "not a valid BCM GPIO pin");
    }

    #[test]
    fn i2c_pin_reserved() {
        let mut cfg = test_config();
        cfg.pump.gpio_speed_out = 3;
        assert_validation_err(&cfg, "reserved for I2C SCL");
    }

    #[test]
    fn spi_mosi_reserved() {
        let mut cfg = test_config();
        cfg.valves.gpio_selector_pins[2] = 10;
        assert_validation_err(&cfg, "reserved for SPI MOSI");
    }

    #[test]
    fn other_spi0_pins_reserved() {
        for (pin, bus) in [(8, "SPI CE0"), (9, "SPI MISO"), (11, "SPI SCLK")] {
            let mut cfg = test_config();
            cfg.valves.gpio_position_out = pin;
            assert_validation_err(&cfg, &format!("pin {pin} is reserved for {bus}"));

            let mut cfg = test_config();
            cfg.pump.gpio_speed_out = pin;
            assert_validation_err(&cfg, &format!("pump.gpio_speed_out: pin {pin} is reserved"));
        }
    }

    #[test]
    fn pump_sharing_valve_pin_rejected() {
        let mut cfg = test_config();
        cfg.pump.gpio_speed_out = cfg.valves.gpio_position_out;
        assert_validation_err(&cfg, "already used by valves.gpio_position_out");
    }

    #[test]
    fn mux_sharing_selector_pin_rejected() {
        let mut cfg = test_config();
        cfg.frontend.mux_select_pins[0] = 5;
        assert_validation_err(&cfg, "already used by valves.gpio_selector_pins");
    }

    // -- Multiple errors reported at once ---------------------------------

    #[test]
    fn multiple_errors_collected() {
        let mut cfg = test_config();
        cfg.hygrometry.delta_detection = -1.0;
        cfg.irrigation.shot_duration_ms = 0;
        cfg.valves.gpio_position_out = 1;
        cfg.frontend.moisture.raw_wet = cfg.frontend.moisture.raw_dry;
        let msg = format!("{:#}", cfg.validate().unwrap_err());
        assert!(msg.contains("delta_detection"), "missing hygrometry error in: {msg}");
        assert!(msg.contains("shot_duration_ms"), "missing irrigation error in: {msg}");
        assert!(msg.contains("not a valid BCM GPIO pin"), "missing gpio error in: {msg}");
        assert!(msg.contains("calibration range is zero"), "missing frontend error in: {msg}");
    }
}
