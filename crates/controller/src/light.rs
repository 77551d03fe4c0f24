//! Grow-light strip: one segment of `led_by_tile` pixels per position.
//!
//! With the `gpio` feature the strip is a WS2812 chain driven from SPI0
//! MOSI; without it, a mock keeps the last frame written.

use anyhow::Result;
use tracing::debug;

use crate::config::LightsConfig;

#[cfg(feature = "gpio")]
use anyhow::Context;
#[cfg(feature = "gpio")]
use rppal::spi::{Bus, Mode, SlaveSelect, Spi};

/// RGB pixel.
pub type Rgb = [u8; 3];

const OFF: Rgb = [0, 0, 0];

/// Sink for a full strip frame.
pub trait LightOutput: Send {
    fn write(&mut self, pixels: &[Rgb]) -> Result<()>;
}

pub struct LightStrip<O> {
    out: O,
    led_by_tile: usize,
    pixels: Vec<Rgb>,
}

/// White at `brightness` percent.
fn white(brightness: f64) -> Rgb {
    let v = (brightness.clamp(0.0, 100.0) * 255.0 / 100.0).round() as u8;
    [v, v, v]
}

impl<O: LightOutput> LightStrip<O> {
    pub fn new(out: O, cfg: &LightsConfig) -> Self {
        Self {
            out,
            led_by_tile: cfg.led_by_tile,
            pixels: vec![OFF; cfg.led_count],
        }
    }

    fn fill(&mut self, position: usize, color: Rgb) -> Result<()> {
        let start = position * self.led_by_tile;
        let end = (start + self.led_by_tile).min(self.pixels.len());
        if start >= end {
            return Ok(());
        }
        if self.pixels[start..end].iter().all(|p| *p == color) {
            return Ok(());
        }
        self.pixels[start..end].fill(color);
        self.out.write(&self.pixels)
    }

    /// Light `position` white at `brightness` percent.
    pub fn turn_on(&mut self, position: usize, brightness: f64) -> Result<()> {
        debug!(position, brightness, "light segment on");
        self.fill(position, white(brightness))
    }

    pub fn turn_off(&mut self, position: usize) -> Result<()> {
        debug!(position, "light segment off");
        self.fill(position, OFF)
    }

    pub fn all_off(&mut self) -> Result<()> {
        self.pixels.fill(OFF);
        self.out.write(&self.pixels)
    }

    #[cfg(test)]
    pub fn segment(&self, position: usize) -> &[Rgb] {
        let start = (position * self.led_by_tile).min(self.pixels.len());
        let end = (start + self.led_by_tile).min(self.pixels.len());
        &self.pixels[start..end]
    }

    #[cfg(test)]
    pub fn output(&self) -> &O {
        &self.out
    }
}

// ---------------------------------------------------------------------------
// WS2812 over SPI (production, needs rppal on a Raspberry Pi)
// ---------------------------------------------------------------------------

/// SPI clock giving ~417 ns per SPI bit, three SPI bits per WS2812 bit.
#[cfg(any(test, feature = "gpio"))]
const WS2812_SPI_HZ: u32 = 2_400_000;

/// Trailing zero bytes holding the line low long enough to latch (>50 µs).
#[cfg(any(test, feature = "gpio"))]
const WS2812_RESET_BYTES: usize = 24;

/// Encode a frame as WS2812 SPI bits: each data bit becomes `110` (1) or
/// `100` (0), colours sent in GRB order, MSB first.
#[cfg(any(test, feature = "gpio"))]
fn encode_ws2812(pixels: &[Rgb]) -> Vec<u8> {
    let mut out = Vec::with_capacity(pixels.len() * 9 + WS2812_RESET_BYTES);
    let mut acc: u32 = 0;
    let mut nbits = 0;
    for &[r, g, b] in pixels {
        for byte in [g, r, b] {
            for i in (0..8).rev() {
                let pattern = if byte & (1 << i) != 0 { 0b110 } else { 0b100 };
                acc = (acc << 3) | pattern;
                nbits += 3;
                while nbits >= 8 {
                    nbits -= 8;
                    out.push((acc >> nbits) as u8);
                }
            }
        }
    }
    out.extend(std::iter::repeat(0).take(WS2812_RESET_BYTES));
    out
}

#[cfg(feature = "gpio")]
pub struct Ws2812Spi {
    spi: Spi,
}

#[cfg(feature = "gpio")]
impl Ws2812Spi {
    pub fn new() -> Result<Self> {
        let spi = Spi::new(Bus::Spi0, SlaveSelect::Ss0, WS2812_SPI_HZ, Mode::Mode0)
            .context("failed to open SPI0 for the light strip")?;
        Ok(Self { spi })
    }
}

#[cfg(feature = "gpio")]
impl LightOutput for Ws2812Spi {
    fn write(&mut self, pixels: &[Rgb]) -> Result<()> {
        let frame = encode_ws2812(pixels);
        self.spi.write(&frame).context("light strip SPI write failed")?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Mock strip (development and tests, no hardware)
// ---------------------------------------------------------------------------
#[cfg(any(test, not(feature = "gpio")))]
#[derive(Debug, Default)]
pub struct MockLightOutput {
    pub frame: Vec<Rgb>,
    pub writes: usize,
}

#[cfg(any(test, not(feature = "gpio")))]
impl LightOutput for MockLightOutput {
    fn write(&mut self, pixels: &[Rgb]) -> Result<()> {
        let lit = pixels.iter().filter(|p| **p != OFF).count();
        debug!(lit, "[mock-gpio] light strip frame");
        self.frame = pixels.to_vec();
        self.writes += 1;
        Ok(())
    }
}

// ===========================================================================
// Tests
// ===========================================================================
