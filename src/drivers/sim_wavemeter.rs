//! Simulated multi-channel wavelength meter.

use crate::driver::{reply, CallArgs, CommandTable, Driver, DriverPlugin, InitReport};
use crate::error::DriverError;
use parking_lot::Mutex;
use rand::Rng;
use serde::{Deserialize, Serialize};

const MODULE: &str = "sim_wavemeter";

/// Speed of light in nm·THz.
const C_NM_THZ: f64 = 299_792.458;

/// Exposure control of one measurement channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExposureMode {
    /// Exposure set by the instrument
    Auto,
    /// Exposure fixed by the operator
    Manual,
}

#[derive(Debug, Clone, Copy)]
struct ChannelState {
    wavelength_nm: f64,
    exposure_mode: ExposureMode,
}

struct MeterState {
    opened: bool,
    running: bool,
    default_channel: u32,
    channels: Vec<ChannelState>,
}

/// Simulated wavelength meter with a fiber switcher.
///
/// Channels are numbered from 1. Readings carry a little noise around a fixed line
/// per channel.
pub struct SimWavemeter {
    version: String,
    channel_count: u32,
    state: Mutex<MeterState>,
}

impl SimWavemeter {
    /// Unopened meter with 8 channels unless overridden.
    pub fn new(version: Option<String>, channels: Option<u32>) -> Self {
        let channel_count = channels.unwrap_or(8);
        let lines = (0..channel_count)
            .map(|i| ChannelState {
                wavelength_nm: 780.241 + f64::from(i) * 15.0,
                exposure_mode: ExposureMode::Auto,
            })
            .collect();
        Self {
            version: version.unwrap_or_else(|| "sim-1.0".to_string()),
            channel_count,
            state: Mutex::new(MeterState {
                opened: false,
                running: false,
                default_channel: 1,
                channels: lines,
            }),
        }
    }

    fn with_open<T>(
        &self,
        f: impl FnOnce(&mut MeterState) -> Result<T, DriverError>,
    ) -> Result<T, DriverError> {
        let mut state = self.state.lock();
        if !state.opened {
            return Err(DriverError::hardware(
                MODULE,
                "Wavemeter is not opened. Call initialize() first.",
            ));
        }
        f(&mut state)
    }

    fn slot(&self, state: &MeterState, channel: Option<u32>) -> Result<usize, DriverError> {
        let channel = channel.unwrap_or(state.default_channel);
        if channel == 0 || channel > self.channel_count {
            return Err(DriverError::invalid_parameter(format!(
                "channel {channel} outside 1..={}",
                self.channel_count
            )));
        }
        Ok((channel - 1) as usize)
    }

    /// Model string including the firmware version.
    pub fn get_model(&self) -> Result<String, DriverError> {
        self.with_open(|_| Ok(format!("SimWavemeter {}", self.version)))
    }

    /// Starts continuous measurement.
    pub fn start_measurement(&self) -> Result<(), DriverError> {
        self.with_open(|state| {
            state.running = true;
            Ok(())
        })
    }

    /// Stops measurement.
    pub fn stop_measurement(&self) -> Result<(), DriverError> {
        self.with_open(|state| {
            state.running = false;
            Ok(())
        })
    }

    /// Whether measurement is running.
    pub fn is_measurement_running(&self) -> Result<bool, DriverError> {
        self.with_open(|state| Ok(state.running))
    }

    /// Number of measurement channels.
    pub fn get_channels_number(&self) -> Result<u32, DriverError> {
        self.with_open(|_| Ok(self.channel_count))
    }

    /// Channel used when none is given.
    pub fn get_default_channel(&self) -> Result<u32, DriverError> {
        self.with_open(|state| Ok(state.default_channel))
    }

    /// Changes the channel used when none is given.
    pub fn set_default_channel(&self, channel: u32) -> Result<(), DriverError> {
        self.with_open(|state| {
            self.slot(state, Some(channel))?;
            state.default_channel = channel;
            Ok(())
        })
    }

    /// Vacuum wavelength in nm. `channel` defaults to the default channel.
    pub fn get_wavelength(&self, channel: Option<u32>) -> Result<f64, DriverError> {
        self.with_open(|state| {
            if !state.running {
                return Err(DriverError::hardware(MODULE, "measurement not running"));
            }
            let index = self.slot(state, channel)?;
            let noise: f64 = rand::thread_rng().gen_range(-1.0e-5..1.0e-5);
            Ok(state.channels[index].wavelength_nm + noise)
        })
    }

    /// Optical frequency in THz.
    pub fn get_frequency(&self, channel: Option<u32>) -> Result<f64, DriverError> {
        let wavelength = self.get_wavelength(channel)?;
        Ok(C_NM_THZ / wavelength)
    }

    /// Exposure mode of `channel`, or of the default channel.
    pub fn get_exposure_mode(&self, channel: Option<u32>) -> Result<ExposureMode, DriverError> {
        self.with_open(|state| {
            let index = self.slot(state, channel)?;
            Ok(state.channels[index].exposure_mode)
        })
    }

    /// Sets the exposure mode of `channel`, or of the default channel.
    pub fn set_exposure_mode(
        &self,
        mode: ExposureMode,
        channel: Option<u32>,
    ) -> Result<(), DriverError> {
        self.with_open(|state| {
            let index = self.slot(state, channel)?;
            state.channels[index].exposure_mode = mode;
            Ok(())
        })
    }

    /// Liveness check.
    pub fn ping(&self) -> &'static str {
        "pong"
    }
}

impl Driver for SimWavemeter {
    fn initialize(&self) -> InitReport {
        if self.channel_count == 0 {
            return InitReport::failed("no hardware: wavemeter reports 0 channels");
        }
        let mut state = self.state.lock();
        state.opened = true;
        state.running = true;
        InitReport::ok(format!(
            "SimWavemeter {} ready ({} channels)",
            self.version, self.channel_count
        ))
    }

    fn shutdown(&self) {
        let mut state = self.state.lock();
        state.running = false;
        state.opened = false;
    }

    fn is_opened(&self) -> bool {
        self.state.lock().opened
    }
}

fn construct(args: &CallArgs) -> Result<SimWavemeter, DriverError> {
    Ok(SimWavemeter::new(
        args.optional(0, "version")?,
        args.optional(1, "channels")?,
    ))
}

/// Catalog registration for [`SimWavemeter`].
pub fn plugin() -> DriverPlugin {
    let commands = CommandTable::new()
        .command("get_model", &[], |d: &SimWavemeter, _| reply(d.get_model()?))
        .command("start_measurement", &[], |d: &SimWavemeter, _| reply(d.start_measurement()?))
        .command("stop_measurement", &[], |d: &SimWavemeter, _| reply(d.stop_measurement()?))
        .command("is_measurement_running", &[], |d: &SimWavemeter, _| {
            reply(d.is_measurement_running()?)
        })
        .command("get_channels_number", &[], |d: &SimWavemeter, _| reply(d.get_channels_number()?))
        .command("get_default_channel", &[], |d: &SimWavemeter, _| reply(d.get_default_channel()?))
        .command("set_default_channel", &["channel"], |d: &SimWavemeter, a| {
            reply(d.set_default_channel(a.required(0, "channel")?)?)
        })
        .command("get_wavelength", &["channel"], |d: &SimWavemeter, a| {
            reply(d.get_wavelength(a.optional(0, "channel")?)?)
        })
        .command("get_frequency", &["channel"], |d: &SimWavemeter, a| {
            reply(d.get_frequency(a.optional(0, "channel")?)?)
        })
        .command("get_exposure_mode", &["channel"], |d: &SimWavemeter, a| {
            reply(d.get_exposure_mode(a.optional(0, "channel")?)?)
        })
        .command("set_exposure_mode", &["mode", "channel"], |d: &SimWavemeter, a| {
            reply(d.set_exposure_mode(a.required(0, "mode")?, a.optional(1, "channel")?)?)
        })
        .command("ping", &[], |d: &SimWavemeter, _| reply(d.ping()));

    DriverPlugin::new(MODULE, "SimWavemeter", commands, construct)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn readings_follow_the_default_channel() {
        let meter = SimWavemeter::new(None, Some(4));
        assert!(meter.initialize().ok);
        let first = meter.get_wavelength(None).unwrap();
        assert!((first - 780.241).abs() < 1e-3);

        meter.set_default_channel(3).unwrap();
        let third = meter.get_wavelength(None).unwrap();
        assert!((third - 810.241).abs() < 1e-3);

        let thz = meter.get_frequency(Some(1)).unwrap();
        assert!((thz - C_NM_THZ / 780.241).abs() < 1e-3);
    }

    #[test]
    fn zero_channels_means_no_hardware() {
        let meter = SimWavemeter::new(None, Some(0));
        let report = meter.initialize();
        assert!(!report.ok);
        assert!(report.message.contains("no hardware"));
    }

    #[test]
    fn channel_bounds_are_checked() {
        let meter = SimWavemeter::new(None, Some(2));
        meter.initialize();
        assert!(meter.set_default_channel(3).is_err());
        assert!(meter.get_exposure_mode(Some(0)).is_err());
        meter.set_exposure_mode(ExposureMode::Manual, Some(2)).unwrap();
        assert_eq!(meter.get_exposure_mode(Some(2)).unwrap(), ExposureMode::Manual);
    }

    #[test]
    fn stopped_measurement_cannot_be_read() {
        let meter = SimWavemeter::new(None, None);
        meter.initialize();
        meter.stop_measurement().unwrap();
        assert!(!meter.is_measurement_running().unwrap());
        assert!(meter.get_wavelength(None).is_err());
    }
}
