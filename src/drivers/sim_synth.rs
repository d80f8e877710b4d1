//! Simulated two-channel RF synthesizer.
//!
//! Behaves like a serial-attached synthesizer: it needs a device path before it can be
//! initialized, keeps per-channel frequency, power and output state, and refuses every
//! call while closed.

use crate::driver::{reply, CallArgs, CommandTable, Driver, DriverPlugin, InitReport};
use crate::error::DriverError;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

const MODULE: &str = "sim_synth";

const CHANNELS: usize = 2;
const MIN_FREQUENCY_HZ: f64 = 53.0e6;
const MAX_FREQUENCY_HZ: f64 = 14.8e9;

/// Frequency reference source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReferenceMode {
    /// External 10 MHz input
    #[serde(rename = "external")]
    External,
    /// Internal 27 MHz oscillator
    #[serde(rename = "internal 27mhz")]
    Internal27Mhz,
    /// Internal 10 MHz oscillator
    #[serde(rename = "internal 10mhz")]
    Internal10Mhz,
}

#[derive(Debug, Clone, Copy)]
struct ChannelState {
    frequency_hz: f64,
    power_dbm: f64,
    output: bool,
}

impl Default for ChannelState {
    fn default() -> Self {
        Self {
            frequency_hz: 1.0e9,
            power_dbm: 0.0,
            output: false,
        }
    }
}

struct SynthState {
    opened: bool,
    reference_mode: ReferenceMode,
    channels: [ChannelState; CHANNELS],
}

/// Simulated two-channel RF synthesizer on a serial port.
///
/// Channel index is 0 or 1.
pub struct SimSynth {
    devpath: String,
    reset_on_connect: bool,
    state: Mutex<SynthState>,
}

impl SimSynth {
    /// Unopened synthesizer; `devpath` names the serial device.
    pub fn new(devpath: Option<String>, reset_on_connect: Option<bool>) -> Self {
        Self {
            devpath: devpath.unwrap_or_default(),
            reset_on_connect: reset_on_connect.unwrap_or(false),
            state: Mutex::new(SynthState {
                opened: false,
                reference_mode: ReferenceMode::Internal27Mhz,
                channels: [ChannelState::default(); CHANNELS],
            }),
        }
    }

    fn with_open<T>(&self, f: impl FnOnce(&mut SynthState) -> Result<T, DriverError>) -> Result<T, DriverError> {
        let mut state = self.state.lock();
        if !state.opened {
            return Err(DriverError::hardware(
                MODULE,
                "SimSynth is not opened. Call initialize() first.",
            ));
        }
        f(&mut state)
    }

    fn channel_index(channel: u8) -> Result<usize, DriverError> {
        let index = usize::from(channel);
        if index < CHANNELS {
            Ok(index)
        } else {
            Err(DriverError::invalid_parameter(format!(
                "Invalid channel index: {channel}"
            )))
        }
    }

    /// Device identification.
    pub fn get_info(&self) -> Result<Value, DriverError> {
        self.with_open(|_| {
            Ok(json!({
                "model": "SimSynth",
                "serial_number": "SIM-0001",
                "devpath": self.devpath,
            }))
        })
    }

    /// Selects the frequency reference.
    pub fn set_reference_mode(&self, mode: ReferenceMode) -> Result<(), DriverError> {
        self.with_open(|state| {
            state.reference_mode = mode;
            Ok(())
        })
    }

    /// Current frequency reference.
    pub fn get_reference_mode(&self) -> Result<ReferenceMode, DriverError> {
        self.with_open(|state| Ok(state.reference_mode))
    }

    /// Sets the output frequency of one channel in Hz.
    pub fn set_frequency(&self, channel: u8, frequency_hz: f64) -> Result<(), DriverError> {
        let index = Self::channel_index(channel)?;
        if !(MIN_FREQUENCY_HZ..=MAX_FREQUENCY_HZ).contains(&frequency_hz) {
            return Err(DriverError::invalid_parameter(format!(
                "frequency {frequency_hz} Hz outside {MIN_FREQUENCY_HZ}..={MAX_FREQUENCY_HZ}"
            )));
        }
        self.with_open(|state| {
            state.channels[index].frequency_hz = frequency_hz;
            Ok(())
        })
    }

    /// Output frequency of one channel in Hz.
    pub fn get_frequency(&self, channel: u8) -> Result<f64, DriverError> {
        let index = Self::channel_index(channel)?;
        self.with_open(|state| Ok(state.channels[index].frequency_hz))
    }

    /// Sets the output power of one channel in dBm.
    pub fn set_power(&self, channel: u8, power_dbm: f64) -> Result<(), DriverError> {
        let index = Self::channel_index(channel)?;
        self.with_open(|state| {
            state.channels[index].power_dbm = power_dbm.clamp(-70.0, 20.0);
            Ok(())
        })
    }

    /// Output power of one channel in dBm.
    pub fn get_power(&self, channel: u8) -> Result<f64, DriverError> {
        let index = Self::channel_index(channel)?;
        self.with_open(|state| Ok(state.channels[index].power_dbm))
    }

    /// Enables or mutes one channel's RF output.
    pub fn set_output(&self, channel: u8, enable: bool) -> Result<(), DriverError> {
        let index = Self::channel_index(channel)?;
        self.with_open(|state| {
            state.channels[index].output = enable;
            Ok(())
        })
    }

    /// Whether a channel's RF output is on.
    pub fn get_output(&self, channel: u8) -> Result<bool, DriverError> {
        let index = Self::channel_index(channel)?;
        self.with_open(|state| Ok(state.channels[index].output))
    }

    /// Liveness check.
    pub fn ping(&self) -> &'static str {
        "pong"
    }
}

impl Driver for SimSynth {
    fn initialize(&self) -> InitReport {
        if self.devpath.is_empty() {
            return InitReport::failed("devpath is empty (set 'port' or 'devpath')");
        }
        let mut state = self.state.lock();
        if self.reset_on_connect {
            state.channels = [ChannelState::default(); CHANNELS];
            state.reference_mode = ReferenceMode::Internal27Mhz;
        }
        state.opened = true;
        InitReport::ok(format!("SimSynth connected on {}", self.devpath))
    }

    fn shutdown(&self) {
        let mut state = self.state.lock();
        for channel in state.channels.iter_mut() {
            channel.output = false;
        }
        state.opened = false;
    }

    fn is_opened(&self) -> bool {
        self.state.lock().opened
    }
}

fn construct(args: &CallArgs) -> Result<SimSynth, DriverError> {
    Ok(SimSynth::new(
        args.optional(0, "devpath")?,
        args.optional(1, "reset_on_connect")?,
    ))
}

/// Catalog registration for [`SimSynth`].
pub fn plugin() -> DriverPlugin {
    let commands = CommandTable::new()
        .command("get_info", &[], |d: &SimSynth, _| d.get_info())
        .command("set_reference_mode", &["mode"], |d: &SimSynth, a| {
            reply(d.set_reference_mode(a.required(0, "mode")?)?)
        })
        .command("get_reference_mode", &[], |d: &SimSynth, _| reply(d.get_reference_mode()?))
        .command("set_frequency", &["channel", "frequency_hz"], |d: &SimSynth, a| {
            reply(d.set_frequency(a.required(0, "channel")?, a.required(1, "frequency_hz")?)?)
        })
        .command("get_frequency", &["channel"], |d: &SimSynth, a| {
            reply(d.get_frequency(a.required(0, "channel")?)?)
        })
        .command("set_power", &["channel", "power_dbm"], |d: &SimSynth, a| {
            reply(d.set_power(a.required(0, "channel")?, a.required(1, "power_dbm")?)?)
        })
        .command("get_power", &["channel"], |d: &SimSynth, a| {
            reply(d.get_power(a.required(0, "channel")?)?)
        })
        .command("set_output", &["channel", "enable"], |d: &SimSynth, a| {
            reply(d.set_output(a.required(0, "channel")?, a.required(1, "enable")?)?)
        })
        .command("get_output", &["channel"], |d: &SimSynth, a| {
            reply(d.get_output(a.required(0, "channel")?)?)
        })
        .command("ping", &[], |d: &SimSynth, _| reply(d.ping()));

    DriverPlugin::new(MODULE, "SimSynth", commands, construct)
}
