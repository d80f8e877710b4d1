//! Simulated analog/digital output board.

use crate::driver::{reply, CallArgs, CommandTable, Driver, DriverPlugin, InitReport};
use crate::error::DriverError;
use parking_lot::Mutex;

const MODULE: &str = "sim_dac";

const MIN_VOLTS: f64 = -10.0;
const MAX_VOLTS: f64 = 10.0;

struct BoardState {
    opened: bool,
    analog: Vec<f64>,
    digital: u8,
    last_error: String,
}

/// Simulated USB output board: bipolar ±10 V analog channels and one 8-bit digital port.
pub struct SimDac {
    board_num: u8,
    state: Mutex<BoardState>,
}

impl SimDac {
    /// Board 0 with 4 analog channels unless overridden.
    pub fn new(board_num: Option<u8>, channels: Option<u8>) -> Self {
        Self {
            board_num: board_num.unwrap_or(0),
            state: Mutex::new(BoardState {
                opened: false,
                analog: vec![0.0; usize::from(channels.unwrap_or(8))],
                digital: 0,
                last_error: String::new(),
            }),
        }
    }

    fn with_open<T>(
        &self,
        f: impl FnOnce(&mut BoardState) -> Result<T, DriverError>,
    ) -> Result<T, DriverError> {
        let mut state = self.state.lock();
        if !state.opened {
            return Err(DriverError::hardware(
                MODULE,
                format!("Board {} is not opened. Call initialize() first.", self.board_num),
            ));
        }
        let result = f(&mut state);
        if let Err(e) = &result {
            state.last_error = e.message.clone();
        }
        result
    }

    /// Drives analog output `channel` to `voltage` volts.
    pub fn set_analog_output(&self, channel: u8, voltage: f64) -> Result<(), DriverError> {
        self.with_open(|state| {
            if !(MIN_VOLTS..=MAX_VOLTS).contains(&voltage) {
                return Err(DriverError::invalid_parameter(format!(
                    "voltage {voltage} V outside {MIN_VOLTS}..={MAX_VOLTS}"
                )));
            }
            let count = state.analog.len();
            let slot = state.analog.get_mut(usize::from(channel)).ok_or_else(|| {
                DriverError::hardware(MODULE, format!("channel {channel} out of range (0..{count})"))
            })?;
            *slot = voltage;
            Ok(())
        })
    }

    /// Analog output of `channel` in volts.
    pub fn get_analog_output(&self, channel: u8) -> Result<f64, DriverError> {
        self.with_open(|state| {
            state.analog.get(usize::from(channel)).copied().ok_or_else(|| {
                DriverError::hardware(MODULE, format!("channel {channel} out of range"))
            })
        })
    }

    /// Writes the 8-bit digital port.
    pub fn set_digital_output(&self, value: u8) -> Result<(), DriverError> {
        self.with_open(|state| {
            state.digital = value;
            Ok(())
        })
    }

    /// Current value of the digital port.
    pub fn get_digital_output(&self) -> Result<u8, DriverError> {
        self.with_open(|state| Ok(state.digital))
    }

    /// Last error the board reported, empty when none.
    pub fn get_last_error(&self) -> String {
        self.state.lock().last_error.clone()
    }

    /// Liveness check.
    pub fn ping(&self) -> &'static str {
        "pong"
    }
}

impl Driver for SimDac {
    fn initialize(&self) -> InitReport {
        let mut state = self.state.lock();
        state.opened = true;
        state.last_error.clear();
        InitReport::ok(format!(
            "SimDac board {} ready ({} analog channels)",
            self.board_num,
            state.analog.len()
        ))
    }

    fn shutdown(&self) {
        let mut state = self.state.lock();
        state.analog.iter_mut().for_each(|v| *v = 0.0);
        state.digital = 0;
        state.opened = false;
    }

    fn is_opened(&self) -> bool {
        self.state.lock().opened
    }
}

fn construct(args: &CallArgs) -> Result<SimDac, DriverError> {
    Ok(SimDac::new(
        args.optional(0, "board_num")?,
        args.optional(1, "channels")?,
    ))
}

/// Catalog registration for [`SimDac`].
pub fn plugin() -> DriverPlugin {
    let commands = CommandTable::new()
        .command("set_analog_output", &["channel", "voltage"], |d: &SimDac, a| {
            reply(d.set_analog_output(a.required(0, "channel")?, a.required(1, "voltage")?)?)
        })
        .command("get_analog_output", &["channel"], |d: &SimDac, a| {
            reply(d.get_analog_output(a.required(0, "channel")?)?)
        })
        .command("set_digital_output", &["value"], |d: &SimDac, a| {
            reply(d.set_digital_output(a.required(0, "value")?)?)
        })
        .command("get_digital_output", &[], |d: &SimDac, _| reply(d.get_digital_output()?))
        .command("get_last_error", &[], |d: &SimDac, _| reply(d.get_last_error()))
        .command("ping", &[], |d: &SimDac, _| reply(d.ping()));

    DriverPlugin::new(MODULE, "SimDac", commands, construct)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outputs_reset_on_shutdown() {
        let dac = SimDac::new(None, Some(4));
        assert!(dac.initialize().ok);
        dac.set_analog_output(3, 2.5).unwrap();
        dac.set_digital_output(0b1010).unwrap();
        assert_eq!(dac.get_analog_output(3).unwrap(), 2.5);

        dac.shutdown();
        assert!(!dac.is_opened());
        dac.initialize();
        assert_eq!(dac.get_analog_output(3).unwrap(), 0.0);
        assert_eq!(dac.get_digital_output().unwrap(), 0);
    }

    #[test]
    fn range_errors_are_remembered() {
        let dac = SimDac::new(None, Some(2));
        dac.initialize();
        let err = dac.set_analog_output(5, 1.0).unwrap_err();
        assert!(err.message.contains("out of range"));
        assert_eq!(dac.get_last_error(), err.message);
        assert!(dac.set_analog_output(0, 12.0).is_err());
    }

    #[test]
    fn closed_board_refuses_calls() {
        let dac = SimDac::new(Some(2), None);
        let err = dac.get_digital_output().unwrap_err();
        assert!(err.message.contains("Board 2"));
    }
}
