use serial::prelude::*;
use serial::SystemPort;
use tracing::trace;

use super::{Parity, SerialOptions, Stream};
use crate::{Error, Result};

impl Stream for SystemPort {
    #[cfg(unix)]
    fn clear_input(&mut self) -> Result<()> {
        use std::os::unix::io::AsRawFd;
        // SAFETY: the descriptor is owned by the port and open for its lifetime
        let res = unsafe { libc::tcflush(self.as_raw_fd(), libc::TCIFLUSH) };
        if res != 0 {
            return Err(std::io::Error::last_os_error().into());
        }
        Ok(())
    }
}

fn char_size(data_bits: u8) -> Result<serial::CharSize> {
    match data_bits {
        5 => Ok(serial::Bits5),
        6 => Ok(serial::Bits6),
        7 => Ok(serial::Bits7),
        8 => Ok(serial::Bits8),
        v => Err(Error::invalid_data(format!(
            "specified serial char size not supported: {}",
            v
        ))),
    }
}

fn stop_bits(stop_bits: u8) -> Result<serial::StopBits> {
    match stop_bits {
        1 => Ok(serial::Stop1),
        2 => Ok(serial::Stop2),
        v => Err(Error::invalid_data(format!(
            "specified serial stop bits not supported: {}",
            v
        ))),
    }
}

fn parity(parity: Parity) -> serial::Parity {
    match parity {
        Parity::None => serial::ParityNone,
        Parity::Even => serial::ParityEven,
        Parity::Odd => serial::ParityOdd,
    }
}

/// Checks the options without opening the port
pub fn check_options(options: &SerialOptions) -> Result<()> {
    if options.port.is_empty() {
        return Err(Error::invalid_data("serial port not specified"));
    }
    if options.baud_rate == 0 {
        return Err(Error::invalid_data("serial baud rate must not be zero"));
    }
    char_size(options.data_bits)?;
    stop_bits(options.stop_bits)?;
    Ok(())
}

/// Opens and configures a serial port
pub fn open(options: &SerialOptions) -> Result<SystemPort> {
    check_options(options)?;
    let baud_rate = serial::BaudRate::from_speed(options.baud_rate as usize);
    let char_size = char_size(options.data_bits)?;
    let stop_bits = stop_bits(options.stop_bits)?;
    let parity = parity(options.parity);
    trace!(port = %options.port, baud_rate = options.baud_rate, "opening serial port");
    let mut port = serial::open(&options.port)?;
    port.reconfigure(&|settings| {
        settings.set_baud_rate(baud_rate)?;
        settings.set_char_size(char_size);
        settings.set_parity(parity);
        settings.set_stop_bits(stop_bits);
        settings.set_flow_control(serial::FlowNone);
        Ok(())
    })?;
    port.set_timeout(options.timeout_duration())?;
    Ok(port)
}

#[cfg(test)]
mod test {
    use super::{check_options, open};
    use crate::comm::SerialOptions;

    #[test]
    fn test_check_options() {
        assert!(check_options(&SerialOptions::new("/dev/ttyUSB0")).is_ok());
        assert!(check_options(&SerialOptions::new("")).is_err());
        assert!(check_options(&SerialOptions::new("/dev/ttyUSB0").data_bits(9)).is_err());
        assert!(check_options(&SerialOptions::new("/dev/ttyUSB0").stop_bits(3)).is_err());
        assert!(check_options(&SerialOptions::new("/dev/ttyUSB0").baud_rate(0)).is_err());
    }

    #[test]
    fn test_open_missing_port() {
        assert!(matches!(
            open(&SerialOptions::new("/dev/emodbus-no-such-port")),
            Err(e) if e.is_io()
        ));
    }
}
