//! Serial port and DE line setup from the bus configuration.

use rs485_master::{BusConfig, DirectionConfig, DirectionControl, GpioValueFile, NoDirection};
use tokio_serial::{DataBits, Parity, SerialStream, StopBits};

use crate::error::Result;

pub fn parity(name: &str) -> Parity {
    match name.to_lowercase().as_str() {
        "even" => Parity::Even,
        "odd" => Parity::Odd,
        _ => Parity::None,
    }
}

pub fn stop_bits(bits: u8) -> StopBits {
    match bits {
        2 => StopBits::Two,
        _ => StopBits::One,
    }
}

pub fn data_bits(bits: u8) -> DataBits {
    match bits {
        5 => DataBits::Five,
        6 => DataBits::Six,
        7 => DataBits::Seven,
        _ => DataBits::Eight,
    }
}

/// Open the UART described by `config`.
pub fn open_port(config: &BusConfig) -> Result<SerialStream> {
    let builder = tokio_serial::new(&config.port, config.baud_rate)
        .parity(parity(&config.parity))
        .stop_bits(stop_bits(config.stop_bits))
        .data_bits(data_bits(config.data_bits));

    let stream = SerialStream::open(&builder).map_err(std::io::Error::from)?;

    tracing::info!(
        port = %config.port,
        baud = config.baud_rate,
        parity = %config.parity,
        data_bits = config.data_bits,
        stop_bits = config.stop_bits,
        "Serial port opened"
    );

    Ok(stream)
}

/// Build the DE line driver for `config`.
pub fn direction(config: &DirectionConfig) -> Result<Box<dyn DirectionControl>> {
    match config {
        DirectionConfig::None => Ok(Box::new(NoDirection)),
        DirectionConfig::Gpio { path, active_low } => {
            let gpio = GpioValueFile::open(path, *active_low)?;
            tracing::info!(path = %path, active_low, "DE line on GPIO");
            Ok(Box::new(gpio))
        }
    }
}
