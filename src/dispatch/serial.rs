use anyhow::{Context, Result};
use serialport::SerialPort;
use std::io::Write;
use std::time::Duration;

use super::{ActuatorEncoding, EventSink};
use crate::config::ActuatorSettings;
use crate::detect::LabelTable;
use crate::event::ClassificationEvent;

/// Open a serial port for writing with the given write timeout.
pub fn open_port(path: &str, baud_rate: u32, timeout: Duration) -> Result<Box<dyn SerialPort>> {
    serialport::new(path, baud_rate)
        .timeout(timeout)
        .open()
        .with_context(|| format!("failed to open serial port {} at {} baud", path, baud_rate))
}

/// Serial-connected sorting controller.
///
/// Writes one encoded message per event and never reads a reply.
pub struct SerialActuator {
    name: String,
    writer: Box<dyn Write + Send>,
    encoding: ActuatorEncoding,
    labels: LabelTable,
}

impl SerialActuator {
    /// Open the configured port and wait for the controller to come out of
    /// its reset.
    pub fn open(settings: &ActuatorSettings, labels: LabelTable) -> Result<Self> {
        let port = open_port(&settings.port, settings.baud_rate, settings.write_timeout)?;
        if !settings.settle.is_zero() {
            log::info!(
                "serial port {} open; waiting {:?} for the controller to settle",
                settings.port,
                settings.settle
            );
            std::thread::sleep(settings.settle);
        }
        Ok(Self::with_writer(
            &settings.port,
            Box::new(port),
            settings.encoding,
            labels,
        ))
    }

    pub fn with_writer(
        name: &str,
        writer: Box<dyn Write + Send>,
        encoding: ActuatorEncoding,
        labels: LabelTable,
    ) -> Self {
        Self {
            name: name.to_string(),
            writer,
            encoding,
            labels,
        }
    }
}

impl EventSink for SerialActuator {
    fn name(&self) -> &str {
        &self.name
    }

    fn deliver(&mut self, event: &ClassificationEvent) -> Result<()> {
        let message = self.encoding.encode(event, &self.labels);
        self.writer
            .write_all(&message)
            .with_context(|| format!("serial write to {} failed", self.name))?;
        self.writer
            .flush()
            .with_context(|| format!("serial flush on {} failed", self.name))?;
        log::debug!(
            "actuator {} <- {:?} ({})",
            self.name,
            String::from_utf8_lossy(&message),
            self.encoding.as_str()
        );
        Ok(())
    }

    fn close(&mut self) {
        if let Err(err) = self.writer.flush() {
            log::warn!("final flush on {} failed: {}", self.name, err);
        }
        log::info!("serial port {} closed", self.name);
    }
}
