//! actuator_probe - interactive console for the sorting controller
//!
//! Each line typed on stdin is written to the serial port as-is, and any
//! reply the controller prints is echoed back. `emit <class_id>` sends the
//! message the daemon would write for that class with the selected
//! encoding. `quit` exits.

use anyhow::{anyhow, Result};
use clap::Parser;
use serialport::SerialPort;
use std::io::{BufRead, Write};
use std::time::Duration;

use sorter_kernel::dispatch::{open_port, ActuatorEncoding};
use sorter_kernel::{ClassificationEvent, Detection, LabelTable};

#[derive(Parser, Debug)]
#[command(author, version, about = "Bench console for the serial sorting controller")]
struct Args {
    /// Serial port of the controller.
    #[arg(long, env = "SORTER_SERIAL_PORT", default_value = "/dev/ttyUSB0")]
    port: String,

    /// Baud rate.
    #[arg(long, default_value_t = 9600)]
    baud: u32,

    /// Wait after opening the port while the controller resets (ms).
    #[arg(long, default_value_t = 2000)]
    settle_ms: u64,

    /// Wait after each write before reading a reply (ms).
    #[arg(long, default_value_t = 100)]
    reply_wait_ms: u64,

    /// Encoding used by `emit` (class|category|triple).
    #[arg(long, default_value = "class")]
    encoding: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let encoding: ActuatorEncoding = args.encoding.parse()?;
    let labels = LabelTable::default();

    let mut port = open_port(&args.port, args.baud, Duration::from_secs(1))?;
    std::thread::sleep(Duration::from_millis(args.settle_ms));
    println!("connected to {} at {} baud", args.port, args.baud);
    println!("type a message to send, `emit <class_id>`, or `quit`");

    let stdin = std::io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;
        let Some(line) = lines.next() else {
            break;
        };
        let line = line?;
        let command = line.trim();
        if command.eq_ignore_ascii_case("quit") {
            break;
        }
        if command.is_empty() {
            continue;
        }

        let message = match command.strip_prefix("emit ") {
            Some(raw_id) => match emit_message(raw_id, encoding, &labels) {
                Ok(message) => message,
                Err(err) => {
                    eprintln!("{}", err);
                    continue;
                }
            },
            None => command.as_bytes().to_vec(),
        };

        port.write_all(&message)?;
        port.flush()?;
        std::thread::sleep(Duration::from_millis(args.reply_wait_ms));
        if let Some(reply) = read_reply(port.as_mut())? {
            println!("controller: {}", reply);
        }
    }

    log::info!("serial port {} closed", args.port);
    Ok(())
}

fn emit_message(raw_id: &str, encoding: ActuatorEncoding, labels: &LabelTable) -> Result<Vec<u8>> {
    let class_id: u32 = raw_id
        .trim()
        .parse()
        .map_err(|_| anyhow!("emit expects a numeric class id, got '{}'", raw_id.trim()))?;
    let detection = Detection::new(class_id, 1.0, &labels.label(class_id));
    let event = ClassificationEvent::debounced(detection);
    let message = encoding.encode(&event, labels);
    println!(
        "sending {:?} ({} -> {})",
        String::from_utf8_lossy(&message),
        event.label,
        encoding.as_str()
    );
    Ok(message)
}

fn read_reply(port: &mut dyn SerialPort) -> Result<Option<String>> {
    let pending = port.bytes_to_read()? as usize;
    if pending == 0 {
        return Ok(None);
    }
    let mut buf = vec![0u8; pending];
    let read = port.read(&mut buf)?;
    let reply = String::from_utf8_lossy(&buf[..read]).trim().to_string();
    Ok((!reply.is_empty()).then_some(reply))
}
