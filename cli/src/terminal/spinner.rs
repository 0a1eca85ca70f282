//! The one thread that owns the terminal.
//!
//! Every log line from every pipeline is sent over a single channel and
//! printed whole by the console thread, above the progress spinner when one
//! is running. Nothing else writes to stdout.

use std::sync::OnceLock;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;
use std::time::Duration;

use colored::*;
use indicatif::{ProgressBar, ProgressStyle};

const TICK_RATE: Duration = Duration::from_millis(100);
const FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

enum ConsoleMsg {
    Line(String),
    Status(String),
    Clear,
    Flush(Sender<()>),
}

pub struct ConsoleHandle {
    tx: Sender<ConsoleMsg>,
}

impl ConsoleHandle {
    fn send(&self, msg: ConsoleMsg) {
        let _ = self.tx.send(msg);
    }

    pub fn println(&self, line: String) {
        self.send(ConsoleMsg::Line(line));
    }

    pub fn set_status(&self, status: String) {
        self.send(ConsoleMsg::Status(status));
    }

    pub fn clear_status(&self) {
        self.send(ConsoleMsg::Clear);
    }

    /// Blocks until every line queued so far has been printed.
    pub fn flush(&self) {
        let (ack_tx, ack_rx) = mpsc::channel();
        self.send(ConsoleMsg::Flush(ack_tx));
        let _ = ack_rx.recv_timeout(FLUSH_TIMEOUT);
    }
}

static CONSOLE: OnceLock<ConsoleHandle> = OnceLock::new();

pub fn console() -> &'static ConsoleHandle {
    CONSOLE.get_or_init(init_console)
}

fn init_console() -> ConsoleHandle {
    let (tx, rx) = mpsc::channel::<ConsoleMsg>();
    thread::spawn(move || run_console(rx));
    ConsoleHandle { tx }
}

fn spinner_style() -> ProgressStyle {
    ProgressStyle::with_template("{spinner:.blue} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_strings(&[
            "▁▁▁▁▁",
            "▁▂▂▂▁",
            "▁▄▂▄▁",
            "▂▄▆▄▂",
            "▄▆█▆▄",
            "▂▄▆▄▂",
            "▁▄▂▄▁",
            "▁▂▂▂▁",
        ])
}

fn run_console(rx: Receiver<ConsoleMsg>) {
    let mut spinner: Option<ProgressBar> = None;

    for msg in rx {
        match msg {
            ConsoleMsg::Line(line) => match &spinner {
                Some(pb) if !pb.is_hidden() => pb.println(line),
                _ => println!("{line}"),
            },
            ConsoleMsg::Status(status) => {
                let pb = spinner.get_or_insert_with(|| {
                    let pb = ProgressBar::new_spinner();
                    pb.set_style(spinner_style());
                    pb.enable_steady_tick(TICK_RATE);
                    pb
                });
                pb.set_message(status);
            }
            ConsoleMsg::Clear => {
                if let Some(pb) = spinner.take() {
                    pb.finish_and_clear();
                }
            }
            ConsoleMsg::Flush(ack) => {
                let _ = ack.send(());
            }
        }
    }

    if let Some(pb) = spinner {
        pb.finish_and_clear();
    }
}

pub fn report_progress(finished: usize, total: usize) {
    console().set_status(format!(
        "{}/{} targets finished",
        finished.to_string().green().bold(),
        total
    ));
}

/// `MakeWriter` target for the tracing subscriber. The fmt layer hands it
/// one fully formatted event per write.
pub struct SpinnerWriter(pub &'static ConsoleHandle);

impl std::io::Write for SpinnerWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let msg = String::from_utf8_lossy(buf);
        self.0.println(msg.trim_end().to_string());
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
