//! Line input for the console.
//!
//! Blocking reads happen on a dedicated OS thread so that a pending read
//! never keeps the async runtime from shutting down.

use std::io::{self, BufRead};
use std::thread;

use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Lines buffered between the reader thread and the console.
const LINE_BUFFER: usize = 16;

/// Read lines from `reader` on a background thread.
///
/// The channel closes at end of input, on a read error, or once the
/// receiver is dropped and the next line arrives.
///
/// # Errors
///
/// Returns an error if the thread cannot be spawned.
pub fn spawn_line_reader<R>(reader: R) -> io::Result<mpsc::Receiver<String>>
where
    R: BufRead + Send + 'static,
{
    let (tx, rx) = mpsc::channel(LINE_BUFFER);

    thread::Builder::new()
        .name("console-input".to_string())
        .spawn(move || {
            for line in reader.lines() {
                match line {
                    Ok(line) => {
                        if tx.blocking_send(line).is_err() {
                            break;
                        }
                    },
                    Err(e) => {
                        warn!(error = %e, "Failed to read console input");
                        break;
                    },
                }
            }
            debug!("Console input reader finished");
        })?;

    Ok(rx)
}

/// Read lines from standard input on a background thread.
///
/// # Errors
///
/// Returns an error if the thread cannot be spawned.
pub fn spawn_stdin_reader() -> io::Result<mpsc::Receiver<String>> {
    spawn_line_reader(io::BufReader::new(io::stdin()))
}
