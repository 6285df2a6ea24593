//! The one auxiliary OS thread `spec.md` §5 allows: reads command lines
//! synchronously (from a script file or stdin) and hands each to the
//! protocol loop through a capacity-1 channel, the "bounded hand-off
//! slot". A line arriving while the slot is still full is dropped with a
//! warning ("simulator busy") rather than queued, matching the source.

use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

use tokio::sync::mpsc;

pub fn spawn(script: Option<&Path>) -> std::io::Result<mpsc::Receiver<String>> {
    let reader: Box<dyn Read + Send> = match script {
        Some(path) => Box::new(File::open(path)?),
        None => Box::new(std::io::stdin()),
    };
    let (tx, rx) = mpsc::channel(1);
    std::thread::spawn(move || {
        for line in BufReader::new(reader).lines() {
            let Ok(line) = line else { break };
            let line = line.trim().to_string();
            if line.is_empty() {
                continue;
            }
            if tx.try_send(line).is_err() {
                tracing::warn!("simulator busy, dropping command");
            }
        }
    });
    Ok(rx)
}
