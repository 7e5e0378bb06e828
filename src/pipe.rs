// Copyright 2019 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Forwards a child's output streams into the orchestrator's log

use std::fmt;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stream {
    Stdout,
    Stderr,
}

impl Stream {
    pub fn display(self) -> &'static str {
        match self {
            Stream::Stdout => "stdout",
            Stream::Stderr => "stderr",
        }
    }
}

impl fmt::Display for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display())
    }
}

/// Logs every line of `reader` under `identifier` until the stream closes
pub fn forward_output<R>(identifier: &str, stream: Stream, reader: R) -> JoinHandle<usize>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let identifier = identifier.to_string();

    tokio::spawn(async move {
        let count = drain_lines(reader, |line| match stream {
            Stream::Stdout => info!(child = %identifier, "{}", line),
            Stream::Stderr => warn!(child = %identifier, "{}", line),
        })
        .await;

        debug!(child = %identifier, %stream, lines = count, "output closed");
        count
    })
}

/// Hands each line to `sink`, returns the number of lines read
///
/// Bytes that are not UTF-8 are replaced, the stream is read until it closes either way.
pub async fn drain_lines<R, F>(reader: R, mut sink: F) -> usize
where
    R: AsyncRead + Unpin,
    F: FnMut(&str),
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    let mut count = 0;

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = trim_line_ending(&buf);
                count += 1;
                sink(&String::from_utf8_lossy(line));
            }
            Err(e) => {
                debug!("error reading child output: {}", e);
                break;
            }
        }
    }

    count
}

fn trim_line_ending(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_drain_lines() {
        let mut seen = Vec::new();
        let input: &[u8] = b"STARTING BROKER\nWAITING FOR STOP\npartial";

        let count = drain_lines(input, |line| seen.push(line.to_string())).await;
        assert_eq!(count, 3);
        assert_eq!(seen, vec!["STARTING BROKER", "WAITING FOR STOP", "partial"]);
    }

    #[tokio::test]
    async fn test_drain_lines_survives_invalid_utf8() {
        let mut seen = Vec::new();
        let input: &[u8] = b"one\n\xff\xfe latin1\r\nthree\nfour\n";

        let count = drain_lines(input, |line| seen.push(line.to_string())).await;
        assert_eq!(count, 4);
        assert_eq!(seen[0], "one");
        assert_eq!(seen[1], "\u{fffd}\u{fffd} latin1");
        assert_eq!(&seen[2..], &["three".to_string(), "four".to_string()]);
    }

    #[tokio::test]
    async fn test_forward_completes_on_close() {
        let input: &'static [u8] = b"one\ntwo\n";
        let lines = forward_output("broker-0", Stream::Stderr, input)
            .await
            .unwrap();
        assert_eq!(lines, 2);
    }
}
