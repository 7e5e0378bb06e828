// Copyright 2019 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Wire format of the control channel.
//!
//! Every message is a single byte, there is no framing and no payload.

use std::convert::TryFrom;
use std::fmt;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::ErrorKind;
use crate::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    /// Coordinator to child, stop the embedded broker
    Stop = 1,
    /// Child to coordinator, the embedded broker is running
    Started = 2,
    /// Child to coordinator, the embedded broker has stopped
    Stopped = 3,
}

impl Opcode {
    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for Opcode {
    type Error = Error;

    fn try_from(byte: u8) -> Result<Self, Error> {
        match byte {
            1 => Ok(Opcode::Stop),
            2 => Ok(Opcode::Started),
            3 => Ok(Opcode::Stopped),
            other => Err(ErrorKind::UnexpectedOpcode(other).into()),
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Opcode::Stop => "stop",
            Opcode::Started => "started",
            Opcode::Stopped => "stopped",
        };

        f.write_str(name)
    }
}

/// Reads the next opcode, a clean EOF is reported as `PeerClosed`
pub async fn recv_opcode<R>(from: &mut R) -> Result<Opcode, Error>
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; 1];
    let len = from.read(&mut buf).await?;
    if len == 0 {
        return Err(ErrorKind::PeerClosed.into());
    }

    Opcode::try_from(buf[0])
}

pub async fn send_opcode<W>(target: &mut W, opcode: Opcode) -> Result<(), Error>
where
    W: AsyncWrite + Unpin,
{
    target.write_all(&[opcode.as_byte()]).await?;
    target.flush().await?;
    Ok(())
}
