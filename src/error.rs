// Copyright 2019-2020 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ErrorKind {
    #[error("io error")]
    IoError(#[from] io::Error),
    #[error("nix error")]
    NixError(#[from] nix::Error),
    #[error("json error")]
    JsonError(#[from] serde_json::Error),
    #[error("failed to launch {identifier}")]
    Launch {
        identifier: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to materialize configuration from template {template}")]
    Materialize {
        template: String,
        #[source]
        source: io::Error,
    },
    #[error("template {template} not found at {}", path.display())]
    TemplateNotFound { template: String, path: PathBuf },
    #[error("unexpected control opcode: {0}")]
    UnexpectedOpcode(u8),
    #[error("control channel closed by peer")]
    PeerClosed,
    #[error("required parameter is missing: {0}")]
    MissingParameter(&'static str),
    #[error("invalid topology: {0}")]
    InvalidTopology(String),
    #[error("deadline of {0:?} elapsed")]
    DeadlineElapsed(Duration),
    #[error("an error occured: {0}")]
    ErrorMsg(String),
    #[error("an error occured: {0}")]
    ErrorStr(&'static str),
}

#[derive(Error, Debug)]
#[error(transparent)]
pub struct Error(ErrorKind);

impl Error {
    fn from_kind(kind: ErrorKind) -> Self {
        Self(kind)
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.0
    }
}

impl<E> From<E> for Error
where
    E: Into<ErrorKind>,
{
    fn from(err: E) -> Self {
        Self::from_kind(err.into())
    }
}

impl From<&'static str> for Error {
    fn from(err: &'static str) -> Self {
        Self::from_kind(ErrorKind::ErrorStr(err))
    }
}

impl From<String> for Error {
    fn from(err: String) -> Self {
        Self::from_kind(ErrorKind::ErrorMsg(err))
    }
}
