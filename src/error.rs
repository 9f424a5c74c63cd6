// Copyright (C) 2024 Daniel Mueller <deso@posteo.net>
// SPDX-License-Identifier: GPL-3.0-or-later

use std::io;
use std::process::ExitCode;
use std::string::FromUtf8Error;
use std::time::Duration;

use thiserror::Error;


/// A failure to establish or maintain the connection to the server.
#[derive(Debug, Error)]
pub enum ConnectError {
  #[error("failed to resolve host `{host}`")]
  Resolve {
    host: String,
    #[source]
    source: io::Error,
  },
  #[error("host `{host}` did not resolve to any address")]
  NoAddress { host: String },
  #[error("failed to connect to {host}:{port}")]
  Connect {
    host: String,
    port: u16,
    #[source]
    source: lettre::transport::smtp::Error,
  },
  #[error("connection to {host}:{port} failed: {message}")]
  Network {
    host: String,
    port: u16,
    message: String,
  },
  #[error("session with {host}:{port} timed out after {}s", .timeout.as_secs())]
  Timeout {
    host: String,
    port: u16,
    timeout: Duration,
  },
}


/// The stage of an SMTP conversation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
  StartTls,
  Login,
  MailFrom,
  RcptTo,
  Data,
}

impl Stage {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::StartTls => "STARTTLS",
      Self::Login => "AUTH",
      Self::MailFrom => "MAIL FROM",
      Self::RcptTo => "RCPT TO",
      Self::Data => "DATA",
    }
  }
}


fn code_suffix(code: &Option<u16>) -> String {
  code.map(|code| format!(" ({code})")).unwrap_or_default()
}


/// A negative reply or protocol level failure reported for an SMTP
/// command.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{} failed{}: {message}", .stage.as_str(), code_suffix(.code))]
pub struct SmtpError {
  pub stage: Stage,
  /// The server's reply code, if the server replied.
  pub code: Option<u16>,
  pub message: String,
}


/// A failure to decrypt a stored password.
#[derive(Debug, Error)]
pub enum DecryptError {
  #[error("encrypted password is not valid base64")]
  Encoding(#[source] base64::DecodeError),
  #[error("encrypted password is malformed")]
  Malformed,
  #[error("failed to decrypt password: invalid key or salt")]
  Signature,
  #[error("failed to decrypt password: invalid padding")]
  Padding,
  #[error("decrypted password is not valid UTF-8")]
  Utf8(#[source] FromUtf8Error),
}


/// The exit status of the program.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum ExitStatus {
  Ok = 0,
  ConnectionError = 1,
  Other = 2,
}

impl ExitStatus {
  /// Classify an error into the exit status to report.
  pub fn classify(err: &anyhow::Error) -> Self {
    if err.chain().any(|cause| cause.is::<ConnectError>()) {
      Self::ConnectionError
    } else {
      Self::Other
    }
  }
}

impl From<ExitStatus> for ExitCode {
  fn from(status: ExitStatus) -> Self {
    ExitCode::from(status as u8)
  }
}
