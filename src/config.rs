// Copyright (C) 2024 Daniel Mueller <deso@posteo.net>
// SPDX-License-Identifier: GPL-3.0-or-later

use std::fmt::Display;

use serde::Deserialize;
use serde::Serialize;

use crate::content::ContentType;


/// Fallback values for fields that neither the command line nor a
/// preset provided.
pub mod defaults {
  pub const LOGIN: Option<&str> = None;
  pub const PASSWORD: Option<&str> = None;
  pub const HOST: &str = "127.0.0.1";
  pub const PORT: u16 = 25;
  pub const SSL: bool = false;
  pub const TLS: bool = false;
  /// The connection timeout, in seconds.
  pub const CONNECTION_TIMEOUT: u64 = 30;
  pub const SESSION_TIMEOUT: Option<u64> = None;
  pub const IDENTIFY_AS: Option<&str> = None;
  pub const SOURCE_ADDRESS: Option<&str> = None;

  pub const ENVELOPE_FROM: Option<&str> = None;
  pub const ADDRESS_FROM: Option<&str> = None;
  pub const ENVELOPE_TO: &[&str] = &[];
  pub const ADDRESS_TO: &[&str] = &[];
  pub const ADDRESS_CC: &[&str] = &[];
  pub const ADDRESS_BCC: &[&str] = &[];
  pub const REPLY_TO: &[&str] = &[];
  pub const SUBJECT: Option<&str> = None;
  pub const BODY: Option<&str> = None;
  pub const BODY_HTML: Option<&str> = None;
  pub const RAW_BODY: bool = false;
  pub const HEADERS: &[&str] = &[];
}


#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum SmtpMode {
  /// Use unencrypted SMTP (typically on port 25).
  Unencrypted,
  /// Use StartTLS mode (often on port 587).
  StartTls,
  /// Use full TLS mode (often on port 465).
  Tls,
}

impl SmtpMode {
  /// Map a resolved `(ssl, tls)` pair onto a mode.
  ///
  /// Implicit TLS takes precedence, though the security resolver never
  /// produces both flags at once.
  pub fn from_flags(ssl: bool, tls: bool) -> Self {
    match (ssl, tls) {
      (true, _) => Self::Tls,
      (false, true) => Self::StartTls,
      (false, false) => Self::Unencrypted,
    }
  }

  #[inline]
  pub fn is_ssl(&self) -> bool {
    matches!(self, Self::Tls)
  }

  #[inline]
  pub fn is_tls(&self) -> bool {
    matches!(self, Self::StartTls)
  }
}


/// A named bundle of SMTP connection settings.
///
/// Every field is optional: an absent field falls through to the
/// built-in default during resolution and is omitted when the profile
/// is written back.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct ConnectionProfile {
  /// The profile's name; the key it is stored under.
  #[serde(skip)]
  pub name: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub login: Option<String>,
  /// The password, either as plain text or tagged with `enc:` (see
  /// [`crate::cipher`]) or `raw:`.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub password: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub host: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub port: Option<u16>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub ssl: Option<bool>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub tls: Option<bool>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub connection_timeout: Option<u64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub session_timeout: Option<u64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub identify_as: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub source_address: Option<String>,
}

impl ConnectionProfile {
  /// Render the profile's attributes for display, masking the password
  /// unless `reveal` is set.
  pub fn describe(&self, reveal: bool) -> String {
    fn opt<T: Display>(value: &Option<T>) -> String {
      value
        .as_ref()
        .map(|value| format!("\"{value}\""))
        .unwrap_or_else(|| "-".to_string())
    }

    let password = match (&self.password, reveal) {
      (None, _) => "-".to_string(),
      (Some(_), false) => "***".to_string(),
      (Some(password), true) => format!("\"{password}\""),
    };

    format!(
      "login: {}, password: {password}, host: {}, port: {}, ssl: {}, tls: {}, connection_timeout: {}, session_timeout: {}, identify_as: {}, source_address: {}",
      opt(&self.login),
      opt(&self.host),
      opt(&self.port),
      opt(&self.ssl),
      opt(&self.tls),
      opt(&self.connection_timeout),
      opt(&self.session_timeout),
      opt(&self.identify_as),
      opt(&self.source_address),
    )
  }
}


/// A named bundle of message content.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct MessagePreset {
  /// The preset's name; the key it is stored under.
  #[serde(skip)]
  pub name: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub envelope_from: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub address_from: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub envelope_to: Option<Vec<String>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub address_to: Option<Vec<String>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub address_cc: Option<Vec<String>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub address_bcc: Option<Vec<String>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub reply_to: Option<Vec<String>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub subject: Option<String>,
  #[serde(default, alias = "body_plain", skip_serializing_if = "Option::is_none")]
  pub body: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub body_html: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub raw_body: Option<bool>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub body_type: Option<ContentType>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub headers: Option<Vec<String>>,
}

impl MessagePreset {
  /// Summarize the preset for listing purposes.
  pub fn describe(&self) -> String {
    let from = self
      .address_from
      .as_deref()
      .or(self.envelope_from.as_deref())
      .unwrap_or("");
    let to = self
      .address_to
      .as_ref()
      .filter(|to| !to.is_empty())
      .or(self.envelope_to.as_ref())
      .map(|to| to.join(", "))
      .unwrap_or_default();
    let subject = self.subject.as_deref().unwrap_or("");

    format!("subject: \"{subject}\", from: \"{from}\", to: \"{to}\"")
  }
}
