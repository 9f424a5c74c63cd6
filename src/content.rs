// Copyright (C) 2024 Daniel Mueller <deso@posteo.net>
// SPDX-License-Identifier: GPL-3.0-or-later

use std::fmt::Display;
use std::fmt::Formatter;
use std::fmt::Result as FmtResult;
use std::str::FromStr;

use anyhow::bail;
use anyhow::Error;

use serde::Deserialize;
use serde::Serialize;


/// The shape of a message's body.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
  /// A single `text/plain` part.
  Plain,
  /// A single `text/html` part.
  Html,
  /// A `multipart/alternative` with plain and/or HTML parts.
  Alternative,
}

impl ContentType {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Plain => "plain",
      Self::Html => "html",
      Self::Alternative => "alternative",
    }
  }
}

impl Display for ContentType {
  fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
    f.write_str(self.as_str())
  }
}

impl FromStr for ContentType {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "plain" => Ok(Self::Plain),
      "html" => Ok(Self::Html),
      "alternative" => Ok(Self::Alternative),
      _ => bail!("invalid body type `{s}`; expected one of: plain, html, alternative"),
    }
  }
}


/// Infer the content type of a message from an explicitly declared
/// type and the body variants present.
pub fn guess_content_type(
  explicit: Option<ContentType>,
  plain: Option<&str>,
  html: Option<&str>,
) -> ContentType {
  if let Some(explicit) = explicit {
    return explicit
  }

  let plain = plain.is_some_and(|plain| !plain.is_empty());
  let html = html.is_some_and(|html| !html.is_empty());

  match (plain, html) {
    (true, true) => ContentType::Alternative,
    (false, true) => ContentType::Html,
    (true, false) | (false, false) => ContentType::Plain,
  }
}
