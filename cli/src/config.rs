// Copyright (C) 2024 Daniel Mueller <deso@posteo.net>
// SPDX-License-Identifier: GPL-3.0-or-later

use std::env::var_os;
use std::ffi::OsString;
use std::path::PathBuf;

use anyhow::Context as _;
use anyhow::Result;


/// The variable overriding the configuration directory.
const CONFIG_DIR_VAR: &str = "MAILSEND_CONFIG_DIR";
/// The variable providing the salt for password encryption.
const SALT_VAR: &str = "MAILSEND_SALT";


fn config_dir_with<F>(lookup: F, home: Option<PathBuf>) -> Result<PathBuf>
where
  F: Fn(&str) -> Option<OsString>,
{
  let non_empty = |name| lookup(name).filter(|value| !value.is_empty());

  if let Some(dir) = non_empty(CONFIG_DIR_VAR) {
    return Ok(PathBuf::from(dir))
  }
  if let Some(dir) = non_empty("XDG_CONFIG_HOME") {
    return Ok(PathBuf::from(dir).join("mailsend"))
  }

  let home = home.context("failed to determine home directory")?;
  Ok(home.join(".config").join("mailsend"))
}


/// Retrieve the directory holding the preset files.
pub(crate) fn config_dir() -> Result<PathBuf> {
  config_dir_with(|name| var_os(name), dirs::home_dir())
}


fn salt_with<F>(lookup: F) -> Result<String>
where
  F: Fn(&str) -> Option<OsString>,
{
  lookup(SALT_VAR)
    .map(|salt| {
      salt
        .into_string()
        .map_err(|_| anyhow::anyhow!("env var `{SALT_VAR}` is not valid UTF-8"))
    })
    .transpose()
    .map(Option::unwrap_or_default)
}


/// Retrieve the salt used for password encryption.
pub(crate) fn salt() -> Result<String> {
  salt_with(|name| var_os(name))
}


#[cfg(test)]
mod tests {
  use super::*;

  use std::collections::HashMap;


  fn env(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<OsString> {
    let vars = vars
      .iter()
      .map(|(name, value)| (name.to_string(), OsString::from(value)))
      .collect::<HashMap<_, _>>();
    move |name| vars.get(name).cloned()
  }


  /// Check the precedence of the configuration directory sources.
  #[test]
  fn config_dir_precedence() {
    let home = Some(PathBuf::from("/home/user"));

    let dir = config_dir_with(
      env(&[(CONFIG_DIR_VAR, "/etc/mailsend"), ("XDG_CONFIG_HOME", "/xdg")]),
      home.clone(),
    )
    .unwrap();
    assert_eq!(dir, PathBuf::from("/etc/mailsend"));

    let dir = config_dir_with(env(&[("XDG_CONFIG_HOME", "/xdg")]), home.clone()).unwrap();
    assert_eq!(dir, PathBuf::from("/xdg/mailsend"));

    let dir = config_dir_with(env(&[("XDG_CONFIG_HOME", "")]), home).unwrap();
    assert_eq!(dir, PathBuf::from("/home/user/.config/mailsend"));

    let err = config_dir_with(env(&[]), None).unwrap_err();
    assert_eq!(err.to_string(), "failed to determine home directory");
  }

  /// Check that the salt defaults to an empty string.
  #[test]
  fn salt_lookup() {
    assert_eq!(salt_with(env(&[])).unwrap(), "");
    assert_eq!(salt_with(env(&[(SALT_VAR, "pepper")])).unwrap(), "pepper");
  }
}
