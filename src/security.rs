// Copyright (C) 2024 Daniel Mueller <deso@posteo.net>
// SPDX-License-Identifier: GPL-3.0-or-later

use anyhow::ensure;
use anyhow::Result;

use tracing::debug;


/// The port conventionally used for SMTP over implicit TLS.
pub const SSL_PORT: u16 = 465;
/// The port conventionally used for mail submission with STARTTLS.
pub const SUBMISSION_PORT: u16 = 587;


/// Determine whether to use implicit TLS (`ssl`) or STARTTLS (`tls`).
///
/// Explicitly requested modes pass through unchanged. If neither was
/// requested, the mode is inferred from the port, unless inference was
/// disabled via `no_ssl` or `no_tls`.
pub fn determine_ssl_tls(
  port: u16,
  ssl: Option<bool>,
  tls: Option<bool>,
  no_ssl: bool,
  no_tls: bool,
) -> Result<(bool, bool)> {
  let ssl = ssl.unwrap_or(false);
  let tls = tls.unwrap_or(false);
  ensure!(!(ssl && tls), "cannot use --ssl and --tls together");

  if ssl || tls {
    return Ok((ssl, tls))
  }

  let result = if port == SSL_PORT && !no_ssl {
    (true, false)
  } else if port == SUBMISSION_PORT && !no_tls {
    (false, true)
  } else {
    (false, false)
  };

  if result != (false, false) {
    debug!(port, ssl = result.0, tls = result.1, "inferred security mode from port");
  }
  Ok(result)
}


#[cfg(test)]
mod tests {
  use super::*;


  /// Check that the security mode is inferred from well-known ports.
  #[test]
  fn inference_by_port() {
    assert_eq!(
      determine_ssl_tls(465, None, None, false, false).unwrap(),
      (true, false)
    );
    assert_eq!(
      determine_ssl_tls(587, None, None, false, false).unwrap(),
      (false, true)
    );
    assert_eq!(
      determine_ssl_tls(25, None, None, false, false).unwrap(),
      (false, false)
    );
    assert_eq!(
      determine_ssl_tls(2525, None, None, false, false).unwrap(),
      (false, false)
    );
  }

  /// Check that `no_ssl` and `no_tls` suppress inference.
  #[test]
  fn inference_suppression() {
    assert_eq!(
      determine_ssl_tls(465, None, None, true, false).unwrap(),
      (false, false)
    );
    assert_eq!(
      determine_ssl_tls(587, None, None, false, true).unwrap(),
      (false, false)
    );
    // Suppressing one mode does not affect the other.
    assert_eq!(
      determine_ssl_tls(587, None, None, true, false).unwrap(),
      (false, true)
    );
  }

  /// Check that explicit requests are passed through untouched.
  #[test]
  fn explicit_modes() {
    assert_eq!(
      determine_ssl_tls(587, Some(true), None, false, false).unwrap(),
      (true, false)
    );
    assert_eq!(
      determine_ssl_tls(465, None, Some(true), false, false).unwrap(),
      (false, true)
    );
    assert_eq!(
      determine_ssl_tls(25, Some(true), Some(false), false, false).unwrap(),
      (true, false)
    );
  }

  /// Make sure that requesting both modes is rejected.
  #[test]
  fn ssl_and_tls_conflict() {
    let err = determine_ssl_tls(25, Some(true), Some(true), false, false).unwrap_err();
    assert_eq!(err.to_string(), "cannot use --ssl and --tls together");
  }
}
