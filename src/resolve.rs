// Copyright (C) 2024 Daniel Mueller <deso@posteo.net>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Resolution of command line values, presets, and defaults into the
//! parameters of a single send operation.

use std::net::IpAddr;
use std::time::Duration;

use anyhow::bail;
use anyhow::ensure;
use anyhow::Context as _;
use anyhow::Result;

use lettre::message::Mailbox;
use lettre::Address;

use tracing::trace;

use crate::config::defaults;
use crate::config::ConnectionProfile;
use crate::config::MessagePreset;
use crate::config::SmtpMode;
use crate::content::ContentType;
use crate::security::determine_ssl_tls;


/// The source a resolved field's value came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Source {
  Explicit,
  Preset,
  Default,
}


/// A three-tier lookup: explicit value, then preset value, then default.
#[derive(Debug)]
pub struct Resolver<'p, P> {
  preset: Option<&'p P>,
}

impl<'p, P> Resolver<'p, P> {
  pub fn new(preset: Option<&'p P>) -> Self {
    Self { preset }
  }

  fn pick<T, F>(&self, name: &str, explicit: Option<T>, get: F) -> (Option<T>, Source)
  where
    T: Clone,
    F: FnOnce(&P) -> Option<&T>,
  {
    let (value, source) = if explicit.is_some() {
      (explicit, Source::Explicit)
    } else if let Some(value) = self.preset.and_then(get) {
      (Some(value.clone()), Source::Preset)
    } else {
      (None, Source::Default)
    };
    trace!(field = name, source = ?source, "resolved field");
    (value, source)
  }

  /// Resolve a field that always has a default value.
  pub fn value<T, F>(&self, name: &str, explicit: Option<T>, get: F, default: T) -> T
  where
    T: Clone,
    F: FnOnce(&P) -> Option<&T>,
  {
    let (value, _source) = self.pick(name, explicit, get);
    value.unwrap_or(default)
  }

  /// Resolve a field that may stay unset.
  pub fn optional<T, F>(
    &self,
    name: &str,
    explicit: Option<T>,
    get: F,
    default: Option<T>,
  ) -> Option<T>
  where
    T: Clone,
    F: FnOnce(&P) -> Option<&T>,
  {
    let (value, _source) = self.pick(name, explicit, get);
    value.or(default)
  }
}


/// Split a `--host` value into host name and optional port.
///
/// `smtp://` and `smtps://` prefixes are stripped. Bare IPv6 addresses
/// are kept intact; use `[addr]:port` to attach a port to one.
pub fn split_host(host: &str) -> Result<(String, Option<u16>)> {
  let stripped = host
    .strip_prefix("smtp://")
    .or_else(|| host.strip_prefix("smtps://"))
    .unwrap_or(host)
    .trim_end_matches('/');

  let (name, port) = if let Some(rest) = stripped.strip_prefix('[') {
    let (name, rest) = rest
      .split_once(']')
      .with_context(|| format!("invalid host specification `{host}`: missing `]`"))?;
    match rest.strip_prefix(':') {
      Some(port) => (name, Some(port)),
      None if rest.is_empty() => (name, None),
      None => bail!("invalid host specification `{host}`"),
    }
  } else {
    match stripped.split_once(':') {
      Some((name, port)) if !port.contains(':') => (name, Some(port)),
      _ => (stripped, None),
    }
  };

  ensure!(!name.is_empty(), "invalid host specification `{host}`: empty host");

  let port = port
    .map(|port| {
      port
        .parse::<u16>()
        .with_context(|| format!("invalid port `{port}` in host specification `{host}`"))
    })
    .transpose()?;

  Ok((name.to_string(), port))
}


/// Explicitly provided connection values, typically from the command
/// line.
#[derive(Clone, Debug, Default)]
pub struct ConnectionArgs {
  pub login: Option<String>,
  pub password: Option<String>,
  pub host: Option<String>,
  pub port: Option<u16>,
  pub ssl: bool,
  pub tls: bool,
  pub no_ssl: bool,
  pub no_tls: bool,
  pub connection_timeout: Option<u64>,
  pub session_timeout: Option<u64>,
  pub identify_as: Option<String>,
  pub source_address: Option<String>,
}

impl ConnectionArgs {
  /// Validate the values and normalize the host specification.
  pub fn normalize(mut self) -> Result<Self> {
    ensure!(!(self.ssl && self.tls), "cannot use --ssl and --tls together");
    ensure!(
      self.login.is_some() == self.password.is_some(),
      "required both or none: --login, --password"
    );

    if let Some(host) = self.host.take() {
      let (host, port) = split_host(&host)?;
      self.host = Some(host);
      self.port = self.port.or(port);
    }
    Ok(self)
  }

  /// Check whether any of the security mode flags was provided.
  #[inline]
  fn has_security_flags(&self) -> bool {
    self.ssl || self.tls || self.no_ssl || self.no_tls
  }

  /// Convert the explicit values into a profile to persist.
  ///
  /// Only provided values are stored. The security mode is stored only
  /// when one of the security flags was given; otherwise it is inferred
  /// from the port on every use.
  pub fn into_profile(self, name: &str) -> Result<ConnectionProfile> {
    let this = self.normalize()?;
    let (ssl, tls) = determine_ssl_tls(
      this.port.unwrap_or(defaults::PORT),
      Some(this.ssl),
      Some(this.tls),
      this.no_ssl,
      this.no_tls,
    )?;
    let store_mode = this.has_security_flags();

    let profile = ConnectionProfile {
      name: name.to_string(),
      login: this.login,
      password: this.password,
      host: this.host,
      port: this.port,
      ssl: store_mode.then_some(ssl),
      tls: store_mode.then_some(tls),
      connection_timeout: this.connection_timeout,
      session_timeout: this.session_timeout,
      identify_as: this.identify_as,
      source_address: this.source_address,
    };
    Ok(profile)
  }
}


/// Fully resolved parameters of an SMTP connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionParams {
  pub host: String,
  pub port: u16,
  pub mode: SmtpMode,
  pub login: Option<String>,
  /// The password in its stored form, possibly tagged with `enc:` or
  /// `raw:`.
  pub password: Option<String>,
  pub connection_timeout: Duration,
  pub session_timeout: Option<Duration>,
  pub identify_as: Option<String>,
  pub source_address: Option<IpAddr>,
}


/// Resolve the connection parameters from explicit values and an
/// optional profile.
pub fn resolve_connection(
  args: &ConnectionArgs,
  profile: Option<&ConnectionProfile>,
) -> Result<ConnectionParams> {
  let resolver = Resolver::new(profile);

  let login = resolver.optional(
    "login",
    args.login.clone(),
    |p| p.login.as_ref(),
    defaults::LOGIN.map(str::to_string),
  );
  let password = resolver.optional(
    "password",
    args.password.clone(),
    |p| p.password.as_ref(),
    defaults::PASSWORD.map(str::to_string),
  );
  let host = resolver.value(
    "host",
    args.host.clone(),
    |p| p.host.as_ref(),
    defaults::HOST.to_string(),
  );
  let port = resolver.value("port", args.port, |p| p.port.as_ref(), defaults::PORT);

  // The security mode is resolved as a unit, with the port that won.
  // An explicit port invalidates whatever mode a profile stored.
  let (ssl, tls) = if args.has_security_flags() || args.port.is_some() {
    trace!(field = "ssl/tls", source = ?Source::Explicit, "resolved field");
    determine_ssl_tls(port, Some(args.ssl), Some(args.tls), args.no_ssl, args.no_tls)?
  } else if let Some(profile) = profile.filter(|p| p.ssl.is_some() || p.tls.is_some()) {
    trace!(field = "ssl/tls", source = ?Source::Preset, "resolved field");
    let ssl = profile.ssl.unwrap_or(defaults::SSL);
    let tls = profile.tls.unwrap_or(defaults::TLS);
    ensure!(
      !(ssl && tls),
      "profile `{}` enables both ssl and tls",
      profile.name
    );
    (ssl, tls)
  } else {
    trace!(field = "ssl/tls", source = ?Source::Default, "resolved field");
    determine_ssl_tls(port, Some(defaults::SSL), Some(defaults::TLS), false, false)?
  };

  let connection_timeout = resolver.value(
    "connection_timeout",
    args.connection_timeout,
    |p| p.connection_timeout.as_ref(),
    defaults::CONNECTION_TIMEOUT,
  );
  let session_timeout = resolver.optional(
    "session_timeout",
    args.session_timeout,
    |p| p.session_timeout.as_ref(),
    defaults::SESSION_TIMEOUT,
  );
  let identify_as = resolver.optional(
    "identify_as",
    args.identify_as.clone(),
    |p| p.identify_as.as_ref(),
    defaults::IDENTIFY_AS.map(str::to_string),
  );
  let source_address = resolver
    .optional(
      "source_address",
      args.source_address.clone(),
      |p| p.source_address.as_ref(),
      defaults::SOURCE_ADDRESS.map(str::to_string),
    )
    .map(|addr| {
      addr
        .parse::<IpAddr>()
        .with_context(|| format!("invalid source address `{addr}`"))
    })
    .transpose()?;

  let params = ConnectionParams {
    host,
    port,
    mode: SmtpMode::from_flags(ssl, tls),
    login,
    password,
    connection_timeout: Duration::from_secs(connection_timeout),
    session_timeout: session_timeout.map(Duration::from_secs),
    identify_as,
    source_address,
  };
  Ok(params)
}


/// Explicitly provided message values, typically from the command
/// line.
#[derive(Clone, Debug, Default)]
pub struct MessageArgs {
  pub envelope_from: Option<String>,
  pub address_from: Option<String>,
  pub envelope_to: Option<Vec<String>>,
  pub address_to: Option<Vec<String>>,
  pub address_cc: Option<Vec<String>>,
  pub address_bcc: Option<Vec<String>>,
  pub reply_to: Option<Vec<String>>,
  pub subject: Option<String>,
  pub body: Option<String>,
  pub body_html: Option<String>,
  pub raw_body: Option<bool>,
  pub body_type: Option<ContentType>,
  pub headers: Option<Vec<String>>,
}

impl MessageArgs {
  /// Check the values for mutual consistency.
  pub fn validate(&self) -> Result<()> {
    if let Some(reply_to) = &self.reply_to {
      ensure!(
        reply_to.len() <= 1,
        "only one --reply-to address is supported (got {})",
        reply_to.len()
      );
    }

    if self.raw_body == Some(true) {
      ensure!(
        self.body_html.is_none() && self.body_type.is_none(),
        "use --raw-body only with --body"
      );
    }

    for header in self.headers.iter().flatten() {
      let _header = parse_header(header)?;
    }
    Ok(())
  }

  /// Convert the explicit values into a message preset to persist.
  pub fn into_preset(self, name: &str) -> Result<MessagePreset> {
    let () = self.validate()?;

    let preset = MessagePreset {
      name: name.to_string(),
      envelope_from: self.envelope_from,
      address_from: self.address_from,
      envelope_to: self.envelope_to,
      address_to: self.address_to,
      address_cc: self.address_cc,
      address_bcc: self.address_bcc,
      reply_to: self.reply_to,
      subject: self.subject,
      body: self.body,
      body_html: self.body_html,
      raw_body: self.raw_body,
      body_type: self.body_type,
      headers: self.headers,
    };
    Ok(preset)
  }
}


/// Split a `Name=Value` header specification into its trimmed parts.
pub fn parse_header(header: &str) -> Result<(&str, &str)> {
  let (name, value) = header.split_once('=').with_context(|| {
    format!("invalid header syntax `{header}`; required syntax: HeaderName=HeaderValue")
  })?;
  let name = name.trim();
  ensure!(
    !name.is_empty(),
    "invalid header syntax `{header}`: empty header name"
  );
  Ok((name, value.trim()))
}


/// Fully resolved parameters of a message.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MessageParams {
  /// The name of the message preset in play, if any.
  pub preset: Option<String>,
  pub envelope_from: Option<String>,
  pub address_from: Option<String>,
  pub envelope_to: Vec<String>,
  pub address_to: Vec<String>,
  pub address_cc: Vec<String>,
  pub address_bcc: Vec<String>,
  pub reply_to: Vec<String>,
  pub subject: Option<String>,
  pub body: Option<String>,
  pub body_html: Option<String>,
  pub raw_body: bool,
  /// The explicitly declared body type, if any.
  pub body_type: Option<ContentType>,
  pub headers: Vec<String>,
}

impl MessageParams {
  /// Derive the SMTP envelope.
  ///
  /// Explicit envelope addresses take precedence over the header
  /// addresses. Mailboxes are reduced to their bare address.
  pub fn envelope(&self) -> Result<Envelope> {
    let from = self
      .envelope_from
      .as_deref()
      .or(self.address_from.as_deref())
      .context("missing sender: provide --envelope-from or --from")?;
    let from = parse_address(from)?;

    let to = if !self.envelope_to.is_empty() {
      self.envelope_to.iter().collect::<Vec<_>>()
    } else {
      self
        .address_to
        .iter()
        .chain(self.address_cc.iter())
        .chain(self.address_bcc.iter())
        .collect::<Vec<_>>()
    };
    ensure!(
      !to.is_empty(),
      "missing recipient: provide --envelope-to, --to, --cc, or --bcc"
    );

    let to = to
      .into_iter()
      .map(|addr| parse_address(addr))
      .collect::<Result<Vec<_>>>()?;

    Ok(Envelope { from, to })
  }
}


/// Reduce a mailbox specification (`Name <addr>` or `addr`) to its
/// address.
pub fn parse_address(mailbox: &str) -> Result<Address> {
  let mailbox = mailbox
    .parse::<Mailbox>()
    .with_context(|| format!("failed to parse email address `{mailbox}`"))?;
  Ok(mailbox.email)
}


/// The SMTP level sender and recipients of a message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Envelope {
  pub from: Address,
  pub to: Vec<Address>,
}


/// Resolve the message parameters from explicit values and an optional
/// message preset.
pub fn resolve_message(args: &MessageArgs, preset: Option<&MessagePreset>) -> MessageParams {
  fn list(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| value.to_string()).collect()
  }

  let resolver = Resolver::new(preset);

  MessageParams {
    preset: preset.map(|preset| preset.name.clone()),
    envelope_from: resolver.optional(
      "envelope_from",
      args.envelope_from.clone(),
      |p| p.envelope_from.as_ref(),
      defaults::ENVELOPE_FROM.map(str::to_string),
    ),
    address_from: resolver.optional(
      "address_from",
      args.address_from.clone(),
      |p| p.address_from.as_ref(),
      defaults::ADDRESS_FROM.map(str::to_string),
    ),
    envelope_to: resolver.value(
      "envelope_to",
      args.envelope_to.clone(),
      |p| p.envelope_to.as_ref(),
      list(defaults::ENVELOPE_TO),
    ),
    address_to: resolver.value(
      "address_to",
      args.address_to.clone(),
      |p| p.address_to.as_ref(),
      list(defaults::ADDRESS_TO),
    ),
    address_cc: resolver.value(
      "address_cc",
      args.address_cc.clone(),
      |p| p.address_cc.as_ref(),
      list(defaults::ADDRESS_CC),
    ),
    address_bcc: resolver.value(
      "address_bcc",
      args.address_bcc.clone(),
      |p| p.address_bcc.as_ref(),
      list(defaults::ADDRESS_BCC),
    ),
    reply_to: resolver.value(
      "reply_to",
      args.reply_to.clone(),
      |p| p.reply_to.as_ref(),
      list(defaults::REPLY_TO),
    ),
    subject: resolver.optional(
      "subject",
      args.subject.clone(),
      |p| p.subject.as_ref(),
      defaults::SUBJECT.map(str::to_string),
    ),
    body: resolver.optional(
      "body",
      args.body.clone(),
      |p| p.body.as_ref(),
      defaults::BODY.map(str::to_string),
    ),
    body_html: resolver.optional(
      "body_html",
      args.body_html.clone(),
      |p| p.body_html.as_ref(),
      defaults::BODY_HTML.map(str::to_string),
    ),
    raw_body: resolver.value(
      "raw_body",
      args.raw_body,
      |p| p.raw_body.as_ref(),
      defaults::RAW_BODY,
    ),
    body_type: resolver.optional("body_type", args.body_type, |p| p.body_type.as_ref(), None),
    headers: resolver.value(
      "headers",
      args.headers.clone(),
      |p| p.headers.as_ref(),
      list(defaults::HEADERS),
    ),
  }
}
