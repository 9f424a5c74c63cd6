// Copyright (C) 2024 Daniel Mueller <deso@posteo.net>
// SPDX-License-Identifier: GPL-3.0-or-later

use clap::ArgAction;
use clap::Args as Arguments;
use clap::Parser;
use clap::Subcommand;

use mailsend::ConnectionArgs;
use mailsend::ContentType;
use mailsend::MessageArgs;


/// A program for sending emails via SMTP, using saved connection
/// profiles and message presets.
#[derive(Debug, Parser)]
#[clap(version)]
pub(crate) struct Args {
  #[clap(subcommand)]
  pub command: Command,
  /// Increase verbosity (can be supplied multiple times).
  #[clap(short = 'D', long = "debug", global = true, action = ArgAction::Count)]
  pub verbosity: u8,
}


#[derive(Debug, Subcommand)]
pub(crate) enum Command {
  /// Send an email.
  Send(SendArgs),
  /// Manage connection profiles.
  #[clap(subcommand)]
  Profiles(Profiles),
  /// Manage message presets.
  #[clap(subcommand)]
  Messages(Messages),
}


/// Arguments of the `send` command.
#[derive(Debug, Arguments)]
pub(crate) struct SendArgs {
  /// The name of the connection profile to use.
  #[clap(short = 'P', long)]
  pub profile: Option<String>,
  /// The name of the message preset to use.
  #[clap(short = 'M', long = "message")]
  pub message_preset: Option<String>,
  #[clap(flatten)]
  pub connection: ConnectionFlags,
  #[clap(flatten)]
  pub message: MessageFlags,
  /// A template field, in the form Name=Value.
  #[clap(long = "template-field", value_name = "NAME=VALUE")]
  pub template_fields: Vec<String>,
  /// A template field with a JSON value, in the form Name=<json>.
  #[clap(long = "template-field-json", value_name = "NAME=JSON")]
  pub template_fields_json: Vec<String>,
  /// Resolve and validate everything, but do not connect to the
  /// server.
  #[clap(long)]
  pub dry_run: bool,
}


#[derive(Debug, Subcommand)]
pub(crate) enum Profiles {
  /// List known profiles.
  List,
  /// Edit the profiles file in an editor.
  Edit,
  /// Add a profile, replacing any existing one with the same name.
  Add(AddProfile),
  /// Delete a profile.
  Delete {
    /// The name of the profile.
    name: String,
  },
}


#[derive(Debug, Arguments)]
pub(crate) struct AddProfile {
  /// The name of the profile.
  pub name: String,
  #[clap(flatten)]
  pub connection: ConnectionFlags,
  /// Store the password encrypted with a key that is prompted for.
  #[clap(long)]
  pub encrypt_password: bool,
}


#[derive(Debug, Subcommand)]
pub(crate) enum Messages {
  /// List known message presets.
  List,
  /// Edit the messages file in an editor.
  Edit,
  /// Add a message preset, replacing any existing one with the same
  /// name.
  Add(AddMessage),
  /// Delete a message preset.
  Delete {
    /// The name of the message preset.
    name: String,
  },
}


#[derive(Debug, Arguments)]
pub(crate) struct AddMessage {
  /// The name of the message preset.
  pub name: String,
  #[clap(flatten)]
  pub message: MessageFlags,
}


/// Flags describing an SMTP connection.
#[derive(Debug, Default, Arguments)]
pub(crate) struct ConnectionFlags {
  /// The login to authenticate with.
  #[clap(short, long)]
  pub login: Option<String>,
  /// The password to authenticate with; prompted for if no value is
  /// given.
  #[clap(short, long)]
  pub password: Option<Option<String>>,
  /// The SMTP server, optionally as host:port.
  #[clap(short = 's', long)]
  pub host: Option<String>,
  /// The port of the SMTP server.
  #[clap(short = 'o', long)]
  pub port: Option<u16>,
  /// Use implicit TLS (SMTPS).
  #[clap(long)]
  pub ssl: bool,
  /// Upgrade the connection via STARTTLS.
  #[clap(long)]
  pub tls: bool,
  /// Never use implicit TLS, even on port 465.
  #[clap(long)]
  pub no_ssl: bool,
  /// Never use STARTTLS, even on port 587.
  #[clap(long)]
  pub no_tls: bool,
  /// The connection timeout, in seconds.
  #[clap(long, value_name = "SECONDS")]
  pub connection_timeout: Option<u64>,
  /// The timeout for the entire SMTP session, in seconds.
  #[clap(long, value_name = "SECONDS")]
  pub session_timeout: Option<u64>,
  /// The name to identify as in EHLO.
  #[clap(long, value_name = "DOMAIN")]
  pub identify_as: Option<String>,
  /// The local address to connect from.
  #[clap(long, value_name = "ADDRESS")]
  pub source_address: Option<String>,
}

impl ConnectionFlags {
  /// Convert the flags into connection arguments, using `password`
  /// in place of the `--password` flag.
  pub fn into_args(self, password: Option<String>) -> ConnectionArgs {
    ConnectionArgs {
      login: self.login,
      password,
      host: self.host,
      port: self.port,
      ssl: self.ssl,
      tls: self.tls,
      no_ssl: self.no_ssl,
      no_tls: self.no_tls,
      connection_timeout: self.connection_timeout,
      session_timeout: self.session_timeout,
      identify_as: self.identify_as,
      source_address: self.source_address,
    }
  }
}


/// Flags describing a message.
#[derive(Debug, Default, Arguments)]
pub(crate) struct MessageFlags {
  /// The SMTP level sender address.
  #[clap(short = 'F', long)]
  pub envelope_from: Option<String>,
  /// The From header address.
  #[clap(short = 'f', long)]
  pub from: Option<String>,
  /// An SMTP level recipient address.
  #[clap(short = 'T', long)]
  pub envelope_to: Vec<String>,
  /// A To header address.
  #[clap(short = 't', long)]
  pub to: Vec<String>,
  /// A Cc header address.
  #[clap(short = 'c', long)]
  pub cc: Vec<String>,
  /// A Bcc address.
  #[clap(short = 'C', long)]
  pub bcc: Vec<String>,
  /// The Reply-To address.
  #[clap(short = 'r', long)]
  pub reply_to: Vec<String>,
  /// The subject of the email.
  #[clap(short = 'j', long)]
  pub subject: Option<String>,
  /// The plain text body.
  #[clap(short = 'b', long, alias = "body-plain")]
  pub body: Option<String>,
  /// The HTML body.
  #[clap(long)]
  pub body_html: Option<String>,
  /// The body type: plain, html, or alternative.
  #[clap(long)]
  pub body_type: Option<ContentType>,
  /// Treat --body as a complete message, sent as is.
  #[clap(long)]
  pub raw_body: bool,
  /// An additional header, in the form Name=Value.
  #[clap(short = 'H', long = "header", value_name = "NAME=VALUE")]
  pub headers: Vec<String>,
}

impl From<MessageFlags> for MessageArgs {
  fn from(flags: MessageFlags) -> Self {
    fn list(values: Vec<String>) -> Option<Vec<String>> {
      (!values.is_empty()).then_some(values)
    }

    Self {
      envelope_from: flags.envelope_from,
      address_from: flags.from,
      envelope_to: list(flags.envelope_to),
      address_to: list(flags.to),
      address_cc: list(flags.cc),
      address_bcc: list(flags.bcc),
      reply_to: list(flags.reply_to),
      subject: flags.subject,
      body: flags.body,
      body_html: flags.body_html,
      raw_body: flags.raw_body.then_some(true),
      body_type: flags.body_type,
      headers: list(flags.headers),
    }
  }
}
