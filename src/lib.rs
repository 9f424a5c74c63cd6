// Copyright (C) 2024 Daniel Mueller <deso@posteo.net>
// SPDX-License-Identifier: GPL-3.0-or-later

#![allow(
  clippy::collapsible_else_if,
  clippy::collapsible_if,
  clippy::let_and_return,
  clippy::let_unit_value
)]

pub mod cipher;
mod config;
mod content;
mod error;
mod message;
mod resolve;
mod security;
mod session;
mod smtp;
mod store;
mod template;

use anyhow::Context as _;
use anyhow::Result;

use tracing::debug;

pub use crate::config::defaults;
pub use crate::config::ConnectionProfile;
pub use crate::config::MessagePreset;
pub use crate::config::SmtpMode;
pub use crate::content::guess_content_type;
pub use crate::content::ContentType;
pub use crate::error::ConnectError;
pub use crate::error::DecryptError;
pub use crate::error::ExitStatus;
pub use crate::error::SmtpError;
pub use crate::error::Stage;
pub use crate::message::build_message;
pub use crate::message::Body;
pub use crate::message::OutgoingMessage;
pub use crate::message::USER_AGENT;
pub use crate::resolve::resolve_connection;
pub use crate::resolve::resolve_message;
pub use crate::resolve::split_host;
pub use crate::resolve::ConnectionArgs;
pub use crate::resolve::ConnectionParams;
pub use crate::resolve::Envelope;
pub use crate::resolve::MessageArgs;
pub use crate::resolve::MessageParams;
pub use crate::security::determine_ssl_tls;
pub use crate::session::Delivery;
pub use crate::session::Failure;
pub use crate::session::Outcome;
pub use crate::session::Rejection;
pub use crate::session::Sender;
pub use crate::session::Session;
pub use crate::session::Transport;
pub use crate::smtp::SmtpSession;
pub use crate::smtp::SmtpTransport;
pub use crate::store::PresetStore;
pub use crate::store::Presets;
pub use crate::template::TemplateFields;
pub use lettre::Address;


/// The inputs of a single send operation.
#[derive(Clone, Debug, Default)]
pub struct SendRequest {
  /// The name of the connection profile to use, if any.
  pub profile: Option<String>,
  /// The name of the message preset to use, if any.
  pub message: Option<String>,
  pub connection: ConnectionArgs,
  pub content: MessageArgs,
  /// Template fields in `Name=Value` form.
  pub template_fields: Vec<String>,
  /// Template fields in `Name=<json>` form.
  pub template_fields_json: Vec<String>,
}


/// A fully resolved send operation.
#[derive(Clone, Debug)]
pub struct PreparedSend {
  pub connection: ConnectionParams,
  pub params: MessageParams,
  pub envelope: Envelope,
  pub message: OutgoingMessage,
}


/// Validate a request and resolve it against the known presets.
///
/// No network activity happens as part of this step.
pub fn prepare_send(presets: &Presets, request: &SendRequest) -> Result<PreparedSend> {
  let connection_args = request.connection.clone().normalize()?;
  let () = request.content.validate()?;

  let profile = request
    .profile
    .as_deref()
    .map(|name| presets.profile(name))
    .transpose()?;
  let preset = request
    .message
    .as_deref()
    .map(|name| presets.message(name))
    .transpose()?;

  let connection = resolve_connection(&connection_args, profile)?;
  let params = resolve_message(&request.content, preset);
  let envelope = params.envelope()?;

  let mut fields = TemplateFields::parse(&request.template_fields, &request.template_fields_json)?;
  let () = fields
    .add_defaults(&params, profile, preset)
    .context("failed to set up template fields")?;
  let message = build_message(&params, &fields).context("failed to build message")?;

  debug!(
    host = connection.host.as_str(),
    port = connection.port,
    mode = ?connection.mode,
    recipients = envelope.to.len(),
    "prepared message"
  );

  Ok(PreparedSend {
    connection,
    params,
    envelope,
    message,
  })
}
