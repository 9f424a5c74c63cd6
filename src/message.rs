// Copyright (C) 2024 Daniel Mueller <deso@posteo.net>
// SPDX-License-Identifier: GPL-3.0-or-later

use anyhow::bail;
use anyhow::Context as _;
use anyhow::Result;

use lettre::message::header::Cc;
use lettre::message::header::ContentType as MimeType;
use lettre::message::header::From as FromHeader;
use lettre::message::header::HeaderName;
use lettre::message::header::HeaderValue;
use lettre::message::header::Headers;
use lettre::message::header::ReplyTo;
use lettre::message::header::Subject;
use lettre::message::header::To;
use lettre::message::header::UserAgent;
use lettre::message::Mailbox;
use lettre::message::Mailboxes;
use lettre::message::MultiPart;
use lettre::message::SinglePart;

use tracing::debug;

use crate::content::guess_content_type;
use crate::content::ContentType;
use crate::resolve::parse_header;
use crate::resolve::MessageParams;
use crate::template::TemplateFields;


/// The value of the `User-Agent` header of every structured message.
pub const USER_AGENT: &str = concat!("mailsend/", env!("CARGO_PKG_VERSION"));


/// The body of a structured message.
#[derive(Clone, Debug)]
pub enum Body {
  /// A single `text/plain` or `text/html` part.
  Single(SinglePart),
  /// A `multipart/alternative` body.
  Alternative(MultiPart),
  /// A pre-formed body, emitted as is.
  Verbatim(String),
}


/// A message ready for submission.
#[derive(Clone, Debug)]
pub enum OutgoingMessage {
  /// A pre-formed message passed through verbatim.
  Raw(String),
  /// A message assembled from headers and a body.
  Structured { headers: Headers, body: Body },
}

impl OutgoingMessage {
  /// Serialize the message into its wire representation.
  pub fn formatted(&self) -> Vec<u8> {
    match self {
      Self::Raw(message) => message.as_bytes().to_vec(),
      Self::Structured { headers, body } => {
        let mut out = headers.to_string().into_bytes();
        match body {
          Body::Single(part) => {
            let () = out.extend_from_slice(b"MIME-Version: 1.0\r\n");
            let () = out.extend_from_slice(&part.formatted());
          },
          Body::Alternative(multi) => {
            let () = out.extend_from_slice(b"MIME-Version: 1.0\r\n");
            let () = out.extend_from_slice(&multi.formatted());
          },
          Body::Verbatim(body) => {
            let () = out.extend_from_slice(b"\r\n");
            let () = out.extend_from_slice(body.as_bytes());
          },
        }
        out
      },
    }
  }

  /// Retrieve the raw value of a top-level header.
  ///
  /// Raw messages report no headers.
  pub fn header(&self, name: &str) -> Option<&str> {
    match self {
      Self::Raw(..) => None,
      Self::Structured { headers, .. } => headers.get_raw(name),
    }
  }
}


fn mailboxes<S>(addrs: &[S], header: &str) -> Result<Mailboxes>
where
  S: AsRef<str>,
{
  addrs
    .iter()
    .map(|addr| {
      let addr = addr.as_ref();
      addr
        .parse::<Mailbox>()
        .with_context(|| format!("failed to parse '{header}' specification: `{addr}`"))
    })
    .collect()
}


fn set_raw_header(headers: &mut Headers, name: &str, value: &str) -> Result<()> {
  let header_name = HeaderName::new_from_ascii(name.to_string())
    .with_context(|| format!("invalid header name `{name}`"))?;
  let _prev = headers.remove_raw(name);
  let () = headers.insert_raw(HeaderValue::new(header_name, value.to_string()));
  Ok(())
}


/// Split a pre-formed message into its header block and body.
fn parse_raw_message(message: &str) -> Result<(Headers, String)> {
  let (block, body) = if let Some(idx) = message.find("\r\n\r\n") {
    (&message[..idx], &message[idx + 4..])
  } else if let Some(idx) = message.find("\n\n") {
    (&message[..idx], &message[idx + 2..])
  } else {
    (message, "")
  };

  let mut fields = Vec::<(String, String)>::new();
  for line in block.lines() {
    if line.starts_with([' ', '\t']) {
      let (_name, value) = fields
        .last_mut()
        .with_context(|| format!("raw message starts with continuation line `{line}`"))?;
      let () = value.push_str("\r\n");
      let () = value.push_str(line);
    } else if !line.is_empty() {
      let (name, value) = line
        .split_once(':')
        .with_context(|| format!("invalid header line in raw message: `{line}`"))?;
      let () = fields.push((name.trim().to_string(), value.trim_start().to_string()));
    }
  }

  let mut headers = Headers::new();
  for (name, value) in fields {
    let header_name = HeaderName::new_from_ascii(name.clone())
      .with_context(|| format!("invalid header name `{name}` in raw message"))?;
    let () = headers.insert_raw(HeaderValue::dangerous_new_pre_encoded(
      header_name,
      value.clone(),
      value,
    ));
  }
  Ok((headers, body.to_string()))
}


fn plain_part(body: String) -> SinglePart {
  SinglePart::builder().header(MimeType::TEXT_PLAIN).body(body)
}

fn html_part(body: String) -> SinglePart {
  SinglePart::builder().header(MimeType::TEXT_HTML).body(body)
}


fn build_body(params: &MessageParams, fields: &TemplateFields) -> Result<Body> {
  let plain = params
    .body
    .as_deref()
    .filter(|body| !body.is_empty())
    .map(|body| fields.render(body));
  let html = params
    .body_html
    .as_deref()
    .filter(|body| !body.is_empty())
    .map(|body| fields.render(body));
  let content_type = guess_content_type(params.body_type, plain.as_deref(), html.as_deref());
  let declared = params.body_type.is_some();

  debug!(content_type = content_type.as_str(), declared, "assembling message body");

  let body = match content_type {
    ContentType::Plain => match plain {
      Some(plain) => Body::Single(plain_part(plain)),
      None if declared => bail!("missing body: body type `plain` requires --body"),
      None => Body::Single(plain_part(String::new())),
    },
    ContentType::Html => match plain.or(html) {
      Some(html) => Body::Single(html_part(html)),
      None => bail!("missing body: body type `html` requires --body or --body-html"),
    },
    ContentType::Alternative => {
      let mut parts = plain
        .map(plain_part)
        .into_iter()
        .chain(html.map(html_part));
      let first = parts
        .next()
        .context("missing body: body type `alternative` requires --body or --body-html")?;
      let multi = parts.fold(MultiPart::alternative().singlepart(first), |multi, part| {
        multi.singlepart(part)
      });
      Body::Alternative(multi)
    },
  };
  Ok(body)
}


/// Assemble the message described by `params`.
///
/// `params` are expected to have been validated and to describe a
/// message with sender and recipients.
pub fn build_message(params: &MessageParams, fields: &TemplateFields) -> Result<OutgoingMessage> {
  if params.raw_body {
    let raw = params.body.as_deref().unwrap_or("");

    if params.preset.is_none() {
      let raw = if fields.has_user_fields() {
        fields.render(raw)
      } else {
        raw.to_string()
      };
      debug!("passing raw message through verbatim");
      return Ok(OutgoingMessage::Raw(raw))
    }
  }

  let (mut headers, body) = if params.raw_body {
    let raw = fields.render(params.body.as_deref().unwrap_or(""));
    let (headers, body) = parse_raw_message(&raw)?;
    (headers, Body::Verbatim(body))
  } else {
    (Headers::new(), build_body(params, fields)?)
  };

  for header in &params.headers {
    let (name, value) = parse_header(header)?;
    let () = set_raw_header(&mut headers, name, value)?;
  }

  if let Some(subject) = &params.subject {
    let () = headers.set(Subject::from(fields.render(subject)));
  }

  if let Some(reply_to) = params.reply_to.first() {
    let () = headers.set(ReplyTo::from(mailboxes(&[reply_to], "Reply-To")?));
  }

  if let Some(from) = params
    .address_from
    .as_ref()
    .or(params.envelope_from.as_ref())
  {
    let () = headers.set(FromHeader::from(mailboxes(&[from], "From")?));
  }

  if !params.address_to.is_empty() || !params.address_cc.is_empty() {
    if !params.address_to.is_empty() {
      let () = headers.set(To::from(mailboxes(&params.address_to, "To")?));
    }
    if !params.address_cc.is_empty() {
      let () = headers.set(Cc::from(mailboxes(&params.address_cc, "Cc")?));
    }
  } else if !params.envelope_to.is_empty() {
    let () = headers.set(To::from(mailboxes(&params.envelope_to, "To")?));
  }

  let _prev = headers.remove_raw("User-Agent");
  let () = headers.set(UserAgent::from(USER_AGENT.to_string()));

  Ok(OutgoingMessage::Structured { headers, body })
}
