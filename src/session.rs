// Copyright (C) 2024 Daniel Mueller <deso@posteo.net>
// SPDX-License-Identifier: GPL-3.0-or-later

use std::future::Future;
use std::time::Duration;

use anyhow::Context as _;
use anyhow::Error;
use anyhow::Result;

use lettre::Address;

use tokio::time::timeout;

use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::error::ConnectError;
use crate::error::SmtpError;
use crate::error::Stage;
use crate::message::OutgoingMessage;
use crate::resolve::ConnectionParams;
use crate::resolve::Envelope;


/// The ways an SMTP command can fail.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Failure {
  /// The server rejected the command, or the client refused to issue
  /// it.
  Rejected { code: Option<u16>, message: String },
  /// The connection broke down.
  Network(String),
}


/// Something able to open SMTP sessions.
#[allow(async_fn_in_trait)]
pub trait Transport {
  type Session: Session;

  /// Resolve the server's address, connect to it, read its greeting,
  /// and identify ourselves.
  async fn connect(&self, params: &ConnectionParams) -> Result<Self::Session, ConnectError>;
}


/// An established SMTP session.
#[allow(async_fn_in_trait)]
pub trait Session {
  /// Upgrade the connection via STARTTLS and identify again.
  async fn starttls(&mut self) -> Result<(), Failure>;
  async fn login(&mut self, login: &str, password: &str) -> Result<(), Failure>;
  async fn mail_from(&mut self, from: &Address, eight_bit: bool) -> Result<(), Failure>;
  async fn rcpt_to(&mut self, to: &Address) -> Result<(), Failure>;
  async fn data(&mut self, message: &[u8]) -> Result<(), Failure>;
  /// End the session, ignoring any errors.
  async fn quit(&mut self);
  fn supports_8bitmime(&self) -> bool;
}


/// A recipient the server refused to accept.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Rejection {
  pub address: Address,
  pub code: Option<u16>,
  pub message: String,
}


/// The result of a successful submission.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Delivery {
  pub accepted: Vec<Address>,
  pub rejected: Vec<Rejection>,
}


/// The outcome of a send operation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
  /// Nothing was sent, because we performed a dry run.
  DryRun,
  Delivered(Delivery),
}


/// Sends a message through a session opened with a [`Transport`].
#[derive(Debug)]
pub struct Sender<T> {
  transport: T,
  params: ConnectionParams,
  /// The password to log in with, already decrypted.
  password: Option<String>,
  dry_run: bool,
}

impl<T> Sender<T>
where
  T: Transport,
{
  pub fn new(transport: T, params: ConnectionParams, password: Option<String>) -> Self {
    Self {
      transport,
      params,
      password,
      dry_run: false,
    }
  }

  /// Stop before any network action when sending.
  pub fn dry_run(mut self, dry_run: bool) -> Self {
    self.dry_run = dry_run;
    self
  }

  fn connection_error(&self, message: String) -> Error {
    Error::from(ConnectError::Network {
      host: self.params.host.clone(),
      port: self.params.port,
      message,
    })
  }

  fn timed_out(&self, timeout: Duration) -> Error {
    Error::from(ConnectError::Timeout {
      host: self.params.host.clone(),
      port: self.params.port,
      timeout,
    })
  }

  /// Run a single exchange with the server, bounded by the connection
  /// timeout.
  async fn within<F>(&self, future: F) -> Result<F::Output>
  where
    F: Future,
  {
    let duration = self.params.connection_timeout;
    timeout(duration, future)
      .await
      .map_err(|_elapsed| self.timed_out(duration))
  }

  fn failure(&self, stage: Stage, failure: Failure) -> Error {
    match failure {
      Failure::Rejected { code, message } => Error::from(SmtpError {
        stage,
        code,
        message,
      }),
      Failure::Network(message) => self.connection_error(message),
    }
  }

  async fn converse(
    &self,
    session: &mut T::Session,
    envelope: &Envelope,
    message: &[u8],
  ) -> Result<Delivery> {
    if self.params.mode.is_tls() {
      let () = self
        .within(session.starttls())
        .await?
        .map_err(|failure| self.failure(Stage::StartTls, failure))?;
      debug!("connection upgraded via STARTTLS");
    }

    match (self.params.login.as_deref(), self.password.as_deref()) {
      (Some(login), Some(password)) if !login.is_empty() && !password.is_empty() => {
        let () = self
          .within(session.login(login, password))
          .await?
          .map_err(|failure| self.failure(Stage::Login, failure))
          .with_context(|| format!("failed to authenticate as `{login}`"))?;
        debug!(login, "authenticated");
      },
      _ => (),
    }

    let eight_bit = !message.is_ascii() && session.supports_8bitmime();
    let () = self
      .within(session.mail_from(&envelope.from, eight_bit))
      .await?
      .map_err(|failure| self.failure(Stage::MailFrom, failure))
      .with_context(|| format!("server refused sender `{}`", envelope.from))?;

    let mut accepted = Vec::with_capacity(envelope.to.len());
    let mut rejected = Vec::new();
    for to in &envelope.to {
      match self.within(session.rcpt_to(to)).await? {
        Ok(()) => accepted.push(to.clone()),
        Err(Failure::Rejected { code, message }) => {
          warn!(
            address = %to,
            code = ?code,
            message = %message,
            "server doesn't accept message for {to}"
          );
          let () = rejected.push(Rejection {
            address: to.clone(),
            code,
            message,
          });
        },
        Err(failure @ Failure::Network(..)) => return Err(self.failure(Stage::RcptTo, failure)),
      }
    }

    if accepted.is_empty() {
      let last = rejected.last();
      let err = SmtpError {
        stage: Stage::RcptTo,
        code: last.and_then(|rejection| rejection.code),
        message: last
          .map(|rejection| rejection.message.clone())
          .unwrap_or_default(),
      };
      return Err(Error::from(err).context("server refused all recipients"))
    }

    let () = self
      .within(session.data(message))
      .await?
      .map_err(|failure| self.failure(Stage::Data, failure))
      .context("server refused message data")?;

    Ok(Delivery { accepted, rejected })
  }

  /// Send a message to the recipients of `envelope`.
  ///
  /// Recipients refused by the server are reported in the returned
  /// [`Delivery`]; only a refusal of all of them is an error.
  pub async fn send(&self, envelope: &Envelope, message: &OutgoingMessage) -> Result<Outcome> {
    let data = message.formatted();

    if self.dry_run {
      info!(
        recipients = envelope.to.len(),
        bytes = data.len(),
        "dry run; not sending message"
      );
      return Ok(Outcome::DryRun)
    }

    let ConnectionParams {
      host,
      port,
      session_timeout,
      ..
    } = &self.params;

    debug!(host = host.as_str(), port, mode = ?self.params.mode, "connecting");
    let mut session = self
      .within(self.transport.connect(&self.params))
      .await
      .and_then(|result| result.map_err(Error::from))
      .with_context(|| format!("failed to send email via {host}:{port}"))?;

    let result = bounded(*session_timeout, self.converse(&mut session, envelope, &data))
      .await
      .unwrap_or_else(|| Err(self.timed_out(session_timeout.unwrap_or_default())));

    if self.within(session.quit()).await.is_err() {
      debug!("server did not respond to QUIT in time");
    }

    let delivery = result.with_context(|| format!("failed to send email via {host}:{port}"))?;
    info!(
      accepted = delivery.accepted.len(),
      rejected = delivery.rejected.len(),
      "message sent"
    );
    Ok(Outcome::Delivered(delivery))
  }
}


/// Run `future` to completion, or until `duration` elapsed.
async fn bounded<F>(duration: Option<Duration>, future: F) -> Option<F::Output>
where
  F: Future,
{
  match duration {
    Some(duration) => timeout(duration, future).await.ok(),
    None => Some(future.await),
  }
}


#[cfg(test)]
pub(crate) mod tests {
  use super::*;

  use std::cell::Cell;
  use std::cell::RefCell;
  use std::collections::HashMap;
  use std::rc::Rc;

  use tokio::test;

  use crate::config::SmtpMode;
  use crate::error::ExitStatus;
  use crate::resolve::parse_address;
  use crate::resolve::resolve_connection;
  use crate::resolve::ConnectionArgs;


  /// A scripted in-memory SMTP server.
  #[derive(Clone, Debug, Default)]
  pub(crate) struct MockTransport {
    /// Recipients to reject, with the reply code to use.
    pub reject: HashMap<String, u16>,
    pub reject_sender: bool,
    pub fail_connect: bool,
    pub stall: bool,
    pub stall_quit: bool,
    pub log: Rc<RefCell<Vec<String>>>,
    pub connects: Rc<Cell<usize>>,
  }

  #[derive(Debug)]
  pub(crate) struct MockSession {
    transport: MockTransport,
  }

  impl MockSession {
    fn record(&self, line: String) {
      self.transport.log.borrow_mut().push(line)
    }
  }

  impl Transport for MockTransport {
    type Session = MockSession;

    async fn connect(&self, params: &ConnectionParams) -> Result<MockSession, ConnectError> {
      let () = self.connects.set(self.connects.get() + 1);
      if self.fail_connect {
        return Err(ConnectError::NoAddress {
          host: params.host.clone(),
        })
      }

      Ok(MockSession {
        transport: self.clone(),
      })
    }
  }

  impl Session for MockSession {
    async fn starttls(&mut self) -> Result<(), Failure> {
      self.record("STARTTLS".to_string());
      Ok(())
    }

    async fn login(&mut self, login: &str, password: &str) -> Result<(), Failure> {
      self.record(format!("AUTH {login} {password}"));
      if password == "wrong" {
        return Err(Failure::Rejected {
          code: Some(535),
          message: "authentication failed".to_string(),
        })
      }
      Ok(())
    }

    async fn mail_from(&mut self, from: &Address, eight_bit: bool) -> Result<(), Failure> {
      self.record(format!("MAIL FROM:<{from}> 8bit={eight_bit}"));
      if self.transport.reject_sender {
        return Err(Failure::Rejected {
          code: Some(553),
          message: "sender rejected".to_string(),
        })
      }
      Ok(())
    }

    async fn rcpt_to(&mut self, to: &Address) -> Result<(), Failure> {
      self.record(format!("RCPT TO:<{to}>"));
      if self.transport.stall {
        let () = tokio::time::sleep(Duration::from_secs(3600)).await;
      }
      match self.transport.reject.get(&to.to_string()) {
        Some(code) => Err(Failure::Rejected {
          code: Some(*code),
          message: "no such user".to_string(),
        }),
        None => Ok(()),
      }
    }

    async fn data(&mut self, message: &[u8]) -> Result<(), Failure> {
      self.record(format!("DATA {} bytes", message.len()));
      Ok(())
    }

    async fn quit(&mut self) {
      self.record("QUIT".to_string());
      if self.transport.stall_quit {
        let () = tokio::time::sleep(Duration::from_secs(3600)).await;
      }
    }

    fn supports_8bitmime(&self) -> bool {
      true
    }
  }


  fn envelope(to: &[&str]) -> Envelope {
    Envelope {
      from: parse_address("sender@example.com").unwrap(),
      to: to.iter().map(|to| parse_address(to).unwrap()).collect(),
    }
  }

  fn params() -> ConnectionParams {
    resolve_connection(&ConnectionArgs::default(), None).unwrap()
  }

  fn message() -> OutgoingMessage {
    OutgoingMessage::Raw("Subject: test\r\n\r\nbody\r\n".to_string())
  }


  /// Check that partial recipient rejection is not fatal.
  #[test]
  async fn partial_rejection() {
    let transport = MockTransport {
      reject: HashMap::from([("b@example.com".to_string(), 550)]),
      ..Default::default()
    };
    let log = transport.log.clone();
    let sender = Sender::new(transport, params(), None);

    let outcome = sender
      .send(&envelope(&["a@example.com", "b@example.com"]), &message())
      .await
      .unwrap();
    let delivery = match outcome {
      Outcome::Delivered(delivery) => delivery,
      outcome => panic!("unexpected outcome: {outcome:?}"),
    };
    assert_eq!(delivery.accepted, vec![parse_address("a@example.com").unwrap()]);
    assert_eq!(delivery.rejected.len(), 1);
    assert_eq!(delivery.rejected[0].address.to_string(), "b@example.com");
    assert_eq!(delivery.rejected[0].code, Some(550));

    let log = log.borrow();
    assert_eq!(
      log.first().map(String::as_str),
      Some("MAIL FROM:<sender@example.com> 8bit=false")
    );
    assert!(log.iter().any(|line| line.starts_with("DATA")), "{log:?}");
    assert_eq!(log.last().map(String::as_str), Some("QUIT"));
  }

  /// Check that a refusal of all recipients is fatal, but the session
  /// is still closed.
  #[test]
  async fn total_rejection() {
    let transport = MockTransport {
      reject: HashMap::from([("a@example.com".to_string(), 550)]),
      ..Default::default()
    };
    let log = transport.log.clone();
    let sender = Sender::new(transport, params(), None);

    let err = sender
      .send(&envelope(&["a@example.com"]), &message())
      .await
      .unwrap_err();
    assert_eq!(ExitStatus::classify(&err), ExitStatus::Other);
    let smtp = err.downcast_ref::<SmtpError>().unwrap();
    assert_eq!(smtp.code, Some(550));

    let log = log.borrow();
    assert!(!log.iter().any(|line| line.starts_with("DATA")), "{log:?}");
    assert_eq!(log.last().map(String::as_str), Some("QUIT"));
  }

  /// Check that a refused sender is fatal.
  #[test]
  async fn sender_refused() {
    let transport = MockTransport {
      reject_sender: true,
      ..Default::default()
    };
    let sender = Sender::new(transport, params(), None);

    let err = sender
      .send(&envelope(&["a@example.com"]), &message())
      .await
      .unwrap_err();
    let smtp = err.downcast_ref::<SmtpError>().unwrap();
    assert_eq!(smtp.stage, Stage::MailFrom);
    assert_eq!(smtp.code, Some(553));
  }

  /// Make sure that a dry run does not connect anywhere.
  #[test]
  async fn dry_run() {
    let transport = MockTransport::default();
    let connects = transport.connects.clone();
    let sender = Sender::new(transport, params(), None).dry_run(true);

    let outcome = sender
      .send(&envelope(&["a@example.com"]), &message())
      .await
      .unwrap();
    assert_eq!(outcome, Outcome::DryRun);
    assert_eq!(connects.get(), 0);
  }

  /// Check that connection errors are classified as such.
  #[test]
  async fn connect_failure() {
    let transport = MockTransport {
      fail_connect: true,
      ..Default::default()
    };
    let sender = Sender::new(transport, params(), None);

    let err = sender
      .send(&envelope(&["a@example.com"]), &message())
      .await
      .unwrap_err();
    assert_eq!(ExitStatus::classify(&err), ExitStatus::ConnectionError);
  }

  /// Check that STARTTLS and authentication happen when configured.
  #[test]
  async fn starttls_and_login() {
    let transport = MockTransport::default();
    let log = transport.log.clone();
    let mut params = params();
    params.mode = SmtpMode::StartTls;
    params.login = Some("user".to_string());
    let sender = Sender::new(transport, params, Some("pass".to_string()));

    let _outcome = sender
      .send(&envelope(&["a@example.com"]), &message())
      .await
      .unwrap();

    let log = log.borrow();
    assert_eq!(log[0], "STARTTLS");
    assert_eq!(log[1], "AUTH user pass");
  }

  /// Check that authentication failures are reported.
  #[test]
  async fn login_failure() {
    let transport = MockTransport::default();
    let log = transport.log.clone();
    let mut params = params();
    params.login = Some("user".to_string());
    let sender = Sender::new(transport, params, Some("wrong".to_string()));

    let err = sender
      .send(&envelope(&["a@example.com"]), &message())
      .await
      .unwrap_err();
    assert_eq!(ExitStatus::classify(&err), ExitStatus::Other);
    assert_eq!(err.downcast_ref::<SmtpError>().unwrap().code, Some(535));
    assert_eq!(log.borrow().last().map(String::as_str), Some("QUIT"));
  }

  /// Check that an empty password skips authentication.
  #[test]
  async fn no_login_without_password() {
    let transport = MockTransport::default();
    let log = transport.log.clone();
    let mut params = params();
    params.login = Some("user".to_string());
    let sender = Sender::new(transport, params, Some(String::new()));

    let _outcome = sender
      .send(&envelope(&["a@example.com"]), &message())
      .await
      .unwrap();
    assert!(!log.borrow().iter().any(|line| line.starts_with("AUTH")));
  }

  /// Check that the session timeout bounds the conversation.
  #[test(start_paused = true)]
  async fn session_timeout() {
    let transport = MockTransport {
      stall: true,
      ..Default::default()
    };
    let log = transport.log.clone();
    let mut params = params();
    params.session_timeout = Some(Duration::from_secs(5));
    let sender = Sender::new(transport, params, None);

    let err = sender
      .send(&envelope(&["a@example.com"]), &message())
      .await
      .unwrap_err();
    assert_eq!(ExitStatus::classify(&err), ExitStatus::ConnectionError);
    assert!(matches!(
      err.downcast_ref::<ConnectError>(),
      Some(ConnectError::Timeout { .. })
    ));
    assert_eq!(log.borrow().last().map(String::as_str), Some("QUIT"));
  }

  /// Check that a stalled command is bounded by the connection timeout
  /// when no session timeout is configured.
  #[test(start_paused = true)]
  async fn command_timeout() {
    let transport = MockTransport {
      stall: true,
      ..Default::default()
    };
    let log = transport.log.clone();
    let mut params = params();
    params.connection_timeout = Duration::from_secs(1);
    params.session_timeout = None;
    let sender = Sender::new(transport, params, None);

    let err = sender
      .send(&envelope(&["a@example.com"]), &message())
      .await
      .unwrap_err();
    assert_eq!(ExitStatus::classify(&err), ExitStatus::ConnectionError);
    match err.downcast_ref::<ConnectError>() {
      Some(ConnectError::Timeout { timeout, .. }) => {
        assert_eq!(*timeout, Duration::from_secs(1))
      },
      other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(log.borrow().last().map(String::as_str), Some("QUIT"));
  }

  /// Check that a server not answering QUIT does not hold up a
  /// completed delivery.
  #[test(start_paused = true)]
  async fn quit_timeout() {
    let transport = MockTransport {
      stall_quit: true,
      ..Default::default()
    };
    let log = transport.log.clone();
    let mut params = params();
    params.connection_timeout = Duration::from_secs(1);
    let sender = Sender::new(transport, params, None);

    let outcome = sender
      .send(&envelope(&["a@example.com"]), &message())
      .await
      .unwrap();
    assert!(matches!(outcome, Outcome::Delivered(..)));
    assert_eq!(log.borrow().last().map(String::as_str), Some("QUIT"));
  }
}
