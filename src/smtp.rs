// Copyright (C) 2024 Daniel Mueller <deso@posteo.net>
// SPDX-License-Identifier: GPL-3.0-or-later

//! A [`Transport`] talking to actual SMTP servers.

use std::error::Error as _;
use std::net::IpAddr;

use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::authentication::Mechanism;
use lettre::transport::smtp::client::AsyncSmtpConnection;
use lettre::transport::smtp::client::TlsParameters;
use lettre::transport::smtp::commands::Data;
use lettre::transport::smtp::commands::Mail;
use lettre::transport::smtp::commands::Rcpt;
use lettre::transport::smtp::extension::ClientId;
use lettre::transport::smtp::extension::Extension;
use lettre::transport::smtp::extension::MailBodyParameter;
use lettre::transport::smtp::extension::MailParameter;
use lettre::transport::smtp::Error as SmtpClientError;
use lettre::Address;

use tokio::net::lookup_host;

use tracing::debug;

use crate::error::ConnectError;
use crate::resolve::ConnectionParams;
use crate::session::Failure;
use crate::session::Session;
use crate::session::Transport;


/// Map an error reported by the SMTP client onto a [`Failure`].
fn failure(err: SmtpClientError) -> Failure {
  if err.is_permanent() || err.is_transient() || err.is_response() || err.is_client() {
    let code = err
      .status()
      .and_then(|code| code.to_string().parse::<u16>().ok());
    let message = err
      .source()
      .map(ToString::to_string)
      .unwrap_or_else(|| err.to_string());
    Failure::Rejected { code, message }
  } else {
    Failure::Network(err.to_string())
  }
}


fn client_id(identify_as: Option<&str>) -> ClientId {
  match identify_as {
    Some(name) => match name.parse::<IpAddr>() {
      Ok(IpAddr::V4(addr)) => ClientId::Ipv4(addr),
      Ok(IpAddr::V6(addr)) => ClientId::Ipv6(addr),
      Err(..) => ClientId::Domain(name.to_string()),
    },
    None => ClientId::default(),
  }
}


/// A transport connecting to SMTP servers over the network.
#[derive(Clone, Copy, Debug, Default)]
pub struct SmtpTransport;

impl Transport for SmtpTransport {
  type Session = SmtpSession;

  async fn connect(&self, params: &ConnectionParams) -> Result<SmtpSession, ConnectError> {
    let host = &params.host;
    let port = params.port;

    let addrs = lookup_host((host.as_str(), port))
      .await
      .map_err(|source| ConnectError::Resolve {
        host: host.clone(),
        source,
      })?
      .collect::<Vec<_>>();
    if addrs.is_empty() {
      return Err(ConnectError::NoAddress { host: host.clone() })
    }
    debug!(host = host.as_str(), addrs = ?addrs, "resolved server address");

    let connect_err = |source| ConnectError::Connect {
      host: host.clone(),
      port,
      source,
    };
    let tls = if params.mode.is_ssl() {
      Some(TlsParameters::new(host.clone()).map_err(connect_err)?)
    } else {
      None
    };

    let hello = client_id(params.identify_as.as_deref());
    let connection = AsyncSmtpConnection::connect_tokio1(
      addrs.as_slice(),
      Some(params.connection_timeout),
      &hello,
      tls,
      params.source_address,
    )
    .await
    .map_err(connect_err)?;

    debug!(
      encrypted = connection.is_encrypted(),
      "connected to {host}:{port}"
    );
    Ok(SmtpSession {
      connection,
      host: host.clone(),
      hello,
    })
  }
}


/// A session with an SMTP server.
pub struct SmtpSession {
  connection: AsyncSmtpConnection,
  host: String,
  hello: ClientId,
}

impl Session for SmtpSession {
  async fn starttls(&mut self) -> Result<(), Failure> {
    let tls = TlsParameters::new(self.host.clone()).map_err(failure)?;
    self
      .connection
      .starttls(tls, &self.hello)
      .await
      .map_err(failure)
  }

  async fn login(&mut self, login: &str, password: &str) -> Result<(), Failure> {
    let credentials = Credentials::new(login.to_string(), password.to_string());
    let _response = self
      .connection
      .auth(&[Mechanism::Plain, Mechanism::Login], &credentials)
      .await
      .map_err(failure)?;
    Ok(())
  }

  async fn mail_from(&mut self, from: &Address, eight_bit: bool) -> Result<(), Failure> {
    let params = if eight_bit {
      vec![MailParameter::Body(MailBodyParameter::EightBitMime)]
    } else {
      Vec::new()
    };
    let _response = self
      .connection
      .command(Mail::new(Some(from.clone()), params))
      .await
      .map_err(failure)?;
    Ok(())
  }

  async fn rcpt_to(&mut self, to: &Address) -> Result<(), Failure> {
    let _response = self
      .connection
      .command(Rcpt::new(to.clone(), Vec::new()))
      .await
      .map_err(failure)?;
    Ok(())
  }

  async fn data(&mut self, message: &[u8]) -> Result<(), Failure> {
    let _response = self.connection.command(Data).await.map_err(failure)?;
    let _response = self.connection.message(message).await.map_err(failure)?;
    Ok(())
  }

  async fn quit(&mut self) {
    // `abort` sends QUIT, unless already sent, and closes the
    // connection.
    let () = self.connection.abort().await;
  }

  fn supports_8bitmime(&self) -> bool {
    self
      .connection
      .server_info()
      .supports_feature(Extension::EightBitMime)
  }
}


#[cfg(test)]
mod tests {
  use super::*;

  use std::net::Ipv4Addr;
  use std::time::Duration;

  use tokio::io::AsyncReadExt as _;
  use tokio::io::AsyncWriteExt as _;
  use tokio::net::TcpListener;
  use tokio::task::JoinHandle;
  use tokio::test;

  use crate::error::ExitStatus;
  use crate::message::OutgoingMessage;
  use crate::resolve::parse_address;
  use crate::resolve::resolve_connection;
  use crate::resolve::ConnectionArgs;
  use crate::resolve::Envelope;
  use crate::session::Outcome;
  use crate::session::Sender;


  /// Check the EHLO identity derivation.
  #[test]
  async fn hello_name() {
    assert_eq!(
      client_id(Some("mail.example.com")),
      ClientId::Domain("mail.example.com".to_string())
    );
    assert_eq!(
      client_id(Some("192.0.2.1")),
      ClientId::Ipv4(Ipv4Addr::new(192, 0, 2, 1))
    );
  }

  /// Run a conversation against a minimal scripted SMTP server.
  #[test]
  async fn conversation() {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let server = tokio::spawn(async move {
      let (mut stream, _addr) = listener.accept().await.unwrap();
      let mut transcript = String::new();
      let mut buffer = [0u8; 4096];
      let () = stream.write_all(b"220 localhost ESMTP\r\n").await.unwrap();

      loop {
        let count = stream.read(&mut buffer).await.unwrap();
        if count == 0 {
          break
        }
        let input = String::from_utf8_lossy(&buffer[..count]).to_string();
        let () = transcript.push_str(&input);

        let reply: &[u8] = if input.starts_with("EHLO") {
          b"250-localhost\r\n250 8BITMIME\r\n"
        } else if input.starts_with("MAIL FROM") {
          b"250 OK\r\n"
        } else if input.starts_with("RCPT TO:<bad@") {
          b"550 5.1.1 no such user\r\n"
        } else if input.starts_with("RCPT TO") {
          b"250 OK\r\n"
        } else if input.starts_with("DATA") {
          b"354 go ahead\r\n"
        } else if input.ends_with("\r\n.\r\n") {
          b"250 queued\r\n"
        } else if input.starts_with("QUIT") {
          let () = stream.write_all(b"221 bye\r\n").await.unwrap();
          break
        } else {
          continue
        };
        let () = stream.write_all(reply).await.unwrap();
      }
      transcript
    });

    let args = ConnectionArgs {
      host: Some("127.0.0.1".to_string()),
      port: Some(port),
      identify_as: Some("client.example.com".to_string()),
      connection_timeout: Some(5),
      ..Default::default()
    };
    let params = resolve_connection(&args, None).unwrap();
    let sender = Sender::new(SmtpTransport, params, None);
    let envelope = Envelope {
      from: parse_address("sender@example.com").unwrap(),
      to: vec![
        parse_address("good@example.com").unwrap(),
        parse_address("bad@example.com").unwrap(),
      ],
    };
    let message = OutgoingMessage::Raw("Subject: test\r\n\r\nbody".to_string());

    let outcome = tokio::time::timeout(Duration::from_secs(10), sender.send(&envelope, &message))
      .await
      .unwrap()
      .unwrap();
    let delivery = match outcome {
      Outcome::Delivered(delivery) => delivery,
      outcome => panic!("unexpected outcome: {outcome:?}"),
    };
    assert_eq!(delivery.accepted.len(), 1);
    assert_eq!(delivery.rejected.len(), 1);
    assert_eq!(delivery.rejected[0].code, Some(550));

    let transcript = server.await.unwrap();
    assert!(transcript.contains("EHLO client.example.com"), "{transcript}");
    assert!(transcript.contains("MAIL FROM:<sender@example.com>"), "{transcript}");
    assert!(transcript.contains("Subject: test"), "{transcript}");
    assert!(transcript.contains("QUIT"), "{transcript}");
  }

  /// Check that an unresolvable host is reported as a connection error.
  #[test]
  async fn unresolvable_host() {
    let args = ConnectionArgs {
      host: Some("host.invalid".to_string()),
      ..Default::default()
    };
    let params = resolve_connection(&args, None).unwrap();
    let result = SmtpTransport.connect(&params).await;
    assert!(
      matches!(
        result,
        Err(ConnectError::Resolve { .. } | ConnectError::NoAddress { .. })
      ),
      "{:?}",
      result.err()
    );
  }

  /// Start a server that greets and answers EHLO, but then never
  /// replies to anything.
  async fn stalled_server() -> (u16, JoinHandle<()>) {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let server = tokio::spawn(async move {
      let (mut stream, _addr) = listener.accept().await.unwrap();
      let mut buffer = [0u8; 4096];
      let () = stream.write_all(b"220 localhost ESMTP\r\n").await.unwrap();

      loop {
        match stream.read(&mut buffer).await {
          Ok(0) | Err(..) => break,
          Ok(count) => {
            if buffer[..count].starts_with(b"EHLO") {
              let () = stream
                .write_all(b"250-localhost\r\n250 8BITMIME\r\n")
                .await
                .unwrap();
            }
          },
        }
      }
    });
    (port, server)
  }

  /// Check that a server that stops replying mid-conversation does not
  /// hang the sender, with and without a session timeout.
  #[test]
  async fn stalled_server_times_out() {
    for session_timeout in [Some(1), None] {
      let (port, server) = stalled_server().await;
      let args = ConnectionArgs {
        host: Some("127.0.0.1".to_string()),
        port: Some(port),
        connection_timeout: Some(1),
        session_timeout,
        ..Default::default()
      };
      let params = resolve_connection(&args, None).unwrap();
      let sender = Sender::new(SmtpTransport, params, None);
      let envelope = Envelope {
        from: parse_address("sender@example.com").unwrap(),
        to: vec![parse_address("rcpt@example.com").unwrap()],
      };
      let message = OutgoingMessage::Raw("Subject: test\r\n\r\nbody".to_string());

      let err = tokio::time::timeout(Duration::from_secs(10), sender.send(&envelope, &message))
        .await
        .unwrap()
        .unwrap_err();
      assert_eq!(ExitStatus::classify(&err), ExitStatus::ConnectionError, "{err:?}");
      assert!(
        matches!(
          err.downcast_ref::<ConnectError>(),
          Some(ConnectError::Timeout { .. })
        ),
        "{err:?}"
      );

      let () = server.await.unwrap();
    }
  }
}
