// Copyright (C) 2024 Daniel Mueller <deso@posteo.net>
// SPDX-License-Identifier: GPL-3.0-or-later

#![allow(
  clippy::collapsible_if,
  clippy::let_and_return,
  clippy::let_unit_value
)]

mod args;
mod config;
mod util;

use std::env::args_os;
use std::env::var_os;
use std::ffi::OsString;
use std::io;
use std::io::Write as _;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser as _;

use anyhow::Context as _;
use anyhow::Result;

use mailsend::cipher::encrypt_password;
use mailsend::cipher::StoredPassword;
use mailsend::prepare_send;
use mailsend::Delivery;
use mailsend::ExitStatus;
use mailsend::MessageArgs;
use mailsend::Outcome;
use mailsend::PreparedSend;
use mailsend::PresetStore;
use mailsend::Presets;
use mailsend::Rejection;
use mailsend::SendRequest;
use mailsend::Sender;
use mailsend::SmtpTransport;

use tracing::debug;
use tracing::info;
use tracing::subscriber::set_global_default as set_global_subscriber;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::FmtSubscriber;

use crate::args::AddMessage;
use crate::args::AddProfile;
use crate::args::Args;
use crate::args::Command;
use crate::args::Messages;
use crate::args::Profiles;
use crate::args::SendArgs;
use crate::config::config_dir;
use crate::config::salt;
use crate::util::edit;
use crate::util::prompt;


/// Retrieve the password given on the command line, prompting for it
/// if the flag was provided without a value.
async fn password_flag(password: Option<Option<String>>) -> Result<Option<String>> {
  match password {
    Some(Some(password)) => Ok(Some(password)),
    Some(None) => prompt("Password").await.map(Some),
    None => Ok(None),
  }
}


/// Turn a password in its stored form into the one to log in with.
async fn unlock_password(stored: Option<&str>, dry_run: bool) -> Result<Option<String>> {
  let stored = match stored {
    Some(stored) => StoredPassword::parse(stored),
    None => return Ok(None),
  };

  if stored.is_encrypted() {
    if dry_run {
      debug!("dry run; not decrypting password");
      return Ok(None)
    }

    let key = prompt("Encryption key").await?;
    let password = stored
      .reveal(Some(key.as_str()), &salt()?)
      .context("failed to unlock stored password")?;
    Ok(Some(password))
  } else {
    let password = stored.reveal(None, "")?;
    Ok(Some(password))
  }
}


async fn send(presets: &Presets, args: SendArgs) -> Result<()> {
  let SendArgs {
    profile,
    message_preset,
    mut connection,
    message,
    template_fields,
    template_fields_json,
    dry_run,
  } = args;

  let password = password_flag(connection.password.take()).await?;
  let request = SendRequest {
    profile,
    message: message_preset,
    connection: connection.into_args(password),
    content: MessageArgs::from(message),
    template_fields,
    template_fields_json,
  };

  let PreparedSend {
    connection,
    envelope,
    message,
    ..
  } = prepare_send(presets, &request)?;
  let password = unlock_password(connection.password.as_deref(), dry_run).await?;

  let sender = Sender::new(SmtpTransport, connection, password).dry_run(dry_run);
  match sender.send(&envelope, &message).await? {
    Outcome::DryRun => {
      let mut stdout = io::stdout().lock();
      let () = stdout
        .write_all(&message.formatted())
        .and_then(|()| writeln!(stdout))
        .context("failed to write message to stdout")?;
    },
    Outcome::Delivered(Delivery { rejected, .. }) => {
      for rejection in rejected {
        eprintln!("{}", format_rejection(&rejection));
      }
    },
  }
  Ok(())
}


fn format_rejection(rejection: &Rejection) -> String {
  let Rejection {
    address,
    code,
    message,
  } = rejection;
  let code = code.map(|code| format!(" ({code})")).unwrap_or_default();
  format!("server doesn't accept message for {address}{code}: {message}")
}


async fn add_profile(store: &PresetStore, presets: &mut Presets, add: AddProfile) -> Result<()> {
  let AddProfile {
    name,
    mut connection,
    encrypt_password: encrypt,
  } = add;

  let password = password_flag(connection.password.take()).await?;
  let password = if encrypt {
    let password = password.context("--encrypt-password requires --password")?;
    let key = prompt("Encryption key").await?;
    Some(encrypt_password(&password, &key, &salt()?))
  } else {
    password
  };

  let profile = connection.into_args(password).into_profile(&name)?;
  if presets.add_profile(profile).is_some() {
    info!(name = name.as_str(), "replacing existing profile");
  }
  let () = store.save_profiles(presets).await?;
  println!("Profile `{name}` saved");
  Ok(())
}


async fn profiles(
  store: &PresetStore,
  mut presets: Presets,
  command: Profiles,
  verbosity: u8,
) -> Result<()> {
  match command {
    Profiles::List => println!("{}", presets.list_profiles(verbosity)),
    Profiles::Edit => {
      let () = edit(&store.profiles_path()).await?;
      let _presets = store.load().await.context("edited profiles are invalid")?;
    },
    Profiles::Add(add) => add_profile(store, &mut presets, add).await?,
    Profiles::Delete { name } => {
      let _profile = presets.delete_profile(&name)?;
      let () = store.save_profiles(&presets).await?;
      println!("Profile `{name}` deleted");
    },
  }
  Ok(())
}


async fn messages(
  store: &PresetStore,
  mut presets: Presets,
  command: Messages,
  verbosity: u8,
) -> Result<()> {
  match command {
    Messages::List => println!("{}", presets.list_messages(verbosity)),
    Messages::Edit => {
      let () = edit(&store.messages_path()).await?;
      let _presets = store.load().await.context("edited messages are invalid")?;
    },
    Messages::Add(AddMessage { name, message }) => {
      let preset = MessageArgs::from(message).into_preset(&name)?;
      if presets.add_message(preset).is_some() {
        info!(name = name.as_str(), "replacing existing message");
      }
      let () = store.save_messages(&presets).await?;
      println!("Message `{name}` saved");
    },
    Messages::Delete { name } => {
      let _message = presets.delete_message(&name)?;
      let () = store.save_messages(&presets).await?;
      println!("Message `{name}` deleted");
    },
  }
  Ok(())
}


async fn run_impl(args: Args, dir: PathBuf) -> Result<()> {
  let Args { command, verbosity } = args;

  let store = PresetStore::new(dir);
  let presets = store.load().await?;

  match command {
    Command::Send(send_args) => send(&presets, send_args).await,
    Command::Profiles(command) => profiles(&store, presets, command, verbosity).await,
    Command::Messages(command) => messages(&store, presets, command, verbosity).await,
  }
}

fn setup_tracing(verbosity: u8) -> Result<()> {
  let builder = FmtSubscriber::builder()
    .with_writer(io::stderr)
    .with_timer(ChronoLocal::new("%Y-%m-%dT%H:%M:%S%.3f%:z".to_string()));

  if verbosity != 0 {
    let level = match verbosity {
      0 => LevelFilter::WARN,
      1 => LevelFilter::INFO,
      2 => LevelFilter::DEBUG,
      _ => LevelFilter::TRACE,
    };
    let subscriber = builder.with_max_level(level).finish();
    let () =
      set_global_subscriber(subscriber).with_context(|| "failed to set tracing subscriber")?;
  } else {
    let directive = var_os(EnvFilter::DEFAULT_ENV).unwrap_or_default();
    let directive = directive
      .to_str()
      .with_context(|| format!("env var `{}` is not valid UTF-8", EnvFilter::DEFAULT_ENV))?;

    let subscriber = builder.with_env_filter(EnvFilter::new(directive)).finish();
    let () =
      set_global_subscriber(subscriber).with_context(|| "failed to set tracing subscriber")?;
  }
  Ok(())
}


/// Run the program and report errors, if any.
async fn run<A, T>(args: A) -> ExitCode
where
  A: IntoIterator<Item = T>,
  T: Into<OsString> + Clone,
{
  let args = match Args::try_parse_from(args) {
    Ok(args) => args,
    Err(err) => {
      let _result = err.print();
      let status = if err.use_stderr() {
        ExitStatus::Other
      } else {
        ExitStatus::Ok
      };
      return status.into()
    },
  };

  let verbosity = args.verbosity;
  let result = async {
    let () = setup_tracing(verbosity)?;
    let dir = config_dir()?;
    run_impl(args, dir).await
  }
  .await;

  match result {
    Ok(()) => ExitStatus::Ok.into(),
    Err(err) => {
      if verbosity > 0 {
        eprintln!("Error: {err:?}");
      } else {
        eprintln!("Error: {err:#}");
      }
      ExitStatus::classify(&err).into()
    },
  }
}


#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
  run(args_os()).await
}
