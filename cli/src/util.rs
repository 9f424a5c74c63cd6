// Copyright (C) 2024 Daniel Mueller <deso@posteo.net>
// SPDX-License-Identifier: GPL-3.0-or-later

use std::env::var_os;
use std::ffi::OsStr;
use std::ffi::OsString;
use std::io;
use std::io::IsTerminal as _;
use std::path::Path;
use std::process::ExitStatus;

use anyhow::bail;
use anyhow::Context as _;
use anyhow::Result;

use tokio::io::stdin;
use tokio::io::AsyncBufRead;
use tokio::io::AsyncBufReadExt as _;
use tokio::io::BufReader;
use tokio::process::Command;

use tracing::debug;


/// The editor to fall back to if none is configured.
const DEFAULT_EDITOR: &str = "vim";


/// Concatenate a command and its arguments into a single string.
fn concat_command<C, A, S>(command: C, args: A) -> OsString
where
  C: AsRef<OsStr>,
  A: IntoIterator<Item = S>,
  S: AsRef<OsStr>,
{
  args
    .into_iter()
    .fold(command.as_ref().to_os_string(), |mut cmd, arg| {
      cmd.push(OsStr::new(" "));
      cmd.push(arg.as_ref());
      cmd
    })
}


/// Format a command with the given list of arguments as a string.
fn format_command<C, A, S>(command: C, args: A) -> String
where
  C: AsRef<OsStr>,
  A: IntoIterator<Item = S>,
  S: AsRef<OsStr>,
{
  concat_command(command, args).to_string_lossy().to_string()
}


fn evaluate<C, A, S>(status: ExitStatus, command: C, args: A) -> Result<()>
where
  C: AsRef<OsStr>,
  A: IntoIterator<Item = S>,
  S: AsRef<OsStr>,
{
  if !status.success() {
    let code = if let Some(code) = status.code() {
      format!(" ({code})")
    } else {
      " (terminated by signal)".to_string()
    };

    bail!(
      "`{}` reported non-zero exit-status{code}",
      format_command(command, args),
    );
  }
  Ok(())
}


/// Split an editor specification such as `code --wait` into the
/// command and its leading arguments.
fn editor_command(editor: OsString) -> (OsString, Vec<OsString>) {
  match editor.to_str() {
    Some(editor) => {
      let mut words = editor.split_whitespace().map(OsString::from);
      let command = words.next().unwrap_or_else(|| OsString::from(DEFAULT_EDITOR));
      (command, words.collect())
    },
    None => (editor, Vec::new()),
  }
}


fn editor_with<F>(lookup: F) -> (OsString, Vec<OsString>)
where
  F: Fn(&str) -> Option<OsString>,
{
  let editor = ["EDITOR", "VISUAL"]
    .into_iter()
    .filter_map(lookup)
    .find(|editor| !editor.is_empty())
    .unwrap_or_else(|| OsString::from(DEFAULT_EDITOR));
  editor_command(editor)
}


/// Open `path` in the user's editor and wait for it to exit.
pub(crate) async fn edit(path: &Path) -> Result<()> {
  let (command, mut args) = editor_with(|name| var_os(name));
  let () = args.push(path.as_os_str().to_os_string());
  debug!(command = %format_command(&command, &args), "launching editor");

  let status = Command::new(&command)
    .args(&args)
    .status()
    .await
    .with_context(|| format!("failed to run `{}`", format_command(&command, &args)))?;
  evaluate(status, command, args)
}


async fn read_line<R>(reader: &mut R) -> Result<String>
where
  R: AsyncBufRead + Unpin,
{
  let mut line = String::new();
  let count = reader
    .read_line(&mut line)
    .await
    .context("failed to read from stdin")?;
  if count == 0 {
    bail!("unexpected end of input")
  }

  let line = line.trim_end_matches(['\r', '\n']).to_string();
  Ok(line)
}


/// Ask the user for a single line of input.
pub(crate) async fn prompt(question: &str) -> Result<String> {
  // At this point tokio's stdin does not sport the `is_terminal`
  // method so we have to go through std here.
  if io::stdin().is_terminal() {
    eprint!("{question}: ");
  }
  read_line(&mut BufReader::new(stdin())).await
}
