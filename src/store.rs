// Copyright (C) 2024 Daniel Mueller <deso@posteo.net>
// SPDX-License-Identifier: GPL-3.0-or-later

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::Path;
use std::path::PathBuf;

use anyhow::Context as _;
use anyhow::Result;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde::Serialize;

use tokio::fs::create_dir_all;
use tokio::fs::read_to_string;
use tokio::fs::try_exists;
use tokio::fs::write;

use tracing::debug;
use tracing::info;

use crate::config::ConnectionProfile;
use crate::config::MessagePreset;


/// The name of the file storing connection profiles.
pub const PROFILES_FILE: &str = "profiles.toml";
/// The name of the file storing message presets.
pub const MESSAGES_FILE: &str = "messages.toml";


#[derive(Debug, Default, Deserialize, Serialize)]
struct ProfilesFile {
  #[serde(default)]
  profiles: BTreeMap<String, ConnectionProfile>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
struct MessagesFile {
  #[serde(default)]
  messages: BTreeMap<String, MessagePreset>,
}


/// All known connection profiles and message presets.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Presets {
  profiles: BTreeMap<String, ConnectionProfile>,
  messages: BTreeMap<String, MessagePreset>,
}

impl Presets {
  /// Look up a connection profile by name.
  pub fn profile(&self, name: &str) -> Result<&ConnectionProfile> {
    self
      .profiles
      .get(name)
      .with_context(|| format!("unknown profile `{name}`"))
  }

  /// Look up a message preset by name.
  pub fn message(&self, name: &str) -> Result<&MessagePreset> {
    self
      .messages
      .get(name)
      .with_context(|| format!("unknown message `{name}`"))
  }

  /// Add a profile, replacing any existing one of the same name.
  pub fn add_profile(&mut self, profile: ConnectionProfile) -> Option<ConnectionProfile> {
    self.profiles.insert(profile.name.clone(), profile)
  }

  /// Add a message preset, replacing any existing one of the same name.
  pub fn add_message(&mut self, message: MessagePreset) -> Option<MessagePreset> {
    self.messages.insert(message.name.clone(), message)
  }

  pub fn delete_profile(&mut self, name: &str) -> Result<ConnectionProfile> {
    self
      .profiles
      .remove(name)
      .with_context(|| format!("unknown profile `{name}`"))
  }

  pub fn delete_message(&mut self, name: &str) -> Result<MessagePreset> {
    self
      .messages
      .remove(name)
      .with_context(|| format!("unknown message `{name}`"))
  }

  /// Format the list of profiles for display.
  ///
  /// A `verbosity` of one lists attributes, with the password masked.
  /// Higher values reveal the password as well.
  pub fn list_profiles(&self, verbosity: u8) -> String {
    if self.profiles.is_empty() {
      return "No known profiles".to_string()
    }

    let mut out = "Known profiles:".to_string();
    for (name, profile) in &self.profiles {
      // Writing into a `String` is infallible.
      let _result = if verbosity == 0 {
        write!(out, "\n- {name}")
      } else {
        write!(out, "\n- {name} ({})", profile.describe(verbosity > 1))
      };
    }
    out
  }

  /// Format the list of message presets for display.
  pub fn list_messages(&self, verbosity: u8) -> String {
    if self.messages.is_empty() {
      return "No known messages".to_string()
    }

    let mut out = "Known messages:".to_string();
    for (name, message) in &self.messages {
      let _result = if verbosity == 0 {
        write!(out, "\n- {name}")
      } else {
        write!(out, "\n- {name} ({})", message.describe())
      };
    }
    out
  }
}


/// Persistent storage of presets in a configuration directory.
#[derive(Clone, Debug)]
pub struct PresetStore {
  dir: PathBuf,
}

impl PresetStore {
  pub fn new(dir: impl Into<PathBuf>) -> Self {
    Self { dir: dir.into() }
  }

  pub fn profiles_path(&self) -> PathBuf {
    self.dir.join(PROFILES_FILE)
  }

  pub fn messages_path(&self) -> PathBuf {
    self.dir.join(MESSAGES_FILE)
  }

  /// Create the configuration directory and empty preset files, if
  /// they do not exist yet.
  pub async fn ensure(&self) -> Result<()> {
    let () = create_dir_all(&self.dir).await.with_context(|| {
      format!(
        "failed to create configuration directory `{}`",
        self.dir.display()
      )
    })?;

    let path = self.profiles_path();
    if !exists(&path).await? {
      info!(path = %path.display(), "creating empty profiles file");
      let () = save(&path, &ProfilesFile::default()).await?;
    }

    let path = self.messages_path();
    if !exists(&path).await? {
      info!(path = %path.display(), "creating empty messages file");
      let () = save(&path, &MessagesFile::default()).await?;
    }
    Ok(())
  }

  /// Load all presets.
  pub async fn load(&self) -> Result<Presets> {
    let () = self.ensure().await?;

    let ProfilesFile { mut profiles } = load(&self.profiles_path()).await?;
    let () = profiles
      .iter_mut()
      .for_each(|(name, profile)| profile.name = name.clone());

    let MessagesFile { mut messages } = load(&self.messages_path()).await?;
    let () = messages
      .iter_mut()
      .for_each(|(name, message)| message.name = name.clone());

    debug!(
      profiles = profiles.len(),
      messages = messages.len(),
      "loaded presets"
    );
    Ok(Presets { profiles, messages })
  }

  /// Write back all connection profiles.
  pub async fn save_profiles(&self, presets: &Presets) -> Result<()> {
    let file = ProfilesFile {
      profiles: presets.profiles.clone(),
    };
    save(&self.profiles_path(), &file).await
  }

  /// Write back all message presets.
  pub async fn save_messages(&self, presets: &Presets) -> Result<()> {
    let file = MessagesFile {
      messages: presets.messages.clone(),
    };
    save(&self.messages_path(), &file).await
  }
}


async fn exists(path: &Path) -> Result<bool> {
  try_exists(path)
    .await
    .with_context(|| format!("failed to check existence of `{}`", path.display()))
}

async fn load<T>(path: &Path) -> Result<T>
where
  T: DeserializeOwned,
{
  let data = read_to_string(path)
    .await
    .with_context(|| format!("failed to read `{}`", path.display()))?;
  toml::from_str::<T>(&data)
    .with_context(|| format!("failed to parse `{}` contents as TOML", path.display()))
}

async fn save<T>(path: &Path, value: &T) -> Result<()>
where
  T: Serialize,
{
  let data = toml::to_string(value)
    .with_context(|| format!("failed to serialize data for `{}`", path.display()))?;
  let () = write(path, data)
    .await
    .with_context(|| format!("failed to write `{}`", path.display()))?;

  #[cfg(unix)]
  {
    use std::fs::Permissions;
    use std::os::unix::fs::PermissionsExt as _;

    let () = tokio::fs::set_permissions(path, Permissions::from_mode(0o600))
      .await
      .with_context(|| format!("failed to adjust permissions of `{}`", path.display()))?;
  }
  Ok(())
}
