// Copyright (C) 2024 Daniel Mueller <deso@posteo.net>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Encryption of passwords stored in connection profiles.
//!
//! Encrypted passwords are Fernet tokens keyed by a PBKDF2 derivation
//! of a user provided key and a salt.

use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use aes::cipher::block_padding::Pkcs7;
use aes::cipher::BlockDecryptMut as _;
use aes::cipher::BlockEncryptMut as _;
use aes::cipher::KeyIvInit as _;

use base64::engine::general_purpose::URL_SAFE;
use base64::Engine as _;

use hmac::Hmac;
use hmac::Mac as _;

use pbkdf2::pbkdf2_hmac;

use rand::Rng as _;

use sha2::Sha256;

use crate::error::DecryptError;


/// The tag marking an encrypted password.
pub const ENCRYPTED_PREFIX: &str = "enc:";
/// The tag marking a password to be used verbatim.
pub const RAW_PREFIX: &str = "raw:";

const KDF_ITERATIONS: u32 = 100_000;
const VERSION: u8 = 0x80;
const HEADER_LEN: usize = 1 + 8 + 16;
const MAC_LEN: usize = 32;

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;
type HmacSha256 = Hmac<Sha256>;


/// The signing and encryption halves of a derived key.
struct Keys {
  signing: [u8; 16],
  encryption: [u8; 16],
}

impl Keys {
  fn derive(key: &str, salt: &str) -> Self {
    let mut derived = [0u8; 32];
    let () = pbkdf2_hmac::<Sha256>(key.as_bytes(), salt.as_bytes(), KDF_ITERATIONS, &mut derived);

    let mut signing = [0u8; 16];
    let mut encryption = [0u8; 16];
    let () = signing.copy_from_slice(&derived[..16]);
    let () = encryption.copy_from_slice(&derived[16..]);

    Self {
      signing,
      encryption,
    }
  }

  fn mac(&self) -> HmacSha256 {
    // SANITY: HMAC accepts keys of any length.
    <HmacSha256 as hmac::Mac>::new_from_slice(&self.signing).unwrap()
  }
}


fn encrypt_token(plaintext: &[u8], keys: &Keys, timestamp: u64, iv: [u8; 16]) -> String {
  let ciphertext = Aes128CbcEnc::new(&keys.encryption.into(), &iv.into())
    .encrypt_padded_vec_mut::<Pkcs7>(plaintext);

  let mut token = Vec::with_capacity(HEADER_LEN + ciphertext.len() + MAC_LEN);
  let () = token.push(VERSION);
  let () = token.extend_from_slice(&timestamp.to_be_bytes());
  let () = token.extend_from_slice(&iv);
  let () = token.extend_from_slice(&ciphertext);

  let mut mac = keys.mac();
  let () = mac.update(&token);
  let () = token.extend_from_slice(&mac.finalize().into_bytes());

  URL_SAFE.encode(token)
}


fn decrypt_token(token: &str, keys: &Keys) -> Result<Vec<u8>, DecryptError> {
  let data = URL_SAFE.decode(token.trim()).map_err(DecryptError::Encoding)?;
  if data.len() < HEADER_LEN + MAC_LEN || data[0] != VERSION {
    return Err(DecryptError::Malformed)
  }

  let (signed, tag) = data.split_at(data.len() - MAC_LEN);
  let mut mac = keys.mac();
  let () = mac.update(signed);
  let () = mac.verify_slice(tag).map_err(|_| DecryptError::Signature)?;

  let mut iv = [0u8; 16];
  let () = iv.copy_from_slice(&signed[9..HEADER_LEN]);
  let ciphertext = &signed[HEADER_LEN..];
  if ciphertext.is_empty() || ciphertext.len() % 16 != 0 {
    return Err(DecryptError::Malformed)
  }

  Aes128CbcDec::new(&keys.encryption.into(), &iv.into())
    .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
    .map_err(|_| DecryptError::Padding)
}


/// Encrypt `password` for storage, returning the tagged token.
pub fn encrypt_password(password: &str, key: &str, salt: &str) -> String {
  let keys = Keys::derive(key, salt);
  let timestamp = SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .map(|duration| duration.as_secs())
    .unwrap_or_default();
  let mut iv = [0u8; 16];
  let () = rand::thread_rng().fill(&mut iv);

  let token = encrypt_token(password.as_bytes(), &keys, timestamp, iv);
  format!("{ENCRYPTED_PREFIX}{token}")
}


/// Decrypt an encrypted password token (without its tag).
pub fn decrypt_password(token: &str, key: &str, salt: &str) -> Result<String, DecryptError> {
  let keys = Keys::derive(key, salt);
  let plaintext = decrypt_token(token, &keys)?;
  String::from_utf8(plaintext).map_err(DecryptError::Utf8)
}


/// A password in the form it is stored in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoredPassword<'p> {
  /// A plain text password.
  Plain(&'p str),
  /// A password tagged with `raw:`, used as is after stripping the tag.
  Raw(&'p str),
  /// An encrypted password token, with the `enc:` tag stripped.
  Encrypted(&'p str),
}

impl<'p> StoredPassword<'p> {
  pub fn parse(password: &'p str) -> Self {
    if let Some(token) = password.strip_prefix(ENCRYPTED_PREFIX) {
      Self::Encrypted(token)
    } else if let Some(password) = password.strip_prefix(RAW_PREFIX) {
      Self::Raw(password)
    } else {
      Self::Plain(password)
    }
  }

  #[inline]
  pub fn is_encrypted(&self) -> bool {
    matches!(self, Self::Encrypted(..))
  }

  /// Retrieve the usable password.
  ///
  /// `key` is only consulted for encrypted passwords; a missing key is
  /// treated like an empty one.
  pub fn reveal(&self, key: Option<&str>, salt: &str) -> Result<String, DecryptError> {
    match self {
      Self::Plain(password) | Self::Raw(password) => Ok(password.to_string()),
      Self::Encrypted(token) => decrypt_password(token, key.unwrap_or(""), salt),
    }
  }
}
