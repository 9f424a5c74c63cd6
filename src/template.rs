// Copyright (C) 2024 Daniel Mueller <deso@posteo.net>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Placeholder substitution for subjects and bodies.
//!
//! Placeholders have the form `{{ name }}`. Anything else, including
//! placeholders referring to unknown fields, is left untouched.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use anyhow::ensure;
use anyhow::Context as _;
use anyhow::Result;

use regex::Captures;
use regex::Regex;

use serde_json::json;
use serde_json::Value;

use crate::config::ConnectionProfile;
use crate::config::MessagePreset;
use crate::content::guess_content_type;
use crate::resolve::MessageParams;


/// The prefix reserved for fields provided by the program itself.
pub const DEFAULT_FIELD_PREFIX: &str = "mailsend_";


fn placeholder_regex() -> &'static Regex {
  static REGEX: OnceLock<Regex> = OnceLock::new();
  // SANITY: The expression is a valid regular expression.
  REGEX.get_or_init(|| Regex::new(r"\{\{\s*([a-zA-Z0-9_]+)\s*\}\}").unwrap())
}

fn name_regex() -> &'static Regex {
  static REGEX: OnceLock<Regex> = OnceLock::new();
  // SANITY: The expression is a valid regular expression.
  REGEX.get_or_init(|| Regex::new(r"^[a-zA-Z0-9_]+$").unwrap())
}


fn split_field<'s>(field: &'s str, syntax: &str) -> Result<(&'s str, &'s str)> {
  let (name, value) = field
    .split_once('=')
    .with_context(|| format!("invalid template field `{field}`; required syntax: {syntax}"))?;
  ensure!(
    name_regex().is_match(name),
    "invalid template field name `{name}`; only ASCII letters, digits, and `_` are allowed"
  );
  Ok((name, value))
}


/// Render a template value as the text it gets substituted with.
fn stringify(value: &Value) -> String {
  match value {
    Value::Null => String::new(),
    Value::String(s) => s.clone(),
    other => other.to_string(),
  }
}


/// The set of fields available for substitution.
#[derive(Clone, Debug, Default)]
pub struct TemplateFields {
  fields: BTreeMap<String, Value>,
  user_provided: bool,
}

impl TemplateFields {
  /// Parse user provided `Name=Value` and `Name=<json>` fields.
  pub fn parse<P, J>(plain: P, json: J) -> Result<Self>
  where
    P: IntoIterator,
    P::Item: AsRef<str>,
    J: IntoIterator,
    J::Item: AsRef<str>,
  {
    let mut fields = BTreeMap::new();

    for field in plain {
      let (name, value) = split_field(field.as_ref(), "Name=Value")?;
      let _prev = fields.insert(name.to_string(), Value::String(value.to_string()));
    }

    for field in json {
      let (name, value) = split_field(field.as_ref(), "Name=<json>")?;
      let value = serde_json::from_str::<Value>(value)
        .with_context(|| format!("invalid JSON for template field `{name}`"))?;
      let _prev = fields.insert(name.to_string(), value);
    }

    let user_provided = !fields.is_empty();
    Ok(Self {
      fields,
      user_provided,
    })
  }

  /// Check whether any fields were provided by the user.
  #[inline]
  pub fn has_user_fields(&self) -> bool {
    self.user_provided
  }

  /// Look up a field's value.
  pub fn get(&self, name: &str) -> Option<&Value> {
    self.fields.get(name)
  }

  /// Add the program provided fields describing the message being
  /// sent. User fields of the same name take precedence.
  pub fn add_defaults(
    &mut self,
    params: &MessageParams,
    profile: Option<&ConnectionProfile>,
    preset: Option<&MessagePreset>,
  ) -> Result<()> {
    let body_type = guess_content_type(
      params.body_type,
      params.body.as_deref(),
      params.body_html.as_deref(),
    );

    let profile = profile
      .map(|profile| -> Result<Value> {
        let mut value =
          serde_json::to_value(profile).context("failed to serialize connection profile")?;
        if let Value::Object(map) = &mut value {
          let _password = map.remove("password");
          let _prev = map.insert("name".to_string(), Value::String(profile.name.clone()));
        }
        Ok(value)
      })
      .transpose()?
      .unwrap_or(Value::Null);

    let preset = preset
      .map(|preset| -> Result<Value> {
        let mut value =
          serde_json::to_value(preset).context("failed to serialize message preset")?;
        if let Value::Object(map) = &mut value {
          let _prev = map.insert("name".to_string(), Value::String(preset.name.clone()));
        }
        Ok(value)
      })
      .transpose()?
      .unwrap_or(Value::Null);

    let defaults = [
      ("subject", json!(params.subject)),
      ("from", json!(params.address_from)),
      ("envelope_from", json!(params.envelope_from)),
      ("to", json!(params.address_to)),
      ("cc", json!(params.address_cc)),
      ("bcc", json!(params.address_bcc)),
      ("envelope_to", json!(params.envelope_to)),
      ("reply_to", json!(params.reply_to)),
      ("body_type", json!(body_type.as_str())),
      ("raw_body", json!(params.raw_body)),
      ("profile", profile),
      ("message", preset),
    ];

    for (name, value) in defaults {
      let _value = self
        .fields
        .entry(format!("{DEFAULT_FIELD_PREFIX}{name}"))
        .or_insert(value);
    }
    Ok(())
  }

  /// Substitute all known placeholders in `template`.
  ///
  /// Substitution happens in a single pass: inserted values are never
  /// expanded again.
  pub fn render(&self, template: &str) -> String {
    placeholder_regex()
      .replace_all(template, |captures: &Captures<'_>| {
        let name = &captures[1];
        match self.fields.get(name) {
          Some(value) => stringify(value),
          None => captures[0].to_string(),
        }
      })
      .into_owned()
  }
}


#[cfg(test)]
mod tests {
  use super::*;


  /// Check basic placeholder substitution.
  #[test]
  fn render_fields() {
    let fields = TemplateFields::parse(["name=World"], ["count=3", "list=[1, 2]"]).unwrap();
    assert!(fields.has_user_fields());

    let rendered = fields.render("Hello {{name}}, {{ count }} {{  list  }}!");
    assert_eq!(rendered, "Hello World, 3 [1,2]!");
  }

  /// Make sure that unknown placeholders are left verbatim.
  #[test]
  fn render_unknown() {
    let fields = TemplateFields::parse(["a=1"], None::<&str>).unwrap();
    assert_eq!(fields.render("{{ b }} {{a}} {{ a-b }}"), "{{ b }} 1 {{ a-b }}");
  }

  /// Check that JSON strings and nulls are rendered as expected.
  #[test]
  fn render_json_scalars() {
    let fields =
      TemplateFields::parse(None::<&str>, [r#"s="quoted""#, "n=null", "o={\"k\": true}"])
        .unwrap();
    assert_eq!(fields.render("{{s}}|{{n}}|{{o}}"), r#"quoted||{"k":true}"#);
  }

  /// Make sure that inserted values are not expanded a second time.
  #[test]
  fn render_single_pass() {
    let fields = TemplateFields::parse(["a={{ b }}", "b=oops"], None::<&str>).unwrap();
    assert_eq!(fields.render("{{ a }}"), "{{ b }}");
  }

  /// Check that values may contain `=` characters.
  #[test]
  fn parse_value_with_equals() {
    let fields = TemplateFields::parse(["expr=a=b"], None::<&str>).unwrap();
    assert_eq!(fields.get("expr"), Some(&Value::String("a=b".to_string())));
  }

  /// Check that malformed fields are rejected.
  #[test]
  fn parse_errors() {
    let err = TemplateFields::parse(["invalid-name=1"], None::<&str>).unwrap_err();
    assert!(err.to_string().contains("invalid template field name"), "{err}");

    let err = TemplateFields::parse(["novalue"], None::<&str>).unwrap_err();
    assert!(err.to_string().contains("Name=Value"), "{err}");

    let err = TemplateFields::parse(None::<&str>, ["data={not json"]).unwrap_err();
    assert_eq!(err.to_string(), "invalid JSON for template field `data`");
  }

  /// Check which field names are accepted.
  #[test]
  fn field_names() {
    for name in ["a b", "a.b", "a@b", ""] {
      let field = format!("{name}=v");
      let err = TemplateFields::parse([field.as_str()], None::<&str>).unwrap_err();
      assert!(err.to_string().contains("invalid template field name"), "{name}: {err}");

      let err = TemplateFields::parse(None::<&str>, [format!("{name}=1")]).unwrap_err();
      assert!(err.to_string().contains("invalid template field name"), "{name}: {err}");
    }

    for name in ["a", "A_1"] {
      let field = format!("{name}=v");
      let fields = TemplateFields::parse([field.as_str()], None::<&str>).unwrap();
      assert_eq!(fields.get(name), Some(&Value::String("v".to_string())));
    }
  }

  /// Check the program provided default fields.
  #[test]
  fn default_fields() {
    let params = MessageParams {
      subject: Some("Greetings".to_string()),
      address_from: Some("sender@example.com".to_string()),
      address_to: vec!["a@example.com".to_string(), "b@example.com".to_string()],
      body: Some("hi".to_string()),
      ..Default::default()
    };
    let profile = ConnectionProfile {
      name: "work".to_string(),
      password: Some("secret".to_string()),
      host: Some("smtp.example.com".to_string()),
      ..Default::default()
    };

    let mut fields = TemplateFields::parse(["mailsend_subject=override"], None::<&str>).unwrap();
    let () = fields.add_defaults(&params, Some(&profile), None).unwrap();

    assert_eq!(
      fields.render("{{mailsend_subject}} {{mailsend_from}} {{mailsend_body_type}}"),
      "override sender@example.com plain"
    );
    assert_eq!(
      fields.render("{{mailsend_to}}"),
      r#"["a@example.com","b@example.com"]"#
    );
    assert_eq!(fields.render("[{{mailsend_message}}]"), "[]");

    let profile = fields.render("{{ mailsend_profile }}");
    assert!(profile.contains(r#""name":"work""#), "{profile}");
    assert!(!profile.contains("secret"), "{profile}");
  }
}
