//! Allow-list HTML filter for model output and free-text request fields.
//!
//! Tags outside the policy are stripped (their text stays), `<script>`/`<style>`
//! bodies and comments are dropped, attributes outside the policy are removed,
//! and any `<` that does not start a kept tag is escaped. Markdown syntax passes
//! through untouched.

use std::sync::OnceLock;

use regex::{Captures, Regex};

#[derive(Clone, Copy, Debug)]
pub struct Policy {
  pub tags: &'static [&'static str],
  /// (tag, attribute) pairs that survive.
  pub attributes: &'static [(&'static str, &'static str)],
}

/// No markup at all.
pub const TEXT_ONLY: Policy = Policy { tags: &[], attributes: &[] };

/// Inline emphasis only.
pub const INLINE: Policy = Policy { tags: &["b", "strong", "i", "em"], attributes: &[] };

/// Inline emphasis plus links.
pub const LESSON: Policy = Policy { tags: &["b", "strong", "i", "em", "a"], attributes: &[("a", "href")] };

fn comment_re() -> &'static Regex {
  static RE: OnceLock<Regex> = OnceLock::new();
  RE.get_or_init(|| Regex::new(r"(?s)<!--.*?-->").expect("static regex"))
}

fn script_re() -> &'static Regex {
  static RE: OnceLock<Regex> = OnceLock::new();
  RE.get_or_init(|| Regex::new(r"(?is)<script\b[^>]*>.*?</script\s*>").expect("static regex"))
}

fn style_re() -> &'static Regex {
  static RE: OnceLock<Regex> = OnceLock::new();
  RE.get_or_init(|| Regex::new(r"(?is)<style\b[^>]*>.*?</style\s*>").expect("static regex"))
}

fn tag_re() -> &'static Regex {
  static RE: OnceLock<Regex> = OnceLock::new();
  RE.get_or_init(|| Regex::new(r"<(/?)([a-zA-Z][a-zA-Z0-9]*)\b([^<>]*)>").expect("static regex"))
}

fn attr_re() -> &'static Regex {
  static RE: OnceLock<Regex> = OnceLock::new();
  RE.get_or_init(|| {
    Regex::new(r#"([a-zA-Z_:][-a-zA-Z0-9_:.]*)\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'=<>`]+))"#).expect("static regex")
  })
}

pub fn clean(input: &str, policy: Policy) -> String {
  let without_comments = comment_re().replace_all(input, "");
  let without_scripts = script_re().replace_all(&without_comments, "");
  let text = style_re().replace_all(&without_scripts, "");

  let mut out = String::with_capacity(text.len());
  let mut last = 0;
  for caps in tag_re().captures_iter(&text) {
    let Some(whole) = caps.get(0) else { continue };
    push_text(&mut out, &text[last..whole.start()]);
    if let Some(kept) = rebuild_tag(&caps, policy) {
      out.push_str(&kept);
    }
    last = whole.end();
  }
  push_text(&mut out, &text[last..]);
  out
}

fn push_text(out: &mut String, text: &str) {
  out.push_str(&text.replace('<', "&lt;"));
}

fn rebuild_tag(caps: &Captures<'_>, policy: Policy) -> Option<String> {
  let closing = caps.get(1).is_some_and(|m| !m.as_str().is_empty());
  let name = caps.get(2)?.as_str().to_ascii_lowercase();
  if !policy.tags.contains(&name.as_str()) {
    return None;
  }
  if closing {
    return Some(format!("</{}>", name));
  }

  let mut tag = format!("<{}", name);
  let raw_attrs = caps.get(3).map(|m| m.as_str()).unwrap_or("");
  for attr in attr_re().captures_iter(raw_attrs) {
    let attr_name = attr.get(1).map(|m| m.as_str().to_ascii_lowercase()).unwrap_or_default();
    if !policy.attributes.iter().any(|(t, a)| *t == name && *a == attr_name) {
      continue;
    }
    let value = attr.get(2).or_else(|| attr.get(3)).or_else(|| attr.get(4)).map(|m| m.as_str()).unwrap_or("");
    if attr_name == "href" && !safe_url(value) {
      continue;
    }
    tag.push_str(&format!(" {}=\"{}\"", attr_name, value.replace('"', "&quot;")));
  }
  tag.push('>');
  Some(tag)
}

fn entity_re() -> &'static Regex {
  static RE: OnceLock<Regex> = OnceLock::new();
  RE.get_or_init(|| Regex::new(r"&#(?:[xX]([0-9a-fA-F]+)|([0-9]+));?|&([a-zA-Z]+);").expect("static regex"))
}

/// Resolve the character references a browser would decode inside an attribute.
fn decode_entities(value: &str) -> String {
  entity_re()
    .replace_all(value, |caps: &Captures<'_>| {
      let code = match (caps.get(1), caps.get(2)) {
        (Some(hex), _) => u32::from_str_radix(hex.as_str(), 16).ok(),
        (_, Some(dec)) => dec.as_str().parse::<u32>().ok(),
        _ => None,
      };
      if let Some(code) = code {
        return char::from_u32(code).unwrap_or('\u{FFFD}').to_string();
      }
      let named = caps.get(3).map(|m| m.as_str().to_ascii_lowercase()).unwrap_or_default();
      match named.as_str() {
        "colon" => ":".into(),
        "tab" => "\t".into(),
        "newline" => "\n".into(),
        "amp" => "&".into(),
        "sol" => "/".into(),
        "quot" => "\"".into(),
        "apos" => "'".into(),
        "lpar" => "(".into(),
        "rpar" => ")".into(),
        _ => caps[0].to_string(),
      }
    })
    .into_owned()
}

/// Relative URLs and http, https or mailto links only.
fn safe_url(value: &str) -> bool {
  let decoded: String = decode_entities(value)
    .chars()
    .filter(|c| !c.is_ascii_whitespace() && !c.is_control())
    .collect::<String>()
    .to_ascii_lowercase();
  let scheme_end = decoded.find(|c: char| matches!(c, ':' | '/' | '?' | '#'));
  match scheme_end {
    Some(i) if decoded[i..].starts_with(':') => matches!(&decoded[..i], "http" | "https" | "mailto"),
    _ => true,
  }
}
