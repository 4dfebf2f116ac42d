//! Minimal HTML tag scanner.
//!
//! Only start tags and their attributes are reported. Comments, doctype and
//! closing tags are skipped, and the raw text of `script`/`style` elements is
//! never scanned for tags.

/// A start tag and its attributes, names lowercased.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkupElement {
  pub name: String,
  pub attributes: Vec<(String, String)>,
}

impl MarkupElement {
  pub fn attr(&self, name: &str) -> Option<&str> {
    self
      .attributes
      .iter()
      .find(|(k, _)| k == name)
      .map(|(_, v)| v.as_str())
  }
}

/// Turns markup into element/attribute pairs.
pub trait MarkupParser: Send + Sync {
  fn parse(&self, html: &str) -> Vec<MarkupElement>;
}

/// Forgiving scanner over start tags.
#[derive(Debug, Default, Clone, Copy)]
pub struct TagScanner;

impl MarkupParser for TagScanner {
  fn parse(&self, html: &str) -> Vec<MarkupElement> {
    let mut scanner = Scanner {
      src: html,
      bytes: html.as_bytes(),
      pos: 0,
    };
    let mut elements = Vec::new();

    while let Some(lt) = scanner.find_from(scanner.pos, "<") {
      scanner.pos = lt + 1;

      if scanner.starts_with("!--") {
        scanner.pos = scanner
          .find_from(scanner.pos + 3, "-->")
          .map_or(scanner.bytes.len(), |end| end + 3);
        continue;
      }
      if scanner.starts_with("!") || scanner.starts_with("?") || scanner.starts_with("/") {
        scanner.skip_past(b'>');
        continue;
      }

      let name = scanner.take_while(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b':');
      if name.is_empty() {
        continue;
      }
      let name = name.to_ascii_lowercase();
      let attributes = scanner.attributes();

      if name == "script" || name == "style" {
        scanner.skip_raw_text(&name);
      }

      elements.push(MarkupElement { name, attributes });
    }

    elements
  }
}

struct Scanner<'a> {
  src: &'a str,
  bytes: &'a [u8],
  pos: usize,
}

impl<'a> Scanner<'a> {
  fn find_from(&self, from: usize, needle: &str) -> Option<usize> {
    self
      .src
      .get(from..)
      .and_then(|rest| rest.find(needle))
      .map(|i| from + i)
  }

  fn starts_with(&self, prefix: &str) -> bool {
    self.bytes[self.pos..].starts_with(prefix.as_bytes())
  }

  fn peek(&self) -> Option<u8> {
    self.bytes.get(self.pos).copied()
  }

  fn skip_past(&mut self, end: u8) {
    while let Some(b) = self.peek() {
      self.pos += 1;
      if b == end {
        break;
      }
    }
  }

  fn skip_whitespace(&mut self) {
    while matches!(self.peek(), Some(b) if b.is_ascii_whitespace()) {
      self.pos += 1;
    }
  }

  fn take_while(&mut self, pred: impl Fn(u8) -> bool) -> &'a str {
    let start = self.pos;
    while matches!(self.peek(), Some(b) if pred(b)) {
      self.pos += 1;
    }
    // Stops only on ASCII bytes, so both ends are char boundaries
    &self.src[start..self.pos]
  }

  fn attributes(&mut self) -> Vec<(String, String)> {
    let mut attributes = Vec::new();
    loop {
      self.skip_whitespace();
      match self.peek() {
        None => break,
        Some(b'>') => {
          self.pos += 1;
          break;
        }
        Some(b'/') => {
          self.pos += 1;
          continue;
        }
        _ => {}
      }

      let key = self.take_while(|b| !b.is_ascii_whitespace() && !matches!(b, b'=' | b'>' | b'/'));
      if key.is_empty() {
        // Stray '=' or similar
        self.pos += 1;
        continue;
      }
      let key = key.to_ascii_lowercase();

      self.skip_whitespace();
      let value = if self.peek() == Some(b'=') {
        self.pos += 1;
        self.skip_whitespace();
        self.attribute_value()
      } else {
        String::new()
      };

      attributes.push((key, decode_entities(&value)));
    }
    attributes
  }

  fn attribute_value(&mut self) -> String {
    match self.peek() {
      Some(quote @ (b'"' | b'\'')) => {
        self.pos += 1;
        let value = self.take_while(|b| b != quote).to_string();
        if self.peek() == Some(quote) {
          self.pos += 1;
        }
        value
      }
      _ => self
        .take_while(|b| !b.is_ascii_whitespace() && b != b'>')
        .to_string(),
    }
  }

  fn skip_raw_text(&mut self, name: &str) {
    let closing = format!("</{}", name);
    let lower = self.src[self.pos..].to_ascii_lowercase();
    self.pos = match lower.find(&closing) {
      Some(i) => self.pos + i,
      None => self.bytes.len(),
    };
  }
}

fn decode_entities(value: &str) -> String {
  if !value.contains('&') {
    return value.to_string();
  }
  value
    .replace("&quot;", "\"")
    .replace("&#39;", "'")
    .replace("&lt;", "<")
    .replace("&gt;", ">")
    .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
  use super::*;

  fn parse(html: &str) -> Vec<MarkupElement> {
    TagScanner.parse(html)
  }

  #[test]
  fn reports_start_tags_with_attributes() {
    let elements = parse(r#"<link rel="stylesheet" href='/a.css'><img src=logo.png alt>"#);
    assert_eq!(elements.len(), 2);
    assert_eq!(elements[0].name, "link");
    assert_eq!(elements[0].attr("rel"), Some("stylesheet"));
    assert_eq!(elements[0].attr("href"), Some("/a.css"));
    assert_eq!(elements[1].attr("src"), Some("logo.png"));
    assert_eq!(elements[1].attr("alt"), Some(""));
  }

  #[test]
  fn names_are_case_insensitive() {
    let elements = parse(r#"<SCRIPT SRC="/app.js"></SCRIPT>"#);
    assert_eq!(elements[0].name, "script");
    assert_eq!(elements[0].attr("src"), Some("/app.js"));
  }

  #[test]
  fn skips_comments_and_script_bodies() {
    let html = r#"<!-- <img src="hidden.png"> -->
      <script>document.write('<img src="fake.png">');</script>
      <!DOCTYPE html><img src="real.png"/>"#;
    let srcs: Vec<_> = parse(html)
      .iter()
      .filter_map(|e| e.attr("src").map(String::from))
      .collect();
    assert_eq!(srcs, vec!["real.png".to_string()]);
  }

  #[test]
  fn decodes_entities_in_values() {
    let elements = parse(r#"<img src="/i.png?a=1&amp;b=2">"#);
    assert_eq!(elements[0].attr("src"), Some("/i.png?a=1&b=2"));
  }

  #[test]
  fn tolerates_truncated_markup() {
    let elements = parse(r#"<img src="never-closed"#);
    assert_eq!(elements[0].attr("src"), Some("never-closed"));
    assert!(parse("<").is_empty());
    assert!(parse("a < b").is_empty());
  }
}
