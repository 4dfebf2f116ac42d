//! Local decoding of `data:` URLs.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

use super::FetchError;
use crate::cache::RawResponse;

const DEFAULT_MEDIA_TYPE: &str = "text/plain;charset=US-ASCII";

/// Decode `data:[<mediatype>][;base64],<data>` into a 200 response.
pub fn decode(url: &str) -> Result<RawResponse, FetchError> {
  let invalid = |message: &str| FetchError::InvalidUrl {
    url: url.to_string(),
    message: message.to_string(),
  };

  let rest = url
    .get(..5)
    .filter(|scheme| scheme.eq_ignore_ascii_case("data:"))
    .map(|_| &url[5..])
    .ok_or_else(|| invalid("not a data URL"))?;

  let (meta, data) = rest
    .split_once(',')
    .ok_or_else(|| invalid("missing ',' separator"))?;

  let (media_type, is_base64) = match meta.strip_suffix(";base64") {
    Some(media_type) => (media_type, true),
    None => (meta, false),
  };
  let media_type = if media_type.is_empty() {
    DEFAULT_MEDIA_TYPE
  } else {
    media_type
  };

  let decoded = percent_decode(data);
  let body = if is_base64 {
    let compact: Vec<u8> = decoded
      .into_iter()
      .filter(|b| !b.is_ascii_whitespace())
      .collect();
    STANDARD
      .decode(compact)
      .map_err(|e| invalid(&format!("bad base64 payload: {}", e)))?
  } else {
    decoded
  };

  Ok(RawResponse::new(200, media_type, body))
}

fn percent_decode(input: &str) -> Vec<u8> {
  let bytes = input.as_bytes();
  let mut out = Vec::with_capacity(bytes.len());
  let mut i = 0;
  while i < bytes.len() {
    if bytes[i] == b'%' && i + 2 < bytes.len() {
      if let (Some(hi), Some(lo)) = (hex_value(bytes[i + 1]), hex_value(bytes[i + 2])) {
        out.push(hi << 4 | lo);
        i += 3;
        continue;
      }
    }
    out.push(bytes[i]);
    i += 1;
  }
  out
}

fn hex_value(b: u8) -> Option<u8> {
  match b {
    b'0'..=b'9' => Some(b - b'0'),
    b'a'..=b'f' => Some(b - b'a' + 10),
    b'A'..=b'F' => Some(b - b'A' + 10),
    _ => None,
  }
}
