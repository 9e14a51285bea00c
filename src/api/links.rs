//! `Link` response header parsing for paginated collections.

use std::collections::HashMap;

use reqwest::header::{HeaderMap, LINK};
use url::Url;

/// Parse a `Link` header into `rel -> target` pairs.
///
/// `<https://host/api/v1/courses?page=2>; rel="next", <...>; rel="last"`
/// Relation names are lowercased; a parameter listing several relations
/// registers the target under each of them.
pub fn parse_link_header(header: &str) -> HashMap<String, String> {
  let mut links = HashMap::new();
  let mut rest = header;

  // Targets may contain commas, so entries are found by their brackets
  while let Some(start) = rest.find('<') {
    let after = &rest[start + 1..];
    let Some(end) = after.find('>') else {
      break;
    };
    let target = &after[..end];
    let (params, tail) = split_entry(&after[end + 1..]);
    rest = tail;

    for param in params.split(';') {
      let Some((name, value)) = param.split_once('=') else {
        continue;
      };
      if !name.trim().eq_ignore_ascii_case("rel") {
        continue;
      }
      for rel in value.trim().trim_matches('"').split_whitespace() {
        links.insert(rel.to_lowercase(), target.to_string());
      }
    }
  }

  links
}

/// Split link parameters from the rest of the header at the first comma
/// outside a quoted string.
fn split_entry(s: &str) -> (&str, &str) {
  let mut quoted = false;
  for (i, c) in s.char_indices() {
    match c {
      '"' => quoted = !quoted,
      ',' if !quoted => return (&s[..i], &s[i + 1..]),
      _ => {}
    }
  }
  (s, "")
}

/// The `rel="next"` target from response headers, resolved against `base`.
pub fn next_link(headers: &HeaderMap, base: &Url) -> Option<Url> {
  headers
    .get_all(LINK)
    .iter()
    .filter_map(|value| value.to_str().ok())
    .find_map(|value| parse_link_header(value).remove("next"))
    .and_then(|target| base.join(&target).ok())
}
