//! Anti-forgery token extraction and request rewriting.

use mime::Mime;
use regex::Regex;
use scraper::{Html, Selector};
use stowaway_core::Error;
use stowaway_core::config::TokenRule;
use url::form_urlencoded;

use crate::fetch::Request;

/// Compiled form of a configured [`TokenRule`].
#[derive(Debug, Clone)]
pub enum TokenExtractor {
    Meta(Selector),
    Regex(Regex),
}

impl TokenExtractor {
    pub fn new(rule: &TokenRule) -> Result<Self, Error> {
        match rule {
            TokenRule::Meta { name } => {
                let selector = Selector::parse(&format!(r#"meta[name="{name}"]"#))
                    .map_err(|e| Error::InvalidInput(format!("token meta name {name:?}: {e}")))?;
                Ok(TokenExtractor::Meta(selector))
            }
            TokenRule::Regex { pattern } => {
                let regex =
                    Regex::new(pattern).map_err(|e| Error::InvalidInput(format!("token pattern {pattern:?}: {e}")))?;
                Ok(TokenExtractor::Regex(regex))
            }
        }
    }

    /// First non-empty token in the document.
    pub fn extract(&self, html: &str) -> Option<String> {
        let token = match self {
            TokenExtractor::Meta(selector) => {
                let document = Html::parse_document(html);
                document.select(selector).find_map(|el| el.value().attr("content")).map(str::to_string)
            }
            TokenExtractor::Regex(regex) => regex.captures(html)?.get(1).map(|m| m.as_str().to_string()),
        }?;

        let token = token.trim().to_string();
        if token.is_empty() { None } else { Some(token) }
    }
}

/// Copy of `request` carrying `token`.
///
/// - `application/x-www-form-urlencoded`: `field` replaced, or appended when missing
/// - `multipart/form-data`: the `field` part replaced, or appended when missing
/// - `application/json` object: `field` set
/// - `header`, when the request already sends it, replaced
///
/// Other bodies are left untouched.
pub fn rewrite_request(request: &Request, field: &str, header: &str, token: &str) -> Request {
    let mut rewritten = request.clone();
    let content_type = request.header("content-type").and_then(|value| value.parse::<Mime>().ok());

    if let Some(body) = &request.body
        && let Some(content_type) = &content_type
    {
        let (type_, subtype) = (content_type.type_(), content_type.subtype());
        if type_ == mime::APPLICATION && subtype == mime::WWW_FORM_URLENCODED {
            rewritten.body = Some(rewrite_form(body, field, token).into());
        } else if type_ == mime::APPLICATION && subtype == mime::JSON {
            if let Some(json) = rewrite_json(body, field, token) {
                rewritten.body = Some(json.into());
            }
        } else if type_ == mime::MULTIPART && subtype == mime::FORM_DATA {
            let boundary = content_type.get_param(mime::BOUNDARY).map(|b| b.as_str().trim_matches('"').to_string());
            match boundary.and_then(|boundary| rewrite_multipart(body, &boundary, field, token)) {
                Some(multipart) => rewritten.body = Some(multipart.into()),
                None => tracing::debug!("malformed multipart body, retrying with header only"),
            }
        } else {
            tracing::debug!(%content_type, "body not rewritable, retrying with header only");
        }
    }

    if request.header(header).is_some() {
        rewritten.set_header(header, token);
    }

    rewritten
}

fn rewrite_form(body: &[u8], field: &str, token: &str) -> String {
    let mut replaced = false;
    let mut serializer = form_urlencoded::Serializer::new(String::new());
    for (key, value) in form_urlencoded::parse(body) {
        if key == field {
            if !replaced {
                serializer.append_pair(field, token);
                replaced = true;
            }
        } else {
            serializer.append_pair(&key, &value);
        }
    }
    if !replaced {
        serializer.append_pair(field, token);
    }
    serializer.finish()
}

fn rewrite_json(body: &[u8], field: &str, token: &str) -> Option<Vec<u8>> {
    let mut value: serde_json::Value = serde_json::from_slice(body).ok()?;
    let object = value.as_object_mut()?;
    object.insert(field.to_string(), serde_json::Value::String(token.to_string()));
    serde_json::to_vec(&value).ok()
}

/// Rewrite the `field` part of a multipart body. Other parts, file uploads
/// included, are copied byte for byte.
///
/// Each part after a `--boundary` delimiter is `\r\n{headers}\r\n\r\n{content}\r\n`;
/// the close delimiter is followed by `--`. Returns `None` without a close delimiter.
fn rewrite_multipart(body: &[u8], boundary: &str, field: &str, token: &str) -> Option<Vec<u8>> {
    let delimiter = format!("--{boundary}");
    let mut segments = split_bytes(body, delimiter.as_bytes()).into_iter();
    let preamble = segments.next()?;

    let mut out = Vec::with_capacity(body.len() + token.len());
    out.extend_from_slice(preamble);

    let mut replaced = false;
    let mut closed = false;
    for segment in segments {
        if segment.starts_with(b"--") {
            if !replaced {
                out.extend_from_slice(delimiter.as_bytes());
                let part = format!("\r\nContent-Disposition: form-data; name=\"{field}\"\r\n\r\n{token}\r\n");
                out.extend_from_slice(part.as_bytes());
                replaced = true;
            }
            out.extend_from_slice(delimiter.as_bytes());
            out.extend_from_slice(segment);
            closed = true;
            break;
        }

        let head_end = find_bytes(segment, b"\r\n\r\n")?;
        let head = &segment[..head_end];
        if !is_field_part(head, field) {
            out.extend_from_slice(delimiter.as_bytes());
            out.extend_from_slice(segment);
            continue;
        }
        // a later duplicate of the field is dropped, as `FormData.set` does
        if !replaced {
            out.extend_from_slice(delimiter.as_bytes());
            out.extend_from_slice(head);
            out.extend_from_slice(b"\r\n\r\n");
            out.extend_from_slice(token.as_bytes());
            out.extend_from_slice(b"\r\n");
            replaced = true;
        }
    }

    closed.then_some(out)
}

/// True for a non-file part named `field`.
fn is_field_part(head: &[u8], field: &str) -> bool {
    let head = String::from_utf8_lossy(head);
    let Some(disposition) = head.split("\r\n").find_map(|line| {
        let (name, value) = line.split_once(':')?;
        name.trim().eq_ignore_ascii_case("content-disposition").then_some(value)
    }) else {
        return false;
    };

    let mut named = false;
    for param in disposition.split(';').map(str::trim) {
        let Some((key, value)) = param.split_once('=') else { continue };
        match key.trim().to_ascii_lowercase().as_str() {
            "name" => named = value.trim().trim_matches('"') == field,
            "filename" => return false,
            _ => {}
        }
    }
    named
}

fn find_bytes(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|window| window == needle)
}

fn split_bytes<'a>(haystack: &'a [u8], needle: &[u8]) -> Vec<&'a [u8]> {
    let mut segments = Vec::new();
    let mut rest = haystack;
    while let Some(at) = find_bytes(rest, needle) {
        segments.push(&rest[..at]);
        rest = &rest[at + needle.len()..];
    }
    segments.push(rest);
    segments
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta() -> TokenExtractor {
        TokenExtractor::new(&TokenRule::default()).unwrap()
    }

    #[test]
    fn test_extract_meta() {
        let html = r#"<html><head><meta name="csrf-token" content="NEWTOKEN"></head><body></body></html>"#;
        assert_eq!(meta().extract(html), Some("NEWTOKEN".into()));
    }

    #[test]
    fn test_extract_meta_attribute_order() {
        let html = r#"<meta content="abc123" name="csrf-token">"#;
        assert_eq!(meta().extract(html), Some("abc123".into()));
    }

    #[test]
    fn test_extract_missing_or_empty() {
        assert_eq!(meta().extract("<html></html>"), None);
        assert_eq!(meta().extract(r#"<meta name="csrf-token" content="  ">"#), None);
    }

    #[test]
    fn test_extract_regex() {
        let rule = TokenRule::Regex { pattern: r#"name="csrf-token" content="([^"]+)""#.into() };
        let extractor = TokenExtractor::new(&rule).unwrap();
        assert_eq!(extractor.extract(r#"<meta name="csrf-token" content="NEWTOKEN">"#), Some("NEWTOKEN".into()));
        assert_eq!(extractor.extract("nothing here"), None);
    }

    #[test]
    fn test_invalid_regex() {
        assert!(TokenExtractor::new(&TokenRule::Regex { pattern: "([".into() }).is_err());
    }

    #[test]
    fn test_rewrite_form_replaces_field() {
        let request = Request::post("https://app.test/form")
            .with_header("Content-Type", "application/x-www-form-urlencoded")
            .with_body("_token=OLD&name=Jo+Smith");
        let rewritten = rewrite_request(&request, "_token", "X-CSRF-TOKEN", "NEWTOKEN");
        assert_eq!(rewritten.body.clone().unwrap(), "_token=NEWTOKEN&name=Jo+Smith");
        assert_eq!(rewritten.header("X-CSRF-TOKEN"), None);
    }

    #[test]
    fn test_rewrite_form_appends_field() {
        let request = Request::post("https://app.test/form")
            .with_header("Content-Type", "application/x-www-form-urlencoded; charset=UTF-8")
            .with_body("name=x");
        let rewritten = rewrite_request(&request, "_token", "X-CSRF-TOKEN", "T");
        assert_eq!(rewritten.body.unwrap(), "name=x&_token=T");
    }

    #[test]
    fn test_rewrite_json_and_header() {
        let request = Request::post("https://app.test/api/items")
            .with_header("Content-Type", "application/json")
            .with_header("x-csrf-token", "OLD")
            .with_body(r#"{"name":"x","_token":"OLD"}"#);
        let rewritten = rewrite_request(&request, "_token", "X-CSRF-TOKEN", "NEW");

        let body: serde_json::Value = serde_json::from_slice(&rewritten.body.clone().unwrap()).unwrap();
        assert_eq!(body["_token"], "NEW");
        assert_eq!(body["name"], "x");
        assert_eq!(rewritten.header("X-CSRF-TOKEN"), Some("NEW"));
    }

    #[test]
    fn test_rewrite_other_body_untouched() {
        let request =
            Request::post("https://app.test/upload").with_header("Content-Type", "text/plain").with_body("raw");
        let rewritten = rewrite_request(&request, "_token", "X-CSRF-TOKEN", "NEW");
        assert_eq!(rewritten.body.unwrap(), "raw");
    }

    fn multipart(body: &str) -> Request {
        Request::post("https://app.test/upload")
            .with_header("Content-Type", "multipart/form-data; boundary=XX")
            .with_body(body.replace('\n', "\r\n"))
    }

    #[test]
    fn test_rewrite_multipart_replaces_field() {
        let request = multipart(
            "--XX\n\
             Content-Disposition: form-data; name=\"_token\"\n\n\
             OLD\n\
             --XX\n\
             Content-Disposition: form-data; name=\"title\"\n\n\
             Hello\n\
             --XX\n\
             Content-Disposition: form-data; name=\"_token\"; filename=\"_token.txt\"\n\
             Content-Type: text/plain\n\n\
             OLD\n\
             --XX--\n",
        );
        let rewritten = rewrite_request(&request, "_token", "X-CSRF-TOKEN", "NEWTOKEN");

        let expected = "--XX\n\
             Content-Disposition: form-data; name=\"_token\"\n\n\
             NEWTOKEN\n\
             --XX\n\
             Content-Disposition: form-data; name=\"title\"\n\n\
             Hello\n\
             --XX\n\
             Content-Disposition: form-data; name=\"_token\"; filename=\"_token.txt\"\n\
             Content-Type: text/plain\n\n\
             OLD\n\
             --XX--\n"
            .replace('\n', "\r\n");
        assert_eq!(&rewritten.body.unwrap()[..], expected.as_bytes());
    }

    #[test]
    fn test_rewrite_multipart_appends_field() {
        let request = multipart(
            "--XX\n\
             Content-Disposition: form-data; name=\"title\"\n\n\
             Hello\n\
             --XX--\n",
        );
        let rewritten = rewrite_request(&request, "_token", "X-CSRF-TOKEN", "T");

        let expected = "--XX\n\
             Content-Disposition: form-data; name=\"title\"\n\n\
             Hello\n\
             --XX\n\
             Content-Disposition: form-data; name=\"_token\"\n\n\
             T\n\
             --XX--\n"
            .replace('\n', "\r\n");
        assert_eq!(&rewritten.body.unwrap()[..], expected.as_bytes());
    }

    #[test]
    fn test_rewrite_multipart_quoted_boundary() {
        let request = Request::post("https://app.test/upload")
            .with_header("Content-Type", "multipart/form-data; boundary=\"XX\"")
            .with_body("--XX\r\nContent-Disposition: form-data; name=\"_token\"\r\n\r\nOLD\r\n--XX--\r\n");
        let rewritten = rewrite_request(&request, "_token", "X-CSRF-TOKEN", "NEW");
        assert_eq!(
            &rewritten.body.unwrap()[..],
            b"--XX\r\nContent-Disposition: form-data; name=\"_token\"\r\n\r\nNEW\r\n--XX--\r\n"
        );
    }

    #[test]
    fn test_rewrite_multipart_malformed_untouched() {
        let request = multipart("--XX\nContent-Disposition: form-data; name=\"_token\"\n\nOLD\n");
        let rewritten = rewrite_request(&request, "_token", "X-CSRF-TOKEN", "NEW");
        assert_eq!(&rewritten.body.unwrap()[..], request.body.unwrap().as_ref());
    }
}
