use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tracing::{debug, warn};

/// Parse a header string in format "Name: Value" and add it to the HeaderMap
fn parse_and_add_header(headers: &mut HeaderMap, header_str: &str) {
    let Some((name, value)) = header_str.split_once(':') else {
        warn!(header = header_str, "Invalid header format, expected 'Name: Value'");
        return;
    };
    let (name, value) = (name.trim(), value.trim());

    let Ok(header_name) = HeaderName::from_bytes(name.as_bytes()) else {
        warn!(name, "Invalid header name");
        return;
    };

    let Ok(header_value) = HeaderValue::from_str(value) else {
        warn!(value, "Invalid header value");
        return;
    };

    debug!(name, value, "Adding header");
    headers.insert(header_name, header_value);
}

/// Parse a collection of header strings on top of `base`
pub fn parse_headers(base: HeaderMap, header_strings: &[String]) -> HeaderMap {
    let mut headers = base;

    for header_str in header_strings {
        parse_and_add_header(&mut headers, header_str);
    }

    headers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_headers() {
        let headers = parse_headers(
            HeaderMap::new(),
            &[
                "Referer: https://example.com/".to_string(),
                "X-Token:abc:def".to_string(),
                "no colon".to_string(),
                "bad name: x".to_string(),
            ],
        );

        assert_eq!(headers.len(), 2);
        assert_eq!(headers.get("referer").unwrap(), "https://example.com/");
        assert_eq!(headers.get("x-token").unwrap(), "abc:def");
    }
}
