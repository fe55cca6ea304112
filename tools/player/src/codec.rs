//! Textual HTTP/1.1 encoding of stored exchanges.
//!
//! Files are written with CRLF line endings; bare LF is accepted on read so
//! hand-edited files still load. The body is every byte after the blank line.
//!
//! Header values are stored without surrounding whitespace, which is not part
//! of an HTTP field value; a value of `" v "` loads back as `"v"`. Names and
//! values that would break the line structure are refused on encode.

use crate::errors::PlayerError;
use crate::exchange::{Headers, RequestDescriptor, ResponseDescriptor};

const HTTP_VERSION: &str = "HTTP/1.1";

pub fn encode_request(request: &RequestDescriptor) -> Result<Vec<u8>, PlayerError> {
    let target = request.path_and_query()?;
    let mut out = format!("{} {target} {HTTP_VERSION}\r\n", request.method).into_bytes();
    write_head_and_body(&mut out, &request.headers, &request.body)
        .map_err(PlayerError::InvalidRequest)?;
    Ok(out)
}

pub fn encode_response(response: &ResponseDescriptor) -> Result<Vec<u8>, PlayerError> {
    let reason = canonical_reason(response.status);
    let mut out = format!("{HTTP_VERSION} {} {reason}\r\n", response.status).into_bytes();
    write_head_and_body(&mut out, &response.headers, &response.body).map_err(malformed)?;
    Ok(out)
}

pub fn decode_request(raw: &[u8]) -> Result<RequestDescriptor, PlayerError> {
    let message = split_message(raw)?;
    let mut parts = message.start_line.split(' ').filter(|p| !p.is_empty());
    let (Some(method), Some(target), Some(version), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(malformed(format!(
            "request line {:?} is not `METHOD target HTTP/x.y`",
            message.start_line
        )));
    };
    check_version(version)?;
    Ok(RequestDescriptor {
        method: method.to_string(),
        url: target.to_string(),
        headers: message.headers,
        body: message.body,
    })
}

pub fn decode_response(raw: &[u8]) -> Result<ResponseDescriptor, PlayerError> {
    let message = split_message(raw)?;
    let mut parts = message.start_line.splitn(3, ' ');
    let version = parts.next().unwrap_or_default();
    check_version(version)?;
    let code = parts.next().unwrap_or_default();
    let status = code
        .parse::<u16>()
        .ok()
        .filter(|status| (100..=999).contains(status))
        .ok_or_else(|| malformed(format!("status code {code:?} is not a three digit number")))?;
    Ok(ResponseDescriptor {
        status,
        headers: message.headers,
        body: message.body,
    })
}

struct RawMessage {
    start_line: String,
    headers: Headers,
    body: Vec<u8>,
}

fn write_head_and_body(
    out: &mut Vec<u8>,
    headers: &Headers,
    body: &[u8],
) -> Result<(), String> {
    for (name, value) in headers {
        check_header(name, value)?;
        out.extend_from_slice(format!("{name}: {}\r\n", value.trim()).as_bytes());
    }
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(body);
    Ok(())
}

fn check_header(name: &str, value: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("header name is empty".to_string());
    }
    if name
        .bytes()
        .any(|b| b == b':' || b.is_ascii_whitespace() || b.is_ascii_control())
    {
        return Err(format!("header name {name:?} cannot be stored"));
    }
    if value.bytes().any(|b| b == b'\r' || b == b'\n') {
        return Err(format!("header {name} has a line break in its value"));
    }
    Ok(())
}

fn split_message(raw: &[u8]) -> Result<RawMessage, PlayerError> {
    let mut lines = Vec::new();
    let mut pos = 0;
    let body_start = loop {
        let Some(offset) = raw[pos..].iter().position(|b| *b == b'\n') else {
            return Err(malformed("missing blank line after headers".to_string()));
        };
        let end = pos + offset;
        let line = raw[pos..end].strip_suffix(b"\r").unwrap_or(&raw[pos..end]);
        pos = end + 1;
        if line.is_empty() {
            break pos;
        }
        let line = std::str::from_utf8(line)
            .map_err(|_| malformed("message head is not valid utf-8".to_string()))?;
        lines.push(line.to_string());
    };

    let mut lines = lines.into_iter();
    let start_line = lines
        .next()
        .ok_or_else(|| malformed("empty message head".to_string()))?;
    let mut headers = Vec::new();
    for line in lines {
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| malformed(format!("header line {line:?} has no `:`")))?;
        let name = name.trim();
        if name.is_empty() {
            return Err(malformed(format!("header line {line:?} has an empty name")));
        }
        headers.push((name.to_string(), value.trim().to_string()));
    }

    Ok(RawMessage {
        start_line,
        headers,
        body: raw[body_start..].to_vec(),
    })
}

fn check_version(version: &str) -> Result<(), PlayerError> {
    if version.starts_with("HTTP/") {
        Ok(())
    } else {
        Err(malformed(format!("unsupported protocol version {version:?}")))
    }
}

fn malformed(reason: String) -> PlayerError {
    PlayerError::MalformedExchange(reason)
}

fn canonical_reason(status: u16) -> &'static str {
    match status {
        100 => "Continue",
        101 => "Switching Protocols",
        200 => "OK",
        201 => "Created",
        202 => "Accepted",
        204 => "No Content",
        206 => "Partial Content",
        301 => "Moved Permanently",
        302 => "Found",
        303 => "See Other",
        304 => "Not Modified",
        307 => "Temporary Redirect",
        308 => "Permanent Redirect",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        409 => "Conflict",
        410 => "Gone",
        412 => "Precondition Failed",
        415 => "Unsupported Media Type",
        422 => "Unprocessable Entity",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        _ => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_is_written_in_origin_form() {
        let req = RequestDescriptor::new("GET", "https://www.google.com/search?q=weather")
            .with_header("User-Agent", "MyUserAgent/1.0");
        let text = String::from_utf8(encode_request(&req).expect("encode")).expect("utf8");
        assert_eq!(
            text,
            "GET /search?q=weather HTTP/1.1\r\nUser-Agent: MyUserAgent/1.0\r\n\r\n"
        );
    }

    #[test]
    fn response_carries_reason_phrase_and_raw_body() {
        let res = ResponseDescriptor::new(404)
            .with_header("Content-Type", "text/plain")
            .with_body("nope\r\n\r\nstill body");
        let raw = encode_response(&res).expect("encode");
        assert!(raw.starts_with(b"HTTP/1.1 404 Not Found\r\n"));
        let back = decode_response(&raw).expect("decode");
        assert_eq!(back, res);
    }

    #[test]
    fn hand_edited_lf_files_decode() {
        let raw = b"POST /items HTTP/1.1\nContent-Type:  application/json \nX-Empty:\n\n{\"a\":1}";
        let req = decode_request(raw).expect("decode");
        assert_eq!(req.method, "POST");
        assert_eq!(req.url, "/items");
        assert_eq!(
            req.headers,
            vec![
                ("Content-Type".to_string(), "application/json".to_string()),
                ("X-Empty".to_string(), String::new()),
            ]
        );
        assert_eq!(req.body, b"{\"a\":1}");
    }

    #[test]
    fn unknown_status_has_empty_reason_and_still_decodes() {
        let raw = encode_response(&ResponseDescriptor::new(599)).expect("encode");
        assert_eq!(raw, b"HTTP/1.1 599 \r\n\r\n");
        assert_eq!(decode_response(&raw).expect("decode").status, 599);
    }

    #[test]
    fn malformed_messages_are_rejected() {
        let cases: [&[u8]; 6] = [
            b"GET /a HTTP/1.1\r\nHost: x\r\n",
            b"GET /a\r\n\r\n",
            b"GET /a SPDY/3\r\n\r\n",
            b"GET /a HTTP/1.1\r\nno-colon-here\r\n\r\n",
            b"\r\n",
            b"GET /a HTTP/1.1\r\n: value\r\n\r\n",
        ];
        for raw in cases {
            assert!(
                matches!(decode_request(raw), Err(PlayerError::MalformedExchange(_))),
                "{:?} should be malformed",
                String::from_utf8_lossy(raw)
            );
        }
        for raw in [&b"HTTP/1.1 abc OK\r\n\r\n"[..], b"HTTP/1.1 42 Hm\r\n\r\n"] {
            assert!(matches!(
                decode_response(raw),
                Err(PlayerError::MalformedExchange(_))
            ));
        }
    }

    #[test]
    fn header_values_lose_only_surrounding_whitespace() {
        let req = RequestDescriptor::new("GET", "https://www.google.com/")
            .with_header("X-Pad", " v ")
            .with_header("X-Inner", "a  b");
        let back = decode_request(&encode_request(&req).expect("encode")).expect("decode");
        assert_eq!(
            back.headers,
            vec![
                ("X-Pad".to_string(), "v".to_string()),
                ("X-Inner".to_string(), "a  b".to_string()),
            ]
        );
    }

    #[test]
    fn headers_that_would_break_the_file_are_refused() {
        let bad_headers = [
            ("X-Inj", "a\r\nX-Evil: 1"),
            ("X-Lf", "a\nb"),
            ("", "v"),
            ("X:Colon", "v"),
            ("X Space", "v"),
        ];
        for (name, value) in bad_headers {
            let req =
                RequestDescriptor::new("GET", "https://www.google.com/").with_header(name, value);
            assert!(
                matches!(encode_request(&req), Err(PlayerError::InvalidRequest(_))),
                "{name:?}: {value:?} should be refused"
            );
            let res = ResponseDescriptor::new(200).with_header(name, value);
            assert!(matches!(
                encode_response(&res),
                Err(PlayerError::MalformedExchange(_))
            ));
        }
    }
}
