use std::collections::HashMap;

use crate::error::{ParseErrorKind, RtspError};

/// A parsed RTSP request (RFC 2326 §6).
///
/// RTSP requests follow HTTP/1.1 syntax:
///
/// ```text
/// Method SP Request-URI SP RTSP-Version CRLF
/// *(Header: Value CRLF)
/// CRLF
/// [body]
/// ```
///
/// Header lookup is case-insensitive per RFC 2326 §4.2. Everything after
/// the blank line is kept verbatim as the body.
#[derive(Debug)]
pub struct RtspRequest {
    /// RTSP method (OPTIONS, ANNOUNCE, SETUP, RECORD, etc.).
    pub method: String,
    /// Request-URI (e.g. `rtsp://host:port/live/cam1?token=abc`).
    pub uri: String,
    /// Protocol version (expected: `RTSP/1.0`).
    pub version: String,
    /// Headers as ordered (name, value) pairs. Names are stored as-received;
    /// lookups via [`get_header`](Self::get_header) are case-insensitive.
    pub headers: Vec<(String, String)>,
    /// Text after the header block (e.g. the SDP of an ANNOUNCE).
    pub body: String,
}

impl RtspRequest {
    /// Parse an RTSP request from its text representation.
    ///
    /// Returns [`RtspError::Parse`] on malformed input.
    pub fn parse(raw: &str) -> crate::error::Result<Self> {
        let (head, body) = split_head_body(raw);
        let mut lines = head.lines();

        let request_line = lines
            .next()
            .filter(|line| !line.trim().is_empty())
            .ok_or(RtspError::Parse {
                kind: ParseErrorKind::EmptyRequest,
            })?;

        let parts: Vec<&str> = request_line.split_whitespace().collect();

        if parts.len() != 3 {
            return Err(RtspError::Parse {
                kind: ParseErrorKind::InvalidRequestLine,
            });
        }

        let method = parts[0].to_string();
        let uri = parts[1].to_string();
        let version = parts[2].to_string();

        if version != "RTSP/1.0" {
            tracing::debug!(version, "client sent non-RTSP/1.0 version");
        }

        let mut headers = Vec::new();

        for line in lines {
            let line = line.trim_end_matches('\r');
            if line.is_empty() {
                break;
            }

            let colon_pos = line.find(':').ok_or(RtspError::Parse {
                kind: ParseErrorKind::InvalidHeader,
            })?;

            let name = line[..colon_pos].trim().to_string();
            let value = line[colon_pos + 1..].trim().to_string();

            headers.push((name, value));
        }

        Ok(RtspRequest {
            method,
            uri,
            version,
            headers,
            body: body.to_string(),
        })
    }

    /// Look up a header value by name (case-insensitive, per RFC 2326 §4.2).
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Returns the CSeq header value, which numbers and orders RTSP
    /// request/response pairs (RFC 2326 §12.17).
    pub fn cseq(&self) -> Option<&str> {
        self.get_header("CSeq")
    }

    /// Request-target data derived from the request line.
    pub fn target(&self) -> RequestTarget {
        RequestTarget::from_request(self)
    }
}

fn split_head_body(raw: &str) -> (&str, &str) {
    if let Some(pos) = raw.find("\r\n\r\n") {
        (&raw[..pos], &raw[pos + 4..])
    } else if let Some(pos) = raw.find("\n\n") {
        (&raw[..pos], &raw[pos + 2..])
    } else {
        (raw, "")
    }
}

/// What a connection asked for, kept for access decisions and to name the
/// stream a media session publishes or views.
///
/// `rtsp://host:5544/live/cam1?token=abc` yields `url` =
/// `rtsp://host:5544/live/cam1`, `name` = `cam1`, `params` = `{token: abc}`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestTarget {
    /// Full request target as sent.
    pub origin: String,
    /// Protocol version token from the request line.
    pub protocol: String,
    /// Target without the query string.
    pub url: String,
    /// Raw query string.
    pub query: String,
    /// Query parameters (`k=v` pairs split on `&`).
    pub params: HashMap<String, String>,
    /// Last path segment of `url`; empty when the URL ends with `/`.
    pub name: String,
    pub user_agent: String,
}

impl RequestTarget {
    pub fn from_request(request: &RtspRequest) -> Self {
        let origin = request.uri.clone();
        let (url, query) = match origin.split_once('?') {
            Some((url, query)) => (url.to_string(), query.to_string()),
            None => (origin.clone(), String::new()),
        };

        let params = query
            .split('&')
            .filter(|pair| !pair.is_empty())
            .map(|pair| match pair.split_once('=') {
                Some((k, v)) => (k.to_string(), v.to_string()),
                None => (pair.to_string(), String::new()),
            })
            .collect();

        Self {
            name: stream_name(&url).to_string(),
            protocol: request.version.clone(),
            user_agent: request.get_header("User-Agent").unwrap_or("").to_string(),
            origin,
            url,
            query,
            params,
        }
    }
}

/// Last path segment of a URL.
///
/// `rtsp://host/live/cam1` → `cam1`, `rtsp://host/cam1/` → ``,
/// `rtsp://host` → ``.
pub fn stream_name(url: &str) -> &str {
    let path = url
        .strip_prefix("rtsp://")
        .or_else(|| url.strip_prefix("rtsps://"))
        .map(|rest| rest.find('/').map_or("", |slash| &rest[slash..]))
        .unwrap_or(url);
    match path.rfind('/') {
        Some(pos) => &path[pos + 1..],
        None => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_options_request() {
        let raw = "OPTIONS rtsp://localhost:5544/test RTSP/1.0\r\nCSeq: 1\r\n\r\n";
        let req = RtspRequest::parse(raw).unwrap();
        assert_eq!(req.method, "OPTIONS");
        assert_eq!(req.uri, "rtsp://localhost:5544/test");
        assert_eq!(req.version, "RTSP/1.0");
        assert_eq!(req.cseq(), Some("1"));
        assert!(req.body.is_empty());
    }

    #[test]
    fn parse_setup_with_transport() {
        let raw = "SETUP rtsp://localhost:5544/test/streamid=0 RTSP/1.0\r\n\
                   CSeq: 3\r\n\
                   Transport: RTP/AVP/UDP;unicast;client_port=8000-8001;mode=record\r\n\r\n";
        let req = RtspRequest::parse(raw).unwrap();
        assert_eq!(req.method, "SETUP");
        assert_eq!(req.cseq(), Some("3"));
        assert_eq!(
            req.get_header("Transport"),
            Some("RTP/AVP/UDP;unicast;client_port=8000-8001;mode=record")
        );
    }

    #[test]
    fn parse_announce_keeps_body() {
        let raw = "ANNOUNCE rtsp://h/cam1 RTSP/1.0\r\nCSeq: 2\r\n\
                   Content-Type: application/sdp\r\nContent-Length: 10\r\n\r\n\
                   v=0\r\ns=x\r\n";
        let req = RtspRequest::parse(raw).unwrap();
        assert_eq!(req.body, "v=0\r\ns=x\r\n");
        assert_eq!(req.get_header("content-length"), Some("10"));
    }

    #[test]
    fn parse_empty_request() {
        assert!(RtspRequest::parse("").is_err());
        assert!(RtspRequest::parse("\r\n\r\n").is_err());
    }

    #[test]
    fn parse_invalid_request_line() {
        assert!(RtspRequest::parse("JUST_A_METHOD\r\n\r\n").is_err());
    }

    #[test]
    fn header_lookup_case_insensitive() {
        let raw = "OPTIONS rtsp://localhost RTSP/1.0\r\ncseq: 42\r\n\r\n";
        let req = RtspRequest::parse(raw).unwrap();
        assert_eq!(req.get_header("CSeq"), Some("42"));
        assert_eq!(req.get_header("cseq"), Some("42"));
        assert_eq!(req.get_header("CSEQ"), Some("42"));
    }

    #[test]
    fn target_splits_query_and_name() {
        let raw = "OPTIONS rtsp://127.0.0.1:5544/live/cam1?token=abc&debug RTSP/1.0\r\n\
                   CSeq: 1\r\nUser-Agent: Lavf60.16.100\r\n\r\n";
        let target = RtspRequest::parse(raw).unwrap().target();
        assert_eq!(target.url, "rtsp://127.0.0.1:5544/live/cam1");
        assert_eq!(target.name, "cam1");
        assert_eq!(target.protocol, "RTSP/1.0");
        assert_eq!(target.user_agent, "Lavf60.16.100");
        assert_eq!(target.params.get("token").map(String::as_str), Some("abc"));
        assert_eq!(target.params.get("debug").map(String::as_str), Some(""));
    }

    #[test]
    fn stream_name_variants() {
        assert_eq!(stream_name("rtsp://h:1/cam1"), "cam1");
        assert_eq!(stream_name("rtsp://h:1/a/b/c"), "c");
        assert_eq!(stream_name("rtsp://h:1/cam1/"), "");
        assert_eq!(stream_name("rtsp://h:1"), "");
        assert_eq!(stream_name("/cam2"), "cam2");
        assert_eq!(stream_name("*"), "");
    }
}
