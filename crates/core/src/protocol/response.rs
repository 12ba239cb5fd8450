/// An RTSP response (RFC 2326 §7).
///
/// Serializes to the standard text format:
///
/// ```text
/// RTSP/1.0 200 OK\r\n
/// Server: RTSP SERVER\r\n
/// CSeq: 1\r\n
/// Content-Type: application/sdp\r\n
/// Content-Length: 142\r\n
/// \r\n
/// v=0\r\n...
/// ```
///
/// Uses a builder pattern: chain [`add_header`](Self::add_header) and
/// [`with_body`](Self::with_body), then call [`serialize`](Self::serialize).
/// `Content-Length` is computed automatically when a body is present.
#[must_use]
pub struct RtspResponse {
    pub protocol: String,
    pub status_code: u16,
    pub status_text: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

/// Server identification used when no configured name is supplied.
pub const DEFAULT_SERVER_NAME: &str = "RTSP SERVER";

/// Protocol token of the status line.
pub const RTSP_VERSION: &str = "RTSP/1.0";

/// Methods advertised in the `Public` header of OPTIONS replies.
pub const PUBLIC_METHODS: &str = "OPTIONS, DESCRIBE, ANNOUNCE, SETUP, TEARDOWN, RECORD, PLAY, PAUSE, ECHO";

impl RtspResponse {
    /// Reason phrases come from error tokens and access callbacks; CR/LF is
    /// replaced so they cannot inject header lines.
    pub fn new(status_code: u16, status_text: &str) -> Self {
        RtspResponse {
            protocol: RTSP_VERSION.to_string(),
            status_code,
            status_text: status_text.replace(['\r', '\n'], " "),
            headers: vec![("Server".to_string(), DEFAULT_SERVER_NAME.to_string())],
            body: None,
        }
    }

    /// 200 OK: success (RFC 2326 §7.1.1).
    pub fn ok() -> Self {
        Self::new(200, "OK")
    }

    /// 401 Unauthorized: the connection has not passed the auth check.
    pub fn unauthorized() -> Self {
        Self::new(401, "Unauthorized")
    }

    /// 400 Bad Request: malformed or missing required header.
    pub fn bad_request() -> Self {
        Self::new(400, "Bad Request")
    }

    /// Replace the server identity header value.
    pub fn server(mut self, name: &str) -> Self {
        if let Some((_, value)) = self.headers.iter_mut().find(|(n, _)| n == "Server") {
            *value = name.to_string();
        }
        self
    }

    pub fn add_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// Echo the request's CSeq, if it had one.
    pub fn cseq(self, cseq: Option<&str>) -> Self {
        match cseq {
            Some(cseq) => self.add_header("CSeq", cseq),
            None => self,
        }
    }

    pub fn with_body(mut self, body: String) -> Self {
        self.body = Some(body);
        self
    }

    /// Serialize to the RTSP text wire format.
    ///
    /// If a body is present, `Content-Length` is appended automatically
    /// (RFC 2326 §12.14).
    pub fn serialize(&self) -> String {
        let mut response = format!(
            "{} {} {}\r\n",
            self.protocol, self.status_code, self.status_text
        );

        for (name, value) in &self.headers {
            response.push_str(&format!("{}: {}\r\n", name, value));
        }

        if let Some(body) = &self.body {
            response.push_str(&format!("Content-Length: {}\r\n", body.len()));
            response.push_str("\r\n");
            response.push_str(body);
        } else {
            response.push_str("\r\n");
        }
        response
    }
}
