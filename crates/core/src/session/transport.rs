use std::str::FromStr;

/// How a media session's payload travels.
///
/// Fixed by the first successful SETUP of a session; every later SETUP must
/// request the same mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportMode {
    /// Interleaved on the control connection (`RTP/AVP/TCP`).
    Tcp,
    /// Separate UDP sockets (`RTP/AVP` or `RTP/AVP/UDP`).
    Udp,
}

impl TransportMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tcp => "TCP",
            Self::Udp => "UDP",
        }
    }
}

impl std::fmt::Display for TransportMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A `first-second` pair from a transport parameter, kept together with the
/// text it was parsed from so replies can echo it unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Range<T> {
    pub first: T,
    pub second: T,
    pub text: String,
}

impl<T: FromStr> Range<T> {
    fn parse(value: &str) -> Option<Self> {
        let (first, second) = value.trim().split_once('-')?;
        Some(Range {
            first: first.trim().parse().ok()?,
            second: second.trim().parse().ok()?,
            text: value.trim().to_string(),
        })
    }
}

/// Fields the relay reads from a SETUP `Transport` header (RFC 2326 §12.39).
///
/// ## Wire format examples
///
/// ```text
/// Transport: RTP/AVP/UDP;unicast;client_port=6000-6001;mode=record
/// Transport: RTP/AVP/TCP;unicast;interleaved=0-1;mode=record
/// ```
///
/// The mode is TCP whenever the value mentions `TCP` anywhere, UDP
/// otherwise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportHeader {
    pub mode: TransportMode,
    /// `client_port=RTP-RTCP`, where the client receives (view) or sends
    /// from (publish).
    pub client_port: Option<Range<u16>>,
    /// `interleaved=a-b` channel numbers for TCP transport.
    pub interleaved: Option<Range<u8>>,
}

impl TransportHeader {
    /// Parse the `Transport` header value.
    ///
    /// Returns `None` only for an empty value; missing or malformed
    /// parameters are left as `None` for the caller to judge.
    ///
    /// ## Examples
    ///
    /// ```
    /// use rtsp_relay::session::transport::{TransportHeader, TransportMode};
    ///
    /// let th = TransportHeader::parse("RTP/AVP;unicast;client_port=8000-8001").unwrap();
    /// assert_eq!(th.mode, TransportMode::Udp);
    /// assert_eq!(th.client_port.unwrap().first, 8000);
    ///
    /// let th = TransportHeader::parse("RTP/AVP/TCP;unicast;interleaved=2-3").unwrap();
    /// assert_eq!(th.mode, TransportMode::Tcp);
    /// assert_eq!(th.interleaved.unwrap().first, 2);
    ///
    /// assert!(TransportHeader::parse("").is_none());
    /// ```
    pub fn parse(header: &str) -> Option<Self> {
        if header.trim().is_empty() {
            return None;
        }

        let mode = if header.contains("TCP") {
            TransportMode::Tcp
        } else {
            TransportMode::Udp
        };

        let mut client_port = None;
        let mut interleaved = None;
        for part in header.split(';') {
            let part = part.trim();
            if let Some(ports) = part.strip_prefix("client_port=") {
                client_port = Range::parse(ports);
            } else if let Some(channels) = part.strip_prefix("interleaved=") {
                interleaved = Range::parse(channels);
            }
        }

        Some(TransportHeader {
            mode,
            client_port,
            interleaved,
        })
    }

    /// The `client_port` text as sent, or empty.
    pub fn client_port_text(&self) -> &str {
        self.client_port.as_ref().map_or("", |range| range.text.as_str())
    }
}
