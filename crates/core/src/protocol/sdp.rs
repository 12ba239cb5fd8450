//! SDP (Session Description Protocol) parsing and generation (RFC 4566 / RFC 8866).
//!
//! Publishers ANNOUNCE a description such as:
//!
//! ```text
//! v=0                                  ← protocol version
//! o=- 0 0 IN IP4 127.0.0.1             ← origin
//! s=No Name                            ← session name
//! t=0 0                                ← timing (live stream)
//! m=video 0 RTP/AVP 96                 ← media description
//! b=AS:1200                            ← bitrate
//! a=rtpmap:96 H264/90000               ← codec/clock rate
//! a=fmtp:96 packetization-mode=1       ← codec parameters
//! a=control:streamid=0                 ← track control URL
//! m=audio 0 RTP/AVP 97
//! a=rtpmap:97 MPEG4-GENERIC/44100/2
//! a=control:streamid=1
//! ```
//!
//! Only the fields the relay needs are kept. The order of `m=` sections is
//! preserved: SETUP negotiations bind to media entries by position.

use crate::error::{Result, RtspError};

/// `o=` line fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Origin {
    pub username: String,
    pub session_id: String,
    pub session_version: String,
    pub network_type: String,
    pub address_type: String,
    pub address: String,
}

/// One payload format of a media entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Codec {
    /// RTP payload type from the `m=` line.
    pub payload_type: u8,
    /// `a=rtpmap:<pt>` value, e.g. `H264/90000`. Empty when absent.
    pub name: String,
    /// `a=fmtp:<pt>` value.
    pub fmtp: Option<String>,
}

/// One `m=` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaDescription {
    /// Media type tag (`video`, `audio`, ...).
    pub media_type: String,
    pub port: u16,
    /// Transport protocol, e.g. `RTP/AVP`.
    pub protocol: String,
    pub codecs: Vec<Codec>,
    /// `a=interleaved=` channel range, e.g. `0-1`.
    pub interleaved: Option<String>,
    /// `a=control:` value.
    pub control: Option<String>,
    /// `b=` value, e.g. `AS:1200`.
    pub bitrate: Option<String>,
}

impl MediaDescription {
    /// First channel number of the interleaved range (`"2-3"` → 2).
    pub fn interleaved_channel(&self) -> Option<u8> {
        self.interleaved
            .as_deref()
            .and_then(|range| range.split('-').next())
            .and_then(|first| first.trim().parse().ok())
    }
}

/// Parsed session description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDescription {
    pub version: u32,
    pub origin: Origin,
    pub session_name: String,
    /// `t=` value; `0 0` when the description has none.
    pub time: String,
    /// Media entries in the order they appeared.
    pub media: Vec<MediaDescription>,
}

impl SessionDescription {
    /// Parse session description text.
    ///
    /// Fails with [`RtspError::InvalidSdp`] when the text is empty or has no
    /// numeric `v=` line. `m=` lines with fewer than four fields are ignored.
    pub fn parse(text: &str) -> Result<Self> {
        if text.trim().is_empty() {
            return Err(RtspError::InvalidSdp("empty description".to_string()));
        }

        let mut version = None;
        let mut origin = Origin::default();
        let mut session_name = None;
        let mut time = None;
        let mut media: Vec<MediaDescription> = Vec::new();
        // Lines of an `m=` section with too few fields must not leak into
        // the previous entry.
        let mut in_ignored_section = false;

        for line in text.lines() {
            let line = line.trim_end_matches('\r');
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };

            if key == "m" {
                in_ignored_section = false;
                match parse_media_line(value) {
                    Some(entry) => media.push(entry),
                    None => {
                        tracing::debug!(line, "ignoring short m= line");
                        in_ignored_section = true;
                    }
                }
                continue;
            }

            if let Some(current) = media.last_mut().filter(|_| !in_ignored_section) {
                apply_media_line(current, key, value);
                continue;
            }
            if in_ignored_section {
                continue;
            }

            match key {
                "v" if version.is_none() => {
                    version = Some(value.trim().parse::<u32>().map_err(|_| {
                        RtspError::InvalidSdp(format!("invalid version {value:?}"))
                    })?);
                }
                "o" if origin == Origin::default() => origin = parse_origin(value),
                "s" if session_name.is_none() => session_name = Some(value.to_string()),
                "t" if time.is_none() => time = Some(value.to_string()),
                _ => {}
            }
        }

        let version =
            version.ok_or_else(|| RtspError::InvalidSdp("missing v= line".to_string()))?;

        Ok(SessionDescription {
            version,
            origin,
            session_name: session_name.unwrap_or_else(|| "0".to_string()),
            time: time.unwrap_or_else(|| "0 0".to_string()),
            media,
        })
    }

    /// Media type tags in description order.
    pub fn media_types(&self) -> Vec<&str> {
        self.media.iter().map(|m| m.media_type.as_str()).collect()
    }

    /// First media entry of the given type.
    pub fn media(&self, media_type: &str) -> Option<&MediaDescription> {
        self.media.iter().find(|m| m.media_type == media_type)
    }

    pub fn media_mut(&mut self, media_type: &str) -> Option<&mut MediaDescription> {
        self.media.iter_mut().find(|m| m.media_type == media_type)
    }
}

fn parse_origin(value: &str) -> Origin {
    let mut fields = value.split(' ').map(str::to_string);
    Origin {
        username: fields.next().unwrap_or_default(),
        session_id: fields.next().unwrap_or_default(),
        session_version: fields.next().unwrap_or_default(),
        network_type: fields.next().unwrap_or_default(),
        address_type: fields.next().unwrap_or_default(),
        address: fields.next().unwrap_or_default(),
    }
}

fn parse_media_line(value: &str) -> Option<MediaDescription> {
    let fields: Vec<&str> = value.split(' ').filter(|f| !f.is_empty()).collect();
    if fields.len() < 4 {
        return None;
    }
    let codecs = fields[3..]
        .iter()
        .map(|pt| Codec {
            payload_type: pt.parse().unwrap_or(0),
            name: String::new(),
            fmtp: None,
        })
        .collect();

    Some(MediaDescription {
        media_type: fields[0].to_string(),
        port: fields[1].parse().unwrap_or(0),
        protocol: fields[2].to_string(),
        codecs,
        interleaved: None,
        control: None,
        bitrate: None,
    })
}

fn apply_media_line(media: &mut MediaDescription, key: &str, value: &str) {
    match key {
        "b" if media.bitrate.is_none() && !value.is_empty() => {
            media.bitrate = Some(value.to_string());
        }
        "a" => {
            if let Some(range) = value.strip_prefix("interleaved=") {
                media.interleaved.get_or_insert_with(|| range.to_string());
            } else if let Some(control) = value.strip_prefix("control:") {
                media.control.get_or_insert_with(|| control.to_string());
            } else if let Some(rest) = value.strip_prefix("rtpmap:") {
                if let Some((codec, name)) = codec_attribute(media, rest)
                    && codec.name.is_empty()
                {
                    codec.name = name.to_string();
                }
            } else if let Some(rest) = value.strip_prefix("fmtp:")
                && let Some((codec, params)) = codec_attribute(media, rest)
            {
                codec.fmtp.get_or_insert_with(|| params.to_string());
            }
        }
        _ => {}
    }
}

/// Resolve `<pt> <value>` against the codecs listed on the `m=` line.
fn codec_attribute<'a, 'v>(
    media: &'a mut MediaDescription,
    rest: &'v str,
) -> Option<(&'a mut Codec, &'v str)> {
    let (pt, value) = rest.split_once(' ')?;
    let pt: u8 = pt.trim().parse().ok()?;
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    media
        .codecs
        .iter_mut()
        .find(|c| c.payload_type == pt)
        .map(|c| (c, value))
}

/// Generate the description a viewer receives for a published stream.
///
/// Emits the session header, then a media block for `video` and for
/// `audio` when the source has them, each built from the entry's first
/// codec. The `b=` line of either block is emitted only when the source's
/// *video* entry carries a bitrate; its value is the rendered entry's own.
pub fn generate_view_sdp(
    source: &SessionDescription,
    host: &str,
    name: &str,
    tool: &str,
) -> String {
    let mut sdp: Vec<String> = Vec::new();

    sdp.push("v=0".to_string());
    sdp.push(format!("o=- 0 0 IN IP4 {}", host));
    sdp.push(format!("s={}", name));
    sdp.push(format!("t={}", source.time));
    sdp.push(format!("a=tool:{}", tool));

    let video_has_bitrate = source
        .media("video")
        .is_some_and(|video| video.bitrate.is_some());

    for media_type in ["video", "audio"] {
        let Some(entry) = source.media(media_type) else {
            continue;
        };
        let Some(codec) = entry.codecs.first() else {
            continue;
        };

        sdp.push(format!(
            "m={} {} {} {}",
            media_type, entry.port, entry.protocol, codec.payload_type
        ));
        if video_has_bitrate && let Some(bitrate) = &entry.bitrate {
            sdp.push(format!("b={}", bitrate));
        }
        if codec.name.is_empty() {
            sdp.push(format!("a=rtpmap:{}", codec.payload_type));
        } else {
            sdp.push(format!("a=rtpmap:{} {}", codec.payload_type, codec.name));
        }
        if let Some(fmtp) = &codec.fmtp {
            sdp.push(format!("a=fmtp:{} {}", codec.payload_type, fmtp));
        }
        if let Some(interleaved) = &entry.interleaved {
            sdp.push(format!("a=interleaved={}", interleaved));
        }
        sdp.push(format!(
            "a=control:{}",
            entry.control.as_deref().unwrap_or(media_type)
        ));
    }

    tracing::trace!("generated SDP: {}", sdp.join("\r\n"));

    format!("{}\r\n", sdp.join("\r\n"))
}
