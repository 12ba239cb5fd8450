use super::{MediaRole, MediaSession};
use crate::error::{Result, RtspError};
use crate::protocol::sdp::generate_view_sdp;

impl MediaSession {
    /// Build the description a viewer receives from its target publisher.
    ///
    /// The generated text also becomes this session's own description, so
    /// later SETUPs bind against the mirrored entries.
    pub fn generate_sdp(&self) -> Result<String> {
        if self.role != MediaRole::View {
            return Err(RtspError::InvalidMedia);
        }
        let source = self
            .target()
            .and_then(|target| target.description())
            .ok_or(RtspError::InvalidTargetMedia)?;

        let sdp = generate_view_sdp(
            &source,
            &self.ctx.config.host,
            &self.name,
            &self.ctx.config.server_name,
        );
        self.set_sdp(&sdp)?;
        Ok(sdp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{context, publish_with_sdp, view_of};

    #[test]
    fn view_mirrors_publisher_entries_in_order() {
        let ctx = context();
        let (_publisher, _pc) = publish_with_sdp(
            &ctx,
            "cam1",
            "v=0\r\no=- 0 0 IN IP4 10.0.0.5\r\ns=x\r\nt=0 0\r\n\
             m=audio 0 RTP/AVP 97\r\na=rtpmap:97 PCMA/8000\r\n\
             m=video 0 RTP/AVP 96\r\na=rtpmap:96 H264/90000\r\na=fmtp:96 packetization-mode=1\r\n",
        );
        let (view, _vc) = view_of(&ctx, "cam1");

        let sdp = view.generate_sdp().unwrap();
        assert!(sdp.starts_with("v=0\r\no=- 0 0 IN IP4 127.0.0.1\r\ns=cam1\r\nt=0 0\r\na=tool:RTSP SERVER\r\n"));
        assert!(sdp.contains("m=video 0 RTP/AVP 96\r\na=rtpmap:96 H264/90000\r\na=fmtp:96 packetization-mode=1\r\na=control:video\r\n"));
        assert!(sdp.contains("m=audio 0 RTP/AVP 97\r\na=rtpmap:97 PCMA/8000\r\na=control:audio\r\n"));

        assert_eq!(view.sdp(), sdp);
        assert_eq!(view.description().unwrap().media_types(), vec!["video", "audio"]);
    }

    #[test]
    fn publisher_cannot_generate() {
        let ctx = context();
        let (publisher, _pc) = publish_with_sdp(&ctx, "cam1", "v=0\r\n");
        assert!(matches!(publisher.generate_sdp(), Err(RtspError::InvalidMedia)));
    }

    #[test]
    fn target_without_description_fails() {
        let ctx = context();
        let (_publisher, _pc) = publish_with_sdp(&ctx, "cam1", "");
        let (view, _vc) = view_of(&ctx, "cam1");
        assert!(matches!(view.generate_sdp(), Err(RtspError::InvalidTargetMedia)));
    }
}
