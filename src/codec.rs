use bytes::{Buf, BytesMut};
use std::io;
use tokio_util::codec::Decoder;

/// Re-encodes a byte stream in some legacy charset to UTF-8, frame by frame.
/// Unmappable bytes become U+FFFD rather than failing the stream.
pub struct Utf8Transcoder {
    decoder: encoding_rs::Decoder,
    replaced: bool,
    finished: bool,
}

impl Utf8Transcoder {
    pub fn new(encoding: &'static encoding_rs::Encoding) -> Self {
        Self {
            decoder: encoding.new_decoder(),
            replaced: false,
            finished: false,
        }
    }

    fn transcode(&mut self, src: &mut BytesMut, last: bool) -> Option<BytesMut> {
        let capacity = self
            .decoder
            .max_utf8_buffer_length(src.len())
            .unwrap_or(src.len() * 3 + 16);
        let mut out = vec![0u8; capacity];
        let (_, read, written, had_errors) = self.decoder.decode_to_utf8(src, &mut out, last);
        if had_errors && !self.replaced {
            log::warn!("input contains bytes invalid for its charset; replaced with U+FFFD");
            self.replaced = true;
        }
        src.advance(read);
        (written > 0).then(|| BytesMut::from(&out[..written]))
    }
}

impl Decoder for Utf8Transcoder {
    type Item = BytesMut;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.is_empty() {
            return Ok(None);
        }
        Ok(self.transcode(src, false))
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // encoding_rs decoders must not be driven again after the final call
        if self.finished {
            buf.clear();
            return Ok(None);
        }
        self.finished = true;
        let out = self.transcode(buf, true);
        buf.clear();
        Ok(out)
    }
}
