use crate::process::{OutputLine, OutputStream};
use tokio::io::AsyncRead;
use tokio_stream::{Stream, StreamExt};
use tokio_util::bytes::BytesMut;
use tokio_util::codec::{Decoder, FramedRead};

/// Splits subprocess output into lines
///
/// Invalid UTF-8 is replaced rather than rejected; runner output is only ever
/// inspected by readiness detectors and logged. A trailing `\r` is dropped.
#[derive(Debug, Default)]
pub struct OutputLineCodec {
    // Bytes before this index are known not to contain a newline.
    next_index: usize,
}

impl OutputLineCodec {
    pub fn new() -> Self {
        Self::default()
    }
}

fn to_line(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}

impl Decoder for OutputLineCodec {
    type Item = String;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match src[self.next_index..].iter().position(|b| *b == b'\n') {
            Some(offset) => {
                let end = self.next_index + offset;
                self.next_index = 0;
                let line = src.split_to(end + 1);
                Ok(Some(to_line(&line[..end])))
            }
            None => {
                self.next_index = src.len();
                Ok(None)
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(line) = self.decode(src)? {
            return Ok(Some(line));
        }
        if src.is_empty() {
            return Ok(None);
        }

        self.next_index = 0;
        let rest = src.split_to(src.len());
        Ok(Some(to_line(&rest)))
    }
}

/// Decode `io` into a stream of output lines tagged with `stream`
pub fn output_lines<R: AsyncRead + Unpin>(
    io: R,
    stream: OutputStream,
) -> impl Stream<Item = std::io::Result<OutputLine>> {
    FramedRead::with_capacity(io, OutputLineCodec::new(), 1024)
        .map(move |frame| frame.map(|text| OutputLine { stream, text }))
}
