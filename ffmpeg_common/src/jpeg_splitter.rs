/// Splits a concatenated MJPEG byte stream into individual JPEG images.
///
/// Frames are delimited by the SOI (`FF D8`) and EOI (`FF D9`) markers. Bytes
/// before the first SOI are dropped. Entropy coded data byte-stuffs `FF`, so
/// `FF D9` only appears at the real end of an image.
#[derive(Debug, Default)]
pub struct JpegSplitter {
    buf: Vec<u8>,
}

const SOI: [u8; 2] = [0xFF, 0xD8];
const EOI: [u8; 2] = [0xFF, 0xD9];

fn find(haystack: &[u8], needle: [u8; 2], from: usize) -> Option<usize> {
    haystack
        .get(from..)?
        .windows(2)
        .position(|w| w == needle)
        .map(|p| p + from)
}

impl JpegSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `chunk` and returns every image completed by it.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        self.buf.extend_from_slice(chunk);
        let mut frames = Vec::new();
        loop {
            let Some(start) = find(&self.buf, SOI, 0) else {
                // keep a trailing FF, it may begin the next SOI
                let keep = usize::from(self.buf.last() == Some(&0xFF));
                self.buf.drain(..self.buf.len() - keep);
                break;
            };
            let Some(end) = find(&self.buf, EOI, start + 2) else {
                self.buf.drain(..start);
                break;
            };
            frames.push(self.buf[start..end + 2].to_vec());
            self.buf.drain(..end + 2);
        }
        frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jpeg(body: &[u8]) -> Vec<u8> {
        let mut v = SOI.to_vec();
        v.extend_from_slice(body);
        v.extend_from_slice(&EOI);
        v
    }

    #[test]
    fn splits_back_to_back_frames() {
        let mut stream = jpeg(&[1, 2, 3]);
        stream.extend(jpeg(&[4, 5]));
        let frames = JpegSplitter::new().push(&stream);
        assert_eq!(frames, vec![jpeg(&[1, 2, 3]), jpeg(&[4, 5])]);
    }

    #[test]
    fn frames_split_across_chunks() {
        let stream = jpeg(&[9, 8, 7, 6]);
        let mut splitter = JpegSplitter::new();
        let mut out = Vec::new();
        for byte in &stream {
            out.extend(splitter.push(std::slice::from_ref(byte)));
        }
        assert_eq!(out, vec![stream]);
        assert!(splitter.buf.is_empty());
    }

    #[test]
    fn garbage_before_soi_is_dropped() {
        let mut stream = vec![0x00, 0x11, 0xFF];
        stream.extend(jpeg(&[1]));
        let frames = JpegSplitter::new().push(&stream);
        assert_eq!(frames, vec![jpeg(&[1])]);
    }

    #[test]
    fn incomplete_frame_is_held_back() {
        let mut splitter = JpegSplitter::new();
        assert!(splitter.push(&[0xFF, 0xD8, 1, 2]).is_empty());
        assert_eq!(splitter.buf.len(), 4);
        assert_eq!(splitter.push(&[0xFF, 0xD9]), vec![jpeg(&[1, 2])]);
    }
}
