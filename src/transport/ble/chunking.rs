//! Splitting payloads into MTU sized characteristic writes and reassembling reads
//!
//! Each chunk starts with a one byte header. Bit 0 set means more chunks follow.

const MORE_FLAG: u8 = 0x01;
const HEADER_LEN: usize = 1;
const ATT_OVERHEAD: usize = 3;

/// Upper bound for a reassembled message
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Usable chunk size (header included) for a negotiated ATT MTU
pub fn chunk_size_for_mtu(mtu: usize) -> usize {
    mtu.saturating_sub(ATT_OVERHEAD).max(HEADER_LEN + 1)
}

/// Split `payload` into chunks of at most `chunk_size` bytes each
pub fn split(payload: &[u8], chunk_size: usize) -> Vec<Vec<u8>> {
    let data_len = chunk_size.saturating_sub(HEADER_LEN).max(1);

    if payload.is_empty() {
        return vec![vec![0]];
    }

    let count = payload.len().div_ceil(data_len);
    payload
        .chunks(data_len)
        .enumerate()
        .map(|(i, data)| {
            let header = if i + 1 < count { MORE_FLAG } else { 0 };
            let mut chunk = Vec::with_capacity(HEADER_LEN + data.len());
            chunk.push(header);
            chunk.extend_from_slice(data);
            chunk
        })
        .collect()
}

/// Collects chunks until the final one arrives
#[derive(Debug, Default)]
pub struct Reassembler {
    buffer: Vec<u8>,
}

impl Reassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk; returns the full message once the last chunk was seen
    pub fn push(&mut self, chunk: &[u8]) -> Result<Option<Vec<u8>>, String> {
        let (&header, data) = chunk
            .split_first()
            .ok_or_else(|| "empty chunk".to_string())?;

        if self.buffer.len() + data.len() > MAX_MESSAGE_SIZE {
            return Err(format!(
                "message exceeds {} bytes",
                MAX_MESSAGE_SIZE
            ));
        }
        self.buffer.extend_from_slice(data);

        if header & MORE_FLAG == 0 {
            Ok(Some(std::mem::take(&mut self.buffer)))
        } else {
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_small_payload_single_chunk() {
        let chunks = split(b"hello", 20);
        assert_eq!(chunks, vec![b"\x00hello".to_vec()]);
    }

    #[test]
    fn test_empty_payload() {
        let chunks = split(&[], 20);
        assert_eq!(chunks, vec![vec![0]]);

        let mut reassembler = Reassembler::new();
        assert_eq!(reassembler.push(&chunks[0]).unwrap(), Some(vec![]));
    }

    #[test]
    fn test_large_payload_split_and_reassembled() {
        let payload: Vec<u8> = (0..=255u8).cycle().take(250).collect();
        let chunks = split(&payload, 23);

        assert_eq!(chunks.len(), 12);
        assert!(chunks.iter().all(|c| c.len() <= 23));
        assert!(chunks[..11].iter().all(|c| c[0] == MORE_FLAG));
        assert_eq!(chunks[11][0], 0);

        let mut reassembler = Reassembler::new();
        let mut message = None;
        for chunk in &chunks {
            message = reassembler.push(chunk).unwrap();
        }
        assert_eq!(message, Some(payload));
    }

    #[test]
    fn test_reassembler_rejects_empty_chunk() {
        let mut reassembler = Reassembler::new();
        assert!(reassembler.push(&[]).is_err());
    }

    #[test]
    fn test_chunk_size_for_mtu() {
        assert_eq!(chunk_size_for_mtu(23), 20);
        assert_eq!(chunk_size_for_mtu(517), 514);
        assert_eq!(chunk_size_for_mtu(0), 2);
    }
}
