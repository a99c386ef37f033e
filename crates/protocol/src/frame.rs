//! Binary slice frames.
//!
//! Layout: `[u32 big-endian header length][JSON SliceUploadHeader][slice bytes]`.
//! The client encodes and the server decodes with the same functions.

use crate::constants::{SLICE_HEADER_RESERVE, WS_MAX_MESSAGE_SIZE};
use crate::messages::SliceUploadHeader;

/// Size of the header length prefix.
pub const LEN_PREFIX: usize = 4;

/// A decoded slice upload frame.
#[derive(Debug)]
pub struct SliceFrame {
    pub header: SliceUploadHeader,
    pub data: Vec<u8>,
}

/// Errors from encoding or decoding a slice frame.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("frame too short (need at least {LEN_PREFIX} bytes)")]
    TooShort,

    #[error("header truncated: expected {expected} bytes, got {got}")]
    HeaderTruncated { expected: usize, got: usize },

    #[error("invalid header JSON: {0}")]
    InvalidJson(String),

    #[error("header is {0} bytes, limit is {SLICE_HEADER_RESERVE}")]
    HeaderTooLarge(usize),

    #[error("frame is {0} bytes, limit is {WS_MAX_MESSAGE_SIZE}")]
    TooLarge(usize),
}

/// Builds the binary frame for one slice.
///
/// Fails rather than produce a frame the server would refuse to read.
pub fn encode_slice_frame(header: &SliceUploadHeader, data: &[u8]) -> Result<Vec<u8>, FrameError> {
    let header_json =
        serde_json::to_vec(header).map_err(|e| FrameError::InvalidJson(e.to_string()))?;
    if header_json.len() > SLICE_HEADER_RESERVE {
        return Err(FrameError::HeaderTooLarge(header_json.len()));
    }
    let total = LEN_PREFIX + header_json.len() + data.len();
    if total > WS_MAX_MESSAGE_SIZE {
        return Err(FrameError::TooLarge(total));
    }

    let mut buf = Vec::with_capacity(total);
    buf.extend_from_slice(&(header_json.len() as u32).to_be_bytes());
    buf.extend_from_slice(&header_json);
    buf.extend_from_slice(data);
    Ok(buf)
}

/// Splits a binary frame into its header and slice bytes.
pub fn parse_slice_frame(buf: &[u8]) -> Result<SliceFrame, FrameError> {
    let Some((prefix, rest)) = buf.split_first_chunk::<LEN_PREFIX>() else {
        return Err(FrameError::TooShort);
    };
    let header_len = u32::from_be_bytes(*prefix) as usize;
    if rest.len() < header_len {
        return Err(FrameError::HeaderTruncated {
            expected: header_len,
            got: rest.len(),
        });
    }

    let (header_bytes, data) = rest.split_at(header_len);
    let header = serde_json::from_slice(header_bytes)
        .map_err(|e| FrameError::InvalidJson(e.to_string()))?;
    Ok(SliceFrame {
        header,
        data: data.to_vec(),
    })
}
