//! Framed JSON envelopes exchanged between a producer and the host.
//!
//! Each frame is a 4-byte big-endian length followed by that many bytes of
//! JSON.

use std::io::{self, Read, Write};
use std::sync::mpsc::Receiver;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::codec::WireForm;
use crate::error::HostError;
use crate::intent::{Intent, PendingIntent};
use crate::resources::SizeF;

pub const HOST_TO_PRODUCER_CAP: usize = 65_536;
/// Trees travel base64 encoded inside frames, bitmaps included.
pub const PRODUCER_TO_HOST_CAP: usize = 4 * 1_048_576;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "t")]
pub enum HostEnvelope {
    #[serde(rename = "ready")]
    Ready { sid: String, capabilities: Value },
    #[serde(rename = "applied")]
    Applied { sid: String, rev: u64, root_view_id: i32 },
    #[serde(rename = "intent")]
    Intent {
        sid: String,
        id: u64,
        view_id: i32,
        pending: PendingIntent,
        fill_in: Option<Intent>,
    },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "t")]
pub enum ProducerEnvelope {
    #[serde(rename = "apply")]
    Apply {
        sid: String,
        rev: u64,
        #[serde(default)]
        form: WireForm,
        payload: String,
        #[serde(default)]
        available_size: Option<SizeF>,
    },

    #[serde(rename = "reapply")]
    Reapply {
        sid: String,
        rev: u64,
        #[serde(default)]
        form: WireForm,
        payload: String,
        #[serde(default)]
        available_size: Option<SizeF>,
    },

    #[serde(rename = "interact")]
    Interact { sid: String, view_id: i32 },

    #[serde(rename = "error")]
    Error {
        sid: String,
        #[serde(default)]
        rev: Option<u64>,
        code: String,
        message: String,
    },
}

pub fn ready_envelope(sid: String) -> HostEnvelope {
    HostEnvelope::Ready {
        sid,
        capabilities: serde_json::json!({
            "forms": ["structured", "flat"],
            "async_apply": true,
            "transport": "stdio-packet-4"
        }),
    }
}

pub fn applied_envelope(sid: String, rev: u64, root_view_id: i32) -> HostEnvelope {
    HostEnvelope::Applied {
        sid,
        rev,
        root_view_id,
    }
}

pub fn intent_envelope(
    sid: String,
    id: u64,
    view_id: i32,
    pending: PendingIntent,
    fill_in: Option<Intent>,
) -> HostEnvelope {
    HostEnvelope::Intent {
        sid,
        id,
        view_id,
        pending,
        fill_in,
    }
}

/// Writes queued envelopes until the queue closes. An envelope over the
/// outbound cap is dropped rather than ending the stream.
pub fn writer_loop(writer: &mut impl Write, rx: Receiver<HostEnvelope>) -> io::Result<()> {
    for envelope in rx {
        let payload = encode_host_envelope(&envelope)?;
        if payload.len() > HOST_TO_PRODUCER_CAP {
            tracing::warn!(
                len = payload.len(),
                max = HOST_TO_PRODUCER_CAP,
                "dropping oversized host envelope"
            );
            continue;
        }
        write_frame(writer, &payload, HOST_TO_PRODUCER_CAP)?;
        writer.flush()?;
    }

    Ok(())
}

/// Reads producer frames until end of input, handing each one over as an
/// envelope or as the [`HostError`] it was rejected with.
///
/// Rejected frames are consumed whole so reading resumes at the next frame.
pub fn reader_loop<F>(reader: &mut impl Read, mut on_envelope: F) -> io::Result<()>
where
    F: FnMut(Result<ProducerEnvelope, HostError>),
{
    loop {
        let frame = match read_frame(reader, PRODUCER_TO_HOST_CAP) {
            Ok(frame) => frame,
            Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => return Ok(()),
            Err(err) => return Err(err),
        };
        on_envelope(match frame {
            Frame::Payload(payload) => decode_producer_envelope(&payload),
            Frame::Oversized(len) => Err(HostError::FrameTooLarge {
                len,
                max: PRODUCER_TO_HOST_CAP,
            }),
        });
    }
}

fn encode_host_envelope(envelope: &HostEnvelope) -> io::Result<Vec<u8>> {
    serde_json::to_vec(envelope).map_err(io::Error::other)
}

fn decode_producer_envelope(payload: &[u8]) -> Result<ProducerEnvelope, HostError> {
    serde_json::from_slice(payload).map_err(HostError::InvalidEnvelope)
}

/// One length-prefixed frame.
#[derive(Debug, PartialEq, Eq)]
pub enum Frame {
    Payload(Vec<u8>),
    /// Announced length of a frame over the cap, whose bytes were skipped.
    Oversized(usize),
}

pub fn read_frame(reader: &mut impl Read, max_payload: usize) -> io::Result<Frame> {
    let mut len_buf = [0_u8; 4];
    reader.read_exact(&mut len_buf)?;

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > max_payload {
        let skipped = io::copy(&mut reader.by_ref().take(len as u64), &mut io::sink())?;
        if skipped < len as u64 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("oversized frame cut short after {skipped} of {len} bytes"),
            ));
        }
        return Ok(Frame::Oversized(len));
    }

    let mut payload = vec![0_u8; len];
    reader.read_exact(&mut payload)?;
    Ok(Frame::Payload(payload))
}

pub fn write_frame(writer: &mut impl Write, payload: &[u8], max_payload: usize) -> io::Result<()> {
    if payload.len() > max_payload {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            HostError::FrameTooLarge {
                len: payload.len(),
                max: max_payload,
            },
        ));
    }

    let len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "payload exceeds u32"))?;

    writer.write_all(&len.to_be_bytes())?;
    writer.write_all(payload)?;
    Ok(())
}
