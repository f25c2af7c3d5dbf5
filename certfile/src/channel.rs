// SPDX-License-Identifier: MIT
// Copyright (c) Microsoft Corporation.

//! The channel certificate material arrives on.
//!
//! The producer streams each artifact as a series of frames. Every frame starts with an
//! 8 byte header holding the artifact tag and the payload length, both big-endian. A frame
//! with a zero length marks the end of the artifact, so the total size never needs to be
//! known up front and an artifact may be arbitrarily large.
//!
//! Payloads are opaque: they are neither parsed nor assumed to be text.

use std::num::NonZeroUsize;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{Level, instrument};
use zerocopy::byteorder::{BigEndian, U32};
use zerocopy::{FromBytes, FromZeros, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::error::TransferError;

/// The largest payload a [`Sender`] puts in a single frame, and the most the [`Receiver`]
/// reserves at once.
const CHUNK_SIZE: usize = 64 * 1024;

/// Identifies which artifact a frame belongs to.
///
/// The values are agreed with the producer and are not negotiated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Tag {
    /// The issuer chain, PEM encoded.
    Chain = 1,
    /// The signed certificate.
    Certificate = 2,
}

impl std::fmt::Display for Tag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Tag::Chain => write!(f, "certificate chain"),
            Tag::Certificate => write!(f, "certificate"),
        }
    }
}

#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
struct FrameHeader {
    tag: U32<BigEndian>,
    length: U32<BigEndian>,
}

impl FrameHeader {
    fn new(tag: Tag, length: u32) -> Self {
        Self {
            tag: U32::new(tag as u32),
            length: U32::new(length),
        }
    }
}

/// Receives artifacts from the producer.
///
/// The receiver owns its end of the channel; dropping it closes the channel.
#[derive(Debug)]
pub struct Receiver<R> {
    reader: R,
    limit: Option<NonZeroUsize>,
}

impl<R: AsyncRead + Unpin> Receiver<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            limit: None,
        }
    }

    /// Refuse any artifact larger than `limit` bytes. `None` means no limit.
    pub fn with_limit(mut self, limit: Option<NonZeroUsize>) -> Self {
        self.limit = limit;
        self
    }

    /// Read one complete artifact from the channel.
    ///
    /// This blocks until the producer sends the terminating frame for `artifact`. The
    /// returned buffer holds exactly the bytes sent, and may be empty.
    ///
    /// # Errors
    ///
    /// Fails if the channel errors or closes before the artifact is complete, if a frame for a
    /// different artifact arrives, or if the artifact exceeds the configured limit.
    #[instrument(skip(self), level = Level::DEBUG, err, fields(len = tracing::field::Empty))]
    pub async fn receive(&mut self, artifact: Tag) -> Result<Bytes, TransferError> {
        let mut buffer = BytesMut::new();
        loop {
            let mut header = FrameHeader::new_zeroed();
            self.reader
                .read_exact(header.as_mut_bytes())
                .await
                .map_err(|error| read_error(artifact, error))?;

            let received = header.tag.get();
            if received != artifact as u32 {
                return Err(TransferError::UnexpectedTag {
                    expected: artifact,
                    received,
                });
            }

            let length = header.length.get();
            if length == 0 {
                break;
            }
            if let Some(limit) = self.limit {
                let total = buffer.len().saturating_add(length as usize);
                if total > limit.get() {
                    return Err(TransferError::TooLarge {
                        artifact,
                        limit: limit.get(),
                    });
                }
            }

            // Grow the buffer as the payload arrives rather than trusting the header.
            let mut frame = (&mut self.reader).take(u64::from(length));
            while frame.limit() > 0 {
                buffer.reserve(frame.limit().min(CHUNK_SIZE as u64) as usize);
                let read = frame
                    .read_buf(&mut buffer)
                    .await
                    .map_err(|error| read_error(artifact, error))?;
                if read == 0 {
                    return Err(TransferError::PeerClosed { artifact });
                }
            }
            tracing::trace!(length, received = buffer.len(), "frame received");
        }

        tracing::Span::current().record("len", buffer.len());
        Ok(buffer.freeze())
    }

    pub fn into_inner(self) -> R {
        self.reader
    }
}

fn read_error(artifact: Tag, error: std::io::Error) -> TransferError {
    if error.kind() == std::io::ErrorKind::UnexpectedEof {
        TransferError::PeerClosed { artifact }
    } else {
        TransferError::Io {
            artifact,
            source: error,
        }
    }
}

/// The producer's end of the channel.
#[derive(Debug)]
pub struct Sender<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> Sender<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Send `data` as the complete contents of `artifact`.
    #[instrument(skip(self, data), level = Level::DEBUG, fields(len = data.len()))]
    pub async fn send(&mut self, artifact: Tag, data: &[u8]) -> std::io::Result<()> {
        for chunk in data.chunks(CHUNK_SIZE) {
            let header = FrameHeader::new(artifact, chunk.len() as u32);
            self.writer.write_all(header.as_bytes()).await?;
            self.writer.write_all(chunk).await?;
        }
        let terminator = FrameHeader::new(artifact, 0);
        self.writer.write_all(terminator.as_bytes()).await?;
        self.writer.flush().await
    }

    pub async fn shutdown(mut self) -> std::io::Result<()> {
        self.writer.shutdown().await
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}
