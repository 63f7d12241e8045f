//! Reassembly of fragmented websocket messages.
//!
//! A client may split one message over several frames: a first frame
//! carrying the message type, any number of continuation frames, and a final
//! frame. The codec hands those to the actor one by one; the assembler
//! collects them until the final frame arrives.

use actix_http::ws::Item;
use actix_web::web::{Bytes, BytesMut};
use thiserror::Error;

/// A complete message rebuilt from its fragments.
#[derive(Debug, PartialEq, Eq)]
pub enum Assembled {
    Text(String),
    Binary(Bytes),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AssemblyError {
    #[error("fragmented message exceeds {limit} bytes")]
    TooLarge { limit: usize },

    #[error("new fragmented message started before the previous one ended")]
    Interleaved,

    #[error("continuation frame without a message in progress")]
    NotStarted,

    #[error("fragmented text message is not valid UTF-8")]
    InvalidUtf8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FragmentKind {
    Text,
    Binary,
}

/// Per-connection buffer for one fragmented message at a time.
#[derive(Debug)]
pub struct MessageAssembler {
    limit: usize,
    pending: Option<(FragmentKind, BytesMut)>,
}

impl MessageAssembler {
    /// `limit` caps the size of a reassembled message in bytes.
    pub fn new(limit: usize) -> Self {
        Self { limit, pending: None }
    }

    pub fn in_progress(&self) -> bool {
        self.pending.is_some()
    }

    /// Feed one fragment. Returns the message once its final fragment
    /// arrived. Any error discards the partial message.
    pub fn push(&mut self, item: Item) -> Result<Option<Assembled>, AssemblyError> {
        let outcome = match item {
            Item::FirstText(data) => self.start(FragmentKind::Text, data).map(|_| None),
            Item::FirstBinary(data) => self.start(FragmentKind::Binary, data).map(|_| None),
            Item::Continue(data) => self.append(&data).map(|_| None),
            Item::Last(data) => self.append(&data).and_then(|_| self.finish()).map(Some),
        };

        if outcome.is_err() {
            self.pending = None;
        }
        outcome
    }

    fn start(&mut self, kind: FragmentKind, data: Bytes) -> Result<(), AssemblyError> {
        if self.pending.is_some() {
            return Err(AssemblyError::Interleaved);
        }
        self.check_size(data.len())?;

        let mut buffer = BytesMut::with_capacity(data.len());
        buffer.extend_from_slice(&data);
        self.pending = Some((kind, buffer));
        Ok(())
    }

    fn append(&mut self, data: &[u8]) -> Result<(), AssemblyError> {
        let held = match &self.pending {
            Some((_, buffer)) => buffer.len(),
            None => return Err(AssemblyError::NotStarted),
        };
        self.check_size(held + data.len())?;

        if let Some((_, buffer)) = self.pending.as_mut() {
            buffer.extend_from_slice(data);
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<Assembled, AssemblyError> {
        let (kind, buffer) = self.pending.take().ok_or(AssemblyError::NotStarted)?;
        match kind {
            FragmentKind::Binary => Ok(Assembled::Binary(buffer.freeze())),
            FragmentKind::Text => String::from_utf8(buffer.to_vec())
                .map(Assembled::Text)
                .map_err(|_| AssemblyError::InvalidUtf8),
        }
    }

    fn check_size(&self, len: usize) -> Result<(), AssemblyError> {
        if len > self.limit {
            return Err(AssemblyError::TooLarge { limit: self.limit });
        }
        Ok(())
    }
}
