//! Decoder capability consumed by the reader pool.
//!
//! The server never looks inside a [`SweepRecord`]; it only serializes it into
//! the payload that gets cached and sent to clients.

use std::{collections::BTreeMap, sync::Arc};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::Result;

/// Opaque pointer into an archive, forwarded untouched from the client request
/// to the decoder.
pub type ArchiveLocator = serde_json::Value;

/// One decoded sweep
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepRecord {
   pub source:   String,
   pub products: BTreeMap<String, Vec<u8>>,
}

impl SweepRecord {
   pub fn new(source: impl Into<String>) -> Self {
      Self { source: source.into(), products: BTreeMap::new() }
   }

   pub fn with_product(mut self, symbol: impl Into<String>, data: Vec<u8>) -> Self {
      self.products.insert(symbol.into(), data);
      self
   }

   /// Serializes into the wire/cache payload.
   pub fn to_payload(&self) -> Result<Bytes> {
      Ok(Bytes::from(postcard::to_allocvec(self)?))
   }

   pub fn from_payload(payload: &[u8]) -> Result<Self> {
      Ok(postcard::from_bytes(payload)?)
   }
}

/// Reasons a decoder can fail for a single source.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DecodeError {
   #[error("{0} not found")]
   NotFound(String),

   #[error("unsupported source {0}")]
   Unsupported(String),

   #[error("unable to read archive {path}: {reason}")]
   Archive { path: String, reason: String },

   #[error("no sweep found in {0}")]
   MissingMember(String),

   #[error("decoder panicked on {0}")]
   Panicked(String),

   #[error("{0}")]
   Other(String),
}

/// Turns a source file (optionally a member inside an archive) into a sweep.
///
/// Implementations run on dedicated reader threads and may block.
pub trait Decoder: Send + Sync {
   fn decode(
      &self,
      source: &str,
      locator: Option<&ArchiveLocator>,
   ) -> std::result::Result<SweepRecord, DecodeError>;
}

impl<D: Decoder + ?Sized> Decoder for Arc<D> {
   fn decode(
      &self,
      source: &str,
      locator: Option<&ArchiveLocator>,
   ) -> std::result::Result<SweepRecord, DecodeError> {
      (**self).decode(source, locator)
   }
}
