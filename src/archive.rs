//! Built-in decoder for plain sweep files and uncompressed tar archives.
//!
//! A tar archive holds either one member with every product, or one member per
//! product named `NAME-YYYYMMDD-HHMMSS-SCAN-SYMBOL.ext`. Members are located by
//! `[name, size, header_offset, data_offset]` quartets keyed by symbol (`"*"`
//! for the single-member layout), which clients can pass back as the request's
//! archive locator to skip the member scan.

use std::{
   collections::BTreeMap,
   fs::File,
   io::{Read, Seek, SeekFrom},
   path::Path,
   sync::LazyLock,
};

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::decoder::{ArchiveLocator, DecodeError, Decoder, SweepRecord};

const SINGLE_MEMBER_KEY: &str = "*";
const COMPRESSED_EXTENSIONS: &[&str] = &["txz", "xz", "tgz", "gz", "bz2", "zst"];

static MEMBER_NAME: LazyLock<Regex> = LazyLock::new(|| {
   Regex::new(
      r"^(?P<name>[^-]+)-(?P<time>\d{8}-\d{6})-(?P<scan>[AE]\d+(?:\.\d+)?)-(?P<symbol>[A-Za-z]+)\.",
   )
   .expect("member name pattern is valid")
});

/// `[name, size, header_offset, data_offset]` of one archive member
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberLocation(pub String, pub u64, pub u64, pub u64);

impl MemberLocation {
   pub fn name(&self) -> &str {
      &self.0
   }

   pub const fn size(&self) -> u64 {
      self.1
   }

   pub const fn data_offset(&self) -> u64 {
      self.3
   }
}

/// Member locations keyed by product symbol
pub type MemberIndex = BTreeMap<String, MemberLocation>;

/// Extracts the product symbol from a member basename.
pub fn member_symbol(basename: &str) -> Option<&str> {
   MEMBER_NAME
      .captures(basename)
      .and_then(|caps| caps.name("symbol"))
      .map(|m| m.as_str())
}

fn archive_error(path: &Path, reason: impl ToString) -> DecodeError {
   DecodeError::Archive { path: path.display().to_string(), reason: reason.to_string() }
}

/// Lists the regular, non-hidden members of a tar archive.
pub fn scan_members(path: &Path) -> Result<MemberIndex, DecodeError> {
   let file = File::open(path).map_err(|e| archive_error(path, e))?;
   let mut archive = tar::Archive::new(file);
   let mut members = Vec::new();

   for entry in archive.entries().map_err(|e| archive_error(path, e))? {
      let entry = entry.map_err(|e| archive_error(path, e))?;
      if !entry.header().entry_type().is_file() {
         continue;
      }
      let member_path = entry.path().map_err(|e| archive_error(path, e))?;
      let name = member_path.to_string_lossy().into_owned();
      let basename = member_path
         .file_name()
         .map(|n| n.to_string_lossy().into_owned())
         .unwrap_or_default();
      if basename.is_empty() || basename.starts_with('.') {
         continue;
      }
      members.push((
         basename,
         MemberLocation(name, entry.size(), entry.raw_header_position(), entry.raw_file_position()),
      ));
   }

   let mut index = MemberIndex::new();
   if let [(_, only)] = members.as_slice() {
      index.insert(SINGLE_MEMBER_KEY.to_string(), only.clone());
      return Ok(index);
   }
   for (basename, location) in members {
      let symbol = member_symbol(&basename).map_or_else(
         || {
            Path::new(&basename)
               .file_stem()
               .map_or_else(|| basename.clone(), |s| s.to_string_lossy().into_owned())
         },
         str::to_string,
      );
      index.insert(symbol, location);
   }
   Ok(index)
}

/// Reads each located member straight from its data offset.
fn read_members(path: &Path, index: &MemberIndex) -> Result<SweepRecord, DecodeError> {
   let mut file = File::open(path).map_err(|e| archive_error(path, e))?;
   let archive_len = file.metadata().map_err(|e| archive_error(path, e))?.len();
   let mut record = SweepRecord::new(path.display().to_string());
   for (symbol, location) in index {
      let fits = location
         .data_offset()
         .checked_add(location.size())
         .is_some_and(|end| end <= archive_len);
      if !fits {
         return Err(archive_error(
            path,
            format!("member {} lies outside the archive ({archive_len} B)", location.name()),
         ));
      }
      file
         .seek(SeekFrom::Start(location.data_offset()))
         .map_err(|e| archive_error(path, e))?;
      let mut data = Vec::new();
      (&mut file)
         .take(location.size())
         .read_to_end(&mut data)
         .map_err(|e| archive_error(path, e))?;
      if (data.len() as u64) < location.size() {
         return Err(archive_error(
            path,
            format!("member {} is truncated", location.name()),
         ));
      }
      record.products.insert(symbol.clone(), data);
   }
   Ok(record)
}

/// Decoder for files on the local filesystem
#[derive(Debug, Default, Clone, Copy)]
pub struct ArchiveDecoder;

impl ArchiveDecoder {
   pub const fn new() -> Self {
      Self
   }

   fn decode_tar(
      path: &Path,
      locator: Option<&ArchiveLocator>,
   ) -> Result<SweepRecord, DecodeError> {
      let index = match locator {
         Some(locator) => serde_json::from_value::<MemberIndex>(locator.clone())
            .map_err(|e| archive_error(path, format!("invalid locator: {e}")))?,
         None => scan_members(path)?,
      };
      if index.is_empty() {
         return Err(DecodeError::MissingMember(path.display().to_string()));
      }
      read_members(path, &index)
   }
}

impl Decoder for ArchiveDecoder {
   fn decode(
      &self,
      source: &str,
      locator: Option<&ArchiveLocator>,
   ) -> Result<SweepRecord, DecodeError> {
      let path = Path::new(source);
      if !path.exists() {
         return Err(DecodeError::NotFound(source.to_string()));
      }

      let ext = path
         .extension()
         .map(|e| e.to_string_lossy().to_lowercase())
         .unwrap_or_default();
      if COMPRESSED_EXTENSIONS.contains(&ext.as_str()) {
         return Err(DecodeError::Unsupported(source.to_string()));
      }
      if ext == "tar" {
         return Self::decode_tar(path, locator);
      }

      let data = std::fs::read(path).map_err(|e| archive_error(path, e))?;
      Ok(SweepRecord::new(source).with_product(SINGLE_MEMBER_KEY, data))
   }
}
