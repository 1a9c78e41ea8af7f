//! Table binary format constants, footer helpers and [`RootInfo`].
//!
//! ## Footer (20 bytes) - magic `SGT1` (`0x5347_5431`)
//!
//! ```text
//! [entry_count: u64 LE][index_offset: u64 LE][magic: u32 LE]
//! ```
//!
//! `index_offset` is relative to the start of the table, so a table reads
//! the same whether it is a file of its own or embedded in a single-file
//! segment at some base offset.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use codec::{pack_string, pack_uint, unpack_string, unpack_uint, DecodeResult};
use std::io::{Read, Result as IoResult, Write};

/// Magic number identifying a table footer (ASCII "SGT1").
pub const TABLE_MAGIC: u32 = 0x5347_5431;

/// Size of the footer: 8 (`entry_count`) + 8 (`index_offset`) + 4 (`magic`).
pub const FOOTER_BYTES: u64 = 8 + 8 + 4;

/// Bit in a record's flags byte marking a compressed tag.
pub const FLAG_COMPRESSED: u8 = 0x01;

/// Maximum key size accepted on write or allocated on read.
pub const MAX_KEY_BYTES: usize = 64 * 1024;
/// Maximum tag size allocated on read. Prevents OOM on corrupt files.
pub const MAX_TAG_BYTES: usize = 64 * 1024 * 1024;

pub fn write_footer<W: Write>(w: &mut W, entry_count: u64, index_offset: u64) -> IoResult<()> {
    w.write_u64::<LittleEndian>(entry_count)?;
    w.write_u64::<LittleEndian>(index_offset)?;
    w.write_u32::<LittleEndian>(TABLE_MAGIC)?;
    Ok(())
}

/// Reads `(entry_count, index_offset, magic)`.
pub fn read_footer<R: Read>(r: &mut R) -> IoResult<(u64, u64, u32)> {
    let entry_count = r.read_u64::<LittleEndian>()?;
    let index_offset = r.read_u64::<LittleEndian>()?;
    let magic = r.read_u32::<LittleEndian>()?;
    Ok((entry_count, index_offset, magic))
}

/// Everything needed to reopen a table: where it lives, where its footer
/// is and what it holds.
///
/// Serialized into the segment's version record, one per table kind.
///
/// ```text
/// varint root | varint (level << 2 | sequential << 1 | fake) | varint num_entries
/// | varint (block_size >> 11) | string free_list | varint offset
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootInfo {
    /// Start of the table within its file.
    pub offset: u64,
    /// Footer position relative to `offset`.
    pub root: u64,
    /// Index depth; 0 for a table that was never written.
    pub level: u32,
    pub num_entries: u64,
    pub block_size: u32,
    /// Entries were appended in key order with no later updates.
    pub sequential: bool,
    /// No table data exists; `root` is meaningless.
    pub root_is_fake: bool,
    /// Opaque free-space blob carried for format compatibility.
    pub free_list: Vec<u8>,
}

impl RootInfo {
    /// Root for a table with no entries at `offset`.
    #[must_use]
    pub fn empty(offset: u64, block_size: u32) -> Self {
        Self {
            offset,
            root: 0,
            level: 0,
            num_entries: 0,
            block_size,
            sequential: true,
            root_is_fake: true,
            free_list: Vec::new(),
        }
    }

    /// Bytes the table occupies on disk.
    #[must_use]
    pub fn size_bytes(&self) -> u64 {
        if self.root_is_fake {
            0
        } else {
            self.root + FOOTER_BYTES
        }
    }

    pub fn serialise(&self, out: &mut Vec<u8>) {
        pack_uint(out, self.root);
        let flags = (u64::from(self.level) << 2)
            | (u64::from(self.sequential) << 1)
            | u64::from(self.root_is_fake);
        pack_uint(out, flags);
        pack_uint(out, self.num_entries);
        pack_uint(out, self.block_size >> 11);
        pack_string(out, &self.free_list);
        pack_uint(out, self.offset);
    }

    pub fn parse(data: &mut &[u8]) -> DecodeResult<Self> {
        let root = unpack_uint(data)?;
        let flags: u64 = unpack_uint(data)?;
        let num_entries = unpack_uint(data)?;
        let block_shift: u32 = unpack_uint(data)?;
        let free_list = unpack_string(data)?.to_vec();
        let offset = unpack_uint(data)?;
        let level = u32::try_from(flags >> 2).map_err(|_| codec::DecodeError::Overflow)?;
        let block_size = block_shift
            .checked_mul(1 << 11)
            .ok_or(codec::DecodeError::Overflow)?;
        Ok(Self {
            offset,
            root,
            level,
            num_entries,
            block_size,
            sequential: flags & 0x02 != 0,
            root_is_fake: flags & 0x01 != 0,
            free_list,
        })
    }
}
