//! Structs and methods for handling PIVX block headers and blocks.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use sha2::{Digest, Sha256};
use std::fmt;
use memuse::DynamicUsage;
use std::io::{self, Read, Write};
use std::ops::Deref;

use crate::{serialize::Vector, transaction::Transaction};

/// The identifier of a block: the double SHA-256 hash of its header.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockHash(pub [u8; 32]);

memuse::impl_no_dynamic_usage!(BlockHash);

impl fmt::Display for BlockHash {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        let mut data = self.0;
        data.reverse();
        formatter.write_str(&hex::encode(data))
    }
}

impl BlockHash {
    /// Constructs a [`BlockHash`] from the given slice.
    ///
    /// # Panics
    ///
    /// This function will panic if the slice is not exactly 32 bytes.
    pub fn from_slice(bytes: &[u8]) -> Self {
        assert_eq!(bytes.len(), 32);
        let mut hash = [0; 32];
        hash.copy_from_slice(bytes);
        BlockHash(hash)
    }

    /// Returns true when the hash consists of all zeros, which denotes "no block".
    pub fn is_null(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

/// A PIVX block header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockHeader {
    hash: BlockHash,
    data: BlockHeaderData,
}

impl Deref for BlockHeader {
    type Target = BlockHeaderData;

    fn deref(&self) -> &BlockHeaderData {
        &self.data
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockHeaderData {
    pub version: i32,
    pub prev_block: BlockHash,
    pub merkle_root: [u8; 32],
    pub time: u32,
    pub bits: u32,
    pub nonce: u32,
    /// The root of the note commitment tree after this block; present from version 8.
    pub final_sapling_root: [u8; 32],
}

impl BlockHeaderData {
    pub fn freeze(self) -> io::Result<BlockHeader> {
        BlockHeader::from_data(self)
    }
}

impl BlockHeader {
    fn from_data(data: BlockHeaderData) -> io::Result<Self> {
        let mut header = BlockHeader {
            hash: BlockHash([0; 32]),
            data,
        };
        let mut raw = vec![];
        header.write(&mut raw)?;
        header.hash = BlockHash(Sha256::digest(Sha256::digest(&raw)).into());
        Ok(header)
    }

    /// Returns the hash of this header.
    pub fn hash(&self) -> BlockHash {
        self.hash
    }

    pub fn read<R: Read>(mut reader: R) -> io::Result<Self> {
        let version = reader.read_i32::<LittleEndian>()?;

        let mut prev_block = BlockHash([0; 32]);
        reader.read_exact(&mut prev_block.0)?;

        let mut merkle_root = [0; 32];
        reader.read_exact(&mut merkle_root)?;

        let time = reader.read_u32::<LittleEndian>()?;
        let bits = reader.read_u32::<LittleEndian>()?;
        let nonce = reader.read_u32::<LittleEndian>()?;

        let mut final_sapling_root = [0; 32];
        if version >= 8 {
            reader.read_exact(&mut final_sapling_root)?;
        }

        BlockHeader::from_data(BlockHeaderData {
            version,
            prev_block,
            merkle_root,
            time,
            bits,
            nonce,
            final_sapling_root,
        })
    }

    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_i32::<LittleEndian>(self.version)?;
        writer.write_all(&self.prev_block.0)?;
        writer.write_all(&self.merkle_root)?;
        writer.write_u32::<LittleEndian>(self.time)?;
        writer.write_u32::<LittleEndian>(self.bits)?;
        writer.write_u32::<LittleEndian>(self.nonce)?;
        if self.version >= 8 {
            writer.write_all(&self.final_sapling_root)?;
        }
        Ok(())
    }
}

/// A full block: a header followed by its ordered transactions.
#[derive(Clone, Debug)]
pub struct Block {
    pub header: BlockHeader,
    pub vtx: Vec<Transaction>,
}

impl Block {
    pub fn hash(&self) -> BlockHash {
        self.header.hash()
    }

    pub fn read<R: Read>(mut reader: R) -> io::Result<Self> {
        let header = BlockHeader::read(&mut reader)?;
        let vtx = Vector::read(&mut reader, |r| Transaction::read(r))?;
        Ok(Block { header, vtx })
    }

    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        self.header.write(&mut writer)?;
        Vector::write(&mut writer, &self.vtx, |w, tx| tx.write(w))
    }
}

#[cfg(test)]
mod tests {
    use super::{BlockHash, BlockHeader, BlockHeaderData};

    fn header(version: i32) -> BlockHeader {
        BlockHeaderData {
            version,
            prev_block: BlockHash([7; 32]),
            merkle_root: [1; 32],
            time: 1_600_000_000,
            bits: 0x1e0ffff0,
            nonce: 42,
            final_sapling_root: if version >= 8 { [9; 32] } else { [0; 32] },
        }
        .freeze()
        .unwrap()
    }

    #[test]
    fn header_read_write() {
        for version in [7, 8] {
            let header = header(version);
            let mut raw = vec![];
            header.write(&mut raw).unwrap();
            assert_eq!(raw.len(), if version >= 8 { 112 } else { 80 });

            let parsed = BlockHeader::read(&raw[..]).unwrap();
            assert_eq!(parsed, header);
            assert_eq!(parsed.hash(), header.hash());
        }
    }

    #[test]
    fn hash_covers_sapling_root() {
        let a = header(8);
        let mut data = (*a).clone();
        data.final_sapling_root = [10; 32];
        let b = data.freeze().unwrap();
        assert_ne!(a.hash(), b.hash());
    }

    #[test]
    fn block_hash_display_is_reversed() {
        let mut bytes = [0u8; 32];
        bytes[0] = 0xab;
        assert!(BlockHash(bytes).to_string().ends_with("ab"));
        assert!(BlockHash([0; 32]).is_null());
    }
}
