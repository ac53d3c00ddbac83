//! The deterministic key chain state persisted alongside the HD seed.

use blake2b_simd::Params as Blake2bParams;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::fmt;
use std::io::{self, Read, Write};

use pivx_primitives::serialize::Optional;

const SEED_ID_PERSONALIZATION: &[u8; 16] = b"PIVX_HDSeed_Id__";

pub const HD_CHAIN_VERSION: u32 = 1;

/// Identifies an HD seed without revealing it.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SeedId(pub [u8; 20]);

impl SeedId {
    pub fn from_seed(seed: &[u8]) -> Self {
        let hash = Blake2bParams::new()
            .hash_length(20)
            .personal(SEED_ID_PERSONALIZATION)
            .hash(seed);
        let mut id = [0u8; 20];
        id.copy_from_slice(hash.as_bytes());
        SeedId(id)
    }

    pub fn read<R: Read>(mut reader: R) -> io::Result<Self> {
        let mut id = [0u8; 20];
        reader.read_exact(&mut id)?;
        Ok(SeedId(id))
    }

    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_all(&self.0)
    }
}

impl fmt::Debug for SeedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SeedId").field(&hex::encode(self.0)).finish()
    }
}

impl fmt::Display for SeedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// The key domain a chain derives keys for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChainType {
    Transparent,
    Shielded,
}

impl ChainType {
    fn to_u8(self) -> u8 {
        match self {
            ChainType::Transparent => 0,
            ChainType::Shielded => 1,
        }
    }

    fn from_u8(v: u8) -> io::Result<Self> {
        match v {
            0 => Ok(ChainType::Transparent),
            1 => Ok(ChainType::Shielded),
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "unknown HD chain type",
            )),
        }
    }
}

/// Derivation counters for one key domain.
///
/// The shielded chain uses `external_counter` as the next ZIP 32 account index.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HdChain {
    pub version: u32,
    pub seed_id: SeedId,
    pub external_counter: u32,
    pub internal_counter: u32,
    pub chain_type: ChainType,
}

impl HdChain {
    pub fn new(seed_id: SeedId, chain_type: ChainType) -> Self {
        HdChain {
            version: HD_CHAIN_VERSION,
            seed_id,
            external_counter: 0,
            internal_counter: 0,
            chain_type,
        }
    }

    pub fn read<R: Read>(mut reader: R) -> io::Result<Self> {
        let version = reader.read_u32::<LittleEndian>()?;
        let seed_id = SeedId::read(&mut reader)?;
        let external_counter = reader.read_u32::<LittleEndian>()?;
        let internal_counter = reader.read_u32::<LittleEndian>()?;
        let chain_type = ChainType::from_u8(reader.read_u8()?)?;
        Ok(HdChain {
            version,
            seed_id,
            external_counter,
            internal_counter,
            chain_type,
        })
    }

    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_u32::<LittleEndian>(self.version)?;
        self.seed_id.write(&mut writer)?;
        writer.write_u32::<LittleEndian>(self.external_counter)?;
        writer.write_u32::<LittleEndian>(self.internal_counter)?;
        writer.write_u8(self.chain_type.to_u8())
    }
}

/// Creation time and origin of a shielded key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyMetadata {
    /// Unix timestamp, used to bound rescans.
    pub create_time: i64,
    /// The derivation path, e.g. `m/32'/119'/0'`, for seed-derived keys.
    pub hd_keypath: Option<String>,
    pub seed_id: Option<SeedId>,
}

impl KeyMetadata {
    pub fn new(create_time: i64) -> Self {
        KeyMetadata {
            create_time,
            hd_keypath: None,
            seed_id: None,
        }
    }

    pub fn read<R: Read>(mut reader: R) -> io::Result<Self> {
        let create_time = reader.read_i64::<LittleEndian>()?;
        let hd_keypath = Optional::read(&mut reader, |r| {
            let len = r.read_u16::<LittleEndian>()?;
            let mut path = vec![0u8; len.into()];
            r.read_exact(&mut path)?;
            String::from_utf8(path)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
        })?;
        let seed_id = Optional::read(&mut reader, |r| SeedId::read(r))?;
        Ok(KeyMetadata {
            create_time,
            hd_keypath,
            seed_id,
        })
    }

    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_i64::<LittleEndian>(self.create_time)?;
        Optional::write(&mut writer, self.hd_keypath.as_ref(), |w, path| {
            w.write_u16::<LittleEndian>(path.len() as u16)?;
            w.write_all(path.as_bytes())
        })?;
        Optional::write(&mut writer, self.seed_id.as_ref(), |w, id| id.write(w))
    }
}

#[cfg(test)]
mod tests {
    use super::{ChainType, HdChain, KeyMetadata, SeedId};

    #[test]
    fn seed_id_depends_on_seed() {
        assert_eq!(SeedId::from_seed(&[1; 32]), SeedId::from_seed(&[1; 32]));
        assert_ne!(SeedId::from_seed(&[1; 32]), SeedId::from_seed(&[2; 32]));
    }

    #[test]
    fn chain_and_metadata_encoding() {
        let mut chain = HdChain::new(SeedId::from_seed(&[3; 32]), ChainType::Shielded);
        chain.external_counter = 7;

        let mut encoded = vec![];
        chain.write(&mut encoded).unwrap();
        assert_eq!(HdChain::read(&encoded[..]).unwrap(), chain);

        let last = encoded.len() - 1;
        encoded[last] = 9;
        assert!(HdChain::read(&encoded[..]).is_err());

        let meta = KeyMetadata {
            create_time: 1_600_000_000,
            hd_keypath: Some("m/32'/119'/7'".to_string()),
            seed_id: Some(chain.seed_id),
        };
        let mut encoded = vec![];
        meta.write(&mut encoded).unwrap();
        assert_eq!(KeyMetadata::read(&encoded[..]).unwrap(), meta);
    }
}
