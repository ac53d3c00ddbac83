//! Bitcoin-style wire encodings shared by every serialized structure.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};

/// The maximum allowed value representable as a `[CompactSize]`
pub const MAX_COMPACT_SIZE: u32 = 0x02000000;

pub struct CompactSize;

impl CompactSize {
    pub fn read<R: Read>(mut reader: R) -> io::Result<u64> {
        let flag = reader.read_u8()?;
        let result = match flag {
            0xfd => reader.read_u16::<LittleEndian>().and_then(|n| {
                if n < 253 {
                    Err(io::Error::new(
                        io::ErrorKind::InvalidInput,
                        "non-canonical CompactSize",
                    ))
                } else {
                    Ok(u64::from(n))
                }
            }),
            0xfe => reader.read_u32::<LittleEndian>().and_then(|n| {
                if n < 0x10000 {
                    Err(io::Error::new(
                        io::ErrorKind::InvalidInput,
                        "non-canonical CompactSize",
                    ))
                } else {
                    Ok(u64::from(n))
                }
            }),
            0xff => reader.read_u64::<LittleEndian>().and_then(|n| {
                if n < 0x100000000 {
                    Err(io::Error::new(
                        io::ErrorKind::InvalidInput,
                        "non-canonical CompactSize",
                    ))
                } else {
                    Ok(n)
                }
            }),
            size => Ok(u64::from(size)),
        }?;

        match result {
            s if s > u64::from(MAX_COMPACT_SIZE) => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "CompactSize too large",
            )),
            s => Ok(s),
        }
    }

    pub fn read_t<R: Read, T: TryFrom<u64>>(reader: R) -> io::Result<T> {
        <T>::try_from(Self::read(reader)?).map_err(|_| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                "CompactSize value exceeds range of target type.",
            )
        })
    }

    pub fn write<W: Write>(mut writer: W, size: usize) -> io::Result<()> {
        match size {
            s if s < 253 => writer.write_u8(s as u8),
            s if s <= 0xFFFF => {
                writer.write_u8(0xfd)?;
                writer.write_u16::<LittleEndian>(s as u16)
            }
            s if s <= 0xFFFFFFFF => {
                writer.write_u8(0xfe)?;
                writer.write_u32::<LittleEndian>(s as u32)
            }
            s => {
                writer.write_u8(0xff)?;
                writer.write_u64::<LittleEndian>(s as u64)
            }
        }
    }

    /// Returns the number of bytes needed to encode the given size in compact form.
    pub fn serialized_size(size: usize) -> usize {
        match size {
            s if s < 253 => 1,
            s if s <= 0xFFFF => 3,
            s if s <= 0xFFFFFFFF => 5,
            _ => 9,
        }
    }
}

pub struct Vector;

impl Vector {
    pub fn read<R: Read, E, F>(mut reader: R, func: F) -> io::Result<Vec<E>>
    where
        F: Fn(&mut R) -> io::Result<E>,
    {
        let count: usize = CompactSize::read_t(&mut reader)?;
        (0..count).map(|_| func(&mut reader)).collect()
    }

    pub fn write<W: Write, E, F>(mut writer: W, vec: &[E], func: F) -> io::Result<()>
    where
        F: Fn(&mut W, &E) -> io::Result<()>,
    {
        CompactSize::write(&mut writer, vec.len())?;
        vec.iter().try_for_each(|e| func(&mut writer, e))
    }
}

pub struct Optional;

impl Optional {
    pub fn read<R: Read, T, F>(mut reader: R, func: F) -> io::Result<Option<T>>
    where
        F: Fn(&mut R) -> io::Result<T>,
    {
        match reader.read_u8()? {
            0 => Ok(None),
            1 => Ok(Some(func(&mut reader)?)),
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "non-canonical Option<T>",
            )),
        }
    }

    pub fn write<W: Write, T, F>(mut writer: W, val: Option<T>, func: F) -> io::Result<()>
    where
        F: Fn(&mut W, T) -> io::Result<()>,
    {
        match val {
            None => writer.write_u8(0),
            Some(e) => {
                writer.write_u8(1)?;
                func(&mut writer, e)
            }
        }
    }
}
