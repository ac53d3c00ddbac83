//! Support for legacy transparent addresses and scripts.

use byteorder::{ReadBytesExt, WriteBytesExt};
use std::fmt;
use std::io::{self, Read, Write};
use std::ops::Shl;

use crate::serialize::{CompactSize, Vector};

/// Defined script opcodes.
///
/// Most of the opcodes are unused by this crate, but we define them so that the
/// alternate `Debug` impl for [`Script`] renders correctly for unexpected scripts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum OpCode {
    // push value
    PushData1 = 0x4c,
    PushData2 = 0x4d,
    PushData4 = 0x4e,

    // control
    Return = 0x6a,

    // stack ops
    Dup = 0x76,

    // bit logic
    Equal = 0x87,
    EqualVerify = 0x88,

    // crypto
    Hash160 = 0xa9,
    CheckSig = 0xac,
}

impl OpCode {
    fn parse(b: u8) -> Option<Self> {
        match b {
            0x4c => Some(OpCode::PushData1),
            0x4d => Some(OpCode::PushData2),
            0x4e => Some(OpCode::PushData4),
            0x6a => Some(OpCode::Return),
            0x76 => Some(OpCode::Dup),
            0x87 => Some(OpCode::Equal),
            0x88 => Some(OpCode::EqualVerify),
            0xa9 => Some(OpCode::Hash160),
            0xac => Some(OpCode::CheckSig),
            _ => None,
        }
    }
}

/// A serialized script, used inside transparent inputs and outputs of a transaction.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct Script(pub Vec<u8>);

impl fmt::Debug for Script {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        struct ScriptPrinter<'s>(&'s [u8]);
        impl<'s> fmt::Debug for ScriptPrinter<'s> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                let mut l = f.debug_list();
                let mut unknown: Option<String> = None;
                for b in self.0 {
                    if let Some(opcode) = OpCode::parse(*b) {
                        if let Some(s) = unknown.take() {
                            l.entry(&s);
                        }
                        l.entry(&opcode);
                    } else {
                        let encoded = format!("{:02x}", b);
                        if let Some(s) = &mut unknown {
                            s.push_str(&encoded);
                        } else {
                            unknown = Some(encoded);
                        }
                    }
                }
                if let Some(s) = unknown {
                    l.entry(&s);
                }
                l.finish()
            }
        }

        if f.alternate() {
            f.debug_tuple("Script")
                .field(&ScriptPrinter(&self.0))
                .finish()
        } else {
            f.debug_tuple("Script")
                .field(&hex::encode(&self.0))
                .finish()
        }
    }
}

impl Script {
    pub fn read<R: Read>(mut reader: R) -> io::Result<Self> {
        let script = Vector::read(&mut reader, |r| r.read_u8())?;
        Ok(Script(script))
    }

    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        Vector::write(&mut writer, &self.0, |w, e| w.write_u8(*e))
    }

    /// Returns the length of this script as encoded (including the initial CompactSize).
    pub fn serialized_size(&self) -> usize {
        CompactSize::serialized_size(self.0.len()) + self.0.len()
    }

    /// Returns the address that this Script contains, if any.
    pub fn address(&self) -> Option<TransparentAddress> {
        if self.0.len() == 25
            && self.0[0..3] == [OpCode::Dup as u8, OpCode::Hash160 as u8, 0x14]
            && self.0[23..25] == [OpCode::EqualVerify as u8, OpCode::CheckSig as u8]
        {
            let mut hash = [0; 20];
            hash.copy_from_slice(&self.0[3..23]);
            Some(TransparentAddress::PublicKey(hash))
        } else if self.0.len() == 23
            && self.0[0..2] == [OpCode::Hash160 as u8, 0x14]
            && self.0[22] == OpCode::Equal as u8
        {
            let mut hash = [0; 20];
            hash.copy_from_slice(&self.0[2..22]);
            Some(TransparentAddress::Script(hash))
        } else {
            None
        }
    }

    /// Returns true if this script is a provably unspendable data carrier.
    pub fn is_unspendable(&self) -> bool {
        self.0.first() == Some(&(OpCode::Return as u8))
    }
}

impl Shl<OpCode> for Script {
    type Output = Self;

    fn shl(mut self, rhs: OpCode) -> Self {
        self.0.push(rhs as u8);
        self
    }
}

impl Shl<&[u8]> for Script {
    type Output = Self;

    fn shl(mut self, data: &[u8]) -> Self {
        if data.len() < OpCode::PushData1 as usize {
            self.0.push(data.len() as u8);
        } else if data.len() <= 0xff {
            self.0.push(OpCode::PushData1 as u8);
            self.0.push(data.len() as u8);
        } else if data.len() <= 0xffff {
            self.0.push(OpCode::PushData2 as u8);
            self.0.extend((data.len() as u16).to_le_bytes());
        } else {
            self.0.push(OpCode::PushData4 as u8);
            self.0.extend((data.len() as u32).to_le_bytes());
        }
        self.0.extend(data);
        self
    }
}

/// A transparent address corresponding to either a public key or a `Script`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TransparentAddress {
    PublicKey([u8; 20]),
    Script([u8; 20]),
}

impl TransparentAddress {
    /// Generate the `scriptPubKey` corresponding to this address.
    pub fn script(&self) -> Script {
        match self {
            TransparentAddress::PublicKey(key_id) => {
                // P2PKH script
                Script::default()
                    << OpCode::Dup
                    << OpCode::Hash160
                    << &key_id[..]
                    << OpCode::EqualVerify
                    << OpCode::CheckSig
            }
            TransparentAddress::Script(script_id) => {
                // P2SH script
                Script::default() << OpCode::Hash160 << &script_id[..] << OpCode::Equal
            }
        }
    }
}

#[cfg(any(test, feature = "test-dependencies"))]
pub mod testing {
    use proptest::prelude::*;

    use super::TransparentAddress;

    pub fn arb_transparent_addr() -> impl Strategy<Value = TransparentAddress> {
        prop_oneof![
            prop::array::uniform20(prop::num::u8::ANY).prop_map(TransparentAddress::PublicKey),
            prop::array::uniform20(prop::num::u8::ANY).prop_map(TransparentAddress::Script),
        ]
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::{testing::arb_transparent_addr, OpCode, Script, TransparentAddress};

    #[test]
    fn script_opcode() {
        {
            let script = Script::default() << OpCode::PushData1;
            assert_eq!(&script.0, &[OpCode::PushData1 as u8]);
        }
    }

    #[test]
    fn script_pushdata() {
        {
            let script = Script::default() << &[1, 2, 3, 4][..];
            assert_eq!(&script.0, &[4, 1, 2, 3, 4]);
        }

        {
            let short_data = vec![2; 100];
            let script = Script::default() << &short_data[..];
            assert_eq!(script.0[0], OpCode::PushData1 as u8);
            assert_eq!(script.0[1] as usize, 100);
            assert_eq!(&script.0[2..], &short_data[..]);
        }

        {
            let medium_data = vec![7; 1024];
            let script = Script::default() << &medium_data[..];
            assert_eq!(script.0[0], OpCode::PushData2 as u8);
            assert_eq!(&script.0[1..3], &[0x00, 0x04][..]);
            assert_eq!(&script.0[3..], &medium_data[..]);
        }
    }

    #[test]
    fn p2pkh() {
        let addr = TransparentAddress::PublicKey([4; 20]);
        assert_eq!(
            &addr.script().0,
            &[
                0x76, 0xa9, 0x14, 0x04, 0x04, 0x04, 0x04, 0x04, 0x04, 0x04, 0x04, 0x04, 0x04,
                0x04, 0x04, 0x04, 0x04, 0x04, 0x04, 0x04, 0x04, 0x04, 0x04, 0x88, 0xac,
            ]
        );
        assert_eq!(addr.script().serialized_size(), 26);
    }

    #[test]
    fn p2sh() {
        let addr = TransparentAddress::Script([7; 20]);
        assert_eq!(
            &addr.script().0,
            &[
                0xa9, 0x14, 0x07, 0x07, 0x07, 0x07, 0x07, 0x07, 0x07, 0x07, 0x07, 0x07, 0x07,
                0x07, 0x07, 0x07, 0x07, 0x07, 0x07, 0x07, 0x07, 0x07, 0x87,
            ]
        );
    }

    #[test]
    fn unknown_script_has_no_address() {
        let script = Script::default() << OpCode::Return << &[1, 2, 3][..];
        assert!(script.is_unspendable());
        assert_eq!(script.address(), None);
    }

    proptest! {
        #[test]
        fn script_address_recovers_addr(addr in arb_transparent_addr()) {
            prop_assert_eq!(addr.script().address(), Some(addr));
        }
    }
}
