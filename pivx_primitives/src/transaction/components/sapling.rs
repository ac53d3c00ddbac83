use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};

use crate::{
    merkle_tree::Hashable,
    sapling::{
        note_encryption::{ENC_CIPHERTEXT_SIZE, OUT_CIPHERTEXT_SIZE},
        Node, Nullifier,
    },
    serialize::Vector,
};

use super::{amount::Amount, GROTH_PROOF_SIZE, SIGNATURE_SIZE};

/// Serialized size of a [`SpendDescription`].
pub const SPEND_DESCRIPTION_SIZE: usize = 32 + 32 + 32 + 32 + GROTH_PROOF_SIZE + SIGNATURE_SIZE;
/// Serialized size of an [`OutputDescription`].
pub const OUTPUT_DESCRIPTION_SIZE: usize =
    32 + 32 + 32 + ENC_CIPHERTEXT_SIZE + OUT_CIPHERTEXT_SIZE + GROTH_PROOF_SIZE;

pub fn read_zkproof<R: Read>(mut reader: R) -> io::Result<[u8; GROTH_PROOF_SIZE]> {
    let mut zkproof = [0u8; GROTH_PROOF_SIZE];
    reader.read_exact(&mut zkproof)?;
    Ok(zkproof)
}

fn read_32<R: Read>(mut reader: R) -> io::Result<[u8; 32]> {
    let mut bytes = [0u8; 32];
    reader.read_exact(&mut bytes)?;
    Ok(bytes)
}

fn read_signature<R: Read>(mut reader: R) -> io::Result<[u8; SIGNATURE_SIZE]> {
    let mut sig = [0u8; SIGNATURE_SIZE];
    reader.read_exact(&mut sig)?;
    Ok(sig)
}

#[derive(Clone)]
pub struct SpendDescription {
    pub cv: [u8; 32],
    pub anchor: Node,
    pub nullifier: Nullifier,
    pub rk: [u8; 32],
    pub zkproof: [u8; GROTH_PROOF_SIZE],
    /// `None` until the transaction has been signed.
    pub spend_auth_sig: Option<[u8; SIGNATURE_SIZE]>,
}

impl std::fmt::Debug for SpendDescription {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> Result<(), std::fmt::Error> {
        write!(
            f,
            "SpendDescription(cv = {}, anchor = {:?}, nullifier = {:?}, rk = {}, spend_auth_sig = {:?})",
            hex::encode(self.cv),
            self.anchor,
            self.nullifier,
            hex::encode(self.rk),
            self.spend_auth_sig.map(hex::encode),
        )
    }
}

impl PartialEq for SpendDescription {
    fn eq(&self, other: &Self) -> bool {
        self.cv == other.cv
            && self.anchor == other.anchor
            && self.nullifier == other.nullifier
            && self.rk == other.rk
            && self.zkproof[..] == other.zkproof[..]
            && self.spend_auth_sig == other.spend_auth_sig
    }
}

impl Eq for SpendDescription {}

impl SpendDescription {
    pub fn read<R: Read>(mut reader: R) -> io::Result<Self> {
        let cv = read_32(&mut reader)?;
        let anchor = Node::read(&mut reader)?;
        let nullifier = Nullifier(read_32(&mut reader)?);
        let rk = read_32(&mut reader)?;
        let zkproof = read_zkproof(&mut reader)?;
        let spend_auth_sig = Some(read_signature(&mut reader)?);

        Ok(SpendDescription {
            cv,
            anchor,
            nullifier,
            rk,
            zkproof,
            spend_auth_sig,
        })
    }

    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_all(&self.cv)?;
        self.anchor.write(&mut writer)?;
        writer.write_all(&self.nullifier.0)?;
        writer.write_all(&self.rk)?;
        writer.write_all(&self.zkproof)?;
        match self.spend_auth_sig {
            Some(sig) => writer.write_all(&sig),
            None => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "Missing spend auth signature",
            )),
        }
    }

    /// Writes every field except the signature, as committed to by the sighash.
    pub fn write_unsigned<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_all(&self.cv)?;
        self.anchor.write(&mut writer)?;
        writer.write_all(&self.nullifier.0)?;
        writer.write_all(&self.rk)?;
        writer.write_all(&self.zkproof)
    }
}

#[derive(Clone)]
pub struct OutputDescription {
    pub cv: [u8; 32],
    pub cmu: Node,
    pub ephemeral_key: [u8; 32],
    pub enc_ciphertext: [u8; ENC_CIPHERTEXT_SIZE],
    pub out_ciphertext: [u8; OUT_CIPHERTEXT_SIZE],
    pub zkproof: [u8; GROTH_PROOF_SIZE],
}

impl std::fmt::Debug for OutputDescription {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> Result<(), std::fmt::Error> {
        write!(
            f,
            "OutputDescription(cv = {}, cmu = {:?}, ephemeral_key = {})",
            hex::encode(self.cv),
            self.cmu,
            hex::encode(self.ephemeral_key)
        )
    }
}

impl PartialEq for OutputDescription {
    fn eq(&self, other: &Self) -> bool {
        self.cv == other.cv
            && self.cmu == other.cmu
            && self.ephemeral_key == other.ephemeral_key
            && self.enc_ciphertext[..] == other.enc_ciphertext[..]
            && self.out_ciphertext[..] == other.out_ciphertext[..]
            && self.zkproof[..] == other.zkproof[..]
    }
}

impl Eq for OutputDescription {}

impl OutputDescription {
    pub fn read<R: Read>(mut reader: R) -> io::Result<Self> {
        let cv = read_32(&mut reader)?;
        let cmu = Node::read(&mut reader)?;
        let ephemeral_key = read_32(&mut reader)?;

        let mut enc_ciphertext = [0u8; ENC_CIPHERTEXT_SIZE];
        let mut out_ciphertext = [0u8; OUT_CIPHERTEXT_SIZE];
        reader.read_exact(&mut enc_ciphertext)?;
        reader.read_exact(&mut out_ciphertext)?;

        let zkproof = read_zkproof(&mut reader)?;

        Ok(OutputDescription {
            cv,
            cmu,
            ephemeral_key,
            enc_ciphertext,
            out_ciphertext,
            zkproof,
        })
    }

    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_all(&self.cv)?;
        self.cmu.write(&mut writer)?;
        writer.write_all(&self.ephemeral_key)?;
        writer.write_all(&self.enc_ciphertext)?;
        writer.write_all(&self.out_ciphertext)?;
        writer.write_all(&self.zkproof)
    }
}

/// The shielded part of a transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SaplingBundle {
    /// Net value leaving the shielded pool (spends minus outputs).
    pub value_balance: Amount,
    pub shielded_spends: Vec<SpendDescription>,
    pub shielded_outputs: Vec<OutputDescription>,
    /// `None` until the transaction has been signed.
    pub binding_sig: Option<[u8; SIGNATURE_SIZE]>,
}

impl SaplingBundle {
    pub fn read<R: Read>(mut reader: R) -> io::Result<Self> {
        let value_balance = {
            let mut tmp = [0u8; 8];
            reader.read_exact(&mut tmp)?;
            Amount::from_i64_le_bytes(tmp)
        }
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "valueBalance out of range"))?;
        let shielded_spends = Vector::read(&mut reader, |r| SpendDescription::read(r))?;
        let shielded_outputs = Vector::read(&mut reader, |r| OutputDescription::read(r))?;
        let binding_sig = if shielded_spends.is_empty() && shielded_outputs.is_empty() {
            None
        } else {
            Some(read_signature(&mut reader)?)
        };

        Ok(SaplingBundle {
            value_balance,
            shielded_spends,
            shielded_outputs,
            binding_sig,
        })
    }

    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        self.write_body(&mut writer, |w, s| s.write(w))?;
        if self.has_descriptions() {
            match self.binding_sig {
                Some(sig) => writer.write_all(&sig)?,
                None => {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidInput,
                        "Missing binding signature",
                    ))
                }
            }
        }
        Ok(())
    }

    /// Writes the value balance and descriptions, using `write_spend` for each spend.
    pub(crate) fn write_body<W: Write, F>(
        &self,
        mut writer: W,
        write_spend: F,
    ) -> io::Result<()>
    where
        F: Fn(&mut W, &SpendDescription) -> io::Result<()>,
    {
        writer.write_i64::<LittleEndian>(self.value_balance.into())?;
        Vector::write(&mut writer, &self.shielded_spends, |w, s| write_spend(w, s))?;
        Vector::write(&mut writer, &self.shielded_outputs, |w, o| o.write(w))
    }

    pub fn has_descriptions(&self) -> bool {
        !(self.shielded_spends.is_empty() && self.shielded_outputs.is_empty())
    }

    pub fn nullifiers(&self) -> impl Iterator<Item = &Nullifier> {
        self.shielded_spends.iter().map(|s| &s.nullifier)
    }
}

#[cfg(test)]
mod tests {
    use super::{
        OutputDescription, SpendDescription, OUTPUT_DESCRIPTION_SIZE, SPEND_DESCRIPTION_SIZE,
    };
    use crate::sapling::{
        note_encryption::{ENC_CIPHERTEXT_SIZE, OUT_CIPHERTEXT_SIZE},
        Node, Nullifier,
    };
    use crate::transaction::components::GROTH_PROOF_SIZE;

    #[test]
    fn description_sizes() {
        assert_eq!(SPEND_DESCRIPTION_SIZE, 384);
        assert_eq!(OUTPUT_DESCRIPTION_SIZE, 948);

        let spend = SpendDescription {
            cv: [1; 32],
            anchor: Node::new([2; 32]),
            nullifier: Nullifier([3; 32]),
            rk: [4; 32],
            zkproof: [5; GROTH_PROOF_SIZE],
            spend_auth_sig: Some([6; 64]),
        };
        let mut buf = vec![];
        spend.write(&mut buf).unwrap();
        assert_eq!(buf.len(), SPEND_DESCRIPTION_SIZE);
        assert_eq!(SpendDescription::read(&buf[..]).unwrap(), spend);

        let output = OutputDescription {
            cv: [1; 32],
            cmu: Node::new([2; 32]),
            ephemeral_key: [3; 32],
            enc_ciphertext: [4; ENC_CIPHERTEXT_SIZE],
            out_ciphertext: [5; OUT_CIPHERTEXT_SIZE],
            zkproof: [6; GROTH_PROOF_SIZE],
        };
        let mut buf = vec![];
        output.write(&mut buf).unwrap();
        assert_eq!(buf.len(), OUTPUT_DESCRIPTION_SIZE);
        assert_eq!(OutputDescription::read(&buf[..]).unwrap(), output);
    }

    #[test]
    fn unsigned_spend_cannot_be_serialized() {
        let spend = SpendDescription {
            cv: [0; 32],
            anchor: Node::new([0; 32]),
            nullifier: Nullifier([0; 32]),
            rk: [0; 32],
            zkproof: [0; GROTH_PROOF_SIZE],
            spend_auth_sig: None,
        };
        assert!(spend.write(&mut vec![]).is_err());
    }
}
