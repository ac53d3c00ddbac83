//! The signature hash that transparent and shielded signatures commit to.

use blake2b_simd::{Hash as Blake2bHash, Params as Blake2bParams};
use byteorder::{LittleEndian, WriteBytesExt};
use std::io::Write;

use crate::legacy::Script;

use super::{components::Amount, TransactionData};

pub const SIGHASH_ALL: u8 = 0x01;

const PIVX_SIGHASH_PERSONALIZATION: &[u8; 16] = b"PIVXSigHash\0\0\0\0\0";

/// The input being signed.
pub enum SignableInput<'a> {
    /// The shielded spend authorization and binding signatures.
    Shielded,
    /// A transparent input, identified by its position in `vin`, with the script and
    /// value of the coin it spends.
    Transparent {
        index: usize,
        script_code: &'a Script,
        value: Amount,
    },
}

/// Computes the signature hash of a transaction.
///
/// Every signature is blanked before hashing: transparent `script_sig`s are emptied
/// (except the input being signed, which commits to its `script_code`), spend
/// authorization signatures and the binding signature are omitted. The result is
/// therefore the same before and after signing.
pub fn signature_hash(
    tx: &TransactionData,
    hash_type: u8,
    signable_input: &SignableInput<'_>,
) -> Blake2bHash {
    let mut unsigned = tx.clone();
    for txin in unsigned.vin.iter_mut() {
        txin.script_sig = Script::default();
    }
    if let SignableInput::Transparent {
        index, script_code, ..
    } = signable_input
    {
        if let Some(txin) = unsigned.vin.get_mut(*index) {
            txin.script_sig = (*script_code).clone();
        }
    }

    let mut h = Blake2bParams::new()
        .hash_length(32)
        .personal(PIVX_SIGHASH_PERSONALIZATION)
        .to_state();

    unsigned
        .write_inner(&mut h, |w, bundle| {
            bundle.write_body(w, |w, spend| spend.write_unsigned(w))
        })
        .expect("hashing into a BLAKE2b state cannot fail");

    h.write_u32::<LittleEndian>(hash_type.into())
        .expect("hashing into a BLAKE2b state cannot fail");
    if let SignableInput::Transparent { index, value, .. } = signable_input {
        h.write_u32::<LittleEndian>(*index as u32)
            .expect("hashing into a BLAKE2b state cannot fail");
        h.write_all(&value.to_i64_le_bytes())
            .expect("hashing into a BLAKE2b state cannot fail");
    }

    h.finalize()
}

#[cfg(test)]
mod tests {
    use super::{signature_hash, SignableInput, SIGHASH_ALL};
    use crate::{
        legacy::{Script, TransparentAddress},
        sapling::{Node, Nullifier},
        transaction::{
            components::{Amount, OutPoint, SaplingBundle, SpendDescription, TxIn},
            TransactionData, TxId,
        },
    };

    fn tx_with_spend(sig: Option<[u8; 64]>, script_sig: Script) -> TransactionData {
        let mut txin = TxIn::new(OutPoint::new(TxId::from_bytes([3; 32]), 1));
        txin.script_sig = script_sig;
        TransactionData {
            vin: vec![txin],
            sapling_bundle: Some(SaplingBundle {
                value_balance: Amount::from_i64(1000).unwrap(),
                shielded_spends: vec![SpendDescription {
                    cv: [1; 32],
                    anchor: Node::new([2; 32]),
                    nullifier: Nullifier([3; 32]),
                    rk: [4; 32],
                    zkproof: [5; 192],
                    spend_auth_sig: sig,
                }],
                shielded_outputs: vec![],
                binding_sig: sig,
            }),
            ..Default::default()
        }
    }

    #[test]
    fn sighash_ignores_signatures() {
        let unsigned = tx_with_spend(None, Script::default());
        let signed = tx_with_spend(Some([9; 64]), Script(vec![1, 2, 3]));

        assert_eq!(
            signature_hash(&unsigned, SIGHASH_ALL, &SignableInput::Shielded).as_bytes(),
            signature_hash(&signed, SIGHASH_ALL, &SignableInput::Shielded).as_bytes(),
        );
    }

    #[test]
    fn sighash_commits_to_input() {
        let tx = tx_with_spend(None, Script::default());
        let script_code = TransparentAddress::PublicKey([8; 20]).script();

        let shielded = signature_hash(&tx, SIGHASH_ALL, &SignableInput::Shielded);
        let transparent = signature_hash(
            &tx,
            SIGHASH_ALL,
            &SignableInput::Transparent {
                index: 0,
                script_code: &script_code,
                value: Amount::from_u64(5000).unwrap(),
            },
        );
        let other_value = signature_hash(
            &tx,
            SIGHASH_ALL,
            &SignableInput::Transparent {
                index: 0,
                script_code: &script_code,
                value: Amount::from_u64(5001).unwrap(),
            },
        );

        assert_ne!(shielded.as_bytes(), transparent.as_bytes());
        assert_ne!(transparent.as_bytes(), other_value.as_bytes());
    }
}
