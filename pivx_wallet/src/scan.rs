//! Trial decryption of shielded outputs with the wallet's incoming viewing keys.

use std::collections::BTreeMap;

use pivx_primitives::{
    sapling::{note_encryption::try_sapling_note_decryption, Note, PaymentAddress, SaplingIvk},
    memo::MemoBytes,
    transaction::{
        components::{OutPoint, OutputDescription},
        Transaction,
    },
};

use crate::{keys::KeyManager, wallet::NoteData};

/// Tries each of `ivks` in turn against `output`, returning the first that decrypts it.
pub fn decrypt_output<'a>(
    ivks: impl IntoIterator<Item = &'a SaplingIvk>,
    output: &OutputDescription,
) -> Option<(&'a SaplingIvk, Note, PaymentAddress, MemoBytes)> {
    ivks.into_iter().find_map(|ivk| {
        try_sapling_note_decryption(
            ivk,
            &output.ephemeral_key,
            &output.cmu,
            &output.enc_ciphertext,
        )
        .map(|(note, to, memo)| (ivk, note, to, memo))
    })
}

/// Returns the wallet's data for each output of `tx` it can decrypt, and every address
/// those outputs pay that the wallet has not seen before.
///
/// Decryption does not depend on the note's position, so nullifiers and witnesses are
/// left for the witness cache to fill in once the transaction is mined.
pub fn find_my_notes(
    keys: &KeyManager,
    tx: &Transaction,
) -> (BTreeMap<OutPoint, NoteData>, Vec<(PaymentAddress, SaplingIvk)>) {
    let txid = tx.txid();
    let mut notes = BTreeMap::new();
    let mut new_addresses = vec![];

    for (index, output) in tx.shielded_outputs().iter().enumerate() {
        if let Some((ivk, note, to, memo)) = decrypt_output(keys.ivks(), output) {
            if keys.ivk_for_address(&to).is_none() {
                new_addresses.push((to, ivk.clone()));
            }
            notes.insert(
                OutPoint::new(txid, index as u32),
                NoteData::received(ivk.clone(), note.value, to, memo),
            );
        }
    }

    (notes, new_addresses)
}

/// Returns the wallet addresses paid by the shielded outputs of `tx`.
pub fn find_owned_addresses(keys: &KeyManager, tx: &Transaction) -> Vec<PaymentAddress> {
    let mut owned: Vec<_> = tx
        .shielded_outputs()
        .iter()
        .filter_map(|output| decrypt_output(keys.ivks(), output))
        .map(|(_, _, to, _)| to)
        .collect();
    owned.sort();
    owned.dedup();
    owned
}

#[cfg(test)]
mod tests {
    use pivx_primitives::{
        memo::MemoBytes,
        transaction::components::OutPoint,
        zip32::{DiversifierIndex, ExtendedFullViewingKey, ExtendedSpendingKey},
    };

    use super::{find_my_notes, find_owned_addresses};
    use crate::{
        keys::KeyManager,
        storage::{MemoryStore, WalletDb},
        testing::{fake_shielded_tx, network},
    };

    #[test]
    fn finds_notes_to_known_keys() {
        let mut db = WalletDb::new(MemoryStore::new());
        let mut keys = KeyManager::default();
        let extsk = ExtendedSpendingKey::master(&[1; 32]);
        keys.import_spending_key(&network(), &mut db, extsk.clone(), 0)
            .unwrap();
        let extfvk = ExtendedFullViewingKey::from(&extsk);
        let (_, default) = extfvk.default_address();
        let (_, diversified) = extfvk
            .find_address(DiversifierIndex([1; 11]))
            .unwrap();
        let stranger = ExtendedSpendingKey::master(&[2; 32]).default_address().1;

        let memo = MemoBytes::from_bytes(b"hello").unwrap();
        let tx = fake_shielded_tx(&[
            (stranger, 5, MemoBytes::empty()),
            (default, 10, memo.clone()),
            (diversified, 20, MemoBytes::empty()),
        ]);

        let (notes, new_addresses) = find_my_notes(&keys, &tx);
        assert_eq!(notes.len(), 2);
        let first = &notes[&OutPoint::new(tx.txid(), 1)];
        assert_eq!(first.value, Some(10));
        assert_eq!(first.address, Some(default));
        assert_eq!(first.memo, Some(memo));
        assert!(first.witnesses.is_empty());
        assert_eq!(first.nullifier, None);
        let second = &notes[&OutPoint::new(tx.txid(), 2)];
        assert_eq!(second.memo, None);
        assert_eq!(
            new_addresses,
            vec![(diversified, extfvk.fvk.vk.ivk())]
        );

        let mut owned = vec![default, diversified];
        owned.sort();
        assert_eq!(find_owned_addresses(&keys, &tx), owned);
    }
}
