use proptest::prelude::*;

use obol_types::{sha256, PubKey, Sha256, Sig};

proptest! {
    /// Sha256 roundtrip: new -> as_bytes -> new produces identical digest.
    #[test]
    fn sha256_roundtrip(bytes in prop::array::uniform32(0u8..)) {
        let hash = Sha256::new(bytes);
        prop_assert_eq!(hash.as_bytes(), &bytes);
    }

    /// Sha256::is_zero is true only for all-zero bytes.
    #[test]
    fn sha256_is_zero_correct(bytes in prop::array::uniform32(0u8..)) {
        let hash = Sha256::new(bytes);
        prop_assert_eq!(hash.is_zero(), bytes == [0u8; 32]);
    }

    /// Sha256 bincode serialization roundtrip.
    #[test]
    fn sha256_bincode_roundtrip(bytes in prop::array::uniform32(0u8..)) {
        let hash = Sha256::new(bytes);
        let encoded = bincode::serialize(&hash).unwrap();
        let decoded: Sha256 = bincode::deserialize(&encoded).unwrap();
        prop_assert_eq!(decoded, hash);
    }

    /// Hashing is injective on the tested sample: different inputs do not
    /// collide (vacuously checks determinism too).
    #[test]
    fn sha256_distinct_inputs(a in prop::collection::vec(any::<u8>(), 0..64),
                              b in prop::collection::vec(any::<u8>(), 0..64)) {
        if a == b {
            prop_assert_eq!(sha256(&a), sha256(&b));
        } else {
            prop_assert_ne!(sha256(&a), sha256(&b));
        }
    }

    /// PubKey slice parsing accepts exactly 33 bytes.
    #[test]
    fn pubkey_from_slice_length(len in 0usize..64) {
        let bytes = vec![1u8; len];
        prop_assert_eq!(PubKey::from_slice(&bytes).is_some(), len == 33);
    }

    /// Sig bincode roundtrip for arbitrary contents.
    #[test]
    fn sig_bincode_roundtrip(seed in any::<u8>()) {
        let sig = Sig::new([seed; 65]);
        let encoded = bincode::serialize(&sig).unwrap();
        let decoded: Sig = bincode::deserialize(&encoded).unwrap();
        prop_assert_eq!(decoded, sig);
    }
}
