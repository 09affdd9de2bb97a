use crate::{Error, Result};

/// An ordered set of ClearKey `KID -> key` pairs.
///
/// Order is the order keys were supplied in; track-to-key selection for
/// multi-key content round-robins over that order by track id.
#[derive(Debug, Clone, Default)]
pub struct ClearKeySet {
    pairs: Vec<(String, [u8; 16])>,
}

impl ClearKeySet {
    /// Parse the combined form: `KID:KEY` or `KID1:KEY1,KID2:KEY2`.
    pub fn parse(clearkey: &str) -> Result<Self> {
        let mut pairs = Vec::new();
        for pair in clearkey.split(',') {
            let pair = pair.trim();
            if pair.is_empty() {
                continue;
            }
            let (kid, key) = pair
                .split_once(':')
                .ok_or_else(|| Error::InvalidKeyFormat(pair.to_string()))?;
            pairs.push((kid.trim().to_string(), parse_hex_key(key.trim())?));
        }
        Ok(Self { pairs })
    }

    /// Parse the split form: comma-separated `key_id` and `key` lists with
    /// matching counts.
    pub fn parse_split(key_id: &str, key: &str) -> Result<Self> {
        let kids: Vec<&str> = key_id.split(',').map(str::trim).collect();
        let keys: Vec<&str> = key.split(',').map(str::trim).collect();
        if kids.len() != keys.len() {
            return Err(Error::MismatchedKeyCount {
                kids: kids.len(),
                keys: keys.len(),
            });
        }

        let mut pairs = Vec::new();
        for (kid, key) in kids.into_iter().zip(keys) {
            pairs.push((kid.to_string(), parse_hex_key(key)?));
        }
        Ok(Self { pairs })
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    /// Select the key for a track.
    ///
    /// One key serves every track. With multiple keys the selection is
    /// `(track_id - 1) mod N` over supply order; it does not consult the
    /// tenc-declared default KID.
    // TODO: match KID-to-key from senc/tenc once a regression corpus of
    // multi-KID streams exists to validate against.
    pub fn key_for_track(&self, track_id: u32) -> Option<[u8; 16]> {
        match self.pairs.len() {
            0 => None,
            1 => Some(self.pairs[0].1),
            n => {
                let index = (track_id.saturating_sub(1) as usize) % n;
                Some(self.pairs[index].1)
            }
        }
    }

    pub fn key_for_kid(&self, kid: &str) -> Option<[u8; 16]> {
        self.pairs
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(kid))
            .map(|(_, key)| *key)
    }
}

fn parse_hex_key(s: &str) -> Result<[u8; 16]> {
    let bytes = hex::decode(s)?;
    bytes.try_into().map_err(|_| Error::InvalidKeyLength)
}

#[cfg(test)]
mod tests {
    use super::*;

    const KID1: &str = "00000000000000000000000000000001";
    const KEY1: &str = "0123456789abcdef0123456789abcdef";
    const KID2: &str = "00000000000000000000000000000002";
    const KEY2: &str = "fedcba9876543210fedcba9876543210";

    #[test]
    fn test_parse_single() {
        let set = ClearKeySet::parse(&format!("{KID1}:{KEY1}")).unwrap();
        assert_eq!(set.len(), 1);
        assert_eq!(set.key_for_kid(KID1), Some(hex_key(KEY1)));
    }

    #[test]
    fn test_parse_multi() {
        let set = ClearKeySet::parse(&format!("{KID1}:{KEY1},{KID2}:{KEY2}")).unwrap();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_parse_split_mismatch() {
        let err = ClearKeySet::parse_split(&format!("{KID1},{KID2}"), KEY1).unwrap_err();
        assert!(matches!(err, Error::MismatchedKeyCount { kids: 2, keys: 1 }));
    }

    #[test]
    fn test_parse_invalid_length() {
        assert!(ClearKeySet::parse("kid:0123456789abcdef").is_err());
    }

    #[test]
    fn test_key_for_track_single_covers_all() {
        let set = ClearKeySet::parse(&format!("{KID1}:{KEY1}")).unwrap();
        assert_eq!(set.key_for_track(1), Some(hex_key(KEY1)));
        assert_eq!(set.key_for_track(7), Some(hex_key(KEY1)));
    }

    #[test]
    fn test_key_for_track_round_robin() {
        let set = ClearKeySet::parse(&format!("{KID1}:{KEY1},{KID2}:{KEY2}")).unwrap();
        assert_eq!(set.key_for_track(1), Some(hex_key(KEY1)));
        assert_eq!(set.key_for_track(2), Some(hex_key(KEY2)));
        assert_eq!(set.key_for_track(3), Some(hex_key(KEY1)));
    }

    #[test]
    fn test_key_for_track_empty() {
        assert_eq!(ClearKeySet::default().key_for_track(1), None);
    }

    fn hex_key(s: &str) -> [u8; 16] {
        hex::decode(s).unwrap().try_into().unwrap()
    }
}
