use serde::Deserialize;
use sha2::{Digest, Sha256};

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    #[default]
    Blake3,
    Sha256,
}

impl HashAlgorithm {
    /// Returns `None` if nothing matches
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "blake3" => Some(Self::Blake3),
            "sha256" | "sha-256" => Some(Self::Sha256),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            HashAlgorithm::Blake3 => "blake3",
            HashAlgorithm::Sha256 => "sha256",
        }
    }

    pub fn hasher(self) -> Hasher {
        match self {
            HashAlgorithm::Blake3 => Hasher::Blake3 {
                hasher: Box::new(blake3::Hasher::new()),
            },
            HashAlgorithm::Sha256 => Hasher::Sha256 {
                hasher: Box::new(Sha256::new()),
            },
        }
    }

    /// Hex digest of `data`.
    pub fn hash_hex(self, data: &[u8]) -> String {
        let mut hasher = self.hasher();
        hasher.update(data);
        hasher.finalize()
    }
}

pub enum Hasher {
    Blake3 { hasher: Box<blake3::Hasher> },
    Sha256 { hasher: Box<Sha256> },
}

impl Hasher {
    pub fn update(&mut self, data: &[u8]) {
        match self {
            Hasher::Blake3 { hasher } => {
                hasher.update(data);
            }
            Hasher::Sha256 { hasher } => hasher.update(data),
        }
    }

    pub fn finalize(self) -> String {
        match self {
            Hasher::Blake3 { hasher } => hasher.finalize().to_hex().to_string(),
            Hasher::Sha256 { hasher } => hex::encode(hasher.finalize()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EMPTY_BLAKE3: &str = "af1349b9f5f9a1a6a0404dea36dcc9499bcb25c9adc112b7cc9a93cae41f3262";
    const EMPTY_SHA256: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

    #[test]
    fn test_empty_vectors() {
        assert_eq!(HashAlgorithm::Blake3.hash_hex(b""), EMPTY_BLAKE3);
        assert_eq!(HashAlgorithm::Sha256.hash_hex(b""), EMPTY_SHA256);
    }

    #[test]
    fn test_one_byte_vector() {
        assert_eq!(
            HashAlgorithm::Sha256.hash_hex(b"a"),
            "ca978112ca1bbdcafac231b39a23dc4da786eff8147c4e72b9807785afee48bb"
        );
        assert_eq!(
            HashAlgorithm::Blake3.hash_hex(b"a"),
            blake3::hash(b"a").to_hex().to_string()
        );
    }

    #[test]
    fn test_large_input_matches_reference() {
        // 1 MiB of deterministic pseudo-random bytes.
        let mut state: u32 = 0x9e37_79b9;
        let data: Vec<u8> = (0..1024 * 1024)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 17;
                state ^= state << 5;
                state as u8
            })
            .collect();

        assert_eq!(
            HashAlgorithm::Blake3.hash_hex(&data),
            blake3::hash(&data).to_hex().to_string()
        );
        assert_eq!(
            HashAlgorithm::Sha256.hash_hex(&data),
            hex::encode(Sha256::digest(&data))
        );
    }

    #[test]
    fn test_determinism_and_sensitivity() {
        let mut data = b"This is some test data.".to_vec();
        for algorithm in [HashAlgorithm::Blake3, HashAlgorithm::Sha256] {
            let first = algorithm.hash_hex(&data);
            assert_eq!(first, algorithm.hash_hex(&data));

            data[3] ^= 1;
            assert_ne!(first, algorithm.hash_hex(&data));
            data[3] ^= 1;
        }
    }

    #[test]
    fn test_incremental_matches_oneshot() {
        let mut hasher = HashAlgorithm::from_name("SHA256")
            .expect("sha256 is known")
            .hasher();
        hasher.update(b"This is ");
        hasher.update(b"some test data.");

        assert_eq!(
            hasher.finalize(),
            HashAlgorithm::Sha256.hash_hex(b"This is some test data.")
        );
        assert!(HashAlgorithm::from_name("md5").is_none());
        assert_eq!(HashAlgorithm::default().hasher().finalize(), EMPTY_BLAKE3);
    }
}
