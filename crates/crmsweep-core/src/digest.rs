use ring::digest::{SHA256, digest};

/// SHA-256 of `bytes`, rendered as `sha256:<lowercase hex>`.
pub fn sha256_tagged(bytes: &[u8]) -> String {
    format!("sha256:{}", hex::encode(digest(&SHA256, bytes)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_vector() {
        assert_eq!(
            sha256_tagged(b"abc"),
            "sha256:ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn differs_on_input() {
        assert_ne!(sha256_tagged(b"a"), sha256_tagged(b"b"));
    }
}
