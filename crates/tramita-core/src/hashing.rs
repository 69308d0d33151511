//! Hash de contenido de definiciones (blake3, hex).

/// Hashea bytes y devuelve hex.
pub fn hash_bytes(input: &[u8]) -> String {
    blake3::hash(input).to_hex().to_string()
}
