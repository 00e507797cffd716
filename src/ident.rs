//! Identifier normalization.

/// Reduce a display name to its canonical id: lowercase ASCII alphanumerics,
/// everything else stripped. Rank sigils, spaces, and punctuation all vanish,
/// so `"+Bob Smith"` and `"bobsmith"` compare equal.
pub fn to_id(name: &str) -> String {
    name.chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_lowercase())
        .collect()
}
