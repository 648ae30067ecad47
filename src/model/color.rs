// model/color.rs - List color normalization

use crate::{Error, Result};

/// Normalize a user-supplied color into `#RRGGBB` uppercase hex.
/// Accepts an optional leading `#` and 3- or 6-digit hex; anything else is
/// a `Validation` error (spec §7: "invalid color").
pub fn normalize(input: &str) -> Result<String> {
    let trimmed = input.trim().trim_start_matches('#');
    let expanded = match trimmed.len() {
        3 => trimmed
            .chars()
            .flat_map(|c| [c, c])
            .collect::<String>(),
        6 => trimmed.to_string(),
        _ => return Err(Error::Validation(format!("invalid color: {input}"))),
    };
    if !expanded.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(Error::Validation(format!("invalid color: {input}")));
    }
    Ok(format!("#{}", expanded.to_ascii_uppercase()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_six_digit() {
        assert_eq!(normalize("#ff00aa").unwrap(), "#FF00AA");
        assert_eq!(normalize("ff00aa").unwrap(), "#FF00AA");
    }

    #[test]
    fn expands_three_digit() {
        assert_eq!(normalize("#f0a").unwrap(), "#FF00AA");
    }

    #[test]
    fn rejects_invalid() {
        assert!(normalize("not-a-color").is_err());
        assert!(normalize("#ff00").is_err());
        assert!(normalize("#gggggg").is_err());
    }
}
