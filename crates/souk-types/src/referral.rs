use rand::Rng;

pub const CODE_LEN: usize = 8;

/// Points credited to the direct referrer.
pub const LEVEL1_POINTS: i64 = 10;
/// Points credited to the referrer's own referrer.
pub const LEVEL2_POINTS: i64 = 5;

// No 0/O or 1/I/L, codes get read out over the phone.
const ALPHABET: &[u8] = b"ABCDEFGHJKMNPQRSTUVWXYZ23456789";

/// Canonical form of a code typed by a user: trimmed, upper-cased and cut
/// to [`CODE_LEN`] characters.
pub fn normalize_code(input: &str) -> String {
    input.trim().to_uppercase().chars().take(CODE_LEN).collect()
}

/// Whether a normalized code is worth a database lookup.
pub fn is_well_formed(code: &str) -> bool {
    code.len() == CODE_LEN && code.bytes().all(|b| b.is_ascii_alphanumeric())
}

pub fn generate_code<R: Rng + ?Sized>(rng: &mut R) -> String {
    (0..CODE_LEN)
        .map(|_| ALPHABET[rng.random_range(0..ALPHABET.len())] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn input_is_upper_cased_and_truncated() {
        assert_eq!(normalize_code("abcd1234xyz"), "ABCD1234");
        assert_eq!(normalize_code("  ab12  "), "AB12");
        assert_eq!(normalize_code(""), "");
    }

    #[test]
    fn only_full_length_alphanumerics_are_well_formed() {
        assert!(is_well_formed("ABCD1234"));
        assert!(!is_well_formed("ABC"));
        assert!(!is_well_formed("ABCD-234"));
    }

    #[test]
    fn generated_codes_survive_normalization() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..100 {
            let code = generate_code(&mut rng);
            assert!(is_well_formed(&code));
            assert_eq!(normalize_code(&code.to_lowercase()), code);
            assert!(!code.contains(['0', 'O', '1', 'I', 'L']));
        }
    }
}
