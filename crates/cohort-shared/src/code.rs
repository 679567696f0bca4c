use rand::Rng;

use crate::constants::{ROOM_CODE_ALPHABET, ROOM_CODE_LEN};

/// Sample a fresh room code. Uniqueness is the store's job: callers insert
/// and retry on a unique-constraint violation.
pub fn generate_room_code() -> String {
    let mut rng = rand::rngs::OsRng;
    (0..ROOM_CODE_LEN)
        .map(|_| ROOM_CODE_ALPHABET[rng.gen_range(0..ROOM_CODE_ALPHABET.len())] as char)
        .collect()
}

pub fn is_valid_room_code(code: &str) -> bool {
    code.len() == ROOM_CODE_LEN && code.bytes().all(|b| ROOM_CODE_ALPHABET.contains(&b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_codes_are_well_formed() {
        for _ in 0..100 {
            let code = generate_room_code();
            assert!(is_valid_room_code(&code), "bad code {code}");
        }
    }

    #[test]
    fn test_rejects_malformed_codes() {
        assert!(!is_valid_room_code("abc"));
        assert!(!is_valid_room_code("abcdefgh"));
        assert!(!is_valid_room_code("ABCD-FGH"));
    }
}
