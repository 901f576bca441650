use rand::Rng;

// No 0/O or 1/I, so codes survive being read aloud or retyped.
const ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const PREFIX: &str = "RWD";
const GROUPS: usize = 2;
const GROUP_LEN: usize = 4;

/// Generates a code of the form `RWD-XXXX-XXXX`.
pub fn generate() -> String {
    let mut rng = rand::thread_rng();
    let mut code = String::with_capacity(PREFIX.len() + GROUPS * (GROUP_LEN + 1));
    code.push_str(PREFIX);
    for _ in 0..GROUPS {
        code.push('-');
        for _ in 0..GROUP_LEN {
            code.push(ALPHABET[rng.gen_range(0..ALPHABET.len())] as char);
        }
    }
    code
}

/// Canonical form used for storage and lookup.
pub fn normalize(raw: &str) -> String {
    raw.trim().to_ascii_uppercase()
}
