use rand::{Rng, SeedableRng, rngs::StdRng};

/// desktop + mobile agents the catalog and the stream hosts are happy with
pub const USER_AGENTS: [&str; 3] = [
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 13_0) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/16.1 Safari/605.1.15",
    "Mozilla/5.0 (Linux; Android 12; SM-G998B) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Mobile Safari/537.36",
];

const ACCEPT_LANGUAGES: [&str; 2] = ["en-US,en;q=0.9", "en-GB,en;q=0.8"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity {
    pub user_agent: &'static str,
    pub accept_language: &'static str,
}

/// same seed, same identity. Callers that want rotation use `random_identity`
pub fn identity_from_seed(seed: u64) -> ClientIdentity {
    let mut rng = StdRng::seed_from_u64(seed);
    ClientIdentity {
        user_agent: USER_AGENTS[rng.random_range(0..USER_AGENTS.len())],
        accept_language: ACCEPT_LANGUAGES[rng.random_range(0..ACCEPT_LANGUAGES.len())],
    }
}

pub fn random_identity() -> ClientIdentity {
    identity_from_seed(rand::random())
}
