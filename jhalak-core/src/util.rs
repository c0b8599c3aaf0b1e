use rand::{distributions::Alphanumeric, thread_rng, Rng};

/// Generates a random alphanumeric id, used for documents without a natural key.
pub fn random_id(length: usize) -> String {
    let mut rng = thread_rng();

    std::iter::repeat(())
        .map(|_| rng.sample(Alphanumeric) as char)
        .take(length)
        .collect()
}
