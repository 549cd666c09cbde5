//! Deterministic random streams.
//!
//! Every node of a phylogeny gets its own stream derived only from the
//! node name and the run seed. Results therefore do not depend on the
//! order in which nodes are computed, how many workers run, or whether a
//! run was resumed.

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

/// The generator used for all simulation draws.
pub type SimulationRng = ChaCha8Rng;

const NODE_DOMAIN: &[u8] = b"lexsim/node\0";
const ROOT_DOMAIN: &[u8] = b"lexsim/root\0";

fn derive(domain: &[u8], seed: u64, name: &str) -> SimulationRng {
    let mut hasher = blake3::Hasher::new();
    hasher.update(domain);
    hasher.update(&seed.to_le_bytes());
    hasher.update(name.as_bytes());
    ChaCha8Rng::from_seed(*hasher.finalize().as_bytes())
}

/// Stream for the branch leading to the node called `name`.
pub fn node_stream(name: &str, seed: u64) -> SimulationRng {
    derive(NODE_DOMAIN, seed, name)
}

/// Stream used to synthesize the root language.
pub fn root_stream(seed: u64) -> SimulationRng {
    derive(ROOT_DOMAIN, seed, "")
}
