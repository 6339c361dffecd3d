pub mod hash;
pub mod keypair;
pub mod signing;

pub use hash::{blake3_hash, blake3_hex};
pub use keypair::KeyPair;
pub use signing::{verify_signature, SignatureError, Signer};
