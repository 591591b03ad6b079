pub mod artifact;
pub mod ballot;

pub use artifact::{load_artifact, ContractArtifact};
pub use ballot::{decode_bytes32_string, encode_bytes32_string, BallotClient, BallotError};
