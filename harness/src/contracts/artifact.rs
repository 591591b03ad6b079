use std::fs;
use std::path::Path;

use alloy::hex;
use alloy::json_abi::JsonAbi;
use alloy::primitives::Bytes;
use serde_json::Value;

use crate::error::ArtifactError;

/// Creation bytecode and ABI of a compiled contract.
#[derive(Debug, Clone)]
pub struct ContractArtifact {
    pub bytecode: Bytes,
    /// The ABI exactly as found in the artifact, for persisting.
    pub abi: Value,
    pub interface: JsonAbi,
}

/// Reads a Hardhat (`"bytecode": "0x.."`) or Foundry (`"bytecode": {"object": "0x.."}`)
/// artifact.
pub fn load_artifact(path: &Path) -> Result<ContractArtifact, ArtifactError> {
    let content =
        fs::read_to_string(path).map_err(|source| ArtifactError::Read { path: path.to_path_buf(), source })?;
    let artifact: Value = serde_json::from_str(&content)?;

    let bytecode = artifact["bytecode"]
        .as_str()
        .or_else(|| artifact["bytecode"]["object"].as_str())
        .ok_or(ArtifactError::KeyDoesNotExist("bytecode"))?;
    let bytecode = Bytes::from(hex::decode(bytecode)?);
    if bytecode.is_empty() {
        return Err(ArtifactError::EmptyBytecode);
    }

    let abi = artifact.get("abi").cloned().ok_or(ArtifactError::KeyDoesNotExist("abi"))?;
    let interface = serde_json::from_value(abi.clone()).map_err(|err| ArtifactError::InvalidAbi(err.to_string()))?;

    Ok(ContractArtifact { bytecode, abi, interface })
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use rstest::rstest;
    use serde_json::json;
    use tempfile::NamedTempFile;

    use super::*;

    fn write_artifact(content: &Value) -> NamedTempFile {
        let file = NamedTempFile::new().expect("temp file");
        fs::write(file.path(), content.to_string()).expect("write artifact");
        file
    }

    fn abi() -> Value {
        json!([{
            "type": "function",
            "name": "vote",
            "inputs": [{ "name": "proposal", "type": "uint256", "internalType": "uint256" }],
            "outputs": [],
            "stateMutability": "nonpayable"
        }])
    }

    #[rstest]
    #[case::hardhat(json!({ "bytecode": "0x6080604052", "abi": abi() }))]
    #[case::foundry(json!({ "bytecode": { "object": "0x6080604052" }, "abi": abi() }))]
    fn loads_supported_layouts(#[case] content: Value) {
        let file = write_artifact(&content);
        let artifact = load_artifact(file.path()).unwrap();
        assert_eq!(artifact.bytecode, Bytes::from_static(&[0x60, 0x80, 0x60, 0x40, 0x52]));
        assert!(artifact.interface.function("vote").is_some());
        assert_eq!(artifact.abi, abi());
    }

    #[test]
    fn rejects_abstract_contract() {
        let file = write_artifact(&json!({ "bytecode": "0x", "abi": [] }));
        assert_matches!(load_artifact(file.path()), Err(ArtifactError::EmptyBytecode));
    }

    #[rstest]
    #[case::no_bytecode(json!({ "abi": [] }), "bytecode")]
    #[case::no_abi(json!({ "bytecode": "0x60" }), "abi")]
    fn reports_missing_keys(#[case] content: Value, #[case] key: &str) {
        let file = write_artifact(&content);
        assert_matches!(load_artifact(file.path()), Err(ArtifactError::KeyDoesNotExist(missing)) if missing == key);
    }

    #[test]
    fn reports_unreadable_file() {
        assert_matches!(load_artifact(Path::new("/nonexistent/Ballot.json")), Err(ArtifactError::Read { .. }));
    }
}
