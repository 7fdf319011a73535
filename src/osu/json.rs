//! JSON parsing with serde path context.

use serde::de::DeserializeOwned;

/// Parse a JSON body, prefixing failures with the serde path so a malformed
/// API payload names the offending field instead of just a byte offset.
pub fn parse_with_path<T: DeserializeOwned>(body: &str) -> anyhow::Result<T> {
    let de = &mut serde_json::Deserializer::from_str(body);
    serde_path_to_error::deserialize(de).map_err(|err| {
        let path = err.path().to_string();
        let inner = err.into_inner();
        if path.is_empty() || path == "." {
            anyhow::anyhow!(inner)
        } else {
            anyhow::anyhow!("at `{path}`: {inner}")
        }
    })
}
