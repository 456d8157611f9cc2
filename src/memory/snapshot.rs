//! Storage form of the transcript: a JSON array of `{role, content}` objects.

use anyhow::{Context, Result};

use super::{Role, Turn};

pub fn encode(turns: &[Turn]) -> Result<String> {
    serde_json::to_string(turns).context("Failed to serialize chat memory")
}

/// Parse a stored snapshot. Blank input is treated as an empty transcript.
///
/// A snapshot that does not consist of complete user/model pairs is
/// rejected as corrupt.
pub fn decode(raw: &str) -> Result<Vec<Turn>> {
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }
    let turns: Vec<Turn> =
        serde_json::from_str(raw).context("Chat memory snapshot is not valid JSON")?;

    let paired = turns
        .chunks(2)
        .all(|pair| matches!(pair, [user, model] if user.role == Role::User && model.role == Role::Model));
    if !paired {
        anyhow::bail!("Chat memory snapshot contains an unpaired turn");
    }
    Ok(turns)
}
