use std::path::Path;

use anyhow::{Context, Result};

use crate::config::PromptsConfig;
use crate::memory::{Role, Turn};

pub const CONVERSATION_MARKER: &str = "Here is our ongoing conversation:";

/// The two fixed instruction blocks placed ahead of every conversation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PromptSet {
    pub base: String,
    pub custom: String,
}

impl PromptSet {
    pub fn new(base: impl Into<String>, custom: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            custom: custom.into(),
        }
    }

    /// Resolve each block from its file (relative to `base_dir`) or inline text.
    pub fn from_config(config: &PromptsConfig, base_dir: &Path) -> Result<Self> {
        let base = read_block(config.base_file.as_deref(), &config.base, base_dir)?;
        let custom = read_block(config.custom_file.as_deref(), &config.custom, base_dir)?;
        Ok(Self::new(base, custom))
    }

    pub fn render(&self, transcript: &[Turn], user_input: &str) -> String {
        render_prompt(&self.base, &self.custom, transcript, user_input)
    }
}

fn read_block(file: Option<&Path>, inline: &str, base_dir: &Path) -> Result<String> {
    let Some(file) = file else {
        return Ok(inline.to_string());
    };
    let path = base_dir.join(file);
    std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read prompt file: {}", path.display()))
}

/// Build the text sent to the model for one turn.
///
/// The layout and the `User:` / `AI:` labels are what the model continues
/// from, so they must stay byte-for-byte stable.
pub fn render_prompt(
    instructions_a: &str,
    instructions_b: &str,
    transcript: &[Turn],
    user_input: &str,
) -> String {
    let conversation = transcript
        .iter()
        .map(|turn| format!("{}: {}", label(turn.role), turn.content))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "\n{}\n\n{}\n\n{CONVERSATION_MARKER}\n{conversation}\nUser: {user_input}\n",
        instructions_a.trim(),
        instructions_b.trim(),
    )
}

fn label(role: Role) -> &'static str {
    match role {
        Role::User => "User",
        Role::Model => "AI",
    }
}
