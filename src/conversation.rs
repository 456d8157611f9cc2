use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Mutex;

use crate::llm::LlmClient;
use crate::memory::{MemoryStore, Turn};
use crate::prompt::PromptSet;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TurnError {
    #[error("Missing API key.")]
    MissingConfiguration,
    #[error("{message}")]
    Model { message: String },
}

impl TurnError {
    pub fn kind(&self) -> &'static str {
        match self {
            TurnError::MissingConfiguration => "missing_configuration",
            TurnError::Model { .. } => "model",
        }
    }
}

/// One linear conversation: the transcript, the model it talks to, and the
/// instruction text prepended to every prompt.
///
/// Turns are serialized. The memory lock is held across the model call, so a
/// second `ask_turn` waits for the first to commit and then sees its exchange.
pub struct Conversation {
    llm: Option<Arc<dyn LlmClient>>,
    memory: Mutex<MemoryStore>,
    prompts: PromptSet,
}

impl Conversation {
    pub fn new(llm: Option<Arc<dyn LlmClient>>, memory: MemoryStore, prompts: PromptSet) -> Self {
        Self {
            llm,
            memory: Mutex::new(memory),
            prompts,
        }
    }

    /// Run one turn. The exchange is committed only when the model replies;
    /// on any failure the transcript is left exactly as it was.
    pub async fn ask_turn(&self, user_input: &str) -> Result<String, TurnError> {
        let Some(llm) = &self.llm else {
            return Err(TurnError::MissingConfiguration);
        };

        let mut memory = self.memory.lock().await;
        let prompt = self.prompts.render(&memory.snapshot(), user_input);
        tracing::debug!("Prompt ({} chars, {} turns)", prompt.len(), memory.len());

        match llm.generate(&prompt).await {
            Ok(reply) => {
                memory.append(Turn::user(user_input), Turn::model(reply.clone()));
                tracing::info!(
                    "Turn committed (input {} chars, reply {} chars, {} turns)",
                    user_input.len(),
                    reply.len(),
                    memory.len()
                );
                Ok(reply)
            }
            Err(e) => {
                tracing::error!("Model call failed: {e}");
                Err(TurnError::Model {
                    message: e.describe(),
                })
            }
        }
    }

    pub async fn clear_memory(&self) {
        self.memory.lock().await.clear();
        tracing::info!("Chat memory cleared");
    }

    pub async fn transcript(&self) -> Vec<Turn> {
        self.memory.lock().await.snapshot()
    }
}
