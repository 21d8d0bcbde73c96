//! Operator prompts.

use std::collections::VecDeque;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Stdin};
use tokio::sync::Mutex;

/// Result alias used by prompts.
pub type PromptResult<T> = Result<T, PromptError>;

/// Errors raised while asking the operator.
#[derive(Debug, Error)]
pub enum PromptError {
    /// Terminal I/O failed.
    #[error("prompt i/o error: {0}")]
    Io(#[from] std::io::Error),
    /// No answer is available (closed stdin or exhausted script).
    #[error("no answer for `{question}`")]
    NoAnswer {
        /// The unanswered question.
        question: String,
    },
}

/// Asks the operator for a single line of input.
#[async_trait]
pub trait Prompt: Send + Sync {
    /// Displays `question` and returns the trimmed answer.
    async fn ask(&self, question: &str) -> PromptResult<String>;
}

/// Prompt reading answers from standard input.
#[derive(Debug)]
pub struct StdinPrompt {
    reader: Mutex<BufReader<Stdin>>,
}

impl Default for StdinPrompt {
    fn default() -> Self {
        Self::new()
    }
}

impl StdinPrompt {
    /// Creates a prompt bound to the process's stdin.
    #[must_use]
    pub fn new() -> Self {
        Self {
            reader: Mutex::new(BufReader::new(tokio::io::stdin())),
        }
    }
}

#[async_trait]
impl Prompt for StdinPrompt {
    async fn ask(&self, question: &str) -> PromptResult<String> {
        let mut reader = self.reader.lock().await;
        let mut stderr = tokio::io::stderr();
        stderr.write_all(format!("{question}: ").as_bytes()).await?;
        stderr.flush().await?;

        let mut line = String::new();
        if reader.read_line(&mut line).await? == 0 {
            return Err(PromptError::NoAnswer {
                question: question.to_owned(),
            });
        }
        Ok(line.trim().to_owned())
    }
}

/// Prompt answering from a fixed script, recording every question asked.
#[derive(Debug, Default)]
pub struct ScriptedPrompt {
    answers: Mutex<VecDeque<String>>,
    asked: Mutex<Vec<String>>,
}

impl ScriptedPrompt {
    /// Creates a prompt that hands out `answers` in order.
    #[must_use]
    pub fn new<I, S>(answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            answers: Mutex::new(answers.into_iter().map(Into::into).collect()),
            asked: Mutex::new(Vec::new()),
        }
    }

    /// Returns the questions asked so far.
    pub async fn asked(&self) -> Vec<String> {
        self.asked.lock().await.clone()
    }
}

#[async_trait]
impl Prompt for ScriptedPrompt {
    async fn ask(&self, question: &str) -> PromptResult<String> {
        self.asked.lock().await.push(question.to_owned());
        self.answers
            .lock()
            .await
            .pop_front()
            .ok_or_else(|| PromptError::NoAnswer {
                question: question.to_owned(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_prompt_answers_in_order() {
        let prompt = ScriptedPrompt::new(["938382", "https://hooks.example"]);
        assert_eq!(prompt.ask("owner").await.unwrap(), "938382");
        assert_eq!(prompt.ask("url").await.unwrap(), "https://hooks.example");
        assert!(matches!(
            prompt.ask("more").await,
            Err(PromptError::NoAnswer { .. })
        ));
        assert_eq!(prompt.asked().await, ["owner", "url", "more"]);
    }
}
