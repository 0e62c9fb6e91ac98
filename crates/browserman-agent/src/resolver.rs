//! Bounded retry around the model until it yields a usable action.

use tracing::{debug, warn};

use crate::action::{parse_action, Action};
use crate::model::Model;
use crate::prompt::{PromptBuilder, PromptInput};
use crate::{Error, Result};

/// Per-call inputs from the session.
#[derive(Debug, Clone, Copy)]
pub struct ResolveRequest<'a> {
    pub goal: &'a str,
    pub url: &'a str,
    pub dom: &'a str,
    pub use_buttons: bool,
    pub image: Option<&'a [u8]>,
}

/// An action together with the reply it came from.
#[derive(Debug, Clone)]
pub struct Resolved {
    pub action: Action,
    pub raw: String,
    pub attempts: u32,
}

pub struct Resolver<'a> {
    model: &'a dyn Model,
    prompts: &'a PromptBuilder,
    max_attempts: u32,
    temperature: f32,
}

impl<'a> Resolver<'a> {
    pub fn new(
        model: &'a dyn Model,
        prompts: &'a PromptBuilder,
        max_attempts: u32,
        temperature: f32,
    ) -> Self {
        Self {
            model,
            prompts,
            max_attempts,
            temperature,
        }
    }

    /// Ask the model until it answers with an action, at most
    /// `max_attempts` times.
    ///
    /// Every reply is appended to `history` (first line only) so the next
    /// prompt shows the model what it already said.
    pub async fn resolve(
        &self,
        request: &ResolveRequest<'_>,
        history: &mut Vec<String>,
    ) -> Result<Resolved> {
        for attempt in 1..=self.max_attempts {
            let prompt = self.prompts.build(&PromptInput {
                goal: request.goal,
                url: request.url,
                dom: request.dom,
                history,
                use_buttons: request.use_buttons,
                with_image: request.image.is_some(),
            });

            let output = match self
                .model
                .infer(&prompt, request.image, self.temperature)
                .await
            {
                Ok(output) => output,
                Err(e) => {
                    warn!("attempt {}/{}: model call failed: {}", attempt, self.max_attempts, e);
                    continue;
                }
            };

            let line = output.lines().next().unwrap_or("").trim().to_string();
            debug!("attempt {}/{}: model said: {}", attempt, self.max_attempts, line);
            history.push(line.clone());

            match parse_action(&output) {
                Some(Action::ClickButton { .. }) if !request.use_buttons => {
                    debug!("click_button offered while clicks are disabled, retrying");
                }
                Some(action) => {
                    return Ok(Resolved {
                        action,
                        raw: line,
                        attempts: attempt,
                    });
                }
                None => debug!("no action in reply, retrying"),
            }
        }

        Err(Error::ResolutionExhausted {
            attempts: self.max_attempts,
        })
    }
}
