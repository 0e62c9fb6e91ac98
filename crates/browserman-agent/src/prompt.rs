//! Prompt construction for the vision model.
//!
//! Uses the Llama 3.2 chat template with the available functions described
//! as JSON schemas and the expected single-line reply format.

use std::fmt::Write;

use crate::config::PromptConfig;
use crate::dom;

/// Everything the model needs to pick the next action.
#[derive(Debug, Clone, Copy)]
pub struct PromptInput<'a> {
    pub goal: &'a str,
    pub url: &'a str,
    /// Link-only cleaned DOM.
    pub dom: &'a str,
    pub history: &'a [String],
    pub use_buttons: bool,
    pub with_image: bool,
}

const NAVIGATE_TO: &str = r#"Use the function 'navigate_to' to: Open a web page
{
    "name": "navigate_to",
    "description": "Navigate to a web page in a browser",
    "parameters": {
        "url": {
            "param_type": "string",
            "description": "URL of webpage",
            "required": true
        }
    }
}
"#;

const CLICK_BUTTON: &str = r#"Use the function 'click_button' to: Click a button or link on the web page
{
    "name": "click_button",
    "description": "Click a button on a web page in a browser",
    "parameters": {
        "button_text": {
            "param_type": "string",
            "description": "button text",
            "required": true
        },
        "reason": {
            "param_type": "string",
            "description": "why this button moves us toward the goal",
            "required": false
        }
    }
}
"#;

const GO_BACK: &str = r#"Use the function 'go_back' to: Return to the previous web page
{
    "name": "go_back",
    "description": "Go back to the previous page in the browser history",
    "parameters": {
        "reason": {
            "param_type": "string",
            "description": "why going back helps",
            "required": false
        }
    }
}
"#;

const FINAL_ANSWER: &str = r#"Use the function 'final_answer' to: Finish the task and report the result
{
    "name": "final_answer",
    "description": "Give the final answer to the user's request",
    "parameters": {
        "answer": {
            "param_type": "string",
            "description": "the answer or a summary of what was done",
            "required": true
        }
    }
}
"#;

const REPLY_FORMAT: &str = r#"If you choose to call a function ONLY reply in the following format with no prefix or suffix:
<{start_tag}={function_name}>{parameters}{end_tag}
where

start_tag => `<function`
parameters => a JSON dict with the function argument name as key and function argument value as value.
end_tag => `</function>`

Here is an example,
<function=example_function_name>{"example_name": "example_value"}</function>

Reminder:
- Function calls MUST follow the specified format
- Required parameters MUST be specified
- Only call one function at a time
- Put the entire function call reply on one line
"#;

/// Turns session state into the next model input.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    include_dom: bool,
    dom_max_chars: usize,
    history_window: usize,
}

impl PromptBuilder {
    pub fn new(config: &PromptConfig, history_window: usize) -> Self {
        Self {
            include_dom: config.include_dom,
            dom_max_chars: config.dom_max_chars,
            history_window,
        }
    }

    /// The most recent history entries that make it into the prompt.
    pub fn recent<'h>(&self, history: &'h [String]) -> &'h [String] {
        let start = history.len().saturating_sub(self.history_window);
        &history[start..]
    }

    pub fn build(&self, input: &PromptInput<'_>) -> String {
        let mut p = String::with_capacity(4096);
        p.push_str("<|begin_of_text|><|start_header_id|>system<|end_header_id|>\n\n");
        p.push_str(
            "You have access to the following functions to interact with web pages using a web browser:\n\n",
        );
        p.push_str(NAVIGATE_TO);
        p.push('\n');
        if input.use_buttons {
            p.push_str(CLICK_BUTTON);
            p.push('\n');
        }
        p.push_str(GO_BACK);
        p.push('\n');
        p.push_str(FINAL_ANSWER);
        p.push('\n');
        p.push_str(REPLY_FORMAT);
        p.push_str("\nYou are a helpful assistant.\n\n");

        if !input.url.is_empty() {
            let _ = writeln!(p, "Current URL: {}", input.url);
        }

        let recent = self.recent(input.history);
        if !recent.is_empty() {
            p.push_str("Past actions taken:\n");
            for entry in recent {
                let _ = writeln!(p, "* {}", entry);
            }
        }

        if input.with_image {
            p.push_str("Screenshot from current web page:<|image|>\n");
        }

        if self.include_dom && !input.dom.is_empty() {
            let _ = writeln!(
                p,
                "DOM of current web page:{}",
                dom::truncate(input.dom, self.dom_max_chars)
            );
        }

        p.push_str("\nWhat is the next action we should take?<|eot_id|>");
        p.push_str("<|start_header_id|>user<|end_header_id|>\n\n");
        p.push_str(input.goal);
        p.push_str("<|eot_id|><|start_header_id|>assistant<|end_header_id|>\n\n");
        p
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn builder(include_dom: bool) -> PromptBuilder {
        PromptBuilder::new(
            &PromptConfig {
                include_dom,
                dom_max_chars: 20,
            },
            3,
        )
    }

    fn input<'a>(history: &'a [String], use_buttons: bool) -> PromptInput<'a> {
        PromptInput {
            goal: "Please order me food from doordash.",
            url: "https://www.doordash.com/",
            dom: "<a href=\"/a\">A</a>",
            history,
            use_buttons,
            with_image: true,
        }
    }

    #[test]
    fn test_history_bounded_to_window() {
        let history: Vec<String> = (0..5).map(|i| format!("entry-{}", i)).collect();
        let p = builder(false).build(&input(&history, true));
        assert!(!p.contains("entry-0"));
        assert!(!p.contains("entry-1"));
        assert!(p.contains("* entry-2\n* entry-3\n* entry-4\n"));
    }

    #[test]
    fn test_click_offer_toggle() {
        let p = builder(false).build(&input(&[], true));
        assert!(p.contains("'click_button'"));
        let p = builder(false).build(&input(&[], false));
        assert!(!p.contains("click_button"));
        assert!(p.contains("'navigate_to'"));
        assert!(p.contains("'go_back'"));
        assert!(p.contains("'final_answer'"));
    }

    #[test]
    fn test_dom_is_optional() {
        let p = builder(false).build(&input(&[], true));
        assert!(!p.contains("DOM of current web page"));
        let p = builder(true).build(&input(&[], true));
        assert!(p.contains("DOM of current web page:<a href=\"/a\">A</a>"));
    }

    #[test]
    fn test_layout() {
        let p = builder(false).build(&input(&[], true));
        assert!(p.starts_with("<|begin_of_text|>"));
        assert!(p.contains("Screenshot from current web page:<|image|>"));
        assert!(p.contains("Current URL: https://www.doordash.com/"));
        assert!(p.ends_with(
            "Please order me food from doordash.<|eot_id|><|start_header_id|>assistant<|end_header_id|>\n\n"
        ));
        assert!(!p.contains("Past actions taken"));
    }
}
