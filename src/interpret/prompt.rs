use serde::Serialize;
use std::fmt;

/// Who a prompt message comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

/// Ordered, role-tagged prompt.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Prompt {
    messages: Vec<Message>,
    #[serde(skip)]
    follow_up: Option<&'static str>,
}

const ACTION_SYSTEM_PROMPT: &str = r#"You are a browser automation planner. Translate the user's instructions into a JSON array of actions for the page that is currently open.

Available actions:
- {"type":"goto","url":"https://..."}
- {"type":"waitForSelector","selector":"css selector","timeout":5000}
- {"type":"click","selector":"css selector"}
- {"type":"fill","selector":"css selector","value":"text to enter"}
- {"type":"eval","script":"JavaScript expression; its value is recorded"}
- {"type":"screenshot","path":"file.png","selector":"optional css selector"}
- {"type":"extract","selector":"css selector","name":"result key"}
- {"type":"done"}

Rules:
1. Respond with ONLY the JSON array. No markdown, no explanation.
2. Actions run in order. Use waitForSelector before interacting with content that loads late.
3. Use extract to collect the text the user asked for; give each extraction a short name.
4. End the list with {"type":"done"}."#;

const STRICT_FOLLOW_UP: &str = "Return ONLY the JSON array of actions. Do not wrap it in code fences and do not add any commentary.";

const SUMMARY_SYSTEM_PROMPT: &str = "You summarize the results of a browser automation run. Answer in a few plain-text sentences addressed to the user. Do not return JSON.";

const SUMMARY_FOLLOW_UP: &str = "Reply with the plain-text summary only. No JSON, no code fences.";

impl Prompt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn system(self, content: impl Into<String>) -> Self {
        self.with(Role::System, content)
    }

    pub fn user(self, content: impl Into<String>) -> Self {
        self.with(Role::User, content)
    }

    pub fn assistant(self, content: impl Into<String>) -> Self {
        self.with(Role::Assistant, content)
    }

    fn with(mut self, role: Role, content: impl Into<String>) -> Self {
        self.messages.push(Message {
            role,
            content: content.into(),
        });
        self
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Prompt asking for the action list.
    ///
    /// `page_text` is the visible text of the current page, already truncated
    /// by the caller; pass an empty string to omit it.
    pub fn for_actions(
        start_url: &str,
        current_url: &str,
        title: &str,
        page_text: &str,
        instructions: &str,
    ) -> Self {
        let mut context = format!("Start URL: {}\nCurrent URL: {}\n", start_url, current_url);
        if !title.is_empty() {
            context.push_str(&format!("Title: {}\n", title));
        }
        if !page_text.is_empty() {
            context.push_str(&format!("\nPage text:\n{}\n", page_text));
        }
        context.push_str(&format!("\nInstructions: {}", instructions));

        Self::new().system(ACTION_SYSTEM_PROMPT).user(context)
    }

    /// Prompt asking for a plain-text summary of collected results.
    pub fn for_summary(instructions: &str, results_json: &str) -> Self {
        let mut prompt = Self::new().system(SUMMARY_SYSTEM_PROMPT).user(format!(
            "Instructions: {}\n\nResults:\n{}",
            instructions, results_json
        ));
        prompt.follow_up = Some(SUMMARY_FOLLOW_UP);
        prompt
    }

    /// The same prompt plus its retry instruction: a bare JSON array unless
    /// the prompt was built for something else.
    pub fn strict(&self) -> Self {
        self.clone().user(self.follow_up.unwrap_or(STRICT_FOLLOW_UP))
    }

    /// Text sent to the transport: `role: content` blocks separated by blank
    /// lines.
    pub fn render(&self) -> String {
        self.messages
            .iter()
            .map(|m| format!("{}: {}", m.role, m.content))
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}
