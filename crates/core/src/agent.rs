use crate::error::{AgentError, ParseError};
use crate::models::{AgentOutput, SessionOptions};
use crate::traits::{ChatModel, Tool};
use regex::Regex;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use tracing::{debug, warn};

pub const AI_PREFIX: &str = "AI";
pub const HUMAN_PREFIX: &str = "Human";
pub const ITERATION_LIMIT_OUTPUT: &str = "Agent stopped due to iteration limit or time limit.";

const OBSERVATION_STOP: &str = "\nObservation:";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exchange {
    pub input: String,
    pub output: String,
}

/// Append-only turn history; prompts only see the last `window` exchanges.
#[derive(Debug, Clone)]
pub struct ConversationMemory {
    window: usize,
    exchanges: Vec<Exchange>,
}

pub type SharedMemory = Arc<Mutex<ConversationMemory>>;

impl ConversationMemory {
    pub fn new(window: usize) -> Self {
        Self {
            window,
            exchanges: Vec::new(),
        }
    }

    pub fn shared(window: usize) -> SharedMemory {
        Arc::new(Mutex::new(Self::new(window)))
    }

    pub fn record(&mut self, input: impl Into<String>, output: impl Into<String>) {
        self.exchanges.push(Exchange {
            input: input.into(),
            output: output.into(),
        });
    }

    pub fn len(&self) -> usize {
        self.exchanges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exchanges.is_empty()
    }

    pub fn recent(&self) -> &[Exchange] {
        let start = self.exchanges.len().saturating_sub(self.window);
        &self.exchanges[start..]
    }

    pub fn render(&self) -> String {
        self.recent()
            .iter()
            .map(|exchange| {
                format!(
                    "{HUMAN_PREFIX}: {}\n{AI_PREFIX}: {}",
                    exchange.input, exchange.output
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentStep {
    Action {
        tool: String,
        input: String,
        log: String,
    },
    Finish {
        output: String,
    },
}

fn action_regex() -> &'static Regex {
    static ACTION: OnceLock<Regex> = OnceLock::new();
    ACTION.get_or_init(|| {
        Regex::new(r"Action: (.*?)\n*Action Input: ((?s).*)").expect("action pattern is valid")
    })
}

pub fn parse_output(text: &str) -> Result<AgentStep, ParseError> {
    let final_marker = format!("{AI_PREFIX}:");
    if text.contains(&final_marker) {
        let answer = text.rsplit(final_marker.as_str()).next().unwrap_or_default();
        return Ok(AgentStep::Finish {
            output: answer.trim().to_string(),
        });
    }

    let captures = action_regex().captures(text).ok_or_else(|| ParseError {
        output: text.to_string(),
    })?;
    let tool = captures.get(1).map(|m| m.as_str().trim()).unwrap_or_default();
    let input = captures
        .get(2)
        .map(|m| m.as_str().trim_matches(' ').trim_matches('"'))
        .unwrap_or_default();

    Ok(AgentStep::Action {
        tool: tool.to_string(),
        input: input.to_string(),
        log: text.to_string(),
    })
}

pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

#[derive(Debug, Clone, Copy)]
pub struct AgentSettings {
    pub max_iterations: usize,
    pub parse_error_max_chars: usize,
}

impl From<&SessionOptions> for AgentSettings {
    fn from(options: &SessionOptions) -> Self {
        Self {
            max_iterations: options.max_agent_iterations,
            parse_error_max_chars: options.parse_error_max_chars,
        }
    }
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self::from(&SessionOptions::default())
    }
}

/// A ready-to-invoke agent. Replaced as a whole, never edited in place.
pub struct Agent {
    llm: Arc<dyn ChatModel>,
    memory: SharedMemory,
    tools: Vec<Arc<dyn Tool>>,
    settings: AgentSettings,
}

/// Binds the model, the session memory and `tools` into a new agent.
///
/// The memory is shared with the caller and left as is.
pub fn compose_agent(
    llm: Arc<dyn ChatModel>,
    memory: SharedMemory,
    tools: Vec<Arc<dyn Tool>>,
    settings: AgentSettings,
) -> Agent {
    Agent {
        llm,
        memory,
        tools,
        settings,
    }
}

impl Agent {
    pub fn tools(&self) -> &[Arc<dyn Tool>] {
        &self.tools
    }

    pub fn tool_count(&self) -> usize {
        self.tools.len()
    }

    pub fn memory(&self) -> &SharedMemory {
        &self.memory
    }

    pub async fn invoke(&self, input: &str) -> Result<AgentOutput, AgentError> {
        let history = self
            .memory
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .render();
        let mut scratchpad = String::new();

        for iteration in 0..self.settings.max_iterations {
            let prompt = self.render_prompt(&history, input, &scratchpad);
            let completion = self.llm.complete(&prompt, &[OBSERVATION_STOP]).await?;

            match parse_output(&completion) {
                Ok(AgentStep::Finish { output }) => return Ok(self.finish(input, output)),
                Ok(AgentStep::Action {
                    tool,
                    input: tool_input,
                    log,
                }) => {
                    debug!(iteration, tool = %tool, "agent requested tool");
                    let observation = match self.find_tool(&tool) {
                        Some(found) => found.call(&tool_input).await?,
                        None => format!(
                            "{tool} is not a valid tool, try one of [{}].",
                            self.tool_names()
                        ),
                    };
                    scratchpad.push_str(&log);
                    scratchpad.push_str("\nObservation: ");
                    scratchpad.push_str(&observation);
                    scratchpad.push_str("\nThought: ");
                }
                Err(error) => {
                    warn!(%error, "recovering from unparseable model output");
                    let output = truncate_chars(&error.to_string(), self.settings.parse_error_max_chars);
                    return Ok(self.finish(input, output));
                }
            }
        }

        warn!(
            max_iterations = self.settings.max_iterations,
            "agent hit its iteration limit"
        );
        Ok(self.finish(input, ITERATION_LIMIT_OUTPUT.to_string()))
    }

    fn finish(&self, input: &str, output: String) -> AgentOutput {
        self.memory
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .record(input, output.clone());
        AgentOutput { output }
    }

    fn find_tool(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.iter().find(|tool| tool.name() == name)
    }

    fn tool_names(&self) -> String {
        self.tools
            .iter()
            .map(|tool| tool.name())
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn render_prompt(&self, history: &str, input: &str, scratchpad: &str) -> String {
        let tool_lines = if self.tools.is_empty() {
            "(no tools available)".to_string()
        } else {
            self.tools
                .iter()
                .map(|tool| format!("> {}: {}", tool.name(), tool.description()))
                .collect::<Vec<_>>()
                .join("\n")
        };

        format!(
            "Assistant is a large language model that answers questions and keeps up a \
             conversation. When the user's uploaded documents may hold the answer, Assistant \
             looks them up with a tool before replying.\n\n\
             TOOLS:\n------\n\n\
             Assistant has access to the following tools:\n\n\
             {tool_lines}\n\n\
             To use a tool, use exactly this format:\n\n\
             ```\n\
             Thought: Do I need to use a tool? Yes\n\
             Action: the action to take, one of [{names}]\n\
             Action Input: the input to the action\n\
             Observation: the result of the action\n\
             ```\n\n\
             When you have a response for the {HUMAN_PREFIX}, or no tool is needed, you MUST use \
             this format:\n\n\
             ```\n\
             Thought: Do I need to use a tool? No\n\
             {AI_PREFIX}: [your response here]\n\
             ```\n\n\
             Begin!\n\n\
             Previous conversation history:\n\
             {history}\n\n\
             New input: {input}\n\
             {scratchpad}",
            names = self.tool_names(),
        )
    }
}
