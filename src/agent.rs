//! Bounded ReAct reasoning loop.
//!
//! Each iteration asks the language model to continue a transcript in the
//! `Thought / Action / Action Input / Observation` format:
//!
//! ```text
//!   THINK ──► Final Answer ────────────────► done
//!     │
//!     ├─► Action + Action Input ─► ACT ─► OBSERVE ─┐
//!     │                                            │
//!     └─► thought only ─► OBSERVE (format hint) ───┴─► THINK (next iteration)
//! ```
//!
//! The loop runs at most `max_iterations` THINK steps. Output that cannot
//! be read at all ([`ParsedStep::Unparseable`]) gets `parse_retries`
//! re-prompts within the same step; after that the run fails with
//! [`Error::AgentParse`]. Running out of iterations fails with
//! [`Error::AgentIterationExhausted`]. Either way the caller falls back.
//!
//! Every model call goes through [`complete_with_timeout`], so the total
//! running time is bounded by
//! `max_iterations * (1 + parse_retries) * timeout` plus tool time.

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::llm::{complete_with_timeout, CompletionRequest, LanguageModel};
use crate::models::AgentStep;
use crate::tools::ToolRegistry;

const FINAL_MARKER: &str = "Final Answer:";
const ACTION_MARKER: &str = "Action:";
const INPUT_MARKER: &str = "Action Input:";
const OBSERVATION_STOP: &str = "\nObservation:";

const MISSING_ACTION: &str = "Invalid Format: Missing 'Action:' after 'Thought:'";
const FORMAT_REMINDER: &str = "Reply with 'Action:' and 'Action Input:' lines, \
or with a 'Final Answer:' line.";

/// One THINK step, as read from model output.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedStep {
    /// Reasoning with neither an action nor an answer.
    Thought(String),
    Action {
        thought: String,
        tool: String,
        input: String,
    },
    Final {
        thought: String,
        answer: String,
    },
    /// Output that does not fit the format; carries the reason.
    Unparseable(String),
}

/// Read one model continuation.
///
/// Anything after an `Observation:` line is ignored: the model is asked to
/// stop there, and an observation it invents is not a real one.
pub fn parse_step(output: &str) -> ParsedStep {
    let text = match output.find(OBSERVATION_STOP) {
        Some(pos) => &output[..pos],
        None => output,
    }
    .trim();

    if text.is_empty() {
        return ParsedStep::Unparseable("empty output".to_string());
    }

    match (text.find(FINAL_MARKER), text.find(ACTION_MARKER)) {
        (Some(_), Some(_)) => {
            ParsedStep::Unparseable("output has both a final answer and an action".to_string())
        }
        (Some(pos), None) => {
            let answer = text[pos + FINAL_MARKER.len()..].trim();
            if answer.is_empty() {
                return ParsedStep::Unparseable("'Final Answer:' is empty".to_string());
            }
            ParsedStep::Final {
                thought: clean_thought(&text[..pos]),
                answer: answer.to_string(),
            }
        }
        (None, Some(pos)) => {
            let rest = &text[pos + ACTION_MARKER.len()..];
            let Some(input_pos) = rest.find(INPUT_MARKER) else {
                return ParsedStep::Unparseable(
                    "'Action:' is not followed by 'Action Input:'".to_string(),
                );
            };
            let tool = rest[..input_pos]
                .trim()
                .trim_matches(|c: char| matches!(c, '`' | '[' | ']' | '"'))
                .trim();
            if tool.is_empty() {
                return ParsedStep::Unparseable("'Action:' names no tool".to_string());
            }
            let input = rest[input_pos + INPUT_MARKER.len()..]
                .trim()
                .trim_matches('"')
                .trim();
            ParsedStep::Action {
                thought: clean_thought(&text[..pos]),
                tool: tool.to_string(),
                input: input.to_string(),
            }
        }
        (None, None) => ParsedStep::Thought(clean_thought(text)),
    }
}

fn clean_thought(s: &str) -> String {
    let s = s.trim();
    s.strip_prefix("Thought:").unwrap_or(s).trim().to_string()
}

/// Outcome of a successful run.
#[derive(Debug, Clone)]
pub struct AgentRun {
    pub answer: String,
    /// Tool calls made along the way, in order.
    pub steps: Vec<AgentStep>,
    /// THINK steps used, including the final one.
    pub iterations: usize,
}

pub struct ReasoningAgent {
    llm: Arc<dyn LanguageModel>,
    max_iterations: usize,
    parse_retries: usize,
    temperature: f32,
    timeout_secs: u64,
}

impl ReasoningAgent {
    /// Create an agent, checking once that the language model is reachable.
    pub async fn new(config: &Config, llm: Arc<dyn LanguageModel>) -> Result<Self> {
        if !llm.health_check().await {
            return Err(Error::AgentUnavailable(format!(
                "language model '{}' is not reachable",
                llm.model_name()
            )));
        }
        info!(model = llm.model_name(), "Reasoning agent ready");

        Ok(Self {
            llm,
            max_iterations: config.agent.max_iterations,
            parse_retries: config.agent.parse_retries,
            temperature: config.llm.temperature,
            timeout_secs: config.llm.timeout_secs,
        })
    }

    /// Answer `question`, calling tools from `tools` as the model chooses.
    pub async fn run(&self, question: &str, tools: &ToolRegistry) -> Result<AgentRun> {
        if tools.is_empty() {
            return Err(Error::AgentUnavailable("no tools registered".to_string()));
        }
        debug!(tools = tools.len(), max_iterations = self.max_iterations, "Agent run started");

        let mut scratchpad = String::new();
        let mut steps = Vec::new();

        for iteration in 1..=self.max_iterations {
            let (parsed, raw) = self.think(question, tools, &scratchpad).await?;

            match parsed {
                ParsedStep::Final { answer, .. } => {
                    info!(iteration, tool_calls = steps.len(), "Agent reached final answer");
                    return Ok(AgentRun {
                        answer,
                        steps,
                        iterations: iteration,
                    });
                }
                ParsedStep::Action {
                    thought,
                    tool,
                    input,
                } => {
                    let observation = match tools.find(&tool) {
                        Some(t) => t.invoke(&input).await,
                        None => format!(
                            "{} is not a valid tool, try one of [{}].",
                            tool,
                            tools.names()
                        ),
                    };
                    debug!(iteration, %tool, %input, "Agent action observed");
                    push_step(&mut scratchpad, &raw, &observation);
                    steps.push(AgentStep {
                        thought,
                        tool,
                        tool_input: input,
                        observation,
                    });
                }
                ParsedStep::Thought(_) => {
                    debug!(iteration, "Agent produced a thought without an action");
                    push_step(&mut scratchpad, &raw, MISSING_ACTION);
                }
                ParsedStep::Unparseable(reason) => return Err(Error::AgentParse(reason)),
            }
        }

        warn!(
            iterations = self.max_iterations,
            "Agent stopped without a final answer"
        );
        Err(Error::AgentIterationExhausted {
            iterations: self.max_iterations,
        })
    }

    /// One THINK step. Unparseable output is re-prompted up to
    /// `parse_retries` times; it is never returned.
    async fn think(
        &self,
        question: &str,
        tools: &ToolRegistry,
        scratchpad: &str,
    ) -> Result<(ParsedStep, String)> {
        let mut pad = scratchpad.to_string();
        let mut retries = 0;

        loop {
            let request = CompletionRequest {
                system: String::new(),
                prompt: render_prompt(question, tools, &pad),
                temperature: self.temperature,
                stop: vec![OBSERVATION_STOP.to_string()],
            };
            let raw = complete_with_timeout(self.llm.as_ref(), &request, self.timeout_secs).await?;

            match parse_step(&raw) {
                ParsedStep::Unparseable(reason) => {
                    if retries >= self.parse_retries {
                        return Err(Error::AgentParse(reason));
                    }
                    retries += 1;
                    warn!(%reason, retries, "Unparseable agent output, re-prompting");
                    push_step(
                        &mut pad,
                        &raw,
                        &format!("Invalid Format: {}. {}", reason, FORMAT_REMINDER),
                    );
                }
                parsed => return Ok((parsed, raw)),
            }
        }
    }
}

fn push_step(scratchpad: &mut String, raw: &str, observation: &str) {
    let log = match raw.find(OBSERVATION_STOP) {
        Some(pos) => &raw[..pos],
        None => raw,
    };
    scratchpad.push_str(log.trim());
    scratchpad.push_str("\nObservation: ");
    scratchpad.push_str(observation.trim());
    scratchpad.push_str("\nThought: ");
}

fn render_prompt(question: &str, tools: &ToolRegistry, scratchpad: &str) -> String {
    let descriptions = tools
        .tools()
        .iter()
        .map(|t| format!("{}: {}", t.name(), t.description()))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "Answer the following questions as best you can. You have access to the following tools:\n\
         \n\
         {descriptions}\n\
         \n\
         Use the following format:\n\
         \n\
         Question: the input question you must answer\n\
         Thought: you should always think about what to do\n\
         Action: the action to take, should be one of [{names}]\n\
         Action Input: the input to the action\n\
         Observation: the result of the action\n\
         ... (this Thought/Action/Action Input/Observation can repeat N times)\n\
         Thought: I now know the final answer\n\
         Final Answer: the final answer to the original input question\n\
         \n\
         Begin!\n\
         \n\
         Question: {question}\n\
         Thought:{scratchpad}",
        descriptions = descriptions,
        names = tools.names(),
        question = question,
        scratchpad = scratchpad,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::Tool;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::path::Path;
    use std::sync::Mutex;

    /// Replays canned outputs; repeats the last one once the script runs out.
    struct ScriptedModel {
        script: Mutex<VecDeque<String>>,
        last: Mutex<String>,
        requests: Mutex<Vec<CompletionRequest>>,
        healthy: bool,
    }

    impl ScriptedModel {
        fn new(outputs: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(outputs.iter().map(|s| s.to_string()).collect()),
                last: Mutex::new(String::new()),
                requests: Mutex::new(Vec::new()),
                healthy: true,
            })
        }

        fn calls(&self) -> usize {
            self.requests.lock().unwrap().len()
        }

        fn prompt(&self, n: usize) -> String {
            self.requests.lock().unwrap()[n].prompt.clone()
        }
    }

    #[async_trait]
    impl LanguageModel for ScriptedModel {
        fn model_name(&self) -> &str {
            "scripted"
        }
        async fn complete(&self, request: &CompletionRequest) -> Result<String> {
            self.requests.lock().unwrap().push(request.clone());
            let mut last = self.last.lock().unwrap();
            if let Some(next) = self.script.lock().unwrap().pop_front() {
                *last = next;
            }
            Ok(last.clone())
        }
        async fn health_check(&self) -> bool {
            self.healthy
        }
    }

    struct CountingTool {
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Tool for CountingTool {
        fn name(&self) -> &str {
            "knowledge_search"
        }
        fn description(&self) -> &str {
            "Finds stored facts"
        }
        async fn invoke(&self, input: &str) -> String {
            self.calls.lock().unwrap().push(input.to_string());
            "Sarah Johnson is the CEO.".to_string()
        }
    }

    struct SharedTool(Arc<CountingTool>);

    #[async_trait]
    impl Tool for SharedTool {
        fn name(&self) -> &str {
            self.0.name()
        }
        fn description(&self) -> &str {
            self.0.description()
        }
        async fn invoke(&self, input: &str) -> String {
            self.0.invoke(input).await
        }
    }

    fn registry() -> (ToolRegistry, Arc<CountingTool>) {
        let tool = Arc::new(CountingTool {
            calls: Mutex::new(Vec::new()),
        });
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(SharedTool(tool.clone())));
        (registry, tool)
    }

    async fn agent(model: Arc<ScriptedModel>) -> ReasoningAgent {
        let config = Config::with_root(Path::new("/unused"));
        ReasoningAgent::new(&config, model).await.unwrap()
    }

    #[test]
    fn test_parse_action() {
        let step = parse_step(
            " I should search.\nAction: knowledge_search\nAction Input: \"Who is the CEO?\"",
        );
        assert_eq!(
            step,
            ParsedStep::Action {
                thought: "I should search.".to_string(),
                tool: "knowledge_search".to_string(),
                input: "Who is the CEO?".to_string(),
            }
        );
    }

    #[test]
    fn test_parse_final_answer() {
        let step = parse_step("I now know the final answer\nFinal Answer: Sarah Johnson.");
        assert_eq!(
            step,
            ParsedStep::Final {
                thought: "I now know the final answer".to_string(),
                answer: "Sarah Johnson.".to_string(),
            }
        );
    }

    #[test]
    fn test_parse_ignores_invented_observation() {
        let step = parse_step(
            "Action: knowledge_search\nAction Input: ceo\nObservation: made up\nFinal Answer: x",
        );
        assert!(matches!(step, ParsedStep::Action { ref input, .. } if input == "ceo"));
    }

    #[test]
    fn test_parse_malformed() {
        assert!(matches!(parse_step("   "), ParsedStep::Unparseable(_)));
        assert!(matches!(
            parse_step("Action: knowledge_search"),
            ParsedStep::Unparseable(_)
        ));
        assert!(matches!(
            parse_step("Action: search\nAction Input: q\nFinal Answer: a"),
            ParsedStep::Unparseable(_)
        ));
        assert_eq!(
            parse_step("Let me think about this."),
            ParsedStep::Thought("Let me think about this.".to_string())
        );
    }

    #[tokio::test]
    async fn test_unhealthy_model_is_unavailable() {
        let model = Arc::new(ScriptedModel {
            script: Mutex::new(VecDeque::new()),
            last: Mutex::new(String::new()),
            requests: Mutex::new(Vec::new()),
            healthy: false,
        });
        let config = Config::with_root(Path::new("/unused"));
        assert!(matches!(
            ReasoningAgent::new(&config, model).await,
            Err(Error::AgentUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_empty_registry_is_unavailable() {
        let model = ScriptedModel::new(&["Final Answer: never asked"]);
        let result = agent(model.clone())
            .await
            .run("Say hi", &ToolRegistry::new())
            .await;
        assert!(matches!(result, Err(Error::AgentUnavailable(_))));
        assert!(model.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_direct_final_answer() {
        let model = ScriptedModel::new(&["I know this.\nFinal Answer: Hello!"]);
        let (tools, tool) = registry();
        let run = agent(model.clone()).await.run("Say hi", &tools).await.unwrap();

        assert_eq!(run.answer, "Hello!");
        assert!(run.steps.is_empty());
        assert_eq!(run.iterations, 1);
        assert!(tool.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_action_then_final_answer() {
        let model = ScriptedModel::new(&[
            "I need to look this up.\nAction: knowledge_search\nAction Input: Who is the CEO?",
            "I now know the final answer\nFinal Answer: Sarah Johnson",
        ]);
        let (tools, tool) = registry();
        let run = agent(model.clone())
            .await
            .run("Who is the CEO?", &tools)
            .await
            .unwrap();

        assert_eq!(run.answer, "Sarah Johnson");
        assert_eq!(run.steps.len(), 1);
        assert_eq!(run.steps[0].observation, "Sarah Johnson is the CEO.");
        assert_eq!(*tool.calls.lock().unwrap(), vec!["Who is the CEO?".to_string()]);
        assert!(model
            .prompt(1)
            .contains("Observation: Sarah Johnson is the CEO.\nThought: "));
    }

    #[tokio::test]
    async fn test_requests_use_low_temperature_and_stop() {
        let model = ScriptedModel::new(&["Final Answer: ok"]);
        let (tools, _) = registry();
        agent(model.clone()).await.run("q", &tools).await.unwrap();

        let request = model.requests.lock().unwrap()[0].clone();
        assert!((request.temperature - 0.1).abs() < f32::EPSILON);
        assert_eq!(request.stop, vec![OBSERVATION_STOP.to_string()]);
        assert!(request.prompt.contains("knowledge_search: Finds stored facts"));
    }

    #[tokio::test]
    async fn test_rambling_model_exhausts_iterations() {
        let model = ScriptedModel::new(&["I am not going to follow the format."]);
        let (tools, _) = registry();
        let err = agent(model.clone()).await.run("q", &tools).await.unwrap_err();

        assert!(matches!(err, Error::AgentIterationExhausted { iterations: 3 }));
        assert_eq!(model.calls(), 3);
    }

    #[tokio::test]
    async fn test_endless_actions_exhaust_iterations() {
        let model = ScriptedModel::new(&["Action: knowledge_search\nAction Input: again"]);
        let (tools, tool) = registry();
        let err = agent(model.clone()).await.run("q", &tools).await.unwrap_err();

        assert!(matches!(err, Error::AgentIterationExhausted { .. }));
        assert_eq!(tool.calls.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_unparseable_output_is_retried_once() {
        let model = ScriptedModel::new(&["", "Final Answer: recovered"]);
        let (tools, _) = registry();
        let run = agent(model.clone()).await.run("q", &tools).await.unwrap();

        assert_eq!(run.answer, "recovered");
        assert_eq!(run.iterations, 1);
        assert_eq!(model.calls(), 2);
        assert!(model.prompt(1).contains("Invalid Format: empty output"));
    }

    #[tokio::test]
    async fn test_unparseable_twice_is_parse_error() {
        let model = ScriptedModel::new(&["Action: knowledge_search"]);
        let (tools, _) = registry();
        let err = agent(model.clone()).await.run("q", &tools).await.unwrap_err();

        assert!(matches!(err, Error::AgentParse(_)));
        assert_eq!(model.calls(), 2);
    }

    #[tokio::test]
    async fn test_unknown_tool_becomes_observation() {
        let model = ScriptedModel::new(&[
            "Action: web_search\nAction Input: ceo",
            "Final Answer: done",
        ]);
        let (tools, tool) = registry();
        let run = agent(model.clone()).await.run("q", &tools).await.unwrap();

        assert_eq!(run.iterations, 2);
        assert!(run.steps[0]
            .observation
            .contains("web_search is not a valid tool, try one of [knowledge_search]"));
        assert!(tool.calls.lock().unwrap().is_empty());
    }
}
