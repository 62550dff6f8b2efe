//! Prompt-driven state machine for interactive device shells.
//!
//! Each line a device prints is classified against a single [`RegexSet`]
//! built from a [`DeviceTemplate`]: a privilege-mode prompt, a pagination
//! marker, an error message, a question that needs an automatic answer, or
//! plain output. The handler remembers the last classified state so a session
//! can ask for the command path to another mode (for example `enable`).

use std::collections::{HashMap, HashSet, VecDeque};
use std::ops::Range;

use log::trace;
use once_cell::sync::Lazy;
use regex::{Regex, RegexSet};

use crate::error::ConnectError;

const OUTPUT: usize = 0;
const MORE: usize = 1;
const ERROR: usize = 2;

/// What to type when an input state is reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Answer {
    /// Fixed text, sent as is.
    Literal(String),
    /// Looked up in the handler's parameters at runtime (passwords).
    Param(String),
}

/// A state that expects the session to type something back.
#[derive(Debug, Clone)]
pub struct InputRule {
    pub state: String,
    pub patterns: Vec<String>,
    pub answer: Answer,
    /// Keep the question line in the captured output.
    pub echo: bool,
}

/// One edge of the mode graph: typing `command` in `from` lands in `to`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub from: String,
    pub command: String,
    pub to: String,
}

impl Transition {
    pub fn new(from: &str, command: &str, to: &str) -> Self {
        Self {
            from: from.to_ascii_lowercase(),
            command: command.to_string(),
            to: to.to_ascii_lowercase(),
        }
    }
}

/// Declarative description of a platform's shell.
#[derive(Debug, Clone, Default)]
pub struct DeviceTemplate {
    /// Mode name and the prompt patterns that identify it.
    pub prompts: Vec<(String, Vec<String>)>,
    pub inputs: Vec<InputRule>,
    pub more: Vec<String>,
    pub errors: Vec<String>,
    pub transitions: Vec<Transition>,
}

impl DeviceTemplate {
    /// Compiles the template into a handler. `params` feeds [`Answer::Param`].
    pub fn build(&self, params: HashMap<String, String>) -> Result<DeviceHandler, ConnectError> {
        let mut states = vec!["output".to_string(), "more".to_string(), "error".to_string()];
        let mut patterns: Vec<String> = Vec::new();
        let mut owner: Vec<usize> = Vec::new();

        for pattern in &self.more {
            patterns.push(pattern.clone());
            owner.push(MORE);
        }
        for pattern in &self.errors {
            patterns.push(pattern.clone());
            owner.push(ERROR);
        }

        let prompt_start = states.len();
        for (state, prompt_patterns) in &self.prompts {
            let index = states.len();
            states.push(state.to_ascii_lowercase());
            for pattern in prompt_patterns {
                // Prompts may be preceded by NUL padding and a bare carriage return.
                patterns.push(format!(r"^\x00*\r?{}", pattern.trim_start_matches('^')));
                owner.push(index);
            }
        }
        let prompt_states = prompt_start..states.len();

        let mut answers = HashMap::new();
        for rule in &self.inputs {
            let index = states.len();
            states.push(rule.state.to_ascii_lowercase());
            for pattern in &rule.patterns {
                patterns.push(pattern.clone());
                owner.push(index);
            }
            answers.insert(index, (rule.answer.clone(), rule.echo));
        }
        answers.insert(MORE, (Answer::Literal(" ".to_string()), false));

        let set = RegexSet::new(&patterns).map_err(|err| {
            ConnectError::InvalidDeviceHandlerConfig(format!("state patterns: {err}"))
        })?;

        for edge in &self.transitions {
            for end in [&edge.from, &edge.to] {
                if !states.contains(end) {
                    return Err(ConnectError::InvalidDeviceHandlerConfig(format!(
                        "transition references unknown state '{end}'"
                    )));
                }
            }
        }

        Ok(DeviceHandler {
            states,
            set,
            owner,
            prompt_states,
            answers,
            transitions: self.transitions.clone(),
            params,
            current: OUTPUT,
            prompt: None,
        })
    }
}

/// Runtime classifier for one shell session.
#[derive(Debug)]
pub struct DeviceHandler {
    states: Vec<String>,
    set: RegexSet,
    /// Pattern index to state index.
    owner: Vec<usize>,
    prompt_states: Range<usize>,
    answers: HashMap<usize, (Answer, bool)>,
    transitions: Vec<Transition>,
    params: HashMap<String, String>,
    current: usize,
    prompt: Option<String>,
}

impl DeviceHandler {
    fn classify(&self, line: &str) -> usize {
        self.set
            .matches(line)
            .iter()
            .next()
            .and_then(|pattern| self.owner.get(pattern).copied())
            .unwrap_or(OUTPUT)
    }

    /// Feeds one line of device output and updates the current state.
    pub fn read(&mut self, line: &str) {
        let state = self.classify(line);
        trace!("{:?} => {}", line, self.states[state]);
        if self.prompt_states.contains(&state) {
            self.prompt = Some(line.to_string());
        }
        self.current = state;
    }

    /// True when `line` is one of the mode prompts. Does not change state.
    pub fn read_prompt(&self, line: &str) -> bool {
        self.prompt_states.contains(&self.classify(line))
    }

    /// Returns the text to send when `line` is a question, and whether the
    /// question should stay in the captured output.
    pub fn read_need_write(&self, line: &str) -> Option<(String, bool)> {
        let (answer, echo) = self.answers.get(&self.classify(line))?;
        let text = match answer {
            Answer::Literal(text) => text.clone(),
            Answer::Param(key) => self.params.get(key)?.clone(),
        };
        Some((text, *echo))
    }

    pub fn current_state(&self) -> &str {
        &self.states[self.current]
    }

    /// The last prompt line seen.
    pub fn current_prompt(&self) -> Option<&str> {
        self.prompt.as_deref()
    }

    pub fn error(&self) -> bool {
        self.current == ERROR
    }

    /// True when the template declares `state` as a mode prompt.
    pub fn has_mode(&self, state: &str) -> bool {
        let state = state.to_ascii_lowercase();
        self.states[self.prompt_states.clone()].contains(&state)
    }

    /// Shortest list of `(command, expected_state)` steps from the current
    /// mode to `target`. Empty when already there.
    pub fn trans_state_write(&self, target: &str) -> Result<Vec<(String, String)>, ConnectError> {
        let target = target.to_ascii_lowercase();
        let start = self.current_state().to_string();
        if start == target {
            return Ok(Vec::new());
        }

        let mut visited = HashSet::from([start.clone()]);
        let mut queue = VecDeque::from([start.clone()]);
        let mut came_from: HashMap<String, &Transition> = HashMap::new();

        while let Some(node) = queue.pop_front() {
            if node == target {
                break;
            }
            for edge in self.transitions.iter().filter(|edge| edge.from == node) {
                if visited.insert(edge.to.clone()) {
                    came_from.insert(edge.to.clone(), edge);
                    queue.push_back(edge.to.clone());
                }
            }
        }

        let mut path = Vec::new();
        let mut node = target.clone();
        while node != start {
            let edge = came_from
                .get(&node)
                .ok_or_else(|| ConnectError::UnreachableState(target.clone()))?;
            path.push((edge.command.clone(), edge.to.clone()));
            node = edge.from.clone();
        }
        path.reverse();
        trace!("path to {target}: {path:?}");
        Ok(path)
    }
}

/// Carriage returns and backspaces a terminal uses to redraw the start of a line.
pub static IGNORE_START_LINE: Lazy<Regex> = Lazy::new(|| {
    match Regex::new(r"^(\r+(\s+\r+)*)|(\u{8}+(\s+\u{8}+)*)") {
        Ok(re) => re,
        Err(err) => panic!("invalid IGNORE_START_LINE regex: {err}"),
    }
});

#[cfg(test)]
mod tests {
    use super::*;

    fn switch() -> DeviceHandler {
        DeviceTemplate {
            prompts: vec![
                ("User".to_string(), vec![r"^sw>\s*$".to_string()]),
                ("Enable".to_string(), vec![r"^sw#\s*$".to_string()]),
            ],
            inputs: vec![
                InputRule {
                    state: "EnablePassword".to_string(),
                    patterns: vec![r"^Password:\s*$".to_string()],
                    answer: Answer::Param("secret".to_string()),
                    echo: true,
                },
                InputRule {
                    state: "Confirm".to_string(),
                    patterns: vec![r"\[confirm\]\s*$".to_string()],
                    answer: Answer::Literal("\n".to_string()),
                    echo: false,
                },
            ],
            more: vec![r"--More--".to_string()],
            errors: vec![r"^% .+".to_string()],
            transitions: vec![
                Transition::new("User", "enable", "Enable"),
                Transition::new("Enable", "disable", "User"),
            ],
        }
        .build(HashMap::from([("secret".to_string(), "pw\n".to_string())]))
        .expect("valid template")
    }

    #[test]
    fn prompt_lines_set_mode_and_prompt() {
        let mut handler = switch();
        assert_eq!(handler.current_state(), "output");
        handler.read("\r\x00sw>");
        assert_eq!(handler.current_state(), "user");
        handler.read("sw#");
        assert_eq!(handler.current_prompt(), Some("sw#"));
        assert!(handler.has_mode("ENABLE"));
        assert!(!handler.has_mode("confirm"));
    }

    #[test]
    fn error_lines_are_flagged() {
        let mut handler = switch();
        handler.read("% Invalid input detected");
        assert!(handler.error());
        handler.read("hostname sw");
        assert!(!handler.error());
        assert_eq!(handler.current_state(), "output");
    }

    #[test]
    fn questions_get_answers() {
        let handler = switch();
        assert_eq!(
            handler.read_need_write("Password:"),
            Some(("pw\n".to_string(), true))
        );
        assert_eq!(
            handler.read_need_write("Destination filename [startup]? [confirm]"),
            Some(("\n".to_string(), false))
        );
        assert_eq!(
            handler.read_need_write(" --More-- "),
            Some((" ".to_string(), false))
        );
        assert_eq!(handler.read_need_write("hostname sw"), None);
    }

    #[test]
    fn missing_param_yields_no_answer() {
        let mut template = DeviceTemplate::default();
        template.inputs.push(InputRule {
            state: "Password".to_string(),
            patterns: vec!["^Password:".to_string()],
            answer: Answer::Param("absent".to_string()),
            echo: false,
        });
        let handler = template.build(HashMap::new()).expect("valid template");
        assert_eq!(handler.read_need_write("Password:"), None);
    }

    #[test]
    fn path_to_enable_is_found() {
        let mut handler = switch();
        handler.read("sw>");
        assert_eq!(
            handler.trans_state_write("Enable").expect("reachable"),
            vec![("enable".to_string(), "enable".to_string())]
        );
        handler.read("sw#");
        assert!(handler.trans_state_write("enable").expect("here").is_empty());
    }

    #[test]
    fn unreachable_mode_is_an_error() {
        let mut handler = switch();
        handler.read("sw>");
        match handler.trans_state_write("config") {
            Err(ConnectError::UnreachableState(state)) => assert_eq!(state, "config"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn bad_patterns_and_dangling_edges_are_rejected() {
        let bad = DeviceTemplate {
            prompts: vec![("User".to_string(), vec!["[".to_string()])],
            ..Default::default()
        };
        assert!(matches!(
            bad.build(HashMap::new()),
            Err(ConnectError::InvalidDeviceHandlerConfig(_))
        ));

        let dangling = DeviceTemplate {
            prompts: vec![("User".to_string(), vec![">$".to_string()])],
            transitions: vec![Transition::new("User", "enable", "Ghost")],
            ..Default::default()
        };
        assert!(matches!(
            dangling.build(HashMap::new()),
            Err(ConnectError::InvalidDeviceHandlerConfig(msg)) if msg.contains("ghost")
        ));
    }
}
