use std::time::Duration;

use log::{debug, trace};
use tokio::sync::mpsc::{Receiver, Sender};

use crate::device::{DeviceHandler, IGNORE_START_LINE};
use crate::error::ConnectError;

/// The output of one command.
#[derive(Debug, Clone)]
pub struct Output {
    /// False when the device printed an error line.
    pub success: bool,
    /// What the command printed, without the echoed command and the prompt.
    pub content: String,
    pub prompt: Option<String>,
}

/// Turns transport chunks into text without splitting a UTF-8 sequence that
/// straddles two reads. Invalid bytes become U+FFFD.
#[derive(Debug, Default)]
pub(crate) struct Utf8Decoder {
    tail: Vec<u8>,
}

impl Utf8Decoder {
    pub(crate) fn decode(&mut self, chunk: &[u8]) -> String {
        self.tail.extend_from_slice(chunk);
        let mut text = String::new();
        loop {
            match std::str::from_utf8(&self.tail) {
                Ok(valid) => {
                    text.push_str(valid);
                    self.tail.clear();
                    return text;
                }
                Err(err) => {
                    let valid = err.valid_up_to();
                    text.push_str(&String::from_utf8_lossy(&self.tail[..valid]));
                    match err.error_len() {
                        // Incomplete sequence at the end; wait for the rest.
                        None => {
                            self.tail.drain(..valid);
                            return text;
                        }
                        Some(len) => {
                            text.push(char::REPLACEMENT_CHARACTER);
                            self.tail.drain(..valid + len);
                        }
                    }
                }
            }
        }
    }
}

/// A prompt-driven shell over a pair of transport channels.
///
/// The transport task pushes device output into `recv` in arbitrary chunks
/// and forwards anything sent on `sender` to the device.
pub struct Shell {
    label: String,
    sender: Sender<String>,
    recv: Receiver<String>,
    handler: DeviceHandler,
    prompt: String,
}

impl Shell {
    /// Waits for the first prompt, answering login questions on the way.
    pub async fn attach(
        label: String,
        sender: Sender<String>,
        mut recv: Receiver<String>,
        mut handler: DeviceHandler,
        timeout: Duration,
    ) -> Result<Shell, ConnectError> {
        let mut buffer = String::new();
        let mut received = String::new();

        let waited = tokio::time::timeout(timeout, async {
            loop {
                let Some(data) = recv.recv().await else {
                    return Err(ConnectError::ChannelDisconnectError);
                };
                trace!("{label} init {data:?}");
                buffer.push_str(&data);
                received.push_str(&data);

                while let Some(pos) = buffer.find('\n') {
                    let line: String = buffer.drain(..=pos).collect();
                    handler.read(line.trim_end());
                }
                if buffer.is_empty() {
                    continue;
                }
                if handler.read_prompt(&buffer) {
                    handler.read(&buffer);
                    return Ok(buffer.clone());
                }
                if let Some((answer, _)) = handler.read_need_write(&buffer) {
                    handler.read(&buffer);
                    buffer.clear();
                    sender.send(answer).await?;
                }
            }
        })
        .await;

        let prompt = match waited {
            Ok(result) => result?,
            Err(_) => {
                return Err(ConnectError::InitTimeout(if received.is_empty() {
                    "waiting for initial prompt".to_string()
                } else {
                    received
                }));
            }
        };
        debug!("{label} ready at prompt {prompt:?}");

        Ok(Shell {
            label,
            sender,
            recv,
            handler,
            prompt,
        })
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn current_state(&self) -> &str {
        self.handler.current_state()
    }

    /// Runs commands whose failure does not matter, such as paging setup.
    pub async fn run_setup(&mut self, commands: &[&str], timeout: Duration) {
        for command in commands {
            match self.write_with_timeout(command, timeout).await {
                Ok(output) if !output.success => {
                    debug!("{} setup {command:?} rejected", self.label)
                }
                Ok(_) => {}
                Err(err) => debug!("{} setup {command:?} failed: {err}", self.label),
            }
        }
    }

    /// Sends one command and collects its output up to the next prompt.
    pub async fn write_with_timeout(
        &mut self,
        command: &str,
        timeout: Duration,
    ) -> Result<Output, ConnectError> {
        let handler = &mut self.handler;
        let recv = &mut self.recv;
        let sender = &self.sender;

        // Drop anything that arrived since the last prompt.
        while recv.try_recv().is_ok() {}

        sender.send(format!("{command}\n")).await?;

        let mut captured = String::new();
        let mut buffer = String::new();

        let result = tokio::time::timeout(timeout, async {
            let mut failed = false;
            loop {
                let Some(data) = recv.recv().await else {
                    return Err(ConnectError::ChannelDisconnectError);
                };
                buffer.push_str(&data);

                while let Some(pos) = buffer.find('\n') {
                    let line: String = buffer.drain(..=pos).collect();
                    let line = IGNORE_START_LINE.replace(&line, "");
                    handler.read(line.trim_end());
                    if handler.error() {
                        failed = true;
                    }
                    captured.push_str(line.trim_end_matches(['\r', '\n']));
                    captured.push('\n');
                }

                // Prompts and questions arrive without a trailing newline.
                if buffer.is_empty() {
                    continue;
                }
                if handler.read_prompt(&buffer) {
                    handler.read(&buffer);
                    captured.push_str(&buffer);
                    return Ok((!failed, std::mem::take(&mut buffer)));
                }
                if let Some((answer, echo)) = handler.read_need_write(&buffer) {
                    handler.read(&buffer);
                    if !echo {
                        buffer.clear();
                    }
                    trace!("answering {answer:?}");
                    sender.send(answer).await?;
                }
            }
        })
        .await;

        let success = match result {
            Err(_) => return Err(ConnectError::ExecTimeout(captured)),
            Ok(Err(err)) => return Err(err),
            Ok(Ok((success, prompt))) => {
                self.prompt = prompt;
                success
            }
        };

        let mut content = captured.as_str();
        if !command.is_empty()
            && let Some(rest) = content.strip_prefix(command)
        {
            content = rest.trim_start_matches(['\r', '\n']);
        }
        let content = match content.rfind('\n') {
            Some(pos) => &content[..pos],
            None => "",
        };

        Ok(Output {
            success,
            content: content.to_string(),
            prompt: self.handler.current_prompt().map(str::to_string),
        })
    }

    /// Moves to `mode` along the template's transitions.
    pub async fn enter_mode(&mut self, mode: &str, timeout: Duration) -> Result<(), ConnectError> {
        for (command, expected) in self.handler.trans_state_write(mode)? {
            debug!("{} {command:?} towards {mode}", self.label);
            let output = self.write_with_timeout(&command, timeout).await?;
            if !output.success || self.handler.current_state() != expected {
                return Err(ConnectError::UnreachableState(format!(
                    "{mode} (stuck in {} after {command:?}: {})",
                    self.handler.current_state(),
                    output.content.trim()
                )));
            }
        }
        Ok(())
    }

    /// Says goodbye. The transport closes when the shell is dropped.
    pub async fn close(&mut self) {
        self.recv.close();
        if let Err(err) = self.sender.send("exit\n".to_string()).await {
            trace!("{} exit not sent: {err}", self.label);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use tokio::sync::mpsc;

    use super::*;
    use crate::templates;

    /// A device that answers each command from a script, echoing it first.
    fn fake_device(
        banner: &'static str,
        script: HashMap<&'static str, Vec<&'static str>>,
    ) -> (Sender<String>, Receiver<String>) {
        let (to_device, mut from_user) = mpsc::channel::<String>(16);
        let (to_user, from_device) = mpsc::channel::<String>(16);
        tokio::spawn(async move {
            if to_user.send(banner.to_string()).await.is_err() {
                return;
            }
            while let Some(input) = from_user.recv().await {
                let key = input.trim_end_matches('\n');
                let chunks = script
                    .get(key)
                    .cloned()
                    .unwrap_or_else(|| vec!["\r\nsw#"]);
                if to_user.send(key.to_string()).await.is_err() {
                    return;
                }
                for chunk in chunks {
                    if to_user.send(chunk.to_string()).await.is_err() {
                        return;
                    }
                }
            }
        });
        (to_device, from_device)
    }

    async fn shell(script: HashMap<&'static str, Vec<&'static str>>) -> Shell {
        let (tx, rx) = fake_device("Welcome\r\nsw>", script);
        let handler = templates::cisco_ios()
            .handler("admin", "pw", Some("en"))
            .expect("template");
        Shell::attach(
            "sw".to_string(),
            tx,
            rx,
            handler,
            Duration::from_secs(5),
        )
        .await
        .expect("attach")
    }

    #[test]
    fn split_multibyte_characters_are_joined() {
        let text = "Zürich \u{2713}".as_bytes();
        let mut decoder = Utf8Decoder::default();
        let mut joined = String::new();
        for chunk in text.chunks(1) {
            joined.push_str(&decoder.decode(chunk));
        }
        assert_eq!(joined, "Zürich \u{2713}");
        assert_eq!(decoder.decode(b"ok\xffok"), "ok\u{FFFD}ok");
    }

    #[tokio::test]
    async fn output_strips_echo_and_prompt() {
        let script = HashMap::from([(
            "show run",
            vec!["\r\nhostname sw\r\n", "interface Gi0/1\r\n", " shutdown\r\nsw>"],
        )]);
        let mut shell = shell(script).await;
        assert_eq!(shell.prompt(), "sw>");

        let output = shell
            .write_with_timeout("show run", Duration::from_secs(5))
            .await
            .expect("output");
        assert!(output.success);
        assert_eq!(output.content, "hostname sw\ninterface Gi0/1\n shutdown");
        assert_eq!(output.prompt.as_deref(), Some("sw>"));
    }

    #[tokio::test]
    async fn enable_answers_secret_then_reaches_mode() {
        let script = HashMap::from([
            ("enable", vec!["\r\nPassword: "]),
            ("en", vec!["\r\nsw#"]),
            ("show clock", vec!["\r\n12:00:00 UTC\r\nsw#"]),
        ]);
        let mut shell = shell(script).await;
        shell
            .enter_mode("enable", Duration::from_secs(5))
            .await
            .expect("enable");
        assert_eq!(shell.current_state(), "enable");
        let output = shell
            .write_with_timeout("show clock", Duration::from_secs(5))
            .await
            .expect("output");
        assert_eq!(output.content, "12:00:00 UTC");
    }

    #[tokio::test]
    async fn error_line_marks_failure() {
        let script = HashMap::from([(
            "bogus",
            vec!["\r\n% Invalid input detected at '^' marker.\r\nsw>"],
        )]);
        let mut shell = shell(script).await;
        let output = shell
            .write_with_timeout("bogus", Duration::from_secs(5))
            .await
            .expect("output");
        assert!(!output.success);
    }

    #[tokio::test]
    async fn silence_times_out_with_partial_output() {
        let script = HashMap::from([("slow", vec!["\r\npartial line\r\n"])]);
        let mut shell = shell(script).await;
        match shell
            .write_with_timeout("slow", Duration::from_millis(200))
            .await
        {
            Err(ConnectError::ExecTimeout(partial)) => assert!(partial.contains("partial line")),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
