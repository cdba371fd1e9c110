use cbo_core::capability::{
    AnswerDraft, AnswerRequest, CapabilityError, CapabilityFailureKind, CapabilityGuardrails,
    ChapterDigest, ExtractionCapability, ExtractionOutput, ExtractionRequest, ReasoningCapability,
    RelevanceVerdict,
};
use cbo_core::text::truncate_chars;
use serde::Serialize;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::debug;

pub const OP_ENV: &str = "CBO_CAPABILITY_OP";
const POLL_INTERVAL: Duration = Duration::from_millis(10);
const STDERR_EXCERPT_CHARS: usize = 400;

#[derive(Serialize)]
struct RelevancePayload<'a> {
    chapter: &'a ChapterDigest,
    objective: &'a str,
}

/// Bridges both capabilities to an external command.
///
/// The command runs under `bash -lc` with the operation name in `CBO_CAPABILITY_OP`
/// (`answer`, `classify_relevance` or `extract`), the request as JSON on stdin, and must
/// print one JSON document on stdout.
#[derive(Debug, Clone)]
pub struct CommandCapability {
    command: String,
    working_dir: Option<PathBuf>,
}

impl CommandCapability {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            working_dir: None,
        }
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    fn run<T: Serialize>(
        &self,
        op: &str,
        payload: &T,
        guardrails: &CapabilityGuardrails,
    ) -> Result<String, CapabilityError> {
        let input = serde_json::to_vec(payload).map_err(|err| {
            CapabilityError::new(
                CapabilityFailureKind::ProviderError,
                format!("failed to encode {op} request: {err}"),
            )
        })?;

        let mut command = Command::new("bash");
        command
            .arg("-lc")
            .arg(&self.command)
            .env(OP_ENV, op)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }
        let mut child = command.spawn().map_err(|err| {
            CapabilityError::new(
                CapabilityFailureKind::Unavailable,
                format!("failed to start capability command: {err}"),
            )
        })?;

        if let Some(mut stdin) = child.stdin.take() {
            std::thread::spawn(move || {
                let _ = stdin.write_all(&input);
            });
        }
        let stdout = child.stdout.take().map(read_to_end);
        let stderr = child.stderr.take().map(read_to_end);

        let deadline = Instant::now() + Duration::from_millis(guardrails.timeout_ms.max(1));
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) if Instant::now() >= deadline => {
                    let _ = child.kill();
                    let _ = child.wait();
                    debug!(op, timeout_ms = guardrails.timeout_ms, "capability_command_timeout");
                    return Err(CapabilityError::timeout(guardrails.timeout_ms));
                }
                Ok(None) => std::thread::sleep(POLL_INTERVAL),
                Err(err) => {
                    return Err(CapabilityError::new(
                        CapabilityFailureKind::ProviderError,
                        format!("failed to wait for capability command: {err}"),
                    ))
                }
            }
        };

        let stdout = join_output(stdout);
        let stderr = join_output(stderr);
        if !status.success() {
            return Err(CapabilityError::new(
                CapabilityFailureKind::ProviderError,
                format!(
                    "capability command exited with {status}: {}",
                    truncate_chars(stderr.trim(), STDERR_EXCERPT_CHARS)
                ),
            ));
        }
        debug!(op, bytes = stdout.len(), "capability_command_finished");
        Ok(stdout)
    }
}

fn read_to_end<R: Read + Send + 'static>(mut reader: R) -> JoinHandle<String> {
    std::thread::spawn(move || {
        let mut buffer = Vec::new();
        let _ = reader.read_to_end(&mut buffer);
        String::from_utf8_lossy(&buffer).to_string()
    })
}

fn join_output(handle: Option<JoinHandle<String>>) -> String {
    handle
        .and_then(|handle| handle.join().ok())
        .unwrap_or_default()
}

impl ReasoningCapability for CommandCapability {
    fn answer(
        &self,
        request: &AnswerRequest,
        guardrails: &CapabilityGuardrails,
    ) -> Result<AnswerDraft, CapabilityError> {
        let raw = self.run("answer", request, guardrails)?;
        AnswerDraft::parse_json(raw.trim())
    }

    fn classify_relevance(
        &self,
        chapter: &ChapterDigest,
        objective: &str,
        guardrails: &CapabilityGuardrails,
    ) -> Result<bool, CapabilityError> {
        let payload = RelevancePayload { chapter, objective };
        let raw = self.run("classify_relevance", &payload, guardrails)?;
        let verdict = serde_json::from_str::<RelevanceVerdict>(raw.trim()).map_err(|err| {
            CapabilityError::new(
                CapabilityFailureKind::InvalidOutput,
                format!("relevance output parse error: {err}"),
            )
        })?;
        Ok(verdict.relevant)
    }
}

impl ExtractionCapability for CommandCapability {
    fn extract(
        &self,
        request: &ExtractionRequest,
        guardrails: &CapabilityGuardrails,
    ) -> Result<ExtractionOutput, CapabilityError> {
        let raw = self.run("extract", request, guardrails)?;
        ExtractionOutput::parse_json(raw.trim())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cbo_core::brain_contracts::Confidence;

    fn guardrails(timeout_ms: u64) -> CapabilityGuardrails {
        CapabilityGuardrails {
            timeout_ms,
            ..CapabilityGuardrails::default()
        }
    }

    fn digest() -> ChapterDigest {
        ChapterDigest {
            chapter_id: "4".to_string(),
            reason: "founding years".to_string(),
            index_terms: Vec::new(),
        }
    }

    #[test]
    fn parses_answer_from_stdout() {
        let capability =
            CommandCapability::new(r#"printf '{"answer":"Jane founded Acme.","confidence":"high"}'"#);
        let draft = capability
            .answer(&AnswerRequest::default(), &guardrails(5_000))
            .expect("answer");
        assert_eq!(draft.answer, "Jane founded Acme.");
        assert_eq!(draft.confidence, Confidence::High);
    }

    #[test]
    fn request_arrives_on_stdin_with_the_operation_name() {
        let capability = CommandCapability::new(
            r#"[ "$CBO_CAPABILITY_OP" = classify_relevance ] && grep -q founding && echo '{"relevant":true}' || echo '{"relevant":false}'"#,
        );
        let relevant = capability
            .classify_relevance(&digest(), "Who founded Acme?", &guardrails(5_000))
            .expect("classify");
        assert!(relevant);
    }

    #[test]
    fn malformed_output_is_invalid() {
        let capability = CommandCapability::new("echo not-json");
        let err = capability
            .extract(
                &ExtractionRequest {
                    brain: "acme".to_string(),
                    chapter_id: "4".to_string(),
                    objective: "q".to_string(),
                    existing_files: Vec::new(),
                },
                &guardrails(5_000),
            )
            .expect_err("invalid");
        assert_eq!(err.kind, CapabilityFailureKind::InvalidOutput);
    }

    #[test]
    fn non_zero_exit_is_a_provider_error() {
        let capability = CommandCapability::new("echo boom >&2; exit 3");
        let err = capability
            .classify_relevance(&digest(), "q", &guardrails(5_000))
            .expect_err("exit");
        assert_eq!(err.kind, CapabilityFailureKind::ProviderError);
        assert!(err.message.contains("boom"));
    }

    #[test]
    fn slow_commands_are_killed_at_the_deadline() {
        let capability = CommandCapability::new("exec sleep 5");
        let started = Instant::now();
        let err = capability
            .classify_relevance(&digest(), "q", &guardrails(100))
            .expect_err("timeout");
        assert_eq!(err.kind, CapabilityFailureKind::Timeout);
        assert!(started.elapsed() < Duration::from_secs(4));
    }
}
