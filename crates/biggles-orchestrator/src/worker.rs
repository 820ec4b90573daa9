use crate::profiles::StageProfile;
use crate::types::{dedup_links, Stage, WorkerOutput};
use async_trait::async_trait;
use biggles_core::{BigglesError, BigglesResult};
use biggles_knowledge::KnowledgeStore;
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};
use uuid::Uuid;

/// Shortest excerpt of a stored document shown in a prompt.
const MIN_EXCERPT_CHARS: usize = 200;

/// What a worker can see when invoked.
#[derive(Clone)]
pub struct WorkerContext {
    pub run_id: Uuid,
    pub topic: String,
    /// Narrowed subject for the research stages, derived from the scout output.
    pub focus: String,
    pub stage: Stage,
    pub attempt: u32,
    /// Authoritative outputs of the stages that ran before this one.
    pub prior: BTreeMap<Stage, WorkerOutput>,
    /// Shared store. Workers may add their own documents; they never mutate others'.
    pub store: Arc<KnowledgeStore>,
}

/// A stage-specific unit that turns a task description into text and links.
#[async_trait]
pub trait Worker: Send + Sync {
    /// Contributor id for documents stored from this worker's output.
    fn name(&self) -> &str;

    /// Task description for this invocation.
    fn task(&self, ctx: &WorkerContext) -> String {
        format!(
            "{} research on {} (topic: {})",
            ctx.stage, ctx.focus, ctx.topic
        )
    }

    async fn invoke(&self, task: &str, ctx: &WorkerContext) -> BigglesResult<WorkerOutput>;
}

/// External text-completion capability (a language model, a script, ...).
#[async_trait]
pub trait TextCompletion: Send + Sync {
    async fn complete(&self, system: &str, prompt: &str) -> BigglesResult<String>;
}

/// A worker driven by a [`StageProfile`] and a [`TextCompletion`] backend.
pub struct CompletionWorker {
    profile: StageProfile,
    backend: Arc<dyn TextCompletion>,
}

impl CompletionWorker {
    pub fn new(profile: StageProfile, backend: Arc<dyn TextCompletion>) -> Self {
        Self { profile, backend }
    }

    pub fn profile(&self) -> &StageProfile {
        &self.profile
    }

    /// Prior outputs and the store listing each get `context_limit` characters,
    /// so long research output never crowds the store out of a synthesis prompt.
    async fn build_prompt(&self, task: &str, ctx: &WorkerContext) -> String {
        let limit = self.profile.context_limit;
        let mut sections = Vec::new();

        let prior = format_prior(&ctx.prior);
        if !prior.is_empty() {
            sections.push(format!(
                "Context from previous research:\n{}",
                truncate_chars(&prior, limit)
            ));
        }

        if self.profile.reads_store {
            let documents = ctx.store.all().await;
            if !documents.is_empty() {
                // Even share per document, so every document is represented.
                let share = (limit / documents.len()).max(MIN_EXCERPT_CHARS);
                let listing = documents
                    .iter()
                    .map(|d| {
                        format!(
                            "[{}] {}: {}",
                            d.kind,
                            d.contributor,
                            truncate_chars(&d.content, share)
                        )
                    })
                    .collect::<Vec<_>>()
                    .join("\n\n");
                sections.push(format!("Knowledge store ({} documents):\n{listing}", documents.len()));
            }
        }

        if sections.is_empty() {
            task.to_string()
        } else {
            format!("{}\n\n{task}", sections.join("\n\n"))
        }
    }
}

#[async_trait]
impl Worker for CompletionWorker {
    fn name(&self) -> &str {
        &self.profile.contributor
    }

    fn task(&self, ctx: &WorkerContext) -> String {
        self.profile.render_task(&ctx.topic, &ctx.focus)
    }

    async fn invoke(&self, task: &str, ctx: &WorkerContext) -> BigglesResult<WorkerOutput> {
        let prompt = self.build_prompt(task, ctx).await;
        let text = self
            .backend
            .complete(&self.profile.system_prompt, &prompt)
            .await?;
        if text.trim().is_empty() {
            return Err(BigglesError::Provider(format!(
                "{} returned an empty response",
                self.profile.contributor
            )));
        }
        let links = extract_links(&text);
        Ok(WorkerOutput { text, links })
    }
}

fn format_prior(prior: &BTreeMap<Stage, WorkerOutput>) -> String {
    prior
        .iter()
        .map(|(stage, output)| {
            let mut block = format!("{stage}: {}", output.text);
            if !output.links.is_empty() {
                block.push_str("\nsources:\n");
                block.push_str(
                    &output
                        .links
                        .iter()
                        .map(|l| format!("  - {l}"))
                        .collect::<Vec<_>>()
                        .join("\n"),
                );
            }
            block
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn truncate_chars(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((cut, _)) => text[..cut].to_string(),
        None => text.to_string(),
    }
}

fn link_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r#"https?://[^\s<>"{}|\\^`\[\]]+"#).ok())
        .as_ref()
}

/// Every `http(s)` link in `text`, first occurrence order, without trailing punctuation.
pub fn extract_links(text: &str) -> Vec<String> {
    let Some(pattern) = link_pattern() else {
        return Vec::new();
    };
    dedup_links(
        pattern
            .find_iter(text)
            .map(|m| m.as_str().trim_end_matches(['.', ',', ';', ':', '!', '?', ')', '\'']))
            .filter(|link| !link.is_empty())
            .map(str::to_string),
    )
}

/// The subject the research stages dig into.
///
/// The first non-empty line of the scout output, stripped of list and heading
/// markers. Falls back to the topic.
pub fn research_focus(topic: &str, scout: Option<&WorkerOutput>) -> String {
    let line = scout.and_then(|output| {
        output
            .text
            .lines()
            .map(|l| {
                l.trim()
                    .trim_start_matches(|c: char| {
                        c == '#' || c == '-' || c == '*' || c == '.' || c.is_ascii_digit()
                    })
                    .trim()
                    .trim_matches('*')
                    .trim()
            })
            .find(|l| !l.is_empty())
            .map(|l| truncate_chars(l, 200))
    });
    line.unwrap_or_else(|| topic.to_string())
}
