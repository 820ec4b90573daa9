use crate::types::Stage;
use serde::{Deserialize, Serialize};

/// How a [`CompletionWorker`](crate::worker::CompletionWorker) plays one stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageProfile {
    pub stage: Stage,
    /// Contributor id stamped on stored documents.
    pub contributor: String,
    pub system_prompt: String,
    /// Task text. `{topic}` and `{focus}` are substituted.
    pub task_template: String,
    /// Whether the prompt includes every document in the knowledge store.
    #[serde(default)]
    pub reads_store: bool,
    /// Character budget for each context section: prior outputs, and the store listing.
    #[serde(default = "default_context_limit")]
    pub context_limit: usize,
}

fn default_context_limit() -> usize {
    5000
}

impl StageProfile {
    pub fn render_task(&self, topic: &str, focus: &str) -> String {
        self.task_template
            .replace("{topic}", topic)
            .replace("{focus}", focus)
    }
}

/// One profile per stage, in stage order.
pub fn default_profiles() -> Vec<StageProfile> {
    Stage::ALL.into_iter().map(default_profile).collect()
}

/// The built-in profile for a stage.
pub fn default_profile(stage: Stage) -> StageProfile {
    let (contributor, system_prompt, task_template) = match stage {
        Stage::Scout => ("trend_scout", SCOUT_PROMPT, SCOUT_TASK),
        Stage::History => ("historian", HISTORY_PROMPT, HISTORY_TASK),
        Stage::Academic => ("scholar", ACADEMIC_PROMPT, ACADEMIC_TASK),
        Stage::News => ("journalist", NEWS_PROMPT, NEWS_TASK),
        Stage::Books => ("bibliophile", BOOKS_PROMPT, BOOKS_TASK),
        Stage::Synthesis => ("reporter", SYNTHESIS_PROMPT, SYNTHESIS_TASK),
    };
    StageProfile {
        stage,
        contributor: contributor.to_string(),
        system_prompt: system_prompt.to_string(),
        task_template: task_template.to_string(),
        reads_store: stage == Stage::Synthesis,
        context_limit: default_context_limit(),
    }
}

const SCOUT_PROMPT: &str = "You are a trend scout. Identify the most significant \
emerging trends in a domain, rank them by impact and adoption, and cite every \
claim with a URL.";

const SCOUT_TASK: &str = "Identify the top three to five trends in {topic}. \
Put the single most important trend on the first line, then explain each trend \
with evidence and source URLs.";

const HISTORY_PROMPT: &str = "You are a historian of technology and markets. Trace \
how a trend developed, name its milestones and inflection points, and compare it \
with similar past trends. Cite sources with URLs.";

const HISTORY_TASK: &str = "Research the history and evolution of {focus} \
(within {topic}). Build a timeline and extract lessons learned.";

const ACADEMIC_PROMPT: &str = "You are a scholar. Find credible white papers and \
research papers, judge their methodology, and summarize findings and limitations. \
Give full bibliographic details with URLs.";

const ACADEMIC_TASK: &str = "Find and analyze at least five papers on {focus}. \
Rank them by quality and relevance to {topic}.";

const NEWS_PROMPT: &str = "You are a journalist. Find recent coverage from \
credible outlets, assess credibility and bias, and summarize the facts. Include \
publication dates and URLs.";

const NEWS_TASK: &str = "Analyze news from the last 90 days on {focus}. Identify \
themes and sentiment in the coverage.";

const BOOKS_PROMPT: &str = "You are a bibliophile. Find authoritative books, \
assess the authors and the reception, and summarize key concepts. Include \
publisher or library links.";

const BOOKS_TASK: &str = "Find and summarize at least five books on {focus}, \
mixing foundational and recent titles.";

const SYNTHESIS_PROMPT: &str = "You are a research reporter. Synthesize findings \
from several researchers into a coherent, evidence-based report with an executive \
summary, recommendations and citations.";

const SYNTHESIS_TASK: &str = "Write a comprehensive research report on {topic}, \
focused on {focus}, using all the research provided.";
