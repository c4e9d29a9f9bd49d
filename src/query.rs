//! Natural-language questions answered with model-generated SQL.
//!
//! The model is asked for `{"sql": ..., "explanation": ...}` but free text
//! comes back; [`parse_model_response`] is the only place that has to cope
//! with that.

use crate::config::ConfigError;
use crate::store::StorageError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::future::Future;
use std::path::Path;
use std::str::FromStr;
use std::sync::OnceLock;
use thiserror::Error;

pub const SYSTEM_PROMPT: &str = r#"
You are an expert Postgres SQL analyst for medical claims.
Table "claims" has these columns:
- carrier, group_name, benefit_package (text): Demographics
- claim_number, subscriber_id, member_id, member_custom_id (text): Identifiers
- incurred_date, paid_date (date): Dates
- billed_amount, allowed_amount, paid_amount, member_paid_amount (numeric): Primary Financials
- cob_amount, coinsurance_amount, copayment_amount, covered_amount, deductible_amount, discount_amount, not_covered_amount (numeric): Detailed Financials
- diag_code_principal, diag_desc_principal (text): Principal Diagnosis
- dx1_code, dx1_desc, dx2_code, dx2_desc, dx3_code, dx3_desc (text): Secondary Diagnoses
- cpt_code, cpt_category, cpt_description (text): Procedure Details
- icd_proc_code_1, icd_proc_desc_1, icd_proc_code_2, icd_proc_desc_2 (text): ICD Procedures
- drg_code, drg_description (text): MS-DRG details
- service_category, facility (text): Provider context

Your task:
1. Generate a SINGLE SQL query (standard Postgres).
2. Use range comparisons for dates (incurred_date >= '2024-01-01').
3. PRIVACY & AGGREGATION: Default to aggregate-level outputs (counts, sums) unless member detail is specifically asked for.
4. EXPLANATION: Provide a 1-sentence explanation of what data is being queried.

OUTPUT FORMAT: Return ONLY a JSON object:
{
  "sql": "SELECT ...",
  "explanation": "..."
}
"#;

const FALLBACK_EXPLANATION: &str = "Generated based on your question.";
const SQL_KEYWORDS: [&str; 5] = ["SELECT", "WITH", "INSERT", "UPDATE", "DELETE"];

/// A result row from raw SQL execution, column name => value.
pub type ResultRow = Map<String, Value>;

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("Question is required")]
    MissingQuestion,
    #[error("unknown model {0:?} (expected openai, gemini or groq)")]
    UnknownModel(String),
    #[error("LLM failed to generate a valid SQL query.")]
    EmptySql,
    #[error("model request failed: {0}")]
    Model(#[from] reqwest::Error),
    #[error("model returned an unexpected response: {0}")]
    ModelResponse(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("{source}")]
    Execution {
        sql: String,
        #[source]
        source: StorageError,
    },
}

impl QueryError {
    /// The generated SQL, when the failure happened while running it.
    pub fn sql(&self) -> Option<&str> {
        match self {
            QueryError::Execution { sql, .. } => Some(sql),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelProvider {
    #[serde(rename = "openai")]
    OpenAi,
    Gemini,
    #[default]
    Groq,
}

impl ModelProvider {
    pub fn default_model(self) -> &'static str {
        match self {
            ModelProvider::OpenAi => "gpt-4o",
            ModelProvider::Gemini => "gemini-2.0-flash",
            ModelProvider::Groq => "llama-3.3-70b-versatile",
        }
    }
}

impl fmt::Display for ModelProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ModelProvider::OpenAi => "openai",
            ModelProvider::Gemini => "gemini",
            ModelProvider::Groq => "groq",
        })
    }
}

impl FromStr for ModelProvider {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(ModelProvider::OpenAi),
            "gemini" => Ok(ModelProvider::Gemini),
            "groq" => Ok(ModelProvider::Groq),
            _ => Err(QueryError::UnknownModel(s.to_string())),
        }
    }
}

/// Produces a completion for a system instruction plus a user question.
pub trait SqlGenerator {
    fn complete(
        &self,
        system: &str,
        question: &str,
    ) -> impl Future<Output = Result<String, QueryError>> + Send;
}

/// Runs one SQL statement and returns its rows.
pub trait SqlExecutor {
    fn exec_sql(
        &self,
        sql: &str,
    ) -> impl Future<Output = Result<Vec<ResultRow>, StorageError>> + Send;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedQuery {
    pub sql: String,
    pub explanation: String,
}

#[derive(Deserialize)]
struct ModelReply {
    #[serde(default)]
    sql: Option<String>,
    #[serde(default)]
    explanation: Option<String>,
}

fn json_block() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{[\s\S]*\}").expect("valid regex"))
}

fn code_fence() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)```(?:sql)?\s*([\s\S]*?)```").expect("valid regex"))
}

/// Recover `sql` and `explanation` from a model's free-text reply.
///
/// The outermost `{...}` span is read as JSON; failing that, the whole reply
/// is taken as SQL (unwrapped from a fenced block if there is one). The SQL
/// then starts at its first statement keyword and stops before the first `;`.
pub fn parse_model_response(text: &str) -> Result<GeneratedQuery, QueryError> {
    let candidate = json_block().find(text).map_or(text, |m| m.as_str());
    let (sql, explanation) = match serde_json::from_str::<ModelReply>(candidate) {
        Ok(reply) => (
            reply.sql.unwrap_or_default(),
            reply.explanation.unwrap_or_default(),
        ),
        Err(_) => {
            let sql = code_fence()
                .captures(text)
                .and_then(|c| c.get(1))
                .map_or(text, |m| m.as_str());
            (sql.to_string(), FALLBACK_EXPLANATION.to_string())
        }
    };

    let sql = trim_statement(&sql);
    if sql.is_empty() {
        return Err(QueryError::EmptySql);
    }
    Ok(GeneratedQuery { sql, explanation })
}

fn trim_statement(sql: &str) -> String {
    // ASCII uppercasing keeps byte offsets aligned with `sql`
    let upper = sql.to_ascii_uppercase();
    let start = SQL_KEYWORDS
        .iter()
        .filter_map(|kw| upper.find(kw))
        .min()
        .unwrap_or(0);
    sql[start..]
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_string()
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryAnswer {
    pub question: String,
    pub sql: String,
    pub explanation: String,
    #[serde(rename = "data")]
    pub rows: Vec<ResultRow>,
}

/// Ask the model for SQL and run it.
pub async fn answer_question<G, E>(
    generator: &G,
    executor: &E,
    question: &str,
) -> Result<QueryAnswer, QueryError>
where
    G: SqlGenerator,
    E: SqlExecutor,
{
    let question = question.trim();
    if question.is_empty() {
        return Err(QueryError::MissingQuestion);
    }

    let raw = generator.complete(SYSTEM_PROMPT, question).await?;
    log::info!("Question: {question}");
    log::debug!("Raw LLM Response: {raw}");

    let GeneratedQuery { sql, explanation } = parse_model_response(&raw)?;
    log::info!("Final SQL: {sql}");

    let rows = match executor.exec_sql(&sql).await {
        Ok(rows) => rows,
        Err(source) => {
            log::error!("SQL Execution Error: {source}");
            return Err(QueryError::Execution { sql, source });
        }
    };

    Ok(QueryAnswer {
        question: question.to_string(),
        sql,
        explanation,
        rows,
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub question: String,
    pub explanation: String,
    pub sql: String,
    pub results: Vec<ResultRow>,
    pub timestamp: String,
}

/// Answered queries, newest first. Only answers that returned rows are kept.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueryHistory {
    entries: Vec<HistoryEntry>,
}

impl QueryHistory {
    /// Record an answer stamped with the local wall-clock time.
    pub fn record(&mut self, answer: &QueryAnswer) -> bool {
        let timestamp = chrono::Local::now().format("%H:%M:%S").to_string();
        self.record_at(answer, timestamp)
    }

    pub fn record_at(&mut self, answer: &QueryAnswer, timestamp: String) -> bool {
        if answer.rows.is_empty() {
            return false;
        }
        self.entries.insert(
            0,
            HistoryEntry {
                question: answer.question.clone(),
                explanation: answer.explanation.clone(),
                sql: answer.sql.clone(),
                results: answer.rows.clone(),
                timestamp,
            },
        );
        true
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Load a saved history; a missing file is an empty history.
    pub async fn load(path: &Path) -> std::io::Result<Self> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e),
        }
    }

    pub async fn save(&self, path: &Path) -> std::io::Result<()> {
        let bytes = serde_json::to_vec_pretty(self)?;
        tokio::fs::write(path, bytes).await
    }
}
