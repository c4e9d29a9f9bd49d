use anyhow::Context;
use claims_ingest::config::Config;
use claims_ingest::export::{default_report_name, export_to_path};
use claims_ingest::llm::LanguageModel;
use claims_ingest::query::{answer_question, ModelProvider, QueryError, QueryHistory};
use claims_ingest::rest::{RestClient, SCHEMA_SQL};
use claims_ingest::{ingest_path, IngestError, IngestOptions, JsonLinesSink};
use clap::{Arg, ArgAction, ArgMatches, Command};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::time::Instant;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let matches = Command::new("claims")
        .about("Import claims exports, ask questions about them, export the answers")
        .subcommand_required(true)
        .subcommand(
            Command::new("ingest")
                .about(
                    "Stream a claims workbook (.xlsx) or export (.csv/.tsv, optionally .gz/.zst) \
                     into storage",
                )
                .arg(Arg::new("path").long("path").value_parser(clap::value_parser!(PathBuf)))
                .arg(
                    Arg::new("out")
                        .long("out")
                        .help("Append records as JSON lines to this file instead of the database")
                        .value_parser(clap::value_parser!(PathBuf)),
                )
                .arg(
                    Arg::new("batch-size")
                        .long("batch-size")
                        .help("Records per bulk insert (default from CLAIMS_BATCH_SIZE or 500)")
                        .value_parser(clap::value_parser!(usize)),
                )
                .arg(
                    Arg::new("charset")
                        .long("charset")
                        .help("Charset of a .csv/.tsv export, e.g. windows-1252 (default utf-8)"),
                ),
        )
        .subcommand(
            Command::new("query")
                .about("Answer a question with model-generated SQL")
                .arg(Arg::new("question").long("question").required(true))
                .arg(Arg::new("model").long("model").default_value("groq"))
                .arg(
                    Arg::new("history")
                        .long("history")
                        .help("JSON file accumulating answered queries")
                        .value_parser(clap::value_parser!(PathBuf)),
                )
                .arg(
                    Arg::new("export")
                        .long("export")
                        .help("Write the accumulated history to this report (.xlsx, or .csv)")
                        .value_parser(clap::value_parser!(PathBuf)),
                ),
        )
        .subcommand(
            Command::new("export")
                .about("Write a saved query history to a report (.xlsx, or .csv)")
                .arg(
                    Arg::new("history")
                        .long("history")
                        .required(true)
                        .value_parser(clap::value_parser!(PathBuf)),
                )
                .arg(Arg::new("out").long("out").value_parser(clap::value_parser!(PathBuf))),
        )
        .subcommand(Command::new("info").about("Row count, incurred-date range, distinct members"))
        .subcommand(Command::new("count").about("Exact row count"))
        .subcommand(
            Command::new("setup")
                .about("Recreate the claims schema (drops all claims)")
                .arg(Arg::new("schema").long("schema").value_parser(clap::value_parser!(PathBuf)))
                .arg(
                    Arg::new("yes")
                        .long("yes")
                        .help("Confirm that existing data will be wiped")
                        .action(ArgAction::SetTrue),
                ),
        )
        .get_matches();

    let config = Config::from_env()?;

    match matches.subcommand() {
        Some(("ingest", m)) => run_ingest(&config, m).await,
        Some(("query", m)) => run_query(&config, m).await,
        Some(("export", m)) => run_export(m).await,
        Some(("info", _)) => {
            let client = RestClient::with_sql_key(&config)?;
            let info = client.database_info().await?;
            println!("{}", serde_json::to_string(&info)?);
            Ok(())
        }
        Some(("count", _)) => {
            let client = RestClient::with_public_key(&config)?;
            let count = client.count().await?;
            println!("{}", json!({ "count": count }));
            Ok(())
        }
        Some(("setup", m)) => run_setup(&config, m).await,
        _ => unreachable!("subcommand_required"),
    }
}

async fn run_ingest(config: &Config, m: &ArgMatches) -> anyhow::Result<()> {
    let mut options: IngestOptions = config.ingest_options();
    if let Some(n) = m.get_one::<usize>("batch-size") {
        options.batch_capacity = (*n).max(1);
    }
    if let Some(label) = m.get_one::<String>("charset") {
        options = options.with_charset_label(label)?;
    }

    let start = Instant::now();
    let result = match m.get_one::<PathBuf>("path") {
        None => Err(IngestError::NoFile),
        Some(path) => match m.get_one::<PathBuf>("out") {
            Some(out) => {
                let sink = JsonLinesSink::create(out)
                    .await
                    .with_context(|| format!("opening {}", out.display()))?;
                ingest_path(path, sink, &options).await
            }
            None => {
                let sink = RestClient::with_public_key(config)?;
                ingest_path(path, sink, &options).await
            }
        },
    };

    match result {
        Ok(summary) => {
            let elapsed = start.elapsed().as_secs_f64();
            log::info!(
                "rows={} batches={} skipped={} elapsed={:.1}s rows/sec={:.0}",
                summary.inserted,
                summary.batches,
                summary.skipped_rows,
                elapsed,
                summary.inserted as f64 / elapsed.max(f64::EPSILON)
            );
            println!("{}", summary.report());
            Ok(())
        }
        Err(e) => {
            log::error!("Upload handler error: {e}");
            println!("{}", e.report());
            std::process::exit(1);
        }
    }
}

async fn run_query(config: &Config, m: &ArgMatches) -> anyhow::Result<()> {
    let question = m.get_one::<String>("question").map(String::as_str).unwrap_or_default();
    let provider: ModelProvider = m
        .get_one::<String>("model")
        .map(|s| s.parse())
        .transpose()?
        .unwrap_or_default();

    let model = LanguageModel::from_config(config, provider)?;
    let executor = RestClient::with_sql_key(config)?;
    log::info!("Model: {provider}");

    let answer = match answer_question(&model, &executor, question).await {
        Ok(answer) => answer,
        Err(e) => {
            println!("{}", query_error_report(&e));
            std::process::exit(1);
        }
    };
    println!("{}", serde_json::to_string_pretty(&answer)?);

    let history_path = m.get_one::<PathBuf>("history");
    let mut history = match history_path {
        Some(path) => QueryHistory::load(path).await?,
        None => QueryHistory::default(),
    };
    history.record(&answer);
    if let Some(path) = history_path {
        history.save(path).await?;
    }
    if let Some(out) = m.get_one::<PathBuf>("export") {
        write_report(&history, out).await?;
    }
    Ok(())
}

async fn run_export(m: &ArgMatches) -> anyhow::Result<()> {
    let Some(history_path) = m.get_one::<PathBuf>("history") else {
        anyhow::bail!("--history is required");
    };
    let history = QueryHistory::load(history_path).await?;
    let out = m
        .get_one::<PathBuf>("out")
        .cloned()
        .unwrap_or_else(|| PathBuf::from(default_report_name(chrono::Local::now().date_naive())));
    write_report(&history, &out).await
}

async fn write_report(history: &QueryHistory, out: &Path) -> anyhow::Result<()> {
    let written = export_to_path(history, out).await?;
    println!("{}", json!({ "exported": written, "path": out.display().to_string() }));
    Ok(())
}

async fn run_setup(config: &Config, m: &ArgMatches) -> anyhow::Result<()> {
    if !m.get_flag("yes") {
        anyhow::bail!("setup wipes all existing claims; rerun with --yes to continue");
    }
    let schema = match m.get_one::<PathBuf>("schema") {
        Some(path) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?,
        None => SCHEMA_SQL.to_string(),
    };
    let client = RestClient::with_service_key(config)?;
    client.setup(&schema).await?;
    println!("{}", json!({ "message": "Database synchronized successfully." }));
    Ok(())
}

fn query_error_report(e: &QueryError) -> serde_json::Value {
    match e.sql() {
        Some(sql) => json!({ "error": e.to_string(), "sql": sql }),
        None => json!({ "error": e.to_string() }),
    }
}
