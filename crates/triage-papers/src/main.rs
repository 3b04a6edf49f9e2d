use anyhow::{Context, Result};
use clap::Parser;
use shared::config::parse_model_list;
use shared::protocol::build_instructions;
use shared::{
    ArxivClient, ArxivQuery, ClassificationEngine, Config, GeminiClient, ModelRoster, NotionClient,
    PdfDownloader, Pipeline, PipelineOptions, RosterCursor, TriageSettings,
};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "triage-papers")]
#[command(about = "Find new arXiv papers, classify them against your research area with Gemini, and file them in Notion")]
struct Args {
    /// Number of days to look back for updated papers
    #[arg(short, long)]
    days: Option<i64>,

    /// Maximum results per keyword search
    #[arg(long)]
    max_results: Option<usize>,

    /// Comma-separated model roster, best first (overrides the built-in list)
    #[arg(short, long)]
    models: Option<String>,

    /// Number of papers to analyze at the same time
    #[arg(short, long, default_value = "1")]
    concurrency: usize,

    /// Analyze papers but don't write anything to Notion
    #[arg(long)]
    dry_run: bool,

    /// Log filter, used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log: String,
}

fn init_logging(default_filter: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}

fn apply_overrides(mut settings: TriageSettings, args: &Args) -> Result<TriageSettings> {
    if let Some(days) = args.days {
        settings.lookback_days = days;
    }
    if let Some(max_results) = args.max_results {
        settings.max_results_per_keyword = max_results;
    }
    if let Some(raw) = &args.models {
        let models = parse_model_list(raw);
        if models.is_empty() {
            anyhow::bail!("--models must name at least one model");
        }
        settings.models = models;
    }
    settings.concurrency = args.concurrency.max(1);
    Ok(settings)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log);

    println!("🚀 Starting paper triage");
    let config = Config::from_env()?;
    let settings = apply_overrides(TriageSettings::default(), &args)?;

    let fetcher = ArxivClient::new(ArxivQuery {
        keywords: settings.keywords.clone(),
        allowed_subjects: settings.allowed_subjects.clone(),
        lookback_days: settings.lookback_days,
        max_results: settings.max_results_per_keyword,
        spacing: settings.search_spacing,
    })?;
    let notion = NotionClient::new(config.notion_token, config.database_id)?;

    let roster = ModelRoster::new(settings.models.clone());
    let engine = ClassificationEngine::new(
        Arc::new(PdfDownloader::new(settings.pdf_timeout)?),
        Arc::new(GeminiClient::new(config.google_api_key, settings.model_timeout)?),
        roster,
        RosterCursor::new(),
        settings.fallback.clone(),
        build_instructions(&settings.research_area, &settings.summary_language),
    );

    if args.dry_run {
        println!("🧪 Dry run: nothing will be written to Notion");
    }
    println!(
        "🔎 Looking back {} days across {} keywords, models: {}",
        settings.lookback_days,
        settings.keywords.len(),
        settings.models.join(", ")
    );

    let options = PipelineOptions {
        concurrency: settings.concurrency,
        request_spacing: settings.request_spacing,
        publish_spacing: settings.publish_spacing,
        dry_run: args.dry_run,
    };
    let report = Pipeline::new(&fetcher, &notion, &engine, &notion, options)
        .run()
        .await
        .context("Paper triage run failed")?;

    println!("\n📊 Summary");
    println!("  Known titles in Notion: {}", report.known_titles);
    println!("  Papers after filters:   {}", report.fetched);
    println!("  Already in Notion:      {}", report.skipped_known);
    println!("  Related:                {}", report.related);
    println!("  Unrelated:              {}", report.unrelated);
    println!("  Failed:                 {}", report.failed);
    if !report.dry_run {
        println!("  Published:              {}", report.published);
        if report.publish_errors > 0 {
            println!("  ⚠ Publish errors:       {}", report.publish_errors);
        }
    }
    match &report.final_model {
        Some(model) => println!("  Model in use at end:    {}", model),
        None => println!("  ⚠ Every model ran out of quota during this run"),
    }

    match shared::save_report(&report) {
        Ok(path) => println!("\n📝 Run report saved to: {}", path.display()),
        Err(e) => tracing::warn!(error = %e, "could not save run report"),
    }

    println!("\n🎉 All done!");
    Ok(())
}
