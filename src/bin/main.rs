use query_guard::{config::PipelineConfig, QueryPipeline};
use tracing::info;
use tracing_subscriber::EnvFilter;

const DEFAULT_QUESTIONS: &[&str] = &[
    "How many total transactions are there?",
    "What is the total revenue from Add-ons?",
    "Who is customer 104?",
];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = PipelineConfig::from_env()?;
    if config.gemini_api_key.is_empty() {
        eprintln!("⚠️  GEMINI_API_KEY not set; every question will fall back");
    }

    let mut questions: Vec<String> = std::env::args().skip(1).collect();
    if questions.is_empty() {
        questions = DEFAULT_QUESTIONS.iter().map(|q| q.to_string()).collect();
    }

    let pipeline = QueryPipeline::connect(&config).await?;

    info!(questions = questions.len(), "Query Guard batch run starting");

    for question in &questions {
        let outcome = pipeline.ask_detailed(question).await;

        println!("\n=== {} ===", question);
        println!("{}", outcome.answer);
        println!(
            "(correlation {}, {} attempt(s))",
            outcome.correlation_id, outcome.state.attempts_made
        );
    }

    let counters = pipeline.counters();
    println!(
        "\nQueries run: {} | Errors encountered: {} | Events recorded: {}",
        counters.queries_run(),
        counters.errors_encountered(),
        pipeline.recorder().len().await
    );

    Ok(())
}
