use std::io::{self, BufRead, Write};
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use physio_flow::{
    AnswerValue, AssessmentRunner, AssessmentStep, Catalog, InMemorySessionStorage, QuestionType,
};

/// Interactive terminal interview against the assessment engine.
#[derive(Parser)]
struct Args {
    /// Directory holding conditions.json, sources.json and questions.json
    #[arg(long, default_value = "knowledge")]
    knowledge_dir: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .init();

    let args = Args::parse();
    let catalog = Arc::new(Catalog::load_from_dir(&args.knowledge_dir).await?);
    let runner = AssessmentRunner::new(catalog, Arc::new(InMemorySessionStorage::new()));

    println!("Physiotherapy self-assessment (answers are provisional, not a diagnosis)");
    println!("------------------------------------------------------------------------");

    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    let (session_id, mut step) = runner.start().await?;

    loop {
        match step {
            AssessmentStep::Question { question, progress } => {
                println!();
                if let Some(leader) = &progress.leading_hypothesis {
                    println!(
                        "[{} answered, confidence {:.0}%, leaning toward {}]",
                        progress.questions_asked,
                        progress.confidence * 100.0,
                        leader
                    );
                }
                println!("{}", question.text);
                let answer = match question.question_type {
                    QuestionType::YesNo => {
                        print!("  (y/n) > ");
                        io::stdout().flush()?;
                        let line = lines.next().transpose()?.unwrap_or_default();
                        AnswerValue::Bool(matches!(
                            line.trim().to_ascii_lowercase().as_str(),
                            "y" | "yes"
                        ))
                    }
                    QuestionType::MultipleChoice | QuestionType::BodySelection => {
                        for (i, option) in question.options.iter().enumerate() {
                            println!("  {}. {}", i + 1, option.replace('_', " "));
                        }
                        print!("  choice > ");
                        io::stdout().flush()?;
                        let line = lines.next().transpose()?.unwrap_or_default();
                        let trimmed = line.trim();
                        let choice = trimmed
                            .parse::<usize>()
                            .ok()
                            .and_then(|n| question.options.get(n.saturating_sub(1)))
                            .cloned()
                            .unwrap_or_else(|| trimmed.to_string());
                        AnswerValue::Text(choice)
                    }
                };
                step = runner.answer(&session_id, &question.id, answer).await?;
            }
            AssessmentStep::SourceIdentified { result, .. } => {
                println!();
                println!("* {}", result.clinical_implication);
                for finding in &result.supporting_findings {
                    println!("  - {finding}");
                }
                step = runner.current(&session_id).await?;
            }
            AssessmentStep::Referral { message, .. } => {
                println!();
                println!("!! {message}");
                break;
            }
            AssessmentStep::Diagnosis { report } => {
                println!();
                println!("Assessment summary");
                println!("------------------");
                println!("{}", report.summary);
                for condition in &report.differential {
                    println!(
                        "  {:>5.1}%  {}  ({:?})",
                        condition.probability * 100.0,
                        condition.name,
                        condition.label
                    );
                }
                println!("Evidence quality: {:?}", report.evidence_quality);
                if let Some(source) = &report.source_summary {
                    println!("Source note: {source}");
                }
                println!("Recommendations:");
                for recommendation in &report.recommendations {
                    println!("  - {recommendation}");
                }
                break;
            }
        }
    }
    Ok(())
}
