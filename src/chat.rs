//! Interactive query loop for `filmrag chat`.
//!
//! Each turn reads a query, retrieves chunks, generates an answer and
//! asks whether to quit. A failed query prints its error and the loop
//! keeps going.

use anyhow::Result;
use std::io::Write;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::config::Config;
use crate::engine::SearchEngine;
use crate::generate::{answer, create_generator, Generator};

const RULE_WIDTH: usize = 50;

async fn prompt<R: AsyncBufRead + Unpin, W: Write>(
    input: &mut R,
    output: &mut W,
    label: &str,
) -> Result<Option<String>> {
    write!(output, "{}", label)?;
    output.flush()?;
    let mut line = String::new();
    if input.read_line(&mut line).await? == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim().to_string()))
}

/// Drive the loop until the user quits or input ends.
pub async fn chat_loop<R: AsyncBufRead + Unpin, W: Write>(
    engine: &SearchEngine,
    generator: &dyn Generator,
    top_k: usize,
    mut input: R,
    mut output: W,
) -> Result<()> {
    writeln!(output, "{}", "=".repeat(RULE_WIDTH))?;
    writeln!(output, "Film recommendations. Ask for something to watch.")?;
    writeln!(output, "{}", "=".repeat(RULE_WIDTH))?;

    loop {
        let Some(query) = prompt(&mut input, &mut output, "Search query: ").await? else {
            break;
        };
        if !query.is_empty() {
            match answer(engine, generator, &query, top_k).await {
                Ok(response) => {
                    writeln!(output, "Response: {}", response)?;
                    writeln!(output, "{}", "_".repeat(RULE_WIDTH))?;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "query failed");
                    writeln!(output, "Error: {:#}", e)?;
                }
            }
        }

        match prompt(&mut input, &mut output, "Quit(y/n): ").await? {
            None => break,
            Some(choice) if matches!(choice.to_lowercase().as_str(), "y" | "yes") => break,
            Some(_) => {}
        }
    }
    Ok(())
}

/// Run `filmrag chat` reading tokio's stdin.
pub async fn run_chat(config: &Config, top_k: Option<usize>) -> Result<()> {
    let engine = SearchEngine::from_config(config)?;
    let generator = create_generator(&config.generation)?;
    let top_k = top_k.unwrap_or(config.retrieval.top_k);
    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    chat_loop(&engine, generator.as_ref(), top_k, stdin, std::io::stdout()).await
}
