//! Demo command implementation.
//!
//! Runs a short session against the gallery fixture and reports the
//! statements each commit executed.

use ormgraph_core::{Config, CoreResult, ObjectContext, ObjectRef};
use ormgraph_storage::ExecutedStatement;
use ormgraph_testkit::TestStack;
use serde::Serialize;

/// Statements executed by one step of the demo.
#[derive(Debug, Serialize)]
pub struct StepReport {
    /// What the step did.
    pub step: String,
    /// Statements in execution order.
    pub statements: Vec<ExecutedStatement>,
}

/// Runs the demo command.
pub fn run(batch_size: usize, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let stack = TestStack::with_config(Config::default().max_batch_size(batch_size));
    let context = stack.context();
    let mut reports = Vec::new();

    let mut record = |step: &str, result: CoreResult<()>| -> CoreResult<()> {
        result?;
        reports.push(StepReport {
            step: step.to_string(),
            statements: stack.statements(),
        });
        stack.clear_statements();
        Ok(())
    };

    let (artist, paintings) = create_artist(&context)?;
    record("insert an artist with three paintings", context.commit_changes())?;

    context.write_property(artist, "name", "Claude Monet")?;
    context.write_property(paintings[0], "estimatedPrice", 1_500_000.0)?;
    record("rename the artist and price a painting", context.commit_changes())?;

    let denied = context.delete_object(artist);
    if let Err(err) = &denied {
        tracing::info!(%err, "delete refused as expected");
    }

    context.delete_objects(&paintings)?;
    context.delete_object(artist)?;
    record("delete the paintings, then the artist", context.commit_changes())?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&reports)?),
        _ => print_text_output(&reports),
    }
    Ok(())
}

fn create_artist(context: &ObjectContext) -> CoreResult<(ObjectRef, Vec<ObjectRef>)> {
    let artist = context.new_object("Artist")?;
    context.write_property(artist, "name", "Monet")?;
    let mut paintings = Vec::new();
    for title in ["Water Lilies", "Haystacks", "Rouen Cathedral"] {
        let painting = context.new_object("Painting")?;
        context.write_property(painting, "title", title)?;
        context.add_to_many(artist, "paintingArray", painting)?;
        paintings.push(painting);
    }
    Ok((artist, paintings))
}

fn print_text_output(reports: &[StepReport]) {
    for (index, report) in reports.iter().enumerate() {
        println!("{}. {}", index + 1, report.step);
        if report.statements.is_empty() {
            println!("   (no statements)");
        }
        for statement in &report.statements {
            println!("   {statement}");
        }
    }
}
