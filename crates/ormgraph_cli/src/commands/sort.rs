//! Sort command implementation.

use ormgraph_core::DependencySorter;
use serde::Serialize;

/// One table in dependency order.
#[derive(Debug, Serialize)]
pub struct TableRank {
    /// Position in insert order.
    pub rank: usize,
    /// Table name.
    pub table: String,
    /// Whether the table references itself.
    pub reflexive: bool,
    /// Tables this table references.
    pub depends_on: Vec<String>,
}

/// Runs the sort command.
pub fn run(format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let schema = ormgraph_testkit::schema();
    let sorter = DependencySorter::new(&schema)?;

    let ranks: Vec<TableRank> = sorter
        .table_order()
        .iter()
        .map(|table| {
            let mut depends_on: Vec<String> = schema
                .entity(table)
                .map(|entity| {
                    schema
                        .dependencies(entity)
                        .map(|rel| rel.target.clone())
                        .filter(|target| target != table)
                        .collect()
                })
                .unwrap_or_default();
            depends_on.sort();
            depends_on.dedup();
            TableRank {
                rank: sorter.insert_rank(table),
                table: table.clone(),
                reflexive: sorter.is_reflexive(table),
                depends_on,
            }
        })
        .collect();

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&ranks)?),
        _ => print_text_output(&ranks),
    }
    Ok(())
}

fn print_text_output(ranks: &[TableRank]) {
    println!("Insert order (deletes run in reverse):");
    for rank in ranks {
        let marker = if rank.reflexive { " (self-referencing)" } else { "" };
        if rank.depends_on.is_empty() {
            println!("  {:>2}. {}{}", rank.rank, rank.table, marker);
        } else {
            println!(
                "  {:>2}. {}{} -> {}",
                rank.rank,
                rank.table,
                marker,
                rank.depends_on.join(", ")
            );
        }
    }
}
