use clap::{Parser, Subcommand};
use columnar_converter::mapping::SchemaReport;
use columnar_converter::preview::DataPreview;
use columnar_converter::runner::{
    ConvertArgs, describe_schema, preview_schema, run_convert, write_demo,
};
use std::path::PathBuf;

#[derive(Parser, Clone)]
#[command(version, about = "Stream tabular files into SQLite")]
struct Args {
    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Subcommand)]
enum Command {
    /// Convert a file into a SQLite table
    Convert {
        /// Path or file:// URI of the source file
        #[arg(short, long)]
        source: String,

        /// SQLite database to write (created if missing)
        #[arg(short, long)]
        output: PathBuf,

        /// Destination table name
        #[arg(short, long, default_value = "converted_data")]
        table: String,

        /// Source format (binary, csv, tsv, json) - auto-detected from extension if not specified
        #[arg(short, long)]
        format: Option<String>,

        /// Maximum rows per committed batch
        #[arg(long, default_value = "10000")]
        batch_rows: usize,

        /// Maximum approximate batch size (e.g., 64MB, 512KB)
        #[arg(long, default_value = "64MB", value_parser = cli::parse_batch_bytes)]
        batch_bytes: usize,

        /// Number of leading columns to index after the load
        #[arg(long, default_value = "5")]
        index_columns: usize,

        /// Fail instead of replacing an existing table
        #[arg(long)]
        fail_if_exists: bool,

        /// Write the final report as JSON to this file
        #[arg(long)]
        report: Option<PathBuf>,

        /// Quiet mode - minimal output, only show summary
        #[arg(short, long)]
        quiet: bool,
    },
    /// Print the table a file would produce, without converting it
    Schema {
        /// Path or file:// URI of the source file
        #[arg(short, long)]
        source: String,

        /// Source format (binary, csv, tsv, json)
        #[arg(short, long)]
        format: Option<String>,

        /// Destination table name
        #[arg(short, long, default_value = "converted_data")]
        table: String,

        /// Also sample the leading records (100 if no count is given) and
        /// report per-column statistics
        #[arg(long, value_name = "RECORDS")]
        sample: Option<Option<usize>>,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Write a sample container file
    Demo {
        /// File to create
        #[arg(short, long)]
        output: PathBuf,

        /// Number of records
        #[arg(short, long, default_value = "10000")]
        records: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let quiet = matches!(args.command, Command::Convert { quiet: true, .. });
    init_tracing(args.verbose, quiet);

    match args.command {
        Command::Convert {
            source,
            output,
            table,
            format,
            batch_rows,
            batch_bytes,
            index_columns,
            fail_if_exists,
            report,
            quiet,
        } => {
            run_converter(
                ConvertArgs {
                    source_uri: source,
                    output,
                    table,
                    format,
                    batch_rows,
                    batch_bytes,
                    index_columns,
                    fail_if_exists,
                    quiet,
                },
                report,
            )
            .await?;
        }
        Command::Schema {
            source,
            format,
            table,
            sample: Some(records),
            json,
        } => {
            let preview = preview_schema(&source, format.as_deref(), &table, records)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&preview)?);
            } else {
                print_schema(&preview.schema);
                print_preview(&preview);
            }
            for warning in &preview.warnings {
                eprintln!("warning: {}", warning);
            }
        }
        Command::Schema {
            source,
            format,
            table,
            sample: None,
            json,
        } => {
            let (schema, warnings) = describe_schema(&source, format.as_deref(), &table)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&schema)?);
            } else {
                print_schema(&schema);
            }
            for warning in warnings.warnings() {
                eprintln!("warning: {}", warning);
            }
        }
        Command::Demo { output, records } => {
            let bytes = write_demo(&output, records)?;
            println!(
                "Wrote {} records ({} bytes) to {}",
                records,
                bytes,
                output.display()
            );
        }
    }
    Ok(())
}

fn print_schema(schema: &SchemaReport) {
    println!("Table: {}", schema.table_name);
    println!();
    println!(
        "{:<30} {:<30} {:<12} {:<10} {:>6} {:>5}  nullable",
        "column", "source", "source type", "sql type", "size", "scale"
    );
    for column in &schema.columns {
        println!(
            "{:<30} {:<30} {:<12} {:<10} {:>6} {:>5}  {}",
            column.name,
            column.source_name,
            column.source_type.to_string(),
            column.sql_type.to_string(),
            column.size,
            column.scale,
            column.nullable
        );
    }
}

fn print_preview(preview: &DataPreview) {
    let number = |v: Option<f64>| v.map_or_else(|| "-".to_string(), |v| format!("{v:.2}"));

    println!();
    println!("Sampled {} records", preview.sample_size);
    println!(
        "{:<30} {:>8} {:>8} {:>14} {:>14} {:>14}  samples",
        "column", "nulls", "unique", "min", "max", "avg"
    );
    for stats in &preview.column_stats {
        println!(
            "{:<30} {:>8} {:>8} {:>14} {:>14} {:>14}  {}",
            stats.name,
            stats.null_count,
            stats.unique_count,
            number(stats.min),
            number(stats.max),
            number(stats.avg),
            stats.sample_values.join(", ")
        );
    }

    if !preview.sample_rows.is_empty() {
        println!();
        for row in &preview.sample_rows {
            println!("{}", serde_json::Value::Object(row.clone()));
        }
    }
}

fn init_tracing(verbose: bool, quiet: bool) {
    use tracing_subscriber::{EnvFilter, FmtSubscriber};
    let filter = if verbose {
        EnvFilter::new("columnar_converter=debug,sqlx=warn")
    } else if quiet {
        EnvFilter::new("columnar_converter=warn,sqlx=off")
    } else {
        EnvFilter::new("columnar_converter=info,sqlx=off")
    };
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

async fn run_converter(args: ConvertArgs, report_path: Option<PathBuf>) -> anyhow::Result<()> {
    let quiet = args.quiet;
    if !quiet {
        println!("Columnar Converter");
        println!("==================");
        println!("Source: {}", args.source_uri);
        println!("Output: {}", args.output.display());
        println!("Table: {}", args.table);
        println!();
    }

    let report = run_convert(args).await?;

    if let Some(path) = report_path {
        std::fs::write(&path, serde_json::to_string_pretty(report.as_ref())?)
            .map_err(|e| anyhow::anyhow!("Failed to write report {}: {}", path.display(), e))?;
    }

    println!();
    println!("Conversion Summary");
    println!("==================");
    println!("Job ID: {}", report.job_id);
    println!("Table: {}", report.table_name);
    println!("Rows written: {}", report.rows);
    println!("Batches: {}", report.batches);
    println!("Indexes: {}", report.indexes.len());
    println!("Duration: {:.2}s", report.duration_secs);
    if report.duration_secs > 0.0 {
        println!(
            "Throughput: {:.2} rows/sec",
            report.rows as f64 / report.duration_secs
        );
    }

    if !report.warnings.is_empty() {
        println!();
        println!("Warnings:");
        for warning in &report.warnings {
            println!("  {}", warning);
        }
    }

    Ok(())
}

/// CLI argument parsers
mod cli {
    /// Batch byte limit from `64MB`, `512kb`, `1GiB` or a plain byte count
    pub fn parse_batch_bytes(input: &str) -> Result<usize, String> {
        let text = input.trim();
        let digits = text
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(text.len());
        let (count, unit) = text.split_at(digits);
        let count: usize = count
            .parse()
            .map_err(|_| format!("'{input}' does not start with a number"))?;

        let shift = match unit.trim().to_ascii_uppercase().as_str() {
            "" | "B" => 0,
            "K" | "KB" | "KIB" => 10,
            "M" | "MB" | "MIB" => 20,
            "G" | "GB" | "GIB" => 30,
            other => return Err(format!("unknown unit '{other}', expected B, KB, MB or GB")),
        };

        count
            .checked_mul(1usize << shift)
            .filter(|bytes| *bytes > 0)
            .ok_or_else(|| format!("'{input}' is not a usable batch size"))
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_convert_batch_bytes_argument() {
        let args = Args::try_parse_from([
            "columnar-converter",
            "convert",
            "--source",
            "in.csv",
            "--output",
            "out.db",
            "--batch-bytes",
            "8MB",
        ])
        .unwrap();
        match args.command {
            Command::Convert { batch_bytes, .. } => assert_eq!(batch_bytes, 8 << 20),
            _ => panic!("expected convert"),
        }

        let defaults =
            Args::try_parse_from(["columnar-converter", "convert", "-s", "in.csv", "-o", "out.db"])
                .unwrap();
        match defaults.command {
            Command::Convert { batch_bytes, .. } => assert_eq!(batch_bytes, 64 << 20),
            _ => panic!("expected convert"),
        }

        assert!(
            Args::try_parse_from([
                "columnar-converter",
                "convert",
                "-s",
                "in.csv",
                "-o",
                "out.db",
                "--batch-bytes",
                "lots",
            ])
            .is_err()
        );
    }

    #[test]
    fn test_schema_sample_argument() {
        let test_cases = vec![
            (vec!["-s", "in.tbc"], None, "no sampling"),
            (vec!["-s", "in.tbc", "--sample"], Some(None), "default count"),
            (vec!["-s", "in.tbc", "--sample", "25"], Some(Some(25)), "explicit count"),
        ];

        for (extra, expected, description) in test_cases {
            let args = Args::try_parse_from(
                ["columnar-converter", "schema"].into_iter().chain(extra),
            )
            .unwrap();
            match args.command {
                Command::Schema { sample, .. } => {
                    assert_eq!(sample, expected, "Failed for case: {}", description)
                }
                _ => panic!("expected schema"),
            }
        }
    }
}
