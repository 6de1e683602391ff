use anyhow::{Context, Result};
use log::info;

use crate::{
    cli::InferArgs,
    io_utils::{self, FileReadOptions},
    schema::{self, InferenceOptions},
    table,
};

pub fn execute(args: &InferArgs) -> Result<()> {
    let options = FileReadOptions {
        delimiter: args.delimiter,
        encoding: args.input_encoding.clone(),
        simplify_headers: args.simplify_headers,
        limit: None,
    };
    let dataset = io_utils::read_dataset(&args.input, &options)
        .with_context(|| format!("Loading {:?}", args.input))?;
    let inferred = schema::infer_schema_with(
        &dataset,
        &InferenceOptions {
            numeric_text: args.numeric_text,
        },
    );

    if let Some(path) = &args.output {
        inferred
            .schema
            .save(path)
            .with_context(|| format!("Writing schema to {path:?}"))?;
        info!(
            "Inferred schema for {} column(s) written to {path:?}",
            inferred.schema.len()
        );
    }

    match (args.ddl, args.table.as_deref()) {
        (Some(dialect), Some(table)) => {
            println!("{}", inferred.schema.create_table_sql(dialect, table));
        }
        _ => print!("{}", table::render_observations(&inferred)),
    }
    info!(
        "Inferred {} column(s) from {} row(s)",
        inferred.schema.len(),
        dataset.row_count()
    );
    Ok(())
}
