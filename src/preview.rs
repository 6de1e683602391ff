use anyhow::Result;
use log::info;

use crate::{
    cli::PreviewArgs,
    io_utils::{self, FileReadOptions},
    table,
};

pub fn execute(args: &PreviewArgs) -> Result<()> {
    let options = FileReadOptions {
        delimiter: args.delimiter,
        encoding: args.input_encoding.clone(),
        simplify_headers: args.simplify_headers,
        limit: Some(args.rows),
    };
    let dataset = io_utils::read_dataset(&args.input, &options)?;
    print!("{}", table::render_dataset(&dataset, None));
    info!(
        "Displayed {} row(s) from {:?}",
        dataset.row_count(),
        args.input
    );
    Ok(())
}
