use serde::Serialize;

use crate::config::StoreConfig;
use crate::store::OpenOutcome;

use super::{display_path, open_store, print_json};

#[derive(Serialize)]
struct OpenOutput {
    path: String,
    outcome: OpenOutcome,
    encrypted: bool,
    schema_version: u32,
}

pub fn run_open(config: &StoreConfig, json: bool) -> anyhow::Result<()> {
    let store = open_store(config)?;

    let output = OpenOutput {
        path: display_path(store.path()),
        outcome: store.open_outcome(),
        encrypted: store.open_outcome().is_encrypted(),
        schema_version: store.schema_version()?,
    };

    if json {
        return print_json(&output);
    }

    println!("Store:          {}", output.path);
    println!("Outcome:        {:?}", output.outcome);
    println!("Encrypted:      {}", output.encrypted);
    println!("Schema version: {}", output.schema_version);
    Ok(())
}
