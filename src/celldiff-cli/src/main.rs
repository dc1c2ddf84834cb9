// Copyright 2026 The Celldiff Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;
use url::Url;

use celldiff_engine::{FileResolver, MatchOptions, Model, annotate, compare};

#[derive(Parser, Debug)]
#[command(author, version, about = "Compare and flatten CellML model documents", long_about = None)]
struct Args {
    /// Log at debug level unless RUST_LOG says otherwise.
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Parse a model, imports included, and summarize it.
    Validate { path: PathBuf },
    /// Merge every import into the model and write the result.
    Flatten {
        path: PathBuf,
        /// Output file; standard output when absent.
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },
    /// List the edit operations between two versions of a model.
    Diff {
        original: PathBuf,
        modified: PathBuf,
        /// Print operations as JSON lines.
        #[arg(long)]
        json: bool,
        /// Keep matches whose variable connections differ.
        #[arg(long)]
        no_topology: bool,
    },
}

fn load(path: &Path) -> Result<Model> {
    let full = path
        .canonicalize()
        .with_context(|| format!("cannot open {}", path.display()))?;
    let location = Url::from_file_path(&full)
        .map_err(|_| anyhow!("{} is not a valid file location", full.display()))?;
    let bytes = fs::read(&full).with_context(|| format!("failed to read {}", full.display()))?;
    debug!(%location, "loading model");
    let model = Model::parse(&bytes, location, &FileResolver)
        .with_context(|| format!("failed to load model from {}", path.display()))?;
    Ok(model)
}

fn validate(path: &Path) -> Result<()> {
    let model = load(path)?;
    let root = model.root();
    println!("model: {}", model.name().unwrap_or("<unnamed>"));
    println!("documents: {}", model.sources().count());
    println!("components: {}", root.components().len());
    println!("units: {}", root.units().global_units().count());
    println!("imported components: {}", root.imported_components().len());
    println!("imported units: {}", root.imported_units().len());
    println!("connections: {}", root.connections().len());
    Ok(())
}

fn flatten(path: &Path, output: Option<&Path>) -> Result<()> {
    let mut model = load(path)?;
    model
        .flatten()
        .with_context(|| format!("failed to flatten {}", path.display()))?;
    let xml = model.to_xml()?;
    match output {
        Some(out) => fs::write(out, xml)
            .with_context(|| format!("failed to write {}", out.display()))?,
        None => println!("{xml}"),
    }
    Ok(())
}

fn diff(original: &Path, modified: &Path, json: bool, no_topology: bool) -> Result<()> {
    let a = load(original)?;
    let b = load(modified)?;
    let options = MatchOptions {
        validate_topology: !no_topology,
        ..Default::default()
    };
    let comparison = compare(&a, &b, &options);

    for op in comparison.operations.iter() {
        if json {
            let concepts = annotate(op);
            let line = serde_json::json!({ "operation": op, "concepts": concepts });
            println!("{}", serde_json::to_string(&line)?);
        } else {
            println!("{op}");
        }
    }
    if !json {
        println!(
            "{} operations, {} matched nodes",
            comparison.operations.len(),
            comparison.connections.len()
        );
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();

    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) if args.verbose => EnvFilter::new("debug"),
        Err(_) => EnvFilter::new("warn"),
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .init();

    match args.command {
        Command::Validate { path } => validate(&path),
        Command::Flatten { path, output } => flatten(&path, output.as_deref()),
        Command::Diff {
            original,
            modified,
            json,
            no_topology,
        } => diff(&original, &modified, json, no_topology),
    }
}
