// SPDX-License-Identifier: MIT
// Copyright (c) Microsoft Corporation.

use std::{env, path::PathBuf};

use anyhow::anyhow;
use clap::CommandFactory;

const TASKS: [&str; 1] = ["manual"];

fn main() -> anyhow::Result<()> {
    match env::args()
        .nth(1)
        .ok_or(anyhow!("Must provide a task"))?
        .as_str()
    {
        "manual" => generate_manual(),
        _ => Err(anyhow!("Unknown task, use one of {:?}", TASKS)),
    }
}

fn generate_manual() -> anyhow::Result<()> {
    let mut root = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    root.push("../");

    let outdir = root.join("certfile/docs/");
    std::fs::create_dir_all(&outdir)?;
    let command = certfile::cli::Cli::command();
    let manual = clap_mangen::Man::new(command);
    manual.generate_to(outdir)?;

    Ok(())
}
