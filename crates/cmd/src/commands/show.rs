// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

use std::fmt::Write;

use anyhow::Result;
use pitlog::{FileKind, PitManifest};
use steward::Config;

use crate::common::{format_file_size, format_pit_id, format_timestamp, open_repository, parse_pit};

fn kind_label(kind: FileKind) -> &'static str {
    match kind {
        FileKind::Descriptor => "descriptor",
        FileKind::ManifestList => "manifest-list",
        FileKind::Manifest => "manifest",
        FileKind::Data => "data",
        FileKind::PositionDeletes => "position-deletes",
        FileKind::EqualityDeletes => "equality-deletes",
        FileKind::Statistics => "statistics",
    }
}

#[allow(clippy::print_stdout)]
pub async fn show_command(config: &Config, repository: &str, pit: Option<&str>, json: bool) -> Result<()> {
    let output = show_command_as_string(config, repository, pit, json).await?;
    print!("{output}");
    Ok(())
}

pub async fn show_command_as_string(
    config: &Config,
    repository: &str,
    pit: Option<&str>,
    json: bool,
) -> Result<String> {
    let repo = open_repository(config, repository).await?;
    let pit_id = repo.resolve_pit(parse_pit(pit)?.as_ref())?;
    let manifest = repo.load_pit(&pit_id).await?;
    if json {
        let mut out = serde_json::to_string_pretty(&manifest)?;
        out.push('\n');
        return Ok(out);
    }
    Ok(format_manifest(&manifest))
}

fn format_manifest(manifest: &PitManifest) -> String {
    let mut out = String::new();
    _ = writeln!(out, "=== PIT {} ===", manifest.pit_id);
    let parent = manifest
        .parent
        .as_ref()
        .map_or_else(|| "none".to_string(), format_pit_id);
    _ = writeln!(out, "  parent:  {parent}");
    _ = writeln!(out, "  created: {}", format_timestamp(manifest.created_at));
    _ = writeln!(out, "  scope:   {}", manifest.scope);

    for table in &manifest.tables {
        _ = writeln!(out, "  table {}", table.ident);
        _ = writeln!(out, "    location:   {}", table.original_location);
        _ = writeln!(out, "    descriptor: {}", table.metadata_location);
    }

    for file in &manifest.added {
        _ = writeln!(
            out,
            "  + {} ({}, {})",
            file.path,
            kind_label(file.kind),
            format_file_size(file.size)
        );
    }
    for file in &manifest.modified {
        _ = writeln!(
            out,
            "  ~ {} ({}, {})",
            file.path,
            kind_label(file.kind),
            format_file_size(file.size)
        );
    }
    for file in &manifest.deleted {
        _ = writeln!(out, "  - {}", file.path);
    }
    out
}
