//! Archive CLI subcommands.
//!
//! - `info`: list entries, cover and ComicInfo presence
//! - `check`: report whether an archive can be modified in place
//! - `reorder`: rename pages with order prefixes
//! - `delete`: remove pages

use std::path::PathBuf;

use anyhow::{anyhow, bail, Context, Result};
use clap::Subcommand;

use crate::archive::{
    check_archive_modifiable, list_entries, modify_pages_in_archive, reorder_pages_in_archive,
    PageMutationResult, PageOperation, PageReorder,
};

/// Archive-related subcommands
#[derive(Subcommand, Debug)]
pub enum ArchiveCommands {
    /// Show the contents of an archive
    Info {
        path: PathBuf,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Check whether an archive can be modified
    Check { path: PathBuf },

    /// Move pages to new positions (ENTRY=INDEX, e.g. "pages/d.jpg=0")
    Reorder {
        path: PathBuf,

        #[arg(required = true)]
        moves: Vec<String>,
    },

    /// Delete pages by entry path
    Delete {
        path: PathBuf,

        #[arg(required = true)]
        entries: Vec<String>,
    },
}

pub async fn execute(command: ArchiveCommands) -> Result<()> {
    match command {
        ArchiveCommands::Info { path, json } => show_info(path, json).await,
        ArchiveCommands::Check { path } => check(path).await,
        ArchiveCommands::Reorder { path, moves } => {
            let reorders = moves
                .iter()
                .map(|m| parse_reorder(m))
                .collect::<Result<Vec<_>>>()?;
            let result = blocking(move || Ok(reorder_pages_in_archive(&path, &reorders)?)).await?;
            report_mutation(&result)
        }
        ArchiveCommands::Delete { path, entries } => {
            let ops: Vec<PageOperation> = entries
                .into_iter()
                .map(|path| PageOperation::Delete { path })
                .collect();
            let result = blocking(move || Ok(modify_pages_in_archive(&path, &ops)?)).await?;
            report_mutation(&result)
        }
    }
}

async fn blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .context("Archive task panicked")?
}

/// Parse `ENTRY=INDEX`; the last `=` separates them so entries may contain `=`
fn parse_reorder(arg: &str) -> Result<PageReorder> {
    let (entry, index) = arg
        .rsplit_once('=')
        .ok_or_else(|| anyhow!("Expected ENTRY=INDEX, got '{}'", arg))?;
    if entry.is_empty() {
        bail!("Missing entry name in '{}'", arg);
    }
    let new_index = index
        .trim()
        .parse::<usize>()
        .with_context(|| format!("Invalid index in '{}'", arg))?;
    if new_index > 9999 {
        bail!("Index {} out of range (0-9999)", new_index);
    }

    Ok(PageReorder {
        original_path: entry.to_string(),
        new_index,
    })
}

async fn show_info(path: PathBuf, json: bool) -> Result<()> {
    let shown = path.clone();
    let listing = blocking(move || Ok(list_entries(&path)?))
        .await
        .with_context(|| format!("Failed to read {}", shown.display()))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&*listing)?);
        return Ok(());
    }

    println!("Archive: {}", shown.display());
    println!("Files: {}  Pages: {}  Size: {} bytes", listing.file_count, listing.page_count(), listing.total_size);
    println!("ComicInfo.xml: {}", if listing.has_comic_info { "yes" } else { "no" });
    println!("Cover: {}", listing.cover_path.as_deref().unwrap_or("(none)"));
    println!();
    println!("{:<60} {:>10}", "ENTRY", "SIZE");
    println!("{}", "-".repeat(71));
    for entry in listing.entries.iter().filter(|e| !e.is_directory) {
        println!("{:<60} {:>10}", entry.path, entry.size);
    }

    Ok(())
}

async fn check(path: PathBuf) -> Result<()> {
    let shown = path.clone();
    let status = blocking(move || Ok(check_archive_modifiable(&path))).await?;

    println!("Archive: {}", shown.display());
    println!("Format: {}", status.format);
    println!("Pages: {}", status.page_count);
    if status.is_modifiable {
        println!("Modifiable: yes");
    } else {
        println!("Modifiable: no ({})", status.reason.as_deref().unwrap_or("unknown reason"));
    }
    Ok(())
}

fn report_mutation(result: &PageMutationResult) -> Result<()> {
    if !result.success {
        bail!(
            "Archive left unchanged: {}",
            result.error.as_deref().unwrap_or("unknown error")
        );
    }
    println!(
        "Done: {} deleted, {} reordered, {} pages remain",
        result.deleted_count, result.reordered_count, result.new_total_pages
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_reorder() {
        let r = parse_reorder("pages/d.jpg=0").unwrap();
        assert_eq!(r.original_path, "pages/d.jpg");
        assert_eq!(r.new_index, 0);

        let r = parse_reorder("a=b.png=12").unwrap();
        assert_eq!(r.original_path, "a=b.png");
        assert_eq!(r.new_index, 12);

        assert!(parse_reorder("nope").is_err());
        assert!(parse_reorder("=3").is_err());
        assert!(parse_reorder("a.jpg=x").is_err());
        assert!(parse_reorder("a.jpg=10000").is_err());
    }
}
