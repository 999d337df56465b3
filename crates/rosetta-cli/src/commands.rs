//! CLI command implementations.

use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use rosetta_server::{RosettaServer, ServerAddress, ServerSettings};
use rosetta_tree::{
    drop_invalid, IndexSnapshot, MappingTree, SnapshotEntry, StaticIndex, Translator,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

type Result<T> = std::result::Result<T, Box<dyn std::error::Error>>;

/// Where settings live when `--config` is not given.
fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("rosetta").join("server.json"))
}

/// Loads settings from `explicit`, else the default path if it exists,
/// else built-in defaults.
fn load_settings(explicit: Option<&Path>) -> Result<ServerSettings> {
    if let Some(path) = explicit {
        return Ok(ServerSettings::load(path)?);
    }

    match default_config_path() {
        Some(path) if path.exists() => {
            debug!("Using settings from {}", path.display());
            Ok(ServerSettings::load(&path)?)
        }
        _ => Ok(ServerSettings::default()),
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let text = fs::read_to_string(path)
        .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
    let value = serde_json::from_str(&text)
        .map_err(|e| format!("cannot parse {}: {}", path.display(), e))?;
    Ok(value)
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    fs::write(path, serde_json::to_string_pretty(value)?)?;
    Ok(())
}

/// Write a default settings file.
pub fn init(config: Option<&Path>, force: bool) -> Result<()> {
    let path = match config {
        Some(path) => path.to_path_buf(),
        None => default_config_path().ok_or("cannot determine the user config directory")?,
    };

    if path.exists() && !force {
        println!("{} Already initialized at {}", "✓".green(), path.display());
        println!("  Pass {} to overwrite it", "--force".cyan());
        return Ok(());
    }

    ServerSettings::default().save(&path)?;

    println!("{} Wrote default settings to {}", "✓".green(), path.display());
    println!("  Run {} to start the server", "rosetta serve".cyan());

    Ok(())
}

/// Options for [`serve`].
pub struct ServeOptions {
    pub config: Option<PathBuf>,
    pub bind: Option<String>,
    pub port: Option<u16>,
    pub index: Option<PathBuf>,
    pub mappings: Option<PathBuf>,
    pub save: Option<PathBuf>,
}

/// Applies `--bind` and `--port` on top of the loaded settings.
fn override_address(
    settings: &mut ServerSettings,
    bind: Option<String>,
    port: Option<u16>,
) -> Result<()> {
    if let Some(bind) = bind {
        settings.bind = bind;
    }
    if let Some(port) = port {
        let address = settings
            .bind_address()
            .ok_or_else(|| format!("invalid bind address '{}'", settings.bind))?;
        settings.bind = ServerAddress::new(address.host, port).to_string();
    }
    Ok(())
}

/// Start the mappings server.
pub async fn serve(options: ServeOptions) -> Result<()> {
    let mut settings = load_settings(options.config.as_deref())?;
    override_address(&mut settings, options.bind, options.port)?;

    println!("{}", "Starting Rosetta server...".cyan());

    let index = match &options.index {
        Some(path) => StaticIndex::from(read_json::<IndexSnapshot>(path)?),
        None => StaticIndex::empty(),
    };
    println!("{} Loaded {} indexed entries", "✓".green(), index.len());

    let pairs: Vec<SnapshotEntry> = match &options.mappings {
        Some(path) => read_json(path)?,
        None => Vec::new(),
    };
    let pruned = drop_invalid(pairs, &index);
    if !pruned.dropped.is_empty() {
        println!(
            "{} Dropped {} mappings that do not apply (run {} for details)",
            "⚠".yellow(),
            pruned.dropped.len(),
            "rosetta check".cyan()
        );
    }

    let tree = MappingTree::from_snapshot(pruned.kept)?;
    println!("{} Loaded {} mappings", "✓".green(), tree.len());

    let server = RosettaServer::bind(settings, tree, Arc::new(index)).await?;
    let handle = server.handle();

    println!("{} Listening on ws://{}", "✓".green(), server.local_addr()?);
    println!("  Press {} to stop", "Ctrl+C".cyan());

    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => println!(),
    }

    if let Some(path) = &options.save {
        let snapshot = handle.export_snapshot().await;
        write_json(path, &snapshot)?;
        println!(
            "{} Saved {} mappings to {}",
            "✓".green(),
            snapshot.len(),
            path.display()
        );
    }

    Ok(())
}

/// Drop mappings that do not apply to the class index.
pub fn check(mappings: &Path, index: &Path, output: Option<&Path>) -> Result<()> {
    let pairs: Vec<SnapshotEntry> = read_json(mappings)?;
    let index = StaticIndex::from(read_json::<IndexSnapshot>(index)?);

    let total = pairs.len();
    let pruned = drop_invalid(pairs, &index);

    if pruned.dropped.is_empty() {
        println!("{} All {} mappings apply", "✓".green(), total);
    } else {
        println!(
            "{} {} of {} mappings do not apply:",
            "⚠".yellow(),
            pruned.dropped.len(),
            total
        );
        for (pair, reason) in pruned.dropped.iter().take(10) {
            println!("  {} {}", pair.entry.to_string().red(), format!("({})", reason).dimmed());
        }
        if pruned.dropped.len() > 10 {
            println!("  ... and {} more", pruned.dropped.len() - 10);
        }
    }

    if let Some(out_path) = output {
        write_json(out_path, &pruned.kept)?;
        println!(
            "{} Wrote {} mappings to {}",
            "✓".green(),
            pruned.kept.len(),
            out_path.display()
        );
    }

    Ok(())
}

#[derive(Serialize)]
struct Translation {
    kind: String,
    obfuscated: String,
    deobfuscated: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    descriptor: Option<String>,
}

/// Print the deobfuscated name of every mapped (or indexed) entry.
pub fn translate(mappings: &Path, index: Option<&Path>, json_output: bool) -> Result<()> {
    let pairs: Vec<SnapshotEntry> = read_json(mappings)?;
    let tree = MappingTree::from_snapshot(pairs)?;
    let translator = Translator::new(&tree);

    let mut entries: Vec<_> = match index {
        Some(path) => read_json::<IndexSnapshot>(path)?
            .entries
            .into_iter()
            .map(|item| item.entry)
            .collect(),
        None => tree.iter().map(|(entry, _)| entry.clone()).collect(),
    };
    entries.sort();
    entries.dedup();

    let progress = ProgressBar::new(entries.len() as u64);
    if json_output {
        progress.set_draw_target(indicatif::ProgressDrawTarget::hidden());
    } else {
        let style = ProgressStyle::default_bar().template("{bar:40.cyan} {pos}/{len} {msg}")?;
        progress.set_style(style);
        progress.set_message("Translating...");
    }

    let mut translations = Vec::with_capacity(entries.len());
    for entry in &entries {
        translations.push(Translation {
            kind: entry.kind().to_string(),
            obfuscated: entry.to_string(),
            deobfuscated: translator.translate(entry),
            descriptor: entry.descriptor().map(|d| translator.translate_descriptor(d)),
        });
        progress.inc(1);
    }
    progress.finish_and_clear();

    if json_output {
        println!("{}", serde_json::to_string_pretty(&translations)?);
        return Ok(());
    }

    if translations.is_empty() {
        println!("No entries to translate");
        return Ok(());
    }

    for t in &translations {
        print!(
            "  {} {} → {}",
            t.kind.yellow(),
            t.obfuscated.dimmed(),
            t.deobfuscated.cyan()
        );
        if let Some(descriptor) = &t.descriptor {
            print!(" {}", descriptor.dimmed());
        }
        println!();
    }
    println!();
    println!("Translated {} entries", translations.len().to_string().bold());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rosetta_core::{Entry, EntryMapping};
    use rosetta_tree::IndexedEntry;
    use tempfile::TempDir;

    #[test]
    fn test_init_writes_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("server.json");

        init(Some(&path), false).unwrap();

        let settings = load_settings(Some(&path)).unwrap();
        assert_eq!(settings, ServerSettings::default());
    }

    #[test]
    fn test_init_keeps_existing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("server.json");
        let custom = ServerSettings {
            password: "hunter2".into(),
            ..ServerSettings::default()
        };
        custom.save(&path).unwrap();

        init(Some(&path), false).unwrap();
        assert_eq!(load_settings(Some(&path)).unwrap().password, "hunter2");

        init(Some(&path), true).unwrap();
        assert_eq!(load_settings(Some(&path)).unwrap().password, "");
    }

    #[test]
    fn test_override_address() {
        let mut settings = ServerSettings::default();
        override_address(&mut settings, None, Some(9000)).unwrap();
        assert_eq!(settings.bind, "127.0.0.1:9000");

        override_address(&mut settings, Some("::1".into()), Some(9001)).unwrap();
        assert_eq!(settings.bind, "[::1]:9001");

        assert!(override_address(&mut settings, Some("host:port".into()), Some(1)).is_err());
    }

    #[test]
    fn test_check_writes_applicable_mappings() {
        let dir = TempDir::new().unwrap();
        let known = Entry::class("a").unwrap();
        let gone = Entry::class("z").unwrap();

        let mappings = dir.path().join("mappings.json");
        write_json(
            &mappings,
            &vec![
                SnapshotEntry::new(known.clone(), EntryMapping::named("Main")),
                SnapshotEntry::new(gone, EntryMapping::named("Gone")),
            ],
        )
        .unwrap();

        let index = dir.path().join("index.json");
        write_json(
            &index,
            &IndexSnapshot {
                entries: vec![IndexedEntry {
                    entry: known.clone(),
                    synthetic: false,
                }],
                partitions: Vec::new(),
            },
        )
        .unwrap();

        let output = dir.path().join("clean.json");
        check(&mappings, &index, Some(&output)).unwrap();

        let kept: Vec<SnapshotEntry> = read_json(&output).unwrap();
        assert_eq!(kept, vec![SnapshotEntry::new(known, EntryMapping::named("Main"))]);
    }

    #[test]
    fn test_translate_reports_bad_input() {
        let dir = TempDir::new().unwrap();
        let mappings = dir.path().join("mappings.json");
        fs::write(&mappings, "not json").unwrap();

        let err = translate(&mappings, None, true).unwrap_err();
        assert!(err.to_string().contains("cannot parse"));
    }
}
