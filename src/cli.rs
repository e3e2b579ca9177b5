use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::path::PathBuf;
use ts1_modloader::{
    deploy::{CACHE_DIR, DOWNLOADS_DIR},
    logging::{self, Verbosity},
    CopyKind, Mod, ModDraft, ModRegistry, Settings,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "json" => Some(OutputFormat::Json),
            "text" => Some(OutputFormat::Text),
            _ => None,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
struct GlobalOptions {
    format: OutputFormat,
    settings: Option<PathBuf>,
    verbosity: Verbosity,
}

#[derive(Debug, PartialEq, Eq)]
enum CliCommand {
    ModsList(ModsListOptions),
    ModsShow(String),
    Validate,
    Conflicts,
    Deploy { dry_run: bool },
    Add(AddOptions),
    Remove(String),
    Lock(Vec<String>),
    Unlock(Option<String>),
    Locked,
    Orphans { prune: bool },
    SetGamePath(PathBuf),
    Paths,
    Help,
    Version,
}

#[derive(Debug, Default, PartialEq, Eq)]
struct ModsListOptions {
    sort: ModSortKey,
    reverse: bool,
    filter: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum ModSortKey {
    #[default]
    Order,
    Name,
    Id,
}

#[derive(Debug, Default, PartialEq, Eq)]
struct AddOptions {
    id: String,
    name: Option<String>,
    description: Option<String>,
    image: Option<PathBuf>,
    downloads: Vec<PathBuf>,
    download_dirs: Vec<PathBuf>,
    overrides: Vec<(PathBuf, String)>,
}

pub fn run() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let (global, command) = parse_args(&args)?;
    logging::init(global.verbosity);

    match command {
        CliCommand::Help => {
            print_help();
            Ok(())
        }
        CliCommand::Version => {
            println!("TS1 ModLoader v{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        command => {
            let mut settings = match &global.settings {
                Some(path) => Settings::load(path.clone()),
                None => Settings::load_default()?,
            };
            run_command(&mut settings, command, global.format)
        }
    }
}

fn parse_args(args: &[String]) -> Result<(GlobalOptions, CliCommand)> {
    let (global, tokens) = parse_global_options(args)?;
    let command = parse_command(&tokens)?;
    Ok((global, command))
}

fn parse_global_options(args: &[String]) -> Result<(GlobalOptions, Vec<String>)> {
    let mut format = OutputFormat::Text;
    let mut settings = None;
    let mut verbosity = Verbosity::Normal;
    let mut tokens = Vec::new();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if let Some(value) = arg.strip_prefix("--format=") {
            format = parse_format(value)?;
            continue;
        }
        match arg.as_str() {
            "--format" => {
                let value = iter.next().context("--format requires a value")?;
                format = parse_format(value)?;
            }
            "--settings" => {
                let value = iter.next().context("--settings requires a path")?;
                settings = Some(PathBuf::from(value));
            }
            "-q" | "--quiet" => verbosity = Verbosity::Quiet,
            "--verbose" => verbosity = Verbosity::Verbose,
            "--verbosity" => {
                let level = iter.next().context("--verbosity requires a level")?;
                verbosity = Verbosity::parse(level)
                    .with_context(|| format!("Unknown verbosity: {level}"))?;
            }
            _ if arg.starts_with("-v") && arg[1..].chars().all(|ch| ch == 'v') => {
                let count = arg.chars().filter(|ch| *ch == 'v').count();
                verbosity = if count >= 2 {
                    Verbosity::Debug
                } else {
                    Verbosity::Verbose
                };
            }
            _ => {
                if let Some(value) = arg.strip_prefix("--settings=") {
                    settings = Some(PathBuf::from(value));
                } else {
                    tokens.push(arg.to_string());
                }
            }
        }
    }

    Ok((
        GlobalOptions {
            format,
            settings,
            verbosity,
        },
        tokens,
    ))
}

fn parse_format(value: &str) -> Result<OutputFormat> {
    OutputFormat::parse(value).with_context(|| format!("Unknown format: {value} (use text or json)"))
}

fn parse_command(tokens: &[String]) -> Result<CliCommand> {
    let Some(head) = tokens.first() else {
        return Ok(CliCommand::Help);
    };
    let rest = &tokens[1..];
    let command = match head.as_str() {
        "help" | "--help" | "-h" => CliCommand::Help,
        "version" | "--version" | "-V" => CliCommand::Version,
        "mods" => match rest.first().map(|value| value.as_str()) {
            Some("show") => {
                let id = rest.get(1).context("mods show requires a mod id")?;
                CliCommand::ModsShow(id.to_string())
            }
            _ => CliCommand::ModsList(parse_mods_list(rest)?),
        },
        "validate" => {
            expect_no_args(head, rest)?;
            CliCommand::Validate
        }
        "conflicts" => {
            expect_no_args(head, rest)?;
            CliCommand::Conflicts
        }
        "deploy" => CliCommand::Deploy {
            dry_run: parse_switch(head, rest, &["--dry-run", "-n"])?,
        },
        "add" => CliCommand::Add(parse_add(rest)?),
        "remove" | "rm" => match rest {
            [id] => CliCommand::Remove(id.to_string()),
            [] => bail!("remove requires a mod id"),
            _ => bail!("remove takes exactly one mod id"),
        },
        "lock" => {
            if rest.is_empty() {
                bail!("lock requires one or more mod ids");
            }
            CliCommand::Lock(rest.to_vec())
        }
        "unlock" => match rest {
            [flag] if flag == "--all" => CliCommand::Unlock(None),
            [id] => CliCommand::Unlock(Some(id.to_string())),
            [] => bail!("unlock requires a mod id or --all"),
            _ => bail!("unlock takes one mod id or --all"),
        },
        "locked" => {
            expect_no_args(head, rest)?;
            CliCommand::Locked
        }
        "orphans" => CliCommand::Orphans {
            prune: parse_switch(head, rest, &["--prune"])?,
        },
        "config" => match rest.first().map(|value| value.as_str()) {
            Some("set-game-path") => {
                let path = rest.get(1).context("set-game-path requires a path")?;
                CliCommand::SetGamePath(PathBuf::from(path))
            }
            _ => bail!("Unknown config command (use 'set-game-path <path>')"),
        },
        "paths" => {
            expect_no_args(head, rest)?;
            CliCommand::Paths
        }
        other => bail!("Unknown command: {other} (see 'help')"),
    };
    Ok(command)
}

fn expect_no_args(command: &str, rest: &[String]) -> Result<()> {
    match rest.first() {
        Some(extra) => bail!("Unknown {command} option: {extra}"),
        None => Ok(()),
    }
}

/// True when one of `names` is given; anything else is an error.
fn parse_switch(command: &str, rest: &[String], names: &[&str]) -> Result<bool> {
    let mut on = false;
    for arg in rest {
        if !names.contains(&arg.as_str()) {
            bail!("Unknown {command} option: {arg}");
        }
        on = true;
    }
    Ok(on)
}

fn parse_mods_list(args: &[String]) -> Result<ModsListOptions> {
    let mut options = ModsListOptions::default();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "list" => {}
            "--sort" => {
                let value = iter.next().context("--sort requires a value")?;
                options.sort = parse_sort_key(value)?;
            }
            value if value.starts_with("--sort=") => {
                options.sort = parse_sort_key(value.trim_start_matches("--sort="))?;
            }
            "--reverse" | "-r" => options.reverse = true,
            "--filter" => {
                let value = iter.next().context("--filter requires a value")?;
                options.filter = Some(value.to_string());
            }
            value if value.starts_with("--filter=") => {
                options.filter = Some(value.trim_start_matches("--filter=").to_string());
            }
            other => bail!("Unknown mods option: {other}"),
        }
    }
    Ok(options)
}

fn parse_sort_key(value: &str) -> Result<ModSortKey> {
    match value {
        "order" => Ok(ModSortKey::Order),
        "name" => Ok(ModSortKey::Name),
        "id" => Ok(ModSortKey::Id),
        _ => bail!("Unknown sort key: {value}"),
    }
}

fn parse_add(args: &[String]) -> Result<AddOptions> {
    let mut iter = args.iter();
    let id = iter.next().context("add requires a mod id")?;
    let mut options = AddOptions {
        id: id.to_string(),
        ..AddOptions::default()
    };
    while let Some(arg) = iter.next() {
        let mut value = |flag: &str| -> Result<String> {
            iter.next()
                .cloned()
                .with_context(|| format!("{flag} requires a value"))
        };
        match arg.as_str() {
            "--name" => options.name = Some(value("--name")?),
            "--description" => options.description = Some(value("--description")?),
            "--image" => options.image = Some(PathBuf::from(value("--image")?)),
            "--download" => options.downloads.push(PathBuf::from(value("--download")?)),
            "--download-dir" => options
                .download_dirs
                .push(PathBuf::from(value("--download-dir")?)),
            "--override" => {
                let pair = value("--override")?;
                let (source, target) = pair
                    .split_once('=')
                    .with_context(|| format!("--override expects <path>=<target>, got {pair}"))?;
                options
                    .overrides
                    .push((PathBuf::from(source), target.to_string()));
            }
            other => bail!("Unknown add option: {other}"),
        }
    }
    if options.downloads.is_empty() && options.download_dirs.is_empty() && options.overrides.is_empty()
    {
        bail!("add needs at least one --download, --download-dir or --override");
    }
    Ok(options)
}

fn run_command(settings: &mut Settings, command: CliCommand, format: OutputFormat) -> Result<()> {
    match command {
        CliCommand::SetGamePath(path) => {
            if !path.is_dir() {
                bail!("Game folder not found: {}", path.display());
            }
            settings.set_game_path(&path)?;
            println!("Game path set to: {}", path.display());
            Ok(())
        }
        CliCommand::Paths => list_paths(settings, format),
        CliCommand::Locked => list_locked(settings, format),
        CliCommand::Lock(ids) => {
            let registry = open_registry(settings)?;
            for id in &ids {
                if registry.get(id).is_none() {
                    bail!("Mod not found: {id}");
                }
            }
            settings.lock_mods(&ids)?;
            println!("Locked {} mod(s)", ids.len());
            Ok(())
        }
        CliCommand::Unlock(Some(id)) => {
            if settings.unlock_mod(&id)? {
                println!("Unlocked {id}");
            } else {
                println!("{id} was not locked");
            }
            Ok(())
        }
        CliCommand::Unlock(None) => {
            let count = settings.clear_locks()?;
            println!("Unlocked {count} mod(s)");
            Ok(())
        }
        command => {
            let mut registry = open_registry(settings)?;
            for warning in registry.warnings() {
                tracing::warn!("{warning}");
            }
            run_registry_command(&mut registry, settings, command, format)
        }
    }
}

fn open_registry(settings: &Settings) -> Result<ModRegistry> {
    ModRegistry::open(settings).context("open mod registry (run 'config set-game-path <path>')")
}

fn run_registry_command(
    registry: &mut ModRegistry,
    settings: &mut Settings,
    command: CliCommand,
    format: OutputFormat,
) -> Result<()> {
    match command {
        CliCommand::ModsList(options) => list_mods(registry, settings, options, format),
        CliCommand::ModsShow(id) => show_mod(registry, settings, &id, format),
        CliCommand::Validate => {
            registry.validate()?;
            println!("Mod installation is valid ({} mods)", registry.mods().count());
            Ok(())
        }
        CliCommand::Conflicts => list_conflicts(registry, format),
        CliCommand::Deploy { dry_run } => deploy(registry, settings, dry_run, format),
        CliCommand::Add(options) => add_mod(registry, options),
        CliCommand::Remove(id) => {
            let removed = registry.remove(&id, settings)?;
            println!("Removed mod: {} ({})", removed.name, removed.id);
            Ok(())
        }
        CliCommand::Orphans { prune } => list_orphans(registry, prune, format),
        CliCommand::SetGamePath(_)
        | CliCommand::Paths
        | CliCommand::Locked
        | CliCommand::Lock(_)
        | CliCommand::Unlock(_)
        | CliCommand::Help
        | CliCommand::Version => {
            unreachable!("settings-only commands are dispatched before the registry opens")
        }
    }
}

#[derive(Serialize)]
struct ModListItem<'a> {
    order: usize,
    id: &'a str,
    name: &'a str,
    downloads: usize,
    overrides: usize,
    locked: bool,
}

fn list_mods(
    registry: &ModRegistry,
    settings: &Settings,
    options: ModsListOptions,
    format: OutputFormat,
) -> Result<()> {
    let mut items: Vec<ModListItem> = registry
        .mods()
        .enumerate()
        .map(|(index, mod_entry)| ModListItem {
            order: index + 1,
            id: &mod_entry.id,
            name: &mod_entry.name,
            downloads: mod_entry.download_files.len(),
            overrides: mod_entry.override_files.len(),
            locked: settings.is_mod_locked(&mod_entry.id),
        })
        .collect();

    if let Some(filter) = &options.filter {
        let needle = filter.to_ascii_lowercase();
        items.retain(|item| {
            item.name.to_ascii_lowercase().contains(&needle)
                || item.id.to_ascii_lowercase().contains(&needle)
        });
    }

    match options.sort {
        ModSortKey::Order => items.sort_by_key(|item| item.order),
        ModSortKey::Name => items.sort_by(|a, b| a.name.cmp(&b.name)),
        ModSortKey::Id => items.sort_by(|a, b| a.id.cmp(&b.id)),
    }
    if options.reverse {
        items.reverse();
    }

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&items)?),
        OutputFormat::Text => {
            if items.is_empty() {
                println!("No mods installed.");
            }
            for item in items {
                let locked = if item.locked { "L" } else { " " };
                println!(
                    "{order:>3} [{locked}] {id:<24} {name}  ({downloads} downloads, {overrides} overrides)",
                    order = item.order,
                    id = item.id,
                    name = item.name,
                    downloads = item.downloads,
                    overrides = item.overrides,
                );
            }
        }
    }
    Ok(())
}

#[derive(Serialize)]
struct ModDetail<'a> {
    #[serde(flatten)]
    entry: &'a Mod,
    locked: bool,
    image_path: Option<PathBuf>,
}

fn show_mod(
    registry: &ModRegistry,
    settings: &Settings,
    id: &str,
    format: OutputFormat,
) -> Result<()> {
    let entry = registry
        .get(id)
        .with_context(|| format!("Mod not found: {id}"))?;
    let detail = ModDetail {
        entry,
        locked: settings.is_mod_locked(id),
        image_path: entry
            .image
            .as_ref()
            .map(|image| registry.cache_root().join(&entry.id).join(image)),
    };

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&detail)?),
        OutputFormat::Text => {
            println!("{} ({})", entry.name, entry.id);
            if let Some(description) = &entry.description {
                println!("  {description}");
            }
            if let Some(path) = &detail.image_path {
                println!("Image: {}", path.display());
            }
            if detail.locked {
                println!("Locked: deployed into a played game");
            }
            println!("Downloads:");
            for file in &entry.download_files {
                println!("  {file}");
            }
            println!("Overrides:");
            for file in &entry.override_files {
                println!("  {} -> {}", file.source, file.target);
            }
        }
    }
    Ok(())
}

fn list_conflicts(registry: &ModRegistry, format: OutputFormat) -> Result<()> {
    let conflicts = registry.conflicts();
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&conflicts)?),
        OutputFormat::Text => {
            if conflicts.is_empty() {
                println!("No override conflicts detected.");
            }
            for conflict in conflicts {
                println!("{} <- {}", conflict.target, conflict.mod_ids.join(", "));
            }
        }
    }
    Ok(())
}

fn deploy(
    registry: &ModRegistry,
    settings: &mut Settings,
    dry_run: bool,
    format: OutputFormat,
) -> Result<()> {
    registry
        .validate()
        .context("Mod validation failed; resolve the conflicts and try again")?;

    if dry_run {
        let plan = registry.plan_all()?;
        match format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&plan)?),
            OutputFormat::Text => {
                for op in &plan {
                    let tag = match op.kind {
                        CopyKind::Download => "DOWNLOAD",
                        CopyKind::Override => "OVERRIDE",
                    };
                    println!(
                        "[{tag}] {} -> {}",
                        op.source.display(),
                        op.dest.display()
                    );
                }
                println!("{} file(s) would be copied", plan.len());
            }
        }
        return Ok(());
    }

    let report = registry.deploy_all()?;
    let ids: Vec<&str> = registry.mods().map(|entry| entry.id.as_str()).collect();
    settings.lock_mods(&ids)?;
    settings.mark_played_now()?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Text => println!(
            "Deployed {} mod(s): {} download(s), {} override(s)",
            report.mod_count, report.download_count, report.override_count
        ),
    }
    Ok(())
}

fn add_mod(registry: &mut ModRegistry, options: AddOptions) -> Result<()> {
    let mut draft = ModDraft::new(&options.id);
    if let Some(name) = options.name {
        draft = draft.name(name);
    }
    if let Some(description) = options.description {
        draft = draft.description(description);
    }
    if let Some(image) = options.image {
        draft = draft.image(image);
    }
    for path in options.downloads {
        draft = draft.download(path);
    }
    for dir in &options.download_dirs {
        draft = draft.download_dir(dir)?;
    }
    for (source, target) in options.overrides {
        draft = draft.override_file(source, target);
    }

    registry.add(draft)?;
    println!("Added mod: {}", options.id);
    Ok(())
}

fn list_orphans(registry: &ModRegistry, prune: bool, format: OutputFormat) -> Result<()> {
    let orphans = if prune {
        registry.prune_orphans()?
    } else {
        registry.orphaned_cache_dirs()?
    };
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&orphans)?),
        OutputFormat::Text => {
            if orphans.is_empty() {
                println!("No orphaned cache folders.");
            }
            let verb = if prune { "Removed" } else { "Orphaned" };
            for path in orphans {
                println!("{verb}: {}", path.display());
            }
        }
    }
    Ok(())
}

#[derive(Serialize)]
struct LockedOutput<'a> {
    locked_mods: &'a [String],
    last_played: Option<&'a str>,
}

fn list_locked(settings: &Settings, format: OutputFormat) -> Result<()> {
    let output = LockedOutput {
        locked_mods: settings.locked_mods(),
        last_played: settings.last_played(),
    };
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&output)?),
        OutputFormat::Text => {
            if output.locked_mods.is_empty() {
                println!("No locked mods.");
            }
            for id in output.locked_mods {
                println!("{id}");
            }
        }
    }
    Ok(())
}

#[derive(Serialize)]
struct PathsOutput {
    settings: String,
    game_root: Option<String>,
    cache_root: Option<String>,
    downloads: Option<String>,
    last_played: Option<String>,
}

fn list_paths(settings: &Settings, format: OutputFormat) -> Result<()> {
    let game_root = settings.game_path();
    let output = PathsOutput {
        settings: settings.path().display().to_string(),
        game_root: game_root.map(|path| path.display().to_string()),
        cache_root: game_root.map(|path| path.join(CACHE_DIR).display().to_string()),
        downloads: game_root.map(|path| path.join(DOWNLOADS_DIR).display().to_string()),
        last_played: settings.last_played().map(str::to_string),
    };

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&output)?),
        OutputFormat::Text => {
            let unset = || "(not set)".to_string();
            println!("Settings: {}", output.settings);
            println!("Game root: {}", output.game_root.unwrap_or_else(unset));
            println!("Mod cache: {}", output.cache_root.unwrap_or_else(unset));
            println!("Downloads: {}", output.downloads.unwrap_or_else(unset));
            println!("Last played: {}", output.last_played.unwrap_or_else(unset));
        }
    }
    Ok(())
}

fn print_help() {
    println!("TS1 ModLoader v{}", env!("CARGO_PKG_VERSION"));
    println!("Usage:");
    println!("  ts1-modloader mods list                 List installed mods");
    println!("  ts1-modloader mods show <id>            Show one mod");
    println!("  ts1-modloader validate                  Check for duplicate ids and override conflicts");
    println!("  ts1-modloader conflicts                 List every contested override target");
    println!("  ts1-modloader deploy [--dry-run]        Validate, copy all mods into the game, lock them");
    println!("  ts1-modloader add <id> [options]        Add a mod from local files");
    println!("  ts1-modloader remove <id>               Remove a mod and its cached files");
    println!("  ts1-modloader lock <id>...              Protect mods from removal");
    println!("  ts1-modloader unlock <id> | --all       Allow removal again");
    println!("  ts1-modloader locked                    List locked mods");
    println!("  ts1-modloader orphans [--prune]         Find cache folders no mod owns");
    println!("  ts1-modloader config set-game-path <p>  Set the game folder");
    println!("  ts1-modloader paths                     Show configured paths");
    println!();
    println!("Global options:");
    println!("  --settings <path>                       Settings file to use");
    println!("  --format <json|text>                    Output format");
    println!("  -q, --quiet                             Errors only");
    println!("  -v, -vv                                 Increase verbosity");
    println!("  --verbosity <level>                     quiet | normal | verbose | debug");
    println!();
    println!("Mods list options:");
    println!("  --sort <order|name|id>  --reverse  --filter <text>");
    println!();
    println!("Add options:");
    println!("  --name <text>                           Display name (defaults to id)");
    println!("  --description <text>");
    println!("  --image <path>                          Preview image");
    println!("  --download <path>                       File for Downloads/<id>/ (repeatable)");
    println!("  --download-dir <dir>                    Every file below dir (repeatable)");
    println!("  --override <path>=<target>              File placed at <target> under the game root");
}
