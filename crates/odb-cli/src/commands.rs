use std::collections::{BTreeSet, HashSet};
use std::fs::File;
use std::io::{self, IsTerminal};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context as _};
use colored::Colorize;
use odb_fs::BackendRegistry;
use odb_store::ObjectStore;
use odb_transfer::{
    BatchReport, CancelToken, Diff, Progress, ProgressEvent, StatusEngine, Transfer, TransferConfig, TransferError,
};
use odb_types::ObjectReference;
use serde::Serialize;
use tracing::debug;

use crate::cli::*;
use crate::config::OdbConfig;

pub async fn run_command(cli: Cli) -> anyhow::Result<()> {
    let ctx = Context::new(OdbConfig::load(cli.config.as_deref())?, cli.format);
    match cli.command {
        Command::Put(args) => cmd_put(&ctx, args),
        Command::Get(args) => cmd_get(&ctx, args),
        Command::Contains(args) => cmd_contains(&ctx, args),
        Command::Rm(args) => cmd_rm(&ctx, args),
        Command::Ls(args) => cmd_ls(&ctx, args),
        Command::Status(args) => cmd_status(&ctx, args).await,
        Command::Push(args) => cmd_transfer(&ctx, args, Direction::Push).await,
        Command::Pull(args) => cmd_transfer(&ctx, args, Direction::Pull).await,
        Command::Gc(args) => cmd_gc(&ctx, args),
        Command::Verify(args) => cmd_verify(&ctx, args),
    }
}

struct Context {
    config: OdbConfig,
    registry: BackendRegistry,
    format: OutputFormat,
}

impl Context {
    fn new(config: OdbConfig, format: OutputFormat) -> Self {
        Self {
            config,
            registry: BackendRegistry::default(),
            format,
        }
    }

    fn cache(&self) -> anyhow::Result<Arc<ObjectStore>> {
        let location = self.config.cache_location()?;
        debug!(location = %location, "opening cache");
        let store = ObjectStore::open(location, &self.registry, self.config.cache_store_config())?;
        Ok(Arc::new(store))
    }

    fn remote(&self, name: Option<&str>) -> anyhow::Result<Arc<ObjectStore>> {
        let (location, config) = self.config.remote(name)?;
        debug!(location = %location, "opening remote");
        let store = ObjectStore::open(location.clone(), &self.registry, config)
            .with_context(|| format!("opening remote {location}"))?;
        Ok(Arc::new(store))
    }

    /// The named remote, or the cache when no remote is given.
    fn store(&self, remote: Option<&str>) -> anyhow::Result<Arc<ObjectStore>> {
        match remote {
            Some(name) => self.remote(Some(name)),
            None => self.cache(),
        }
    }

    /// A progress line on stderr, for text output on a terminal only.
    fn progress(&self) -> Progress {
        if self.json() || !io::stderr().is_terminal() {
            return Progress::none();
        }
        let bytes = Arc::new(AtomicU64::new(0));
        Progress::new(move |event| match event {
            ProgressEvent::Estimating { estimated } => {
                eprint!("\r{:<60}", format!("estimating: ~{estimated} objects"));
            }
            ProgressEvent::Querying { done, total } => {
                eprint!("\r{:<60}", format!("querying: {done}/{total}"));
            }
            ProgressEvent::Bytes { delta, .. } => {
                bytes.fetch_add(*delta, Ordering::Relaxed);
            }
            ProgressEvent::TaskFinished { done, total, .. } => {
                let moved = bytes.load(Ordering::Relaxed);
                eprint!("\r{:<60}", format!("transferring: {done}/{total} objects, {moved} bytes"));
            }
        })
    }

    fn transfer_config(&self, jobs: Option<usize>) -> TransferConfig {
        let config = self.config.transfer.clone();
        match jobs {
            Some(jobs) => config.with_concurrency(jobs),
            None => config,
        }
    }

    fn json(&self) -> bool {
        self.format == OutputFormat::Json
    }
}

fn emit_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Full reference, bare digest, or a unique abbreviated digest.
fn resolve(store: &ObjectStore, input: &str) -> anyhow::Result<ObjectReference> {
    if input.contains(':') {
        return Ok(ObjectReference::parse(input)?);
    }
    if input.len() == store.algorithm().hex_len() {
        return Ok(ObjectReference::from_hex(store.algorithm(), input)?);
    }
    store
        .resolve_prefix(input)
        .with_context(|| format!("resolving {input:?}"))
}

fn resolve_all(store: &ObjectStore, inputs: &[String]) -> anyhow::Result<BTreeSet<ObjectReference>> {
    inputs.iter().map(|input| resolve(store, input)).collect()
}

fn all_refs(store: &ObjectStore) -> anyhow::Result<BTreeSet<ObjectReference>> {
    Ok(store.all()?.collect::<Result<_, _>>()?)
}

fn require_refs(store: &ObjectStore, inputs: &[String]) -> anyhow::Result<BTreeSet<ObjectReference>> {
    if inputs.is_empty() {
        bail!("no references given");
    }
    resolve_all(store, inputs)
}

// ---------------------------------------------------------------------------
// Local commands
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct PutEntry {
    path: String,
    reference: ObjectReference,
    size: u64,
    created: bool,
}

fn cmd_put(ctx: &Context, args: PutArgs) -> anyhow::Result<()> {
    let store = ctx.cache()?;
    let mut entries = Vec::with_capacity(args.paths.len());
    for path in &args.paths {
        let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
        let info = store.put(file, None)?;
        entries.push(PutEntry {
            path: path.display().to_string(),
            reference: info.reference,
            size: info.size,
            created: info.created,
        });
    }

    if ctx.json() {
        return emit_json(&entries);
    }
    for entry in &entries {
        let marker = if entry.created { "added".green() } else { "exists".dimmed() };
        println!("{} {} {}", entry.reference.to_string().yellow(), marker, entry.path);
    }
    Ok(())
}

fn cmd_get(ctx: &Context, args: GetArgs) -> anyhow::Result<()> {
    let store = ctx.store(args.remote.as_deref())?;
    let reference = resolve(&store, &args.reference)?;
    let mut reader = store.get(&reference)?;
    match &args.output {
        Some(path) => {
            let mut file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
            let bytes = io::copy(&mut reader, &mut file)?;
            if !ctx.json() {
                eprintln!("{} wrote {} bytes to {}", "✓".green(), bytes, path.display());
            }
        }
        None => {
            io::copy(&mut reader, &mut io::stdout().lock())?;
        }
    }
    Ok(())
}

#[derive(Serialize)]
struct PresenceEntry {
    reference: ObjectReference,
    present: bool,
}

fn cmd_contains(ctx: &Context, args: RefsArgs) -> anyhow::Result<()> {
    let store = ctx.store(args.remote.as_deref())?;
    let mut entries = Vec::new();
    for reference in require_refs(&store, &args.references)? {
        entries.push(PresenceEntry {
            reference,
            present: store.contains(&reference)?,
        });
    }

    if ctx.json() {
        return emit_json(&entries);
    }
    for entry in &entries {
        let state = if entry.present { "present".green() } else { "missing".red() };
        println!("{} {}", entry.reference, state);
    }
    Ok(())
}

fn cmd_rm(ctx: &Context, args: RefsArgs) -> anyhow::Result<()> {
    let store = ctx.store(args.remote.as_deref())?;
    let mut removed = Vec::new();
    for reference in require_refs(&store, &args.references)? {
        if store.remove(&reference)? {
            removed.push(reference);
        }
    }

    if ctx.json() {
        return emit_json(&removed);
    }
    for reference in &removed {
        println!("{} {}", "removed".red(), reference);
    }
    println!("{} {} object(s) removed", "✓".green(), removed.len());
    Ok(())
}

fn cmd_ls(ctx: &Context, args: LsArgs) -> anyhow::Result<()> {
    let store = ctx.store(args.remote.as_deref())?;
    let refs: BTreeSet<ObjectReference> = match &args.shard {
        Some(shard) => store.list_prefix(shard)?.collect::<Result<_, _>>()?,
        None => all_refs(&store)?,
    };

    if ctx.json() {
        return emit_json(&refs);
    }
    for reference in &refs {
        println!("{reference}");
    }
    Ok(())
}

fn cmd_gc(ctx: &Context, args: GcArgs) -> anyhow::Result<()> {
    if args.keep.is_empty() && !args.all {
        bail!("refusing to remove every object; pass --keep <ref>... or --all");
    }
    let store = ctx.store(args.remote.as_deref())?;
    let keep: HashSet<ObjectReference> = resolve_all(&store, &args.keep)?.into_iter().collect();
    let report = store.gc(&keep, Duration::from_secs(args.grace_secs))?;

    if ctx.json() {
        return emit_json(&report);
    }
    println!(
        "{} GC: {} objects removed, {} temp files removed, {} bytes freed",
        "✓".green(),
        report.objects_removed.to_string().bold(),
        report.temps_removed,
        report.bytes_freed
    );
    Ok(())
}

#[derive(Serialize)]
struct VerifyEntry {
    reference: ObjectReference,
    valid: bool,
}

fn cmd_verify(ctx: &Context, args: RefsArgs) -> anyhow::Result<()> {
    let store = ctx.store(args.remote.as_deref())?;
    let refs = if args.references.is_empty() {
        all_refs(&store)?
    } else {
        resolve_all(&store, &args.references)?
    };
    let mut entries = Vec::with_capacity(refs.len());
    for reference in refs {
        entries.push(VerifyEntry {
            reference,
            valid: store.verify(&reference)?,
        });
    }
    let corrupt = entries.iter().filter(|e| !e.valid).count();

    if ctx.json() {
        emit_json(&entries)?;
    } else {
        for entry in entries.iter().filter(|e| !e.valid) {
            println!("{} {}", "corrupt".red().bold(), entry.reference);
        }
        if corrupt == 0 {
            println!("{} {} object(s) verified", "✓".green().bold(), entries.len());
        }
    }
    if corrupt > 0 {
        bail!("{corrupt} corrupt object(s)");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Remote commands
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Direction {
    Push,
    Pull,
}

async fn cmd_status(ctx: &Context, args: RemoteRefsArgs) -> anyhow::Result<()> {
    let cache = ctx.cache()?;
    let remote = ctx.remote(args.remote.as_deref())?;
    let config = ctx.transfer_config(args.jobs);
    let progress = ctx.progress();
    let engine = StatusEngine::new(config.jobs())
        .with_retry(config.retry)
        .with_progress(progress.clone());
    let diff = if args.references.is_empty() {
        engine.remote_status(&all_refs(&cache)?, &remote).await?
    } else {
        engine.diff(&cache, &remote, &resolve_all(&cache, &args.references)?).await?
    };
    end_progress_line(&progress);

    if ctx.json() {
        return emit_json(&diff);
    }
    print_diff(&diff);
    Ok(())
}

fn print_diff(diff: &Diff) {
    if diff.is_in_sync() && diff.missing_both.is_empty() {
        println!("{} cache and remote are in sync ({} objects)", "✓".green(), diff.present_both.len());
        return;
    }
    let sections = [
        ("new locally", &diff.missing_on_remote, "yellow"),
        ("only on remote", &diff.missing_on_local, "cyan"),
        ("missing everywhere", &diff.missing_both, "red"),
    ];
    for (title, refs, color) in sections {
        if refs.is_empty() {
            continue;
        }
        println!("{} ({}):", title.bold(), refs.len());
        for reference in refs {
            println!("  {}", reference.to_string().color(color));
        }
    }
    println!("{} object(s) in sync", diff.present_both.len());
}

async fn cmd_transfer(ctx: &Context, args: RemoteRefsArgs, direction: Direction) -> anyhow::Result<()> {
    let cache = ctx.cache()?;
    let remote = ctx.remote(args.remote.as_deref())?;
    let (src, dst) = match direction {
        Direction::Push => (cache, remote),
        Direction::Pull => (remote, cache),
    };
    let refs = if args.references.is_empty() {
        all_refs(&src)?
    } else {
        resolve_all(&src, &args.references)?
    };

    let cancel = CancelToken::new();
    let on_interrupt = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        })
    };
    let progress = ctx.progress();
    let outcome = Transfer::new(ctx.transfer_config(args.jobs))
        .with_progress(progress.clone())
        .sync(&src, &dst, &refs, &cancel)
        .await;
    on_interrupt.abort();
    end_progress_line(&progress);

    let summary = match outcome {
        Ok(summary) => summary,
        Err(TransferError::BackendUnavailable { report }) => {
            print_report(ctx, &report)?;
            bail!("no transfer between {} and {} succeeded: backend unavailable", src.location(), dst.location());
        }
        Err(e) => return Err(e.into()),
    };

    if ctx.json() {
        emit_json(&summary)?;
    } else {
        if !summary.diff.missing_both.is_empty() {
            println!(
                "{} {} object(s) missing from both {} and {}",
                "!".yellow().bold(),
                summary.diff.missing_both.len(),
                src.location(),
                dst.location()
            );
        }
        print_report(ctx, &summary.report)?;
    }
    if summary.report.cancelled {
        bail!("transfer cancelled");
    }
    if summary.report.failed_count > 0 {
        bail!("{} transfer(s) failed", summary.report.failed_count);
    }
    Ok(())
}

fn end_progress_line(progress: &Progress) {
    if progress.is_enabled() {
        eprintln!();
    }
}

fn print_report(ctx: &Context, report: &BatchReport) -> anyhow::Result<()> {
    if ctx.json() {
        return emit_json(report);
    }
    for result in report.failed() {
        if let Some(failure) = result.failure() {
            println!("{} {} {}", "✗".red(), result.reference, failure.to_string().red());
        }
    }
    println!(
        "{} {} transferred, {} already present, {} failed ({} bytes)",
        if report.is_success() { "✓".green() } else { "✗".red() },
        report.succeeded().count().to_string().bold(),
        report.skipped().count(),
        report.failed_count,
        report.total_bytes
    );
    Ok(())
}
