use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use tracing_subscriber::EnvFilter;

use dcat::{
    comparison_tree, format_size, format_timestamp, CatalogId, CompareOptions, Config, DiffStatus,
    Engine, JobHandle, JobOutcome, JobOutput, Node, TreeItem,
};

const USAGE: &str = "Usage: dcat [--config <file>] <command>

Commands:
  list                              List catalogs, newest first
  new <dir> [--hash]                Catalog a directory
  update <id> [--hash]              Re-walk a catalog's root
  rename <id> <name>                Rename a catalog
  delete <id>                       Delete a catalog and its entries
  show <id>                         Print a catalog as a tree
  compare <id> <dir> [--no-size] [--digest]
                                    Compare a catalog against a folder";

fn parse_id(arg: Option<&String>) -> Result<CatalogId> {
    let raw = arg.context("missing catalog id")?;
    let id = raw
        .parse::<i64>()
        .with_context(|| format!("invalid catalog id '{raw}'"))?;
    Ok(CatalogId(id))
}

// ------------------------- progress / outcome ------------------------------

fn run_job(handle: JobHandle) -> Result<JobOutput> {
    let name = handle.name().to_string();
    let mut stderr = io::stderr();
    let outcome = handle.wait_with(|p| {
        let _ = write!(
            stderr,
            "\r[{:>5.1}%] {} / {} {:<60.60}",
            p.percent(),
            p.processed,
            p.total,
            p.label
        );
        let _ = stderr.flush();
    });
    eprintln!();

    match outcome {
        JobOutcome::Completed(out) => Ok(out),
        JobOutcome::Failed(e) => Err(e).with_context(|| format!("{name} failed")),
        JobOutcome::Cancelled => bail!("{name} cancelled"),
    }
}

fn print_tree<T: TreeItem>(forest: &[Node<T>], describe: impl Fn(&T) -> String) {
    for root in forest {
        root.walk(0, &mut |node, depth| {
            println!(
                "{}{}  {}",
                "  ".repeat(depth),
                node.item.name(),
                describe(&node.item)
            );
        });
    }
}

// ------------------------- main --------------------------------------------

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let mut args: Vec<String> = std::env::args().skip(1).collect();
    let mut config_path = PathBuf::from("dcat.json");
    if args.first().map(String::as_str) == Some("--config") {
        if args.len() < 2 {
            bail!("--config needs a path\n\n{USAGE}");
        }
        config_path = PathBuf::from(&args[1]);
        args.drain(..2);
    }

    let config = Config::load(&config_path)?;
    let engine = Engine::open(config)?;
    let flag = |name: &str| args.iter().any(|a| a == name);

    let Some(command) = args.first() else {
        eprintln!("{USAGE}");
        std::process::exit(1);
    };

    match command.as_str() {
        "list" => {
            for c in engine.list_catalogs()? {
                let base = c
                    .root_path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                println!("{:>5}  {} ({})", c.id, c.name, base);
            }
        }
        "new" => {
            let dir = args.get(1).context("missing directory")?;
            let hash = flag("--hash") || engine.config().compute_digest;
            if let JobOutput::Catalog(id) = run_job(engine.create_catalog(Path::new(dir), hash))? {
                println!("created catalog {id}");
            }
        }
        "update" => {
            let id = parse_id(args.get(1))?;
            let hash = flag("--hash") || engine.config().compute_digest;
            run_job(engine.update_catalog(id, hash))?;
            println!("updated catalog {id}");
        }
        "rename" => {
            let id = parse_id(args.get(1))?;
            let name = args.get(2).context("missing new name")?;
            engine.rename_catalog(id, name)?;
            println!("renamed catalog {id} to '{name}'");
        }
        "delete" => {
            let id = parse_id(args.get(1))?;
            engine.delete_catalog(id)?;
            println!("deleted catalog {id}");
        }
        "show" => {
            let id = parse_id(args.get(1))?;
            let forest = engine.load_catalog_tree(id)?;
            print_tree(&forest, |e| {
                let size = if e.is_dir {
                    String::new()
                } else {
                    format_size(e.size)
                };
                format!("{size:>10}  {}", format_timestamp(e.modified))
            });
        }
        "compare" => {
            let id = parse_id(args.get(1))?;
            let dir = args.get(2).context("missing directory to compare")?;
            let defaults = engine.config().compare_options();
            let options = CompareOptions {
                check_size: defaults.check_size && !flag("--no-size"),
                check_digest: defaults.check_digest || flag("--digest"),
            };
            if let JobOutput::Comparison(cmp) =
                run_job(engine.compare_catalog(id, Path::new(dir), options))?
            {
                print_tree(&comparison_tree(&cmp), |d| match d.status {
                    DiffStatus::Same => String::new(),
                    status => format!("[{status}]"),
                });
                println!(
                    "{} new, {} missing, {} modified, {} unreadable",
                    cmp.count(DiffStatus::New),
                    cmp.count(DiffStatus::Missing),
                    cmp.count(DiffStatus::Modified),
                    cmp.skipped.len()
                );
            }
        }
        other => bail!("unknown command '{other}'\n\n{USAGE}"),
    }

    Ok(())
}
