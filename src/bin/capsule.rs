//! Capsule CLI
//!
//! Drives the container library from the command line and implements the
//! run-time side of the embedded stub: `capsule run` is what the default
//! stub hands off to.

use anyhow::{bail, Context, Result};
use capsule::bootstrap::{self, Bootstrap};
use capsule::{hooks, walk, Capsule, Compression, PathKind, PathManager};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "capsule")]
#[command(about = "Self-verifying, self-extracting single-file containers")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Verify a container, extract it to the cache, and run its primary path
    Run {
        /// Path to the container
        container: PathBuf,

        /// Arguments passed through to the primary
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },

    /// Create a container from a directory tree
    Create {
        /// Destination container file
        dest: PathBuf,

        /// Directory to package
        #[arg(short, long)]
        from: PathBuf,

        /// Compression for stored file contents
        #[arg(long, value_enum, default_value_t = Mode::None)]
        compression: Mode,

        /// Shebang line for the bootstrap stub
        #[arg(long)]
        shebang: Option<String>,
    },

    /// Extract stored paths to a directory
    Extract {
        /// Path to the container
        container: PathBuf,

        /// Output directory
        #[arg(short, long, default_value = ".")]
        out: PathBuf,

        /// Leave existing files alone
        #[arg(long)]
        no_overwrite: bool,

        /// Restrict extraction to these container paths
        paths: Vec<String>,
    },

    /// List stored paths
    Ls {
        /// Path to the container
        container: PathBuf,
    },

    /// Check a container's signature
    Verify {
        /// Path to the container
        container: PathBuf,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Mode {
    None,
    Gzip,
    Bzip2,
}

impl From<Mode> for Compression {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::None => Compression::None,
            Mode::Gzip => Compression::Gzip,
            Mode::Bzip2 => Compression::Bzip2,
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    match Cli::parse().command {
        Command::Run { container, args } => run(container, args),
        Command::Create {
            dest,
            from,
            compression,
            shebang,
        } => create(dest, from, compression.into(), shebang),
        Command::Extract {
            container,
            out,
            no_overwrite,
            paths,
        } => extract(container, out, no_overwrite, paths),
        Command::Ls { container } => ls(container),
        Command::Verify { container } => verify(container),
    }
}

fn run(container: PathBuf, args: Vec<String>) -> Result<()> {
    let primary = Bootstrap::new(&container)
        .run()
        .with_context(|| format!("failed to bootstrap {}", container.display()))?;

    let Some(primary) = primary else {
        // Nothing to hand off to; extraction alone was the point.
        return Ok(());
    };

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;

        let error = std::process::Command::new(&primary).args(&args).exec();
        bail!("failed to execute {}: {error}", primary.display());
    }

    #[cfg(not(unix))]
    {
        let status = std::process::Command::new(&primary).args(&args).status()?;
        std::process::exit(status.code().unwrap_or(1));
    }
}

fn create(dest: PathBuf, from: PathBuf, compression: Compression, shebang: Option<String>) -> Result<()> {
    let stub = bootstrap::create_stub(shebang.as_deref());

    let mut capsule = Capsule::create_with_stub(&dest, stub)?;
    capsule.set_compression(compression);

    // Containers are meant to be runnable directly.
    capsule.events().commit.after(0, hooks::chmod(0o755));

    capsule.set_paths_from_iter(walk::walk(from))?;
    capsule.commit()?;

    println!("{}: {} paths", dest.display(), capsule.count()?);

    Ok(())
}

fn extract(container: PathBuf, out: PathBuf, no_overwrite: bool, paths: Vec<String>) -> Result<()> {
    let capsule = Capsule::open(&container)?;
    capsule.extract_to(&out, &paths, !no_overwrite)?;

    Ok(())
}

fn ls(container: PathBuf) -> Result<()> {
    let capsule = Capsule::open(&container)?;

    for item in capsule.paths() {
        let (path, manager) = item?;

        let kind = match manager.kind() {
            PathKind::File => "f",
            PathKind::Directory => "d",
        };
        let size = manager.contents()?.map(|contents| contents.len()).unwrap_or(0);

        println!("{kind} {:04o} {size:>9} {path}", manager.permissions());
    }

    Ok(())
}

fn verify(container: PathBuf) -> Result<()> {
    if Capsule::is_valid(&container)? {
        println!("{}: valid", container.display());
        Ok(())
    } else {
        bail!("{}: signature mismatch", container.display());
    }
}
