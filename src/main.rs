mod compile;
mod condition;
mod depend;
mod document;
mod error;
mod exec;
mod project;
mod resolve;
mod subst;

use std::env;
use std::fs;
use std::process::ExitCode;

use clap::Parser;

use error::{Error, Result};
use project::{PrebuildRef, SourceKind};
use resolve::Invocation;

#[derive(Parser, Debug)]
#[command(name = "pymake")]
#[command(about = "Compiles a C/C++/assembly project as specified in its XML project file")]
#[command(after_help = "Example: pymake -c -p -g Debug -s target:x86 -o main.c")]
#[command(disable_version_flag = true)]
struct Args {
    /// Show the version number and exit
    #[arg(short = 'v', long = "version")]
    version: bool,

    /// Clean before building
    #[arg(short, long)]
    clean: bool,

    /// Build prebuild projects recursively
    #[arg(short, long)]
    prebuild: bool,

    /// Project XML file to use
    #[arg(short, long, default_value = "pyMake.xml")]
    file: String,

    /// Build configuration from the project file
    #[arg(short = 'g', long = "cfg", default_value = "Release")]
    cfg: String,

    /// Compile just the named source file; suppresses linking
    #[arg(short = 'o', long = "one")]
    one: Option<String>,

    /// Add key:value substitution pairs (repeatable; one argument may
    /// carry several ;-delimited pairs)
    #[arg(short = 's', long = "sub")]
    sub: Vec<String>,

    /// Dictionary XML file with <dict> entries (repeatable)
    #[arg(short = 'i', long = "inc")]
    inc: Vec<String>,

    /// Dump the resolved XML after each evaluation phase
    #[arg(short = 'x', long = "dump-xml")]
    dump_xml: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();

    if args.version {
        println!("pymake version {}", env!("CARGO_PKG_VERSION"));
        return ExitCode::SUCCESS;
    }

    println!();
    println!("Build parameters:");
    println!("    clean:          {}", args.clean);
    println!("    prebuild:       {}", args.prebuild);
    println!("    file:           {}", args.file);
    println!("    cfg:            {}", args.cfg);
    println!("    one:            {}", args.one.as_deref().unwrap_or("None"));
    println!("    sub:            {:?}", args.sub);
    println!("    inc:            {:?}", args.inc);

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("ERROR: {err}");
            ExitCode::from(err.exit_code().clamp(1, 255) as u8)
        }
    }
}

fn run(args: &Args) -> Result<()> {
    let mut subs = Vec::new();
    for arg in &args.sub {
        subs.extend(resolve::parse_sub_arg(arg.trim_start())?);
    }
    let single_file = args
        .one
        .as_deref()
        .map(|one| one.trim().to_string())
        .filter(|one| !one.is_empty());
    if let Some(one) = &single_file {
        if SourceKind::from_path(one).is_none() {
            return Err(Error::Usage(format!(
                "unable to compile {one}: need a .s, .c, or .cpp source file"
            )));
        }
    }
    let inv = Invocation {
        config_file: args.file.trim().to_string(),
        configuration: args.cfg.trim().to_string(),
        clean: args.clean,
        prebuilds: args.prebuild,
        subs,
        dict_files: args.inc.iter().map(|i| i.trim().to_string()).collect(),
        single_file,
        dump_xml: args.dump_xml,
    };
    build(&inv)
}

/// Build the project in the current working directory. Prebuild recursion
/// re-enters here after switching into the sub-project.
fn build(inv: &Invocation) -> Result<()> {
    let cwd = env::current_dir().map_err(|e| Error::io(".", e))?;
    println!("\npymake executing in {}", cwd.display());

    let project = resolve::resolve(inv, &cwd)?;
    let out_dir = project.output_dir();
    if inv.clean {
        exec::clean_output_dir(&out_dir)?;
    } else if !out_dir.exists() {
        fs::create_dir_all(&out_dir).map_err(|e| Error::io(&out_dir, e))?;
    }

    for op in &project.pre_ops {
        println!("\n{op}");
        exec::run(op)?;
    }

    if inv.prebuilds {
        for prebuild in &project.prebuilds {
            run_prebuild(inv, prebuild)?;
        }
    }

    let mut compiled = false;
    let mut compdb = Vec::new();
    for source in &project.sources {
        let command = compile::compile_command(&project, source);
        compdb.push(compile::compdb_entry(&project, source, &command));
        if let Some(one) = &inv.single_file {
            if source.file_name() != one.as_str() {
                continue;
            }
        } else if !inv.clean && !depend::is_stale(&project, source) {
            continue;
        }
        if let Some(parent) = project.object_path(source).parent() {
            fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
        }
        println!("\nCompiling {}\n", source.path);
        println!("{command}");
        exec::run(&command)?;
        compiled = true;
    }
    compile::write_compdb(&project, &compdb)?;

    // Single-file mode stops here: no link, no post-ops.
    if inv.single_file.is_some() {
        println!("\npymake returning from {}", cwd.display());
        return Ok(());
    }

    if compiled || depend::needs_link(&project) {
        println!("\nCreating {}\n", project.artifact_full_name());
        for command in compile::artifact_commands(&project) {
            println!("{command}");
            exec::run(&command)?;
        }
    } else {
        println!("\n{} is up to date", project.artifact_full_name());
    }

    for op in &project.post_ops {
        println!("\n{op}");
        exec::run(op)?;
    }

    println!("\npymake returning from {}", cwd.display());
    Ok(())
}

fn run_prebuild(inv: &Invocation, prebuild: &PrebuildRef) -> Result<()> {
    let child = Invocation {
        config_file: prebuild.config_file.clone(),
        configuration: prebuild.configuration.clone(),
        clean: prebuild.clean,
        prebuilds: prebuild.prebuilds,
        subs: prebuild.subs.clone(),
        dict_files: Vec::new(),
        single_file: None,
        dump_xml: inv.dump_xml,
    };
    let parent_dir = env::current_dir().map_err(|e| Error::io(".", e))?;
    env::set_current_dir(&prebuild.path).map_err(|e| Error::io(prebuild.path.as_str(), e))?;
    let result = build(&child);
    env::set_current_dir(&parent_dir).map_err(|e| Error::io(&parent_dir, e))?;
    result
}
