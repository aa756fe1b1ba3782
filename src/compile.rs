use std::fmt::Write as _;
use std::fs;

use serde::Serialize;

use crate::error::{Error, Result};
use crate::project::{ArtifactKind, ResolvedProject, SourceEntry, SourceKind};

/// One entry of `compile_commands.json`, the layout clang tooling expects.
#[derive(Serialize)]
pub struct CompileCommand {
    pub directory: String,
    pub file: String,
    pub command: String,
    pub output: String,
}

/// Compose the compile command for one source file.
///
/// Flag order is part of the observable contract: toolchain flags come
/// with the driver, then include paths, then global, configuration and
/// per-file flags, then the optimization and debugging levels (per-file
/// override first), then the dependency-file flags and the source/object
/// pair.
pub fn compile_command(project: &ResolvedProject, source: &SourceEntry) -> String {
    let driver = match source.kind {
        SourceKind::C => "gcc",
        // The C++ driver also assembles; `.S` files get the C preprocessor
        // that way.
        SourceKind::Cpp | SourceKind::Assembly => "g++",
    };
    let mut cmd = format!("{}{driver}", project.toolchain.cc_prefix());

    push_lang_flags(&mut cmd, source.kind, &project.toolchain.ccflags, &project.toolchain.cflags, &project.toolchain.cppflags, &project.toolchain.aflags);
    for include in &project.includes {
        let _ = write!(cmd, " -I{include}");
    }
    push_lang_flags(&mut cmd, source.kind, &project.ccflags, &project.cflags, &project.cppflags, &project.aflags);
    let cfg = &project.configuration;
    push_lang_flags(&mut cmd, source.kind, &cfg.ccflags, &cfg.cflags, &cfg.cppflags, &cfg.aflags);
    for flag in &source.ccflags {
        let _ = write!(cmd, " {flag}");
    }
    let optimization = source.optimization.as_ref().unwrap_or(&cfg.optimization);
    let _ = write!(cmd, " {optimization}");
    if let Some(debugging) = source.debugging.as_ref().or(cfg.debugging.as_ref()) {
        let _ = write!(cmd, " {debugging}");
    }
    let _ = write!(
        cmd,
        " -MMD -MF {} -c {} -o {}",
        project.dep_path(source).display(),
        source.path,
        project.object_path(source).display()
    );
    cmd
}

fn push_lang_flags(
    cmd: &mut String,
    kind: SourceKind,
    ccflags: &[String],
    cflags: &[String],
    cppflags: &[String],
    aflags: &[String],
) {
    let lang = match kind {
        SourceKind::C => cflags,
        SourceKind::Cpp => cppflags,
        SourceKind::Assembly => aflags,
    };
    for flag in ccflags.iter().chain(lang) {
        let _ = write!(cmd, " {flag}");
    }
}

/// Compose the commands that produce the final artifact, in execution
/// order. Usually one command; `bin`/`hex` executables add an objcopy
/// step after the link.
pub fn artifact_commands(project: &ResolvedProject) -> Vec<String> {
    match project.kind {
        ArtifactKind::Library => vec![library_command(project)],
        ArtifactKind::Executable => executable_commands(project),
    }
}

fn library_command(project: &ResolvedProject) -> String {
    let prefix = project.toolchain.cc_prefix();
    let extension = project.extension.as_deref();
    let mut cmd;
    if matches!(extension, Some("so" | "dll")) {
        // Shared library: goes through the driver, not the archiver.
        cmd = format!("{prefix}g++ -shared");
        push_lflags(&mut cmd, project);
        let _ = write!(cmd, " -o {}", project.artifact_path().display());
    } else {
        cmd = format!("{prefix}ar rcs {}", project.artifact_path().display());
    }
    for source in &project.sources {
        let _ = write!(cmd, " {}", project.object_path(source).display());
    }
    for object in &project.objects {
        let _ = write!(cmd, " {object}");
    }
    cmd
}

fn executable_commands(project: &ResolvedProject) -> Vec<String> {
    let prefix = project.toolchain.cc_prefix();
    let mut cmd = format!("{prefix}g++");
    push_lflags(&mut cmd, project);
    for source in &project.sources {
        let _ = write!(cmd, " {}", project.object_path(source).display());
    }
    if !project.objects.is_empty() {
        // Grouped so mutually referencing static libraries resolve
        // regardless of listing order.
        cmd.push_str(" -Wl,--start-group");
        for object in &project.objects {
            let _ = write!(cmd, " {object}");
        }
        cmd.push_str(" -Wl,--end-group");
    }

    let out_dir = project.output_dir();
    match project.extension.as_deref() {
        // Raw-binary and hex artifacts are linked as an elf image first,
        // then converted.
        Some(format @ ("bin" | "hex")) => {
            let elf = out_dir.join(format!("{}.elf", project.artifact));
            let _ = write!(cmd, " -o {}", elf.display());
            let objcopy_format = if format == "bin" { "binary" } else { "ihex" };
            let convert = format!(
                "{prefix}objcopy -O {objcopy_format} {} {}",
                elf.display(),
                project.artifact_path().display()
            );
            vec![cmd, convert]
        }
        _ => {
            let _ = write!(cmd, " -o {}", project.artifact_path().display());
            vec![cmd]
        }
    }
}

fn push_lflags(cmd: &mut String, project: &ResolvedProject) {
    for flag in project
        .toolchain
        .lflags
        .iter()
        .chain(&project.lflags)
        .chain(&project.configuration.lflags)
    {
        let _ = write!(cmd, " {flag}");
    }
}

pub fn compdb_entry(
    project: &ResolvedProject,
    source: &SourceEntry,
    command: &str,
) -> CompileCommand {
    CompileCommand {
        directory: project.project_dir.display().to_string(),
        file: project.project_dir.join(&source.path).display().to_string(),
        command: command.to_string(),
        output: project.object_path(source).display().to_string(),
    }
}

pub fn write_compdb(project: &ResolvedProject, entries: &[CompileCommand]) -> Result<()> {
    let path = project.output_dir().join("compile_commands.json");
    let json = serde_json::to_string_pretty(entries)
        .map_err(|e| Error::config(format!("compile_commands.json: {e}")))?;
    fs::write(&path, json).map_err(|e| Error::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::{Configuration, Toolchain};
    use std::path::PathBuf;

    fn toolchain() -> Toolchain {
        Toolchain {
            name: "x86".into(),
            compiler_path: Some("/usr/bin".into()),
            compiler_prefix: None,
            aflags: vec![],
            ccflags: vec!["-Wall".into()],
            cflags: vec![],
            cppflags: vec!["-std=c++17".into()],
            lflags: vec![],
        }
    }

    fn configuration() -> Configuration {
        Configuration {
            name: "Release".into(),
            toolchain_ref: "x86".into(),
            optimization: "-O2".into(),
            debugging: None,
            aflags: vec![],
            ccflags: vec!["-DNDEBUG".into()],
            cflags: vec![],
            cppflags: vec![],
            lflags: vec!["-lpthread".into()],
        }
    }

    fn project() -> ResolvedProject {
        ResolvedProject {
            project_dir: PathBuf::from("/proj"),
            artifact: "hello".into(),
            extension: None,
            kind: ArtifactKind::Executable,
            toolchain: toolchain(),
            configuration: configuration(),
            aflags: vec![],
            ccflags: vec![],
            cflags: vec![],
            cppflags: vec![],
            lflags: vec![],
            includes: vec!["include".into()],
            objects: vec![],
            pre_ops: vec![],
            post_ops: vec![],
            prebuilds: vec![],
            sources: vec![source("src/hello.cpp", SourceKind::Cpp)],
        }
    }

    fn source(path: &str, kind: SourceKind) -> SourceEntry {
        SourceEntry {
            path: path.into(),
            kind,
            ccflags: vec![],
            optimization: None,
            debugging: None,
        }
    }

    #[test]
    fn cpp_compile_command_shape() {
        let project = project();
        let cmd = compile_command(&project, &project.sources[0]);
        assert_eq!(
            cmd,
            "/usr/bin/g++ -Wall -std=c++17 -Iinclude -DNDEBUG -O2 \
             -MMD -MF /proj/Release/src/hello.cpp.d \
             -c src/hello.cpp -o /proj/Release/src/hello.cpp.o"
        );
    }

    #[test]
    fn c_sources_use_the_c_driver_and_cflags() {
        let mut project = project();
        project.toolchain.cflags = vec!["-std=c11".into()];
        let src = source("src/main.c", SourceKind::C);
        let cmd = compile_command(&project, &src);
        assert!(cmd.starts_with("/usr/bin/gcc -Wall -std=c11 "));
        assert!(!cmd.contains("-std=c++17"));
    }

    #[test]
    fn per_file_overrides_replace_configuration_levels() {
        let project = project();
        let mut src = source("src/slow.cpp", SourceKind::Cpp);
        src.optimization = Some("-O0".into());
        src.debugging = Some("-g3".into());
        src.ccflags = vec!["-fno-inline".into()];
        let cmd = compile_command(&project, &src);
        assert!(cmd.contains(" -fno-inline -O0 -g3 -MMD"));
        assert!(!cmd.contains("-O2"));
    }

    #[test]
    fn link_command_lists_objects_then_output() {
        let project = project();
        let cmds = artifact_commands(&project);
        assert_eq!(
            cmds,
            ["/usr/bin/g++ -lpthread /proj/Release/src/hello.cpp.o -o /proj/Release/hello"]
        );
    }

    #[test]
    fn document_objects_are_grouped() {
        let mut project = project();
        project.objects = vec!["../LibTime/Release/libmstime.a".into(), "-lm".into()];
        let cmd = &artifact_commands(&project)[0];
        assert!(cmd.contains(
            "-Wl,--start-group ../LibTime/Release/libmstime.a -lm -Wl,--end-group -o"
        ));
    }

    #[test]
    fn default_library_uses_the_archiver() {
        let mut project = project();
        project.kind = ArtifactKind::Library;
        project.artifact = "libmstime".into();
        project.extension = Some("a".into());
        let cmds = artifact_commands(&project);
        assert_eq!(
            cmds,
            ["/usr/bin/ar rcs /proj/Release/libmstime.a /proj/Release/src/hello.cpp.o"]
        );
    }

    #[test]
    fn shared_library_goes_through_the_driver() {
        let mut project = project();
        project.kind = ArtifactKind::Library;
        project.artifact = "mstime".into();
        project.extension = Some("so".into());
        let cmd = &artifact_commands(&project)[0];
        assert!(cmd.starts_with("/usr/bin/g++ -shared -lpthread -o /proj/Release/mstime.so"));
    }

    #[test]
    fn bin_executable_adds_an_objcopy_step() {
        let mut project = project();
        project.extension = Some("bin".into());
        let cmds = artifact_commands(&project);
        assert_eq!(cmds.len(), 2);
        assert!(cmds[0].ends_with("-o /proj/Release/hello.elf"));
        assert_eq!(
            cmds[1],
            "/usr/bin/objcopy -O binary /proj/Release/hello.elf /proj/Release/hello.bin"
        );
    }

    #[test]
    fn assembly_uses_aflags_and_shared_ccflags() {
        let mut project = project();
        project.aflags = vec!["-defsym=BOOT=1".into()];
        let src = source("src/start.S", SourceKind::Assembly);
        let cmd = compile_command(&project, &src);
        assert!(cmd.starts_with("/usr/bin/g++ -Wall "));
        assert!(cmd.contains(" -defsym=BOOT=1 "));
        assert!(!cmd.contains("-std=c++17"));
    }
}
