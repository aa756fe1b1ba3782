use std::path::{Component, Path, PathBuf};

/// Source language, decided by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Assembly,
    C,
    Cpp,
}

impl SourceKind {
    pub fn from_path(path: &str) -> Option<SourceKind> {
        match Path::new(path).extension().and_then(|e| e.to_str()) {
            Some("c") => Some(SourceKind::C),
            Some("cpp" | "cc" | "cxx") => Some(SourceKind::Cpp),
            Some("s" | "S") => Some(SourceKind::Assembly),
            _ => None,
        }
    }
}

/// A named toolchain from the project document. The builtin `native`
/// toolchain has no path, no prefix, and no flags: plain `gcc`/`g++`/`ar`
/// from PATH.
#[derive(Debug, Clone, Default)]
pub struct Toolchain {
    pub name: String,
    pub compiler_path: Option<String>,
    pub compiler_prefix: Option<String>,
    pub aflags: Vec<String>,
    pub ccflags: Vec<String>,
    pub cflags: Vec<String>,
    pub cppflags: Vec<String>,
    pub lflags: Vec<String>,
}

impl Toolchain {
    pub fn native() -> Self {
        Toolchain {
            name: "native".to_string(),
            ..Default::default()
        }
    }

    /// Full executable prefix: everything in front of `gcc`, `g++`, `ar`.
    /// The compiler path is always honored when supplied, even if a
    /// same-named toolchain happens to be installed on PATH.
    pub fn cc_prefix(&self) -> String {
        match (&self.compiler_path, &self.compiler_prefix) {
            (Some(path), Some(prefix)) => format!("{path}/{prefix}"),
            (Some(path), None) => format!("{path}/"),
            (None, Some(prefix)) => prefix.clone(),
            (None, None) => String::new(),
        }
    }
}

/// The active `<configuration>`: optimization/debug levels and extra flags
/// layered on top of the toolchain's.
#[derive(Debug, Clone)]
pub struct Configuration {
    pub name: String,
    pub toolchain_ref: String,
    pub optimization: String,
    pub debugging: Option<String>,
    pub aflags: Vec<String>,
    pub ccflags: Vec<String>,
    pub cflags: Vec<String>,
    pub cppflags: Vec<String>,
    pub lflags: Vec<String>,
}

/// One file to compile, with optional per-file overrides.
#[derive(Debug, Clone)]
pub struct SourceEntry {
    pub path: String,
    pub kind: SourceKind,
    pub ccflags: Vec<String>,
    pub optimization: Option<String>,
    pub debugging: Option<String>,
}

impl SourceEntry {
    pub fn file_name(&self) -> &str {
        Path::new(&self.path)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(&self.path)
    }

    /// Relative path used to place the object and dependency files inside
    /// the output tree. `.` and `..` components are dropped so derived
    /// files stay under the output directory even for `../`-style sources.
    pub fn rel_path(&self) -> PathBuf {
        Path::new(&self.path)
            .components()
            .filter(|c| matches!(c, Component::Normal(_)))
            .collect()
    }
}

/// A sub-project to build before this one. Fields are the child's full
/// argument set: inherited from the parent invocation, then overridden by
/// the `<project>` element's children.
#[derive(Debug, Clone)]
pub struct PrebuildRef {
    pub path: String,
    pub config_file: String,
    pub configuration: String,
    pub clean: bool,
    pub prebuilds: bool,
    pub subs: Vec<(String, String)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Executable,
    Library,
}

/// A fully normalized build plan: everything the planner and executor need,
/// with substitution applied and guards pruned. `pre_ops`/`post_ops` text
/// is expanded last, after toolchain selection, so `{ccprefix}` references
/// in it resolve.
#[derive(Debug, Clone)]
pub struct ResolvedProject {
    pub project_dir: PathBuf,
    pub artifact: String,
    pub extension: Option<String>,
    pub kind: ArtifactKind,
    pub toolchain: Toolchain,
    pub configuration: Configuration,
    pub aflags: Vec<String>,
    pub ccflags: Vec<String>,
    pub cflags: Vec<String>,
    pub cppflags: Vec<String>,
    pub lflags: Vec<String>,
    pub includes: Vec<String>,
    pub objects: Vec<String>,
    pub pre_ops: Vec<String>,
    pub post_ops: Vec<String>,
    pub prebuilds: Vec<PrebuildRef>,
    pub sources: Vec<SourceEntry>,
}

impl ResolvedProject {
    pub fn artifact_full_name(&self) -> String {
        match &self.extension {
            Some(ext) => format!("{}.{ext}", self.artifact),
            None => self.artifact.clone(),
        }
    }

    /// All derived files live here; nothing outside it is ever written.
    pub fn output_dir(&self) -> PathBuf {
        self.project_dir.join(&self.configuration.name)
    }

    pub fn artifact_path(&self) -> PathBuf {
        self.output_dir().join(self.artifact_full_name())
    }

    pub fn object_path(&self, source: &SourceEntry) -> PathBuf {
        self.derived_path(source, "o")
    }

    pub fn dep_path(&self, source: &SourceEntry) -> PathBuf {
        self.derived_path(source, "d")
    }

    fn derived_path(&self, source: &SourceEntry, suffix: &str) -> PathBuf {
        let mut rel = source.rel_path().into_os_string();
        rel.push(".");
        rel.push(suffix);
        self.output_dir().join(rel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_kind_by_extension() {
        assert_eq!(SourceKind::from_path("a/b.c"), Some(SourceKind::C));
        assert_eq!(SourceKind::from_path("b.cpp"), Some(SourceKind::Cpp));
        assert_eq!(SourceKind::from_path("b.cc"), Some(SourceKind::Cpp));
        assert_eq!(SourceKind::from_path("b.cxx"), Some(SourceKind::Cpp));
        assert_eq!(SourceKind::from_path("b.s"), Some(SourceKind::Assembly));
        assert_eq!(SourceKind::from_path("b.S"), Some(SourceKind::Assembly));
        assert_eq!(SourceKind::from_path("b.h"), None);
        assert_eq!(SourceKind::from_path("b"), None);
    }

    #[test]
    fn cc_prefix_combinations() {
        let mut tc = Toolchain::native();
        assert_eq!(tc.cc_prefix(), "");
        tc.compiler_path = Some("/opt/gcc/bin".into());
        assert_eq!(tc.cc_prefix(), "/opt/gcc/bin/");
        tc.compiler_prefix = Some("arm-none-eabi-".into());
        assert_eq!(tc.cc_prefix(), "/opt/gcc/bin/arm-none-eabi-");
        tc.compiler_path = None;
        assert_eq!(tc.cc_prefix(), "arm-none-eabi-");
    }

    #[test]
    fn derived_paths_preserve_relative_source_path() {
        let entry = SourceEntry {
            path: "src/sub/hello.cpp".into(),
            kind: SourceKind::Cpp,
            ccflags: vec![],
            optimization: None,
            debugging: None,
        };
        let project = sample_project();
        assert_eq!(
            project.object_path(&entry),
            PathBuf::from("/proj/Release/src/sub/hello.cpp.o")
        );
        assert_eq!(
            project.dep_path(&entry),
            PathBuf::from("/proj/Release/src/sub/hello.cpp.d")
        );
    }

    #[test]
    fn parent_components_do_not_escape_output_dir() {
        let entry = SourceEntry {
            path: "../shared/util.c".into(),
            kind: SourceKind::C,
            ccflags: vec![],
            optimization: None,
            debugging: None,
        };
        assert_eq!(entry.rel_path(), PathBuf::from("shared/util.c"));
    }

    fn sample_project() -> ResolvedProject {
        ResolvedProject {
            project_dir: PathBuf::from("/proj"),
            artifact: "hello".into(),
            extension: None,
            kind: ArtifactKind::Executable,
            toolchain: Toolchain::native(),
            configuration: Configuration {
                name: "Release".into(),
                toolchain_ref: "native".into(),
                optimization: "-O0".into(),
                debugging: None,
                aflags: vec![],
                ccflags: vec![],
                cflags: vec![],
                cppflags: vec![],
                lflags: vec![],
            },
            aflags: vec![],
            ccflags: vec![],
            cflags: vec![],
            cppflags: vec![],
            lflags: vec![],
            includes: vec![],
            objects: vec![],
            pre_ops: vec![],
            post_ops: vec![],
            prebuilds: vec![],
            sources: vec![],
        }
    }
}
