use std::collections::HashMap;
use std::path::{Path, PathBuf};

use globset::{Glob, GlobSet, GlobSetBuilder};
use walkdir::WalkDir;

use crate::condition;
use crate::document::{self, Element};
use crate::error::{Error, Result};
use crate::project::{
    ArtifactKind, Configuration, PrebuildRef, ResolvedProject, SourceEntry, SourceKind, Toolchain,
};
use crate::subst::SubstMap;

/// The complete argument set of one orchestrator run. Prebuild recursion
/// clones this, applies the `<project>` element overrides, and re-enters
/// the build with the result.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub config_file: String,
    pub configuration: String,
    pub clean: bool,
    pub prebuilds: bool,
    pub subs: Vec<(String, String)>,
    pub dict_files: Vec<String>,
    pub single_file: Option<String>,
    pub dump_xml: bool,
}

/// Parse one `-s` argument. Accepts a single `KEY:VAL` pair or several
/// pairs delimited by `;` in one argument.
pub fn parse_sub_arg(arg: &str) -> Result<Vec<(String, String)>> {
    let mut pairs = Vec::new();
    for piece in arg.split(';') {
        if piece.is_empty() {
            continue;
        }
        pairs.push(parse_pair(piece)?);
    }
    Ok(pairs)
}

fn parse_pair(piece: &str) -> Result<(String, String)> {
    match piece.split_once(':') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(Error::Usage(format!("invalid key:value pair `{piece}`"))),
    }
}

/// Resolve the project document into a normalized build plan.
///
/// Phases run strictly in order: seed the substitution map from the
/// command line (P0), load the document and inline `<include>` files (P1),
/// substitute `{key}` tokens and prune false `if` guards in one top-down
/// pass (P2), select the active configuration and toolchain and synthesize
/// `{ccprefix}` (P3), then collect flags, sources, objects, ops, and
/// prebuild references (P4).
pub fn resolve(inv: &Invocation, project_dir: &Path) -> Result<ResolvedProject> {
    let mut map = seed_map(inv, project_dir)?;

    let config_path = project_dir.join(&inv.config_file);
    let mut root = document::load(&config_path)?;
    if root.tag != "project" {
        return Err(Error::config(format!(
            "{}: root element must be <project>, found <{}>",
            config_path.display(),
            root.tag
        )));
    }
    let mut chain = vec![canonical(&config_path)?];
    expand_includes(&mut root, &config_path, &mut chain, &mut map, true)?;
    if inv.dump_xml {
        dump("after include expansion", &root);
    }

    let hint = toolchain_hint(&root, &map, &inv.configuration);
    for idx in 0..root.attrs.len() {
        let value = expand_at(&map, &root.attrs[idx].1.clone(), root.line)?;
        root.attrs[idx].1 = value;
    }
    substitute_and_guard(&mut root, &mut map, &inv.configuration, hint.as_deref(), true)?;
    if inv.dump_xml {
        dump("after substitution and guards", &root);
    }

    let configuration = select_configuration(&root, &inv.configuration)?;
    let toolchain = select_toolchain(&root, &configuration.toolchain_ref)?;
    map.seal("ccprefix", toolchain.cc_prefix());

    assemble(inv, project_dir.to_path_buf(), &root, &map, configuration, toolchain)
}

// ---------------------------------------------------------------------
// P0

fn seed_map(inv: &Invocation, project_dir: &Path) -> Result<SubstMap> {
    let mut map = SubstMap::new();
    for (key, value) in &inv.subs {
        map.seal(key.clone(), value.clone());
    }
    map.seal("config", inv.configuration.clone());
    for file in &inv.dict_files {
        let path = &project_dir.join(file);
        let root = document::load(path)?;
        if root.tag != "dicts" {
            return Err(Error::config(format!(
                "{}: dictionary file root must be <dicts>, found <{}>",
                path.display(),
                root.tag
            )));
        }
        fold_dicts_file(&root, &mut map, path, true)?;
    }
    Ok(map)
}

/// Fold a `<dicts>`-rooted file into the map. `-i` files seal their
/// entries; a `<dicts>` file pulled in through `<include>` only fills
/// keys that are not yet bound.
fn fold_dicts_file(root: &Element, map: &mut SubstMap, path: &Path, seal: bool) -> Result<()> {
    for child in &root.children {
        if child.tag != "dict" {
            return Err(Error::config(format!(
                "{}: <dicts> may only contain <dict> children, found <{}>",
                path.display(),
                child.tag
            )));
        }
        if let Some(cond) = child.attr("if") {
            let cond = expand_at(map, cond, child.line)?;
            if !condition::eval(&cond)? {
                continue;
            }
        }
        let key = child.attr("key").ok_or_else(|| {
            Error::config(format!(
                "{}:{}: <dict> element has no key attribute",
                path.display(),
                child.line
            ))
        })?;
        let value = expand_at(map, child.text(), child.line)?;
        if seal {
            map.seal(key, value);
        } else {
            map.insert_if_absent(key, value);
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------
// P1

/// Transitively splice `<include>` files in place. `top` is true while
/// `ele` is the root of a document file; only there are `<dict>` elements
/// folded early, so that later `<include>` guards and paths can use them.
fn expand_includes(
    ele: &mut Element,
    file: &Path,
    chain: &mut Vec<PathBuf>,
    map: &mut SubstMap,
    top: bool,
) -> Result<()> {
    let base = file.parent().unwrap_or_else(|| Path::new(".")).to_path_buf();
    let mut i = 0;
    while i < ele.children.len() {
        let tag = ele.children[i].tag.clone();
        if tag == "include" {
            let line = ele.children[i].line;
            if let Some(cond) = ele.children[i].attr("if") {
                let cond = expand_at(map, cond, line)?;
                if !condition::eval(&cond)? {
                    ele.children.remove(i);
                    continue;
                }
            }
            let text = ele.children[i].text().to_string();
            if text.is_empty() {
                return Err(Error::config(format!(
                    "{}:{line}: <include> element has no file path",
                    file.display()
                )));
            }
            let inc_path = base.join(expand_at(map, &text, line)?);
            let canon = canonical(&inc_path)?;
            if chain.contains(&canon) {
                return Err(Error::config(format!(
                    "include cycle: {} is already on the include chain of {}",
                    inc_path.display(),
                    file.display()
                )));
            }
            let mut inc_root = document::load(&inc_path)?;
            if inc_root.tag == "dicts" {
                fold_dicts_file(&inc_root, map, &inc_path, false)?;
                ele.children.remove(i);
                continue;
            }
            if inc_root.tag != "pyInc" {
                return Err(Error::config(format!(
                    "{}: include root must be <pyInc> or <dicts>, found <{}>",
                    inc_path.display(),
                    inc_root.tag
                )));
            }
            if inc_root.find("sources").is_some() {
                return Err(Error::config(format!(
                    "{}: <sources> is not allowed in an include file",
                    inc_path.display()
                )));
            }
            chain.push(canon);
            expand_includes(&mut inc_root, &inc_path, chain, map, true)?;
            chain.pop();
            let spliced = inc_root.children.len();
            ele.children.splice(i..=i, inc_root.children);
            i += spliced;
        } else if tag == "dict" && top {
            if try_fold_dict(&ele.children[i], map)? {
                ele.children.remove(i);
            } else {
                i += 1;
            }
        } else {
            expand_includes(&mut ele.children[i], file, chain, map, false)?;
            i += 1;
        }
    }
    Ok(())
}

/// Early `<dict>` folding during include expansion. Returns true when the
/// element was consumed (folded, or culled by a false guard). Entries
/// whose guard or value cannot be resolved yet stay in the tree for the
/// substitution pass.
fn try_fold_dict(ele: &Element, map: &mut SubstMap) -> Result<bool> {
    if let Some(cond) = ele.attr("if") {
        let Ok(cond) = map.expand(cond) else {
            return Ok(false);
        };
        if !condition::eval(&cond)? {
            return Ok(true);
        }
    }
    let Some(key) = ele.attr("key") else {
        return Ok(false);
    };
    let Ok(value) = map.expand(ele.text()) else {
        return Ok(false);
    };
    map.insert_if_absent(key, value);
    Ok(true)
}

// ---------------------------------------------------------------------
// P2

/// One top-down, document-order pass: expand every attribute and text
/// value, drop subtrees whose `if` guard is false, and fold `<dict>`
/// elements into the map before their later siblings are evaluated.
///
/// `dicts` marks the element scopes whose `<dict>` children apply: the
/// project root, the active `<configuration>`, and the active
/// `<toolchain>`. Dictionaries inside an inactive configuration must not
/// leak into the map.
///
/// `<pre_op>`/`<post_op>` text is left untouched here; it is expanded when
/// the ops are collected, after `{ccprefix}` has been synthesized.
fn substitute_and_guard(
    ele: &mut Element,
    map: &mut SubstMap,
    configuration: &str,
    toolchain: Option<&str>,
    dicts: bool,
) -> Result<()> {
    if !matches!(ele.tag.as_str(), "pre_op" | "post_op") {
        if let Some(text) = ele.text.take() {
            ele.text = Some(expand_at(map, &text, ele.line)?);
        }
    }
    let mut i = 0;
    while i < ele.children.len() {
        {
            let child = &mut ele.children[i];
            let line = child.line;
            for idx in 0..child.attrs.len() {
                let value = expand_at(map, &child.attrs[idx].1.clone(), line)?;
                child.attrs[idx].1 = value;
            }
        }
        let keep = match ele.children[i].attr("if") {
            Some(cond) => condition::eval(cond)?,
            None => true,
        };
        if !keep {
            ele.children.remove(i);
            continue;
        }
        if ele.children[i].tag == "dict" && dicts {
            let child = &ele.children[i];
            let key = child
                .attr("key")
                .ok_or_else(|| {
                    Error::config(format!(
                        "line {}: <dict> element has no key attribute",
                        child.line
                    ))
                })?
                .to_string();
            let value = expand_at(map, child.text(), child.line)?;
            map.insert(key, value);
            ele.children.remove(i);
            continue;
        }
        let child_dicts = match ele.children[i].tag.as_str() {
            "configuration" => ele.children[i].attr("name") == Some(configuration),
            "toolchain" => toolchain.is_some() && ele.children[i].attr("name") == toolchain,
            _ => false,
        };
        substitute_and_guard(&mut ele.children[i], map, configuration, toolchain, child_dicts)?;
        i += 1;
    }
    Ok(())
}

/// Best-effort read of the active configuration's toolchain name before
/// the substitution pass runs. Only used to decide which `<toolchain>`
/// element's dictionaries apply; the real selection happens afterwards.
fn toolchain_hint(root: &Element, map: &SubstMap, configuration: &str) -> Option<String> {
    let cfg = root.children.iter().find(|c| {
        c.tag == "configuration"
            && c.attr("name")
                .map(|n| map.expand(n).unwrap_or_else(|_| n.to_string()))
                .as_deref()
                == Some(configuration)
    })?;
    let text = cfg.find("toolchain")?.text();
    let name = map.expand(text).unwrap_or_else(|_| text.to_string());
    (!name.is_empty()).then_some(name)
}

// ---------------------------------------------------------------------
// P3

fn select_configuration(root: &Element, name: &str) -> Result<Configuration> {
    let ele = root
        .find_all("configuration")
        .find(|c| c.attr("name") == Some(name))
        .ok_or_else(|| Error::config(format!("project configuration {name} not found")))?;
    let toolchain_ref = ele
        .find("toolchain")
        .map(|t| t.text().to_string())
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| "native".to_string());
    let optimization = ele
        .find("optimization")
        .map(|o| o.text().to_string())
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| "-O0".to_string());
    let debugging = ele
        .find("debugging")
        .map(|d| d.text().to_string())
        .filter(|t| !t.is_empty());
    Ok(Configuration {
        name: name.to_string(),
        toolchain_ref,
        optimization,
        debugging,
        aflags: collect_flags(ele, "aflag"),
        ccflags: collect_flags(ele, "ccflag"),
        cflags: collect_flags(ele, "cflag"),
        cppflags: collect_flags(ele, "cppflag"),
        lflags: collect_flags(ele, "lflag"),
    })
}

fn select_toolchain(root: &Element, name: &str) -> Result<Toolchain> {
    let found = root
        .find_all("toolchain")
        .find(|t| t.attr("name") == Some(name));
    let Some(ele) = found else {
        if name == "native" {
            return Ok(Toolchain::native());
        }
        return Err(Error::config(format!("toolchain {name} not found")));
    };
    Ok(Toolchain {
        name: name.to_string(),
        compiler_path: child_text(ele, "compilerPath"),
        compiler_prefix: child_text(ele, "compilerPrefix"),
        aflags: collect_flags(ele, "aflag"),
        ccflags: collect_flags(ele, "ccflag"),
        cflags: collect_flags(ele, "cflag"),
        cppflags: collect_flags(ele, "cppflag"),
        lflags: collect_flags(ele, "lflag"),
    })
}

// ---------------------------------------------------------------------
// P4

fn assemble(
    inv: &Invocation,
    project_dir: PathBuf,
    root: &Element,
    map: &SubstMap,
    configuration: Configuration,
    toolchain: Toolchain,
) -> Result<ResolvedProject> {
    let artifact_attr = root
        .attr("artifact")
        .ok_or_else(|| Error::config("project artifact attribute not found"))?;
    let kind = match root.attr("type") {
        Some("executable") => ArtifactKind::Executable,
        Some("library") => ArtifactKind::Library,
        Some(other) => {
            return Err(Error::config(format!(
                "project type must be executable or library, found {other}"
            )))
        }
        None => return Err(Error::config("project type attribute not found")),
    };

    let (mut artifact, mut extension) = match artifact_attr.split_once('.') {
        Some((name, ext)) => (name.to_string(), Some(ext.to_string())),
        None => (artifact_attr.to_string(), None),
    };
    if extension.is_none() {
        extension = root
            .find("extension")
            .map(|e| e.text().to_string())
            .filter(|t| !t.is_empty());
    }
    // A library artifact without an extension is taken to be a static
    // library: prepend `lib`, append `.a`. One with an explicit extension
    // is used as given.
    if kind == ArtifactKind::Library && extension.is_none() {
        if !artifact.starts_with("lib") {
            artifact = format!("lib{artifact}");
        }
        extension = Some("a".to_string());
    }

    let mut ccflags = collect_flags(root, "ccflag");
    let mut includes = Vec::new();
    if let Some(container) = root.find("includes") {
        for path in container.find_all("path") {
            if !path.text().is_empty() {
                includes.push(path.text().to_string());
            }
        }
        for path in container.find_all("isys") {
            if !path.text().is_empty() {
                ccflags.push(format!("-isystem {}", path.text()));
            }
        }
    }

    let mut objects = Vec::new();
    if let Some(container) = root.find("objects") {
        for obj in container.find_all("obj") {
            if !obj.text().is_empty() {
                objects.push(obj.text().to_string());
            }
        }
    }

    let mut prebuilds = Vec::new();
    if let Some(container) = root.find("prebuilds") {
        for proj in container.find_all("project") {
            prebuilds.push(prebuild_ref(inv, &project_dir, proj)?);
        }
    }

    // Op text is expanded here, not in the substitution pass, so that
    // `{ccprefix}` references resolve.
    let pre_ops = collect_ops(root, "pre_op", map)?;
    let post_ops = collect_ops(root, "post_op", map)?;

    let sources = collect_sources(root, &project_dir)?;
    check_object_collisions(&sources)?;

    if let Some(one) = &inv.single_file {
        if !sources.iter().any(|s| s.file_name() == one.as_str()) {
            return Err(Error::config(format!(
                "single file {one} is not in the source file list"
            )));
        }
    }
    if sources.is_empty() {
        match kind {
            ArtifactKind::Library => {
                return Err(Error::config("library project has no source files"))
            }
            ArtifactKind::Executable if objects.is_empty() => {
                return Err(Error::config(
                    "executable project has no source files and no objects",
                ))
            }
            ArtifactKind::Executable => {}
        }
    }

    Ok(ResolvedProject {
        project_dir,
        artifact,
        extension,
        kind,
        toolchain,
        configuration,
        aflags: collect_flags(root, "aflag"),
        ccflags,
        cflags: collect_flags(root, "cflag"),
        cppflags: collect_flags(root, "cppflag"),
        lflags: collect_flags(root, "lflag"),
        includes,
        objects,
        pre_ops,
        post_ops,
        prebuilds,
        sources,
    })
}

fn prebuild_ref(inv: &Invocation, project_dir: &Path, ele: &Element) -> Result<PrebuildRef> {
    let path = ele
        .attr("path")
        .ok_or_else(|| {
            Error::config(format!(
                "line {}: prebuild <project> has no path attribute",
                ele.line
            ))
        })?
        .to_string();
    let config_file = child_text(ele, "configfile").unwrap_or_else(|| inv.config_file.clone());
    let config_path = project_dir.join(&path).join(&config_file);
    if !config_path.exists() {
        return Err(Error::config(format!(
            "prebuild project file {} does not exist",
            config_path.display()
        )));
    }
    let configuration =
        child_text(ele, "configuration").unwrap_or_else(|| inv.configuration.clone());
    let clean = ele
        .find("clean")
        .map(|e| e.text() == "1")
        .unwrap_or(inv.clean);
    let prebuilds = ele
        .find("prebuilds")
        .map(|e| e.text() == "1")
        .unwrap_or(inv.prebuilds);
    let mut subs = inv.subs.clone();
    for sub in ele.find_all("sub") {
        if sub.text().is_empty() {
            continue;
        }
        let (key, value) = parse_pair(sub.text()).map_err(|_| {
            Error::config(format!(
                "line {}: <sub> is not a key:value pair: {}",
                sub.line,
                sub.text()
            ))
        })?;
        subs.push((key, value));
    }
    Ok(PrebuildRef {
        path,
        config_file,
        configuration,
        clean,
        prebuilds,
        subs,
    })
}

fn collect_ops(root: &Element, tag: &str, map: &SubstMap) -> Result<Vec<String>> {
    root.find_all(tag)
        .filter(|e| !e.text().is_empty())
        .map(|e| expand_at(map, e.text(), e.line))
        .collect()
}

fn collect_sources(root: &Element, project_dir: &Path) -> Result<Vec<SourceEntry>> {
    let mut sources: Vec<SourceEntry> = Vec::new();
    let Some(container) = root.find("sources") else {
        return Ok(sources);
    };
    for file in container.find_all("file") {
        let path = file.attr("path").ok_or_else(|| {
            Error::config(format!(
                "line {}: <file> element has no path attribute",
                file.line
            ))
        })?;
        let ccflags = collect_flags(file, "ccflag");
        let optimization = child_text(file, "optimization");
        let debugging = child_text(file, "debugging");
        if let Some(dir) = path.strip_suffix("/*") {
            let excludes = exclude_set(file)?;
            for name in expand_wildcard(project_dir, dir, &excludes)? {
                let entry = SourceEntry {
                    path: format!("{dir}/{name}"),
                    kind: SourceKind::from_path(&name).expect("filtered to source extensions"),
                    ccflags: ccflags.clone(),
                    optimization: optimization.clone(),
                    debugging: debugging.clone(),
                };
                append_source(&mut sources, entry);
            }
        } else {
            let kind = SourceKind::from_path(path).ok_or_else(|| {
                Error::config(format!(
                    "line {}: unsupported source file extension: {path}",
                    file.line
                ))
            })?;
            let full = project_dir.join(path);
            if !full.is_file() {
                return Err(Error::io(
                    full,
                    std::io::Error::new(std::io::ErrorKind::NotFound, "source file not found"),
                ));
            }
            append_source(
                &mut sources,
                SourceEntry {
                    path: path.to_string(),
                    kind,
                    ccflags,
                    optimization,
                    debugging,
                },
            );
        }
    }
    Ok(sources)
}

/// A later `<file>` with the same path replaces the earlier entry. This is
/// how a wildcard match gets per-file optimization or debugging overrides:
/// list the directory, then re-list the one file with its own settings.
fn append_source(sources: &mut Vec<SourceEntry>, entry: SourceEntry) {
    match sources.iter_mut().find(|s| s.path == entry.path) {
        Some(existing) => *existing = entry,
        None => sources.push(entry),
    }
}

fn exclude_set(file: &Element) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for exclude in file.find_all("exclude") {
        if exclude.text().is_empty() {
            continue;
        }
        let glob = Glob::new(exclude.text()).map_err(|e| {
            Error::config(format!(
                "line {}: bad exclude pattern `{}`: {e}",
                exclude.line,
                exclude.text()
            ))
        })?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| Error::config(format!("bad exclude set: {e}")))
}

/// Shallow wildcard expansion: every supported source file directly in
/// `dir`, minus excludes, in lexicographic order.
fn expand_wildcard(project_dir: &Path, dir: &str, excludes: &GlobSet) -> Result<Vec<String>> {
    let base = project_dir.join(dir);
    let mut names = Vec::new();
    for entry in WalkDir::new(&base)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|e| {
            let io = e
                .into_io_error()
                .unwrap_or_else(|| std::io::Error::new(std::io::ErrorKind::Other, "walk error"));
            Error::io(&base, io)
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        if SourceKind::from_path(&name).is_none() {
            continue;
        }
        if excludes.is_match(&name) {
            continue;
        }
        names.push(name);
    }
    Ok(names)
}

fn check_object_collisions(sources: &[SourceEntry]) -> Result<()> {
    let mut seen: HashMap<PathBuf, &str> = HashMap::new();
    for source in sources {
        if let Some(prev) = seen.insert(source.rel_path(), &source.path) {
            return Err(Error::config(format!(
                "sources {prev} and {} produce the same object file",
                source.path
            )));
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------
// Shared helpers

fn collect_flags(ele: &Element, tag: &str) -> Vec<String> {
    ele.find_all(tag)
        .map(|e| e.text().to_string())
        .filter(|t| !t.is_empty())
        .collect()
}

fn child_text(ele: &Element, tag: &str) -> Option<String> {
    ele.find(tag)
        .map(|e| e.text().to_string())
        .filter(|t| !t.is_empty())
}

fn expand_at(map: &SubstMap, text: &str, line: u32) -> Result<String> {
    map.expand(text).map_err(|e| match e {
        Error::Substitution(message) => Error::Substitution(format!("line {line}: {message}")),
        other => other,
    })
}

fn canonical(path: &Path) -> Result<PathBuf> {
    path.canonicalize().map_err(|e| Error::io(path, e))
}

fn dump(phase: &str, root: &Element) {
    println!("\n[resolved XML {phase}]");
    print!("{}", root.to_xml());
}
