//! Target orchestration.
//!
//! A [`Target`] ties the subsystems together: it resolves the load order for
//! a set of root packages, runs every source file through the merged source
//! processor registry, collects the resulting resources in a strict order
//! (build units in load order, files in source order), and drives a
//! [`Builder`] to write the artifact tree plus its control manifest.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use strata_package::{
    arch_matches, for_each_used_unit, BuildMode, BuildUnit, LoadOrderResolver, MessageSet,
    Package, PackageCatalog, Resource, WalkOptions, WatchSet,
};

use crate::builder::{Builder, BuilderOptions, PreviousBuild, WriteOptions};
use crate::error::{BuildError, BuildResult};
use crate::hash::hash_bytes;
use crate::ledger::EntryKind;
use crate::manifest::{EntryLocation, ManifestEntry, TargetManifest};
use crate::processor::{
    BundleFile, Classification, PluginInstance, ProcessorRegistry, SetOptions, SourceInput,
    SourceProcessor, SourceProcessorSet,
};

/// A file to be written into the target tree.
#[derive(Debug, Clone)]
pub struct TargetFile {
    /// Path relative to the tree root.
    pub target_path: String,
    /// URL the file is served at, for web targets.
    pub url: Option<String>,
    pub data: Vec<u8>,
    pub hash: String,
    pub cacheable: bool,
}

impl TargetFile {
    fn new(target_path: String, url: Option<String>, data: Vec<u8>, hash: Option<String>) -> Self {
        let hash = hash.unwrap_or_else(|| hash_bytes(&data));
        Self {
            target_path,
            url,
            data,
            hash,
            cacheable: false,
        }
    }
}

/// Collaborators and build parameters for a target.
pub struct TargetOptions<'a> {
    pub catalog: &'a dyn PackageCatalog,
    /// Source processor registries by contributing package name, populated
    /// by the host after loading package plugin metadata.
    pub plugins: &'a BTreeMap<String, ProcessorRegistry>,
    /// Architecture to build, e.g. `os` or `web.browser`.
    pub arch: &'a str,
    pub build_mode: BuildMode,
}

/// Options for [`Target::make`].
pub struct MakeOptions<'a> {
    /// Root packages to include (the app and anything it directly uses).
    pub packages: Vec<&'a Package>,
    /// Mode passed to minifiers.
    pub minify_mode: BuildMode,
}

/// The finished product of [`Target::write_to_path`].
#[derive(Debug)]
pub struct TargetOutcome {
    /// Snapshot for the next build's in-place reuse.
    pub previous: PreviousBuild,
    pub manifest: TargetManifest,
    /// Everything read while producing this target.
    pub watch_set: WatchSet,
}

enum Slot {
    Ready(Vec<Resource>),
    Pending,
}

struct Batch {
    processor: Arc<SourceProcessor>,
    inputs: Vec<SourceInput>,
    /// (unit index, slot index) for each input, in order.
    targets: Vec<(usize, usize)>,
}

/// Builds one artifact tree for one architecture.
pub struct Target<'a> {
    catalog: &'a dyn PackageCatalog,
    plugins: &'a BTreeMap<String, ProcessorRegistry>,
    arch: String,
    build_mode: BuildMode,
    units: Vec<&'a BuildUnit>,
    used_packages: BTreeSet<String>,
    js: Vec<TargetFile>,
    css: Vec<TargetFile>,
    assets: Vec<TargetFile>,
    head: Vec<Vec<u8>>,
    body: Vec<Vec<u8>>,
    watch_set: WatchSet,
    messages: MessageSet,
}

impl<'a> Target<'a> {
    pub fn new(options: TargetOptions<'a>) -> Self {
        Self {
            catalog: options.catalog,
            plugins: options.plugins,
            arch: options.arch.to_string(),
            build_mode: options.build_mode,
            units: Vec::new(),
            used_packages: BTreeSet::new(),
            js: Vec::new(),
            css: Vec::new(),
            assets: Vec::new(),
            head: Vec::new(),
            body: Vec::new(),
            watch_set: WatchSet::new(),
            messages: MessageSet::new(),
        }
    }

    /// Build units in load order.
    pub fn units(&self) -> &[&'a BuildUnit] {
        &self.units
    }

    pub fn used_packages(&self) -> &BTreeSet<String> {
        &self.used_packages
    }

    /// Recoverable problems accumulated so far. Non-empty means the build
    /// failed and no output will be promoted.
    pub fn messages(&self) -> &MessageSet {
        &self.messages
    }

    pub fn watch_set(&self) -> &WatchSet {
        &self.watch_set
    }

    pub fn js_files(&self) -> &[TargetFile] {
        &self.js
    }

    pub fn css_files(&self) -> &[TargetFile] {
        &self.css
    }

    pub fn asset_files(&self) -> &[TargetFile] {
        &self.assets
    }

    /// Resolves the load order, dispatches every source file to its owning
    /// processor, and collects the emitted resources.
    ///
    /// Structural problems are fatal (`Err`); recoverable ones accumulate in
    /// [`Self::messages`] while the walk continues, so one pass surfaces as
    /// many problems as possible.
    pub fn make(&mut self, options: MakeOptions<'a>) -> BuildResult<()> {
        debug!(arch = %self.arch, roots = options.packages.len(), "building target");

        let resolver = LoadOrderResolver::new(self.catalog, &self.arch, self.build_mode);
        let order = resolver.resolve(&options.packages, &mut self.messages);
        self.units = order.units;
        self.used_packages = order.used_packages;
        if !self.messages.is_empty() {
            return Ok(());
        }

        let processed = self.run_source_processors()?;
        self.emit_resources(processed)?;
        self.minify(options.minify_mode);
        Ok(())
    }

    /// Runs every `Source` resource through the processor that owns it.
    /// Returns the processed resource list per unit, aligned with
    /// `self.units`; within a unit the original source order is preserved.
    fn run_source_processors(&mut self) -> BuildResult<Vec<Vec<Resource>>> {
        let units = self.units.clone();

        let mut unit_slots: Vec<Vec<Slot>> = Vec::with_capacity(units.len());
        let mut batches: Vec<Batch> = Vec::new();
        let mut batch_by_processor: HashMap<String, usize> = HashMap::new();

        for (unit_index, unit) in units.iter().enumerate() {
            let (set, linter_set) = self.processor_sets_for_unit(unit);
            let mut slots: Vec<Slot> = Vec::with_capacity(unit.resources().len());

            for resource in unit.resources() {
                let Resource::Source(source) = resource else {
                    // Anything not handled by source processors passes
                    // through untouched.
                    slots.push(Slot::Ready(vec![resource.clone()]));
                    continue;
                };

                let basename = source.path.rsplit('/').next().unwrap_or(&source.path);
                // A pre-split extension is authoritative; only sources
                // without one are matched against the full filename.
                let classification = match &source.extension {
                    Some(extension) => set.classify_extension(extension, &self.arch),
                    None => set.classify(basename, &self.arch),
                };
                match classification {
                    Classification::Filename { processors }
                    | Classification::Extension { processors, .. } => {
                        let processor = processors[0].clone();
                        let input = SourceInput::new(
                            &source.path,
                            unit.package_name(),
                            &self.arch,
                            source.data.clone(),
                            &source.hash,
                        );
                        let batch_index = *batch_by_processor
                            .entry(processor.id().to_string())
                            .or_insert_with(|| {
                                batches.push(Batch {
                                    processor,
                                    inputs: Vec::new(),
                                    targets: Vec::new(),
                                });
                                batches.len() - 1
                            });
                        batches[batch_index].inputs.push(input);
                        batches[batch_index].targets.push((unit_index, slots.len()));
                        slots.push(Slot::Pending);
                    }
                    Classification::DefaultScript { extension } => {
                        let serve_path = default_serve_path(unit.package_name(), &source.path);
                        let file = strata_package::FileResource {
                            serve_path,
                            data: source.data.clone(),
                            hash: Some(source.hash.clone()),
                        };
                        let passed = if extension == "css" {
                            Resource::Stylesheet(file)
                        } else {
                            Resource::Script(file)
                        };
                        slots.push(Slot::Ready(vec![passed]));
                    }
                    Classification::LegacyHandler { handler, .. } => {
                        let mut input = SourceInput::new(
                            &source.path,
                            unit.package_name(),
                            &self.arch,
                            source.data.clone(),
                            &source.hash,
                        );
                        if let Err(e) = (*handler)(&mut input) {
                            self.messages.error_at(source.path.clone(), e.message);
                        }
                        self.drain_input_errors(&mut input);
                        slots.push(Slot::Ready(input.take_outputs()));
                    }
                    Classification::WrongArch => {
                        // Matched, but not for this architecture: skip the
                        // file for this target. Not an error, not an asset.
                        slots.push(Slot::Ready(Vec::new()));
                    }
                    Classification::Unmatched => {
                        // Files only a linter knows about (config files like
                        // .jshintrc) are not an error, just not compiled.
                        let known_to_linter = !matches!(
                            linter_set.classify(basename, &self.arch),
                            Classification::Unmatched
                        );
                        if !known_to_linter {
                            self.messages.error(format!(
                                "no plugin known to handle file '{}' in {}; \
                                 declare it a static asset if that is what it is",
                                source.path,
                                unit.display_name()
                            ));
                        }
                        slots.push(Slot::Ready(Vec::new()));
                    }
                }
            }

            unit_slots.push(slots);
        }

        // Dispatch each processor once, with all of its files across the
        // whole target, in first-appearance order.
        for batch in &mut batches {
            debug!(
                processor = batch.processor.id(),
                files = batch.inputs.len(),
                "running compiler"
            );
            let result = match batch.processor.plugin() {
                PluginInstance::Compiler(plugin) => {
                    plugin.process_files_for_target(&mut batch.inputs)
                }
                _ => unreachable!("compiler registry produced a non-compiler plugin"),
            };
            if let Err(e) = result {
                self.messages.error(format!(
                    "while processing files with the package {}: {}",
                    batch.processor.package_name(),
                    e.message
                ));
            }

            for (input, (unit_index, slot_index)) in
                batch.inputs.iter_mut().zip(batch.targets.iter())
            {
                self.drain_input_errors(input);
                unit_slots[*unit_index][*slot_index] = Slot::Ready(input.take_outputs());
            }
        }

        Ok(unit_slots
            .into_iter()
            .map(|slots| {
                slots
                    .into_iter()
                    .flat_map(|slot| match slot {
                        Slot::Ready(resources) => resources,
                        Slot::Pending => unreachable!("batched slot never filled"),
                    })
                    .collect()
            })
            .collect())
    }

    /// The merged compiler and linter sets available to one unit: the
    /// registries of every package the unit transitively uses (excluding its
    /// own), with built-in defaults on for the compiler set. Architecture
    /// filtering is left to classification so that wrong-arch files can be
    /// skipped rather than reported as unhandled.
    fn processor_sets_for_unit(
        &mut self,
        unit: &BuildUnit,
    ) -> (SourceProcessorSet, SourceProcessorSet) {
        let catalog = self.catalog;
        let plugins = self.plugins;

        let mut active: Vec<String> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        // Arch/missing-package problems on these edges were already reported
        // by load-order resolution, which walks a superset of them.
        let mut scratch = MessageSet::new();
        for_each_used_unit(
            catalog,
            unit.uses(),
            &WalkOptions {
                arch: &self.arch,
                mode: self.build_mode,
                skip_unordered: true,
                acceptable_weak_packages: None,
            },
            &mut scratch,
            &mut |dependency| {
                if dependency.package_name() == unit.package_name() {
                    return;
                }
                if let Some(name) = dependency.package_name() {
                    if seen.insert(name.to_string()) {
                        active.push(name.to_string());
                    }
                }
            },
        );

        let mut set = SourceProcessorSet::new(
            unit.display_name(),
            SetOptions {
                hardcode_defaults: true,
                ..SetOptions::default()
            },
        );
        let mut linter_set = SourceProcessorSet::new(
            unit.display_name(),
            SetOptions {
                allow_conflicts: true,
                ..SetOptions::default()
            },
        );
        for name in active {
            if let Some(registry) = plugins.get(&name) {
                if !registry.compilers().is_empty() {
                    set.merge(registry.compilers(), None, &mut self.messages);
                }
                if !registry.linters().is_empty() {
                    linter_set.merge(registry.linters(), None, &mut self.messages);
                }
            }
        }
        (set, linter_set)
    }

    fn drain_input_errors(&mut self, input: &mut SourceInput) {
        let path = input.path().to_string();
        for error in input.take_errors() {
            self.messages.error_at(path.clone(), error);
        }
    }

    /// Copies processed resources into the target, strictly in load order
    /// and, within a unit, in source order. Output manifests are
    /// order-sensitive, so nothing may reorder files across this sequence.
    fn emit_resources(&mut self, processed: Vec<Vec<Resource>>) -> BuildResult<()> {
        let is_web = arch_matches(&self.arch, "web");
        let is_os = arch_matches(&self.arch, "os");

        for (unit, resources) in self.units.iter().zip(processed) {
            self.watch_set.merge(unit.watch_set());

            for resource in resources {
                match resource {
                    Resource::Asset(file) => {
                        let rel = strip_leading_slash(&file.serve_path).to_string();
                        let target_path = if is_os {
                            format!("assets/{rel}")
                        } else {
                            rel
                        };
                        let url = is_web.then(|| to_url(&file.serve_path));
                        self.assets
                            .push(TargetFile::new(target_path, url, file.data, file.hash));
                    }
                    Resource::Script(file) => {
                        let target_path = strip_leading_slash(&file.serve_path).to_string();
                        let url = is_web.then(|| to_url(&file.serve_path));
                        self.js
                            .push(TargetFile::new(target_path, url, file.data, file.hash));
                    }
                    Resource::Stylesheet(file) => {
                        if !is_web {
                            // Stylesheets have no meaning on server targets.
                            continue;
                        }
                        let target_path = strip_leading_slash(&file.serve_path).to_string();
                        let url = Some(to_url(&file.serve_path));
                        self.css
                            .push(TargetFile::new(target_path, url, file.data, file.hash));
                    }
                    Resource::HeadMarkup(data) => {
                        if !is_web {
                            return Err(BuildError::BuildFailed(
                                "HTML segments can only go to the client".to_string(),
                            ));
                        }
                        self.head.push(data);
                    }
                    Resource::BodyMarkup(data) => {
                        if !is_web {
                            return Err(BuildError::BuildFailed(
                                "HTML segments can only go to the client".to_string(),
                            ));
                        }
                        self.body.push(data);
                    }
                    Resource::Source(source) => {
                        return Err(BuildError::BuildFailed(format!(
                            "unprocessed source {} survived classification in {}",
                            source.path,
                            unit.display_name()
                        )));
                    }
                }
            }
        }

        Ok(())
    }

    /// Runs the selected minifier over the emitted js/css. Minifiers come
    /// from the registries of packages in the target; the first registrant
    /// per extension wins. Web targets only.
    fn minify(&mut self, minify_mode: BuildMode) {
        if !arch_matches(&self.arch, "web") {
            return;
        }

        let mut minifiers: Vec<Arc<SourceProcessor>> = Vec::new();
        let mut seen: HashSet<&str> = HashSet::new();
        for unit in &self.units {
            let Some(name) = unit.package_name() else {
                continue;
            };
            if !seen.insert(name) {
                continue;
            }
            if let Some(registry) = self.plugins.get(name) {
                minifiers.extend(registry.minifiers().all_processors().iter().cloned());
            }
        }

        for extension in ["js", "css"] {
            let Some(minifier) = minifiers
                .iter()
                .find(|m| m.extensions().iter().any(|e| e == extension))
            else {
                continue;
            };

            let files = if extension == "js" {
                &mut self.js
            } else {
                &mut self.css
            };
            let mut bundle: Vec<BundleFile> = files
                .iter()
                .map(|file| BundleFile {
                    target_path: file.target_path.clone(),
                    data: file.data.clone(),
                })
                .collect();

            let result = match minifier.plugin() {
                PluginInstance::Minifier(plugin) => {
                    plugin.process_files_for_bundle(&mut bundle, minify_mode)
                }
                _ => unreachable!("minifier registry produced a non-minifier plugin"),
            };
            match result {
                Ok(()) => {
                    for (file, minified) in files.iter_mut().zip(bundle) {
                        if minified.data != file.data {
                            file.hash = hash_bytes(&minified.data);
                            file.data = minified.data;
                        }
                    }
                }
                Err(e) => self.messages.error(format!(
                    "minifying {extension} with {}: {}",
                    minifier.package_name(),
                    e.message
                )),
            }
        }
    }

    /// Writes the target into `builder` and returns the manifest describing
    /// it. Target paths are reserved up front so generated filenames cannot
    /// collide with them; first-come collisions between identical files are
    /// tolerated, anything else is a conflict.
    pub fn write(&self, builder: &mut Builder) -> BuildResult<TargetManifest> {
        builder.reserve("program.json", EntryKind::File)?;

        let mut path_hashes: HashMap<&str, &str> = HashMap::new();
        for file in self.each_resource() {
            match path_hashes.get(file.target_path.as_str()) {
                Some(hash) if *hash == file.hash => continue,
                _ => {}
            }
            path_hashes.insert(&file.target_path, &file.hash);
            builder.reserve(&file.target_path, EntryKind::File)?;
        }

        let location = if arch_matches(&self.arch, "web") {
            EntryLocation::Client
        } else {
            EntryLocation::Server
        };

        let mut manifest = TargetManifest::new(&self.arch);
        let mut written: HashSet<&str> = HashSet::new();
        for (kind, file) in self
            .js
            .iter()
            .map(|f| ("js", f))
            .chain(self.css.iter().map(|f| ("css", f)))
            .chain(self.assets.iter().map(|f| ("asset", f)))
        {
            if written.insert(file.target_path.as_str()) {
                builder.write(
                    &file.target_path,
                    WriteOptions::data(file.data.clone()).hash(file.hash.clone()),
                )?;
            }
            manifest.manifest.push(ManifestEntry {
                path: file.target_path.clone(),
                kind: kind.to_string(),
                location,
                cacheable: file.cacheable,
                url: file.url.clone(),
                size: file.data.len() as u64,
                hash: file.hash.clone(),
            });
        }

        for (kind, fragments) in [("head", &self.head), ("body", &self.body)] {
            if fragments.is_empty() {
                continue;
            }
            let data = fragments.join(&b'\n');
            let path = builder.write_to_generated_filename(
                &format!("{kind}.html"),
                WriteOptions::data(data.clone()),
            )?;
            manifest.manifest.push(ManifestEntry {
                path,
                kind: kind.to_string(),
                location: EntryLocation::Internal,
                cacheable: false,
                url: None,
                size: data.len() as u64,
                hash: hash_bytes(&data),
            });
        }

        builder.write_json("program.json", &manifest)?;
        Ok(manifest)
    }

    fn each_resource(&self) -> impl Iterator<Item = &TargetFile> {
        self.js.iter().chain(self.css.iter()).chain(self.assets.iter())
    }

    /// Builds the artifact tree at `output_path`, atomically.
    ///
    /// Refuses to write anything when the make phase accumulated messages.
    /// On any write failure the working tree is aborted, so a failed build
    /// never corrupts a previously-successful output tree.
    pub fn write_to_path(
        &self,
        output_path: &Path,
        previous: Option<PreviousBuild>,
    ) -> BuildResult<TargetOutcome> {
        if !self.messages.is_empty() {
            return Err(BuildError::BuildFailed(format!(
                "{} build message(s); refusing to write output",
                self.messages.len()
            )));
        }

        let mut options = BuilderOptions::new(output_path);
        if let Some(previous) = previous {
            options = options.previous(previous);
        }
        let mut builder = Builder::new(options)?;

        match self.write(&mut builder) {
            Ok(manifest) => {
                let mut watch_set = self.watch_set.clone();
                watch_set.merge(builder.watch_set());
                let previous = builder.complete()?;
                Ok(TargetOutcome {
                    previous,
                    manifest,
                    watch_set,
                })
            }
            Err(error) => {
                // Leave the output path untouched.
                let _ = builder.abort();
                Err(error)
            }
        }
    }
}

fn strip_leading_slash(serve_path: &str) -> &str {
    serve_path.strip_prefix('/').unwrap_or(serve_path)
}

fn to_url(serve_path: &str) -> String {
    if serve_path.starts_with('/') {
        serve_path.to_string()
    } else {
        format!("/{serve_path}")
    }
}

/// Where a default-handled source is served from, mirroring how compiled
/// packages address their files.
fn default_serve_path(package_name: Option<&str>, path: &str) -> String {
    match package_name {
        Some(name) => format!("/packages/{name}/{path}"),
        None => format!("/{path}"),
    }
}
