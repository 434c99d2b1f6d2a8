//! Source processors: registration, conflict detection, and classification.
//!
//! Packages contribute compilers, linters, and minifiers that claim file
//! extensions or exact filenames. A [`SourceProcessorSet`] owns the mapping
//! from file name to processor for one scope (the processors *registered by*
//! one package, or the merged set *available to* one build unit) and answers
//! classification queries. Compiler and minifier sets allow one owner per
//! key; linter sets allow many.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use strata_package::{arch_matches, BuildMode, MessageSet, Resource};

/// Extensions handled by the built-in default when no processor claims them.
const DEFAULT_EXTENSIONS: [&str; 2] = ["js", "css"];

/// Extensions a minifier may register.
const MINIFIER_EXTENSIONS: [&str; 2] = ["js", "css"];

static NEXT_PROCESSOR_ID: AtomicU64 = AtomicU64::new(1);

/// Failure reported by a plugin while processing files. Converted into an
/// accumulated build message by the caller, never a fatal error.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct PluginError {
    pub message: String,
}

impl PluginError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Which document section an HTML fragment belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HtmlSection {
    Head,
    Body,
}

/// One source file handed to a plugin, with its output sink.
#[derive(Debug)]
pub struct SourceInput {
    path: String,
    package_name: Option<String>,
    arch: String,
    data: Vec<u8>,
    hash: String,
    outputs: Vec<Resource>,
    errors: Vec<String>,
}

impl SourceInput {
    pub fn new(
        path: impl Into<String>,
        package_name: Option<&str>,
        arch: impl Into<String>,
        data: Vec<u8>,
        hash: impl Into<String>,
    ) -> Self {
        Self {
            path: path.into(),
            package_name: package_name.map(str::to_owned),
            arch: arch.into(),
            data,
            hash: hash.into(),
            outputs: Vec::new(),
            errors: Vec::new(),
        }
    }

    /// Path relative to the package root, forward slashes.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn basename(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }

    /// Owning package name, or `None` for the app.
    pub fn package_name(&self) -> Option<&str> {
        self.package_name.as_deref()
    }

    /// The architecture being built.
    pub fn arch(&self) -> &str {
        &self.arch
    }

    pub fn contents(&self) -> &[u8] {
        &self.data
    }

    /// Content hash usable as a cache key.
    pub fn source_hash(&self) -> &str {
        &self.hash
    }

    pub fn add_javascript(&mut self, serve_path: impl Into<String>, data: Vec<u8>) {
        self.outputs.push(Resource::Script(
            strata_package::FileResource::new(serve_path, data),
        ));
    }

    pub fn add_stylesheet(&mut self, serve_path: impl Into<String>, data: Vec<u8>) {
        self.outputs.push(Resource::Stylesheet(
            strata_package::FileResource::new(serve_path, data),
        ));
    }

    pub fn add_asset(&mut self, serve_path: impl Into<String>, data: Vec<u8>) {
        self.outputs.push(Resource::Asset(
            strata_package::FileResource::new(serve_path, data),
        ));
    }

    pub fn add_html(&mut self, section: HtmlSection, data: Vec<u8>) {
        self.outputs.push(match section {
            HtmlSection::Head => Resource::HeadMarkup(data),
            HtmlSection::Body => Resource::BodyMarkup(data),
        });
    }

    /// Raise a compilation error for this file.
    pub fn error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    pub fn outputs(&self) -> &[Resource] {
        &self.outputs
    }

    pub(crate) fn take_outputs(&mut self) -> Vec<Resource> {
        std::mem::take(&mut self.outputs)
    }

    pub(crate) fn take_errors(&mut self) -> Vec<String> {
        std::mem::take(&mut self.errors)
    }
}

/// A compiler: claims source extensions/filenames and is called once per
/// target with every file it owns, in load then source order.
pub trait CompilerPlugin: Send + Sync {
    fn process_files_for_target(&self, inputs: &mut [SourceInput]) -> Result<(), PluginError>;
}

/// A linter: claims extensions/filenames, inspects sources one package at a
/// time, and only raises messages.
pub trait LinterPlugin: Send + Sync {
    fn process_files_for_package(
        &self,
        inputs: &[SourceInput],
        messages: &mut MessageSet,
    ) -> Result<(), PluginError>;
}

/// One already-emitted bundle file handed to a minifier.
#[derive(Debug)]
pub struct BundleFile {
    pub target_path: String,
    pub data: Vec<u8>,
}

/// A minifier: runs over the finished js/css of a bundle.
pub trait MinifierPlugin: Send + Sync {
    fn process_files_for_bundle(
        &self,
        files: &mut [BundleFile],
        mode: BuildMode,
    ) -> Result<(), PluginError>;
}

/// What a registration provides.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorKind {
    Compiler,
    Linter,
    Minifier,
}

/// An instantiated plugin.
pub enum PluginInstance {
    Compiler(Box<dyn CompilerPlugin>),
    Linter(Box<dyn LinterPlugin>),
    Minifier(Box<dyn MinifierPlugin>),
}

enum PluginFactory {
    Compiler(Box<dyn Fn() -> Box<dyn CompilerPlugin> + Send + Sync>),
    Linter(Box<dyn Fn() -> Box<dyn LinterPlugin> + Send + Sync>),
    Minifier(Box<dyn Fn() -> Box<dyn MinifierPlugin> + Send + Sync>),
}

impl PluginFactory {
    fn kind(&self) -> ProcessorKind {
        match self {
            PluginFactory::Compiler(_) => ProcessorKind::Compiler,
            PluginFactory::Linter(_) => ProcessorKind::Linter,
            PluginFactory::Minifier(_) => ProcessorKind::Minifier,
        }
    }

    fn instantiate(&self) -> PluginInstance {
        match self {
            PluginFactory::Compiler(f) => PluginInstance::Compiler(f()),
            PluginFactory::Linter(f) => PluginInstance::Linter(f()),
            PluginFactory::Minifier(f) => PluginInstance::Minifier(f()),
        }
    }
}

/// Registration metadata for a source processor.
#[derive(Debug, Clone, Default)]
pub struct RegistrationOptions {
    /// File extensions claimed, without the leading dot. Compound extensions
    /// such as `coffee.md` are allowed and matched longest-first.
    pub extensions: Vec<String>,
    /// Exact basenames claimed, such as `config.json`.
    pub filenames: Vec<String>,
    /// Only process files when the target architecture matches this tag.
    pub arch_matching: Option<String>,
    /// Whether the processor produces templates.
    pub is_template: bool,
}

impl RegistrationOptions {
    pub fn extensions(extensions: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            extensions: extensions.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn filenames(mut self, filenames: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.filenames = filenames.into_iter().map(Into::into).collect();
        self
    }

    pub fn arch_matching(mut self, arch: impl Into<String>) -> Self {
        self.arch_matching = Some(arch.into());
        self
    }

    pub fn is_template(mut self) -> Self {
        self.is_template = true;
        self
    }
}

/// A registered source processor. Shared between the registering package's
/// set and every merged set it is available to; the underlying plugin is
/// instantiated once, on first need.
pub struct SourceProcessor {
    id: String,
    package_name: String,
    extensions: Vec<String>,
    filenames: Vec<String>,
    arch_matching: Option<String>,
    is_template: bool,
    factory: PluginFactory,
    instance: OnceLock<PluginInstance>,
}

impl SourceProcessor {
    fn new(package_name: &str, options: RegistrationOptions, factory: PluginFactory) -> Arc<Self> {
        Arc::new(Self {
            id: format!(
                "{package_name}#{}",
                NEXT_PROCESSOR_ID.fetch_add(1, Ordering::Relaxed)
            ),
            package_name: package_name.to_string(),
            extensions: options.extensions,
            filenames: options.filenames,
            arch_matching: options.arch_matching,
            is_template: options.is_template,
            factory,
            instance: OnceLock::new(),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Display name of the package that registered this processor.
    pub fn package_name(&self) -> &str {
        &self.package_name
    }

    pub fn extensions(&self) -> &[String] {
        &self.extensions
    }

    pub fn filenames(&self) -> &[String] {
        &self.filenames
    }

    pub fn is_template(&self) -> bool {
        self.is_template
    }

    pub fn kind(&self) -> ProcessorKind {
        self.factory.kind()
    }

    pub fn relevant_for_arch(&self, arch: &str) -> bool {
        self.arch_matching
            .as_deref()
            .map_or(true, |matching| arch_matches(arch, matching))
    }

    /// The plugin instance, created on first use.
    pub fn plugin(&self) -> &PluginInstance {
        self.instance.get_or_init(|| self.factory.instantiate())
    }
}

impl fmt::Debug for SourceProcessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceProcessor")
            .field("id", &self.id)
            .field("extensions", &self.extensions)
            .field("filenames", &self.filenames)
            .field("arch_matching", &self.arch_matching)
            .finish_non_exhaustive()
    }
}

/// A deprecated single-extension handler, called once per file.
pub type LegacyHandler = Arc<dyn Fn(&mut SourceInput) -> Result<(), PluginError> + Send + Sync>;

#[derive(Clone)]
pub struct LegacyRegistration {
    pub handler: LegacyHandler,
    pub package_name: String,
    pub is_template: bool,
    pub arch_matching: Option<String>,
}

impl fmt::Debug for LegacyRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LegacyRegistration")
            .field("package_name", &self.package_name)
            .field("is_template", &self.is_template)
            .field("arch_matching", &self.arch_matching)
            .finish_non_exhaustive()
    }
}

/// The result of matching a filename + architecture against a set.
pub enum Classification {
    /// An exact-filename registration matched.
    Filename {
        processors: Vec<Arc<SourceProcessor>>,
    },
    /// An extension registration matched (longest suffix wins).
    Extension {
        extension: String,
        processors: Vec<Arc<SourceProcessor>>,
    },
    /// No processor claims the extension, but it is one of the built-in
    /// defaults: the file belongs to the default handling, which is distinct
    /// from having no handler at all.
    DefaultScript { extension: String },
    /// A deprecated single-extension handler claims this extension.
    LegacyHandler {
        extension: String,
        handler: LegacyHandler,
        is_template: bool,
    },
    /// Matched by name or extension, but not for this architecture: skip the
    /// file entirely for this target.
    WrongArch,
    /// Nothing matches. The caller must treat this as an error unless the
    /// file was declared a static asset.
    Unmatched,
}

impl fmt::Debug for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Classification::Filename { processors } => f
                .debug_struct("Filename")
                .field("processors", processors)
                .finish(),
            Classification::Extension {
                extension,
                processors,
            } => f
                .debug_struct("Extension")
                .field("extension", extension)
                .field("processors", processors)
                .finish(),
            Classification::DefaultScript { extension } => f
                .debug_struct("DefaultScript")
                .field("extension", extension)
                .finish(),
            Classification::LegacyHandler { extension, .. } => f
                .debug_struct("LegacyHandler")
                .field("extension", extension)
                .finish_non_exhaustive(),
            Classification::WrongArch => write!(f, "WrongArch"),
            Classification::Unmatched => write!(f, "Unmatched"),
        }
    }
}

/// Behavior switches for a [`SourceProcessorSet`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SetOptions {
    /// Multiple processors may own the same key (linters).
    pub allow_conflicts: bool,
    /// Recognize the built-in default extensions when unclaimed (compiler
    /// sets used for classification).
    pub hardcode_defaults: bool,
    /// This set holds the processors *registered by* a single package rather
    /// than those *available to* one; conflict messages read differently.
    pub single_package: bool,
}

/// A registry of source processors with conflict detection.
#[derive(Debug)]
pub struct SourceProcessorSet {
    display_name: String,
    options: SetOptions,
    by_extension: HashMap<String, Vec<Arc<SourceProcessor>>>,
    by_filename: HashMap<String, Vec<Arc<SourceProcessor>>>,
    /// Duplicate-free list of everything added, including processors whose
    /// every key conflicted; merge sources iterate this.
    all: Vec<Arc<SourceProcessor>>,
    legacy_handlers: HashMap<String, LegacyRegistration>,
}

impl SourceProcessorSet {
    pub fn new(display_name: impl Into<String>, options: SetOptions) -> Self {
        Self {
            display_name: display_name.into(),
            options,
            by_extension: HashMap::new(),
            by_filename: HashMap::new(),
            all: Vec::new(),
            legacy_handlers: HashMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.by_extension.is_empty()
            && self.by_filename.is_empty()
            && self.legacy_handlers.is_empty()
    }

    pub fn all_processors(&self) -> &[Arc<SourceProcessor>] {
        &self.all
    }

    /// Adds a processor, reporting a conflict message for every key that is
    /// already owned (the first registrant stays authoritative).
    pub fn add_source_processor(&mut self, processor: Arc<SourceProcessor>, messages: &mut MessageSet) {
        self.add_extension_keys(&processor, messages);
        self.add_filename_keys(&processor, messages);
        // Even a fully-conflicted processor stays in `all`; callers check
        // for messages anyway.
        self.all.push(processor);
    }

    fn add_extension_keys(&mut self, processor: &Arc<SourceProcessor>, messages: &mut MessageSet) {
        for extension in processor.extensions.clone() {
            if let Some(legacy) = self.legacy_handlers.get(&extension) {
                let existing = legacy.package_name.clone();
                self.conflict_error(
                    &processor.package_name,
                    &existing,
                    &format!("*.{extension}"),
                    messages,
                );
                continue;
            }
            match self.by_extension.get_mut(&extension) {
                Some(owners) => {
                    if self.options.allow_conflicts {
                        owners.push(processor.clone());
                    } else {
                        let existing = owners[0].package_name.clone();
                        self.conflict_error(
                            &processor.package_name,
                            &existing,
                            &format!("*.{extension}"),
                            messages,
                        );
                    }
                }
                None => {
                    self.by_extension.insert(extension, vec![processor.clone()]);
                }
            }
        }
    }

    fn add_filename_keys(&mut self, processor: &Arc<SourceProcessor>, messages: &mut MessageSet) {
        for filename in processor.filenames.clone() {
            match self.by_filename.get_mut(&filename) {
                Some(owners) => {
                    if self.options.allow_conflicts {
                        owners.push(processor.clone());
                    } else {
                        let existing = owners[0].package_name.clone();
                        self.conflict_error(
                            &processor.package_name,
                            &existing,
                            &filename,
                            messages,
                        );
                    }
                }
                None => {
                    self.by_filename.insert(filename, vec![processor.clone()]);
                }
            }
        }
    }

    /// Adds a deprecated single-extension handler. Conflicts against both
    /// the processor map and other legacy handlers.
    ///
    /// # Panics
    ///
    /// Panics when called on a conflicts-allowed set; linters have no legacy
    /// handlers, so this is a bug in the caller.
    pub fn add_legacy_handler(
        &mut self,
        extension: impl Into<String>,
        registration: LegacyRegistration,
        messages: &mut MessageSet,
    ) {
        assert!(
            !self.options.allow_conflicts,
            "linters have no legacy handlers"
        );
        let extension = extension.into();

        if let Some(owners) = self.by_extension.get(&extension) {
            let existing = owners[0].package_name.clone();
            self.conflict_error(
                &registration.package_name,
                &existing,
                &format!("*.{extension}"),
                messages,
            );
            return;
        }
        if let Some(existing) = self.legacy_handlers.get(&extension) {
            let existing = existing.package_name.clone();
            self.conflict_error(
                &registration.package_name,
                &existing,
                &format!("*.{extension}"),
                messages,
            );
            return;
        }
        self.legacy_handlers.insert(extension, registration);
    }

    /// Adds everything from `other`, applying the same conflict policy
    /// incrementally. When `arch` is set, processors that cannot run on it
    /// are skipped at merge time.
    pub fn merge(&mut self, other: &SourceProcessorSet, arch: Option<&str>, messages: &mut MessageSet) {
        for processor in &other.all {
            if arch.map_or(true, |a| processor.relevant_for_arch(a)) {
                self.add_source_processor(processor.clone(), messages);
            }
        }
        for (extension, registration) in &other.legacy_handlers {
            self.add_legacy_handler(extension.clone(), registration.clone(), messages);
        }
    }

    /// First processor registered for `extension`. Legacy handlers are not
    /// returned.
    ///
    /// # Panics
    ///
    /// Panics on a conflicts-allowed set, where "the" owner is meaningless.
    pub fn get_by_extension(&self, extension: &str) -> Option<&Arc<SourceProcessor>> {
        assert!(
            !self.options.allow_conflicts,
            "get_by_extension is meaningless on a conflicts-allowed set"
        );
        self.by_extension.get(extension).map(|owners| &owners[0])
    }

    /// First processor registered for exactly `filename`.
    ///
    /// # Panics
    ///
    /// Panics on a conflicts-allowed set.
    pub fn get_by_filename(&self, filename: &str) -> Option<&Arc<SourceProcessor>> {
        assert!(
            !self.options.allow_conflicts,
            "get_by_filename is meaningless on a conflicts-allowed set"
        );
        self.by_filename.get(filename).map(|owners| &owners[0])
    }

    /// Decides who owns `filename` when building for `arch`.
    pub fn classify(&self, filename: &str, arch: &str) -> Classification {
        // An exact filename registration takes precedence over extensions.
        if let Some(owners) = self.by_filename.get(filename) {
            return Self::filtered(owners, arch, |processors| Classification::Filename {
                processors,
            });
        }

        // Try every dot-delimited suffix, longest first: foo.coffee.md is
        // classified by a coffee.md processor before an md one.
        let parts: Vec<&str> = filename.split('.').collect();
        for i in 1..parts.len() {
            let extension = parts[i..].join(".");

            if let Some(owners) = self.by_extension.get(&extension) {
                return Self::filtered(owners, arch, |processors| Classification::Extension {
                    extension,
                    processors,
                });
            }

            if self.options.hardcode_defaults && DEFAULT_EXTENSIONS.contains(&extension.as_str()) {
                return Classification::DefaultScript { extension };
            }

            if let Some(legacy) = self.legacy_handlers.get(&extension) {
                if let Some(matching) = &legacy.arch_matching {
                    if !arch_matches(arch, matching) {
                        return Classification::WrongArch;
                    }
                }
                return Classification::LegacyHandler {
                    extension,
                    handler: legacy.handler.clone(),
                    is_template: legacy.is_template,
                };
            }
        }

        Classification::Unmatched
    }

    /// Classifies a source whose extension was already split off by the
    /// compile step (published-package resources carry it pre-split). The
    /// extension is taken as-is; no other suffix of the filename is tried.
    pub fn classify_extension(&self, extension: &str, arch: &str) -> Classification {
        if let Some(owners) = self.by_extension.get(extension) {
            return Self::filtered(owners, arch, |processors| Classification::Extension {
                extension: extension.to_string(),
                processors,
            });
        }

        if self.options.hardcode_defaults && DEFAULT_EXTENSIONS.contains(&extension) {
            return Classification::DefaultScript {
                extension: extension.to_string(),
            };
        }

        if let Some(legacy) = self.legacy_handlers.get(extension) {
            if let Some(matching) = &legacy.arch_matching {
                if !arch_matches(arch, matching) {
                    return Classification::WrongArch;
                }
            }
            return Classification::LegacyHandler {
                extension: extension.to_string(),
                handler: legacy.handler.clone(),
                is_template: legacy.is_template,
            };
        }

        Classification::Unmatched
    }

    fn filtered(
        owners: &[Arc<SourceProcessor>],
        arch: &str,
        make: impl FnOnce(Vec<Arc<SourceProcessor>>) -> Classification,
    ) -> Classification {
        let relevant: Vec<Arc<SourceProcessor>> = owners
            .iter()
            .filter(|p| p.relevant_for_arch(arch))
            .cloned()
            .collect();
        if relevant.is_empty() {
            // Registered for this file, but not for this architecture: the
            // file must be skipped, not treated as a static asset.
            Classification::WrongArch
        } else {
            make(relevant)
        }
    }

    fn conflict_error(
        &self,
        package1: &str,
        package2: &str,
        what: &str,
        messages: &mut MessageSet,
    ) {
        if self.options.single_package {
            messages.error(format!(
                "plugins in package {} define multiple handlers for {what}",
                self.display_name
            ));
        } else {
            messages.error(format!(
                "conflict: two packages included in {} ({package1} and {package2}) \
                 are both trying to handle {what}",
                self.display_name
            ));
        }
    }
}

/// The source processors registered by one package, split by kind. This is
/// the registration API the host program drives after loading a package's
/// plugin metadata.
#[derive(Debug)]
pub struct ProcessorRegistry {
    package_name: String,
    compilers: SourceProcessorSet,
    linters: SourceProcessorSet,
    minifiers: SourceProcessorSet,
}

impl ProcessorRegistry {
    pub fn new(package_name: impl Into<String>) -> Self {
        let package_name = package_name.into();
        let single = |allow_conflicts| SetOptions {
            allow_conflicts,
            hardcode_defaults: false,
            single_package: true,
        };
        Self {
            compilers: SourceProcessorSet::new(&package_name, single(false)),
            linters: SourceProcessorSet::new(&package_name, single(true)),
            minifiers: SourceProcessorSet::new(&package_name, single(false)),
            package_name,
        }
    }

    pub fn package_name(&self) -> &str {
        &self.package_name
    }

    pub fn compilers(&self) -> &SourceProcessorSet {
        &self.compilers
    }

    pub fn linters(&self) -> &SourceProcessorSet {
        &self.linters
    }

    pub fn minifiers(&self) -> &SourceProcessorSet {
        &self.minifiers
    }

    pub fn register_compiler(
        &mut self,
        options: RegistrationOptions,
        factory: impl Fn() -> Box<dyn CompilerPlugin> + Send + Sync + 'static,
        messages: &mut MessageSet,
    ) {
        if !Self::check_keys(&self.package_name, &options, messages) {
            return;
        }
        let processor = SourceProcessor::new(
            &self.package_name,
            options,
            PluginFactory::Compiler(Box::new(factory)),
        );
        self.compilers.add_source_processor(processor, messages);
    }

    pub fn register_linter(
        &mut self,
        options: RegistrationOptions,
        factory: impl Fn() -> Box<dyn LinterPlugin> + Send + Sync + 'static,
        messages: &mut MessageSet,
    ) {
        if !Self::check_keys(&self.package_name, &options, messages) {
            return;
        }
        let processor = SourceProcessor::new(
            &self.package_name,
            options,
            PluginFactory::Linter(Box::new(factory)),
        );
        self.linters.add_source_processor(processor, messages);
    }

    /// Registers a minifier. Minifiers may only claim the `js` and `css`
    /// extensions and never exact filenames.
    pub fn register_minifier(
        &mut self,
        options: RegistrationOptions,
        factory: impl Fn() -> Box<dyn MinifierPlugin> + Send + Sync + 'static,
        messages: &mut MessageSet,
    ) {
        if let Some(bad) = options
            .extensions
            .iter()
            .find(|ext| !MINIFIER_EXTENSIONS.contains(&ext.as_str()))
        {
            messages.error(format!(
                "{bad}: minifiers are only allowed to register \"css\" or \"js\" extensions"
            ));
            return;
        }
        if !options.filenames.is_empty() {
            messages.error("registering a minifier does not accept filenames");
            return;
        }
        if !Self::check_keys(&self.package_name, &options, messages) {
            return;
        }
        let processor = SourceProcessor::new(
            &self.package_name,
            options,
            PluginFactory::Minifier(Box::new(factory)),
        );
        self.minifiers.add_source_processor(processor, messages);
    }

    /// Registers a deprecated single-extension source handler against the
    /// compiler namespace.
    pub fn register_source_handler(
        &mut self,
        extension: impl Into<String>,
        registration: LegacyRegistration,
        messages: &mut MessageSet,
    ) {
        self.compilers
            .add_legacy_handler(extension, registration, messages);
    }

    fn check_keys(
        package_name: &str,
        options: &RegistrationOptions,
        messages: &mut MessageSet,
    ) -> bool {
        if options.extensions.is_empty() && options.filenames.is_empty() {
            messages.error(format!(
                "package {package_name} registered a processor with no extensions or filenames"
            ));
            return false;
        }
        if let Some(bad) = options.extensions.iter().find(|ext| ext.starts_with('.')) {
            messages.error(format!(
                "extension '{bad}' must not start with a dot"
            ));
            return false;
        }
        true
    }
}
