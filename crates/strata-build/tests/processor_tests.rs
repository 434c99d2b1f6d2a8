//! Integration tests for source processor registration and classification

use std::sync::Arc;

use rstest::rstest;
use strata_build::{
    BuildMode, BundleFile, Classification, CompilerPlugin, HtmlSection, LegacyRegistration,
    LinterPlugin, MessageSet, MinifierPlugin, PluginError, PluginInstance, ProcessorRegistry,
    RegistrationOptions, SetOptions, SourceInput, SourceProcessorSet,
};

struct NullCompiler;

impl CompilerPlugin for NullCompiler {
    fn process_files_for_target(&self, _inputs: &mut [SourceInput]) -> Result<(), PluginError> {
        Ok(())
    }
}

struct NullLinter;

impl LinterPlugin for NullLinter {
    fn process_files_for_package(
        &self,
        _inputs: &[SourceInput],
        _messages: &mut MessageSet,
    ) -> Result<(), PluginError> {
        Ok(())
    }
}

struct NullMinifier;

impl MinifierPlugin for NullMinifier {
    fn process_files_for_bundle(
        &self,
        _files: &mut [BundleFile],
        _mode: BuildMode,
    ) -> Result<(), PluginError> {
        Ok(())
    }
}

struct Registration {
    package: &'static str,
    extensions: &'static [&'static str],
    filenames: &'static [&'static str],
    arch_matching: Option<&'static str>,
}

/// A merged compiler set the way a build unit sees one.
fn merged_set(registrations: &[Registration]) -> (SourceProcessorSet, MessageSet) {
    let mut messages = MessageSet::new();
    let mut set = SourceProcessorSet::new(
        "the app",
        SetOptions {
            hardcode_defaults: true,
            ..SetOptions::default()
        },
    );

    for registration in registrations {
        let mut options = RegistrationOptions::extensions(registration.extensions.iter().copied())
            .filenames(registration.filenames.iter().copied());
        if let Some(arch) = registration.arch_matching {
            options = options.arch_matching(arch);
        }
        let mut registry = ProcessorRegistry::new(registration.package);
        registry.register_compiler(options, || Box::new(NullCompiler), &mut messages);
        set.merge(registry.compilers(), None, &mut messages);
    }

    (set, messages)
}

fn fixture_set() -> SourceProcessorSet {
    let (set, messages) = merged_set(&[
        Registration {
            package: "coffeescript",
            extensions: &["coffee", "coffee.md"],
            filenames: &[],
            arch_matching: None,
        },
        Registration {
            package: "stylus",
            extensions: &["styl"],
            filenames: &[],
            arch_matching: Some("web"),
        },
        Registration {
            package: "configurator",
            extensions: &[],
            filenames: &["build.json"],
            arch_matching: None,
        },
    ]);
    assert!(messages.is_empty(), "{messages}");
    set
}

fn kind_of(classification: &Classification) -> &'static str {
    match classification {
        Classification::Filename { .. } => "filename",
        Classification::Extension { .. } => "extension",
        Classification::DefaultScript { .. } => "default",
        Classification::LegacyHandler { .. } => "legacy",
        Classification::WrongArch => "wrong-arch",
        Classification::Unmatched => "unmatched",
    }
}

#[rstest]
#[case("foo.coffee", "os", "extension")]
#[case("foo.coffee.md", "os", "extension")]
#[case("build.json", "os", "filename")]
#[case("app.styl", "web.browser", "extension")]
#[case("app.styl", "os", "wrong-arch")]
#[case("app.js", "os", "default")]
#[case("notes.txt", "os", "unmatched")]
#[case("jsconfig", "os", "unmatched")]
fn test_classification_kinds(#[case] filename: &str, #[case] arch: &str, #[case] expected: &str) {
    let set = fixture_set();
    let classification = set.classify(filename, arch);
    assert_eq!(kind_of(&classification), expected, "{filename} on {arch}");
}

#[test]
fn test_longest_suffix_wins_over_shorter() {
    let set = fixture_set();
    match set.classify("literate.coffee.md", "os") {
        Classification::Extension { extension, .. } => assert_eq!(extension, "coffee.md"),
        other => panic!("unexpected classification: {other:?}"),
    }
}

#[test]
fn test_filename_match_beats_extension_match() {
    let (set, messages) = merged_set(&[
        Registration {
            package: "json-compiler",
            extensions: &["json"],
            filenames: &[],
            arch_matching: None,
        },
        Registration {
            package: "configurator",
            extensions: &[],
            filenames: &["build.json"],
            arch_matching: None,
        },
    ]);
    assert!(messages.is_empty(), "{messages}");

    match set.classify("build.json", "os") {
        Classification::Filename { processors } => {
            assert_eq!(processors[0].package_name(), "configurator");
        }
        other => panic!("unexpected classification: {other:?}"),
    }
}

#[test]
fn test_stylesheet_default_when_unclaimed() {
    let (set, _) = merged_set(&[]);
    match set.classify("app.css", "web.browser") {
        Classification::DefaultScript { extension } => assert_eq!(extension, "css"),
        other => panic!("unexpected classification: {other:?}"),
    }
}

#[test]
fn test_wrong_arch_stylesheet_processor() {
    // A css processor restricted to web targets: on os the file is
    // wrong-arch, not default-handled and not unmatched.
    let (set, _) = merged_set(&[Registration {
        package: "fancy-css",
        extensions: &["css"],
        filenames: &[],
        arch_matching: Some("web"),
    }]);
    assert!(matches!(
        set.classify("app.css", "os"),
        Classification::WrongArch
    ));
    assert!(matches!(
        set.classify("app.css", "web.browser"),
        Classification::Extension { .. }
    ));
}

#[test]
fn test_conflict_reports_once_and_keeps_first() {
    let (set, messages) = merged_set(&[
        Registration {
            package: "first-coffee",
            extensions: &["coffee"],
            filenames: &[],
            arch_matching: None,
        },
        Registration {
            package: "second-coffee",
            extensions: &["coffee"],
            filenames: &[],
            arch_matching: None,
        },
    ]);

    assert_eq!(messages.len(), 1);
    let rendered = messages.to_string();
    assert!(rendered.contains("*.coffee"), "{rendered}");

    // The original registrant stays authoritative for classification.
    match set.classify("cup.coffee", "os") {
        Classification::Extension { processors, .. } => {
            assert_eq!(processors.len(), 1);
            assert_eq!(processors[0].package_name(), "first-coffee");
        }
        other => panic!("unexpected classification: {other:?}"),
    }
}

#[test]
fn test_merge_filters_by_arch() {
    let mut messages = MessageSet::new();
    let mut registry = ProcessorRegistry::new("stylus");
    registry.register_compiler(
        RegistrationOptions::extensions(["styl"]).arch_matching("web"),
        || Box::new(NullCompiler),
        &mut messages,
    );

    let mut os_set = SourceProcessorSet::new("server program", SetOptions::default());
    os_set.merge(registry.compilers(), Some("os"), &mut messages);
    assert!(messages.is_empty(), "{messages}");

    // The processor plainly cannot run on os, so it was never merged in.
    assert!(os_set.is_empty());
    assert!(matches!(
        os_set.classify("app.styl", "os"),
        Classification::Unmatched
    ));
}

#[test]
fn test_legacy_handler_classification_and_dispatch() {
    let mut messages = MessageSet::new();
    let mut registry = ProcessorRegistry::new("templating");
    let handler: strata_build::LegacyHandler = Arc::new(|input: &mut SourceInput| {
        input.add_html(HtmlSection::Body, b"<template/>".to_vec());
        Ok(())
    });
    registry.register_source_handler(
        "tpl",
        LegacyRegistration {
            handler,
            package_name: "templating".to_string(),
            is_template: true,
            arch_matching: None,
        },
        &mut messages,
    );
    assert!(messages.is_empty(), "{messages}");

    let mut set = SourceProcessorSet::new(
        "the app",
        SetOptions {
            hardcode_defaults: true,
            ..SetOptions::default()
        },
    );
    set.merge(registry.compilers(), None, &mut messages);

    match set.classify("index.tpl", "web.browser") {
        Classification::LegacyHandler {
            extension,
            handler,
            is_template,
        } => {
            assert_eq!(extension, "tpl");
            assert!(is_template);

            let mut input =
                SourceInput::new("index.tpl", None, "web.browser", b"<t/>".to_vec(), "h");
            (*handler)(&mut input).unwrap();
            assert_eq!(input.outputs().len(), 1);
        }
        other => panic!("unexpected classification: {other:?}"),
    }
}

#[test]
fn test_legacy_handler_wrong_arch() {
    let mut messages = MessageSet::new();
    let mut registry = ProcessorRegistry::new("templating");
    registry.register_source_handler(
        "tpl",
        LegacyRegistration {
            handler: Arc::new(|_input: &mut SourceInput| Ok(())),
            package_name: "templating".to_string(),
            is_template: true,
            arch_matching: Some("web".to_string()),
        },
        &mut messages,
    );

    let mut set = SourceProcessorSet::new("the app", SetOptions::default());
    set.merge(registry.compilers(), None, &mut messages);
    assert!(messages.is_empty(), "{messages}");

    assert!(matches!(
        set.classify("index.tpl", "os"),
        Classification::WrongArch
    ));
}

#[test]
fn test_legacy_and_registry_conflict() {
    let mut messages = MessageSet::new();
    let mut set = SourceProcessorSet::new("the app", SetOptions::default());

    let mut compiler_registry = ProcessorRegistry::new("new-style");
    compiler_registry.register_compiler(
        RegistrationOptions::extensions(["tpl"]),
        || Box::new(NullCompiler),
        &mut messages,
    );
    set.merge(compiler_registry.compilers(), None, &mut messages);
    assert!(messages.is_empty(), "{messages}");

    // A legacy handler arriving after a registry owner is a conflict; the
    // registry owner stays authoritative.
    set.add_legacy_handler(
        "tpl",
        LegacyRegistration {
            handler: Arc::new(|_input: &mut SourceInput| Ok(())),
            package_name: "old-style".to_string(),
            is_template: false,
            arch_matching: None,
        },
        &mut messages,
    );
    assert_eq!(messages.len(), 1);
    assert!(matches!(
        set.classify("index.tpl", "os"),
        Classification::Extension { .. }
    ));
}

#[test]
#[should_panic(expected = "meaningless on a conflicts-allowed set")]
fn test_single_owner_lookup_rejected_for_linters() {
    let mut messages = MessageSet::new();
    let mut registry = ProcessorRegistry::new("jshint");
    registry.register_linter(
        RegistrationOptions::extensions(["js"]),
        || Box::new(NullLinter),
        &mut messages,
    );
    registry.linters().get_by_extension("js");
}

#[test]
fn test_linter_runs_against_package_inputs() {
    let mut messages = MessageSet::new();
    let mut registry = ProcessorRegistry::new("strict-lint");
    registry.register_linter(
        RegistrationOptions::extensions(["js"]),
        || Box::new(TodoLinter),
        &mut messages,
    );

    struct TodoLinter;
    impl LinterPlugin for TodoLinter {
        fn process_files_for_package(
            &self,
            inputs: &[SourceInput],
            messages: &mut MessageSet,
        ) -> Result<(), PluginError> {
            for input in inputs {
                if input.contents().windows(4).any(|w| w == b"TODO") {
                    messages.error_at(input.path().to_string(), "unresolved TODO");
                }
            }
            Ok(())
        }
    }

    let processor = registry.linters().all_processors()[0].clone();
    let inputs = vec![SourceInput::new(
        "app.js",
        None,
        "os",
        b"// TODO fix".to_vec(),
        "h",
    )];
    match processor.plugin() {
        PluginInstance::Linter(linter) => {
            linter
                .process_files_for_package(&inputs, &mut messages)
                .unwrap();
        }
        _ => panic!("expected a linter instance"),
    }
    assert_eq!(messages.len(), 1);
}

#[test]
fn test_minifier_registration_and_dispatch() {
    let mut messages = MessageSet::new();
    let mut registry = ProcessorRegistry::new("standard-minifier-js");

    struct StripSpaces;
    impl MinifierPlugin for StripSpaces {
        fn process_files_for_bundle(
            &self,
            files: &mut [BundleFile],
            mode: BuildMode,
        ) -> Result<(), PluginError> {
            if mode == BuildMode::Production {
                for file in files.iter_mut() {
                    file.data.retain(|b| *b != b' ');
                }
            }
            Ok(())
        }
    }

    registry.register_minifier(
        RegistrationOptions::extensions(["js"]),
        || Box::new(StripSpaces),
        &mut messages,
    );
    assert!(messages.is_empty(), "{messages}");

    let processor = registry.minifiers().all_processors()[0].clone();
    let mut bundle = vec![BundleFile {
        target_path: "app.js".to_string(),
        data: b"a = 1".to_vec(),
    }];
    match processor.plugin() {
        PluginInstance::Minifier(minifier) => {
            minifier
                .process_files_for_bundle(&mut bundle, BuildMode::Production)
                .unwrap();
        }
        _ => panic!("expected a minifier instance"),
    }
    assert_eq!(bundle[0].data, b"a=1");
}
