//! End-to-end target orchestration tests

use std::collections::BTreeMap;
use std::fs;

use pretty_assertions::assert_eq;
use strata_build::{
    BuildMode, BundleFile, CompilerPlugin, MakeOptions, MinifierPlugin, PluginError,
    ProcessorRegistry, RegistrationOptions, SourceInput, Target, TargetManifest, TargetOptions,
};
use strata_package::{
    BuildUnit, Edge, FileResource, MemoryCatalog, MessageSet, Package, Resource,
};
use tempfile::TempDir;

/// A compiler that turns `*.coffee` sources into scripts.
struct CoffeeCompiler;

impl CompilerPlugin for CoffeeCompiler {
    fn process_files_for_target(&self, inputs: &mut [SourceInput]) -> Result<(), PluginError> {
        for input in inputs.iter_mut() {
            let mut compiled = b"// compiled\n".to_vec();
            compiled.extend_from_slice(input.contents());
            let serve_path = format!("/{}", input.path().replace(".coffee", ".js"));
            input.add_javascript(serve_path, compiled);
        }
        Ok(())
    }
}

fn coffee_plugins() -> BTreeMap<String, ProcessorRegistry> {
    let mut messages = MessageSet::new();
    let mut registry = ProcessorRegistry::new("coffeescript");
    registry.register_compiler(
        RegistrationOptions::extensions(["coffee"]),
        || Box::new(CoffeeCompiler),
        &mut messages,
    );
    assert!(messages.is_empty(), "{messages}");

    let mut plugins = BTreeMap::new();
    plugins.insert("coffeescript".to_string(), registry);
    plugins
}

fn coffee_catalog() -> MemoryCatalog {
    let mut catalog = MemoryCatalog::new();
    let mut coffeescript = Package::new("coffeescript");
    coffeescript
        .push_unibuild(BuildUnit::builder(Some("coffeescript"), "web").build())
        .unwrap();
    catalog.insert(coffeescript);
    catalog
}

fn source(path: &str, extension: &str, data: &[u8]) -> Resource {
    Resource::source(path, Some(extension), data.to_vec(), strata_build::hash_bytes(data))
}

#[test]
fn test_web_bundle_end_to_end() {
    let catalog = coffee_catalog();
    let plugins = coffee_plugins();

    let mut app = Package::app();
    app.push_unibuild(
        BuildUnit::builder(None, "web")
            .use_edge(Edge::ordered("coffeescript"))
            .resource(source("client/main.coffee", "coffee", b"x = 1"))
            .resource(source("client/app.js", "js", b"console.log(1);"))
            .resource(Resource::Asset(FileResource::new(
                "/images/logo.png",
                b"png-bytes".to_vec(),
            )))
            .resource(Resource::HeadMarkup(b"<title>app</title>".to_vec()))
            .build(),
    )
    .unwrap();

    let mut target = Target::new(TargetOptions {
        catalog: &catalog,
        plugins: &plugins,
        arch: "web.browser",
        build_mode: BuildMode::Development,
    });
    target
        .make(MakeOptions {
            packages: vec![&app],
            minify_mode: BuildMode::Development,
        })
        .unwrap();
    assert!(target.messages().is_empty(), "{}", target.messages());

    // Source order preserved: the compiled coffee file precedes app.js.
    let js_paths: Vec<&str> = target
        .js_files()
        .iter()
        .map(|f| f.target_path.as_str())
        .collect();
    assert_eq!(js_paths, ["client/main.js", "client/app.js"]);
    assert!(target.js_files()[0]
        .data
        .starts_with(b"// compiled"));

    let dir = TempDir::new().unwrap();
    let out = dir.path().join("bundle");
    let outcome = target.write_to_path(&out, None).unwrap();

    assert_eq!(
        fs::read(out.join("client/app.js")).unwrap(),
        b"console.log(1);"
    );
    assert_eq!(fs::read(out.join("images/logo.png")).unwrap(), b"png-bytes");
    assert_eq!(
        fs::read(out.join("head.html")).unwrap(),
        b"<title>app</title>"
    );

    // The control file describes everything, in emission order.
    let manifest: TargetManifest =
        serde_json::from_slice(&fs::read(out.join("program.json")).unwrap()).unwrap();
    assert_eq!(manifest, outcome.manifest);
    let kinds: Vec<&str> = manifest.manifest.iter().map(|e| e.kind.as_str()).collect();
    assert_eq!(kinds, ["js", "js", "asset", "head"]);
    assert_eq!(manifest.manifest[0].url.as_deref(), Some("/client/main.js"));
    assert!(manifest.manifest.iter().all(|e| e.size > 0 && !e.hash.is_empty()));
}

#[test]
fn test_scripts_emitted_in_load_order() {
    let mut catalog = MemoryCatalog::new();

    let mut base = Package::new("base");
    base.push_unibuild(
        BuildUnit::builder(Some("base"), "web")
            .resource(Resource::Script(FileResource::new(
                "/packages/base.js",
                b"base".to_vec(),
            )))
            .build(),
    )
    .unwrap();
    catalog.insert(base);

    let mut ui = Package::new("ui");
    ui.push_unibuild(
        BuildUnit::builder(Some("ui"), "web")
            .use_edge(Edge::ordered("base"))
            .resource(Resource::Script(FileResource::new(
                "/packages/ui.js",
                b"ui".to_vec(),
            )))
            .build(),
    )
    .unwrap();
    catalog.insert(ui);

    let mut app = Package::app();
    app.push_unibuild(
        BuildUnit::builder(None, "web")
            .use_edge(Edge::ordered("ui"))
            .resource(Resource::Script(FileResource::new(
                "/app.js",
                b"app".to_vec(),
            )))
            .build(),
    )
    .unwrap();

    let plugins = BTreeMap::new();
    let mut target = Target::new(TargetOptions {
        catalog: &catalog,
        plugins: &plugins,
        arch: "web.browser",
        build_mode: BuildMode::Production,
    });
    target
        .make(MakeOptions {
            packages: vec![&app],
            minify_mode: BuildMode::Development,
        })
        .unwrap();
    assert!(target.messages().is_empty(), "{}", target.messages());

    let js_paths: Vec<&str> = target
        .js_files()
        .iter()
        .map(|f| f.target_path.as_str())
        .collect();
    assert_eq!(js_paths, ["packages/base.js", "packages/ui.js", "app.js"]);
}

#[test]
fn test_unmatched_source_fails_build_without_touching_output() {
    let catalog = MemoryCatalog::new();
    let plugins = BTreeMap::new();

    let mut app = Package::app();
    app.push_unibuild(
        BuildUnit::builder(None, "web")
            .resource(source("data/notes.xyz", "xyz", b"???"))
            .build(),
    )
    .unwrap();

    let mut target = Target::new(TargetOptions {
        catalog: &catalog,
        plugins: &plugins,
        arch: "web.browser",
        build_mode: BuildMode::Development,
    });
    target
        .make(MakeOptions {
            packages: vec![&app],
            minify_mode: BuildMode::Development,
        })
        .unwrap();

    assert_eq!(target.messages().len(), 1);
    assert!(target.messages().to_string().contains("notes.xyz"));

    let dir = TempDir::new().unwrap();
    let out = dir.path().join("bundle");
    assert!(target.write_to_path(&out, None).is_err());
    assert!(!out.exists());
}

#[test]
fn test_linter_config_file_is_excused() {
    let mut catalog = MemoryCatalog::new();
    let mut jshint = Package::new("jshint");
    jshint
        .push_unibuild(BuildUnit::builder(Some("jshint"), "web").build())
        .unwrap();
    catalog.insert(jshint);

    struct NullLinter;
    impl strata_build::LinterPlugin for NullLinter {
        fn process_files_for_package(
            &self,
            _inputs: &[SourceInput],
            _messages: &mut MessageSet,
        ) -> Result<(), PluginError> {
            Ok(())
        }
    }

    let mut messages = MessageSet::new();
    let mut registry = ProcessorRegistry::new("jshint");
    registry.register_linter(
        RegistrationOptions::default().filenames([".jshintrc"]),
        || Box::new(NullLinter),
        &mut messages,
    );
    assert!(messages.is_empty(), "{messages}");
    let mut plugins = BTreeMap::new();
    plugins.insert("jshint".to_string(), registry);

    let mut app = Package::app();
    app.push_unibuild(
        BuildUnit::builder(None, "web")
            .use_edge(Edge::ordered("jshint"))
            .resource(Resource::source(
                ".jshintrc",
                None,
                b"{}".to_vec(),
                strata_build::hash_bytes(b"{}"),
            ))
            .build(),
    )
    .unwrap();

    let mut target = Target::new(TargetOptions {
        catalog: &catalog,
        plugins: &plugins,
        arch: "web.browser",
        build_mode: BuildMode::Development,
    });
    target
        .make(MakeOptions {
            packages: vec![&app],
            minify_mode: BuildMode::Development,
        })
        .unwrap();

    // Known to a linter: not compiled, but not an error either.
    assert!(target.messages().is_empty(), "{}", target.messages());
    assert!(target.js_files().is_empty());
}

#[test]
fn test_minifier_runs_on_web_targets() {
    let mut catalog = MemoryCatalog::new();
    let mut minifier_pkg = Package::new("standard-minifier-js");
    minifier_pkg
        .push_unibuild(BuildUnit::builder(Some("standard-minifier-js"), "web").build())
        .unwrap();
    catalog.insert(minifier_pkg);

    struct SquashMinifier;
    impl MinifierPlugin for SquashMinifier {
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

    let mut messages = MessageSet::new();
    let mut registry = ProcessorRegistry::new("standard-minifier-js");
    registry.register_minifier(
        RegistrationOptions::extensions(["js"]),
        || Box::new(SquashMinifier),
        &mut messages,
    );
    assert!(messages.is_empty(), "{messages}");
    let mut plugins = BTreeMap::new();
    plugins.insert("standard-minifier-js".to_string(), registry);

    let mut app = Package::app();
    app.push_unibuild(
        BuildUnit::builder(None, "web")
            .use_edge(Edge::ordered("standard-minifier-js"))
            .resource(Resource::Script(FileResource::new(
                "/app.js",
                b"a = 1".to_vec(),
            )))
            .build(),
    )
    .unwrap();

    let mut target = Target::new(TargetOptions {
        catalog: &catalog,
        plugins: &plugins,
        arch: "web.browser",
        build_mode: BuildMode::Production,
    });
    target
        .make(MakeOptions {
            packages: vec![&app],
            minify_mode: BuildMode::Production,
        })
        .unwrap();
    assert!(target.messages().is_empty(), "{}", target.messages());

    assert_eq!(target.js_files()[0].data, b"a=1");
}

#[test]
fn test_os_target_asset_prefix_and_stylesheet_drop() {
    let catalog = MemoryCatalog::new();
    let plugins = BTreeMap::new();

    let mut app = Package::app();
    app.push_unibuild(
        BuildUnit::builder(None, "os")
            .resource(Resource::Script(FileResource::new(
                "/server.js",
                b"server".to_vec(),
            )))
            .resource(Resource::Stylesheet(FileResource::new(
                "/style.css",
                b"a{}".to_vec(),
            )))
            .resource(Resource::Asset(FileResource::new(
                "/config/settings.json",
                b"{}".to_vec(),
            )))
            .build(),
    )
    .unwrap();

    let mut target = Target::new(TargetOptions {
        catalog: &catalog,
        plugins: &plugins,
        arch: "os",
        build_mode: BuildMode::Production,
    });
    target
        .make(MakeOptions {
            packages: vec![&app],
            minify_mode: BuildMode::Development,
        })
        .unwrap();
    assert!(target.messages().is_empty(), "{}", target.messages());

    // Stylesheets mean nothing on the server; assets live under assets/.
    assert!(target.css_files().is_empty());
    assert_eq!(
        target.asset_files()[0].target_path,
        "assets/config/settings.json"
    );
    assert_eq!(target.asset_files()[0].url, None);

    let dir = TempDir::new().unwrap();
    let out = dir.path().join("bundle");
    let outcome = target.write_to_path(&out, None).unwrap();
    assert!(out.join("assets/config/settings.json").exists());
    assert!(outcome
        .manifest
        .manifest
        .iter()
        .all(|e| format!("{:?}", e.location) == "Server"));
}

#[test]
fn test_head_markup_on_server_target_is_fatal() {
    let catalog = MemoryCatalog::new();
    let plugins = BTreeMap::new();

    let mut app = Package::app();
    app.push_unibuild(
        BuildUnit::builder(None, "os")
            .resource(Resource::HeadMarkup(b"<title>nope</title>".to_vec()))
            .build(),
    )
    .unwrap();

    let mut target = Target::new(TargetOptions {
        catalog: &catalog,
        plugins: &plugins,
        arch: "os",
        build_mode: BuildMode::Production,
    });
    let err = target
        .make(MakeOptions {
            packages: vec![&app],
            minify_mode: BuildMode::Development,
        })
        .unwrap_err();
    assert!(err.to_string().contains("client"));
}

#[cfg(unix)]
#[test]
fn test_incremental_rebuild_reuses_unchanged_files() {
    use std::thread;
    use std::time::Duration;

    let catalog = coffee_catalog();
    let plugins = coffee_plugins();

    let mut app = Package::app();
    app.push_unibuild(
        BuildUnit::builder(None, "web")
            .use_edge(Edge::ordered("coffeescript"))
            .resource(source("client/main.coffee", "coffee", b"x = 1"))
            .build(),
    )
    .unwrap();

    fn make_target<'a>(
        catalog: &'a MemoryCatalog,
        plugins: &'a BTreeMap<String, ProcessorRegistry>,
        app: &'a Package,
    ) -> Target<'a> {
        let mut target = Target::new(TargetOptions {
            catalog,
            plugins,
            arch: "web.browser",
            build_mode: BuildMode::Development,
        });
        target
            .make(MakeOptions {
                packages: vec![app],
                minify_mode: BuildMode::Development,
            })
            .unwrap();
        assert!(target.messages().is_empty(), "{}", target.messages());
        target
    }

    let dir = TempDir::new().unwrap();
    let out = dir.path().join("bundle");

    let first = make_target(&catalog, &plugins, &app);
    let outcome = first.write_to_path(&out, None).unwrap();
    let mtime_before = fs::metadata(out.join("client/main.js"))
        .unwrap()
        .modified()
        .unwrap();
    thread::sleep(Duration::from_millis(50));

    let second = make_target(&catalog, &plugins, &app);
    second.write_to_path(&out, Some(outcome.previous)).unwrap();
    let mtime_after = fs::metadata(out.join("client/main.js"))
        .unwrap()
        .modified()
        .unwrap();

    assert_eq!(mtime_before, mtime_after);
}
