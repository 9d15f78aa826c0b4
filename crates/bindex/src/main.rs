//
// main.rs
//

use std::env;
use std::sync::Arc;

use bindex::bundle_index::BundleIndex;
use bindex::config::BundleIndexConfig;
use bindex::resolver::WorkspaceResolver;

fn print_usage() {
    println!(
        "bindex {}, a bundle manifest indexer.",
        env!("CARGO_PKG_VERSION")
    );
    print!(
        r#"
Usage: bindex [OPTIONS] <workspace-dir>

Scans the workspace for bundle manifests and prints the indexed bundles.

Available options:

--services                   Also print every service name with its
                             provider and consumer counts
--json                       Print the bundle list as JSON
--glob <pattern>             Manifest file glob (default **/manifest.json)
--exclude <name>             Directory name to skip; may repeat
--version                    Print the version
--help                       Print this help message

"#
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut argv = env::args();
    argv.next(); // skip executable name

    let mut workspace: Option<String> = None;
    let mut show_services = false;
    let mut json_output = false;
    let mut config = BundleIndexConfig::default();

    while let Some(arg) = argv.next() {
        match arg.as_str() {
            "--services" => show_services = true,
            "--json" => json_output = true,
            "--glob" => {
                config.files_glob = argv
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("--glob needs a pattern"))?;
            }
            "--exclude" => {
                let name = argv
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("--exclude needs a directory name"))?;
                config.exclusion_globs.push(name);
            }
            "--version" => {
                println!("bindex {}", env!("CARGO_PKG_VERSION"));
                return Ok(());
            }
            "--help" => {
                print_usage();
                return Ok(());
            }
            other if other.starts_with("--") => {
                return Err(anyhow::anyhow!("Unknown argument: '{other}'"));
            }
            path => {
                if workspace.replace(path.to_string()).is_some() {
                    return Err(anyhow::anyhow!("More than one workspace directory given"));
                }
            }
        }
    }

    let Some(workspace) = workspace else {
        print_usage();
        return Ok(());
    };

    env_logger::init();

    let resolver = Arc::new(WorkspaceResolver::new(
        workspace,
        config.exclusion_globs.clone(),
    ));
    let index = BundleIndex::new(resolver, config);
    let discovered = index.rebuild().await?;

    let bundles = index.bundles();
    if json_output {
        println!("{}", serde_json::to_string_pretty(&bundles)?);
        index.dispose();
        return Ok(());
    }

    println!(
        "{} manifest(s) discovered, {} indexed",
        discovered,
        bundles.len()
    );
    for bundle in &bundles {
        let doc = index.find_bundle_by_id(&bundle.uri);
        let components = doc.map(|d| d.components().len()).unwrap_or(0);
        println!(
            "  {} ({}): {} component(s)",
            bundle.name, bundle.short_path, components
        );
    }

    if show_services {
        println!();
        for name in index.service_names() {
            let providers = index.find_provides_for(&name).len();
            let consumers = index.find_providing_for(&name).len();
            println!("  {name}: {providers} provider(s), {consumers} consumer(s)");
        }
    }

    index.dispose();
    Ok(())
}
